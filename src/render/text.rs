use fontdue::{Font, FontSettings};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::request::{Alignment, FontDescriptor};

/// Faces tried, in order, when no family is requested.
const FALLBACK_FAMILIES: &[&str] = &[
    "DejaVuSans",
    "LiberationSans-Regular",
    "NotoSans-Regular",
    "Arial",
    "Helvetica",
    "FreeSans",
];

/// Horizontal padding from the frame edge for left/right alignment.
const EDGE_PADDING: i32 = 20;

pub struct TextOverlay {
    font: Font,
    font_size: f32,
}

impl TextOverlay {
    pub fn from_bytes(bytes: &[u8], font_size: f32) -> Result<Self, String> {
        let font = Font::from_bytes(bytes, FontSettings::default())?;
        Ok(Self { font, font_size })
    }

    /// Load the font a descriptor points at. `None` if nothing usable is found.
    pub fn load(descriptor: &FontDescriptor, font_size: f32) -> Option<Self> {
        let path = match &descriptor.path {
            Some(path) => Some(path.clone()),
            None => find_font_file(descriptor.family.as_deref()),
        };
        let Some(path) = path else {
            log::warn!("No font found for {:?}; title will not be drawn", descriptor.family);
            return None;
        };

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Failed to read font {}: {}", path.display(), err);
                return None;
            }
        };
        match Self::from_bytes(&bytes, font_size) {
            Ok(overlay) => {
                log::info!("Title font: {} @ {:.0}px", path.display(), font_size);
                Some(overlay)
            }
            Err(err) => {
                log::warn!("Failed to parse font {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Measure the width of rendered text in pixels.
    pub fn measure_width(&self, text: &str) -> u32 {
        let width: f32 = text
            .chars()
            .map(|ch| self.font.metrics(ch, self.font_size).advance_width)
            .sum();
        width.ceil() as u32
    }

    /// Ascent plus descent.
    pub fn text_height(&self) -> u32 {
        match self.font.horizontal_line_metrics(self.font_size) {
            Some(m) => (m.ascent - m.descent).ceil() as u32,
            None => self.font_size.ceil() as u32,
        }
    }

    /// Composite text onto an RGB raster with its baseline at `baseline_y`.
    pub fn composite(&self, image: &mut RgbImage, text: &str, x: i32, baseline_y: i32, color: [u8; 4]) {
        let (width, height) = image.dimensions();
        let pixels: &mut [u8] = image;
        let mut cursor_x = x as f32;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, self.font_size);
            let glyph_x = cursor_x.round() as i32 + metrics.xmin;
            let glyph_y = baseline_y - metrics.height as i32 - metrics.ymin;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let alpha = bitmap[gy * metrics.width + gx];
                    if alpha == 0 {
                        continue;
                    }

                    let px = glyph_x + gx as i32;
                    let py = glyph_y + gy as i32;

                    if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                        continue;
                    }

                    let idx = ((py as u32 * width + px as u32) * 3) as usize;
                    let a = alpha as f32 / 255.0 * (color[3] as f32 / 255.0);
                    let inv_a = 1.0 - a;
                    pixels[idx] = (color[0] as f32 * a + pixels[idx] as f32 * inv_a) as u8;
                    pixels[idx + 1] = (color[1] as f32 * a + pixels[idx + 1] as f32 * inv_a) as u8;
                    pixels[idx + 2] = (color[2] as f32 * a + pixels[idx + 2] as f32 * inv_a) as u8;
                }
            }

            cursor_x += metrics.advance_width;
        }
    }
}

/// Title origin: left x and baseline y.
///
/// Left: `x_offset + 20`. Center: `width/2 - text_width/2 + x_offset`.
/// Right: `width - text_width - x_offset - 20`. Baseline is always
/// `height/2 + text_height/2 - y_offset`.
pub fn title_origin(
    alignment: Alignment,
    x_offset: i32,
    y_offset: i32,
    width: u32,
    height: u32,
    text_width: u32,
    text_height: u32,
) -> (i32, i32) {
    let (w, h) = (width as f32, height as f32);
    let (tw, th) = (text_width as f32, text_height as f32);
    let x = match alignment {
        Alignment::Left => (x_offset + EDGE_PADDING) as f32,
        Alignment::Center => w / 2.0 - tw / 2.0 + x_offset as f32,
        Alignment::Right => w - tw - x_offset as f32 - EDGE_PADDING as f32,
    };
    let y = h / 2.0 + th / 2.0 - y_offset as f32;
    (x.floor() as i32, y.floor() as i32)
}

fn font_dirs() -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();
    if let Some(dir) = dirs::font_dir() {
        dirs_out.push(dir);
    }
    if let Some(home) = dirs::home_dir() {
        dirs_out.push(home.join(".fonts"));
    }
    for dir in [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/Library/Fonts",
        "/System/Library/Fonts",
        "C:\\Windows\\Fonts",
    ] {
        dirs_out.push(PathBuf::from(dir));
    }
    dirs_out.retain(|d| d.is_dir());
    dirs_out
}

/// Search the font directories for a face whose file stem matches `family`
/// (case, spaces, dashes and underscores ignored).
pub fn find_font_file(family: Option<&str>) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    for dir in font_dirs() {
        collect_font_files(&dir, &mut candidates, 0);
    }
    candidates.sort();

    let wanted: Vec<String> = match family {
        Some(f) => vec![normalize(f)],
        None => FALLBACK_FAMILIES.iter().map(|f| normalize(f)).collect(),
    };
    for want in &wanted {
        let exact = candidates.iter().find(|p| stem_key(p) == *want);
        let regular = candidates
            .iter()
            .find(|p| stem_key(p) == format!("{want}regular"));
        if let Some(found) = exact.or(regular) {
            return Some(found.clone());
        }
    }
    None
}

fn collect_font_files(dir: &Path, out: &mut Vec<PathBuf>, depth: usize) {
    if depth > 6 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_font_files(&path, out, depth + 1);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}

fn stem_key(path: &Path) -> String {
    path.file_stem()
        .map(|s| normalize(&s.to_string_lossy()))
        .unwrap_or_default()
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_alignment_pads_from_edge() {
        assert_eq!(title_origin(Alignment::Left, 0, 0, 1280, 720, 300, 40), (20, 380));
        assert_eq!(title_origin(Alignment::Left, 15, 30, 1280, 720, 300, 40), (35, 350));
    }

    #[test]
    fn center_alignment_with_empty_title() {
        let (x, _) = title_origin(Alignment::Center, 0, 0, 1280, 720, 0, 0);
        assert_eq!(x, 640);
        let (x, _) = title_origin(Alignment::Center, -40, 0, 1280, 720, 0, 0);
        assert_eq!(x, 600);
        let (x, _) = title_origin(Alignment::Center, 7, 0, 1280, 720, 200, 40);
        assert_eq!(x, 1280 / 2 - 100 + 7);
    }

    #[test]
    fn right_alignment_pads_from_edge() {
        assert_eq!(title_origin(Alignment::Right, 0, 0, 1280, 720, 300, 40).0, 960);
        assert_eq!(title_origin(Alignment::Right, 10, 0, 1280, 720, 300, 40).0, 950);
    }

    #[test]
    fn baseline_ignores_alignment() {
        for alignment in [Alignment::Left, Alignment::Center, Alignment::Right] {
            assert_eq!(title_origin(alignment, 0, 25, 1920, 1080, 100, 50).1, 540 + 25 - 25);
        }
    }

    #[test]
    fn names_normalize() {
        assert_eq!(normalize("DejaVu Sans"), "dejavusans");
        assert_eq!(normalize("Liberation_Sans-Regular"), "liberationsansregular");
        assert_eq!(stem_key(Path::new("/x/DejaVuSans.ttf")), "dejavusans");
    }

    #[test]
    fn unknown_family_is_not_found() {
        assert!(find_font_file(Some("No Such Family 3f9a1c")).is_none());
        let descriptor = FontDescriptor {
            path: Some(PathBuf::from("/nonexistent/font.ttf")),
            ..Default::default()
        };
        assert!(TextOverlay::load(&descriptor, 24.0).is_none());
    }

    #[test]
    fn draws_with_any_installed_font() {
        // Skipped on machines without a common sans face.
        let Some(path) = find_font_file(None) else {
            return;
        };
        let descriptor = FontDescriptor { path: Some(path), ..Default::default() };
        let overlay = TextOverlay::load(&descriptor, 32.0).unwrap();
        assert!(overlay.measure_width("Title") > 0);
        assert!(overlay.text_height() > 0);

        let mut img = RgbImage::new(200, 80);
        overlay.composite(&mut img, "Title", 10, 50, [255, 255, 255, 255]);
        assert!(img.pixels().any(|p| p.0 != [0, 0, 0]));
    }
}
