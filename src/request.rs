use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{RenderError, RenderResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// An RGB triplet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    pub fn channels(self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }

    /// Parse "r, g, b", falling back to white on anything malformed.
    pub fn parse_or_white(s: &str) -> Self {
        s.parse().unwrap_or(Self::WHITE)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

impl FromStr for Rgb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u8> = s
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid color '{s}': {e}"))?;
        match parts.as_slice() {
            [r, g, b] => Ok(Rgb(*r, *g, *b)),
            _ => Err(format!("invalid color '{s}': expected r,g,b")),
        }
    }
}

/// Which font to draw the title with. An explicit `path` wins over `family`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FontDescriptor {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Pixel size; derived from the frame size when absent.
    #[serde(default)]
    pub size: Option<f32>,
}

impl FontDescriptor {
    pub fn pixel_size(&self, width: u32, height: u32) -> f32 {
        self.size.unwrap_or_else(|| {
            let shorter = width.min(height) as f32;
            (shorter * 0.046).max(24.0)
        })
    }
}

/// Everything that decides what a single composited frame looks like.
/// Shared by render and preview so both lay out identically.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FrameStyle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub font: FontDescriptor,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub x_offset: i32,
    #[serde(default)]
    pub y_offset: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub text_color: Rgb,
    #[serde(default)]
    pub bar_color: Rgb,
}

impl Default for FrameStyle {
    fn default() -> Self {
        Self {
            title: String::new(),
            font: FontDescriptor::default(),
            alignment: Alignment::default(),
            x_offset: 0,
            y_offset: 0,
            width: default_width(),
            height: default_height(),
            text_color: Rgb::WHITE,
            bar_color: Rgb::WHITE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RenderRequest {
    /// Still image, video, or empty for a solid black background.
    #[serde(default)]
    pub background: Option<PathBuf>,
    #[serde(flatten)]
    pub style: FrameStyle,
    #[serde(default = "default_fps")]
    pub fps: f32,
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreviewRequest {
    pub background: Option<PathBuf>,
    pub style: FrameStyle,
    pub preview_width: u32,
    pub preview_height: u32,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> f32 { 30.0 }

impl RenderRequest {
    /// Reject requests that would fail only after subprocesses are running.
    pub fn validate(&self) -> RenderResult<()> {
        if self.input.as_os_str().is_empty() {
            return Err(RenderError::invalid("no input audio file"));
        }
        if !self.input.is_file() {
            return Err(RenderError::invalid(format!(
                "input file not found: {}",
                self.input.display()
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(RenderError::invalid("no output video file"));
        }
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(RenderError::invalid(format!(
                    "output directory does not exist: {}",
                    parent.display()
                )));
            }
        }
        if let Some(bg) = self.background_path() {
            if !bg.exists() {
                return Err(RenderError::invalid(format!(
                    "background not found: {}",
                    bg.display()
                )));
            }
        }
        validate_dimensions(self.style.width, self.style.height)?;
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(RenderError::invalid("frame rate must be positive"));
        }
        Ok(())
    }

    pub fn background_path(&self) -> Option<&Path> {
        non_empty(self.background.as_deref())
    }
}

impl PreviewRequest {
    pub fn background_path(&self) -> Option<&Path> {
        non_empty(self.background.as_deref())
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn validate_dimensions(width: u32, height: u32) -> RenderResult<()> {
    if width == 0 || height == 0 {
        return Err(RenderError::invalid("resolution must be non-zero"));
    }
    // yuv420p output needs even dimensions
    if width % 2 != 0 || height % 2 != 0 {
        return Err(RenderError::invalid(format!(
            "resolution {width}x{height} must be even"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(input: PathBuf, output: PathBuf) -> RenderRequest {
        RenderRequest {
            background: None,
            style: FrameStyle::default(),
            fps: 30.0,
            input,
            output,
        }
    }

    #[test]
    fn rgb_parses_with_spaces() {
        assert_eq!("255, 0, 12".parse::<Rgb>().unwrap(), Rgb(255, 0, 12));
    }

    #[test]
    fn rgb_falls_back_to_white() {
        assert_eq!(Rgb::parse_or_white("300,0,0"), Rgb::WHITE);
        assert_eq!(Rgb::parse_or_white("1,2"), Rgb::WHITE);
        assert_eq!(Rgb::parse_or_white("red"), Rgb::WHITE);
    }

    #[test]
    fn font_size_defaults_from_frame() {
        let font = FontDescriptor::default();
        assert_eq!(font.pixel_size(1920, 1080), 1080.0 * 0.046);
        assert_eq!(font.pixel_size(320, 240), 24.0);
        let sized = FontDescriptor { size: Some(40.0), ..Default::default() };
        assert_eq!(sized.pixel_size(1920, 1080), 40.0);
    }

    #[test]
    fn validation_rejects_missing_input() {
        let req = request_with(
            PathBuf::from("/nonexistent/audiovis/in.mp3"),
            std::env::temp_dir().join("out.mp4"),
        );
        assert!(matches!(req.validate(), Err(RenderError::InvalidRequest(_))));
    }

    #[test]
    fn validation_rejects_empty_output_and_odd_sizes() {
        let input = std::env::temp_dir().join(format!("audiovis-req-{}.wav", std::process::id()));
        std::fs::write(&input, b"RIFF").unwrap();

        let req = request_with(input.clone(), PathBuf::new());
        assert!(matches!(req.validate(), Err(RenderError::InvalidRequest(_))));

        let mut req = request_with(input.clone(), std::env::temp_dir().join("out.mp4"));
        assert!(req.validate().is_ok());
        req.style.width = 1281;
        assert!(matches!(req.validate(), Err(RenderError::InvalidRequest(_))));
        req.style.width = 1280;
        req.background = Some(PathBuf::from("/nonexistent/bg.png"));
        assert!(matches!(req.validate(), Err(RenderError::InvalidRequest(_))));
        req.background = Some(PathBuf::new());
        assert!(req.validate().is_ok());

        std::fs::remove_file(&input).unwrap();
    }
}
