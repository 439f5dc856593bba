use image::RgbImage;
use std::path::Path;

use super::background::RasterCache;
use super::text::{title_origin, TextOverlay};
use crate::audio::features::Spectrum;
use crate::config::BarStyle;
use crate::request::{FontDescriptor, FrameStyle, Rgb};

/// Draws output frames: background, title, then mirrored spectrum bars.
pub struct FrameCompositor {
    cache: RasterCache,
    bars: BarStyle,
    font: Option<LoadedFont>,
}

struct LoadedFont {
    descriptor: FontDescriptor,
    size: f32,
    overlay: Option<TextOverlay>,
}

impl FrameCompositor {
    pub fn new(bars: BarStyle) -> Self {
        Self {
            cache: RasterCache::new(),
            bars,
            font: None,
        }
    }

    /// Full frame for one spectrum.
    pub fn composite(&mut self, background: Option<&Path>, style: &FrameStyle, spectrum: &Spectrum) -> RgbImage {
        let mut frame = self.base_frame(background, style);
        self.draw_bars(&mut frame, spectrum, style.bar_color);
        frame
    }

    /// Background plus title, exactly `style.width`x`style.height`.
    pub fn base_frame(&mut self, background: Option<&Path>, style: &FrameStyle) -> RgbImage {
        let mut frame = self.cache.raster(background, style.width, style.height);
        if !style.title.is_empty() {
            self.draw_title(&mut frame, style);
        }
        frame
    }

    fn draw_title(&mut self, frame: &mut RgbImage, style: &FrameStyle) {
        let size = style.font.pixel_size(style.width, style.height);
        let stale = self
            .font
            .as_ref()
            .map_or(true, |f| f.descriptor != style.font || f.size != size);
        if stale {
            self.font = Some(LoadedFont {
                descriptor: style.font.clone(),
                size,
                overlay: TextOverlay::load(&style.font, size),
            });
        }
        let Some(overlay) = self.font.as_ref().and_then(|f| f.overlay.as_ref()) else {
            return;
        };

        let (x, y) = title_origin(
            style.alignment,
            style.x_offset,
            style.y_offset,
            style.width,
            style.height,
            overlay.measure_width(&style.title),
            overlay.text_height(),
        );
        let [r, g, b] = style.text_color.channels();
        overlay.composite(frame, &style.title, x, y, [r, g, b, 255]);
    }

    /// Two mirrored rows of bars straddling the vertical center.
    pub fn draw_bars(&self, frame: &mut RgbImage, spectrum: &Spectrum, color: Rgb) {
        let bars = &self.bars;
        let half = frame.height() as f32 / 2.0;
        let rgb = color.channels();

        for d in [1.0f32, -1.0] {
            let baseline = half - d * bars.baseline_spread as f32;
            for j in 0..bars.count {
                let value = spectrum.value(j * bars.stride).max(0.0);
                let x0 = bars.margin + j as i32 * (bars.width + bars.gap);
                let x1 = x0 + bars.width - 1;

                if bars.border_opacity > 0 {
                    let border = bars.border as f32;
                    fill_rect(
                        frame,
                        x0 - bars.border,
                        baseline + d * border,
                        x1 + bars.border,
                        baseline - d * (value + border),
                        rgb,
                        bars.border_opacity,
                    );
                }
                fill_rect(frame, x0, baseline, x1, baseline - d * value, rgb, 255);
            }
        }
    }

    /// Background decode/resize passes so far.
    pub fn raster_loads(&self) -> usize {
        self.cache.loads()
    }
}

/// Fill the inclusive rectangle, clipped to the frame, blending at `alpha`.
fn fill_rect(frame: &mut RgbImage, x0: i32, y0: f32, x1: i32, y1: f32, color: [u8; 3], alpha: u8) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let (xa, xb) = (x0.min(x1).max(0), x0.max(x1).min(width as i32 - 1));
    let (ya, yb) = (y0.min(y1).round() as i32, y0.max(y1).round() as i32);
    let (ya, yb) = (ya.max(0), yb.min(height as i32 - 1));
    if xa > xb || ya > yb {
        return;
    }

    let a = alpha as u32;
    for y in ya..=yb {
        for x in xa..=xb {
            let px = frame.get_pixel_mut(x as u32, y as u32);
            if alpha == 255 {
                px.0 = color;
            } else {
                for c in 0..3 {
                    px.0[c] = ((color[c] as u32 * a + px.0[c] as u32 * (255 - a) + 127) / 255) as u8;
                }
            }
        }
    }
}
