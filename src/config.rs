use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::request::RenderRequest;

/// What happens when a video background runs out before the audio does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundLoop {
    /// Hold the last frame.
    #[default]
    Freeze,
    /// Start over from the first frame.
    Wrap,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RenderOptions {
    #[serde(default = "default_samples_per_frame")]
    pub samples_per_frame: usize,
    #[serde(default = "default_smooth_down")]
    pub smooth_down: f32,
    #[serde(default = "default_smooth_up")]
    pub smooth_up: f32,
    #[serde(default)]
    pub background_loop: BackgroundLoop,
    #[serde(default)]
    pub bars: BarStyle,
    #[serde(default)]
    pub encode: EncodeSettings,
}

/// Geometry of the mirrored bar rows.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BarStyle {
    #[serde(default = "default_bar_count")]
    pub count: usize,
    /// Spectrum bins skipped between sampled bars.
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default = "default_bar_width")]
    pub width: i32,
    #[serde(default = "default_gap")]
    pub gap: i32,
    #[serde(default = "default_border")]
    pub border: i32,
    /// Alpha of the border halo; 0 disables it.
    #[serde(default = "default_border_opacity")]
    pub border_opacity: u8,
    #[serde(default = "default_margin")]
    pub margin: i32,
    /// Distance of each row's baseline from the vertical center.
    #[serde(default = "default_baseline_spread")]
    pub baseline_spread: i32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EncodeSettings {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            samples_per_frame: default_samples_per_frame(),
            smooth_down: default_smooth_down(),
            smooth_up: default_smooth_up(),
            background_loop: BackgroundLoop::default(),
            bars: BarStyle::default(),
            encode: EncodeSettings::default(),
        }
    }
}

impl Default for BarStyle {
    fn default() -> Self {
        Self {
            count: default_bar_count(),
            stride: default_stride(),
            width: default_bar_width(),
            gap: default_gap(),
            border: default_border(),
            border_opacity: default_border_opacity(),
            margin: default_margin(),
            baseline_spread: default_baseline_spread(),
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            pix_fmt: default_pix_fmt(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

fn default_samples_per_frame() -> usize { 1470 }
fn default_smooth_down() -> f32 { 0.08 }
fn default_smooth_up() -> f32 { 0.8 }
fn default_bar_count() -> usize { 63 }
fn default_stride() -> usize { 4 }
fn default_bar_width() -> i32 { 10 }
fn default_gap() -> i32 { 10 }
fn default_border() -> i32 { 5 }
fn default_border_opacity() -> u8 { 50 }
fn default_margin() -> i32 { 15 }
fn default_baseline_spread() -> i32 { 40 }
fn default_video_codec() -> String { "libx264".into() }
fn default_pix_fmt() -> String { "yuv420p".into() }
fn default_preset() -> String { "medium".into() }
fn default_crf() -> u32 { 20 }
fn default_audio_codec() -> String { "aac".into() }
fn default_audio_bitrate() -> String { "192k".into() }

/// A render described in a TOML file: a `[request]` table plus optional `[options]`.
#[derive(Debug, Deserialize)]
pub struct Job {
    pub request: RenderRequest,
    #[serde(default)]
    pub options: RenderOptions,
}

pub fn load_job(path: &Path) -> Result<Job> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    parse_job(&content).with_context(|| format!("Failed to parse job file: {}", path.display()))
}

fn parse_job(content: &str) -> Result<Job> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Alignment, Rgb};

    #[test]
    fn minimal_job_uses_defaults() {
        let job = parse_job(
            r#"
            [request]
            input = "song.mp3"
            output = "song.mp4"
            "#,
        )
        .unwrap();
        assert_eq!(job.request.style.width, 1280);
        assert_eq!(job.request.style.height, 720);
        assert_eq!(job.request.fps, 30.0);
        assert_eq!(job.request.background_path(), None);
        assert_eq!(job.options, RenderOptions::default());
        assert_eq!(job.options.samples_per_frame, 1470);
    }

    #[test]
    fn full_job_overrides() {
        let job = parse_job(
            r#"
            [request]
            input = "song.mp3"
            output = "song.mkv"
            background = "clip.mp4"
            title = "Hello"
            alignment = "center"
            x_offset = 12
            text_color = [255, 0, 0]
            font = { family = "DejaVu Sans", size = 60.0 }

            [options]
            background_loop = "wrap"
            smooth_up = 0.5

            [options.bars]
            border_opacity = 0

            [options.encode]
            crf = 18
            audio_codec = "pcm_s16le"
            "#,
        )
        .unwrap();
        assert_eq!(job.request.style.alignment, Alignment::Center);
        assert_eq!(job.request.style.x_offset, 12);
        assert_eq!(job.request.style.text_color, Rgb(255, 0, 0));
        assert_eq!(job.request.style.font.size, Some(60.0));
        assert_eq!(job.options.background_loop, BackgroundLoop::Wrap);
        assert_eq!(job.options.smooth_up, 0.5);
        assert_eq!(job.options.smooth_down, 0.08);
        assert_eq!(job.options.bars.border_opacity, 0);
        assert_eq!(job.options.bars.count, 63);
        assert_eq!(job.options.encode.crf, 18);
        assert_eq!(job.options.encode.video_codec, "libx264");
    }
}
