use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use audiovis::{Alignment, BackgroundLoop};

#[derive(Parser, Debug)]
#[command(name = "audiovis", about = "Render an audio spectrum visualization video")]
pub struct Cli {
    /// Input audio file (anything ffmpeg can decode)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output video file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Background image or video
    #[arg(short, long)]
    pub background: Option<PathBuf>,

    /// Title text
    #[arg(short = 't', long = "text", default_value = "")]
    pub text: String,

    /// Title font: a TTF/OTF path or a family name
    #[arg(short, long)]
    pub font: Option<String>,

    /// Title font size in pixels
    #[arg(short = 's', long = "fontsize")]
    pub font_size: Option<f32>,

    /// Video width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 30.0)]
    pub fps: f32,

    /// Title color as "r,g,b"
    #[arg(short = 'c', long = "textcolor", default_value = "255,255,255")]
    pub text_color: String,

    /// Bar color as "r,g,b"
    #[arg(short = 'C', long = "viscolor", default_value = "255,255,255")]
    pub vis_color: String,

    /// Title x offset
    #[arg(short = 'x', long = "xposition", default_value_t = 0, allow_negative_numbers = true)]
    pub x_offset: i32,

    /// Title y offset
    #[arg(short = 'y', long = "yposition", default_value_t = 0, allow_negative_numbers = true)]
    pub y_offset: i32,

    /// Title alignment
    #[arg(short, long, value_enum, default_value_t = AlignArg::Left)]
    pub alignment: AlignArg,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// H.264 CRF quality (0-51, lower = better)
    #[arg(long, default_value_t = 20)]
    pub crf: u32,

    /// What a video background does once it runs out of frames
    #[arg(long, value_enum, default_value_t = LoopArg::Freeze)]
    pub background_loop: LoopArg,

    /// TOML job file with a [request] table and optional [options]
    #[arg(long)]
    pub job: Option<PathBuf>,

    /// Write a single preview frame to this PNG instead of rendering
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// Preview width bound
    #[arg(long, default_value_t = 640)]
    pub preview_width: u32,

    /// Preview height bound
    #[arg(long, default_value_t = 360)]
    pub preview_height: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum AlignArg {
    Left,
    Center,
    Right,
}

impl From<AlignArg> for Alignment {
    fn from(arg: AlignArg) -> Self {
        match arg {
            AlignArg::Left => Alignment::Left,
            AlignArg::Center => Alignment::Center,
            AlignArg::Right => Alignment::Right,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LoopArg {
    Freeze,
    Wrap,
}

impl From<LoopArg> for BackgroundLoop {
    fn from(arg: LoopArg) -> Self {
        match arg {
            LoopArg::Freeze => BackgroundLoop::Freeze,
            LoopArg::Wrap => BackgroundLoop::Wrap,
        }
    }
}
