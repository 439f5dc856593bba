pub mod ffmpeg;

use crate::error::RenderResult;

/// Consumer of raw RGB24 frames.
pub trait FrameSink {
    fn write_frame(&mut self, rgb: &[u8]) -> RenderResult<()>;
}
