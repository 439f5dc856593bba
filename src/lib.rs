//! Audio spectrum visualizer: renders mirrored spectrum bars over a still or
//! video background and muxes the result with the source audio.

pub mod audio;
pub mod config;
pub mod encode;
pub mod error;
pub mod process;
pub mod render;
pub mod request;
pub mod scratch;

pub use config::{BackgroundLoop, RenderOptions};
pub use error::{RenderError, RenderResult};
pub use process::{CancelToken, Toolchain};
pub use render::pipeline::{RenderEvent, RenderHandle, RenderLane, RenderPipeline, RenderState};
pub use render::preview::{PreviewEvent, PreviewPipeline, PreviewWorker};
pub use request::{Alignment, FontDescriptor, FrameStyle, PreviewRequest, RenderRequest, Rgb};
