pub mod background;
pub mod compositor;
pub mod pipeline;
pub mod preview;
pub mod text;
