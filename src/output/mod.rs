//! Output backends for presenting composited video.

pub mod headless;
pub mod window_output;

pub use headless::{save_png, HeadlessOutput};
pub use window_output::{WindowConfig, WindowRenderer};

use crate::frame::VideoFrame;
use anyhow::Result;

/// Trait for video output backends.
pub trait OutputBackend {
    /// Write a frame to the output.
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;
}
