//! Offscreen output: keeps the latest composite and can save it as PNG.

use std::path::{Path, PathBuf};

use super::OutputBackend;
use crate::frame::VideoFrame;
use anyhow::{anyhow, Context, Result};
use tracing::info;

#[derive(Default)]
pub struct HeadlessOutput {
    snapshot: Option<PathBuf>,
    last: Option<VideoFrame>,
    frames: u64,
}

impl HeadlessOutput {
    /// `snapshot` is where [`HeadlessOutput::finish`] writes the last frame.
    pub fn new(snapshot: Option<PathBuf>) -> Self {
        Self { snapshot, last: None, frames: 0 }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn last_frame(&self) -> Option<&VideoFrame> {
        self.last.as_ref()
    }

    /// Write the last frame to the snapshot path, if one was configured.
    pub fn finish(&self) -> Result<Option<PathBuf>> {
        let Some(path) = &self.snapshot else {
            return Ok(None);
        };
        let frame = self.last.as_ref().ok_or_else(|| anyhow!("No frame was rendered; nothing to snapshot"))?;
        save_png(frame, path)?;
        info!("Wrote snapshot {:?} after {} frames", path, self.frames);
        Ok(Some(path.clone()))
    }
}

impl OutputBackend for HeadlessOutput {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        self.last = Some(frame.clone());
        self.frames += 1;
        Ok(())
    }
}

pub fn save_png(frame: &VideoFrame, path: &Path) -> Result<()> {
    let image = frame.to_image().ok_or_else(|| anyhow!("Frame buffer does not match its dimensions"))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_writes_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.png");
        let mut output = HeadlessOutput::new(Some(path.clone()));
        output.write_frame(&VideoFrame::solid(4, 3, [1, 2, 3, 255])).unwrap();
        output.write_frame(&VideoFrame::solid(4, 3, [200, 100, 50, 255])).unwrap();
        assert_eq!(output.frames_written(), 2);

        assert_eq!(output.finish().unwrap(), Some(path.clone()));
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1).0, [200, 100, 50, 255]);
    }

    #[test]
    fn test_snapshot_without_frames_fails() {
        let dir = tempfile::tempdir().unwrap();
        let output = HeadlessOutput::new(Some(dir.path().join("none.png")));
        assert!(output.finish().is_err());
    }

    #[test]
    fn test_no_snapshot_path_is_fine() {
        let mut output = HeadlessOutput::default();
        output.write_frame(&VideoFrame::solid(1, 1, [0, 0, 0, 255])).unwrap();
        assert_eq!(output.finish().unwrap(), None);
    }
}
