//! Playback sources feeding the compositor.

mod camera;
mod clip;
mod pattern;

pub use camera::{CameraSource, NokhwaCapture};
pub use clip::{parse_fps, ClipInfo, ClipSource};
pub use pattern::TestPattern;

use std::fmt;
use std::path::PathBuf;

use crate::frame::VideoFrame;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Trait for webcam capture backends.
pub trait CaptureBackend {
    /// Returns a list of available camera devices.
    fn list_devices() -> Result<Vec<CameraInfo>>
    where
        Self: Sized;

    /// Opens the camera with the specified configuration.
    fn open(config: CaptureConfig) -> Result<Self>
    where
        Self: Sized;

    /// Captures a single frame from the camera.
    fn capture_frame(&mut self) -> Result<VideoFrame>;

    /// Returns the current frame dimensions.
    fn frame_size(&self) -> (u32, u32);
}

/// Anything that can hand the compositor a frame for a point in time.
pub trait FrameSource {
    /// Latest frame for playback time `time` (seconds since the app started).
    /// `None` until the source has produced its first frame.
    fn next_frame(&mut self, time: f32) -> Option<VideoFrame>;

    /// Short label for logs.
    fn describe(&self) -> String;

    /// A source that will never produce another frame.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// A configured source, as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSpec {
    Camera {
        #[serde(default)]
        device: u32,
    },
    Clip {
        path: PathBuf,
        #[serde(default = "default_looping")]
        looping: bool,
    },
    Pattern,
}

fn default_looping() -> bool {
    true
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera { device } => write!(f, "camera {device}"),
            SourceSpec::Clip { path, .. } => write!(f, "clip {}", path.display()),
            SourceSpec::Pattern => f.write_str("test pattern"),
        }
    }
}

/// Open the source a spec describes.
pub fn open_source(spec: &SourceSpec, capture: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    Ok(match spec {
        SourceSpec::Camera { device } => {
            let config = CaptureConfig { device_index: *device, ..capture.clone() };
            Box::new(CameraSource::spawn(config)?)
        }
        SourceSpec::Clip { path, looping } => Box::new(ClipSource::open(path, *looping)?),
        SourceSpec::Pattern => Box::new(TestPattern::new(capture.width, capture.height)),
    })
}

pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    NokhwaCapture::list_devices()
}

pub(crate) type Opener = Box<dyn FnMut(&SourceSpec) -> Result<Box<dyn FrameSource>>>;

/// Cycles through the configured sources. A source that fails to open is
/// replaced by the test pattern so playback never stalls.
pub struct SourceRotation {
    specs: Vec<SourceSpec>,
    index: usize,
    current: Box<dyn FrameSource>,
    fallback_size: (u32, u32),
    opener: Opener,
}

impl SourceRotation {
    pub fn new(specs: Vec<SourceSpec>, capture: CaptureConfig) -> Self {
        let fallback_size = (capture.width, capture.height);
        Self::with_opener(specs, fallback_size, Box::new(move |spec| open_source(spec, &capture)))
    }

    pub(crate) fn with_opener(specs: Vec<SourceSpec>, fallback_size: (u32, u32), mut opener: Opener) -> Self {
        let specs = if specs.is_empty() { vec![SourceSpec::Pattern] } else { specs };
        let current = Self::open_or_fallback(&mut opener, &specs[0], fallback_size);
        Self { specs, index: 0, current, fallback_size, opener }
    }

    fn open_or_fallback(opener: &mut Opener, spec: &SourceSpec, (width, height): (u32, u32)) -> Box<dyn FrameSource> {
        match opener(spec) {
            Ok(source) => {
                info!("Playing {}", source.describe());
                source
            }
            Err(e) => {
                warn!("Failed to open {}: {:#}. Showing the test pattern instead.", spec, e);
                Box::new(TestPattern::new(width, height))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_spec(&self) -> &SourceSpec {
        &self.specs[self.index]
    }

    pub fn describe(&self) -> String {
        self.current.describe()
    }

    /// Switch to the next source, wrapping around. Returns the new index.
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.specs.len();
        self.current = Self::open_or_fallback(&mut self.opener, &self.specs[self.index], self.fallback_size);
        self.index
    }

    /// Move on if the current source has finished. Returns true when it
    /// advanced, so the caller can treat it as a rotation.
    pub fn poll_finished(&mut self) -> bool {
        if !self.current.is_finished() {
            return false;
        }
        info!("{} finished", self.current.describe());
        self.advance();
        true
    }

    pub fn next_frame(&mut self, time: f32) -> Option<VideoFrame> {
        self.current.next_frame(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;
    use std::rc::Rc;

    struct OneShot {
        shown: bool,
    }

    impl FrameSource for OneShot {
        fn next_frame(&mut self, _time: f32) -> Option<VideoFrame> {
            self.shown = true;
            Some(VideoFrame::solid(2, 2, [9, 9, 9, 255]))
        }

        fn describe(&self) -> String {
            "one shot".to_string()
        }

        fn is_finished(&self) -> bool {
            self.shown
        }
    }

    fn fake_opener(opened: Rc<Cell<usize>>) -> Opener {
        Box::new(move |spec| {
            opened.set(opened.get() + 1);
            match spec {
                SourceSpec::Camera { .. } => Err(anyhow!("no camera here")),
                SourceSpec::Clip { .. } => Ok(Box::new(OneShot { shown: false }) as Box<dyn FrameSource>),
                SourceSpec::Pattern => Ok(Box::new(TestPattern::new(4, 4)) as Box<dyn FrameSource>),
            }
        })
    }

    #[test]
    fn test_source_specs_parse_from_yaml() {
        let specs: Vec<SourceSpec> = serde_yaml::from_str(
            "- type: camera\n- type: clip\n  path: a.mp4\n  looping: false\n- type: clip\n  path: b.mp4\n- type: pattern\n",
        )
        .unwrap();
        assert_eq!(
            specs,
            vec![
                SourceSpec::Camera { device: 0 },
                SourceSpec::Clip { path: "a.mp4".into(), looping: false },
                SourceSpec::Clip { path: "b.mp4".into(), looping: true },
                SourceSpec::Pattern,
            ]
        );
    }

    #[test]
    fn test_empty_rotation_plays_the_pattern() {
        let opened = Rc::new(Cell::new(0));
        let mut rotation = SourceRotation::with_opener(Vec::new(), (4, 4), fake_opener(opened.clone()));
        assert_eq!(rotation.current_spec(), &SourceSpec::Pattern);
        assert_eq!(rotation.advance(), 0);
        assert_eq!(rotation.next_frame(0.0).unwrap().width, 4);
    }

    #[test]
    fn test_advance_wraps_and_reopens() {
        let opened = Rc::new(Cell::new(0));
        let specs = vec![SourceSpec::Pattern, SourceSpec::Clip { path: "x.mp4".into(), looping: true }];
        let mut rotation = SourceRotation::with_opener(specs, (4, 4), fake_opener(opened.clone()));
        assert_eq!(rotation.advance(), 1);
        assert_eq!(rotation.advance(), 0);
        assert_eq!(opened.get(), 3);
    }

    #[test]
    fn test_failed_open_falls_back_to_pattern() {
        let opened = Rc::new(Cell::new(0));
        let specs = vec![SourceSpec::Camera { device: 3 }];
        let mut rotation = SourceRotation::with_opener(specs, (6, 2), fake_opener(opened));
        assert_eq!(rotation.describe(), TestPattern::new(6, 2).describe());
        let frame = rotation.next_frame(1.0).unwrap();
        assert_eq!((frame.width, frame.height), (6, 2));
    }

    #[test]
    fn test_finished_source_advances_rotation() {
        let opened = Rc::new(Cell::new(0));
        let specs = vec![SourceSpec::Clip { path: "x.mp4".into(), looping: false }, SourceSpec::Pattern];
        let mut rotation = SourceRotation::with_opener(specs, (4, 4), fake_opener(opened));

        assert!(!rotation.poll_finished());
        assert_eq!(rotation.next_frame(0.0).unwrap().width, 2);
        assert_eq!(rotation.index(), 0);
        assert!(rotation.poll_finished());
        assert_eq!(rotation.index(), 1);
        assert_eq!(rotation.next_frame(0.1).unwrap().width, 4);
        assert!(!rotation.poll_finished());
    }
}
