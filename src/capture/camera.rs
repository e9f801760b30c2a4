//! Nokhwa-based webcam capture, driven from a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CameraInfo, CaptureBackend, CaptureConfig, FrameSource};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{error, info, warn};

/// Formats tried in order to get any stream at all. Uncompressed formats come
/// first for built-in laptop cameras, MJPEG for USB webcams.
fn seed_formats() -> Vec<CameraFormat> {
    const FORMATS: [FrameFormat; 3] = [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG];
    let mut seeds = Vec::new();
    for (width, height) in [(1920, 1080), (1280, 720)] {
        for fps in [30, 25, 15] {
            seeds.extend(FORMATS.iter().map(|&f| CameraFormat::new(Resolution::new(width, height), f, fps)));
        }
    }
    seeds.extend(FORMATS.iter().map(|&f| CameraFormat::new(Resolution::new(640, 480), f, 30)));
    seeds
}

/// Resolution dominates, then frame rate, then pixel format.
fn format_score(width: u32, height: u32, fps: u32, format: FrameFormat) -> i64 {
    let format_bonus = match format {
        FrameFormat::NV12 => 30,
        FrameFormat::YUYV => 20,
        FrameFormat::MJPEG => 10,
        _ => 0,
    };
    (width as i64) * (height as i64) + (fps as i64) * 1000 + format_bonus
}

/// Webcam capture using the nokhwa library.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl NokhwaCapture {
    /// Switch to the best format the device reports, falling back to the seed.
    fn upgrade_format(camera: &mut Camera, seed: CameraFormat) {
        let supported = match camera.compatible_camera_formats() {
            Ok(formats) if !formats.is_empty() => formats,
            _ => {
                warn!("Device reported no supported formats. Keeping {:?}.", seed);
                return;
            }
        };
        let Some(best) = supported
            .into_iter()
            .max_by_key(|f| format_score(f.width(), f.height(), f.frame_rate(), f.format()))
        else {
            return;
        };
        if best == seed {
            return;
        }

        info!("Attempting to upgrade to better format: {:?}", best);
        let _ = camera.stop_stream();
        let upgraded = camera
            .set_camera_requset(RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(best)))
            .and_then(|_| camera.open_stream());
        if let Err(e) = upgraded {
            warn!("Failed to open stream with {:?} ({}), reverting to seed format", best, e);
            let _ = camera.set_camera_requset(RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed)));
            let _ = camera.open_stream();
        }
    }
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(config: CaptureConfig) -> Result<Self> {
        let opened = seed_formats().into_iter().find_map(|seed| {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed));
            let mut camera = Camera::new(CameraIndex::Index(config.device_index), requested).ok()?;
            // Some drivers accept the request but fail once streaming starts.
            camera.open_stream().ok()?;
            info!("Verified connection with seed format: {:?}", seed);
            Some((camera, seed))
        });
        let (mut camera, seed) = opened.ok_or_else(|| {
            anyhow!("Could not open a stream on camera index {} with any standard format", config.device_index)
        })?;

        Self::upgrade_format(&mut camera, seed);

        let resolution = camera.resolution();
        info!("Camera opened with resolution: {}", resolution);

        Ok(Self {
            camera,
            width: resolution.width(),
            height: resolution.height(),
        })
    }

    fn capture_frame(&mut self) -> Result<VideoFrame> {
        let frame = self.camera.frame()?;
        let decoded = frame.decode_image::<RgbFormat>()?;
        Ok(VideoFrame::from_data(self.width, self.height, PixelFormat::Rgb, decoded.into_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Camera captured on its own thread. The camera handle is not `Send`, so
/// it is opened inside the thread and only frames cross over.
pub struct CameraSource {
    device_index: u32,
    width: u32,
    height: u32,
    frame_rx: Receiver<VideoFrame>,
    latest: Option<VideoFrame>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraSource {
    /// Open the camera and start capturing. Fails if the device cannot be opened.
    pub fn spawn(config: CaptureConfig) -> Result<Self> {
        let device_index = config.device_index;
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(u32, u32), String>>(1);
        let (frame_tx, frame_rx) = mpsc::sync_channel::<VideoFrame>(2);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = thread::spawn(move || {
            let mut capture = match NokhwaCapture::open(config) {
                Ok(capture) => capture,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{e:#}")));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(capture.frame_size()));

            while !stop_flag.load(Ordering::Relaxed) {
                match capture.capture_frame() {
                    Ok(frame) => match frame_tx.try_send(frame) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => break,
                    },
                    Err(e) => {
                        error!("Camera capture error: {}", e);
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
        });

        let (width, height) = ready_rx
            .recv()
            .map_err(|_| anyhow!("Camera thread exited before opening device {}", device_index))?
            .map_err(|e| anyhow!(e))?;
        info!("Camera {} streaming at {}x{}", device_index, width, height);

        Ok(Self {
            device_index,
            width,
            height,
            frame_rx,
            latest: None,
            stop,
            thread: Some(thread),
        })
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self, _time: f32) -> Option<VideoFrame> {
        while let Ok(frame) = self.frame_rx.try_recv() {
            self.latest = Some(frame);
        }
        self.latest.clone()
    }

    fn describe(&self) -> String {
        format!("camera {} ({}x{})", self.device_index, self.width, self.height)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_formats_go_from_large_to_small() {
        let seeds = seed_formats();
        assert_eq!(seeds.len(), 21);
        assert_eq!(seeds[0], CameraFormat::new(Resolution::new(1920, 1080), FrameFormat::NV12, 30));
        assert_eq!(seeds[20].resolution(), Resolution::new(640, 480));
    }

    #[test]
    fn test_format_score_ordering() {
        let hd = format_score(1920, 1080, 15, FrameFormat::MJPEG);
        let sd = format_score(1280, 720, 60, FrameFormat::NV12);
        assert!(hd > sd);
        assert!(format_score(1280, 720, 30, FrameFormat::YUYV) > format_score(1280, 720, 25, FrameFormat::NV12));
        assert!(format_score(1280, 720, 30, FrameFormat::NV12) > format_score(1280, 720, 30, FrameFormat::MJPEG));
    }
}
