//! Video clip playback.
//! Uses the `ffmpeg` command-line tool via a subprocess to decode video frames.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::FrameSource;
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

/// Stream metadata reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds; 0 when unknown.
    pub duration: f32,
    pub fps: f32,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

impl ClipInfo {
    /// Run ffprobe on the first video stream of `path`.
    pub fn probe(path: &Path) -> Result<Self> {
        let output = Command::new("ffprobe")
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,duration,r_frame_rate"])
            .args(["-of", "json"])
            .arg(path)
            .output()
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr)));
        }
        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Parse `ffprobe -of json` output.
    pub fn parse(json: &str) -> Result<Self> {
        let probe: ProbeOutput = serde_json::from_str(json).context("Invalid ffprobe output")?;
        let stream = probe.streams.into_iter().next().ok_or_else(|| anyhow!("No video stream found"))?;
        if stream.width == 0 || stream.height == 0 {
            return Err(anyhow!("Video stream has no dimensions"));
        }
        let fps = stream.r_frame_rate.as_deref().map(parse_fps).filter(|f| *f > 0.0).unwrap_or(30.0);
        let duration = stream.duration.as_deref().and_then(|d| d.parse().ok()).unwrap_or(0.0);
        Ok(Self { width: stream.width, height: stream.height, duration, fps })
    }
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_fps(s: &str) -> f32 {
    if let Some((num, den)) = s.split_once('/') {
        let n: f32 = num.parse().unwrap_or(0.0);
        let d: f32 = den.parse().unwrap_or(1.0);
        if d == 0.0 { 0.0 } else { n / d }
    } else {
        s.parse().unwrap_or(30.0)
    }
}

struct DecodedFrame {
    data: Vec<u8>,
    timestamp: f32,
}

/// A clip decoded by a background ffmpeg process and paced by playback time.
pub struct ClipSource {
    path: PathBuf,
    info: ClipInfo,
    frame_rx: Receiver<DecodedFrame>,
    current: Option<VideoFrame>,
    /// Decoded but not yet due.
    pending: Option<DecodedFrame>,
    /// Playback time of the first request.
    start_time: Option<f32>,
    decoder_done: bool,
    stop: Arc<AtomicBool>,
    _thread: JoinHandle<()>,
}

impl ClipSource {
    /// Probe the clip and start decoding. A looping clip restarts at the end;
    /// otherwise the source reports finished after its last frame.
    pub fn open(path: &Path, looping: bool) -> Result<Self> {
        info!("Opening clip via ffmpeg CLI: {:?}", path);
        let info = ClipInfo::probe(path)?;
        info!("Clip: {}x{}, {:.1}s, {:.1} fps", info.width, info.height, info.duration, info.fps);

        // Bounded so decoding never runs far ahead of playback.
        let (frame_tx, frame_rx) = mpsc::sync_channel(5);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let decode_path = path.to_path_buf();
        let thread = thread::spawn(move || decode_loop(&decode_path, info, looping, frame_tx, &stop_flag));

        Ok(Self {
            path: path.to_path_buf(),
            info,
            frame_rx,
            current: None,
            pending: None,
            start_time: None,
            decoder_done: false,
            stop,
            _thread: thread,
        })
    }

    pub fn info(&self) -> ClipInfo {
        self.info
    }

    fn to_frame(&self, decoded: DecodedFrame) -> VideoFrame {
        VideoFrame::from_data(self.info.width, self.info.height, PixelFormat::Rgba, decoded.data)
    }

    /// Show the newest decoded frame whose timestamp has passed, skipping
    /// frames when playback lags behind.
    fn frame_at(&mut self, time: f32) -> Option<&VideoFrame> {
        let start = *self.start_time.get_or_insert(time);
        let playback_time = time - start;

        if let Some(pending) = self.pending.take() {
            if pending.timestamp > playback_time {
                self.pending = Some(pending);
                return self.current.as_ref();
            }
            self.current = Some(self.to_frame(pending));
        }

        loop {
            match self.frame_rx.try_recv() {
                Ok(decoded) if decoded.timestamp <= playback_time => {
                    self.current = Some(self.to_frame(decoded));
                }
                Ok(decoded) => {
                    self.pending = Some(decoded);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.decoder_done = true;
                    break;
                }
            }
        }
        self.current.as_ref()
    }
}

impl FrameSource for ClipSource {
    fn next_frame(&mut self, time: f32) -> Option<VideoFrame> {
        self.frame_at(time).cloned()
    }

    fn describe(&self) -> String {
        format!("clip {}", self.path.display())
    }

    fn is_finished(&self) -> bool {
        self.decoder_done && self.pending.is_none()
    }
}

impl Drop for ClipSource {
    fn drop(&mut self) {
        // The decoder may be blocked on a full channel; dropping the receiver
        // unblocks it, so the thread is not joined here.
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn decode_loop(path: &Path, info: ClipInfo, looping: bool, tx: SyncSender<DecodedFrame>, stop: &AtomicBool) {
    let frame_size = (info.width * info.height * 4) as usize;
    let frame_duration = 1.0 / info.fps;
    // Timestamps keep increasing across loops so pacing stays monotonic.
    let mut frame_count: u64 = 0;

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        info!("Starting ffmpeg process");
        let mut child = match Command::new("ffmpeg")
            .arg("-i")
            .arg(path)
            .args(["-f", "image2pipe", "-pix_fmt", "rgba", "-vcodec", "rawvideo", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to spawn ffmpeg: {}", e);
                return;
            }
        };

        if let Some(mut stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stderr.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    for line in String::from_utf8_lossy(&buf[..n]).lines() {
                        if line.contains("Error") || line.contains("error") || line.contains("failed") {
                            error!("ffmpeg: {}", line);
                        }
                    }
                }
            });
        }

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            return;
        };
        let mut buffer = vec![0u8; frame_size];
        let mut decoded_any = false;

        loop {
            if stop.load(Ordering::Relaxed) {
                let _ = child.kill();
                return;
            }
            if let Err(e) = stdout.read_exact(&mut buffer) {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!("Error reading from ffmpeg: {}", e);
                }
                break;
            }

            let decoded = DecodedFrame {
                data: buffer.clone(),
                timestamp: frame_count as f32 * frame_duration,
            };
            frame_count += 1;
            decoded_any = true;

            // Blocks while the channel is full.
            if tx.send(decoded).is_err() {
                let _ = child.kill();
                return;
            }
        }

        let _ = child.wait();
        if !looping || !decoded_any {
            info!("Clip ended: {:?}", path);
            return;
        }
        info!("Clip loop restarting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fps() {
        assert_eq!(parse_fps("30/1"), 30.0);
        assert!((parse_fps("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_fps("25"), 25.0);
        assert_eq!(parse_fps("1/0"), 0.0);
        assert_eq!(parse_fps("N/A"), 0.0);
    }

    #[test]
    fn test_parse_probe_output() {
        let info = ClipInfo::parse(
            r#"{"programs": [], "streams": [{"width": 640, "height": 360, "r_frame_rate": "24/1", "duration": "12.500000"}]}"#,
        )
        .unwrap();
        assert_eq!(info, ClipInfo { width: 640, height: 360, duration: 12.5, fps: 24.0 });
    }

    #[test]
    fn test_parse_probe_tolerates_missing_fields() {
        let info = ClipInfo::parse(r#"{"streams": [{"width": 8, "height": 8, "r_frame_rate": "0/0"}]}"#).unwrap();
        assert_eq!(info.fps, 30.0);
        assert_eq!(info.duration, 0.0);
    }

    #[test]
    fn test_parse_probe_rejects_missing_stream() {
        assert!(ClipInfo::parse(r#"{"streams": []}"#).is_err());
        assert!(ClipInfo::parse("{}").is_err());
        assert!(ClipInfo::parse("garbage").is_err());
    }
}
