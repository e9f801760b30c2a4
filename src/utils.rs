use std::time::{Duration, Instant};

/// Rolling frame rate sampled from the render clock.
///
/// The rate is recomputed every `window` frames from the elapsed times the
/// compositor is given, so it reflects the frames actually rendered rather
/// than wall-clock jitter between them.
#[derive(Debug, Clone)]
pub struct FrameClock {
    window: u32,
    frames: u32,
    window_start: Option<f32>,
    fps: f32,
    total_frames: u64,
}

impl FrameClock {
    pub const DEFAULT_WINDOW: u32 = 20;

    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            frames: 0,
            window_start: None,
            fps: 0.0,
            total_frames: 0,
        }
    }

    /// Record a rendered frame at `elapsed` seconds. Returns the new rate when
    /// a sampling window completes.
    pub fn tick(&mut self, elapsed: f32) -> Option<f32> {
        self.total_frames += 1;
        let start = *self.window_start.get_or_insert(elapsed);
        self.frames += 1;
        if self.frames < self.window {
            return None;
        }

        let span = elapsed - start;
        // N frames span N-1 intervals.
        if span > 0.0 {
            self.fps = (self.frames - 1) as f32 / span;
        }
        self.frames = 1;
        self.window_start = Some(elapsed);
        Some(self.fps)
    }

    /// Most recent rate; zero until the first window completes.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

/// Wall-clock FPS counter for loops that do not render through the compositor.
pub struct FpsCounter {
    frame_count: u32,
    last_time: Instant,
    interval: Duration,
}

impl FpsCounter {
    /// Create a new FPS counter with the given reporting interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            frame_count: 0,
            last_time: Instant::now(),
            interval,
        }
    }

    /// Returns Some(fps) if the reporting interval has passed, otherwise None.
    pub fn update(&mut self) -> Option<f32> {
        self.frame_count += 1;
        let elapsed = self.last_time.elapsed();

        if elapsed >= self.interval {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.frame_count = 0;
            self.last_time = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
