//! Synthetic animated source, used when no camera or clip is available.

use super::FrameSource;
use crate::frame::VideoFrame;

/// Colour gradient with a white bar sweeping left to right every four
/// seconds. The frame is a pure function of size and time.
pub struct TestPattern {
    width: u32,
    height: u32,
}

const SWEEP_SECONDS: f32 = 4.0;

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width: width.max(1), height: height.max(1) }
    }

    pub fn render(&self, time: f32) -> VideoFrame {
        let (w, h) = (self.width as f32, self.height as f32);
        let bar_width = (self.width / 16).max(1);
        let bar_x = ((time / SWEEP_SECONDS).rem_euclid(1.0) * w) as u32;
        let pulse = 0.5 + 0.5 * (time * std::f32::consts::TAU / SWEEP_SECONDS).sin();

        VideoFrame::from_fn(self.width, self.height, |x, y| {
            if x >= bar_x && x < bar_x + bar_width {
                return [255, 255, 255, 255];
            }
            let r = (x as f32 + 0.5) / w;
            let g = (y as f32 + 0.5) / h;
            [(r * 255.0) as u8, (g * 255.0) as u8, (pulse * 255.0) as u8, 255]
        })
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self, time: f32) -> Option<VideoFrame> {
        Some(self.render(time))
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_deterministic() {
        let pattern = TestPattern::new(32, 8);
        assert_eq!(pattern.render(1.25), pattern.render(1.25));
        assert_ne!(pattern.render(0.0), pattern.render(1.0));
    }

    #[test]
    fn test_bar_sweeps_across() {
        let pattern = TestPattern::new(32, 8);
        assert_eq!(pattern.render(0.0).pixel(0, 4), Some([255, 255, 255, 255]));
        assert_eq!(pattern.render(2.0).pixel(16, 4), Some([255, 255, 255, 255]));
        assert_ne!(pattern.render(2.0).pixel(0, 4), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let frame = TestPattern::new(0, 0).render(0.0);
        assert_eq!((frame.width, frame.height), (1, 1));
        assert!(frame.is_well_formed());
    }
}
