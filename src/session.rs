//! The running app's state between frames: chain, presets, modes, sources.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::capture::{CaptureConfig, SourceRotation};
use crate::config::{AppConfig, BackendKind, ConfigOverrides, ConfigWatcher};
use crate::effect::Chain;
use crate::frame::VideoFrame;
use crate::mode::{ModeController, RotationTimer};
use crate::preset::PresetStore;
use crate::shader::{Compositor, CpuBackend, RenderBackend, RenderError, WgpuBackend};

/// A status line is logged every this many rendered frames.
pub const STATUS_EVERY: u64 = 120;

/// Compositor over whichever backend was selected at startup.
pub enum AppCompositor {
    Gpu(Compositor<WgpuBackend>),
    Cpu(Compositor<CpuBackend>),
}

impl AppCompositor {
    /// Compositor on its own device. Window mode shares the window's device
    /// through [`AppCompositor::Gpu`] instead.
    pub fn headless(kind: BackendKind, width: u32, height: u32) -> Result<Self> {
        Ok(match kind {
            BackendKind::Gpu => Self::Gpu(Compositor::new(WgpuBackend::headless()?, width, height)),
            BackendKind::Cpu => Self::Cpu(Compositor::new(CpuBackend::new(), width, height)),
        })
    }

    pub fn render_frame(&mut self, chain: &Chain, source: &VideoFrame, elapsed: f32) -> Result<VideoFrame, RenderError> {
        match self {
            Self::Gpu(c) => c.render_frame(chain, source, elapsed),
            Self::Cpu(c) => c.render_frame(chain, source, elapsed),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        match self {
            Self::Gpu(c) => c.resize(width, height),
            Self::Cpu(c) => c.resize(width, height),
        }
    }

    pub fn fps(&self) -> f32 {
        match self {
            Self::Gpu(c) => c.fps(),
            Self::Cpu(c) => c.fps(),
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        match self {
            Self::Gpu(c) => c.frames_rendered(),
            Self::Cpu(c) => c.frames_rendered(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Gpu(c) => c.backend().name(),
            Self::Cpu(c) => c.backend().name(),
        }
    }
}

/// Everything mutated between frames. Chain edits from modes, rotation and
/// config reloads all land in [`Session::between_frames`], never mid-render.
pub struct Session {
    config: AppConfig,
    overrides: ConfigOverrides,
    chain: Chain,
    presets: PresetStore,
    modes: ModeController,
    timer: RotationTimer,
    sources: SourceRotation,
    watcher: Option<ConfigWatcher>,
    pending_viewport: Option<(u32, u32)>,
    started: Instant,
}

fn capture_config(config: &AppConfig) -> CaptureConfig {
    CaptureConfig {
        device_index: 0,
        width: config.width,
        height: config.height,
        fps: config.fps,
    }
}

fn open_presets(path: Option<&PathBuf>) -> PresetStore {
    let Some(path) = path else {
        return PresetStore::in_memory();
    };
    match PresetStore::open(path) {
        Ok(store) => store,
        Err(e) => {
            warn!("Could not open preset store {:?}: {}. Presets will not be saved.", path, e);
            PresetStore::in_memory()
        }
    }
}

impl Session {
    /// Build the session and apply the starting mode. `config_path` is
    /// watched for changes when given; `overrides` win over the file both
    /// now and on every reload.
    pub fn new(mut config: AppConfig, config_path: Option<PathBuf>, overrides: ConfigOverrides) -> Self {
        overrides.apply(&mut config);
        let mut chain = Chain::from_entries(&config.chain);
        let presets = open_presets(config.presets_path.as_ref());
        let mut modes = ModeController::new(config.mode);
        modes.set_mode(config.mode, &mut chain, &presets);

        let mut timer = RotationTimer::new(Duration::from_secs(config.rotation.interval_secs.max(1)));
        if config.rotation.enabled {
            timer.start();
        }
        let sources = SourceRotation::new(config.sources.clone(), capture_config(&config));

        Self {
            watcher: ConfigWatcher::new(config_path),
            config,
            overrides,
            chain,
            presets,
            modes,
            timer,
            sources,
            pending_viewport: None,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn presets_mut(&mut self) -> &mut PresetStore {
        &mut self.presets
    }

    pub fn rotation_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Seconds since the session started.
    pub fn elapsed(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    /// Move to the next source and apply the mode, as a timer tick does.
    pub fn rotate(&mut self) {
        self.sources.advance();
        self.modes.on_rotation(&mut self.chain, &self.presets);
    }

    /// Apply config reloads, rotation ticks and finished clips.
    pub fn between_frames(&mut self) {
        if let Some((_, new)) = self.watcher.as_mut().and_then(ConfigWatcher::check_for_changes) {
            self.reload(new);
        }
        if self.timer.poll() > 0 {
            self.rotate();
        }
        if self.sources.poll_finished() {
            self.modes.on_rotation(&mut self.chain, &self.presets);
            self.timer.reset();
        }
    }

    /// Take a freshly loaded config file, keeping command-line overrides.
    pub fn reload(&mut self, mut new: AppConfig) {
        self.overrides.apply(&mut new);
        let current = self.config.clone();
        self.apply_config(Some(&current), new);
    }

    /// Re-apply the parts of `new` that differ from `old`.
    pub fn apply_config(&mut self, old: Option<&AppConfig>, new: AppConfig) {
        let changed = |same: fn(&AppConfig, &AppConfig) -> bool| old.is_none_or(|o| !same(o, &new));

        if changed(|a, b| a.chain == b.chain) {
            info!("Config chain changed; replacing {} effect(s) with {}", self.chain.len(), new.chain.len());
            self.chain.replace_chain(&new.chain);
        }
        if changed(|a, b| a.mode == b.mode) {
            self.modes.set_mode(new.mode, &mut self.chain, &self.presets);
        }
        if changed(|a, b| a.rotation == b.rotation) {
            self.timer.set_interval(Duration::from_secs(new.rotation.interval_secs.max(1)));
            match (new.rotation.enabled, self.timer.is_running()) {
                (true, false) => self.timer.start(),
                (false, true) => self.timer.stop(),
                _ => {}
            }
        }
        if changed(|a, b| a.sources == b.sources) {
            self.sources = SourceRotation::new(new.sources.clone(), capture_config(&new));
        }
        if changed(|a, b| (a.width, a.height) == (b.width, b.height)) {
            self.pending_viewport = Some((new.width, new.height));
        }
        if changed(|a, b| a.presets_path == b.presets_path) {
            self.presets = open_presets(new.presets_path.as_ref());
        }
        if old.is_some_and(|o| o.backend != new.backend) {
            warn!("Backend changes take effect on restart");
        }
        self.config = new;
    }

    /// Viewport requested by a config reload, if any. Window sessions ignore
    /// it; the window size drives their viewport.
    pub fn take_viewport_request(&mut self) -> Option<(u32, u32)> {
        self.pending_viewport.take()
    }

    /// Produce the next composite. `None` when the source has no frame yet
    /// or the frame failed; the caller keeps presenting its last frame.
    pub fn step(&mut self, compositor: &mut AppCompositor) -> Option<VideoFrame> {
        self.between_frames();
        let time = self.elapsed();
        let source = self.sources.next_frame(time)?;

        match compositor.render_frame(&self.chain, &source, time) {
            Ok(composite) => {
                if compositor.frames_rendered() % STATUS_EVERY == 0 {
                    info!(
                        "{:.1} fps | {} effect(s) | {} | {}",
                        compositor.fps(),
                        self.chain.len(),
                        self.sources.describe(),
                        compositor.backend_name()
                    );
                }
                Some(composite)
            }
            Err(e) => {
                error!("Frame skipped: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameSource, SourceSpec, TestPattern};
    use crate::config::RotationConfig;
    use crate::effect::ChainEntry;
    use crate::mode::Mode;

    fn small_config() -> AppConfig {
        AppConfig {
            width: 16,
            height: 8,
            backend: BackendKind::Cpu,
            sources: vec![SourceSpec::Pattern],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_step_renders_at_viewport_size() {
        let mut session = Session::new(small_config(), None, ConfigOverrides::default());
        let mut compositor = AppCompositor::headless(BackendKind::Cpu, 16, 8).unwrap();
        let frame = session.step(&mut compositor).unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(compositor.frames_rendered(), 1);
        assert_eq!(session.chain().len(), 5);
    }

    #[test]
    fn test_config_reload_applies_only_changes() {
        let config = small_config();
        let mut session = Session::new(config.clone(), None, ConfigOverrides::default());
        let ids: Vec<_> = session.chain().ids().collect();

        let mut same_chain = config.clone();
        same_chain.rotation = RotationConfig { enabled: true, interval_secs: 60 };
        session.apply_config(Some(&config), same_chain.clone());
        assert_eq!(session.chain().ids().collect::<Vec<_>>(), ids);
        assert!(session.rotation_running());
        assert_eq!(session.take_viewport_request(), None);

        let mut edited = same_chain.clone();
        edited.chain = vec![ChainEntry::with_defaults(crate::effect::EffectKind::Trail)];
        edited.rotation.enabled = false;
        edited.width = 32;
        session.apply_config(Some(&same_chain), edited);
        assert_eq!(session.chain().len(), 1);
        assert!(!session.rotation_running());
        assert_eq!(session.take_viewport_request(), Some((32, 8)));
        assert_eq!(session.take_viewport_request(), None);
    }

    #[test]
    fn test_rotation_applies_freestyle() {
        let config = AppConfig { mode: Mode::Freestyle, ..small_config() };
        let mut session = Session::new(config, None, ConfigOverrides::default());
        let before: Vec<_> = session.chain().ids().collect();
        assert!((2..=5).contains(&before.len()));

        session.rotate();
        assert!(session.chain().ids().all(|id| !before.contains(&id)));
    }

    #[test]
    fn test_manual_rotation_keeps_chain() {
        let mut session = Session::new(small_config(), None, ConfigOverrides::default());
        let before: Vec<_> = session.chain().ids().collect();
        session.rotate();
        assert_eq!(session.chain().ids().collect::<Vec<_>>(), before);
    }

    /// Clip that plays a single frame and then reports the end.
    struct ShortClip {
        played: bool,
    }

    impl FrameSource for ShortClip {
        fn next_frame(&mut self, _time: f32) -> Option<VideoFrame> {
            self.played = true;
            Some(VideoFrame::solid(16, 8, [40, 80, 120, 255]))
        }

        fn describe(&self) -> String {
            "short clip".to_string()
        }

        fn is_finished(&self) -> bool {
            self.played
        }
    }

    #[test]
    fn test_finished_clip_rotates_with_mode() {
        let config = AppConfig {
            mode: Mode::Freestyle,
            rotation: RotationConfig { enabled: true, interval_secs: 3600 },
            ..small_config()
        };
        let mut session = Session::new(config, None, ConfigOverrides::default());
        let specs = vec![SourceSpec::Clip { path: "short.mp4".into(), looping: false }, SourceSpec::Pattern];
        session.sources = SourceRotation::with_opener(
            specs,
            (16, 8),
            Box::new(|spec| match spec {
                SourceSpec::Clip { .. } => Ok(Box::new(ShortClip { played: false }) as Box<dyn FrameSource>),
                _ => Ok(Box::new(TestPattern::new(16, 8)) as Box<dyn FrameSource>),
            }),
        );
        let mut compositor = AppCompositor::headless(BackendKind::Cpu, 16, 8).unwrap();

        let before: Vec<_> = session.chain().ids().collect();
        assert!(session.step(&mut compositor).is_some());
        assert_eq!(session.sources.index(), 0);
        assert_eq!(session.chain().ids().collect::<Vec<_>>(), before);

        assert!(session.step(&mut compositor).is_some());
        assert_eq!(session.sources.index(), 1);
        assert!(session.chain().ids().all(|id| !before.contains(&id)));
        assert!(session.rotation_running());
    }

    #[test]
    fn test_reload_keeps_command_line_overrides() {
        let overrides = ConfigOverrides {
            width: Some(64),
            sources: Some(vec![SourceSpec::Pattern]),
            ..ConfigOverrides::default()
        };
        let file = AppConfig { width: 16, sources: vec![SourceSpec::Camera { device: 1 }], ..small_config() };
        let mut session = Session::new(file.clone(), None, overrides);
        assert_eq!(session.config().width, 64);
        let ids: Vec<_> = session.chain().ids().collect();

        let edited = AppConfig { fps: 60, ..file };
        session.reload(edited);
        assert_eq!(session.config().fps, 60);
        assert_eq!(session.config().width, 64);
        assert_eq!(session.config().sources, vec![SourceSpec::Pattern]);
        assert_eq!(session.sources.current_spec(), &SourceSpec::Pattern);
        assert_eq!(session.take_viewport_request(), None);
        assert_eq!(session.chain().ids().collect::<Vec<_>>(), ids);
    }
}
