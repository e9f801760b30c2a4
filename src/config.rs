//! YAML configuration file and live reloading.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::capture::SourceSpec;
use crate::effect::{ChainEntry, EffectKind};
use crate::mode::Mode;

/// Which render backend drives the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { enabled: false, interval_secs: 30 }
    }
}

/// Everything the app reads from its config file. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub backend: BackendKind,
    pub mode: Mode,
    pub rotation: RotationConfig,
    pub presets_path: Option<PathBuf>,
    pub sources: Vec<SourceSpec>,
    pub chain: Vec<ChainEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            backend: BackendKind::default(),
            mode: Mode::default(),
            rotation: RotationConfig::default(),
            presets_path: None,
            sources: vec![SourceSpec::Pattern],
            chain: starter_chain(),
        }
    }
}

/// Chain shown on first start.
pub fn starter_chain() -> Vec<ChainEntry> {
    [
        EffectKind::RgbShift,
        EffectKind::DigitalNoise,
        EffectKind::Pixelate,
        EffectKind::ColorShift,
        EffectKind::TimeEcho,
    ]
    .into_iter()
    .map(ChainEntry::with_defaults)
    .collect()
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }
}

/// Command-line values that take precedence over the config file, on
/// startup and on every reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub sources: Option<Vec<SourceSpec>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub backend: Option<BackendKind>,
    pub mode: Option<Mode>,
    pub presets_path: Option<PathBuf>,
    pub chain: Option<Vec<ChainEntry>>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(sources) = &self.sources {
            config.sources = sources.clone();
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps.max(1);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(path) = &self.presets_path {
            config.presets_path = Some(path.clone());
        }
        if let Some(chain) = &self.chain {
            config.chain = chain.clone();
        }
    }
}

/// Manages configuration file watching and reloading.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current_config: Option<AppConfig>,
}

impl ConfigWatcher {
    /// Create a new config watcher if a path is provided.
    pub fn new(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        let (tx, rx) = channel();

        let mut watcher = match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                return None;
            }
        };
        if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            warn!("Failed to watch config file {:?}: {}", path, e);
            return None;
        }
        info!("Watching config file {:?} for changes", path);

        let current_config = AppConfig::load(&path).ok();
        Some(Self {
            path,
            _watcher: watcher,
            rx,
            current_config,
        })
    }

    /// Check for changes and return (old_config, new_config) if changed.
    /// A file that no longer parses is reported and otherwise ignored.
    pub fn check_for_changes(&mut self) -> Option<(Option<AppConfig>, AppConfig)> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                    needs_reload = true;
                }
            }
        }
        if !needs_reload {
            return None;
        }

        info!("Config file changed, checking for updates...");
        match AppConfig::load(&self.path) {
            Ok(new_config) => {
                if self.current_config.as_ref() == Some(&new_config) {
                    return None;
                }
                let old = self.current_config.replace(new_config.clone());
                Some((old, new_config))
            }
            Err(e) => {
                error!("{:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.chain.len(), 5);
        assert_eq!(config.chain[0].kind, "rgbShift");
        assert_eq!(config.sources, vec![SourceSpec::Pattern]);
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_yaml(
            r#"
width: 640
height: 480
backend: cpu
mode: preset-random
rotation:
  enabled: true
presets_path: /tmp/presets.json
sources:
  - type: camera
    device: 1
chain:
  - type: trail
    params:
      mix: 0.9
  - type: posterize
"#,
        )
        .unwrap();
        assert_eq!((config.width, config.height, config.fps), (640, 480, 30));
        assert_eq!(config.backend, BackendKind::Cpu);
        assert_eq!(config.mode, Mode::PresetRandom);
        assert_eq!(config.rotation, RotationConfig { enabled: true, interval_secs: 30 });
        assert_eq!(config.sources, vec![SourceSpec::Camera { device: 1 }]);
        assert_eq!(config.chain[0].params["mix"], 0.9);
        assert!(config.chain[1].params.is_empty());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(AppConfig::from_yaml("mode: sideways").is_err());
        assert!(AppConfig::load(Path::new("/definitely/not/here.yaml")).is_err());
    }

    #[test]
    fn test_overrides_replace_only_what_they_set() {
        let overrides = ConfigOverrides {
            width: Some(320),
            fps: Some(0),
            sources: Some(vec![SourceSpec::Camera { device: 2 }]),
            ..ConfigOverrides::default()
        };
        let mut config = AppConfig::from_yaml("width: 640\nheight: 480\nbackend: cpu\n").unwrap();
        overrides.apply(&mut config);
        assert_eq!((config.width, config.height, config.fps), (320, 480, 1));
        assert_eq!(config.backend, BackendKind::Cpu);
        assert_eq!(config.sources, vec![SourceSpec::Camera { device: 2 }]);
        assert_eq!(config.chain, starter_chain());

        let mut untouched = AppConfig::default();
        ConfigOverrides::default().apply(&mut untouched);
        assert_eq!(untouched, AppConfig::default());
    }

    #[test]
    fn test_watcher_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afterimage.yaml");
        fs::write(&path, "fps: 30\n").unwrap();

        let mut watcher = ConfigWatcher::new(Some(path.clone())).unwrap();
        assert!(watcher.check_for_changes().is_none());

        fs::write(&path, "fps: 60\n").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let change = loop {
            if let Some(change) = watcher.check_for_changes() {
                break change;
            }
            assert!(Instant::now() < deadline, "no change reported");
            thread::sleep(Duration::from_millis(20));
        };
        assert_eq!(change.0.map(|c| c.fps), Some(30));
        assert_eq!(change.1.fps, 60);
    }

    #[test]
    fn test_watcher_needs_a_path() {
        assert!(ConfigWatcher::new(None).is_none());
    }
}
