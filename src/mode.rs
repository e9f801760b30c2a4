//! Automatic chain selection and the rotation timer that drives it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::effect::{Chain, ChainEntry, EffectKind, ParamMap, ParamSpec};
use crate::preset::PresetStore;

/// Shortest and longest generated chain.
pub const FREESTYLE_LENGTH: std::ops::RangeInclusive<usize> = 2..=5;

/// How the chain is chosen when a source starts or the rotation timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// The chain is only changed by explicit edits.
    #[default]
    Manual,
    /// Load a random stored preset.
    PresetRandom,
    /// Generate a random chain.
    Freestyle,
}

/// Random chain of distinct kinds in random order, every parameter drawn
/// uniformly from its range and snapped to its step.
pub fn random_chain<R: Rng>(rng: &mut R) -> Vec<ChainEntry> {
    let len = rng.random_range(FREESTYLE_LENGTH);
    let mut kinds = EffectKind::ALL.to_vec();
    kinds.shuffle(rng);
    kinds
        .into_iter()
        .take(len)
        .map(|kind| ChainEntry {
            kind: kind.id().to_string(),
            params: kind
                .schema()
                .iter()
                .map(|spec| (spec.name.to_string(), random_value(spec, rng)))
                .collect::<ParamMap>(),
        })
        .collect()
}

fn random_value<R: Rng>(spec: &ParamSpec, rng: &mut R) -> f32 {
    let raw = rng.random_range(spec.min..=spec.max);
    let snapped = if spec.is_integer() {
        raw.round()
    } else {
        spec.min + ((raw - spec.min) / spec.step).round() * spec.step
    };
    snapped.clamp(spec.min, spec.max)
}

/// What a mode application did to the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeAction {
    Unchanged,
    LoadedPreset(String),
    Generated(usize),
}

/// Applies the current mode. Modes only ever replace the whole chain.
pub struct ModeController {
    mode: Mode,
    rng: StdRng,
}

impl ModeController {
    pub fn new(mode: Mode) -> Self {
        Self { mode, rng: StdRng::from_os_rng() }
    }

    pub fn with_seed(mode: Mode, seed: u64) -> Self {
        Self { mode, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch mode and apply it straight away.
    pub fn set_mode(&mut self, mode: Mode, chain: &mut Chain, presets: &PresetStore) -> ModeAction {
        if mode != self.mode {
            info!("Mode changed to {:?}", mode);
        }
        self.mode = mode;
        self.apply(chain, presets)
    }

    /// Called when the source rotates.
    pub fn on_rotation(&mut self, chain: &mut Chain, presets: &PresetStore) -> ModeAction {
        self.apply(chain, presets)
    }

    fn apply(&mut self, chain: &mut Chain, presets: &PresetStore) -> ModeAction {
        match self.mode {
            Mode::Manual => ModeAction::Unchanged,
            Mode::PresetRandom => {
                let Some(name) = presets.random_name(&mut self.rng).map(str::to_string) else {
                    debug!("No presets stored; keeping the current chain");
                    return ModeAction::Unchanged;
                };
                match presets.load_into(&name, chain) {
                    Ok(()) => ModeAction::LoadedPreset(name),
                    Err(_) => ModeAction::Unchanged,
                }
            }
            Mode::Freestyle => {
                let entries = random_chain(&mut self.rng);
                chain.replace_chain(&entries);
                info!("Generated a new chain of {} effects", entries.len());
                ModeAction::Generated(entries.len())
            }
        }
    }
}

struct TimerWorker {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

/// Coarse periodic timer on a background thread.
///
/// Ticks carry the generation they were started under. Stopping or
/// restarting bumps the generation, so ticks already in flight from an
/// earlier run are discarded by [`RotationTimer::poll`].
pub struct RotationTimer {
    interval: Duration,
    generation: u64,
    worker: Option<TimerWorker>,
    tick_tx: Sender<u64>,
    tick_rx: Receiver<u64>,
}

impl RotationTimer {
    pub fn new(interval: Duration) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel();
        Self { interval, generation: 0, worker: None, tick_tx, tick_rx }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start ticking, cancelling any timer already running.
    pub fn start(&mut self) {
        self.stop();
        let generation = self.generation;
        let interval = self.interval;
        let tx = self.tick_tx.clone();
        let (cancel, cancelled) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            match cancelled.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if tx.send(generation).is_err() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        self.worker = Some(TimerWorker { cancel, handle });
        info!("Rotation started every {:?}", interval);
    }

    pub fn stop(&mut self) {
        self.generation += 1;
        if let Some(worker) = self.worker.take() {
            let _ = worker.cancel.send(());
            let _ = worker.handle.join();
            info!("Rotation stopped");
        }
    }

    /// Change the interval; a running timer restarts with it.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        if self.is_running() {
            self.start();
        }
    }

    /// Restart the current period without changing the interval.
    pub fn reset(&mut self) {
        if self.is_running() {
            self.start();
        }
    }

    /// Number of current-generation ticks since the last poll.
    pub fn poll(&mut self) -> usize {
        let mut ticks = 0;
        while let Ok(generation) = self.tick_rx.try_recv() {
            if generation == self.generation && self.worker.is_some() {
                ticks += 1;
            }
        }
        ticks
    }
}

impl Drop for RotationTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_chains_respect_schema() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut lengths = HashSet::new();
        for _ in 0..300 {
            let entries = random_chain(&mut rng);
            assert!(FREESTYLE_LENGTH.contains(&entries.len()));
            lengths.insert(entries.len());

            let kinds: HashSet<_> = entries.iter().map(|e| e.kind.as_str()).collect();
            assert_eq!(kinds.len(), entries.len(), "kinds repeat in {entries:?}");

            for entry in &entries {
                let kind = EffectKind::lookup(&entry.kind).unwrap();
                assert_eq!(entry.params.len(), kind.schema().len());
                for spec in kind.schema() {
                    let value = entry.params[spec.name];
                    assert!(spec.contains(value), "{}.{} = {}", kind, spec.name, value);
                    if spec.is_integer() {
                        assert_eq!(value, value.round());
                    }
                }
            }
        }
        assert_eq!(lengths, FREESTYLE_LENGTH.collect());
    }

    #[test]
    fn test_manual_mode_leaves_chain_alone() {
        let mut chain = Chain::new();
        let id = chain.create("blur").unwrap();
        let mut modes = ModeController::with_seed(Mode::Manual, 1);
        assert_eq!(modes.on_rotation(&mut chain, &PresetStore::in_memory()), ModeAction::Unchanged);
        assert_eq!(chain.ids().collect::<Vec<_>>(), vec![id]);
    }

    #[test]
    fn test_freestyle_replaces_chain_on_entry_and_rotation() {
        let mut chain = Chain::new();
        let presets = PresetStore::in_memory();
        let mut modes = ModeController::with_seed(Mode::Manual, 3);

        let ModeAction::Generated(len) = modes.set_mode(Mode::Freestyle, &mut chain, &presets) else {
            panic!("freestyle should generate a chain");
        };
        assert_eq!(chain.len(), len);
        let first: HashSet<_> = chain.ids().collect();

        modes.on_rotation(&mut chain, &presets);
        assert!(chain.ids().all(|id| !first.contains(&id)));
    }

    #[test]
    fn test_preset_random_loads_a_stored_preset() {
        let mut presets = PresetStore::in_memory();
        let mut chain = Chain::new();
        let mut modes = ModeController::with_seed(Mode::PresetRandom, 9);
        assert_eq!(modes.on_rotation(&mut chain, &presets), ModeAction::Unchanged);

        let mut only = Chain::new();
        only.create("solarize").unwrap();
        presets.save("solo", &only).unwrap();

        assert_eq!(modes.on_rotation(&mut chain, &presets), ModeAction::LoadedPreset("solo".to_string()));
        assert_eq!(chain.to_entries(), only.to_entries());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(serde_json::to_string(&Mode::PresetRandom).unwrap(), "\"preset-random\"");
        let mode: Mode = serde_json::from_str("\"freestyle\"").unwrap();
        assert_eq!(mode, Mode::Freestyle);
    }

    #[test]
    fn test_timer_ticks_while_running() {
        let mut timer = RotationTimer::new(Duration::from_millis(10));
        assert_eq!(timer.poll(), 0);
        timer.start();
        thread::sleep(Duration::from_millis(150));
        assert!(timer.poll() >= 1);
        timer.stop();
        assert!(!timer.is_running());
    }

    #[test]
    fn test_stopped_timer_drops_pending_ticks() {
        let mut timer = RotationTimer::new(Duration::from_millis(5));
        timer.start();
        thread::sleep(Duration::from_millis(100));
        timer.stop();
        assert_eq!(timer.poll(), 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(timer.poll(), 0);
    }

    #[test]
    fn test_restart_discards_ticks_from_previous_run() {
        let mut timer = RotationTimer::new(Duration::from_millis(5));
        timer.start();
        thread::sleep(Duration::from_millis(100));
        timer.set_interval(Duration::from_secs(3600));
        assert!(timer.is_running());
        assert_eq!(timer.poll(), 0);
    }
}
