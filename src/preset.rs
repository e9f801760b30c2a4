//! Named chain presets persisted as a JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::effect::{Chain, ChainEntry};

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset name must not be empty")]
    EmptyName,
    #[error("preset name '{0}' must not contain path separators or '..'")]
    InvalidName(String),
    #[error("no preset named '{0}'")]
    NotFound(String),
    #[error("invalid preset payload: {0}")]
    Malformed(String),
    #[error("preset store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preset store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Exchange format for a single preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetExport {
    pub name: String,
    pub chain: Vec<ChainEntry>,
}

/// Trimmed preset name. Names become file names on export, so anything
/// that could leave the export directory is rejected.
fn checked_name(name: &str) -> Result<&str, PresetError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PresetError::EmptyName);
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(PresetError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Preset name to serialized chain. When backed by a file, every change is
/// written through; a failed write leaves the in-memory store as it was.
#[derive(Debug, Default)]
pub struct PresetStore {
    presets: BTreeMap<String, Vec<ChainEntry>>,
    path: Option<PathBuf>,
}

impl PresetStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PresetError> {
        let path = path.into();
        let presets = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        info!("Loaded {} preset(s) from {:?}", presets.len(), path);
        Ok(Self { presets, path: Some(path) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&[ChainEntry]> {
        self.presets.get(name).map(Vec::as_slice)
    }

    /// Store the current chain under `name`, replacing any preset of that name.
    pub fn save(&mut self, name: &str, chain: &Chain) -> Result<(), PresetError> {
        let name = checked_name(name)?;
        self.commit(name, Some(chain.to_entries()))?;
        info!("Saved preset \"{}\" ({} effects)", name, chain.len());
        Ok(())
    }

    /// Replace `chain` with the preset. Every instance gets a fresh identity.
    pub fn load_into(&self, name: &str, chain: &mut Chain) -> Result<(), PresetError> {
        let entries = self.presets.get(name).ok_or_else(|| PresetError::NotFound(name.to_string()))?;
        chain.replace_chain(entries);
        info!("Loaded preset \"{}\"", name);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<Vec<ChainEntry>, PresetError> {
        if !self.presets.contains_key(name) {
            return Err(PresetError::NotFound(name.to_string()));
        }
        let removed = self.commit(name, None)?.unwrap_or_default();
        info!("Deleted preset \"{}\"", name);
        Ok(removed)
    }

    /// Pretty JSON `{ "name": .., "chain": [..] }` for one preset.
    pub fn export(&self, name: &str) -> Result<String, PresetError> {
        let chain = self.presets.get(name).ok_or_else(|| PresetError::NotFound(name.to_string()))?;
        let payload = PresetExport { name: name.to_string(), chain: chain.clone() };
        Ok(serde_json::to_string_pretty(&payload)?)
    }

    /// Write the export of `name` to `<dir>/<name>.json`.
    pub fn export_to_dir(&self, name: &str, dir: &Path) -> Result<PathBuf, PresetError> {
        let payload = self.export(name)?;
        checked_name(name)?;
        let target = dir.join(format!("{name}.json"));
        fs::write(&target, payload)?;
        Ok(target)
    }

    /// Add the preset in an exported payload. Malformed payloads are rejected
    /// and leave the store untouched. Returns the imported name.
    pub fn import(&mut self, payload: &str) -> Result<String, PresetError> {
        let parsed: PresetExport =
            serde_json::from_str(payload).map_err(|e| PresetError::Malformed(e.to_string()))?;
        let name = match checked_name(&parsed.name) {
            Ok(name) => name.to_string(),
            Err(PresetError::EmptyName) => return Err(PresetError::Malformed("missing preset name".to_string())),
            Err(e) => return Err(PresetError::Malformed(e.to_string())),
        };
        self.commit(&name, Some(parsed.chain))?;
        info!("Imported preset \"{}\"", name);
        Ok(name)
    }

    pub fn import_file(&mut self, path: &Path) -> Result<String, PresetError> {
        let payload = fs::read_to_string(path)?;
        self.import(&payload)
    }

    /// Uniformly random preset name, if any exist.
    pub fn random_name<R: Rng>(&self, rng: &mut R) -> Option<&str> {
        self.names().choose(rng)
    }

    /// Apply one change and persist it, undoing the change if the write fails.
    /// Returns the previous value under `name`.
    fn commit(&mut self, name: &str, value: Option<Vec<ChainEntry>>) -> Result<Option<Vec<ChainEntry>>, PresetError> {
        let previous = match value {
            Some(entries) => self.presets.insert(name.to_string(), entries),
            None => self.presets.remove(name),
        };
        if let Err(e) = self.persist() {
            match previous {
                Some(old) => self.presets.insert(name.to_string(), old),
                None => self.presets.remove(name),
            };
            return Err(e);
        }
        Ok(previous)
    }

    fn persist(&self) -> Result<(), PresetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.presets)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn sample_chain() -> Chain {
        let mut chain = Chain::new();
        let a = chain.create("rgbShift").unwrap();
        chain.set_parameter(a, "offset", 0.01).unwrap();
        chain.create("trail").unwrap();
        chain
    }

    #[test]
    fn test_save_and_load_remints_identities() {
        let mut store = PresetStore::in_memory();
        let chain = sample_chain();
        store.save("  glitch  ", &chain).unwrap();
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["glitch"]);

        let mut loaded = Chain::new();
        store.load_into("glitch", &mut loaded).unwrap();
        assert_eq!(loaded.to_entries(), chain.to_entries());
        let before: HashSet<_> = chain.ids().collect();
        assert!(loaded.ids().all(|id| !before.contains(&id)));
    }

    #[test]
    fn test_save_rejects_empty_name() {
        let mut store = PresetStore::in_memory();
        assert!(matches!(store.save("   ", &sample_chain()), Err(PresetError::EmptyName)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_and_delete_missing_preset() {
        let mut store = PresetStore::in_memory();
        let mut chain = sample_chain();
        assert!(matches!(store.load_into("nope", &mut chain), Err(PresetError::NotFound(_))));
        assert_eq!(chain.len(), 2);
        assert!(matches!(store.delete("nope"), Err(PresetError::NotFound(_))));
    }

    #[test]
    fn test_presets_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("presets.json");

        let mut store = PresetStore::open(&path).unwrap();
        assert!(store.is_empty());
        store.save("a", &sample_chain()).unwrap();
        store.save("b", &Chain::new()).unwrap();
        store.delete("b").unwrap();

        let reopened = PresetStore::open(&path).unwrap();
        assert_eq!(reopened.names().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(reopened.get("a").unwrap(), sample_chain().to_entries().as_slice());
    }

    #[test]
    fn test_export_import_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PresetStore::in_memory();
        source.save("warm", &sample_chain()).unwrap();
        let file = source.export_to_dir("warm", dir.path()).unwrap();
        assert_eq!(file.file_name().unwrap(), "warm.json");

        let exported: serde_json::Value = serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(exported["name"], "warm");
        assert_eq!(exported["chain"][0]["type"], "rgbShift");
        assert_eq!(exported["chain"][1]["params"]["mix"].as_f64(), Some(0.55));

        let mut target = PresetStore::in_memory();
        assert_eq!(target.import_file(&file).unwrap(), "warm");
        assert_eq!(target.get("warm"), source.get("warm"));
    }

    #[test]
    fn test_malformed_import_leaves_store_unchanged() {
        let mut store = PresetStore::in_memory();
        store.save("keep", &sample_chain()).unwrap();

        for payload in [
            "not json",
            r#"{"chain": []}"#,
            r#"{"name": "x"}"#,
            r#"{"name": "", "chain": []}"#,
            r#"{"name": "x", "chain": [{"params": {}}]}"#,
            r#"{"name": "x", "chain": [{"type": "blur", "params": {"amount": "lots"}}]}"#,
        ] {
            assert!(matches!(store.import(payload), Err(PresetError::Malformed(_))), "{payload}");
        }
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["keep"]);
    }

    #[test]
    fn test_names_cannot_escape_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PresetStore::in_memory();

        for payload in [
            r#"{"name": "../evil", "chain": []}"#,
            r#"{"name": "a/b", "chain": []}"#,
            r#"{"name": "c:\\d", "chain": []}"#,
        ] {
            assert!(matches!(store.import(payload), Err(PresetError::Malformed(_))), "{payload}");
        }
        for name in ["../evil", "nested/name", ".."] {
            assert!(matches!(store.save(name, &sample_chain()), Err(PresetError::InvalidName(_))), "{name}");
        }
        assert!(store.is_empty());

        store.save("fine.name", &sample_chain()).unwrap();
        let file = store.export_to_dir("fine.name", dir.path()).unwrap();
        assert_eq!(file.parent(), Some(dir.path()));
    }

    #[test]
    fn test_import_accepts_unknown_kinds() {
        let mut store = PresetStore::in_memory();
        let name = store
            .import(r#"{"name": "future", "chain": [{"type": "vhsWobble", "params": {"speed": 2}}, {"type": "blur"}]}"#)
            .unwrap();
        let mut chain = Chain::new();
        store.load_into(&name, &mut chain).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.iter().nth(1).unwrap().kind(), Some(EffectKind::Blur));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let mut store = PresetStore::open(blocker.join("presets.json")).unwrap();

        assert!(matches!(store.save("a", &sample_chain()), Err(PresetError::Io(_))));
        assert!(store.is_empty());
        assert!(store.import(r#"{"name": "b", "chain": []}"#).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_random_name_covers_all_presets() {
        let mut store = PresetStore::in_memory();
        assert_eq!(store.random_name(&mut StdRng::seed_from_u64(1)), None);
        for name in ["a", "b", "c"] {
            store.save(name, &Chain::new()).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(7);
        let seen: HashSet<_> = (0..200).filter_map(|_| store.random_name(&mut rng)).collect();
        assert_eq!(seen.len(), 3);
    }
}
