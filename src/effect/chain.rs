//! Effect instances and the ordered chain that owns them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::catalog::EffectKind;

/// Parameter name to value.
pub type ParamMap = BTreeMap<String, f32>;

/// Opaque identity of one effect instance. Minted fresh on creation,
/// duplication and preset load; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialized form of an instance: kind plus parameter values, no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl ChainEntry {
    /// Entry for a catalog kind with every parameter at its default.
    pub fn with_defaults(kind: EffectKind) -> Self {
        Self { kind: kind.id().to_string(), params: default_params(kind) }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ChainError {
    #[error("unknown effect kind '{0}'")]
    UnknownKind(String),
    #[error("no effect instance with id {0}")]
    UnknownInstance(InstanceId),
    #[error("effect '{kind}' has no parameter '{name}'")]
    UnknownParameter { kind: &'static str, name: String },
}

/// One member of the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInstance {
    id: InstanceId,
    kind_id: String,
    kind: Option<EffectKind>,
    params: ParamMap,
}

impl EffectInstance {
    /// Instance of a catalog kind with schema defaults.
    pub fn new(kind: EffectKind) -> Self {
        Self {
            id: InstanceId::mint(),
            kind_id: kind.id().to_string(),
            kind: Some(kind),
            params: default_params(kind),
        }
    }

    /// Instance from a serialized entry. Unknown kinds are kept so the chain
    /// still loads; the compositor skips them when rendering.
    pub fn from_entry(entry: &ChainEntry) -> Self {
        Self {
            id: InstanceId::mint(),
            kind_id: entry.kind.clone(),
            kind: EffectKind::lookup(&entry.kind),
            params: entry.params.clone(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn kind_id(&self) -> &str {
        &self.kind_id
    }

    /// Catalog kind, resolved once at construction.
    pub fn kind(&self) -> Option<EffectKind> {
        self.kind
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<f32> {
        self.params.get(name).copied()
    }

    /// Display name from the catalog, falling back to the raw kind id.
    pub fn name(&self) -> &str {
        self.kind.map(|k| k.display_name()).unwrap_or(&self.kind_id)
    }

    pub fn to_entry(&self) -> ChainEntry {
        ChainEntry { kind: self.kind_id.clone(), params: self.params.clone() }
    }

    fn duplicate(&self) -> Self {
        Self {
            id: InstanceId::mint(),
            kind_id: self.kind_id.clone(),
            kind: self.kind,
            params: self.params.clone(),
        }
    }
}

fn default_params(kind: EffectKind) -> ParamMap {
    kind.schema()
        .iter()
        .map(|spec| (spec.name.to_string(), spec.default))
        .collect()
}

/// Ordered effect instances; order is pass order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    instances: Vec<EffectInstance>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from serialized entries, minting fresh identities.
    pub fn from_entries(entries: &[ChainEntry]) -> Self {
        let mut chain = Self::new();
        chain.replace_chain(entries);
        chain
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectInstance> {
        self.instances.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.iter().map(|instance| instance.id)
    }

    pub fn get(&self, id: InstanceId) -> Option<&EffectInstance> {
        self.instances.iter().find(|instance| instance.id == id)
    }

    pub fn position(&self, id: InstanceId) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id == id)
    }

    fn index_of(&self, id: InstanceId) -> Result<usize, ChainError> {
        self.position(id).ok_or(ChainError::UnknownInstance(id))
    }

    /// Append a new instance of `kind_id` with default parameters.
    pub fn create(&mut self, kind_id: &str) -> Result<InstanceId, ChainError> {
        let kind =
            EffectKind::lookup(kind_id).ok_or_else(|| ChainError::UnknownKind(kind_id.to_string()))?;
        let instance = EffectInstance::new(kind);
        let id = instance.id;
        self.instances.push(instance);
        Ok(id)
    }

    /// Copy an instance under a new identity, directly after the original.
    pub fn duplicate(&mut self, id: InstanceId) -> Result<InstanceId, ChainError> {
        let index = self.index_of(id)?;
        let copy = self.instances[index].duplicate();
        let new_id = copy.id;
        self.instances.insert(index + 1, copy);
        Ok(new_id)
    }

    pub fn remove(&mut self, id: InstanceId) -> Result<EffectInstance, ChainError> {
        let index = self.index_of(id)?;
        Ok(self.instances.remove(index))
    }

    /// Move an instance by `delta` places. Moves past either end clamp, so
    /// moving the first instance up or the last one down does nothing.
    pub fn move_instance(&mut self, id: InstanceId, delta: isize) -> Result<(), ChainError> {
        let index = self.index_of(id)?;
        let last = self.instances.len() as isize - 1;
        let target = (index as isize + delta).clamp(0, last) as usize;
        if target != index {
            let instance = self.instances.remove(index);
            self.instances.insert(target, instance);
        }
        Ok(())
    }

    /// Set one parameter. Values are stored as given, without range clamping.
    pub fn set_parameter(&mut self, id: InstanceId, name: &str, value: f32) -> Result<(), ChainError> {
        let index = self.index_of(id)?;
        let instance = &mut self.instances[index];
        if let Some(kind) = instance.kind {
            if kind.param(name).is_none() {
                return Err(ChainError::UnknownParameter { kind: kind.id(), name: name.to_string() });
            }
        }
        instance.params.insert(name.to_string(), value);
        Ok(())
    }

    /// Replace every instance (preset load). Every identity is minted fresh,
    /// so no cached program from the previous chain can be picked up again.
    pub fn replace_chain(&mut self, entries: &[ChainEntry]) {
        self.instances = entries.iter().map(EffectInstance::from_entry).collect();
    }

    /// Serialized form of the chain, in order.
    pub fn to_entries(&self) -> Vec<ChainEntry> {
        self.instances.iter().map(EffectInstance::to_entry).collect()
    }
}
