//! Compiled programs keyed by effect instance identity.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use super::{RenderBackend, RenderError};
use crate::effect::{Chain, EffectInstance, EffectKind, EffectParams, InstanceId};

/// A kind's program together with the uniform values last bound for its instance.
#[derive(Debug)]
pub struct CompiledProgram<P> {
    kind: EffectKind,
    program: P,
    params: EffectParams,
}

impl<P> CompiledProgram<P> {
    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn program(&self) -> &P {
        &self.program
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }
}

/// One entry per live instance. Two instances of the same kind get two
/// entries, so duplicates never share uniform state.
///
/// The cache does not watch the chain. A removed or replaced instance keeps
/// its program until the next frame's [`ProgramCache::retain_live`], which
/// the compositor runs before any pass. Chain edits only happen between
/// frames, so a stale entry is never bound.
#[derive(Debug)]
pub struct ProgramCache<P> {
    entries: HashMap<InstanceId, CompiledProgram<P>>,
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Program for `instance`, compiling it on first use. Every call rebinds
    /// the uniform values from the instance's current parameters.
    pub fn get_or_create<B>(
        &mut self,
        backend: &mut B,
        instance: &EffectInstance,
        kind: EffectKind,
    ) -> Result<&CompiledProgram<P>, RenderError>
    where
        B: RenderBackend<Program = P>,
    {
        let params = EffectParams::resolve(kind, instance.params());
        match self.entries.entry(instance.id()) {
            Entry::Occupied(slot) => {
                let compiled = slot.into_mut();
                compiled.params = params;
                Ok(compiled)
            }
            Entry::Vacant(slot) => {
                let program = backend.compile_program(kind)?;
                tracing::debug!("Compiled {} program for instance {}", kind, instance.id());
                Ok(slot.insert(CompiledProgram { kind, program, params }))
            }
        }
    }

    /// Drop entries whose instance is no longer in `chain`. Returns how many
    /// were released.
    pub fn retain_live(&mut self, chain: &Chain) -> usize {
        let live: HashSet<InstanceId> = chain.ids().collect();
        let before = self.entries.len();
        self.entries.retain(|id, _| live.contains(id));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::CpuBackend;

    #[test]
    fn test_compiles_once_per_instance() {
        let mut backend = CpuBackend::new();
        let mut cache = ProgramCache::new();
        let mut chain = Chain::new();
        let id = chain.create("blur").unwrap();

        for _ in 0..3 {
            let instance = chain.get(id).unwrap();
            cache.get_or_create(&mut backend, instance, EffectKind::Blur).unwrap();
        }
        assert_eq!(backend.programs_compiled(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_refreshes_params_without_recompiling() {
        let mut backend = CpuBackend::new();
        let mut cache = ProgramCache::new();
        let mut chain = Chain::new();
        let id = chain.create("posterize").unwrap();

        let first = *cache
            .get_or_create(&mut backend, chain.get(id).unwrap(), EffectKind::Posterize)
            .unwrap()
            .params();
        assert_eq!(first.pack()[0], 6.0);

        chain.set_parameter(id, "levels", 3.0).unwrap();
        let second = cache
            .get_or_create(&mut backend, chain.get(id).unwrap(), EffectKind::Posterize)
            .unwrap();
        assert_eq!(second.params().pack()[0], 3.0);
        assert_eq!(backend.programs_compiled(), 1);
    }

    #[test]
    fn test_duplicates_get_their_own_entry() {
        let mut backend = CpuBackend::new();
        let mut cache = ProgramCache::new();
        let mut chain = Chain::new();
        let a = chain.create("trail").unwrap();
        let b = chain.duplicate(a).unwrap();
        chain.set_parameter(b, "mix", 0.9).unwrap();

        for instance in chain.iter() {
            cache.get_or_create(&mut backend, instance, EffectKind::Trail).unwrap();
        }
        assert_eq!(backend.programs_compiled(), 2);

        let pa = cache.get_or_create(&mut backend, chain.get(a).unwrap(), EffectKind::Trail).unwrap();
        assert_eq!(pa.params().pack()[0], 0.55);
    }

    #[test]
    fn test_retain_live_evicts_removed_instances() {
        let mut backend = CpuBackend::new();
        let mut cache = ProgramCache::new();
        let mut chain = Chain::new();
        let a = chain.create("blur").unwrap();
        let b = chain.create("sharpen").unwrap();
        for instance in chain.iter() {
            let kind = instance.kind().unwrap();
            cache.get_or_create(&mut backend, instance, kind).unwrap();
        }

        chain.remove(a).unwrap();
        assert_eq!(cache.retain_live(&chain), 1);
        assert!(!cache.contains(a));
        assert!(cache.contains(b));

        let entries = chain.to_entries();
        chain.replace_chain(&entries);
        assert_eq!(cache.retain_live(&chain), 1);
        assert!(cache.is_empty());
    }
}
