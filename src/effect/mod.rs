//! Effect kinds, their parameters and the ordered chain of instances.

pub mod catalog;
pub mod chain;
pub mod kinds;
pub mod wgsl;

pub use catalog::{EffectKind, ParamSpec};
pub use chain::{Chain, ChainEntry, ChainError, EffectInstance, InstanceId, ParamMap};
pub use kinds::{EffectParams, ShadeContext, Texture};
