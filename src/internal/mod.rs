//! Internal implementation details.

pub(crate) mod resolution;
pub(crate) mod slot;

pub(crate) use resolution::{ResolutionPath, SettlementSignal};
pub(crate) use slot::InstanceSlot;
