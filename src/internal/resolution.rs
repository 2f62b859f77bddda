//! Cycle detection state for one resolution tree.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::token::InjectionToken;

const MAX_DEPTH: usize = 1024;

#[derive(Clone)]
struct Frame {
    module_id: Arc<str>,
    token: InjectionToken,
    name: String,
}

/// The chain of (module, token) pairs currently under construction.
///
/// Each async resolution step extends its own copy, so sibling branches
/// resolving concurrently never see each other's frames.
#[derive(Clone, Default)]
pub(crate) struct ResolutionPath {
    frames: Arc<Vec<Frame>>,
}

impl ResolutionPath {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, module_id: &str, token: &InjectionToken) -> bool {
        self.frames
            .iter()
            .any(|frame| &*frame.module_id == module_id && &frame.token == token)
    }

    pub(crate) fn exceeds_max_depth(&self) -> bool {
        self.frames.len() >= MAX_DEPTH
    }

    pub(crate) fn push(&self, module_id: Arc<str>, token: InjectionToken, name: String) -> Self {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.extend(self.frames.iter().cloned());
        frames.push(Frame { module_id, token, name });
        Self {
            frames: Arc::new(frames),
        }
    }

    /// Path rendered for a cycle closing on `name`.
    pub(crate) fn cycle(&self, name: &str) -> Vec<String> {
        let mut path: Vec<String> = self.frames.iter().map(|f| f.name.clone()).collect();
        path.push(name.to_string());
        path
    }
}

/// Records which wrappers a pending construction is waiting on.
///
/// A caller that finds an entry pending checks whether that construction is
/// itself waiting on the caller; if so, awaiting would deadlock.
#[derive(Default)]
pub(crate) struct SettlementSignal {
    refs: Mutex<HashSet<u64>>,
}

impl SettlementSignal {
    pub(crate) fn insert_ref(&self, wrapper_id: u64) {
        self.refs.lock().insert(wrapper_id);
    }

    pub(crate) fn is_cycle(&self, wrapper_id: u64) -> bool {
        self.refs.lock().contains(&wrapper_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::token_of;

    struct A;
    struct B;

    #[test]
    fn push_does_not_mutate_parent() {
        let root = ResolutionPath::new();
        let child = root.push(Arc::from("m1"), token_of::<A>(), "A".into());
        assert!(!root.contains("m1", &token_of::<A>()));
        assert!(child.contains("m1", &token_of::<A>()));
        assert!(!child.contains("m2", &token_of::<A>()));
        assert!(!child.contains("m1", &token_of::<B>()));
    }

    #[test]
    fn cycle_renders_closing_frame() {
        let path = ResolutionPath::new()
            .push(Arc::from("m"), token_of::<A>(), "A".into())
            .push(Arc::from("m"), token_of::<B>(), "B".into());
        assert_eq!(path.cycle("A"), vec!["A", "B", "A"]);
    }

    #[test]
    fn settlement_tracks_refs() {
        let signal = SettlementSignal::default();
        signal.insert_ref(3);
        assert!(signal.is_cycle(3));
        assert!(!signal.is_cycle(4));
    }
}
