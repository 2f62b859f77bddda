//! Write-once instance cell with fill listeners.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::dependency::AnyArc;

type Listener = Box<dyn FnOnce(&AnyArc) + Send>;

/// Placeholder for an instance that may not exist yet.
///
/// Each per-context entry owns one slot. Forward references hand the slot out
/// before construction; listeners registered with [`InstanceSlot::on_fill`]
/// run exactly once, when the instance lands.
#[derive(Clone, Default)]
pub(crate) struct InstanceSlot {
    inner: Arc<SlotInner>,
}

#[derive(Default)]
struct SlotInner {
    cell: OnceCell<AnyArc>,
    listeners: Mutex<Vec<Listener>>,
}

impl InstanceSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Option<AnyArc> {
        self.inner.cell.get().cloned()
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.inner.cell.get().is_some()
    }

    /// Stores the instance and runs pending listeners. Later fills are ignored.
    pub(crate) fn fill(&self, instance: AnyArc) {
        if self.inner.cell.set(instance.clone()).is_err() {
            return;
        }
        // Set before draining: on_fill never parks a listener this misses.
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for listener in listeners {
            listener(&instance);
        }
    }

    /// Runs `listener` now if the slot is filled, otherwise once it is.
    pub(crate) fn on_fill(&self, listener: impl FnOnce(&AnyArc) + Send + 'static) {
        let mut listeners = self.inner.listeners.lock();
        match self.inner.cell.get() {
            Some(instance) => {
                let instance = instance.clone();
                drop(listeners);
                listener(&instance);
            }
            None => listeners.push(Box::new(listener)),
        }
    }
}
