//! Thread-local tracking of the currently executing target
//!
//! Every worker tags its thread for the duration of each action it runs,
//! saving and restoring the previous tag so nested inline dispatch keeps
//! the outer tag intact. `Switch::is_on_target` and the registry's
//! `current_*` accessors read this tag.

use crate::lane::LaneId;
use crate::pool::PoolId;
use std::cell::Cell;

/// What the current thread is running on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Lane(LaneId),
    StaticPool(PoolId),
    DynamicPool(PoolId),
}

thread_local! {
    static CURRENT: Cell<Option<Slot>> = const { Cell::new(None) };
}

/// The target tag of the calling thread, if any.
pub(crate) fn current() -> Option<Slot> {
    CURRENT.with(|c| c.get())
}

/// Scope guard tagging the current thread. Restores the previous tag on
/// drop, including on unwind.
pub(crate) struct Guard {
    prev: Option<Slot>,
}

impl Guard {
    pub fn enter(slot: Slot) -> Self {
        let prev = CURRENT.with(|c| c.replace(Some(slot)));
        Self { prev }
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let prev = self.prev;
        CURRENT.with(|c| c.set(prev));
    }
}
