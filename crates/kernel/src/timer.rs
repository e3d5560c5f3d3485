// Implements the pending-wake set behind the release timer thread. A
// sleeping periodic task costs an entry here instead of a parked worker.

use std::sync::Arc;

use crate::{registry::SlotKey, task::TaskCell};

pub(crate) struct PendingWake {
    pub(crate) due_us: u64,
    pub(crate) key: SlotKey,
    pub(crate) cell: Arc<TaskCell>,
}

/// Ordered set of future release points, keyed by absolute scheduler
/// time. The owning thread sleeps until `next_due_us` and drains with
/// `pop_due`; insertions signal it so a nearer wake shortens the nap.
#[derive(Default)]
pub(crate) struct PendingWakes {
    entries: Vec<PendingWake>,
}

impl PendingWakes {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn schedule(&mut self, due_us: u64, key: SlotKey, cell: Arc<TaskCell>) {
        self.entries.push(PendingWake { due_us, key, cell });
    }

    /// Drop any pending wake for the task; used by `remove_task`.
    pub(crate) fn cancel(&mut self, key: SlotKey) {
        self.entries.retain(|entry| entry.key != key);
    }

    /// Earliest due instant currently registered.
    pub(crate) fn next_due_us(&self) -> Option<u64> {
        self.entries.iter().map(|entry| entry.due_us).min()
    }

    /// Remove and return every entry due at or before `now_us`.
    pub(crate) fn pop_due(&mut self, now_us: u64) -> Vec<PendingWake> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].due_us <= now_us {
                due.push(self.entries.swap_remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|entry| entry.due_us);
        due
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
