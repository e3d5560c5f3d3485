use std::sync::Arc;

use crate::{
    errors::{SchedError, SchedResult},
    registry::{SlotKey, Slots},
    scheduler::Core,
    task::{Phase, TaskCell},
};

/// Upper bound on inheritance-chain traversal; a wait-for cycle (a real
/// deadlock, resolved by the watchdog) would otherwise loop forever.
const MAX_CHAIN_HOPS: usize = 64;

pub(crate) struct OwnerRecord {
    pub(crate) key: SlotKey,
    pub(crate) cell: Arc<TaskCell>,
}

pub(crate) struct WaitRecord {
    pub(crate) key: SlotKey,
    pub(crate) cell: Arc<TaskCell>,
    pub(crate) enq: u64,
}

/// State of one mutex: the owner, the priority it entered the critical
/// section with, and the waiters ordered by (effective priority, FIFO).
pub(crate) struct MutexState {
    pub(crate) owner: Option<OwnerRecord>,
    pub(crate) saved_priority: i64,
    pub(crate) waiters: Vec<WaitRecord>,
}

impl MutexState {
    fn new() -> Self {
        Self {
            owner: None,
            saved_priority: 0,
            waiters: Vec::new(),
        }
    }
}

/// Every mutex lives in this table and the whole inheritance protocol runs
/// under its single lock: transitive inheritance and multi-mutex priority
/// restoration read across mutexes, which nested per-mutex locks cannot do
/// safely. Critical sections are O(held + waiters) and never enclose user
/// code.
pub(crate) struct MutexTable {
    pub(crate) slots: Slots<MutexState>,
    enq_seq: u64,
}

impl MutexTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Slots::new(),
            enq_seq: 0,
        }
    }

    fn next_enq(&mut self) -> u64 {
        let enq = self.enq_seq;
        self.enq_seq += 1;
        enq
    }
}

/// Priority-inheriting, non-recursive mutex scheduled tasks contend on.
///
/// Created through `Scheduler::create_mutex`; the handle clones cheaply and
/// addresses the scheduler-owned mutex table. Requester identity is passed
/// explicitly by task name so the protocol is drivable from any thread.
#[derive(Clone)]
pub struct TaskMutex {
    core: Arc<Core>,
    key: SlotKey,
}

impl TaskMutex {
    pub(crate) fn new(core: Arc<Core>, key: SlotKey) -> Self {
        Self { core, key }
    }

    /// Acquire for `task`, blocking while another task owns the mutex.
    ///
    /// Blocking raises the owner's effective priority to the highest
    /// waiting priority (transitively along the owner's own wait edge).
    /// Fails with `AlreadyOwner` on re-entry, `Deadlock` when the watchdog
    /// sacrifices this acquire to break a cycle, and `Shutdown` when the
    /// task or scheduler terminates mid-wait.
    pub fn acquire(&self, task: &str) -> SchedResult<()> {
        self.core.mutex_acquire(self.key, task)
    }

    /// Release by the current owner; hands ownership to the best waiter
    /// and restores the releaser's effective priority.
    pub fn release(&self, task: &str) -> SchedResult<()> {
        self.core.mutex_release(self.key, task)
    }

    /// Name of the current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        let table = self.core.protocol.lock().unwrap();
        table
            .slots
            .get(self.key)
            .and_then(|state| state.owner.as_ref().map(|owner| owner.cell.name.clone()))
    }
}

impl Core {
    pub(crate) fn register_mutex(&self) -> SlotKey {
        self.protocol.lock().unwrap().slots.insert(MutexState::new())
    }

    pub(crate) fn mutex_acquire(&self, mkey: SlotKey, name: &str) -> SchedResult<()> {
        self.check_fault()?;
        if self.kill.probe() {
            return Err(SchedError::Shutdown);
        }
        let (tkey, cell) = self.lookup(name)?;

        {
            let mut table = self.protocol.lock().unwrap();
            let enq = table.next_enq();
            let state = table
                .slots
                .get_mut(mkey)
                .expect("mutex slot must be registered");

            let owner_cell = match &state.owner {
                None => {
                    state.owner = Some(OwnerRecord {
                        key: tkey,
                        cell: cell.clone(),
                    });
                    state.saved_priority = cell.effective();
                    cell.held.lock().unwrap().push(mkey);
                    tracing::debug!("task {} acquired mutex uncontended", name);
                    return Ok(());
                }
                Some(owner) if owner.key == tkey => {
                    return Err(SchedError::AlreadyOwner(name.to_string()));
                }
                Some(owner) => owner.cell.clone(),
            };

            state.waiters.push(WaitRecord {
                key: tkey,
                cell: cell.clone(),
                enq,
            });
            {
                let mut phase = cell.phase.lock().unwrap();
                *phase = Phase::WaitingMutex(mkey);
            }

            let owner_before = owner_cell.effective();
            Self::recompute_chain(&table, &cell);
            let owner_after = owner_cell.effective();
            if owner_after > owner_before {
                tracing::debug!(
                    "task {} blocked on mutex held by {}; owner inherits priority {} (was {})",
                    name,
                    owner_cell.name,
                    owner_after,
                    owner_before
                );
            } else {
                tracing::debug!("task {} blocked on mutex held by {}", name, owner_cell.name);
            }
        }

        // Block outside the protocol lock until handover, abort or
        // shutdown flips the phase.
        {
            let mut phase = cell.phase.lock().unwrap();
            loop {
                let still_waiting = matches!(*phase, Phase::WaitingMutex(key) if key == mkey);
                if !still_waiting {
                    break;
                }
                if cell.terminate.probe() || self.kill.probe() || cell.abort_acquire.probe() {
                    *phase = Phase::Running;
                    break;
                }
                phase = cell.phase_event.wait(phase).unwrap();
            }
        }

        if cell.abort_acquire.take() {
            tracing::debug!("task {} acquire aborted by the deadlock watchdog", name);
            return Err(SchedError::Deadlock(name.to_string()));
        }

        if cell.terminate.probe() || self.kill.probe() {
            let mut table = self.protocol.lock().unwrap();
            let owns = {
                let state = table
                    .slots
                    .get_mut(mkey)
                    .expect("mutex slot must be registered");
                state.waiters.retain(|waiter| waiter.key != tkey);
                state.owner.as_ref().is_some_and(|owner| owner.key == tkey)
            };
            // a handover that raced the shutdown is undone so the mutex
            // does not die with this task
            if owns {
                self.release_locked(&mut table, mkey, &cell);
            }
            return Err(SchedError::Shutdown);
        }

        tracing::debug!("task {} acquired mutex after wait", name);
        Ok(())
    }

    pub(crate) fn mutex_release(&self, mkey: SlotKey, name: &str) -> SchedResult<()> {
        self.check_fault()?;
        let (tkey, cell) = self.lookup(name)?;

        let mut table = self.protocol.lock().unwrap();
        let is_owner = table
            .slots
            .get(mkey)
            .expect("mutex slot must be registered")
            .owner
            .as_ref()
            .is_some_and(|owner| owner.key == tkey);
        if !is_owner {
            return Err(SchedError::NotOwner(name.to_string()));
        }

        self.release_locked(&mut table, mkey, &cell);
        Ok(())
    }

    /// Release with the protocol lock held: hand over to the best waiter
    /// and restore the releaser's effective priority from its remaining
    /// held mutexes.
    pub(crate) fn release_locked(&self, table: &mut MutexTable, mkey: SlotKey, cell: &Arc<TaskCell>) {
        cell.held.lock().unwrap().retain(|key| *key != mkey);

        {
            let state = table
                .slots
                .get_mut(mkey)
                .expect("mutex slot must be registered");

            if state.waiters.is_empty() {
                tracing::trace!(
                    "task {} freed mutex; entry priority was {}",
                    cell.name,
                    state.saved_priority
                );
                state.owner = None;
            } else {
                let mut best = 0;
                for index in 1..state.waiters.len() {
                    let candidate = &state.waiters[index];
                    let incumbent = &state.waiters[best];
                    let candidate_priority = candidate.cell.effective();
                    let incumbent_priority = incumbent.cell.effective();
                    if candidate_priority > incumbent_priority
                        || (candidate_priority == incumbent_priority
                            && candidate.enq < incumbent.enq)
                    {
                        best = index;
                    }
                }
                let next = state.waiters.remove(best);
                state.saved_priority = next.cell.effective();
                state.owner = Some(OwnerRecord {
                    key: next.key,
                    cell: next.cell.clone(),
                });
                next.cell.held.lock().unwrap().push(mkey);
                {
                    let mut phase = next.cell.phase.lock().unwrap();
                    *phase = Phase::Running;
                }
                next.cell.phase_event.notify_all();
                tracing::debug!(
                    "task {} released mutex; ownership handed to {}",
                    cell.name,
                    next.cell.name
                );
            }
        }

        Self::recompute_effective(table, cell);
    }

    /// Re-derive one task's effective priority from its base and the
    /// waiter ceilings of every mutex it still owns.
    pub(crate) fn recompute_effective(table: &MutexTable, cell: &Arc<TaskCell>) {
        let key = cell.key();
        let mut ceiling = i64::MIN;
        for (_, state) in table.slots.iter() {
            if state.owner.as_ref().is_some_and(|owner| owner.key == key) {
                for waiter in &state.waiters {
                    ceiling = ceiling.max(waiter.cell.effective());
                }
            }
        }
        cell.set_effective(cell.base().max(ceiling));
    }

    /// Re-derive effective priorities along the wait-for chain starting at
    /// `start`: the task itself, then the owner it waits on, and so on.
    /// Hop-capped so an undetected cycle cannot spin the caller.
    pub(crate) fn recompute_chain(table: &MutexTable, start: &Arc<TaskCell>) {
        let mut current = start.clone();
        for _ in 0..MAX_CHAIN_HOPS {
            Self::recompute_effective(table, &current);
            let waiting_on = match *current.phase.lock().unwrap() {
                Phase::WaitingMutex(mkey) => Some(mkey),
                _ => None,
            };
            let Some(mkey) = waiting_on else { break };
            let next = table
                .slots
                .get(mkey)
                .and_then(|state| state.owner.as_ref().map(|owner| owner.cell.clone()));
            let Some(next) = next else { break };
            current = next;
        }
    }

    /// Tear down every protocol reference a dying task still holds: drop
    /// it from waiter sets, hand over (or free) the mutexes it owns, and
    /// deflate any priorities it was inflating.
    pub(crate) fn release_all_held(&self, cell: &Arc<TaskCell>) {
        let key = cell.key();
        let mut table = self.protocol.lock().unwrap();

        for (_, state) in table.slots.iter_mut() {
            state.waiters.retain(|waiter| waiter.key != key);
        }

        loop {
            let held = cell.held.lock().unwrap().first().copied();
            let Some(mkey) = held else { break };
            self.release_locked(&mut table, mkey, cell);
        }

        let owners: Vec<Arc<TaskCell>> = table
            .slots
            .iter()
            .filter_map(|(_, state)| state.owner.as_ref().map(|owner| owner.cell.clone()))
            .collect();
        for owner in owners {
            Self::recompute_effective(&table, &owner);
        }
    }

    /// `set_priority`: base updates, effective re-derives under the
    /// protocol lock so a task lowering itself below an inherited ceiling
    /// stays at the ceiling.
    pub(crate) fn update_base_priority(&self, cell: &Arc<TaskCell>, priority: i64) {
        let table = self.protocol.lock().unwrap();
        cell.set_base(priority);
        Self::recompute_chain(&table, cell);
        drop(table);
        self.ready.lock().unwrap().reorder();
        self.worker_latch.signal_all();
    }
}
