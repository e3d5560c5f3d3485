use std::{
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Condvar, Mutex, OnceLock,
    },
    time::Duration,
};

use crate::{
    clock::{micros_from_duration, secs_from_micros, NO_DEADLINE_US},
    errors::WorkError,
    inbox::{Inbox, Message},
    queue::OrderKey,
    registry::SlotKey,
    sync::Flag,
};

/// The work capability a task carries: nullary, possibly failing. Panics
/// raised inside it are contained by the dispatching worker.
pub type WorkFn = Box<dyn FnMut() -> Result<(), WorkError> + Send>;

/// Lifecycle phase of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Ready,
    Running,
    WaitingEvent,
    WaitingMutex(SlotKey),
    Sleeping,
    Terminated,
}

/// Per-task dispatch counters, readable at any time via
/// `Scheduler::get_stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStats {
    pub runs: u64,
    /// Total seconds spent inside the work function.
    pub total_runtime: f64,
    /// Seconds the most recent run took.
    pub last_runtime: f64,
    pub overruns: u64,
    pub errors: u64,
}

/// Point-in-time view of a task for observability.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub name: String,
    pub phase: Phase,
    pub base_priority: i64,
    pub effective_priority: i64,
    /// Absolute deadline of the current release, seconds on the scheduler
    /// clock; `None` when unbounded.
    pub next_deadline: Option<f64>,
    pub stats: TaskStats,
}

/// Task construction value handed to `Scheduler::add_task`.
///
/// A period of zero/none makes the task one-shot; `event_driven` tasks are
/// only ever released by `trigger_task` (or a bound signal) and ignore the
/// period entirely.
pub struct Task {
    pub(crate) name: String,
    pub(crate) work: WorkFn,
    pub(crate) period: Option<Duration>,
    pub(crate) base_priority: i64,
    pub(crate) deadline: Option<Duration>,
    pub(crate) event_driven: bool,
    pub(crate) inbox_capacity: Option<usize>,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnMut() -> Result<(), WorkError> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Box::new(work),
            period: None,
            base_priority: 0,
            deadline: None,
            event_driven: false,
            inbox_capacity: None,
        }
    }

    /// Release the task every `period`; a zero period means one-shot.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = (!period.is_zero()).then_some(period);
        self
    }

    /// Base priority; larger is more urgent.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.base_priority = priority;
        self
    }

    /// Relative deadline per release; zero means unbounded.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = (!deadline.is_zero()).then_some(deadline);
        self
    }

    /// Cap the inbox; senders then wait for space instead of growing it.
    #[must_use]
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }

    /// Only run in response to `trigger_task` / a bound signal.
    #[must_use]
    pub fn event_driven(mut self) -> Self {
        self.event_driven = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runtime record of a registered task. Owned by the scheduler registry;
/// workers, the timer thread and the mutex protocol share it through an
/// `Arc`.
///
/// Hot ordering fields (priorities, deadline) are atomics so the ready
/// queue comparator and the inheritance path read them without taking the
/// phase lock.
pub(crate) struct TaskCell {
    pub(crate) name: String,
    key: OnceLock<SlotKey>,

    pub(crate) work: Mutex<WorkFn>,
    pub(crate) period: Option<Duration>,
    pub(crate) deadline: Option<Duration>,
    pub(crate) event_driven: bool,

    base_priority: AtomicI64,
    effective_priority: AtomicI64,
    next_deadline_us: AtomicU64,
    pub(crate) last_release_us: AtomicU64,

    /// Lifecycle phase; the paired condvar is the rendezvous used for
    /// mutex handover, deadlock aborts and timed sleeps.
    pub(crate) phase: Mutex<Phase>,
    pub(crate) phase_event: Condvar,

    pub(crate) stats: Mutex<TaskStats>,
    pub(crate) inbox: Inbox<Message>,

    pub(crate) terminate: Flag,
    pub(crate) yield_hint: Flag,
    /// Coalesced trigger bit: any number of triggers delivered while the
    /// task is ready or running fold into one extra release.
    pub(crate) pending_trigger: Flag,
    pub(crate) abort_acquire: Flag,
    pub(crate) skip_release: Flag,

    /// Mutexes currently owned, for priority restoration on release.
    pub(crate) held: Mutex<Vec<SlotKey>>,
}

impl TaskCell {
    pub(crate) fn new(task: Task) -> Self {
        let inbox = match task.inbox_capacity {
            Some(capacity) => Inbox::bounded(capacity),
            None => Inbox::unbounded(),
        };
        Self {
            name: task.name,
            key: OnceLock::new(),
            work: Mutex::new(task.work),
            period: task.period,
            deadline: task.deadline,
            event_driven: task.event_driven,
            base_priority: AtomicI64::new(task.base_priority),
            effective_priority: AtomicI64::new(task.base_priority),
            next_deadline_us: AtomicU64::new(NO_DEADLINE_US),
            last_release_us: AtomicU64::new(0),
            phase: Mutex::new(Phase::Created),
            phase_event: Condvar::new(),
            stats: Mutex::new(TaskStats::default()),
            inbox,
            terminate: Flag::new(),
            yield_hint: Flag::new(),
            pending_trigger: Flag::new(),
            abort_acquire: Flag::new(),
            skip_release: Flag::new(),
            held: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn bind_key(&self, key: SlotKey) {
        let _unused = self.key.set(key);
    }

    pub(crate) fn key(&self) -> SlotKey {
        *self.key.get().expect("task cell must be registered")
    }

    pub(crate) fn base(&self) -> i64 {
        self.base_priority.load(Ordering::Acquire)
    }

    pub(crate) fn effective(&self) -> i64 {
        self.effective_priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_base(&self, priority: i64) {
        self.base_priority.store(priority, Ordering::Release);
    }

    /// Store the effective priority, clamped so it never drops below base.
    pub(crate) fn set_effective(&self, priority: i64) {
        let floor = self.base();
        self.effective_priority
            .store(priority.max(floor), Ordering::Release);
    }

    pub(crate) fn next_deadline_micros(&self) -> u64 {
        self.next_deadline_us.load(Ordering::Acquire)
    }

    /// Stamp the absolute deadline for a release starting at
    /// `release_us`. Unbounded tasks stay at the sentinel.
    pub(crate) fn stamp_release(&self, release_us: u64) {
        self.last_release_us.store(release_us, Ordering::Release);
        let deadline = match self.deadline {
            Some(deadline) => release_us.saturating_add(micros_from_duration(deadline)),
            None => NO_DEADLINE_US,
        };
        self.next_deadline_us.store(deadline, Ordering::Release);
    }

    pub(crate) fn period_micros(&self) -> u64 {
        match self.period {
            Some(period) => micros_from_duration(period),
            None => NO_DEADLINE_US,
        }
    }

    pub(crate) fn order_key(&self, seq: u64) -> OrderKey {
        OrderKey {
            deadline_us: self.next_deadline_micros(),
            period_us: self.period_micros(),
            priority: self.effective(),
            seq,
        }
    }

    pub(crate) fn phase_snapshot(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub(crate) fn record_run(&self, runtime_us: u64, errored: bool) {
        let runtime = secs_from_micros(runtime_us);
        let mut stats = self.stats.lock().unwrap();
        stats.runs += 1;
        stats.last_runtime = runtime;
        stats.total_runtime += runtime;
        if errored {
            stats.errors += 1;
        }
    }

    pub(crate) fn record_overrun(&self) {
        self.stats.lock().unwrap().overruns += 1;
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let deadline_us = self.next_deadline_micros();
        TaskSnapshot {
            name: self.name.clone(),
            phase: self.phase_snapshot(),
            base_priority: self.base(),
            effective_priority: self.effective(),
            next_deadline: (deadline_us != NO_DEADLINE_US).then(|| secs_from_micros(deadline_us)),
            stats: self.stats.lock().unwrap().clone(),
        }
    }
}
