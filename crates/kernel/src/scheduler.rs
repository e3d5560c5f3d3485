#![allow(clippy::module_name_repetitions)]

use std::{
    any::Any,
    collections::HashMap,
    env, panic,
    sync::{atomic, Arc, Condvar, Mutex, OnceLock, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    backoff::IdleBackoff,
    bridge::SignalBridge,
    clock::{micros_from_duration, Clock},
    errors::{SchedError, SchedResult},
    inbox::{InboxError, Message},
    mutex::{MutexTable, TaskMutex},
    queue::{running_key, Policy, ReadyQueue},
    registry::{SlotKey, Slots},
    sync::{Flag, Latch},
    task::{Phase, Task, TaskCell, TaskSnapshot, TaskStats},
    timer::PendingWakes,
};

// --- Constants

/// Default soft-preemption tick.
pub const DEFAULT_PREEMPT_QUANTUM: Duration = Duration::from_millis(10);

/// Default deadlock watchdog tick.
pub const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

/// How long the release timer naps when nothing is scheduled.
const TIMER_IDLE_NAP: Duration = Duration::from_millis(100);

/// Consecutive watchdog failures tolerated before the scheduler records a
/// fatal fault and shuts down.
const MAX_WATCHDOG_FAULTS: u32 = 3;

/// [`get_max_threads`] returns the hardware parallelism of the current
/// system.
pub(crate) fn get_max_threads() -> usize {
    let system_value = thread::available_parallelism()
        .ok()
        .map_or(1, std::num::NonZero::get);
    tracing::debug!("thread::available_parallelism() reported: {system_value}");
    system_value
}

/// [`get_num_threads`] resolves the worker count from the
/// `CADENCE_NUM_THREADS` environment variable, falling back to
/// [`get_max_threads`].
pub(crate) fn get_num_threads() -> usize {
    match env::var("CADENCE_NUM_THREADS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(requested) if requested > 0 => {
            tracing::debug!("using worker count {requested} from CADENCE_NUM_THREADS");
            requested
        }
        _ => get_max_threads(),
    }
}

/// What the dispatcher does after a run exceeds its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrunPolicy {
    /// Count and log the overrun, nothing else.
    #[default]
    Warn,
    /// Drop one period after each overrun.
    SkipNext,
    /// Terminate the task on its first overrun.
    Terminate,
}

pub(crate) struct Registry {
    names: HashMap<String, SlotKey>,
    slots: Slots<Arc<TaskCell>>,
}

/// Shared scheduler state: the registry, the ready queue, the mutex
/// protocol table, the pending-wake set, and the control signals every
/// kernel thread observes.
pub(crate) struct Core {
    pub(crate) clock: Clock,
    pub(crate) policy: Policy,
    overrun: OverrunPolicy,
    parallelism: usize,
    preempt_quantum: Duration,
    watchdog_period: Duration,

    registry: Mutex<Registry>,
    pub(crate) ready: Mutex<ReadyQueue>,
    pub(crate) protocol: Mutex<MutexTable>,
    wakes: Mutex<PendingWakes>,
    wake_event: Condvar,

    pub(crate) worker_latch: Latch,
    tick_latch: Latch,
    pub(crate) kill: Flag,
    started: Flag,
    fault: Mutex<Option<SchedError>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) bridge: SignalBridge,
}

/// Builder over the recognized configuration options.
pub struct SchedulerBuilder {
    policy: Policy,
    parallelism: Option<usize>,
    preempt_quantum: Duration,
    watchdog_period: Duration,
    overrun_policy: OverrunPolicy,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            policy: Policy::default(),
            parallelism: None,
            preempt_quantum: DEFAULT_PREEMPT_QUANTUM,
            watchdog_period: DEFAULT_WATCHDOG_PERIOD,
            overrun_policy: OverrunPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Worker pool size; defaults to `CADENCE_NUM_THREADS` or the hardware
    /// parallelism.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    #[must_use]
    pub fn with_preempt_quantum(mut self, quantum: Duration) -> Self {
        self.preempt_quantum = quantum;
        self
    }

    #[must_use]
    pub fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    #[must_use]
    pub fn with_overrun_policy(mut self, policy: OverrunPolicy) -> Self {
        self.overrun_policy = policy;
        self
    }

    #[must_use]
    pub fn build(self) -> Scheduler {
        let parallelism = self.parallelism.unwrap_or_else(get_num_threads).max(1);
        Scheduler {
            core: Arc::new(Core {
                clock: Clock::new(),
                policy: self.policy,
                overrun: self.overrun_policy,
                parallelism,
                preempt_quantum: self.preempt_quantum,
                watchdog_period: self.watchdog_period,
                registry: Mutex::new(Registry {
                    names: HashMap::new(),
                    slots: Slots::new(),
                }),
                ready: Mutex::new(ReadyQueue::new(self.policy)),
                protocol: Mutex::new(MutexTable::new()),
                wakes: Mutex::new(PendingWakes::new()),
                wake_event: Condvar::new(),
                worker_latch: Latch::new(),
                tick_latch: Latch::new(),
                kill: Flag::new(),
                started: Flag::new(),
                fault: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
                bridge: SignalBridge::new(),
            }),
        }
    }
}

/// The scheduling kernel: multiplexes registered tasks onto a worker pool
/// under the configured real-time policy. Cheap to clone; all clones share
/// the same core.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

static INTERRUPT_TARGETS: OnceLock<Mutex<Vec<Weak<Core>>>> = OnceLock::new();

impl Scheduler {
    #[must_use]
    pub fn new(policy: Policy) -> Self {
        Self::builder().with_policy(policy).build()
    }

    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    #[must_use]
    pub fn policy(&self) -> Policy {
        self.core.policy
    }

    /// Register a task under its unique name. Event-driven tasks park
    /// awaiting a trigger; everything else becomes ready immediately.
    pub fn add_task(&self, task: Task) -> SchedResult<()> {
        self.core.check_fault()?;
        if self.core.kill.probe() {
            return Err(SchedError::Shutdown);
        }
        self.core.add_task(task)
    }

    /// Cooperatively terminate and deregister the named task. A run in
    /// flight finishes its current call; the name frees up immediately.
    pub fn remove_task(&self, name: &str) -> SchedResult<()> {
        self.core.check_fault()?;
        self.core.remove_by_name(name)
    }

    /// Spawn the worker pool, release timer, preemption timer and deadlock
    /// watchdog.
    pub fn start(&self) -> SchedResult<()> {
        self.core.check_fault()?;
        if !self.core.started.set() {
            return Err(SchedError::AlreadyStarted);
        }

        let mut handles = Vec::new();
        for index in 0..self.core.parallelism {
            let core = self.core.clone();
            let worker_name = format!("cadence_worker_{index}");
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || {
                    if let Err(err) =
                        panic::catch_unwind(panic::AssertUnwindSafe(|| core.worker_loop()))
                    {
                        tracing::error!("worker {worker_name} panicked: {err:?}");
                    }
                })
                .unwrap_or_else(|_| panic!("should spawn worker {index}"));
            handles.push(handle);
        }

        let core = self.core.clone();
        handles.push(
            thread::Builder::new()
                .name("cadence_timer".to_string())
                .spawn(move || core.timer_loop())
                .unwrap_or_else(|_| panic!("should spawn release timer")),
        );

        let core = self.core.clone();
        handles.push(
            thread::Builder::new()
                .name("cadence_preempt".to_string())
                .spawn(move || core.preempt_loop())
                .unwrap_or_else(|_| panic!("should spawn preemption timer")),
        );

        let core = self.core.clone();
        handles.push(
            thread::Builder::new()
                .name("cadence_watchdog".to_string())
                .spawn(move || core.watchdog_loop())
                .unwrap_or_else(|_| panic!("should spawn watchdog")),
        );

        self.core.handles.lock().unwrap().extend(handles);
        tracing::debug!(
            "scheduler started: {} workers, {:?} policy",
            self.core.parallelism,
            self.core.policy
        );
        Ok(())
    }

    /// Terminate every task, wake every waiter, and join all kernel
    /// threads.
    pub fn stop_all(&self) {
        tracing::debug!("stop_all requested");
        self.core.shutdown_and_join();
    }

    /// Release an event-driven task. Triggers delivered while the task is
    /// ready or running coalesce into a single pending release.
    pub fn trigger_task(&self, name: &str) -> SchedResult<()> {
        self.core.trigger_by_name(name)
    }

    /// Deliver a message to the named task's inbox.
    pub fn send_message<T: Any + Send>(&self, name: &str, msg: T) -> SchedResult<()> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        cell.inbox
            .send(Box::new(msg) as Message)
            .map_err(|err| match err {
                InboxError::Full => SchedError::InboxFull,
                InboxError::Timeout | InboxError::Closed(_) => SchedError::InboxClosed,
            })
    }

    /// Pop the next message from the named task's inbox; `None` waits
    /// until a message arrives or the inbox closes.
    pub fn receive_message(&self, name: &str, timeout: Option<Duration>) -> SchedResult<Message> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        cell.inbox.recv(timeout).map_err(|err| match err {
            InboxError::Timeout => SchedError::Timeout,
            InboxError::Full => SchedError::InboxFull,
            InboxError::Closed(_) => SchedError::InboxClosed,
        })
    }

    /// Update the base priority; the effective priority re-derives from
    /// the base and any live inheritance ceiling.
    pub fn set_priority(&self, name: &str, priority: i64) -> SchedResult<()> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        self.core.update_base_priority(&cell, priority);
        tracing::debug!("task {name} base priority set to {priority}");
        Ok(())
    }

    pub fn get_stats(&self, name: &str) -> SchedResult<TaskStats> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        let stats = cell.stats.lock().unwrap().clone();
        Ok(stats)
    }

    /// Point-in-time view of the task: phase, priorities, deadline, stats.
    pub fn snapshot(&self, name: &str) -> SchedResult<TaskSnapshot> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        Ok(cell.snapshot())
    }

    /// Map a host-OS signal onto `trigger_task(name)`.
    pub fn bind_signal(&self, signum: i32, name: &str) -> SchedResult<()> {
        self.core.check_fault()?;
        SignalBridge::bind(&self.core, signum, name)
    }

    /// Create a priority-inheriting mutex owned by this scheduler.
    pub fn create_mutex(&self) -> SchedResult<TaskMutex> {
        self.core.check_fault()?;
        Ok(TaskMutex::new(self.core.clone(), self.core.register_mutex()))
    }

    /// Park the calling worker for `dur` on behalf of the named task; the
    /// task shows SLEEPING for the duration and resumes RUNNING.
    pub fn sleep(&self, name: &str, dur: Duration) -> SchedResult<()> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        self.core.sleep_cell(&cell, dur)
    }

    /// Soft-preemption hint: true when a strictly better task is ready and
    /// this one should return early if it can.
    pub fn should_yield(&self, name: &str) -> SchedResult<bool> {
        self.core.check_fault()?;
        let (_key, cell) = self.core.lookup(name)?;
        Ok(cell.yield_hint.probe())
    }

    /// Install a process-wide interrupt handler that stops this scheduler,
    /// in the manner of a pool kill on Ctrl-C.
    pub fn stop_on_interrupt(&self) -> SchedResult<()> {
        let targets = INTERRUPT_TARGETS.get_or_init(|| Mutex::new(Vec::new()));
        let install = {
            let mut targets = targets.lock().unwrap();
            let install = targets.is_empty();
            targets.push(Arc::downgrade(&self.core));
            install
        };
        if install {
            ctrlc::set_handler(move || {
                tracing::info!("interrupt received; stopping schedulers");
                if let Some(targets) = INTERRUPT_TARGETS.get() {
                    let drained: Vec<Weak<Core>> = targets.lock().unwrap().drain(..).collect();
                    for core in drained {
                        if let Some(core) = core.upgrade() {
                            core.shutdown_and_join();
                        }
                    }
                }
            })
            .map_err(|err| SchedError::SignalBind(err.to_string()))?;
        }
        Ok(())
    }
}

// --- registry operations

impl Core {
    pub(crate) fn check_fault(&self) -> SchedResult<()> {
        match self.fault.lock().unwrap().clone() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> SchedResult<(SlotKey, Arc<TaskCell>)> {
        let registry = self.registry.lock().unwrap();
        let key = *registry
            .names
            .get(name)
            .ok_or_else(|| SchedError::UnknownTask(name.to_string()))?;
        let cell = registry
            .slots
            .get(key)
            .cloned()
            .ok_or_else(|| SchedError::UnknownTask(name.to_string()))?;
        Ok((key, cell))
    }

    fn add_task(&self, task: Task) -> SchedResult<()> {
        let name = task.name.clone();
        let event_driven = task.event_driven;
        let cell = Arc::new(TaskCell::new(task));

        let key = {
            let mut registry = self.registry.lock().unwrap();
            if registry.names.contains_key(&name) {
                return Err(SchedError::DuplicateTask(name));
            }
            let key = registry.slots.insert(cell.clone());
            registry.names.insert(name.clone(), key);
            key
        };
        cell.bind_key(key);

        if event_driven {
            let mut phase = cell.phase.lock().unwrap();
            *phase = Phase::WaitingEvent;
            drop(phase);
            tracing::debug!("task {name} registered awaiting trigger");
        } else {
            cell.stamp_release(self.clock.now_micros());
            {
                let mut phase = cell.phase.lock().unwrap();
                *phase = Phase::Ready;
            }
            self.enqueue_ready(key, cell);
            tracing::debug!("task {name} registered ready");
        }
        Ok(())
    }

    fn remove_by_name(&self, name: &str) -> SchedResult<()> {
        let (key, cell) = {
            let mut registry = self.registry.lock().unwrap();
            let Some(key) = registry.names.remove(name) else {
                return Err(SchedError::UnknownTask(name.to_string()));
            };
            let cell = registry
                .slots
                .take(key)
                .expect("name map and slot arena stay in sync");
            (key, cell)
        };
        tracing::debug!("task {name} removed; terminating cooperatively");
        self.terminate_cell(key, &cell);
        Ok(())
    }

    /// Shared teardown for `remove_task`, `stop_all` and overrun
    /// termination: flags, queue/wake cancellation, inbox close, protocol
    /// cleanup, and the final phase transition.
    fn terminate_cell(&self, key: SlotKey, cell: &Arc<TaskCell>) {
        cell.terminate.set();
        self.ready.lock().unwrap().remove(key);
        {
            let mut wakes = self.wakes.lock().unwrap();
            wakes.cancel(key);
        }
        self.wake_event.notify_all();
        cell.inbox.close();
        self.release_all_held(cell);
        {
            let mut phase = cell.phase.lock().unwrap();
            // a running work function finishes its call; the dispatcher
            // settles the final phase from the terminate flag
            if *phase != Phase::Running {
                *phase = Phase::Terminated;
            }
        }
        cell.phase_event.notify_all();
    }

    pub(crate) fn trigger_by_name(&self, name: &str) -> SchedResult<()> {
        self.check_fault()?;
        let (key, cell) = self.lookup(name)?;
        if !cell.event_driven {
            return Err(SchedError::NotEventDriven(name.to_string()));
        }

        enum Delivery {
            Release,
            Coalesce,
            Ignore,
        }

        let delivery = {
            let mut phase = cell.phase.lock().unwrap();
            match *phase {
                Phase::WaitingEvent => {
                    *phase = Phase::Ready;
                    Delivery::Release
                }
                Phase::Terminated => Delivery::Ignore,
                _ => {
                    cell.pending_trigger.set();
                    Delivery::Coalesce
                }
            }
        };

        match delivery {
            Delivery::Release => {
                cell.stamp_release(self.clock.now_micros());
                self.enqueue_ready(key, cell);
                tracing::debug!("task {name} triggered");
            }
            Delivery::Coalesce => {
                tracing::debug!("task {name} trigger coalesced into pending bit");
            }
            Delivery::Ignore => {
                tracing::debug!("task {name} already terminated; trigger ignored");
            }
        }
        Ok(())
    }

    fn sleep_cell(&self, cell: &Arc<TaskCell>, dur: Duration) -> SchedResult<()> {
        let deadline = Instant::now() + dur;
        let mut phase = cell.phase.lock().unwrap();
        if *phase == Phase::Terminated {
            return Err(SchedError::Shutdown);
        }
        let resumed = *phase;
        *phase = Phase::Sleeping;
        loop {
            if cell.terminate.probe() || self.kill.probe() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timeout) = cell
                .phase_event
                .wait_timeout(phase, deadline - now)
                .unwrap();
            phase = guard;
        }
        let interrupted = cell.terminate.probe() || self.kill.probe();
        *phase = if interrupted { Phase::Terminated } else { resumed };
        drop(phase);
        if interrupted {
            return Err(SchedError::Shutdown);
        }
        Ok(())
    }
}

// --- dispatch

impl Core {
    fn enqueue_ready(&self, key: SlotKey, cell: Arc<TaskCell>) {
        let backlog = {
            let mut ready = self.ready.lock().unwrap();
            ready.insert(key, cell);
            ready.len()
        };
        if backlog == 1 {
            self.worker_latch.signal_one();
        } else {
            self.worker_latch.signal_all();
        }
    }

    fn pop_ready(&self) -> Option<Arc<TaskCell>> {
        loop {
            let (_key, cell) = self.ready.lock().unwrap().pop_best()?;
            {
                let mut phase = cell.phase.lock().unwrap();
                if cell.terminate.probe() || *phase == Phase::Terminated {
                    continue;
                }
                *phase = Phase::Running;
            }
            return Some(cell);
        }
    }

    fn worker_loop(&self) {
        let mut backoff = IdleBackoff::default();
        loop {
            if self.kill.probe() {
                break;
            }
            match self.pop_ready() {
                Some(cell) => {
                    backoff.reset();
                    self.run_task(&cell);
                }
                None => {
                    let _signaled = self.worker_latch.wait_timeout(backoff.next_delay());
                }
            }
        }
        tracing::debug!("worker exiting");
    }

    fn run_task(&self, cell: &Arc<TaskCell>) {
        let span = tracing::trace_span!("Core::dispatch", task = %cell.name);
        let _enter = span.enter();

        let start_us = self.clock.now_micros();
        let outcome = {
            let mut work = cell.work.lock().unwrap();
            panic::catch_unwind(panic::AssertUnwindSafe(|| (*work)()))
        };
        let runtime_us = self.clock.now_micros().saturating_sub(start_us);

        let errored = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                tracing::warn!("task {} work function failed: {err}", cell.name);
                true
            }
            Err(payload) => {
                tracing::warn!("task {} work function panicked: {payload:?}", cell.name);
                true
            }
        };
        cell.record_run(runtime_us, errored);

        if let Some(deadline) = cell.deadline {
            let deadline_us = micros_from_duration(deadline);
            if runtime_us > deadline_us {
                cell.record_overrun();
                tracing::warn!(
                    "task {} overran its deadline: ran {runtime_us}us against {deadline_us}us",
                    cell.name
                );
                match self.overrun {
                    OverrunPolicy::Warn => {}
                    OverrunPolicy::SkipNext => {
                        cell.skip_release.set();
                    }
                    OverrunPolicy::Terminate => {
                        cell.terminate.set();
                    }
                }
            }
        }

        cell.yield_hint.clear();

        enum Next {
            Done,
            Requeue,
            Sleep(u64),
        }

        // settled under the phase lock so a trigger or terminate racing
        // the end of the run is never lost
        let next = {
            let mut phase = cell.phase.lock().unwrap();
            if cell.terminate.probe() {
                *phase = Phase::Terminated;
                Next::Done
            } else if cell.event_driven {
                if cell.pending_trigger.take() {
                    *phase = Phase::Ready;
                    Next::Requeue
                } else {
                    *phase = Phase::WaitingEvent;
                    Next::Done
                }
            } else if let Some(period) = cell.period {
                let period_us = micros_from_duration(period);
                let mut release = cell
                    .last_release_us
                    .load(atomic::Ordering::Acquire)
                    .saturating_add(period_us);
                if cell.skip_release.take() {
                    release = release.saturating_add(period_us);
                }
                *phase = Phase::Sleeping;
                Next::Sleep(release.max(self.clock.now_micros()))
            } else {
                *phase = Phase::Terminated;
                tracing::debug!("one-shot task {} completed", cell.name);
                Next::Done
            }
        };
        cell.phase_event.notify_all();

        match next {
            Next::Done => {}
            Next::Requeue => {
                cell.stamp_release(self.clock.now_micros());
                self.enqueue_ready(cell.key(), cell.clone());
            }
            Next::Sleep(release_us) => {
                self.schedule_wake(release_us, cell.key(), cell.clone());
            }
        }
    }

    fn schedule_wake(&self, due_us: u64, key: SlotKey, cell: Arc<TaskCell>) {
        {
            let mut wakes = self.wakes.lock().unwrap();
            wakes.schedule(due_us, key, cell);
        }
        self.wake_event.notify_all();
    }

    fn timer_loop(&self) {
        loop {
            let due = {
                let mut wakes = self.wakes.lock().unwrap();
                loop {
                    if self.kill.probe() {
                        tracing::debug!("release timer exiting");
                        return;
                    }
                    let now = self.clock.now_micros();
                    match wakes.next_due_us() {
                        Some(due) if due <= now => break wakes.pop_due(now),
                        Some(due) => {
                            let nap = Duration::from_micros(due - now).min(TIMER_IDLE_NAP);
                            let (guard, _timeout) =
                                self.wake_event.wait_timeout(wakes, nap).unwrap();
                            wakes = guard;
                        }
                        None => {
                            let (guard, _timeout) =
                                self.wake_event.wait_timeout(wakes, TIMER_IDLE_NAP).unwrap();
                            wakes = guard;
                        }
                    }
                }
            };

            for wake in due {
                if wake.cell.terminate.probe() {
                    continue;
                }
                // the scheduled release instant is the period base, so
                // timer lateness does not accumulate as drift
                wake.cell.stamp_release(wake.due_us);
                let released = {
                    let mut phase = wake.cell.phase.lock().unwrap();
                    if *phase == Phase::Sleeping {
                        *phase = Phase::Ready;
                        true
                    } else {
                        false
                    }
                };
                if released {
                    tracing::trace!("task {} released", wake.cell.name);
                    self.enqueue_ready(wake.key, wake.cell);
                }
            }
        }
    }

    fn preempt_loop(&self) {
        loop {
            let _signaled = self.tick_latch.wait_timeout(self.preempt_quantum);
            if self.kill.probe() {
                break;
            }
            let Some(best) = self.ready.lock().unwrap().peek_best_key() else {
                continue;
            };
            let running: Vec<Arc<TaskCell>> = {
                let registry = self.registry.lock().unwrap();
                registry
                    .slots
                    .iter()
                    .filter(|(_, cell)| cell.phase_snapshot() == Phase::Running)
                    .map(|(_, cell)| cell.clone())
                    .collect()
            };
            for cell in running {
                let key = running_key(&cell);
                if self.policy.compare(&best, &key) == std::cmp::Ordering::Less
                    && cell.yield_hint.set()
                {
                    tracing::debug!("task {} hinted to yield", cell.name);
                }
            }
        }
        tracing::debug!("preemption timer exiting");
    }

    fn watchdog_loop(&self) {
        let mut consecutive_faults = 0_u32;
        loop {
            let _signaled = self.tick_latch.wait_timeout(self.watchdog_period);
            if self.kill.probe() {
                break;
            }
            match panic::catch_unwind(panic::AssertUnwindSafe(|| self.watchdog_tick())) {
                Ok(()) => consecutive_faults = 0,
                Err(payload) => {
                    consecutive_faults += 1;
                    tracing::error!(
                        "deadlock watchdog failed ({consecutive_faults} consecutive): {payload:?}"
                    );
                    if consecutive_faults >= MAX_WATCHDOG_FAULTS {
                        *self.fault.lock().unwrap() = Some(SchedError::WatchdogFailed);
                        self.begin_shutdown();
                        break;
                    }
                }
            }
        }
        tracing::debug!("watchdog exiting");
    }
}

// --- shutdown

impl Core {
    fn begin_shutdown(&self) {
        if self.kill.set() {
            tracing::debug!("scheduler shutdown initiated");
        }
        let cells: Vec<(SlotKey, Arc<TaskCell>)> = {
            let registry = self.registry.lock().unwrap();
            registry
                .slots
                .iter()
                .map(|(key, cell)| (key, cell.clone()))
                .collect()
        };
        for (key, cell) in cells {
            self.terminate_cell(key, &cell);
        }
        self.ready.lock().unwrap().clear();
        {
            let mut wakes = self.wakes.lock().unwrap();
            wakes.clear();
        }
        self.wake_event.notify_all();
        self.worker_latch.signal_all();
        self.tick_latch.signal_all();
        self.bridge.close();
    }

    pub(crate) fn shutdown_and_join(&self) {
        self.begin_shutdown();
        self.join_threads();
    }

    fn join_threads(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap();
            handles.drain(..).collect()
        };
        for handle in handles {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if let Err(payload) = handle.join() {
                tracing::error!("scheduler thread panicked: {payload:?}");
            }
        }
        tracing::debug!("all scheduler threads joined");
    }
}
