/// Boxed error type a work function may return; panics inside work
/// functions are handled the same way.
pub type WorkError = Box<dyn core::error::Error + Send + Sync>;

pub type SchedResult<T> = Result<T, SchedError>;

/// Every failure the kernel surfaces at its API boundary.
///
/// Overruns and work-function failures are deliberately absent: those are
/// internal conditions reflected in a task's stats, never raised to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Operation referenced a task name the registry does not know.
    UnknownTask(String),

    /// `add_task` was handed a name that is already registered.
    DuplicateTask(String),

    /// `trigger_task` was invoked on a task that is not event driven.
    NotEventDriven(String),

    /// `release` was invoked by a task that does not own the mutex.
    NotOwner(String),

    /// `acquire` was re-entered by the current owner; the mutex is not
    /// recursive.
    AlreadyOwner(String),

    /// The watchdog aborted this task's `acquire` to break a cycle.
    Deadlock(String),

    /// `receive_message` expired before a message arrived.
    Timeout,

    /// The inbox was closed while sending or receiving.
    InboxClosed,

    /// A bounded inbox was closed while a send was still waiting for
    /// space.
    InboxFull,

    /// `start` was invoked on an already started scheduler.
    AlreadyStarted,

    /// The scheduler is shutting down or the task was terminated while the
    /// operation was blocked.
    Shutdown,

    /// Signal registration with the host OS failed.
    SignalBind(String),

    /// The deadlock watchdog failed repeatedly; the scheduler has shut
    /// itself down.
    WatchdogFailed,
}

impl core::error::Error for SchedError {}

impl core::fmt::Display for SchedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SchedError::UnknownTask(name) => write!(f, "SchedError::UnknownTask({name})"),
            SchedError::DuplicateTask(name) => write!(f, "SchedError::DuplicateTask({name})"),
            SchedError::NotEventDriven(name) => write!(f, "SchedError::NotEventDriven({name})"),
            SchedError::NotOwner(name) => write!(f, "SchedError::NotOwner({name})"),
            SchedError::AlreadyOwner(name) => write!(f, "SchedError::AlreadyOwner({name})"),
            SchedError::Deadlock(name) => write!(f, "SchedError::Deadlock({name})"),
            SchedError::SignalBind(reason) => write!(f, "SchedError::SignalBind({reason})"),
            SchedError::Timeout => write!(f, "SchedError::Timeout"),
            SchedError::InboxClosed => write!(f, "SchedError::InboxClosed"),
            SchedError::InboxFull => write!(f, "SchedError::InboxFull"),
            SchedError::AlreadyStarted => write!(f, "SchedError::AlreadyStarted"),
            SchedError::Shutdown => write!(f, "SchedError::Shutdown"),
            SchedError::WatchdogFailed => write!(f, "SchedError::WatchdogFailed"),
        }
    }
}
