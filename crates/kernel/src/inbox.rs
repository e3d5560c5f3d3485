use std::{
    any::Any,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use concurrent_queue::{ConcurrentQueue, PopError, PushError};
use derive_more::derive::From;

/// Opaque message payload carried between tasks.
pub type Message = Box<dyn Any + Send>;

#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum InboxError {
    Timeout,
    /// A bounded inbox closed while a send was still waiting for space.
    Full,
    Closed(PopError),
}

impl InboxError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, InboxError::Timeout)
    }
}

impl core::error::Error for InboxError {}

impl core::fmt::Display for InboxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InboxError::Closed(err) => write!(f, "InboxError::Closed({err})"),
            InboxError::Timeout => write!(f, "InboxError::Timeout"),
            InboxError::Full => write!(f, "InboxError::Full"),
        }
    }
}

/// Strict-FIFO message inbox owned by a single task.
///
/// Unbounded by default; a bounded inbox makes `send` wait for space
/// instead of failing. Send and matched receive are related by
/// happens-before through the queue plus the notification pair.
pub struct Inbox<T> {
    chan: ConcurrentQueue<T>,
    gate: Mutex<()>,
    event: Condvar,
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> Inbox<T> {
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            chan: ConcurrentQueue::unbounded(),
            gate: Mutex::new(()),
            event: Condvar::new(),
        }
    }

    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            chan: ConcurrentQueue::bounded(capacity),
            gate: Mutex::new(()),
            event: Condvar::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chan.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chan.is_empty()
    }

    /// Close the inbox, waking every blocked sender and receiver.
    pub fn close(&self) {
        self.chan.close();
        let guard = self.gate.lock().unwrap();
        drop(guard);
        self.event.notify_all();
    }

    /// Deliver a message. Never blocks on an unbounded inbox; on a bounded
    /// inbox waits until space frees up or the inbox closes. A close that
    /// lands while the send is parked on a full inbox reports `Full`,
    /// distinct from sending into an already closed one.
    pub fn send(&self, msg: T) -> Result<(), InboxError> {
        let mut pending = msg;
        let mut blocked_on_full = false;
        loop {
            match self.chan.push(pending) {
                Ok(()) => {
                    let guard = self.gate.lock().unwrap();
                    drop(guard);
                    self.event.notify_all();
                    return Ok(());
                }
                Err(PushError::Closed(_)) => {
                    if blocked_on_full {
                        return Err(InboxError::Full);
                    }
                    return Err(InboxError::Closed(PopError::Closed));
                }
                Err(PushError::Full(msg)) => {
                    pending = msg;
                    blocked_on_full = true;
                    let guard = self.gate.lock().unwrap();
                    if self.chan.is_closed() {
                        return Err(InboxError::Full);
                    }
                    // re-check under the gate so a pop between push and
                    // park cannot strand us
                    if !self.chan.is_full() {
                        continue;
                    }
                    let _unused = self.event.wait(guard).unwrap();
                }
            }
        }
    }

    /// Pop the next message; `timeout` of `None` waits until a message
    /// arrives or the inbox closes.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<T, InboxError> {
        let deadline = timeout.map(|dur| Instant::now() + dur);
        loop {
            match self.chan.pop() {
                Ok(value) => {
                    // free any sender parked on a bounded inbox
                    let guard = self.gate.lock().unwrap();
                    drop(guard);
                    self.event.notify_all();
                    return Ok(value);
                }
                Err(PopError::Closed) => return Err(InboxError::Closed(PopError::Closed)),
                Err(PopError::Empty) => {
                    let guard = self.gate.lock().unwrap();
                    if !self.chan.is_empty() || self.chan.is_closed() {
                        continue;
                    }
                    match deadline {
                        None => {
                            let _unused = self.event.wait(guard).unwrap();
                        }
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                return Err(InboxError::Timeout);
                            }
                            let (_unused, _result) =
                                self.event.wait_timeout(guard, deadline - now).unwrap();
                        }
                    }
                }
            }
        }
    }
}
