// Implements a Condvar notification gate usable across threads.

use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

/// Latch lets a thread sleep without burning CPU cycles until another
/// thread delivers a signal through the underlying Condvar.
///
/// Signals are generation counted so a `signal_all` issued between the
/// caller reading the generation and parking is never lost.
pub struct Latch {
    generation: Mutex<u64>,
    event: Condvar,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            event: Condvar::new(),
        }
    }

    /// Wake a single parked thread.
    pub fn signal_one(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        drop(generation);
        self.event.notify_one();
    }

    /// Wake every parked thread.
    pub fn signal_all(&self) {
        let mut generation = self.generation.lock().unwrap();
        *generation += 1;
        drop(generation);
        self.event.notify_all();
    }

    /// Park until the next signal.
    pub fn wait(&self) {
        let mut generation = self.generation.lock().unwrap();
        let seen = *generation;
        while *generation == seen {
            generation = self.event.wait(generation).unwrap();
        }
    }

    /// Park until the next signal or until `dur` elapses. Returns true
    /// when a signal arrived within the window.
    pub fn wait_timeout(&self, dur: Duration) -> bool {
        let mut generation = self.generation.lock().unwrap();
        let seen = *generation;
        let mut remaining = dur;
        let started = std::time::Instant::now();
        while *generation == seen {
            let (guard, timed_out) = self.event.wait_timeout(generation, remaining).unwrap();
            generation = guard;
            if timed_out.timed_out() {
                return *generation != seen;
            }
            let elapsed = started.elapsed();
            if elapsed >= dur {
                return *generation != seen;
            }
            remaining = dur - elapsed;
        }
        true
    }
}
