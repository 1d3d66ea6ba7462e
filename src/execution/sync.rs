//! One-shot synchronization between the supervisor and its workers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Count-down latch that opens once and stays open.
///
/// `Latch::new()` is a single-use gate; `Latch::with_count(n)` opens after
/// `n` calls to [`Latch::count_down`].
#[derive(Debug)]
pub struct Latch {
    remaining: Mutex<usize>,
    opened: Condvar,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        Self::with_count(1)
    }

    pub fn with_count(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            opened: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.remaining
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn count_down(&self) {
        let mut remaining = self.lock();
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.opened.notify_all();
            }
        }
    }

    /// Open regardless of the remaining count
    pub fn open(&self) {
        let mut remaining = self.lock();
        *remaining = 0;
        self.opened.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.lock() == 0
    }

    pub fn wait(&self) {
        let mut remaining = self.lock();
        while *remaining > 0 {
            remaining = self
                .opened
                .wait(remaining)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    /// Wait up to `timeout`; returns whether the latch is open
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.lock();
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            remaining = self
                .opened
                .wait_timeout(remaining, deadline - now)
                .unwrap_or_else(|poison| poison.into_inner())
                .0;
        }
        true
    }
}

/// Set-once boolean shared between threads
#[derive(Debug, Default)]
pub struct Flag(AtomicBool);

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; returns whether this call raised it
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
