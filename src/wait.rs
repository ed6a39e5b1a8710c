use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{JobError, JobResult};

/// Wait timeout. `None` blocks indefinitely, `Some(Duration::ZERO)` polls.
pub type Timeout = Option<Duration>;

/// A manual-reset event: once set it stays set until reset, and every
/// waiter is released.
pub(crate) struct Event {
    state: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set(&self) {
        *self.state() = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.state()
    }

    pub(crate) fn wait(&self, timeout: Timeout) -> JobResult {
        let guard = self.state();
        wait_until(&self.cond, guard, timeout, |set| *set).map(drop)
    }
}

/// Blocks on `cond` until `ready` holds for the guarded value or the
/// timeout elapses.
pub(crate) fn wait_until<'a, T>(
    cond: &Condvar,
    mut guard: MutexGuard<'a, T>,
    timeout: Timeout,
    mut ready: impl FnMut(&mut T) -> bool,
) -> JobResult<MutexGuard<'a, T>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if ready(&mut guard) {
            return Ok(guard);
        }
        guard = match deadline {
            None => cond.wait(guard).unwrap_or_else(|e| e.into_inner()),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(JobError::Timeout);
                }
                cond.wait_timeout(guard, deadline - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
        };
    }
}
