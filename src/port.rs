use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use crate::{
    JobError, JobResult, Pid,
    wait::{Timeout, wait_until},
};

/// Kind of a job lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A process joined the job.
    NewProcess,
    /// A member process exited.
    ExitProcess,
    /// A member process exited with an error-severity code.
    AbnormalExit,
    /// The job's active process count dropped to zero.
    ActiveProcessZero,
}

/// A notification delivered through a [`CompletionPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionEvent {
    pub kind: EventKind,
    /// The key bound when the port was associated with the job.
    pub key: usize,
    /// The process concerned, or 0 for [`EventKind::ActiveProcessZero`].
    pub pid: Pid,
}

/// A FIFO queue of [`CompletionEvent`]s shared by any number of jobs.
pub struct CompletionPort {
    queue: Mutex<VecDeque<CompletionEvent>>,
    cond: Condvar,
}

impl CompletionPort {
    /// Creates an empty port.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        })
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<CompletionEvent>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends an event and wakes one waiter.
    pub fn post(&self, event: CompletionEvent) {
        log::trace!("post {:?}", event);
        self.queue().push_back(event);
        self.cond.notify_one();
    }

    /// Appends a batch of events atomically with respect to other posts.
    pub(crate) fn post_all(&self, events: impl IntoIterator<Item = CompletionEvent>) {
        let mut queue = self.queue();
        let before = queue.len();
        queue.extend(events);
        let posted = queue.len() - before;
        drop(queue);
        for _ in 0..posted {
            self.cond.notify_one();
        }
    }

    /// Dequeues the oldest event, blocking up to `timeout`.
    ///
    /// Returns [`JobError::Timeout`] if nothing arrived in time.
    pub fn wait(&self, timeout: Timeout) -> JobResult<CompletionEvent> {
        let guard = self.queue();
        let mut queue = wait_until(&self.cond, guard, timeout, |q| !q.is_empty())?;
        queue.pop_front().ok_or(JobError::Timeout)
    }

    /// Number of events waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }
}

impl fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPort")
            .field("pending", &self.pending())
            .finish()
    }
}
