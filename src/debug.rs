use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
};

use crate::{
    JobResult, Pid, Process, Tid, job_err,
    wait::{Timeout, wait_until},
};

/// A lifecycle event of a debugged process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    CreateProcess { pid: Pid, tid: Tid, image: String },
    CreateThread { pid: Pid, tid: Tid },
    ExitThread { pid: Pid, tid: Tid, exit_code: u32 },
    ExitProcess { pid: Pid, tid: Tid, exit_code: u32 },
}

impl DebugEvent {
    /// The process the event belongs to.
    pub fn pid(&self) -> Pid {
        match *self {
            Self::CreateProcess { pid, .. }
            | Self::CreateThread { pid, .. }
            | Self::ExitThread { pid, .. }
            | Self::ExitProcess { pid, .. } => pid,
        }
    }

    /// The thread the event belongs to.
    pub fn tid(&self) -> Tid {
        match *self {
            Self::CreateProcess { tid, .. }
            | Self::CreateThread { tid, .. }
            | Self::ExitThread { tid, .. }
            | Self::ExitProcess { tid, .. } => tid,
        }
    }
}

/// How the debugger disposes of an acknowledged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueStatus {
    Continue,
    NotHandled,
}

struct Report {
    event: DebugEvent,
    /// The process held until the event is acknowledged.
    held: Option<Weak<Process>>,
}

struct DebugQueue {
    events: VecDeque<Report>,
    outstanding: Option<Report>,
}

impl DebugQueue {
    fn outstanding(&self) -> Option<(Pid, Tid)> {
        let report = self.outstanding.as_ref()?;
        Some((report.event.pid(), report.event.tid()))
    }
}

/// The channel through which a debugger receives the events of the
/// processes it created with
/// [`CreationFlags::DEBUG_ATTACH`](crate::CreationFlags::DEBUG_ATTACH).
///
/// Exactly one event is in flight at a time: the next one is delivered only
/// after [`continue_event`](Self::continue_event) acknowledged the previous.
/// A process stays [`Held`](crate::ProcessState::Held) until each of its
/// create and thread exit events has been acknowledged.
pub struct DebugPort {
    queue: Mutex<DebugQueue>,
    cond: Condvar,
}

impl DebugPort {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(DebugQueue {
                events: VecDeque::new(),
                outstanding: None,
            }),
            cond: Condvar::new(),
        })
    }

    fn queue(&self) -> MutexGuard<'_, DebugQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `event`. If `held` is given, that process was held for the
    /// event and is released when it is acknowledged.
    pub(crate) fn report(&self, event: DebugEvent, held: Option<&Arc<Process>>) {
        log::trace!("debug event {:?}", event);
        self.queue().events.push_back(Report {
            event,
            held: held.map(Arc::downgrade),
        });
        self.cond.notify_all();
    }

    /// Waits for the next event.
    pub fn wait_event(&self, timeout: Timeout) -> JobResult<DebugEvent> {
        let guard = self.queue();
        let mut queue = wait_until(&self.cond, guard, timeout, |q| {
            q.outstanding.is_none() && !q.events.is_empty()
        })?;
        let Some(report) = queue.events.pop_front() else {
            return job_err!(Timeout);
        };
        let event = report.event.clone();
        queue.outstanding = Some(report);
        Ok(event)
    }

    /// Acknowledges the event last returned by [`wait_event`](Self::wait_event).
    pub fn continue_event(&self, pid: Pid, tid: Tid, status: ContinueStatus) -> JobResult {
        let mut queue = self.queue();
        if queue.outstanding() != Some((pid, tid)) {
            return job_err!(InvalidParameter, "no outstanding debug event for {pid}:{tid}");
        }
        log::trace!("continue {pid}:{tid} with {:?}", status);
        let held = queue.outstanding.take().and_then(|report| report.held);
        drop(queue);
        if let Some(process) = held.as_ref().and_then(Weak::upgrade) {
            process.release();
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Number of events not delivered yet.
    pub fn pending(&self) -> usize {
        self.queue().events.len()
    }
}

impl fmt::Debug for DebugPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue();
        f.debug_struct("DebugPort")
            .field("pending", &queue.events.len())
            .field("outstanding", &queue.outstanding())
            .finish()
    }
}
