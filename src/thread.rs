use std::{fmt, sync::Arc};

use kspin::SpinNoIrq;

use crate::{
    DebugEvent, JobResult, Process, ProcessState, ProcessorNumber, STILL_ACTIVE, Tid, job_err,
    wait::{Event, Timeout},
};

struct ThreadInner {
    suspend_count: u32,
    exit_code: Option<u32>,
}

/// A thread.
pub struct Thread {
    tid: Tid,
    process: Arc<Process>,
    main: bool,
    ideal_processor: Option<ProcessorNumber>,
    inner: SpinNoIrq<ThreadInner>,
    exited: Event,
}

impl Thread {
    pub(crate) fn new(
        tid: Tid,
        process: Arc<Process>,
        main: bool,
        suspended: bool,
        ideal_processor: Option<ProcessorNumber>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tid,
            process,
            main,
            ideal_processor,
            inner: SpinNoIrq::new(ThreadInner {
                suspend_count: suspended as u32,
                exit_code: None,
            }),
            exited: Event::new(),
        })
    }

    /// The [`Thread`] ID.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// The [`Process`] this thread belongs to.
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Whether this is the first thread of its process.
    pub fn is_main(&self) -> bool {
        self.main
    }

    pub fn ideal_processor(&self) -> Option<ProcessorNumber> {
        self.ideal_processor
    }

    pub fn suspend_count(&self) -> u32 {
        self.inner.lock().suspend_count
    }

    /// The exit code, or [`STILL_ACTIVE`] while the thread is alive.
    pub fn exit_code(&self) -> u32 {
        self.inner.lock().exit_code.unwrap_or(STILL_ACTIVE)
    }

    pub fn has_exited(&self) -> bool {
        self.inner.lock().exit_code.is_some()
    }

    /// Increments the suspend count, returning the previous one.
    pub fn suspend(&self) -> JobResult<u32> {
        let mut inner = self.inner.lock();
        if inner.exit_code.is_some() {
            return job_err!(AccessDenied, "thread {} has exited", self.tid);
        }
        let previous = inner.suspend_count;
        inner.suspend_count += 1;
        Ok(previous)
    }

    /// Decrements the suspend count, returning the previous one.
    ///
    /// The first time the main thread of a suspended process becomes
    /// runnable, the process starts running.
    pub fn resume(&self) -> JobResult<u32> {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.exit_code.is_some() {
                return job_err!(AccessDenied, "thread {} has exited", self.tid);
            }
            let previous = inner.suspend_count;
            inner.suspend_count = previous.saturating_sub(1);
            previous
        };
        if previous == 1 && self.main {
            self.process.start();
        }
        Ok(previous)
    }

    /// Waits for the thread to exit.
    pub fn wait(&self, timeout: Timeout) -> JobResult {
        self.exited.wait(timeout)
    }

    /// Exits the thread.
    ///
    /// Returns `true` if the thread was the last one of its process, which
    /// then exits with the same code. Fails while the process is not
    /// running, including while its debugger holds it.
    pub fn exit(&self, exit_code: u32) -> JobResult<bool> {
        if self.suspend_count() > 0 {
            return job_err!(AccessDenied, "thread {} is suspended", self.tid);
        }
        if self.process.state() != ProcessState::Running {
            return job_err!(AccessDenied, "process {} is not running", self.process.pid());
        }
        let Some(remaining) = self.process.remove_thread(self.tid) else {
            return job_err!(AccessDenied, "thread {} has exited", self.tid);
        };
        self.finish(exit_code);
        if remaining == 0 {
            self.process.end(exit_code);
            return Ok(true);
        }
        if let Some(debugger) = self.process.debugger() {
            self.process.hold();
            let event = DebugEvent::ExitThread {
                pid: self.process.pid(),
                tid: self.tid,
                exit_code,
            };
            debugger.report(event, Some(&self.process));
        }
        Ok(false)
    }

    /// Marks the thread exited. The first code recorded wins.
    pub(crate) fn finish(&self, exit_code: u32) {
        {
            let mut inner = self.inner.lock();
            if inner.exit_code.is_some() {
                return;
            }
            inner.exit_code = Some(exit_code);
        }
        self.exited.set();
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({}, process={})", self.tid, self.process.pid())
    }
}
