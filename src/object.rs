use std::{fmt, sync::Arc};

use crate::{CompletionPort, JobHandle, JobResult, Process, Thread};

/// A byte stream owned by the hosting layer: a pipe, a file or a console
/// buffer.
///
/// The core only routes calls to it; errors are passed through unchanged.
pub trait Stream: Send + Sync {
    /// Reads into `buf`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8]) -> JobResult<usize>;

    /// Writes `buf`, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> JobResult<usize>;

    /// Whether the stream is a console buffer.
    fn is_console(&self) -> bool {
        false
    }
}

/// Discriminant of a [`KernelObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Process,
    Thread,
    Job,
    Port,
    Stream,
}

/// An object a handle can refer to.
///
/// Cloning shares the object. For jobs, a clone is an additional open
/// handle (see [`JobHandle`]).
#[derive(Clone)]
pub enum KernelObject {
    Process(Arc<Process>),
    Thread(Arc<Thread>),
    Job(JobHandle),
    Port(Arc<CompletionPort>),
    Stream(Arc<dyn Stream>),
}

impl KernelObject {
    /// The kind of object referred to.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Process(_) => ObjectKind::Process,
            Self::Thread(_) => ObjectKind::Thread,
            Self::Job(_) => ObjectKind::Job,
            Self::Port(_) => ObjectKind::Port,
            Self::Stream(_) => ObjectKind::Stream,
        }
    }

    /// Whether both values refer to the same underlying object.
    pub fn same_object(&self, other: &KernelObject) -> bool {
        match (self, other) {
            (Self::Process(a), Self::Process(b)) => Arc::ptr_eq(a, b),
            (Self::Thread(a), Self::Thread(b)) => Arc::ptr_eq(a, b),
            (Self::Job(a), Self::Job(b)) => Arc::ptr_eq(a.job(), b.job()),
            (Self::Port(a), Self::Port(b)) => Arc::ptr_eq(a, b),
            (Self::Stream(a), Self::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn is_console(&self) -> bool {
        matches!(self, Self::Stream(stream) if stream.is_console())
    }
}

impl fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(p) => write!(f, "Process({})", p.pid()),
            Self::Thread(t) => write!(f, "Thread({})", t.tid()),
            Self::Job(j) => write!(f, "Job({})", j.id()),
            Self::Port(_) => f.write_str("Port"),
            Self::Stream(s) if s.is_console() => f.write_str("Console"),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Arc<Process>> for KernelObject {
    fn from(process: Arc<Process>) -> Self {
        Self::Process(process)
    }
}

impl From<Arc<Thread>> for KernelObject {
    fn from(thread: Arc<Thread>) -> Self {
        Self::Thread(thread)
    }
}

impl From<JobHandle> for KernelObject {
    fn from(job: JobHandle) -> Self {
        Self::Job(job)
    }
}

impl From<Arc<CompletionPort>> for KernelObject {
    fn from(port: Arc<CompletionPort>) -> Self {
        Self::Port(port)
    }
}

impl From<Arc<dyn Stream>> for KernelObject {
    fn from(stream: Arc<dyn Stream>) -> Self {
        Self::Stream(stream)
    }
}
