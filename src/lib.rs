//! Process creation and job object management.
//!
//! A [`Registry`] owns the process and job tables of one system. Processes
//! are created from a running process with a [`ProcessBuilder`], and grouped
//! into nested [`Job`]s that account for their members and report lifecycle
//! events through [`CompletionPort`]s.

mod attribute;
mod command_line;
mod config;
mod debug;
mod error;
mod flags;
mod handle;
mod job;
mod job_tree;
mod launcher;
mod loader;
mod object;
mod port;
mod process;
mod registry;
mod snapshot;
mod startup;
mod thread;
mod wait;

/// Process id.
pub type Pid = u32;
/// Thread id. Threads and processes share one id space.
pub type Tid = u32;
/// Job id.
pub type JobId = u32;
/// Console id.
pub type ConsoleId = u32;

/// Exit code reported for a thread or process that has not exited.
pub const STILL_ACTIVE: u32 = 259;

pub use attribute::{Attribute, AttributeList, ProcessorNumber, keys as attribute_keys};
pub use config::Config;
pub use debug::{ContinueStatus, DebugEvent, DebugPort};
pub use error::{JobError, JobResult};
pub use flags::{Access, CreationFlags, DuplicateOptions, HandleFlags, LimitFlags, StartupFlags};
pub use handle::{HandleEntry, HandleTable, HandleValue};
pub use job::{Job, JobAccounting, JobHandle, JobInfoClass, JobInformation};
pub use launcher::{ProcessBuilder, ProcessInformation};
pub use loader::{ImageInfo, Loader, StaticLoader, Subsystem};
pub use object::{KernelObject, ObjectKind, Stream};
pub use port::{CompletionEvent, CompletionPort, EventKind};
pub use process::{Process, ProcessState};
pub use registry::Registry;
pub use snapshot::{ProcessEntry, Snapshot};
pub use startup::{StartupInfo, StdHandle};
pub use thread::Thread;
pub use wait::Timeout;
