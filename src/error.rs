use thiserror::Error;

/// Errors returned by process and job operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    /// A named job, a process id or an image could not be found.
    #[error("object not found")]
    NotFound,
    /// Insufficient rights, an exited process, or a job chain conflict.
    #[error("access denied")]
    AccessDenied,
    /// Malformed flags or an out-of-range argument.
    #[error("invalid parameter")]
    InvalidParameter,
    /// The caller's buffer is too small; `required` bytes are needed.
    #[error("insufficient buffer, {required} bytes required")]
    InsufficientBuffer { required: usize },
    /// A fixed-size structure was given the wrong size.
    #[error("bad length")]
    BadLength,
    /// Unknown attribute key or a feature this host lacks.
    #[error("not supported")]
    NotSupported,
    /// Stale, wrong-type or synthetic handle value.
    #[error("invalid handle")]
    InvalidHandle,
    /// The working directory override does not name a directory.
    #[error("invalid directory")]
    InvalidDirectory,
    /// The attribute was already registered in this list.
    #[error("already exists")]
    AlreadyExists,
    /// A wait elapsed before the object became ready.
    #[error("wait timed out")]
    Timeout,
    /// An external collaborator failed with its own error code.
    #[error("external service failed with code {0:#x}")]
    External(u32),
}

/// A [`Result`] with [`JobError`] as the error type.
pub type JobResult<T = ()> = Result<T, JobError>;

/// Logs the failure context and evaluates to `Err(JobError::$kind)`.
#[macro_export]
macro_rules! job_err {
    ($kind:ident) => {
        $crate::job_err!($kind, "")
    };
    ($kind:ident, $($arg:tt)+) => {{
        ::log::debug!("[JobError::{}] {}", stringify!($kind), format_args!($($arg)+));
        Err($crate::JobError::$kind)
    }};
}
