use std::{
    collections::btree_map::BTreeMap,
    fmt,
    ops::Deref,
    sync::{Arc, Weak},
};

use kspin::SpinNoIrq;
use lazyinit::LazyInit;

use crate::{
    Access, CompletionEvent, CompletionPort, EventKind, JobError, JobId, JobResult, LimitFlags, Pid,
    Process, Registry, job_err,
    wait::{Event, Timeout},
};

/// Exit codes with both severity bits set count as abnormal.
const ERROR_SEVERITY: u32 = 0xC000_0000;

pub(crate) fn is_abnormal(exit_code: u32) -> bool {
    exit_code & ERROR_SEVERITY == ERROR_SEVERITY
}

/// Accounting counters of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobAccounting {
    /// Processes ever assigned. Never decreases.
    pub total: u32,
    /// Processes currently running in the job.
    pub active: u32,
    /// Processes that exited while in the job.
    pub terminated: u32,
}

/// Information classes accepted by [`JobHandle::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobInfoClass {
    BasicAccounting,
    BasicLimit,
    ExtendedLimit,
    BasicProcessIdList,
}

impl JobInfoClass {
    const ACCOUNTING_SIZE: usize = 48;
    const BASIC_LIMIT_SIZE: usize = 64;
    const EXTENDED_LIMIT_SIZE: usize = 144;
    const ID_LIST_HEADER: usize = 8;
    const ID_SIZE: usize = 8;

    /// Bytes of the fixed-size record, or of the header for id lists.
    pub fn base_size(self) -> usize {
        match self {
            Self::BasicAccounting => Self::ACCOUNTING_SIZE,
            Self::BasicLimit => Self::BASIC_LIMIT_SIZE,
            Self::ExtendedLimit => Self::EXTENDED_LIMIT_SIZE,
            Self::BasicProcessIdList => Self::ID_LIST_HEADER,
        }
    }

    /// Bytes needed to list `count` process ids.
    pub fn id_list_size(count: usize) -> usize {
        Self::ID_LIST_HEADER + count * Self::ID_SIZE
    }
}

/// The result of a [`JobHandle::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInformation {
    BasicAccounting(JobAccounting),
    BasicLimit(LimitFlags),
    ExtendedLimit(LimitFlags),
    BasicProcessIdList(Vec<Pid>),
}

struct JobInner {
    processes: BTreeMap<Pid, Weak<Process>>,
    accounting: JobAccounting,
    limits: LimitFlags,
    port: Option<(Arc<CompletionPort>, usize)>,
    handles: usize,
    zero_transitions: u32,
}

impl JobInner {
    fn post(&self, kind: EventKind, pid: Pid) {
        if let Some((port, key)) = &self.port {
            port.post(CompletionEvent {
                kind,
                key: *key,
                pid,
            });
        }
    }
}

/// A job object: a group of processes sharing limits, accounting and
/// notifications.
///
/// Jobs nest. A job's parent is set at most once and every member of a job
/// is also a member of all of its ancestors.
pub struct Job {
    id: JobId,
    name: Option<String>,
    registry: Weak<Registry>,
    parent: LazyInit<Arc<Job>>,
    inner: SpinNoIrq<JobInner>,
    signal: Event,
}

impl Job {
    pub(crate) fn new(id: JobId, name: Option<String>, registry: &Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            registry: Arc::downgrade(registry),
            parent: LazyInit::new(),
            inner: SpinNoIrq::new(JobInner {
                processes: BTreeMap::new(),
                accounting: JobAccounting::default(),
                limits: LimitFlags::empty(),
                port: None,
                handles: 0,
                zero_transitions: 0,
            }),
            signal: Event::new(),
        })
    }

    /// The [`Job`] ID.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The name the job was created with.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The parent [`Job`], if the job is nested.
    pub fn parent(&self) -> Option<Arc<Job>> {
        self.parent.get().cloned()
    }

    /// Sets the parent. Must be called with the job tree locked.
    pub(crate) fn set_parent(&self, parent: &Arc<Job>) -> bool {
        if self.parent.is_inited() {
            return false;
        }
        self.parent.init_once(parent.clone());
        true
    }

    /// The job itself followed by its ancestors, innermost first.
    pub(crate) fn lineage(self: &Arc<Self>) -> Vec<Arc<Job>> {
        let mut lineage = vec![self.clone()];
        let mut current = self.parent();
        while let Some(job) = current {
            current = job.parent();
            lineage.push(job);
        }
        lineage
    }

    pub fn accounting(&self) -> JobAccounting {
        self.inner.lock().accounting
    }

    pub fn limits(&self) -> LimitFlags {
        self.inner.lock().limits
    }

    /// Ids of the processes currently running in the job.
    pub fn processes(&self) -> Vec<Pid> {
        self.inner.lock().processes.keys().copied().collect()
    }

    /// Whether `process` was ever assigned to this job.
    pub fn is_member(&self, process: &Process) -> bool {
        process.jobs().iter().any(|job| core::ptr::eq(job.as_ref(), self))
    }

    /// Whether the active count has dropped to zero at least once.
    pub fn is_signaled(&self) -> bool {
        self.signal.is_set()
    }

    /// Number of times the active count dropped to zero.
    pub fn zero_transitions(&self) -> u32 {
        self.inner.lock().zero_transitions
    }

    /// Open [`JobHandle`]s to this job.
    pub fn handle_count(&self) -> usize {
        self.inner.lock().handles
    }

    /// Records a new member and notifies the associated port.
    pub(crate) fn join(&self, process: &Arc<Process>) {
        let pid = process.pid();
        let mut inner = self.inner.lock();
        inner.processes.insert(pid, Arc::downgrade(process));
        inner.accounting.total += 1;
        inner.accounting.active += 1;
        inner.post(EventKind::NewProcess, pid);
        log::debug!("process {pid} joined job {}", self.id);
    }

    /// Records the exit of a member.
    ///
    /// Returns the members to kill as a consequence of the exit.
    pub(crate) fn leave(&self, pid: Pid, exit_code: u32) -> Vec<Arc<Process>> {
        let mut inner = self.inner.lock();
        if inner.processes.remove(&pid).is_none() {
            return Vec::new();
        }
        inner.accounting.active -= 1;
        inner.accounting.terminated += 1;

        let abnormal = is_abnormal(exit_code);
        let kind = if abnormal {
            EventKind::AbnormalExit
        } else {
            EventKind::ExitProcess
        };
        inner.post(kind, pid);

        if inner.accounting.active == 0 {
            inner.zero_transitions += 1;
            inner.post(EventKind::ActiveProcessZero, 0);
            self.signal.set();
            log::debug!("job {} has no active process", self.id);
        }

        if abnormal && inner.limits.contains(LimitFlags::DIE_ON_UNHANDLED_EXCEPTION) {
            inner.processes.values().filter_map(Weak::upgrade).collect()
        } else {
            Vec::new()
        }
    }

    fn members(&self) -> Vec<Arc<Process>> {
        self.inner
            .lock()
            .processes
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn kill_members(&self, exit_code: u32) {
        for process in self.members() {
            if !process.terminate(exit_code) {
                log::warn!("process {} exited before job {} killed it", process.pid(), self.id);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent.get().map(|p| p.id))
            .field("accounting", &inner.accounting)
            .field("limits", &inner.limits)
            .finish()
    }
}

/// An open handle to a [`Job`].
///
/// Cloning opens another handle and dropping closes it. Closing the last
/// handle of a job with [`LimitFlags::KILL_ON_JOB_CLOSE`] terminates every
/// member.
pub struct JobHandle {
    job: Arc<Job>,
    access: Access,
}

impl JobHandle {
    pub(crate) fn new(job: Arc<Job>, access: Access) -> Self {
        job.inner.lock().handles += 1;
        Self { job, access }
    }

    /// The [`Job`] this handle refers to.
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Opens another handle with a subset of this handle's rights.
    pub fn reopen(&self, access: Access) -> JobResult<JobHandle> {
        if !self.access.contains(access) {
            return job_err!(AccessDenied, "cannot widen {:?} to {:?}", self.access, access);
        }
        Ok(Self::new(self.job.clone(), access))
    }

    fn check(&self, access: Access) -> JobResult {
        if self.access.contains(access) {
            Ok(())
        } else {
            job_err!(AccessDenied, "job {} handle lacks {:?}", self.job.id, access)
        }
    }

    /// Assigns `process` to the job.
    pub fn assign(&self, process: &Arc<Process>) -> JobResult {
        self.check(Access::ASSIGN_PROCESS)?;
        let registry = process.registry()?;
        crate::job_tree::assign(&registry, process, &self.job)
    }

    /// Reads one information class into a buffer of `buf_len` bytes.
    ///
    /// Returns the information and the number of bytes it occupies.
    pub fn query(
        &self,
        class: JobInfoClass,
        buf_len: usize,
    ) -> JobResult<(JobInformation, usize)> {
        self.check(Access::QUERY)?;
        let needed = class.base_size();
        if buf_len < needed {
            return job_err!(BadLength, "{:?} needs {needed} bytes, got {buf_len}", class);
        }
        let inner = self.job.inner.lock();
        let info = match class {
            JobInfoClass::BasicAccounting => JobInformation::BasicAccounting(inner.accounting),
            JobInfoClass::BasicLimit => JobInformation::BasicLimit(inner.limits),
            JobInfoClass::ExtendedLimit => JobInformation::ExtendedLimit(inner.limits),
            JobInfoClass::BasicProcessIdList => {
                let required = JobInfoClass::id_list_size(inner.processes.len());
                if buf_len < required {
                    log::debug!("[JobError::InsufficientBuffer] id list needs {required} bytes");
                    return Err(JobError::InsufficientBuffer { required });
                }
                let pids = inner.processes.keys().copied().collect();
                return Ok((JobInformation::BasicProcessIdList(pids), required));
            }
        };
        Ok((info, class.base_size()))
    }

    /// Replaces the limit flags.
    pub fn set_limits(&self, limits: LimitFlags) -> JobResult {
        self.check(Access::SET_ATTRIBUTES)?;
        if LimitFlags::from_bits(limits.bits()).is_none() {
            return job_err!(InvalidParameter, "unknown limit bits {:#x}", limits.bits());
        }
        self.job.inner.lock().limits = limits;
        log::debug!("job {} limits set to {:?}", self.job.id, limits);
        Ok(())
    }

    /// Terminates every running member with `exit_code`.
    pub fn terminate(&self, exit_code: u32) -> JobResult {
        self.check(Access::TERMINATE)?;
        log::debug!("terminating job {} with {exit_code:#x}", self.job.id);
        self.job.kill_members(exit_code);
        Ok(())
    }

    /// Binds the job to a completion port under `key`, or clears the
    /// binding with `None`.
    ///
    /// Every running member is reported to a newly bound port as
    /// [`EventKind::NewProcess`].
    pub fn associate_completion_port(
        &self,
        port: Option<(Arc<CompletionPort>, usize)>,
    ) -> JobResult {
        self.check(Access::SET_ATTRIBUTES)?;
        let mut inner = self.job.inner.lock();
        let Some((port, key)) = port else {
            inner.port = None;
            return Ok(());
        };
        if inner.port.is_some() {
            return job_err!(InvalidParameter, "job {} already has a port", self.job.id);
        }
        port.post_all(inner.processes.keys().map(|&pid| CompletionEvent {
            kind: EventKind::NewProcess,
            key,
            pid,
        }));
        inner.port = Some((port, key));
        log::debug!("job {} bound to port with key {key:#x}", self.job.id);
        Ok(())
    }

    /// Waits until the active count has dropped to zero.
    pub fn wait(&self, timeout: Timeout) -> JobResult {
        self.check(Access::SYNCHRONIZE)?;
        self.job.signal.wait(timeout)
    }
}

impl Deref for JobHandle {
    type Target = Job;

    fn deref(&self) -> &Job {
        &self.job
    }
}

impl Clone for JobHandle {
    fn clone(&self) -> Self {
        Self::new(self.job.clone(), self.access)
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        let kill = {
            let mut inner = self.job.inner.lock();
            inner.handles -= 1;
            inner.handles == 0 && inner.limits.contains(LimitFlags::KILL_ON_JOB_CLOSE)
        };
        if kill {
            let exit_code = self
                .job
                .registry
                .upgrade()
                .map_or(0, |registry| registry.config().kill_exit_code);
            log::debug!("last handle of job {} closed, killing members", self.job.id);
            self.job.kill_members(exit_code);
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobHandle({}, {:?})", self.job.id, self.access)
    }
}
