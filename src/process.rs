use std::{
    collections::btree_map::BTreeMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use kspin::SpinNoIrq;

use crate::{
    Access, ConsoleId, CreationFlags, DebugEvent, DebugPort, DuplicateOptions, HandleEntry,
    HandleFlags, HandleTable, HandleValue, Job, JobHandle, JobResult, KernelObject, ObjectKind, Pid,
    Registry, STILL_ACTIVE, StartupInfo, StdHandle, Stream, Subsystem, Thread, Tid, job_err,
    wait::{Event, Timeout},
};

/// Lifecycle state of a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Being set up by the launcher.
    Created,
    /// Created with a non-runnable main thread.
    Suspended,
    Running,
    /// Stopped until its debugger acknowledges every event it reported.
    Held,
    Terminated,
}

/// Immutable facts about a process, fixed at creation.
pub(crate) struct ProcessImage {
    pub(crate) path: String,
    pub(crate) command_line: String,
    pub(crate) subsystem: Subsystem,
    pub(crate) flags: CreationFlags,
    pub(crate) startup: StartupInfo,
}

/// Inheritable environment of a process.
pub(crate) struct ProcessContext {
    pub(crate) parent_pid: Option<Pid>,
    pub(crate) environment: Vec<(String, String)>,
    pub(crate) current_directory: String,
    pub(crate) console: Option<ConsoleId>,
}

struct ProcessInner {
    state: ProcessState,
    exit_code: u32,
    context: ProcessContext,
    jobs: Vec<Weak<Job>>,
    threads: BTreeMap<Tid, Arc<Thread>>,
    main_tid: Option<Tid>,
    std_handles: [HandleValue; 3],
    debugger: Option<Arc<DebugPort>>,
    debug_port: Option<Arc<DebugPort>>,
    /// Debug events reported but not acknowledged yet.
    debug_holds: u32,
    /// The state a held process returns to.
    resume_state: ProcessState,
}

impl ProcessInner {
    fn hold(&mut self) {
        self.debug_holds += 1;
        if matches!(self.state, ProcessState::Running | ProcessState::Suspended) {
            self.resume_state = self.state;
            self.state = ProcessState::Held;
        }
    }
}

/// What a terminating process hands back for teardown outside its lock.
struct Teardown {
    jobs: Vec<Arc<Job>>,
    threads: Vec<Arc<Thread>>,
    main_tid: Tid,
    debugger: Option<Arc<DebugPort>>,
}

/// A process.
pub struct Process {
    pid: Pid,
    registry: Weak<Registry>,
    image: ProcessImage,
    handles: HandleTable,
    inner: SpinNoIrq<ProcessInner>,
    imports_resolved: AtomicBool,
    exited: Event,
}

impl Process {
    pub(crate) fn new(
        registry: &Arc<Registry>,
        pid: Pid,
        image: ProcessImage,
        context: ProcessContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid,
            registry: Arc::downgrade(registry),
            image,
            handles: HandleTable::new(registry.config().max_handles),
            inner: SpinNoIrq::new(ProcessInner {
                state: ProcessState::Created,
                exit_code: STILL_ACTIVE,
                context,
                jobs: Vec::new(),
                threads: BTreeMap::new(),
                main_tid: None,
                std_handles: [HandleValue::NULL; 3],
                debugger: None,
                debug_port: None,
                debug_holds: 0,
                resume_state: ProcessState::Created,
            }),
            imports_resolved: AtomicBool::new(false),
            exited: Event::new(),
        })
    }

    pub(crate) fn registry(&self) -> JobResult<Arc<Registry>> {
        match self.registry.upgrade() {
            Some(registry) => Ok(registry),
            None => job_err!(InvalidHandle, "registry of process {} is gone", self.pid),
        }
    }

    /// The [`Process`] ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The ID of the process this one was created under, if any.
    pub fn parent_pid(&self) -> Option<Pid> {
        self.inner.lock().context.parent_pid
    }

    /// Path of the executable image.
    pub fn image(&self) -> &str {
        &self.image.path
    }

    pub fn command_line(&self) -> &str {
        &self.image.command_line
    }

    pub fn subsystem(&self) -> Subsystem {
        self.image.subsystem
    }

    pub fn creation_flags(&self) -> CreationFlags {
        self.image.flags
    }

    /// The startup record the process was created with.
    pub fn startup(&self) -> &StartupInfo {
        &self.image.startup
    }

    pub fn is_debug_attached(&self) -> bool {
        self.image.flags.contains(CreationFlags::DEBUG_ATTACH)
    }

    /// Whether the process has run far enough to resolve its imports.
    pub fn imports_resolved(&self) -> bool {
        self.imports_resolved.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ProcessState::Terminated
    }

    /// The exit code, or [`STILL_ACTIVE`] while the process is alive.
    pub fn exit_code(&self) -> u32 {
        self.inner.lock().exit_code
    }

    pub fn environment(&self) -> Vec<(String, String)> {
        self.inner.lock().context.environment.clone()
    }

    /// Looks up one environment variable.
    pub fn env_var(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .context
            .environment
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub fn set_env_var(&self, name: &str, value: &str) {
        let mut inner = self.inner.lock();
        let environment = &mut inner.context.environment;
        match environment.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value.to_owned(),
            None => environment.push((name.to_owned(), value.to_owned())),
        }
    }

    pub fn current_directory(&self) -> String {
        self.inner.lock().context.current_directory.clone()
    }

    /// The console the process is attached to.
    pub fn console(&self) -> Option<ConsoleId> {
        self.inner.lock().context.console
    }

    /// A snapshot of the inheritable context, for a child.
    pub(crate) fn context(&self) -> ProcessContext {
        let inner = self.inner.lock();
        ProcessContext {
            parent_pid: Some(self.pid),
            environment: inner.context.environment.clone(),
            current_directory: inner.context.current_directory.clone(),
            console: inner.context.console,
        }
    }

    /// The handle table of the process.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }
}

/// Threads
impl Process {
    /// Live threads, in id order.
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.inner.lock().threads.values().cloned().collect()
    }

    pub fn thread_count(&self) -> usize {
        self.inner.lock().threads.len()
    }

    /// The first thread, while it is alive.
    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        let inner = self.inner.lock();
        inner.main_tid.and_then(|tid| inner.threads.get(&tid).cloned())
    }

    pub(crate) fn add_main_thread(&self, thread: Arc<Thread>) {
        let mut inner = self.inner.lock();
        inner.main_tid = Some(thread.tid());
        inner.threads.insert(thread.tid(), thread);
    }

    /// Removes a thread, returning how many remain.
    pub(crate) fn remove_thread(&self, tid: Tid) -> Option<usize> {
        let mut inner = self.inner.lock();
        inner.threads.remove(&tid)?;
        Some(inner.threads.len())
    }

    /// Creates an additional thread.
    pub fn create_thread(self: &Arc<Self>, suspended: bool) -> JobResult<Arc<Thread>> {
        let registry = self.registry()?;
        let tid = registry.next_id();
        let thread = Thread::new(tid, self.clone(), false, suspended, None);
        let debugger = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, ProcessState::Terminated | ProcessState::Held) {
                return job_err!(AccessDenied, "process {} is {:?}", self.pid, inner.state);
            }
            inner.threads.insert(tid, thread.clone());
            if inner.debugger.is_some() {
                inner.hold();
            }
            inner.debugger.clone()
        };
        if let Some(debugger) = debugger {
            debugger.report(DebugEvent::CreateThread { pid: self.pid, tid }, Some(self));
        }
        log::debug!("process {} created thread {tid}", self.pid);
        Ok(thread)
    }

    /// Moves a suspended process to running. Called on the first resume of
    /// its main thread.
    pub(crate) fn start(&self) {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            ProcessState::Suspended => {
                self.set_state(&mut inner, ProcessState::Running);
                log::debug!("process {} resumed", self.pid);
            }
            ProcessState::Held if inner.resume_state == ProcessState::Suspended => {
                inner.resume_state = ProcessState::Running;
            }
            _ => {}
        }
    }

    /// Leaves the `Created` state once the launcher is done. A process with
    /// unacknowledged debug events is held instead.
    pub(crate) fn launch(&self, suspended: bool) {
        let mut inner = self.inner.lock();
        if inner.state != ProcessState::Created {
            return;
        }
        let state = if suspended {
            ProcessState::Suspended
        } else {
            ProcessState::Running
        };
        if inner.debug_holds > 0 {
            inner.resume_state = state;
            inner.state = ProcessState::Held;
        } else {
            self.set_state(&mut inner, state);
        }
    }

    fn set_state(&self, inner: &mut ProcessInner, state: ProcessState) {
        if state == ProcessState::Running {
            self.imports_resolved.store(true, Ordering::Release);
        }
        inner.state = state;
    }
}

/// Jobs
impl Process {
    /// The jobs the process belongs to, innermost first.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.inner.lock().jobs.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn set_jobs(&self, chain: &[Arc<Job>]) {
        self.inner.lock().jobs = chain.iter().map(Arc::downgrade).collect();
    }

    /// Whether the process belongs to `job`, or to any job for `None`.
    pub fn is_in_job(&self, job: Option<&Job>) -> bool {
        match job {
            Some(job) => job.is_member(self),
            None => !self.jobs().is_empty(),
        }
    }
}

/// Debugging
impl Process {
    /// The port receiving this process's debug events, if it is debugged.
    pub fn debugger(&self) -> Option<Arc<DebugPort>> {
        self.inner.lock().debugger.clone()
    }

    /// Makes `port` the debugger of a process that has not exited. The
    /// process is held until the debugger acknowledges its first event.
    pub(crate) fn attach_debugger(&self, port: Arc<DebugPort>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ProcessState::Terminated {
            return false;
        }
        inner.debugger = Some(port);
        inner.hold();
        true
    }

    /// Holds the process for one more debug event.
    pub(crate) fn hold(&self) {
        self.inner.lock().hold();
    }

    /// Takes back one hold. The process continues once none is left.
    pub(crate) fn release(&self) {
        let mut inner = self.inner.lock();
        inner.debug_holds = inner.debug_holds.saturating_sub(1);
        if inner.debug_holds == 0 && inner.state == ProcessState::Held {
            let state = inner.resume_state;
            self.set_state(&mut inner, state);
            log::debug!("process {} continues as {:?}", self.pid, state);
        }
    }

    /// The port through which this process debugs its children.
    pub fn debug_port(&self) -> Option<Arc<DebugPort>> {
        self.inner.lock().debug_port.clone()
    }

    pub(crate) fn debug_port_or_create(&self) -> Arc<DebugPort> {
        self.inner
            .lock()
            .debug_port
            .get_or_insert_with(DebugPort::new)
            .clone()
    }
}

/// Exit
impl Process {
    /// Exits the process of its own accord.
    ///
    /// Only a running process can exit; a suspended or held one can only be
    /// terminated.
    pub fn exit(self: &Arc<Self>, exit_code: u32) -> JobResult {
        let state = self.state();
        if state != ProcessState::Running {
            return job_err!(AccessDenied, "process {} is {:?}", self.pid, state);
        }
        self.end(exit_code);
        Ok(())
    }

    /// Forcibly ends the process.
    ///
    /// Returns `false` if the process had already exited, in which case its
    /// earlier exit code stands.
    pub fn terminate(self: &Arc<Self>, exit_code: u32) -> bool {
        self.end(exit_code)
    }

    /// Waits for the process to exit.
    pub fn wait(&self, timeout: Timeout) -> JobResult {
        self.exited.wait(timeout)
    }

    fn mark_terminated(&self, exit_code: u32) -> Option<Teardown> {
        let mut inner = self.inner.lock();
        if inner.state == ProcessState::Terminated {
            return None;
        }
        inner.state = ProcessState::Terminated;
        inner.exit_code = exit_code;
        let threads = core::mem::take(&mut inner.threads);
        Some(Teardown {
            jobs: inner.jobs.iter().filter_map(Weak::upgrade).collect(),
            threads: threads.into_values().collect(),
            main_tid: inner.main_tid.unwrap_or_default(),
            debugger: inner.debugger.clone(),
        })
    }

    /// Runs the exit path. Members of jobs that die on abnormal exits are
    /// ended in the same pass.
    pub(crate) fn end(self: &Arc<Self>, exit_code: u32) -> bool {
        let registry = self.registry.upgrade();
        let mut released: Vec<HandleEntry> = Vec::new();
        let mut graveyard: Vec<Arc<Process>> = Vec::new();
        let mut first = false;
        {
            let _tree = registry.as_deref().map(Registry::lock_tree);
            let mut pending = vec![(self.clone(), exit_code)];
            while let Some((process, exit_code)) = pending.pop() {
                let Some(teardown) = process.mark_terminated(exit_code) else {
                    graveyard.push(process);
                    continue;
                };
                first |= Arc::ptr_eq(&process, self);
                log::debug!("process {} exited with {exit_code:#x}", process.pid);

                for thread in &teardown.threads {
                    thread.finish(exit_code);
                }
                if let Some(registry) = &registry {
                    graveyard.extend(registry.remove_running(process.pid));
                }
                for job in &teardown.jobs {
                    let victims = job.leave(process.pid, exit_code);
                    pending.extend(victims.into_iter().map(|victim| (victim, exit_code)));
                }
                if let Some(debugger) = &teardown.debugger {
                    let event = DebugEvent::ExitProcess {
                        pid: process.pid,
                        tid: teardown.main_tid,
                        exit_code,
                    };
                    debugger.report(event, None);
                }
                process.exited.set();
                released.extend(process.handles.take_all());
                graveyard.push(process);
            }
        }
        drop(released);
        drop(graveyard);
        first
    }
}

/// Handles
impl Process {
    /// Resolves a handle value, including pseudo-handles.
    pub fn resolve_handle(self: &Arc<Self>, value: HandleValue) -> JobResult<HandleEntry> {
        match value {
            HandleValue::CURRENT_PROCESS => Ok(HandleEntry::new(
                self.clone(),
                Access::ALL,
                HandleFlags::empty(),
            )),
            HandleValue::CURRENT_THREAD => match self.main_thread() {
                Some(thread) => Ok(HandleEntry::new(thread, Access::ALL, HandleFlags::empty())),
                None => job_err!(InvalidHandle, "process {} has no main thread", self.pid),
            },
            value => self.handles.get(value),
        }
    }

    /// Resolves `value` to a process, requiring `access`.
    pub fn process_from_handle(
        self: &Arc<Self>,
        value: HandleValue,
        access: Access,
    ) -> JobResult<Arc<Process>> {
        match self.resolve_handle(value)?.require(ObjectKind::Process, access)? {
            KernelObject::Process(process) => Ok(process.clone()),
            _ => job_err!(InvalidHandle),
        }
    }

    /// Resolves `value` to a thread, requiring `access`.
    pub fn thread_from_handle(
        self: &Arc<Self>,
        value: HandleValue,
        access: Access,
    ) -> JobResult<Arc<Thread>> {
        match self.resolve_handle(value)?.require(ObjectKind::Thread, access)? {
            KernelObject::Thread(thread) => Ok(thread.clone()),
            _ => job_err!(InvalidHandle),
        }
    }

    /// Resolves `value` to a job, requiring `access`.
    pub fn job_from_handle(
        self: &Arc<Self>,
        value: HandleValue,
        access: Access,
    ) -> JobResult<JobHandle> {
        let entry = self.resolve_handle(value)?;
        match entry.require(ObjectKind::Job, access)? {
            KernelObject::Job(job) => Ok(JobHandle::new(job.job().clone(), entry.access)),
            _ => job_err!(InvalidHandle),
        }
    }

    /// Resolves `value` to a stream.
    pub fn stream_from_handle(self: &Arc<Self>, value: HandleValue) -> JobResult<Arc<dyn Stream>> {
        match self.resolve_handle(value)?.require(ObjectKind::Stream, Access::empty())? {
            KernelObject::Stream(stream) => Ok(stream.clone()),
            _ => job_err!(InvalidHandle),
        }
    }

    /// Opens a handle to `object` in this process.
    pub fn insert_handle(
        &self,
        object: impl Into<KernelObject>,
        access: Access,
        flags: HandleFlags,
    ) -> JobResult<HandleValue> {
        self.handles.insert(HandleEntry::new(object, access, flags))
    }

    /// Closes a handle. Closing a pseudo-handle does nothing.
    pub fn close_handle(&self, value: HandleValue) -> JobResult {
        if value.is_pseudo() {
            return Ok(());
        }
        let entry = self.handles.remove(value)?;
        log::trace!("process {} closed {:?}", self.pid, value);
        drop(entry);
        Ok(())
    }

    /// Copies a handle between processes.
    ///
    /// `source_process` and `target_process` are resolved in this process
    /// and need [`Access::DUP_HANDLE`].
    pub fn duplicate_handle(
        self: &Arc<Self>,
        source_process: HandleValue,
        value: HandleValue,
        target_process: HandleValue,
        access: Access,
        inherit: bool,
        options: DuplicateOptions,
    ) -> JobResult<HandleValue> {
        let source = self.process_from_handle(source_process, Access::DUP_HANDLE)?;
        let target = self.process_from_handle(target_process, Access::DUP_HANDLE)?;
        let entry = source.resolve_handle(value)?;

        let access = if options.contains(DuplicateOptions::SAME_ACCESS) {
            entry.access
        } else {
            access
        };
        let flags = if options.contains(DuplicateOptions::SAME_ATTRIBUTES) {
            entry.flags
        } else if inherit {
            HandleFlags::INHERIT
        } else {
            HandleFlags::empty()
        };
        let protected = entry.flags.contains(HandleFlags::PROTECT_FROM_CLOSE);
        let close_source = options.contains(DuplicateOptions::CLOSE_SOURCE) && !value.is_pseudo();
        let duplicate = HandleEntry {
            object: entry.object.clone(),
            access,
            flags,
        };

        if close_source && !protected && Arc::ptr_eq(&source, &target) {
            drop(source.handles.replace(value, duplicate));
            return Ok(value);
        }
        let new_value = target.handles.insert(duplicate)?;
        if close_source && !protected {
            drop(source.handles.remove(value));
        }
        log::trace!(
            "duplicated {:?} of process {} to {:?} of process {}",
            value,
            source.pid,
            new_value,
            target.pid
        );
        Ok(new_value)
    }

    /// Writes to the stream behind `value`.
    pub fn write_handle(self: &Arc<Self>, value: HandleValue, buf: &[u8]) -> JobResult<usize> {
        self.stream_from_handle(value)?.write(buf)
    }

    /// Reads from the stream behind `value`.
    pub fn read_handle(self: &Arc<Self>, value: HandleValue, buf: &mut [u8]) -> JobResult<usize> {
        self.stream_from_handle(value)?.read(buf)
    }

    /// The current value of a standard handle slot.
    pub fn std_handle(&self, slot: StdHandle) -> HandleValue {
        self.inner.lock().std_handles[slot as usize]
    }

    pub fn set_std_handle(&self, slot: StdHandle, value: HandleValue) {
        self.inner.lock().std_handles[slot as usize] = value;
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("image", &self.image.path)
            .field("state", &inner.state)
            .field("exit_code", &inner.exit_code)
            .finish()
    }
}
