use std::{
    collections::btree_map::BTreeMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU32, Ordering},
    },
};

use kspin::{SpinNoIrq, SpinNoIrqGuard};
use weak_map::WeakMap;

use crate::{
    Access, Config, ConsoleId, CreationFlags, HandleFlags, HandleValue, Job, JobHandle,
    JobResult, Pid, Process, ProcessEntry, Snapshot, StartupInfo, Subsystem, Thread, job_err,
    process::{ProcessContext, ProcessImage},
};

/// The process and job tables of one system.
///
/// Every object created through a registry refers back to it weakly, so
/// independent registries never observe each other.
pub struct Registry {
    config: Config,
    next_id: AtomicU32,
    next_job_id: AtomicU32,
    next_console: AtomicU32,
    processes: SpinNoIrq<WeakMap<Pid, Weak<Process>>>,
    running: SpinNoIrq<BTreeMap<Pid, Arc<Process>>>,
    named_jobs: SpinNoIrq<WeakMap<String, Weak<Job>>>,
    tree: SpinNoIrq<()>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(config.first_pid),
            next_job_id: AtomicU32::new(1),
            next_console: AtomicU32::new(1),
            processes: SpinNoIrq::new(WeakMap::new()),
            running: SpinNoIrq::new(BTreeMap::new()),
            named_jobs: SpinNoIrq::new(WeakMap::new()),
            tree: SpinNoIrq::new(()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocates a process or thread id.
    pub(crate) fn next_id(&self) -> u32 {
        self.next_id.fetch_add(self.config.id_step, Ordering::Relaxed)
    }

    pub(crate) fn next_console(&self) -> ConsoleId {
        self.next_console.fetch_add(1, Ordering::Relaxed)
    }

    /// Serializes job membership changes against process exits.
    pub(crate) fn lock_tree(&self) -> SpinNoIrqGuard<'_, ()> {
        self.tree.lock()
    }

    /// Makes `process` visible to lookups. A process that already exited
    /// is not kept alive. Called under the tree lock, which orders this
    /// against the exit path.
    pub(crate) fn register(&self, process: &Arc<Process>) {
        self.processes.lock().insert(process.pid(), process);
        if !process.is_terminated() {
            self.running.lock().insert(process.pid(), process.clone());
        }
    }

    pub(crate) fn remove_running(&self, pid: Pid) -> Option<Arc<Process>> {
        self.running.lock().remove(&pid)
    }

    /// Creates a root process with a console, a running main thread and an
    /// empty handle table.
    pub fn new_init(self: &Arc<Self>, image: &str) -> Arc<Process> {
        let pid = self.next_id();
        let process = Process::new(
            self,
            pid,
            ProcessImage {
                path: image.to_owned(),
                command_line: image.to_owned(),
                subsystem: Subsystem::Console,
                flags: CreationFlags::empty(),
                startup: StartupInfo::new().with_title(image),
            },
            ProcessContext {
                parent_pid: None,
                environment: Vec::new(),
                current_directory: "/".to_owned(),
                console: Some(self.next_console()),
            },
        );
        self.register(&process);
        let thread = Thread::new(self.next_id(), process.clone(), true, false, None);
        process.add_main_thread(thread);
        process.launch(false);
        log::debug!("created root process {pid} ({image})");
        process
    }

    /// Creates a job, or opens the live job already carrying `name`.
    pub fn create_job(self: &Arc<Self>, name: Option<&str>) -> JobHandle {
        let Some(name) = name else {
            let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
            log::debug!("created job {id}");
            return JobHandle::new(Job::new(id, None, self), Access::ALL);
        };
        let mut named = self.named_jobs.lock();
        if let Some(job) = named.get(name) {
            return JobHandle::new(job, Access::ALL);
        }
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(id, Some(name.to_owned()), self);
        named.insert(name.to_owned(), &job);
        log::debug!("created job {id} ({name})");
        JobHandle::new(job, Access::ALL)
    }

    /// Opens a named job.
    pub fn open_job(&self, name: &str, access: Access) -> JobResult<JobHandle> {
        let job = self.named_jobs.lock().get(name);
        match job {
            Some(job) => Ok(JobHandle::new(job, access)),
            None => job_err!(NotFound, "no job named {name:?}"),
        }
    }

    /// Looks up a live or exited process record.
    pub fn find_by_pid(&self, pid: Pid) -> JobResult<Arc<Process>> {
        let process = self.processes.lock().get(&pid);
        match process {
            Some(process) => Ok(process),
            None => job_err!(NotFound, "no process {pid}"),
        }
    }

    /// Number of running processes.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Lists every process record still referenced, exited ones included.
    pub fn snapshot(&self) -> Snapshot {
        let processes: Vec<Arc<Process>> = self
            .processes
            .lock()
            .iter()
            .map(|(_, process)| process)
            .collect();
        Snapshot::new(processes.iter().map(|process| ProcessEntry {
            pid: process.pid(),
            parent_pid: process.parent_pid(),
            image: process.image().to_owned(),
            thread_count: process.thread_count(),
            state: process.state(),
        }))
    }

    /// Opens a handle to process `pid` in `caller`'s table.
    pub fn open_process(
        &self,
        caller: &Process,
        pid: Pid,
        access: Access,
        inherit: bool,
    ) -> JobResult<HandleValue> {
        let process = self.find_by_pid(pid)?;
        let flags = if inherit {
            HandleFlags::INHERIT
        } else {
            HandleFlags::empty()
        };
        caller.insert_handle(process, access, flags)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("running", &self.running.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
