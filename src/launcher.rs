use std::sync::Arc;

use crate::{
    Access, AttributeList, CreationFlags, DebugEvent, HandleFlags, HandleValue, ImageInfo,
    Job, JobHandle, JobResult, Loader, Process, ProcessorNumber, Registry, StartupInfo, StdHandle,
    Stream, Subsystem, Thread,
    command_line::image_candidates,
    job_err, job_tree,
    process::ProcessImage,
    startup::StdHandleSources,
};

/// What [`ProcessBuilder::spawn`] hands back to the creator.
#[derive(Debug)]
pub struct ProcessInformation {
    pub process: Arc<Process>,
    /// The main thread.
    pub thread: Arc<Thread>,
    /// Handle to the process in the creator's table, with full access.
    pub process_handle: HandleValue,
    /// Handle to the main thread in the creator's table, with full access.
    pub thread_handle: HandleValue,
}

/// Creation attributes after validation against the creator's handles.
struct Resolved {
    /// The process the child is created under.
    source: Arc<Process>,
    handle_list: Option<Vec<HandleValue>>,
    jobs: Vec<JobHandle>,
    pseudo_console: Option<Arc<dyn Stream>>,
    ideal_processor: Option<ProcessorNumber>,
}

/// A builder to create a child [`Process`].
pub struct ProcessBuilder {
    command_line: String,
    image: Option<String>,
    inherit_handles: bool,
    flags: CreationFlags,
    startup: StartupInfo,
    attributes: AttributeList,
}

impl ProcessBuilder {
    /// Starts a builder for `command_line`. Unless an explicit image is set,
    /// the image is looked up from the command line.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            image: None,
            inherit_handles: false,
            flags: CreationFlags::empty(),
            startup: StartupInfo::default(),
            attributes: AttributeList::default(),
        }
    }

    /// Sets the image path, bypassing command line parsing.
    pub fn image(self, image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..self
        }
    }

    /// Copies the inheritable handles of the creator into the child.
    pub fn inherit_handles(self, inherit_handles: bool) -> Self {
        Self {
            inherit_handles,
            ..self
        }
    }

    pub fn flags(self, flags: CreationFlags) -> Self {
        Self { flags, ..self }
    }

    pub fn startup(self, startup: StartupInfo) -> Self {
        Self { startup, ..self }
    }

    pub fn attributes(self, attributes: AttributeList) -> Self {
        Self { attributes, ..self }
    }

    fn resolve_attributes(&self, creator: &Arc<Process>) -> JobResult<Resolved> {
        let attributes = &self.attributes;

        let source = match attributes.parent_process() {
            Some(value) => {
                let parent = creator.process_from_handle(value, Access::CREATE_PROCESS)?;
                if parent.is_terminated() {
                    return job_err!(AccessDenied, "parent process {} has exited", parent.pid());
                }
                parent
            }
            None => creator.clone(),
        };

        if let Some(values) = attributes.handle_list() {
            for &value in values {
                if !source.handles().flags(value)?.contains(HandleFlags::INHERIT) {
                    return job_err!(InvalidParameter, "{:?} is not inheritable", value);
                }
            }
        }

        let jobs = attributes
            .job_list()
            .iter()
            .map(|&value| creator.job_from_handle(value, Access::ASSIGN_PROCESS))
            .collect::<JobResult<Vec<_>>>()?;

        let pseudo_console = attributes
            .pseudo_console()
            .map(|value| creator.stream_from_handle(value))
            .transpose()?;

        Ok(Resolved {
            source,
            handle_list: attributes.handle_list().map(<[_]>::to_vec),
            jobs,
            pseudo_console,
            ideal_processor: attributes.ideal_processor(),
        })
    }

    fn resolve_image(&self, loader: &dyn Loader) -> JobResult<ImageInfo> {
        if let Some(image) = &self.image {
            return match loader.resolve(image) {
                Some(info) => Ok(info),
                None => job_err!(NotFound, "image {image:?} not found"),
            };
        }
        if self.command_line.trim().is_empty() {
            return job_err!(InvalidParameter, "neither image nor command line given");
        }
        match image_candidates(&self.command_line)
            .iter()
            .find_map(|candidate| loader.resolve(candidate))
        {
            Some(info) => Ok(info),
            None => job_err!(NotFound, "no image for {:?}", self.command_line),
        }
    }

    /// Fills in a child before it is registered: handles, main thread and
    /// jobs.
    fn populate(
        &self,
        creator: &Arc<Process>,
        process: &Arc<Process>,
        resolved: &Resolved,
        inherited_job: Option<&Arc<Job>>,
    ) -> JobResult<Arc<Thread>> {
        let registry = process.registry()?;

        if self.inherit_handles {
            let inheritable = resolved
                .source
                .handles()
                .inheritable(resolved.handle_list.as_deref());
            for (value, entry) in inheritable {
                if process.handles().insert_at(value, entry).is_err() {
                    log::warn!("process {} could not inherit {:?}", process.pid(), value);
                }
            }
        }

        let std_handles = StdHandleSources {
            creator,
            child: process,
            inherit_all: self.inherit_handles,
            detached: self.flags.contains(CreationFlags::DETACHED),
            subsystem: process.subsystem(),
            pseudo_console: resolved.pseudo_console.clone(),
        }
        .resolve_all(&self.startup)?;
        for slot in StdHandle::ALL {
            process.set_std_handle(slot, std_handles[slot as usize]);
        }

        let suspended = self.flags.contains(CreationFlags::SUSPENDED);
        let thread = Thread::new(
            registry.next_id(),
            process.clone(),
            true,
            suspended,
            resolved.ideal_processor,
        );
        process.add_main_thread(thread.clone());

        if let Some(job) = inherited_job {
            job_tree::assign(&registry, process, job)?;
        }
        for job in &resolved.jobs {
            job_tree::assign(&registry, process, job.job())?;
        }
        Ok(thread)
    }

    /// Makes a populated child visible to lookups and hands it to its
    /// debugger. Runs under the tree lock, so the child cannot exit before
    /// its creation event is queued.
    fn publish(
        &self,
        registry: &Registry,
        creator: &Arc<Process>,
        process: &Arc<Process>,
        thread: &Thread,
    ) {
        let _tree = registry.lock_tree();
        let debugger = if self.flags.contains(CreationFlags::DEBUG_ATTACH) {
            let port = creator.debug_port_or_create();
            process.attach_debugger(port.clone()).then_some(port)
        } else {
            None
        };
        process.launch(self.flags.contains(CreationFlags::SUSPENDED));
        registry.register(process);
        if let Some(port) = debugger {
            let event = DebugEvent::CreateProcess {
                pid: process.pid(),
                tid: thread.tid(),
                image: process.image().to_owned(),
            };
            port.report(event, Some(process));
        }
    }

    /// Creates the process as a child of `creator`.
    ///
    /// Attribute and image errors fail before anything is created. A job
    /// list assignment that fails leaves the earlier assignments in place
    /// and the new process terminated with exit code 0.
    pub fn spawn(self, creator: &Arc<Process>) -> JobResult<ProcessInformation> {
        let flags = self.flags;
        if CreationFlags::from_bits(flags.bits()).is_none() {
            return job_err!(InvalidParameter, "unknown creation flags {:#x}", flags.bits());
        }
        if flags.contains(CreationFlags::DETACHED | CreationFlags::NEW_CONSOLE) {
            return job_err!(InvalidParameter, "DETACHED and NEW_CONSOLE are exclusive");
        }

        let registry = creator.registry()?;
        let loader = registry.config().loader.clone();
        let resolved = self.resolve_attributes(creator)?;
        let image = self.resolve_image(loader.as_ref())?;

        let mut context = creator.context();
        context.parent_pid = Some(resolved.source.pid());
        if let Some(dir) = &self.startup.current_directory {
            if !loader.is_directory(dir) {
                return job_err!(InvalidDirectory, "{dir:?} is not a directory");
            }
            context.current_directory = dir.clone();
        }
        if let Some(environment) = &self.startup.environment {
            context.environment = environment.clone();
        }
        context.console = if flags.contains(CreationFlags::DETACHED) {
            None
        } else if flags.contains(CreationFlags::NEW_CONSOLE) || resolved.pseudo_console.is_some() {
            Some(registry.next_console())
        } else if image.subsystem == Subsystem::Gui {
            None
        } else {
            context.console
        };

        let inherited_job = job_tree::inherited_job(
            &resolved.source.jobs(),
            flags.contains(CreationFlags::BREAKAWAY_FROM_JOB),
        )?;

        let mut startup = self.startup.clone();
        startup.title.get_or_insert_with(|| image.path.clone());
        let pid = registry.next_id();
        let process = Process::new(
            &registry,
            pid,
            ProcessImage {
                path: image.path,
                command_line: self.command_line.clone(),
                subsystem: image.subsystem,
                flags,
                startup,
            },
            context,
        );
        log::debug!(
            "created process {pid} ({}) under {}",
            process.image(),
            resolved.source.pid()
        );

        let thread = match self.populate(creator, &process, &resolved, inherited_job.as_ref()) {
            Ok(thread) => thread,
            Err(err) => {
                {
                    let _tree = registry.lock_tree();
                    registry.register(&process);
                }
                process.terminate(0);
                return Err(err);
            }
        };
        self.publish(&registry, creator, &process, &thread);

        let process_handle =
            creator.insert_handle(process.clone(), Access::ALL, HandleFlags::empty());
        let thread_handle =
            creator.insert_handle(thread.clone(), Access::ALL, HandleFlags::empty());
        match (process_handle, thread_handle) {
            (Ok(process_handle), Ok(thread_handle)) => Ok(ProcessInformation {
                process,
                thread,
                process_handle,
                thread_handle,
            }),
            (process_handle, thread_handle) => {
                for value in [process_handle, thread_handle].into_iter().flatten() {
                    if let Err(err) = creator.close_handle(value) {
                        log::warn!("process {} could not close {:?}: {err}", creator.pid(), value);
                    }
                }
                process.terminate(0);
                job_err!(InvalidParameter, "creator's handle table is full")
            }
        }
    }
}
