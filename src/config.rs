use std::{fmt, sync::Arc};

use crate::{Loader, StaticLoader};

/// Settings of a [`Registry`](crate::Registry).
#[derive(Clone)]
pub struct Config {
    /// Whether a process may belong to more than one job.
    pub nested_jobs: bool,
    /// The first process or thread id handed out.
    pub first_pid: u32,
    /// Distance between consecutive ids.
    pub id_step: u32,
    /// Capacity of every handle table.
    pub max_handles: usize,
    /// Exit code of processes killed when a kill-on-close job is closed.
    pub kill_exit_code: u32,
    /// Image and directory lookup.
    pub loader: Arc<dyn Loader>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nested_jobs: true,
            first_pid: 4,
            id_step: 4,
            max_handles: 16 * 1024 * 1024,
            kill_exit_code: 0,
            loader: Arc::new(StaticLoader::permissive()),
        }
    }
}

impl Config {
    pub fn with_nested_jobs(mut self, nested_jobs: bool) -> Self {
        self.nested_jobs = nested_jobs;
        self
    }

    pub fn with_first_pid(mut self, first_pid: u32) -> Self {
        self.first_pid = first_pid;
        self
    }

    pub fn with_id_step(mut self, id_step: u32) -> Self {
        self.id_step = id_step.max(1);
        self
    }

    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles;
        self
    }

    pub fn with_kill_exit_code(mut self, kill_exit_code: u32) -> Self {
        self.kill_exit_code = kill_exit_code;
        self
    }

    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("nested_jobs", &self.nested_jobs)
            .field("first_pid", &self.first_pid)
            .field("id_step", &self.id_step)
            .field("max_handles", &self.max_handles)
            .field("kill_exit_code", &self.kill_exit_code)
            .finish_non_exhaustive()
    }
}
