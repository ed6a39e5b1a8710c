use std::sync::Arc;

use crate::{
    Access, HandleFlags, HandleValue, JobResult, KernelObject, Process, StartupFlags, Stream,
    Subsystem,
};

/// One of the three standard handle slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdHandle {
    Input = 0,
    Output = 1,
    Error = 2,
}

impl StdHandle {
    pub const ALL: [StdHandle; 3] = [Self::Input, Self::Output, Self::Error];
}

/// Startup configuration of a new process.
///
/// The child can read back the record it was started with through
/// [`Process::startup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupInfo {
    pub flags: StartupFlags,
    pub std_input: HandleValue,
    pub std_output: HandleValue,
    pub std_error: HandleValue,
    /// Meaningful with [`StartupFlags::USE_SHOW_WINDOW`].
    pub show_window: u16,
    pub title: Option<String>,
    pub desktop: Option<String>,
    /// Working directory override.
    pub current_directory: Option<String>,
    /// Replacement environment. `None` inherits the creator's.
    pub environment: Option<Vec<(String, String)>>,
}

impl StartupInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Passes explicit standard handles.
    pub fn with_std_handles(
        mut self,
        input: HandleValue,
        output: HandleValue,
        error: HandleValue,
    ) -> Self {
        self.flags |= StartupFlags::USE_STD_HANDLES;
        self.std_input = input;
        self.std_output = output;
        self.std_error = error;
        self
    }

    pub fn with_show_window(mut self, show_window: u16) -> Self {
        self.flags |= StartupFlags::USE_SHOW_WINDOW;
        self.show_window = show_window;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_desktop(mut self, desktop: impl Into<String>) -> Self {
        self.desktop = Some(desktop.into());
        self
    }

    pub fn with_current_directory(mut self, dir: impl Into<String>) -> Self {
        self.current_directory = Some(dir.into());
        self
    }

    pub fn with_environment(mut self, environment: Vec<(String, String)>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn std_handle(&self, slot: StdHandle) -> HandleValue {
        match slot {
            StdHandle::Input => self.std_input,
            StdHandle::Output => self.std_output,
            StdHandle::Error => self.std_error,
        }
    }
}

/// Where the standard handles of a new process come from.
pub(crate) struct StdHandleSources<'a> {
    pub(crate) creator: &'a Arc<Process>,
    pub(crate) child: &'a Process,
    pub(crate) inherit_all: bool,
    pub(crate) detached: bool,
    pub(crate) subsystem: Subsystem,
    pub(crate) pseudo_console: Option<Arc<dyn Stream>>,
}

impl StdHandleSources<'_> {
    /// A value the child may have inherited. Values that were not copied
    /// stay as they are, without an object behind them.
    fn inherited(&self, value: HandleValue) -> HandleValue {
        if self.inherit_all { value } else { HandleValue::NULL }
    }

    /// Gives a console child its own copy of the creator's handle, at the
    /// same value and with the same attributes.
    fn duplicated(&self, value: HandleValue) -> HandleValue {
        if self.subsystem != Subsystem::Console {
            return HandleValue::NULL;
        }
        let Ok(entry) = self.creator.handles().get(value) else {
            return HandleValue::NULL;
        };
        let handles = self.child.handles();
        if handles.insert_at(value, entry).is_ok() || handles.contains(value) {
            value
        } else {
            HandleValue::NULL
        }
    }

    fn resolve(&self, startup: &StartupInfo, slot: StdHandle) -> JobResult<HandleValue> {
        if startup.flags.contains(StartupFlags::USE_STD_HANDLES) {
            let value = startup.std_handle(slot);
            return Ok(if value.is_null() { value } else { self.inherited(value) });
        }
        if let Some(console) = &self.pseudo_console {
            let object = KernelObject::Stream(console.clone());
            return self.child.insert_handle(object, Access::ALL, HandleFlags::empty());
        }
        let value = self.creator.std_handle(slot);
        Ok(if self.detached || value.is_null() {
            HandleValue::NULL
        } else if self.inherit_all {
            self.inherited(value)
        } else {
            self.duplicated(value)
        })
    }

    /// Resolves all three slots of the child.
    pub(crate) fn resolve_all(&self, startup: &StartupInfo) -> JobResult<[HandleValue; 3]> {
        let mut values = [HandleValue::NULL; 3];
        for slot in StdHandle::ALL {
            let value = self.resolve(startup, slot)?;
            let console = self
                .child
                .handles()
                .get(value)
                .is_ok_and(|entry| entry.object.is_console());
            values[slot as usize] = if self.subsystem == Subsystem::Gui && console {
                HandleValue::NULL
            } else {
                value
            };
        }
        Ok(values)
    }
}
