use bitflags::bitflags;

bitflags! {
    /// Flags accepted by process creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreationFlags: u32 {
        /// The creator receives lifecycle debug events of the child.
        const DEBUG_ATTACH = 0x0000_0001;
        /// The initial thread is created but not scheduled.
        const SUSPENDED = 0x0000_0004;
        /// The child gets no console and no console standard handles.
        const DETACHED = 0x0000_0008;
        /// The child gets a console of its own.
        const NEW_CONSOLE = 0x0000_0010;
        /// Skip the creator's job membership where job policy allows it.
        const BREAKAWAY_FROM_JOB = 0x0100_0000;
    }
}

bitflags! {
    /// Per-handle flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleFlags: u32 {
        const INHERIT = 0x1;
        const PROTECT_FROM_CLOSE = 0x2;
    }
}

bitflags! {
    /// Access rights carried by a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Access: u32 {
        const TERMINATE = 0x0001;
        const CREATE_THREAD = 0x0002;
        const CREATE_PROCESS = 0x0004;
        const DUP_HANDLE = 0x0008;
        const QUERY = 0x0010;
        const SET_ATTRIBUTES = 0x0020;
        const ASSIGN_PROCESS = 0x0040;
        const SUSPEND_RESUME = 0x0080;
        const SYNCHRONIZE = 0x0100;

        const ALL = 0x01ff;
    }
}

bitflags! {
    /// Limit flags of a job.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LimitFlags: u32 {
        const BREAKAWAY_OK = 0x0000_0800;
        const SILENT_BREAKAWAY_OK = 0x0000_1000;
        const KILL_ON_JOB_CLOSE = 0x0000_2000;
        const DIE_ON_UNHANDLED_EXCEPTION = 0x0000_0400;
    }
}

bitflags! {
    /// Options of a handle duplication.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DuplicateOptions: u32 {
        const CLOSE_SOURCE = 0x1;
        const SAME_ACCESS = 0x2;
        const SAME_ATTRIBUTES = 0x4;
    }
}

bitflags! {
    /// Which optional fields of a startup record are meaningful.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StartupFlags: u32 {
        const USE_SHOW_WINDOW = 0x0001;
        const USE_STD_HANDLES = 0x0100;
    }
}
