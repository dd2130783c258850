/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The debuggee's memory couldn't be read or written.
    #[error("memory access fault at {addr:#x} ({len} bytes)")]
    AccessFault {
        /// Start address of the access.
        addr: u64,

        /// Length of the access.
        len: usize,

        /// OS error.
        #[source]
        source: crate::sys::Error,
    },

    /// No thread of the debuggee is currently stopped.
    #[error("no stopped thread")]
    NoStoppedThread,

    /// A thread of the debuggee raised a fault unrelated to breakpoints.
    #[error("thread {thread_id} faulted at {addr:#x}: {reason}")]
    TargetFault {
        /// ID of the faulting thread.
        thread_id: u64,

        /// Instruction address of the faulting thread.
        addr: u64,

        /// Description of the fault.
        reason: String,
    },

    /// No running process matches the given name.
    #[error("no process named {0:?}")]
    ProcessNotFound(String),

    /// Internal debugger error.
    #[error(transparent)]
    DebuggerInternal(#[from] crate::sys::Error),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
