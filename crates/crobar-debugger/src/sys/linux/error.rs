use std::path::PathBuf;

use nix::sys::wait::WaitStatus;

/// Internal error of the Linux debugger.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// File read error.
    #[error("{0}: {1}")]
    File(PathBuf, std::io::Error),

    /// Unexpected wait status of a traced thread.
    #[error("bad wait status: {0:?}")]
    BadWait(WaitStatus),

    /// OS error.
    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    /// The debuggee has exited.
    #[error("process has exited")]
    ProcessExited,

    /// The executable of the debuggee isn't mapped.
    #[error("no mapping of {0} found")]
    MissingExeMapping(PathBuf),
}

/// Result type of the Linux debugger.
pub type Result<T> = core::result::Result<T, Error>;
