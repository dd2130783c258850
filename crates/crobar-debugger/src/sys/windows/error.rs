/// Internal error of the Windows debugger.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// OS error.
    #[error("os error: {0}")]
    Os(#[from] windows::core::Error),

    /// Memory was partially read or written.
    #[error("partial memory operation ({0}/{1} bytes)")]
    PartialMemOp(usize, usize),

    /// The debuggee has exited.
    #[error("process has exited")]
    ProcessExited,

    /// The executable module of the debuggee wasn't found.
    #[error("no executable module found")]
    MissingExeModule,
}

/// Result type of the Windows debugger.
pub type Result<T> = core::result::Result<T, Error>;
