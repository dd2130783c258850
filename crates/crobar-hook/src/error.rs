/// Debugger error.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct DebuggerError<E>(pub E);

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error<E> {
    /// A debugger error occurred.
    #[error(transparent)]
    Debugger(#[from] DebuggerError<E>),

    /// The bytes to patch are neither the expected original bytes, nor the
    /// replacement bytes.
    #[error("unexpected data to be patched at {addr:#x}: {found:02x?}")]
    UnexpectedData {
        /// Address of the patch.
        addr: u64,

        /// Bytes found in the debuggee.
        found: Vec<u8>,
    },

    /// The replacement bytes of a patch don't have the length of the
    /// original bytes.
    #[error("patch at {addr:#x} replaces {old} bytes with {new} bytes")]
    PatchLengthMismatch {
        /// Address of the patch.
        addr: u64,

        /// Length of the original bytes.
        old: usize,

        /// Length of the replacement bytes.
        new: usize,
    },

    /// The breakpoint state doesn't match the trap opcodes placed in the
    /// debuggee anymore.
    #[error("breakpoint state desynced at {addr:#x}: {reason}")]
    Desync {
        /// Address of the breakpoint.
        addr: u64,

        /// What was observed.
        reason: DesyncReason,
    },

    /// No installed breakpoint matches the selector.
    #[error("no breakpoint matches {0}")]
    BreakpointNotFound(String),
}

/// Impossible breakpoint transition.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncReason {
    /// A trap was reported for a breakpoint that was never armed.
    #[error("inactive breakpoint was triggered")]
    InactiveTriggered,

    /// A trap was reported while the original instruction was restored.
    #[error("breakpoint triggered while waiting for a single-step")]
    TriggeredWhileStepping,

    /// A single-step stopped on an armed breakpoint that no instruction was
    /// being re-executed for.
    #[error("single-step stopped on an armed breakpoint")]
    SteppedOntoArmed,
}

/// Result type of this crate.
pub type Result<T, E> = core::result::Result<T, Error<E>>;
