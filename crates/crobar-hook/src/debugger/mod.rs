mod registers;

pub use self::registers::{Registers, TRAP_FLAG};

/// Trait implementing access to the debuggee's address space.
pub trait MemoryAccess {
    /// Error returned by this trait.
    type Error: std::error::Error;

    /// Reads exactly `buf.len()` bytes from the debuggee's address space.
    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes all of `buf` into the debuggee's address space.
    ///
    /// Bytes surrounding the written range are left untouched, whatever the
    /// granularity of the underlying transport.
    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<(), Self::Error>;

    /// Reads `len` bytes from the debuggee's address space.
    fn read_bytes(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, Self::Error> {
        let mut buf = vec![0u8; len];
        self.read_memory(addr, &mut buf)?;
        Ok(buf)
    }
}

/// Trait implementing the instrumentation logic of a debugger attached to
/// a single process.
///
/// At most one debuggee thread is stopped at a time. It stops when
/// [wait_for_event](Self::wait_for_event) returns, and runs again once
/// [resume](Self::resume) is called.
pub trait DebugSession: MemoryAccess {
    /// Type of the register state of the stopped thread.
    type Registers: Registers;

    /// Returns the ID of the debuggee.
    fn process_id(&self) -> u64;

    /// Converts an address relative to the image base the debuggee was
    /// built for, into an address of the debuggee's address space.
    fn from_relative_addr(&self, addr: u64) -> u64;

    /// Retrieves registers of the stopped thread.
    fn get_registers(&mut self) -> Result<Self::Registers, Self::Error>;

    /// Modifies registers of the stopped thread.
    ///
    /// The whole register file is written back, so `regs` must come from a
    /// previous call to [get_registers](Self::get_registers) since the
    /// thread stopped.
    fn set_registers(&mut self, regs: &Self::Registers) -> Result<(), Self::Error>;

    /// Starts receiving debug events from the debuggee.
    ///
    /// Calling this function more than once has no effect.
    fn attach_debugger(&mut self) -> Result<(), Self::Error>;

    /// Blocks until a thread of the debuggee stops by a trap or a
    /// single-step, and returns the corresponding event.
    ///
    /// Other debug events are handled internally, and the threads they
    /// stopped are resumed silently.
    ///
    /// # Note
    ///
    /// On [DebugEvent::Breakpoint], the instruction address of the stopped
    /// thread still points past the trap opcode.
    fn wait_for_event(&mut self) -> Result<DebugEvent, Self::Error>;

    /// Resumes the stopped thread.
    fn resume(&mut self) -> Result<(), Self::Error>;

    /// Stops debugging the debuggee, and lets it run freely.
    fn detach(&mut self) -> Result<(), Self::Error>;
}

/// Event stopping a thread of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// A thread has executed a trap opcode.
    Breakpoint {
        /// Address of the trap opcode.
        addr: u64,
    },

    /// A thread has executed a single instruction in single-step mode.
    SingleStep {
        /// Address of the next instruction to execute.
        addr: u64,
    },

    /// The debuggee has exited.
    Exited {
        /// Exit code of the debuggee.
        exit_code: i32,
    },
}
