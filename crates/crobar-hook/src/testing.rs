use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::debugger::{DebugEvent, DebugSession, MemoryAccess, Registers};

pub(crate) const MEMORY_BASE: u64 = 0x0804_8000;
pub(crate) const MEMORY_SIZE: usize = 0x1000;

/// Flags register of a freshly stopped thread (IF, ZF, PF and reserved bit).
pub(crate) const INITIAL_FLAGS: u64 = 0x246;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub(crate) enum FakeError {
    #[error("access fault at {0:#x}")]
    AccessFault(u64),

    #[error("no stopped thread")]
    NoStoppedThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FakeRegisters {
    pub(crate) eip: u64,
    pub(crate) esp: u64,
    pub(crate) eflags: u64,
}

impl Registers for FakeRegisters {
    fn instr_addr(&self) -> u64 {
        self.eip
    }

    fn set_instr_addr(&mut self, addr: u64) {
        self.eip = addr;
    }

    fn stack_addr(&self) -> u64 {
        self.esp
    }

    fn flags(&self) -> u64 {
        self.eflags
    }

    fn set_flags(&mut self, flags: u64) {
        self.eflags = flags;
    }
}

/// In-memory debuggee, replaying a scripted list of debug events.
///
/// Once the script is exhausted, the debuggee exits with code 0.
pub(crate) struct FakeSession {
    pub(crate) memory: Vec<u8>,
    pub(crate) regs: FakeRegisters,
    pub(crate) events: VecDeque<DebugEvent>,
    pub(crate) stopped: bool,
    pub(crate) attached: bool,
    /// Shared with tests, to observe the detach after the handler is gone.
    pub(crate) detached: Rc<Cell<bool>>,
    pub(crate) resumes: usize,
    pub(crate) writes: Vec<(u64, Vec<u8>)>,
}

impl FakeSession {
    pub(crate) fn new() -> Self {
        let memory = (0..MEMORY_SIZE).map(|i| (i % 0x7f) as u8).collect();

        Self {
            memory,
            regs: FakeRegisters {
                eip: MEMORY_BASE,
                esp: 0xbfff_f000,
                eflags: INITIAL_FLAGS,
            },
            events: VecDeque::new(),
            stopped: false,
            attached: false,
            detached: Rc::default(),
            resumes: 0,
            writes: Vec::new(),
        }
    }

    pub(crate) fn with_events(events: impl IntoIterator<Item = DebugEvent>) -> Self {
        let mut session = Self::new();
        session.events.extend(events);
        session
    }

    pub(crate) fn byte_at(&self, addr: u64) -> u8 {
        self.memory[(addr - MEMORY_BASE) as usize]
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, FakeError> {
        let start = addr
            .checked_sub(MEMORY_BASE)
            .ok_or(FakeError::AccessFault(addr))? as usize;
        let end = start + len;

        if end > self.memory.len() {
            return Err(FakeError::AccessFault(addr));
        }

        Ok(start..end)
    }
}

impl MemoryAccess for FakeSession {
    type Error = FakeError;

    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(addr, buf.len())?;
        self.memory[range].copy_from_slice(buf);
        self.writes.push((addr, buf.to_vec()));
        Ok(())
    }
}

impl DebugSession for FakeSession {
    type Registers = FakeRegisters;

    fn process_id(&self) -> u64 {
        1337
    }

    fn from_relative_addr(&self, addr: u64) -> u64 {
        addr
    }

    fn get_registers(&mut self) -> Result<Self::Registers, Self::Error> {
        if !self.stopped {
            return Err(FakeError::NoStoppedThread);
        }
        Ok(self.regs)
    }

    fn set_registers(&mut self, regs: &Self::Registers) -> Result<(), Self::Error> {
        if !self.stopped {
            return Err(FakeError::NoStoppedThread);
        }
        self.regs = *regs;
        Ok(())
    }

    fn attach_debugger(&mut self) -> Result<(), Self::Error> {
        self.attached = true;
        Ok(())
    }

    fn wait_for_event(&mut self) -> Result<DebugEvent, Self::Error> {
        let event = self
            .events
            .pop_front()
            .unwrap_or(DebugEvent::Exited { exit_code: 0 });

        match event {
            DebugEvent::Breakpoint { addr } => self.regs.eip = addr + 1,
            DebugEvent::SingleStep { addr } => self.regs.eip = addr,
            DebugEvent::Exited { .. } => (),
        }
        self.stopped = !matches!(event, DebugEvent::Exited { .. });

        Ok(event)
    }

    fn resume(&mut self) -> Result<(), Self::Error> {
        if !self.stopped {
            return Err(FakeError::NoStoppedThread);
        }
        self.stopped = false;
        self.resumes += 1;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), Self::Error> {
        self.detached.set(true);
        Ok(())
    }
}
