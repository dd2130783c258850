use std::fmt;
use std::ops::ControlFlow;

/// Callback invoked when a breakpoint is hit.
///
/// Returning [ControlFlow::Break] stops the event loop once the debuggee
/// has been resumed.
pub type Callback = Box<dyn FnMut() -> ControlFlow<()>>;

/// Unique identifier of an installed breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BreakpointId(pub(super) u64);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    /// The trap opcode has not been written yet.
    Inactive,

    /// The trap opcode is in place.
    Active,

    /// The breakpoint was hit. The original instruction is restored while
    /// the thread single-steps over it.
    WaitingStep,
}

/// Software breakpoint.
pub struct Breakpoint {
    pub(super) id: BreakpointId,
    pub(super) addr: u64,
    pub(super) name: Option<String>,
    pub(super) original_byte: u8,
    pub(super) state: BreakpointState,
    pub(super) callback: Callback,
}

impl Breakpoint {
    pub(super) fn new(
        id: BreakpointId,
        addr: u64,
        name: Option<String>,
        original_byte: u8,
        callback: Callback,
    ) -> Self {
        Self {
            id,
            addr,
            name,
            original_byte,
            state: BreakpointState::Inactive,
            callback,
        }
    }

    /// Returns the identifier of this breakpoint.
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    /// Returns the absolute address of this breakpoint.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Returns the name of this breakpoint, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the byte overwritten by the trap opcode.
    pub fn original_byte(&self) -> u8 {
        self.original_byte
    }

    /// Returns the state of this breakpoint.
    pub fn state(&self) -> BreakpointState {
        self.state
    }
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("id", &self.id)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("name", &self.name)
            .field("original_byte", &format_args!("{:#04x}", self.original_byte))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Selector of breakpoints to uninstall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    /// The breakpoint with this identifier.
    Id(BreakpointId),

    /// Every breakpoint at this absolute address.
    Addr(u64),

    /// Every breakpoint with this name.
    Name(&'a str),
}

impl Selector<'_> {
    pub(super) fn matches(&self, bp: &Breakpoint) -> bool {
        match self {
            Self::Id(id) => bp.id == *id,
            Self::Addr(addr) => bp.addr == *addr,
            Self::Name(name) => bp.name.as_deref() == Some(*name),
        }
    }
}

impl From<BreakpointId> for Selector<'_> {
    fn from(id: BreakpointId) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for Selector<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Selector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id {id}"),
            Self::Addr(addr) => write!(f, "address {addr:#x}"),
            Self::Name(name) => write!(f, "name {name:?}"),
        }
    }
}
