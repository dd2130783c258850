mod record;


use std::ops::ControlFlow;

use indexmap::IndexMap;

pub use self::record::{Breakpoint, BreakpointId, BreakpointState, Callback, Selector};
use crate::debugger::{DebugEvent, DebugSession, Registers};
use crate::error::{DebuggerError, DesyncReason, Error};

/// x86 `int3` opcode.
pub const TRAP_OPCODE: u8 = 0xcc;

/// Maximum length of an x86 instruction.
///
/// A single-step stopping within this distance of a hit breakpoint is
/// considered to have stepped over its original instruction.
pub const MAX_INSTRUCTION_LEN: u64 = 15;

/// Reason why [BreakpointHandler::run_event_loop] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A callback asked to stop. The debuggee is still attached and running.
    Stopped,

    /// The debuggee exited.
    TargetExited {
        /// Exit code of the debuggee.
        exit_code: i32,
    },
}

/// Registry of software breakpoints placed within a debuggee.
///
/// Breakpoints are identified by a [BreakpointId], and several of them may
/// share the same address. The trap opcode is written when the first one is
/// installed at an address, and the original byte is restored when the last
/// one is uninstalled.
///
/// When dropped, every breakpoint is uninstalled and the debugger is
/// detached, ignoring errors. Use [shutdown](Self::shutdown) to observe them.
pub struct BreakpointHandler<S: DebugSession> {
    session: S,

    /// Breakpoints per address, in install order.
    bks: IndexMap<u64, Vec<Breakpoint>>,

    next_id: u64,

    torn_down: bool,
}

impl<S: DebugSession> BreakpointHandler<S> {
    /// Creates a new handler without any breakpoint.
    pub fn new(session: S) -> Self {
        Self {
            session,
            bks: IndexMap::new(),
            next_id: 0,
            torn_down: false,
        }
    }

    /// Returns the debug session of this handler.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Returns the debug session of this handler, mutably.
    ///
    /// Writing over an installed breakpoint through it desyncs the handler.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Returns the installed breakpoints, in install order of their address.
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.bks.values().flatten()
    }

    /// Returns the breakpoint with the given identifier, if installed.
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints().find(|bk| bk.id == id)
    }

    /// Installs a breakpoint at the given absolute address.
    ///
    /// # Errors
    ///
    /// Nothing is installed if the trap opcode can't be placed.
    pub fn install<F>(
        &mut self,
        addr: u64,
        name: Option<&str>,
        callback: F,
    ) -> crate::Result<BreakpointId, S::Error>
    where
        F: FnMut() -> ControlFlow<()> + 'static,
    {
        let id = BreakpointId(self.next_id);

        let (original_byte, state) = match self.bks.get(&addr).and_then(|bks| bks.first()) {
            // the trap opcode is shared with the other breakpoints
            Some(sibling) => match sibling.state {
                BreakpointState::WaitingStep => (sibling.original_byte, BreakpointState::WaitingStep),
                BreakpointState::Active | BreakpointState::Inactive => {
                    (sibling.original_byte, BreakpointState::Active)
                }
            },
            None => {
                let mut original_byte = [0u8];

                self.session
                    .read_memory(addr, &mut original_byte)
                    .map_err(DebuggerError)?;

                if original_byte[0] == TRAP_OPCODE {
                    tracing::warn!(
                        addr = format_args!("{addr:#x}"),
                        "breakpoint installed over an existing trap opcode"
                    );
                }

                self.session
                    .write_memory(addr, &[TRAP_OPCODE])
                    .map_err(DebuggerError)?;

                (original_byte[0], BreakpointState::Active)
            }
        };

        let mut bk = Breakpoint::new(
            id,
            addr,
            name.map(ToOwned::to_owned),
            original_byte,
            Box::new(callback),
        );
        bk.state = state;

        tracing::debug!(
            %id,
            addr = format_args!("{addr:#x}"),
            name,
            state = ?bk.state,
            "breakpoint installed"
        );

        self.bks.entry(addr).or_default().push(bk);
        self.next_id += 1;

        Ok(id)
    }

    /// Installs a breakpoint at an address relative to the image base the
    /// debuggee was built for.
    pub fn install_relative<F>(
        &mut self,
        rel_addr: u64,
        name: Option<&str>,
        callback: F,
    ) -> crate::Result<BreakpointId, S::Error>
    where
        F: FnMut() -> ControlFlow<()> + 'static,
    {
        let addr = self.session.from_relative_addr(rel_addr);
        self.install(addr, name, callback)
    }

    /// Uninstalls every breakpoint matching the selector, and returns how
    /// many were uninstalled.
    ///
    /// # Errors
    ///
    /// If no breakpoint matches, [Error::BreakpointNotFound] is returned.
    ///
    /// If an original byte can't be restored, the breakpoints at its address
    /// are kept installed.
    pub fn uninstall<'a>(
        &mut self,
        selector: impl Into<Selector<'a>>,
    ) -> crate::Result<usize, S::Error> {
        let selector = selector.into();

        let addrs: Vec<u64> = self
            .bks
            .iter()
            .filter(|(_, bks)| bks.iter().any(|bk| selector.matches(bk)))
            .map(|(addr, _)| *addr)
            .collect();

        if addrs.is_empty() {
            return Err(Error::BreakpointNotFound(selector.to_string()));
        }

        let mut count = 0;

        for addr in addrs {
            let Some(bks) = self.bks.get_mut(&addr) else {
                continue;
            };

            if bks.iter().all(|bk| selector.matches(bk)) {
                // last breakpoint at this address
                let original_byte = bks[0].original_byte;

                self.session
                    .write_memory(addr, &[original_byte])
                    .map_err(DebuggerError)?;

                if let Some(bks) = self.bks.shift_remove(&addr) {
                    count += bks.len();
                }
            } else {
                let len = bks.len();
                bks.retain(|bk| !selector.matches(bk));
                count += len - bks.len();
            }

            tracing::debug!(addr = format_args!("{addr:#x}"), %selector, "breakpoint uninstalled");
        }

        Ok(count)
    }

    /// Uninstalls every breakpoint.
    ///
    /// Every address is attempted, and the first error is returned.
    pub fn uninstall_all(&mut self) -> crate::Result<(), S::Error> {
        let mut res = Ok(());

        for (addr, bks) in self.bks.drain(..) {
            let original_byte = bks[0].original_byte;

            if let Err(e) = self.session.write_memory(addr, &[original_byte]) {
                tracing::warn!(
                    error = %e,
                    addr = format_args!("{addr:#x}"),
                    "failed to restore original byte"
                );

                if res.is_ok() {
                    res = Err(DebuggerError(e).into());
                }
            }
        }

        res
    }

    /// Dispatches debug events to the breakpoints, until a callback asks to
    /// stop or the debuggee exits.
    ///
    /// # Errors
    ///
    /// On error, every breakpoint is uninstalled and the debugger detached
    /// (ignoring errors) before returning.
    #[tracing::instrument(
        name = "BreakpointEventLoop",
        skip_all,
        fields(pid = self.session.process_id())
    )]
    pub fn run_event_loop(&mut self) -> crate::Result<LoopExit, S::Error> {
        self.event_loop().inspect_err(|e| {
            tracing::error!(error = %e, "breakpoint event loop failed");
            self.teardown();
        })
    }

    /// Uninstalls every breakpoint and detaches the debugger.
    ///
    /// The debugger is detached even if a breakpoint can't be uninstalled.
    pub fn shutdown(mut self) -> crate::Result<(), S::Error> {
        self.torn_down = true;

        let res = self.uninstall_all();
        self.session.detach().map_err(DebuggerError)?;

        res
    }

    fn event_loop(&mut self) -> crate::Result<LoopExit, S::Error> {
        self.session.attach_debugger().map_err(DebuggerError)?;

        loop {
            let event = self.session.wait_for_event().map_err(DebuggerError)?;

            let flow = match event {
                DebugEvent::Breakpoint { addr } if self.bks.contains_key(&addr) => {
                    self.handle_breakpoint(addr)?
                }
                DebugEvent::Breakpoint { addr } => {
                    self.rearm_stepped_over(addr)?;
                    ControlFlow::Continue(())
                }
                DebugEvent::SingleStep { addr } => {
                    self.handle_single_step(addr)?;
                    ControlFlow::Continue(())
                }
                DebugEvent::Exited { exit_code } => {
                    tracing::info!(exit_code, "debuggee exited");

                    // nothing left to restore
                    self.bks.clear();

                    return Ok(LoopExit::TargetExited { exit_code });
                }
            };

            self.session.resume().map_err(DebuggerError)?;

            if flow.is_break() {
                tracing::info!("event loop stopped by a breakpoint callback");
                return Ok(LoopExit::Stopped);
            }
        }
    }

    fn handle_breakpoint(&mut self, addr: u64) -> crate::Result<ControlFlow<()>, S::Error> {
        let Some(bks) = self.bks.get_mut(&addr) else {
            return Ok(ControlFlow::Continue(()));
        };

        if let Some(bk) = bks.iter().find(|bk| bk.state != BreakpointState::Active) {
            let reason = match bk.state {
                BreakpointState::Inactive => DesyncReason::InactiveTriggered,
                _ => DesyncReason::TriggeredWhileStepping,
            };
            return Err(Error::Desync { addr, reason });
        }

        let mut regs = self.session.get_registers().map_err(DebuggerError)?;

        // re-execute the original instruction, one step at a time
        regs.set_instr_addr(addr);
        regs.set_trap_flag(true);

        self.session.set_registers(&regs).map_err(DebuggerError)?;

        self.session
            .write_memory(addr, &[bks[0].original_byte])
            .map_err(DebuggerError)?;

        let mut flow = ControlFlow::Continue(());

        for bk in bks.iter_mut() {
            bk.state = BreakpointState::WaitingStep;

            tracing::debug!(
                id = %bk.id,
                addr = format_args!("{addr:#x}"),
                name = bk.name(),
                "breakpoint hit"
            );

            if (bk.callback)().is_break() {
                flow = ControlFlow::Break(());
            }
        }

        Ok(flow)
    }

    fn handle_single_step(&mut self, stop_addr: u64) -> crate::Result<(), S::Error> {
        let stepping = self.bks.iter().any(|(addr, bks)| {
            stop_addr.abs_diff(*addr) <= MAX_INSTRUCTION_LEN
                && bks.iter().any(|bk| bk.state == BreakpointState::WaitingStep)
        });

        let armed = self
            .bks
            .get(&stop_addr)
            .is_some_and(|bks| bks.iter().all(|bk| bk.state == BreakpointState::Active));

        if !stepping && armed {
            return Err(Error::Desync {
                addr: stop_addr,
                reason: DesyncReason::SteppedOntoArmed,
            });
        }

        self.rearm_stepped_over(stop_addr)
    }

    /// Clears the trap flag and re-arms the breakpoints whose original
    /// instruction may have been executed before stopping at `stop_addr`.
    fn rearm_stepped_over(&mut self, stop_addr: u64) -> crate::Result<(), S::Error> {
        let mut regs = self.session.get_registers().map_err(DebuggerError)?;

        regs.set_trap_flag(false);

        self.session.set_registers(&regs).map_err(DebuggerError)?;

        for (addr, bks) in self.bks.iter_mut() {
            let stepped_over = stop_addr.abs_diff(*addr) <= MAX_INSTRUCTION_LEN;

            if !stepped_over || !bks.iter().any(|bk| bk.state == BreakpointState::WaitingStep) {
                continue;
            }

            self.session
                .write_memory(*addr, &[TRAP_OPCODE])
                .map_err(DebuggerError)?;

            for bk in bks.iter_mut() {
                bk.state = BreakpointState::Active;
            }

            tracing::trace!(addr = format_args!("{addr:#x}"), "breakpoint re-armed");
        }

        Ok(())
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let _ = self.uninstall_all();

        if let Err(e) = self.session.detach() {
            tracing::warn!(error = %e, "failed to detach debugger");
        }
    }
}

impl<S: DebugSession> Drop for BreakpointHandler<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
