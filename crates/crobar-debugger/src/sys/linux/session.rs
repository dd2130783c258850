use std::collections::VecDeque;

use crobar_hook::breakpoint::TRAP_OPCODE;
use crobar_hook::debugger::{DebugEvent, Registers as _};
use indexmap::IndexSet;
use nix::errno::Errno;
use nix::libc::{PTRACE_EVENT_CLONE, PTRACE_EVENT_STOP};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use super::thread::{Registers, get_thread_registers, set_thread_registers};
use super::{mem, process};

/// `si_code` of a `SIGTRAP` raised by `int3`.
const SI_KERNEL: i32 = 0x80;

/// `si_code` of a `SIGTRAP` raised by a breakpoint.
const TRAP_BRKPT: i32 = 1;

/// `si_code` of a `SIGTRAP` raised by single-stepping.
const TRAP_TRACE: i32 = 2;

pub struct Session {
    /// Process ID of the debuggee.
    pid: Pid,

    /// Traced threads of the debuggee.
    threads: IndexSet<Pid>,

    /// Thread which reported the last debug event.
    stopped: Option<StoppedThread>,

    /// Stops observed while halting threads, not reported yet.
    ///
    /// Their threads stay stopped until reported.
    pending: VecDeque<WaitStatus>,

    /// Whether the threads were resumed after the initial halt.
    running: bool,

    detached: bool,

    exited: bool,
}

#[derive(Debug, Clone, Copy)]
struct StoppedThread {
    tid: Pid,
    reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// Stopped by the debugger.
    Interrupted,

    /// Stopped by a trap opcode.
    Breakpoint,

    /// Stopped after a single-step.
    SingleStep,

    /// Stopped by a signal, to deliver when resumed.
    Signal(Signal),
}

enum Halt {
    /// The thread stopped on our request.
    Interrupted,

    /// The thread stopped for another reason, now pending.
    Pending,

    /// The thread is gone.
    Gone,
}

impl Session {
    /// Seizes every thread of the process with the given ID, and halts them.
    pub fn attach(process_id: u64) -> crate::Result<Self> {
        let pid = Pid::from_raw(process_id as i32);

        let mut session = Self {
            pid,
            threads: IndexSet::new(),
            stopped: None,
            pending: VecDeque::new(),
            running: false,
            detached: false,
            exited: false,
        };

        for tid in process::thread_ids(pid)? {
            match ptrace::seize(tid, ptrace::Options::PTRACE_O_TRACECLONE) {
                Ok(()) => (),
                // the thread exited in between
                Err(Errno::ESRCH) if tid != pid => continue,
                Err(e) => {
                    tracing::error!(error = %e, tid = tid.as_raw(), "ptrace(PTRACE_SEIZE)");
                    return Err(crate::sys::Error::from(e).into());
                }
            }

            session.threads.insert(tid);

            if let Halt::Gone = session.halt_thread(tid)? {
                session.threads.shift_remove(&tid);
            }
        }

        tracing::debug!(threads = session.threads.len(), "threads seized");

        Ok(session)
    }

    pub fn process_id(&self) -> u64 {
        self.pid.as_raw() as u64
    }

    pub fn image_base(&self) -> crate::Result<u64> {
        Ok(process::image_base(self.pid)?)
    }

    pub fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> crate::sys::Result<()> {
        self.with_stopped_thread(|tid| mem::read_process_memory(tid, addr, buf))
    }

    pub fn write_memory(&mut self, addr: u64, buf: &[u8]) -> crate::sys::Result<()> {
        self.with_stopped_thread(|tid| mem::write_process_memory(tid, addr, buf))
    }

    pub fn get_registers(&mut self) -> crate::Result<Registers> {
        let stopped = self.stopped.ok_or(crate::Error::NoStoppedThread)?;

        Ok(get_thread_registers(stopped.tid)?)
    }

    pub fn set_registers(&mut self, regs: &Registers) -> crate::Result<()> {
        let stopped = self.stopped.ok_or(crate::Error::NoStoppedThread)?;

        Ok(set_thread_registers(stopped.tid, regs)?)
    }

    /// Resumes the threads halted when attaching.
    pub fn attach_debugger(&mut self) -> crate::Result<()> {
        if self.running {
            return Ok(());
        }

        for tid in self.threads.iter().copied() {
            if !self.is_parked(tid) {
                resume_thread(tid, None)?;
            }
        }

        self.running = true;

        Ok(())
    }

    pub fn wait_for_event(&mut self) -> crate::Result<DebugEvent> {
        if self.exited {
            return Err(crate::sys::Error::ProcessExited.into());
        }

        self.attach_debugger()?;

        if self.stopped.is_some() {
            self.resume()?;
        }

        loop {
            let status = match self.pending.pop_front() {
                Some(status) => status,
                None => waitpid(None, Some(WaitPidFlag::__WALL))
                    .inspect_err(|e| tracing::error!(error = %e, "waitpid"))
                    .map_err(crate::sys::Error::from)?,
            };

            match status {
                WaitStatus::Stopped(tid, Signal::SIGTRAP) => {
                    let reason = trap_reason(tid)?;
                    let mut regs = get_thread_registers(tid)?;

                    // trap already lifted while another thread steps over it
                    if reason == StopReason::Breakpoint && rewind_lifted_trap(tid, &mut regs)? {
                        tracing::trace!(
                            tid = tid.as_raw(),
                            addr = format_args!("{:#x}", regs.instr_addr()),
                            "lifted trap rewound"
                        );
                        set_thread_registers(tid, &regs)?;
                        resume_thread(tid, None)?;
                        continue;
                    }

                    let event = match reason {
                        StopReason::Breakpoint => DebugEvent::Breakpoint {
                            addr: regs.instr_addr().wrapping_sub(1),
                        },
                        StopReason::SingleStep => DebugEvent::SingleStep {
                            addr: regs.instr_addr(),
                        },
                        _ => {
                            // sent by another process
                            resume_thread(tid, Some(Signal::SIGTRAP))?;
                            continue;
                        }
                    };

                    self.stopped = Some(StoppedThread { tid, reason });

                    return Ok(event);
                }
                WaitStatus::Stopped(
                    tid,
                    signal @ (Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGILL | Signal::SIGFPE),
                ) => {
                    let addr = get_thread_registers(tid)
                        .map(|regs| regs.instr_addr())
                        .unwrap_or_default();

                    // delivered when resumed or detached
                    self.stopped = Some(StoppedThread {
                        tid,
                        reason: StopReason::Signal(signal),
                    });

                    return Err(crate::Error::TargetFault {
                        thread_id: tid.as_raw() as u64,
                        addr,
                        reason: signal.to_string(),
                    });
                }
                WaitStatus::Stopped(tid, signal) => {
                    tracing::trace!(tid = tid.as_raw(), %signal, "signal forwarded");
                    resume_thread(tid, Some(signal))?;
                }
                WaitStatus::PtraceEvent(tid, _, PTRACE_EVENT_CLONE) => {
                    let new_tid = ptrace::getevent(tid)
                        .map(|id| Pid::from_raw(id as i32))
                        .map_err(crate::sys::Error::from)?;

                    tracing::debug!(tid = new_tid.as_raw(), "thread created");

                    self.threads.insert(new_tid);
                    resume_thread(tid, None)?;
                }
                WaitStatus::PtraceEvent(tid, _, PTRACE_EVENT_STOP) => {
                    // new thread, or late interruption
                    self.threads.insert(tid);
                    resume_thread(tid, None)?;
                }
                WaitStatus::PtraceEvent(tid, _, _) => resume_thread(tid, None)?,
                WaitStatus::Exited(tid, exit_code) => {
                    self.threads.shift_remove(&tid);

                    if tid == self.pid {
                        self.exited = true;
                        return Ok(DebugEvent::Exited { exit_code });
                    }
                }
                WaitStatus::Signaled(tid, signal, _) => {
                    self.threads.shift_remove(&tid);

                    if tid == self.pid {
                        self.exited = true;
                        return Ok(DebugEvent::Exited {
                            exit_code: 128 + signal as i32,
                        });
                    }
                }
                _ => (),
            }
        }
    }

    pub fn resume(&mut self) -> crate::Result<()> {
        let stopped = self.stopped.take().ok_or(crate::Error::NoStoppedThread)?;

        let signal = match stopped.reason {
            StopReason::Signal(signal) => Some(signal),
            _ => None,
        };

        Ok(resume_thread(stopped.tid, signal)?)
    }

    /// Detaches from every thread, leaving them without any pending
    /// single-step.
    pub fn detach(&mut self) -> crate::Result<()> {
        if self.detached {
            return Ok(());
        }
        self.detached = true;

        if self.exited {
            return Ok(());
        }

        let mut stops = Vec::with_capacity(self.threads.len());

        if let Some(stopped) = self.stopped.take() {
            // already handled by the caller
            let reason = match stopped.reason {
                StopReason::Signal(signal) => StopReason::Signal(signal),
                _ => StopReason::Interrupted,
            };
            stops.push((stopped.tid, reason));
        }

        for status in std::mem::take(&mut self.pending) {
            if let Some(stop) = parked_stop(status) {
                stops.push(stop);
            }
        }

        for tid in self.threads.clone() {
            if stops.iter().any(|(stopped, _)| *stopped == tid) {
                continue;
            }

            if !self.running {
                stops.push((tid, StopReason::Interrupted));
                continue;
            }

            match self.halt_thread(tid) {
                Ok(Halt::Interrupted) => stops.push((tid, StopReason::Interrupted)),
                Ok(Halt::Pending) => {
                    if let Some(stop) = self.pending.pop_back().and_then(parked_stop) {
                        stops.push(stop);
                    }
                }
                Ok(Halt::Gone) => (),
                Err(e) => tracing::warn!(error = %e, tid = tid.as_raw(), "failed to halt thread"),
            }
        }

        let mut res = Ok(());

        for (tid, reason) in stops {
            if let Err(e) = release_thread(tid, reason) {
                tracing::warn!(error = %e, tid = tid.as_raw(), "failed to release thread");

                if res.is_ok() {
                    res = Err(e.into());
                }
            }
        }

        res
    }

    /// Runs `f` with a stopped thread of the debuggee.
    ///
    /// The main thread is halted for the duration of `f` if needed.
    fn with_stopped_thread<T, F>(&mut self, f: F) -> crate::sys::Result<T>
    where
        F: FnOnce(Pid) -> crate::sys::Result<T>,
    {
        if self.exited {
            return Err(crate::sys::Error::ProcessExited);
        }

        if let Some(stopped) = self.stopped {
            return f(stopped.tid);
        }

        if let Some(tid) = self.pending.iter().copied().find_map(parked_tid) {
            return f(tid);
        }

        if !self.running {
            let tid = self
                .threads
                .first()
                .copied()
                .ok_or(crate::sys::Error::ProcessExited)?;

            return f(tid);
        }

        match self.halt_thread(self.pid)? {
            Halt::Interrupted => {
                let res = f(self.pid);
                resume_thread(self.pid, None)?;
                res
            }
            Halt::Pending => f(self.pid),
            Halt::Gone => Err(crate::sys::Error::ProcessExited),
        }
    }

    fn halt_thread(&mut self, tid: Pid) -> crate::sys::Result<Halt> {
        ptrace::interrupt(tid).inspect_err(
            |e| tracing::error!(error = %e, tid = tid.as_raw(), "ptrace(PTRACE_INTERRUPT)"),
        )?;

        let status = waitpid(tid, Some(WaitPidFlag::__WALL))?;

        let halt = match status {
            WaitStatus::PtraceEvent(_, _, PTRACE_EVENT_STOP) => Halt::Interrupted,
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                self.pending.push_back(status);
                Halt::Gone
            }
            WaitStatus::Stopped(..) | WaitStatus::PtraceEvent(..) => {
                self.pending.push_back(status);
                Halt::Pending
            }
            _ => return Err(crate::sys::Error::BadWait(status)),
        };

        Ok(halt)
    }

    fn is_parked(&self, tid: Pid) -> bool {
        self.pending
            .iter()
            .copied()
            .filter_map(parked_tid)
            .any(|parked| parked == tid)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::warn!(error = %e, "failed to detach debugger");
        }
    }
}

fn trap_reason(tid: Pid) -> crate::sys::Result<StopReason> {
    let siginfo = ptrace::getsiginfo(tid)?;

    let reason = match siginfo.si_code {
        SI_KERNEL | TRAP_BRKPT => StopReason::Breakpoint,
        TRAP_TRACE => StopReason::SingleStep,
        _ => StopReason::Signal(Signal::SIGTRAP),
    };

    Ok(reason)
}

/// Returns the thread stopped with the given status, if it is still alive.
fn parked_tid(status: WaitStatus) -> Option<Pid> {
    match status {
        WaitStatus::Stopped(tid, _) | WaitStatus::PtraceEvent(tid, _, _) => Some(tid),
        _ => None,
    }
}

fn parked_stop(status: WaitStatus) -> Option<(Pid, StopReason)> {
    let reason = match status {
        WaitStatus::Stopped(tid, Signal::SIGTRAP) => trap_reason(tid).ok()?,
        WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
        WaitStatus::PtraceEvent(..) => StopReason::Interrupted,
        _ => return None,
    };

    Some((parked_tid(status)?, reason))
}

fn resume_thread(tid: Pid, signal: Option<Signal>) -> crate::sys::Result<()> {
    match ptrace::cont(tid, signal) {
        // the thread exited in between
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, tid = tid.as_raw(), "ptrace(PTRACE_CONT)");
            Err(e.into())
        }
    }
}

/// Moves the instruction address of a thread stopped by a trap opcode back
/// onto the opcode, if the opcode was removed since.
///
/// Returns whether `regs` was modified.
fn rewind_lifted_trap(tid: Pid, regs: &mut Registers) -> crate::sys::Result<bool> {
    let trap_addr = regs.instr_addr().wrapping_sub(1);

    let mut opcode = [0u8];
    mem::read_process_memory(tid, trap_addr, &mut opcode)?;

    if opcode[0] == TRAP_OPCODE {
        return Ok(false);
    }

    regs.set_instr_addr(trap_addr);

    Ok(true)
}

/// Detaches from a stopped thread.
///
/// A trap opcode reported by the thread but already removed is rewound.
fn release_thread(tid: Pid, reason: StopReason) -> crate::sys::Result<()> {
    let mut regs = get_thread_registers(tid)?;
    let mut modified = false;

    if regs.trap_flag() {
        regs.set_trap_flag(false);
        modified = true;
    }

    if reason == StopReason::Breakpoint && rewind_lifted_trap(tid, &mut regs)? {
        modified = true;
    }

    if modified {
        set_thread_registers(tid, &regs)?;
    }

    let signal = match reason {
        StopReason::Signal(signal) => Some(signal),
        _ => None,
    };

    match ptrace::detach(tid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, tid = tid.as_raw(), "ptrace(PTRACE_DETACH)");
            Err(e.into())
        }
    }
}
