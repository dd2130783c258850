use crobar_hook::breakpoint::TRAP_OPCODE;
use crobar_hook::debugger::{DebugEvent, Registers as _};
use windows::Win32::Foundation::{BOOL, ERROR_SEM_TIMEOUT, NTSTATUS};
use windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, CREATE_PROCESS_DEBUG_EVENT, DEBUG_EVENT, DebugActiveProcess,
    DebugActiveProcessStop, DebugSetProcessKillOnExit, EXCEPTION_DEBUG_EVENT,
    EXIT_PROCESS_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT, WaitForDebugEvent,
};
use windows::Win32::System::Threading::{
    IsWow64Process, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
    PROCESS_VM_WRITE,
};

use super::handle::{OwnedHandle, close_handle};
use super::thread::{Registers, get_thread_registers, set_thread_registers};
use super::{mem, process};
use crate::sys::Error;

const DBG_CONTINUE: NTSTATUS = NTSTATUS(0x0001_0002);
const DBG_EXCEPTION_NOT_HANDLED: NTSTATUS = NTSTATUS(0x8001_0001_u32 as i32);

const EXCEPTION_BREAKPOINT_CODE: u32 = 0x8000_0003;
const EXCEPTION_SINGLE_STEP_CODE: u32 = 0x8000_0004;

/// Breakpoint raised by a 32-bit thread under WOW64.
const STATUS_WX86_BREAKPOINT_CODE: u32 = 0x4000_001f;

/// Single-step raised by a 32-bit thread under WOW64.
const STATUS_WX86_SINGLE_STEP_CODE: u32 = 0x4000_001e;

const EXCEPTION_ACCESS_VIOLATION_CODE: u32 = 0xc000_0005;
const EXCEPTION_ILLEGAL_INSTRUCTION_CODE: u32 = 0xc000_001d;
const EXCEPTION_PRIV_INSTRUCTION_CODE: u32 = 0xc000_0096;
const EXCEPTION_STACK_OVERFLOW_CODE: u32 = 0xc000_00fd;

/// Timeout (in milliseconds) of a single wait for debug events.
const WAIT_TIMEOUT_MS: u32 = 100;

/// Timeout (in milliseconds) for draining debug events when detaching.
const DRAIN_TIMEOUT_MS: u32 = 50;

pub struct Session {
    /// Process ID of the debuggee.
    pid: u32,

    /// Handle to the debuggee.
    process: OwnedHandle,

    /// Whether the debuggee is a 32-bit process on a 64-bit host.
    wow64: bool,

    /// Thread which reported the last debug event.
    stopped: Option<StoppedThread>,

    /// Whether the debugger is attached.
    attached: bool,

    detached: bool,

    exited: bool,
}

#[derive(Debug, Clone, Copy)]
struct StoppedThread {
    tid: u32,
    reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Breakpoint,
    SingleStep,

    /// Stopped by an exception, passed to the debuggee when resumed.
    Fault,
}

impl StopReason {
    const fn continue_status(self) -> NTSTATUS {
        match self {
            Self::Breakpoint | Self::SingleStep => DBG_CONTINUE,
            Self::Fault => DBG_EXCEPTION_NOT_HANDLED,
        }
    }
}

impl Session {
    /// Opens the process with the given ID.
    ///
    /// The debugger itself is attached by
    /// [attach_debugger](Self::attach_debugger).
    pub fn attach(process_id: u64) -> crate::Result<Self> {
        let pid = process_id as u32;

        let process = OwnedHandle::open_process(
            pid,
            PROCESS_VM_OPERATION | PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_QUERY_INFORMATION,
        )?;

        let mut wow64 = BOOL::default();
        unsafe { IsWow64Process(process.raw(), &mut wow64) }
            .inspect_err(|e| tracing::error!(error = %e, pid, "IsWow64Process"))
            .map_err(Error::from)?;

        tracing::debug!(wow64 = wow64.as_bool(), "process opened");

        Ok(Self {
            pid,
            process,
            wow64: wow64.as_bool(),
            stopped: None,
            attached: false,
            detached: false,
            exited: false,
        })
    }

    pub fn process_id(&self) -> u64 {
        self.pid as u64
    }

    pub fn image_base(&self) -> crate::Result<u64> {
        let module = process::exe_module(self.process.raw())?;

        Ok(module.0 as u64)
    }

    pub fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> crate::sys::Result<()> {
        if self.exited {
            return Err(Error::ProcessExited);
        }

        mem::read_process_memory(self.process.raw(), addr, buf)
    }

    pub fn write_memory(&mut self, addr: u64, buf: &[u8]) -> crate::sys::Result<()> {
        if self.exited {
            return Err(Error::ProcessExited);
        }

        mem::write_process_memory(self.process.raw(), addr, buf)
    }

    pub fn get_registers(&mut self) -> crate::Result<Registers> {
        let stopped = self.stopped.ok_or(crate::Error::NoStoppedThread)?;

        Ok(get_thread_registers(stopped.tid, self.wow64)?)
    }

    pub fn set_registers(&mut self, regs: &Registers) -> crate::Result<()> {
        let stopped = self.stopped.ok_or(crate::Error::NoStoppedThread)?;

        Ok(set_thread_registers(stopped.tid, regs)?)
    }

    pub fn attach_debugger(&mut self) -> crate::Result<()> {
        if self.attached {
            return Ok(());
        }

        unsafe { DebugActiveProcess(self.pid) }
            .inspect_err(|e| tracing::error!(error = %e, pid = self.pid, "DebugActiveProcess"))
            .map_err(Error::from)?;

        self.attached = true;

        // the debuggee must survive us
        unsafe { DebugSetProcessKillOnExit(false) }
            .inspect_err(|e| tracing::error!(error = %e, "DebugSetProcessKillOnExit"))
            .map_err(Error::from)?;

        Ok(())
    }

    pub fn wait_for_event(&mut self) -> crate::Result<DebugEvent> {
        if self.exited {
            return Err(Error::ProcessExited.into());
        }

        self.attach_debugger()?;

        if self.stopped.is_some() {
            self.resume()?;
        }

        loop {
            let Some(event) = next_debug_event(WAIT_TIMEOUT_MS)? else {
                continue;
            };

            let tid = event.dwThreadId;

            if event.dwProcessId != self.pid {
                continue_event(event.dwProcessId, tid, DBG_CONTINUE)?;
                continue;
            }

            match event.dwDebugEventCode {
                EXCEPTION_DEBUG_EVENT => {
                    let info = unsafe { event.u.Exception };
                    let code = info.ExceptionRecord.ExceptionCode.0 as u32;
                    let addr = info.ExceptionRecord.ExceptionAddress as u64;

                    match code {
                        EXCEPTION_BREAKPOINT_CODE | STATUS_WX86_BREAKPOINT_CODE => {
                            // trap already lifted while another thread steps over it
                            if self.release_trap(tid, addr)? {
                                tracing::trace!(
                                    tid,
                                    addr = format_args!("{addr:#x}"),
                                    "lifted trap rewound"
                                );
                                continue_event(self.pid, tid, DBG_CONTINUE)?;
                                continue;
                            }

                            self.stopped = Some(StoppedThread {
                                tid,
                                reason: StopReason::Breakpoint,
                            });

                            return Ok(DebugEvent::Breakpoint { addr });
                        }
                        EXCEPTION_SINGLE_STEP_CODE | STATUS_WX86_SINGLE_STEP_CODE => {
                            self.stopped = Some(StoppedThread {
                                tid,
                                reason: StopReason::SingleStep,
                            });

                            return Ok(DebugEvent::SingleStep { addr });
                        }
                        _ => (),
                    }

                    match fault_name(code) {
                        // the debuggee's own handlers didn't catch it
                        Some(reason) if info.dwFirstChance == 0 => {
                            self.stopped = Some(StoppedThread {
                                tid,
                                reason: StopReason::Fault,
                            });

                            return Err(crate::Error::TargetFault {
                                thread_id: tid as u64,
                                addr,
                                reason: reason.to_owned(),
                            });
                        }
                        _ => {
                            tracing::trace!(
                                tid,
                                code = format_args!("{code:#x}"),
                                "exception forwarded"
                            );
                            continue_event(self.pid, tid, DBG_EXCEPTION_NOT_HANDLED)?;
                        }
                    }
                }
                EXIT_PROCESS_DEBUG_EVENT => {
                    let exit_code = unsafe { event.u.ExitProcess.dwExitCode };

                    continue_event(self.pid, tid, DBG_CONTINUE)?;
                    self.exited = true;

                    return Ok(DebugEvent::Exited {
                        exit_code: exit_code as i32,
                    });
                }
                _ => {
                    close_event_handles(&event);
                    continue_event(self.pid, tid, DBG_CONTINUE)?;
                }
            }
        }
    }

    pub fn resume(&mut self) -> crate::Result<()> {
        let stopped = self.stopped.take().ok_or(crate::Error::NoStoppedThread)?;

        Ok(continue_event(
            self.pid,
            stopped.tid,
            stopped.reason.continue_status(),
        )?)
    }

    /// Detaches from the debuggee, leaving its threads without any pending
    /// single-step.
    pub fn detach(&mut self) -> crate::Result<()> {
        if self.detached {
            return Ok(());
        }
        self.detached = true;

        if self.exited || !self.attached {
            return Ok(());
        }

        if let Some(stopped) = self.stopped.take() {
            // already handled by the caller
            if let Err(e) = self.clear_trap_flag(stopped.tid) {
                tracing::warn!(error = %e, tid = stopped.tid, "failed to release thread");
            }

            continue_event(self.pid, stopped.tid, stopped.reason.continue_status())?;
        }

        while let Some(event) = next_debug_event(DRAIN_TIMEOUT_MS)? {
            let tid = event.dwThreadId;

            if event.dwProcessId != self.pid {
                continue_event(event.dwProcessId, tid, DBG_CONTINUE)?;
                continue;
            }

            let status = match event.dwDebugEventCode {
                EXCEPTION_DEBUG_EVENT => {
                    let info = unsafe { event.u.Exception };
                    let code = info.ExceptionRecord.ExceptionCode.0 as u32;
                    let addr = info.ExceptionRecord.ExceptionAddress as u64;

                    let res = match code {
                        EXCEPTION_BREAKPOINT_CODE | STATUS_WX86_BREAKPOINT_CODE => {
                            self.release_trap(tid, addr).map(|_| DBG_CONTINUE)
                        }
                        EXCEPTION_SINGLE_STEP_CODE | STATUS_WX86_SINGLE_STEP_CODE => {
                            self.clear_trap_flag(tid).map(|()| DBG_CONTINUE)
                        }
                        _ => Ok(DBG_EXCEPTION_NOT_HANDLED),
                    };

                    res.unwrap_or_else(|e| {
                        tracing::warn!(error = %e, tid, "failed to release thread");
                        DBG_CONTINUE
                    })
                }
                EXIT_PROCESS_DEBUG_EVENT => {
                    self.exited = true;
                    DBG_CONTINUE
                }
                _ => {
                    close_event_handles(&event);
                    DBG_CONTINUE
                }
            };

            continue_event(self.pid, tid, status)?;
        }

        if self.exited {
            return Ok(());
        }

        unsafe { DebugActiveProcessStop(self.pid) }
            .inspect_err(|e| tracing::error!(error = %e, pid = self.pid, "DebugActiveProcessStop"))
            .map_err(Error::from)?;

        Ok(())
    }

    fn clear_trap_flag(&self, tid: u32) -> crate::sys::Result<()> {
        let mut regs = get_thread_registers(tid, self.wow64)?;

        if regs.trap_flag() {
            regs.set_trap_flag(false);
            set_thread_registers(tid, &regs)?;
        }

        Ok(())
    }

    /// Rewinds a thread stopped by a trap opcode already removed, so the
    /// original instruction executes.
    ///
    /// Returns whether the thread was rewound.
    fn release_trap(&self, tid: u32, addr: u64) -> crate::sys::Result<bool> {
        let mut opcode = [0u8];
        mem::read_process_memory(self.process.raw(), addr, &mut opcode)?;

        if opcode[0] == TRAP_OPCODE {
            return Ok(false);
        }

        let mut regs = get_thread_registers(tid, self.wow64)?;
        regs.set_instr_addr(addr);
        regs.set_trap_flag(false);

        set_thread_registers(tid, &regs)?;

        Ok(true)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::warn!(error = %e, "failed to detach debugger");
        }
    }
}

/// Waits for the next debug event, returning `None` on timeout.
fn next_debug_event(timeout_ms: u32) -> crate::sys::Result<Option<DEBUG_EVENT>> {
    let mut event = DEBUG_EVENT::default();

    match unsafe { WaitForDebugEvent(&mut event, timeout_ms) } {
        Ok(()) => Ok(Some(event)),
        Err(e) if e.code() == ERROR_SEM_TIMEOUT.to_hresult() => Ok(None),
        Err(e) => {
            tracing::error!(error = %e, "WaitForDebugEvent");
            Err(e.into())
        }
    }
}

fn continue_event(pid: u32, tid: u32, status: NTSTATUS) -> crate::sys::Result<()> {
    unsafe { ContinueDebugEvent(pid, tid, status) }
        .inspect_err(|e| tracing::error!(error = %e, tid, "ContinueDebugEvent"))?;

    Ok(())
}

/// Closes the file handles passed along with debug events.
fn close_event_handles(event: &DEBUG_EVENT) {
    match event.dwDebugEventCode {
        CREATE_PROCESS_DEBUG_EVENT => close_handle(unsafe { event.u.CreateProcessInfo.hFile }),
        LOAD_DLL_DEBUG_EVENT => close_handle(unsafe { event.u.LoadDll.hFile }),
        _ => (),
    }
}

fn fault_name(code: u32) -> Option<&'static str> {
    let name = match code {
        EXCEPTION_ACCESS_VIOLATION_CODE => "access violation",
        EXCEPTION_ILLEGAL_INSTRUCTION_CODE => "illegal instruction",
        EXCEPTION_PRIV_INSTRUCTION_CODE => "privileged instruction",
        EXCEPTION_STACK_OVERFLOW_CODE => "stack overflow",
        _ => return None,
    };

    Some(name)
}
