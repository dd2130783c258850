use std::fmt;

#[cfg(target_arch = "x86_64")]
use windows::Win32::System::Diagnostics::Debug::{
    CONTEXT_FULL_AMD64 as CONTEXT_FULL, WOW64_CONTEXT, WOW64_CONTEXT_FULL, Wow64GetThreadContext,
    Wow64SetThreadContext,
};
#[cfg(target_arch = "x86")]
use windows::Win32::System::Diagnostics::Debug::CONTEXT_FULL_X86 as CONTEXT_FULL;
use windows::Win32::System::Diagnostics::Debug::{CONTEXT, GetThreadContext, SetThreadContext};
use windows::Win32::System::Threading::{
    THREAD_GET_CONTEXT, THREAD_QUERY_INFORMATION, THREAD_SET_CONTEXT,
};

use super::handle::OwnedHandle;

/// Register state of a stopped thread.
#[derive(Clone)]
pub struct Registers(RegisterSet);

#[derive(Clone)]
enum RegisterSet {
    Native(Box<CONTEXT>),

    /// 32-bit thread running on a 64-bit host.
    #[cfg(target_arch = "x86_64")]
    Wow64(Box<WOW64_CONTEXT>),
}

/// Retrieves registers of the stopped thread with the given ID.
///
/// `wow64` tells whether the thread belongs to a 32-bit process running
/// on a 64-bit host.
pub fn get_thread_registers(tid: u32, wow64: bool) -> crate::sys::Result<Registers> {
    let thread = OwnedHandle::open_thread(tid, THREAD_GET_CONTEXT | THREAD_QUERY_INFORMATION)?;

    #[cfg(target_arch = "x86_64")]
    if wow64 {
        let mut ctx = Box::new(WOW64_CONTEXT {
            ContextFlags: WOW64_CONTEXT_FULL,
            ..Default::default()
        });

        unsafe { Wow64GetThreadContext(thread.raw(), ctx.as_mut()) }
            .inspect_err(|e| tracing::error!(error = %e, tid, "Wow64GetThreadContext"))?;

        return Ok(Registers(RegisterSet::Wow64(ctx)));
    }

    #[cfg(target_arch = "x86")]
    let _ = wow64;

    let mut ctx = Box::new(CONTEXT {
        ContextFlags: CONTEXT_FULL,
        ..Default::default()
    });

    unsafe { GetThreadContext(thread.raw(), ctx.as_mut()) }
        .inspect_err(|e| tracing::error!(error = %e, tid, "GetThreadContext"))?;

    Ok(Registers(RegisterSet::Native(ctx)))
}

/// Modifies registers of the stopped thread with the given ID.
pub fn set_thread_registers(tid: u32, regs: &Registers) -> crate::sys::Result<()> {
    let thread = OwnedHandle::open_thread(tid, THREAD_SET_CONTEXT | THREAD_QUERY_INFORMATION)?;

    match &regs.0 {
        RegisterSet::Native(ctx) => unsafe { SetThreadContext(thread.raw(), ctx.as_ref()) }
            .inspect_err(|e| tracing::error!(error = %e, tid, "SetThreadContext"))?,

        #[cfg(target_arch = "x86_64")]
        RegisterSet::Wow64(ctx) => unsafe { Wow64SetThreadContext(thread.raw(), ctx.as_ref()) }
            .inspect_err(|e| tracing::error!(error = %e, tid, "Wow64SetThreadContext"))?,
    }

    Ok(())
}

impl crobar_hook::debugger::Registers for Registers {
    fn instr_addr(&self) -> u64 {
        match &self.0 {
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Native(ctx) => ctx.Rip,
            #[cfg(target_arch = "x86")]
            RegisterSet::Native(ctx) => ctx.Eip as u64,
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Wow64(ctx) => ctx.Eip as u64,
        }
    }

    fn set_instr_addr(&mut self, addr: u64) {
        match &mut self.0 {
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Native(ctx) => ctx.Rip = addr,
            #[cfg(target_arch = "x86")]
            RegisterSet::Native(ctx) => ctx.Eip = addr as u32,
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Wow64(ctx) => ctx.Eip = addr as u32,
        }
    }

    fn stack_addr(&self) -> u64 {
        match &self.0 {
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Native(ctx) => ctx.Rsp,
            #[cfg(target_arch = "x86")]
            RegisterSet::Native(ctx) => ctx.Esp as u64,
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Wow64(ctx) => ctx.Esp as u64,
        }
    }

    fn flags(&self) -> u64 {
        match &self.0 {
            RegisterSet::Native(ctx) => ctx.EFlags as u64,
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Wow64(ctx) => ctx.EFlags as u64,
        }
    }

    fn set_flags(&mut self, flags: u64) {
        match &mut self.0 {
            RegisterSet::Native(ctx) => ctx.EFlags = flags as u32,
            #[cfg(target_arch = "x86_64")]
            RegisterSet::Wow64(ctx) => ctx.EFlags = flags as u32,
        }
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crobar_hook::debugger::Registers as _;

        f.debug_struct("Registers")
            .field("ip", &format_args!("{:#x}", self.instr_addr()))
            .field("sp", &format_args!("{:#x}", self.stack_addr()))
            .field("flags", &format_args!("{:#x}", self.flags()))
            .finish_non_exhaustive()
    }
}
