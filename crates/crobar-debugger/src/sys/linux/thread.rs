use std::ffi::c_void;
use std::fmt;
use std::mem;

use nix::errno::Errno;
use nix::libc;
use nix::sys::ptrace::regset::NT_PRSTATUS;
use nix::sys::ptrace::{self, RegisterSet as _};
use nix::unistd::Pid;

/// Register state of a stopped thread.
#[derive(Clone, Copy)]
pub struct Registers(RegisterSet);

#[derive(Clone, Copy)]
enum RegisterSet {
    B32(user_regs_32),
    B64(user_regs_64),
}

pub fn get_thread_registers(tid: Pid) -> crate::sys::Result<Registers> {
    let mut data = mem::MaybeUninit::<user_regs_64>::uninit();

    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: mem::size_of::<user_regs_64>(),
    };

    unsafe {
        Errno::result(libc::ptrace(
            ptrace::Request::PTRACE_GETREGSET as _,
            tid.as_raw(),
            NT_PRSTATUS::VALUE as libc::c_int,
            &mut iov as *mut libc::iovec,
        ))
        .inspect_err(|e| tracing::error!(error = %e, tid = tid.as_raw(), "ptrace(PTRACE_GETREGSET)"))?
    };

    // the kernel tells which layout it filled
    let regs = if iov.iov_len == mem::size_of::<user_regs_64>() {
        RegisterSet::B64(unsafe { data.assume_init() })
    } else {
        RegisterSet::B32(unsafe { *data.as_ptr().cast::<user_regs_32>() })
    };

    Ok(Registers(regs))
}

pub fn set_thread_registers(tid: Pid, regs: &Registers) -> crate::sys::Result<()> {
    match &regs.0 {
        RegisterSet::B32(regs) => set_register_set(tid, regs),
        RegisterSet::B64(regs) => set_register_set(tid, regs),
    }
}

fn set_register_set<T>(tid: Pid, regs: &T) -> crate::sys::Result<()> {
    let mut iov = libc::iovec {
        iov_base: regs as *const T as *mut c_void,
        iov_len: mem::size_of::<T>(),
    };

    unsafe {
        Errno::result(libc::ptrace(
            ptrace::Request::PTRACE_SETREGSET as _,
            tid.as_raw(),
            NT_PRSTATUS::VALUE as libc::c_int,
            &mut iov as *mut libc::iovec,
        ))
        .inspect_err(|e| tracing::error!(error = %e, tid = tid.as_raw(), "ptrace(PTRACE_SETREGSET)"))?
    };

    Ok(())
}

impl crobar_hook::debugger::Registers for Registers {
    fn instr_addr(&self) -> u64 {
        match &self.0 {
            RegisterSet::B32(regs) => regs.eip as u64,
            RegisterSet::B64(regs) => regs.rip,
        }
    }

    fn set_instr_addr(&mut self, addr: u64) {
        match &mut self.0 {
            RegisterSet::B32(regs) => regs.eip = addr as u32,
            RegisterSet::B64(regs) => regs.rip = addr,
        }
    }

    fn stack_addr(&self) -> u64 {
        match &self.0 {
            RegisterSet::B32(regs) => regs.esp as u64,
            RegisterSet::B64(regs) => regs.rsp,
        }
    }

    fn flags(&self) -> u64 {
        match &self.0 {
            RegisterSet::B32(regs) => regs.eflags as u64,
            RegisterSet::B64(regs) => regs.eflags,
        }
    }

    fn set_flags(&mut self, flags: u64) {
        match &mut self.0 {
            RegisterSet::B32(regs) => regs.eflags = flags as u32,
            RegisterSet::B64(regs) => regs.eflags = flags,
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

#[repr(C)]
#[allow(non_camel_case_types, dead_code)]
#[derive(Clone, Copy)]
struct user_regs_32 {
    ebx: u32,
    ecx: u32,
    edx: u32,
    esi: u32,
    edi: u32,
    ebp: u32,
    eax: u32,
    ds: u32,
    es: u32,
    fs: u32,
    gs: u32,
    orig_eax: u32,
    eip: u32,
    cs: u32,
    eflags: u32,
    esp: u32,
    ss: u32,
}

#[repr(C)]
#[allow(non_camel_case_types, dead_code)]
#[derive(Clone, Copy)]
struct user_regs_64 {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbp: u64,
    rbx: u64,
    r11: u64,
    r10: u64,
    r9: u64,
    r8: u64,
    rax: u64,
    rcx: u64,
    rdx: u64,
    rsi: u64,
    rdi: u64,
    orig_rax: u64,
    rip: u64,
    cs: u64,
    eflags: u64,
    rsp: u64,
    ss: u64,
    fs_base: u64,
    gs_base: u64,
    ds: u64,
    es: u64,
    fs: u64,
    gs: u64,
}
