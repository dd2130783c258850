use std::ffi::c_void;

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Diagnostics::Debug::{
    FlushInstructionCache, ReadProcessMemory, WriteProcessMemory,
};
use windows::Win32::System::Memory::{
    PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualProtectEx,
};

use crate::sys::Error;

/// Reads memory from the process with the given handle.
pub fn read_process_memory(process: HANDLE, addr: u64, buf: &mut [u8]) -> crate::sys::Result<()> {
    let mut read = 0;

    unsafe {
        ReadProcessMemory(
            process,
            addr as *const c_void,
            buf.as_mut_ptr().cast(),
            buf.len(),
            Some(&mut read),
        )
    }
    .inspect_err(
        |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "ReadProcessMemory"),
    )?;

    if read != buf.len() {
        return Err(Error::PartialMemOp(read, buf.len()));
    }

    Ok(())
}

/// Writes memory into the process with the given handle.
///
/// The written pages are made writable for the duration of the write, so
/// code can be patched.
pub fn write_process_memory(process: HANDLE, addr: u64, buf: &[u8]) -> crate::sys::Result<()> {
    let mut old_protect = PAGE_PROTECTION_FLAGS::default();

    unsafe {
        VirtualProtectEx(
            process,
            addr as *const c_void,
            buf.len(),
            PAGE_EXECUTE_READWRITE,
            &mut old_protect,
        )
    }
    .inspect_err(
        |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "VirtualProtectEx"),
    )?;

    let mut written = 0;

    let res = unsafe {
        WriteProcessMemory(
            process,
            addr as *const c_void,
            buf.as_ptr().cast(),
            buf.len(),
            Some(&mut written),
        )
    };

    let mut protect = PAGE_PROTECTION_FLAGS::default();

    if let Err(e) = unsafe {
        VirtualProtectEx(
            process,
            addr as *const c_void,
            buf.len(),
            old_protect,
            &mut protect,
        )
    } {
        tracing::warn!(error = %e, addr = format_args!("{addr:#x}"), "failed to restore page protection");
    }

    res.inspect_err(
        |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "WriteProcessMemory"),
    )?;

    if written != buf.len() {
        return Err(Error::PartialMemOp(written, buf.len()));
    }

    unsafe { FlushInstructionCache(process, Some(addr as *const c_void), buf.len()) }?;

    Ok(())
}
