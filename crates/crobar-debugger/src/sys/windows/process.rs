use std::mem::size_of;

use windows::Win32::Foundation::{HANDLE, HMODULE};
use windows::Win32::System::ProcessStatus::{
    EnumProcessModules, EnumProcesses, GetModuleBaseNameW,
};
use windows::Win32::System::Threading::{PROCESS_QUERY_INFORMATION, PROCESS_VM_READ};

use super::handle::OwnedHandle;
use crate::sys::Error;

/// Maximum number of processes enumerated.
const MAX_PROCESSES: usize = 4096;

/// Returns the ID of the first process whose executable name starts with
/// `name` (ignoring case).
pub fn find_process_by_name(name: &str) -> crate::Result<u64> {
    let mut pids = vec![0u32; MAX_PROCESSES];
    let mut needed = 0u32;

    unsafe {
        EnumProcesses(
            pids.as_mut_ptr(),
            (pids.len() * size_of::<u32>()) as u32,
            &mut needed,
        )
    }
    .inspect_err(|e| tracing::error!(error = %e, "EnumProcesses"))
    .map_err(Error::from)?;

    let count = (needed as usize / size_of::<u32>()).min(pids.len());

    let mut found: Option<u64> = None;

    for pid in pids[..count].iter().copied() {
        // system processes can't be opened
        let Some(module_name) = process_name(pid) else {
            continue;
        };

        if name_matches(&module_name, name) {
            found = Some(found.map_or(pid as u64, |found| found.min(pid as u64)));
        }
    }

    found.ok_or_else(|| crate::Error::ProcessNotFound(name.to_owned()))
}

fn process_name(pid: u32) -> Option<String> {
    let process = OwnedHandle::open_process(pid, PROCESS_QUERY_INFORMATION | PROCESS_VM_READ).ok()?;

    let module = exe_module(process.raw()).ok()?;

    let mut buf = [0u16; 260];
    let len = unsafe { GetModuleBaseNameW(process.raw(), module, &mut buf) } as usize;

    (len != 0).then(|| String::from_utf16_lossy(&buf[..len]))
}

fn name_matches(module_name: &str, name: &str) -> bool {
    module_name.to_lowercase().starts_with(&name.to_lowercase())
}

/// Returns the executable module of the given process.
pub fn exe_module(process: HANDLE) -> crate::sys::Result<HMODULE> {
    let mut module = HMODULE::default();
    let mut needed = 0u32;

    // the first module is the executable
    unsafe {
        EnumProcessModules(
            process,
            &mut module,
            size_of::<HMODULE>() as u32,
            &mut needed,
        )
    }
    .inspect_err(|e| tracing::error!(error = %e, "EnumProcessModules"))?;

    if needed == 0 {
        return Err(Error::MissingExeModule);
    }

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::name_matches;

    #[test]
    fn module_name_prefix() {
        assert!(name_matches("Talos.exe", "talos"));
        assert!(name_matches("TALOS.EXE", "Talos.exe"));
        assert!(!name_matches("explorer.exe", "talos"));
    }
}
