use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Threading::{
    OpenProcess, OpenThread, PROCESS_ACCESS_RIGHTS, THREAD_ACCESS_RIGHTS,
};

/// Handle closed when dropped.
pub struct OwnedHandle(HANDLE);

impl OwnedHandle {
    pub fn open_process(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> crate::sys::Result<Self> {
        let handle = unsafe { OpenProcess(access, false, pid) }
            .inspect_err(|e| tracing::debug!(error = %e, pid, "OpenProcess"))?;

        Ok(Self(handle))
    }

    pub fn open_thread(tid: u32, access: THREAD_ACCESS_RIGHTS) -> crate::sys::Result<Self> {
        let handle = unsafe { OpenThread(access, false, tid) }
            .inspect_err(|e| tracing::error!(error = %e, tid, "OpenThread"))?;

        Ok(Self(handle))
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        close_handle(self.0);
    }
}

/// Closes a handle received from the OS, if valid.
pub fn close_handle(handle: HANDLE) {
    if handle.is_invalid() {
        return;
    }

    if let Err(e) = unsafe { CloseHandle(handle) } {
        tracing::warn!(error = %e, "CloseHandle");
    }
}
