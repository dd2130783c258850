use crobar_hook::address::ImageBase;
use crobar_hook::debugger::{DebugEvent, DebugSession, MemoryAccess};

use crate::sys;

/// Image base the debuggee is assumed to be built for, by default.
#[cfg(target_os = "windows")]
pub const DEFAULT_PREFERRED_BASE: u64 = 0x0040_0000;

/// Image base the debuggee is assumed to be built for, by default.
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_PREFERRED_BASE: u64 = 0x0804_8000;

/// Configuration of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Image base the debuggee's executable was built for.
    ///
    /// Build-relative addresses are translated against it.
    pub preferred_base: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preferred_base: DEFAULT_PREFERRED_BASE,
        }
    }
}

/// Debugging session attached to a running process.
///
/// When dropped, the debugger is detached from the debuggee (ignoring
/// errors).
pub struct Session {
    inner: sys::Session,

    /// Image base of the debuggee.
    image: ImageBase,
}

impl Session {
    /// Attaches to the process with the given ID.
    ///
    /// The debuggee doesn't report any debug event before
    /// [attach_debugger](DebugSession::attach_debugger) is called.
    #[tracing::instrument(name = "Attach", skip(config))]
    pub fn attach(process_id: u64, config: SessionConfig) -> crate::Result<Self> {
        let inner = sys::Session::attach(process_id)?;

        let image = ImageBase::new(config.preferred_base, inner.image_base()?);

        tracing::info!(
            preferred_base = format_args!("{:#x}", image.preferred()),
            actual_base = format_args!("{:#x}", image.actual()),
            offset = image.offset(),
            "debugger attached"
        );

        Ok(Self { inner, image })
    }

    /// Attaches to the first process whose name starts with `name`.
    pub fn attach_by_name(name: &str, config: SessionConfig) -> crate::Result<Self> {
        let process_id = sys::find_process_by_name(name)?;

        tracing::debug!(name, process_id, "process found");

        Self::attach(process_id, config)
    }

    /// Returns the image base of the debuggee.
    pub fn image_base(&self) -> ImageBase {
        self.image
    }
}

impl MemoryAccess for Session {
    type Error = crate::Error;

    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> crate::Result<()> {
        let len = buf.len();

        self.inner
            .read_memory(addr, buf)
            .map_err(|source| crate::Error::AccessFault { addr, len, source })
    }

    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> crate::Result<()> {
        self.inner
            .write_memory(addr, buf)
            .map_err(|source| crate::Error::AccessFault {
                addr,
                len: buf.len(),
                source,
            })
    }
}

impl DebugSession for Session {
    type Registers = sys::Registers;

    fn process_id(&self) -> u64 {
        self.inner.process_id()
    }

    fn from_relative_addr(&self, addr: u64) -> u64 {
        self.image.to_absolute(addr)
    }

    fn get_registers(&mut self) -> crate::Result<Self::Registers> {
        self.inner.get_registers()
    }

    fn set_registers(&mut self, regs: &Self::Registers) -> crate::Result<()> {
        self.inner.set_registers(regs)
    }

    fn attach_debugger(&mut self) -> crate::Result<()> {
        self.inner.attach_debugger()
    }

    fn wait_for_event(&mut self) -> crate::Result<DebugEvent> {
        let event = self.inner.wait_for_event()?;

        tracing::trace!(?event, "debug event");

        Ok(event)
    }

    fn resume(&mut self) -> crate::Result<()> {
        self.inner.resume()
    }

    #[tracing::instrument(name = "Detach", skip_all, fields(pid = self.inner.process_id()))]
    fn detach(&mut self) -> crate::Result<()> {
        self.inner.detach()
    }
}
