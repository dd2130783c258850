/// Image base of the debuggee's executable.
///
/// Patch and breakpoint addresses are usually known relative to the base
/// the executable was built for (e.g., `0x400000` for a PE file). The loader
/// may however map it somewhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBase {
    /// Base address the executable was built for.
    preferred: u64,

    /// Base address the executable was loaded at.
    actual: u64,
}

impl ImageBase {
    /// Creates a new [ImageBase].
    pub const fn new(preferred: u64, actual: u64) -> Self {
        Self { preferred, actual }
    }

    /// Returns the base address the executable was built for.
    pub const fn preferred(&self) -> u64 {
        self.preferred
    }

    /// Returns the base address the executable was loaded at.
    pub const fn actual(&self) -> u64 {
        self.actual
    }

    /// Returns how far the executable was moved by the loader.
    pub const fn offset(&self) -> i64 {
        self.actual.wrapping_sub(self.preferred) as i64
    }

    /// Converts a build-relative address into an absolute address.
    pub const fn to_absolute(&self, addr: u64) -> u64 {
        addr.wrapping_add(self.actual).wrapping_sub(self.preferred)
    }
}
