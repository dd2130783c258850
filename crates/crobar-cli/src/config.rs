use std::str::FromStr;

use crobar_debugger::DEFAULT_PREFERRED_BASE;

/// Configuration of process hooking.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct HookConfig {
    /// Image base the debuggee's executable was built for.
    #[knus(child, default = DEFAULT_PREFERRED_BASE, unwrap(argument))]
    pub preferred_base: u64,

    /// Number of breakpoint hits after which to stop hooking.
    #[knus(child, unwrap(argument))]
    pub stop_after: Option<u64>,

    /// Patches to apply, in order.
    #[knus(children(name = "patch"))]
    pub patches: Vec<PatchConfig>,

    /// Logging breakpoints to install.
    #[knus(children(name = "breakpoint"))]
    pub breakpoints: Vec<BreakpointConfig>,
}

/// Configuration of a patch.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct PatchConfig {
    /// Name of the patch.
    #[knus(argument)]
    pub name: String,

    /// Build-relative address of the patch.
    #[knus(property)]
    pub address: u64,

    /// Bytes expected at the address.
    #[knus(property, str)]
    pub old: HexBytes,

    /// Replacement bytes.
    #[knus(property, str)]
    pub new: HexBytes,
}

/// Configuration of a logging breakpoint.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakpointConfig {
    /// Name of the breakpoint.
    #[knus(argument)]
    pub name: String,

    /// Build-relative address of the breakpoint.
    #[knus(property)]
    pub address: u64,
}

/// Bytes written as a hex string (whitespace is ignored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();

        hex::decode(digits).map(Self)
    }
}
