//! Crate implementing the CLI commands.

mod cli;
mod config;
mod run;

pub use self::cli::{CliAction, CliOpts, CliTarget};
pub use self::config::{BreakpointConfig, HexBytes, HookConfig, PatchConfig};
pub use self::run::evaluate_attach;
