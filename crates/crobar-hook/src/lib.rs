//! This crate allows to hook into a running process with software
//! breakpoints, and to patch its code in place.
//!
//! Three main components are provided:
//! - A few traits to implement a debugger backend (memory, registers and
//!   debug events of an attached process). The default backends live in
//!   `crobar-debugger`.
//! - A [patch verifier](self::patch::patch_memory), which only replaces
//!   bytes in the debuggee after checking what is currently there.
//! - A [breakpoint handler](self::breakpoint::BreakpointHandler), which
//!   installs trap opcodes and invokes callbacks whenever they are hit,
//!   stepping over the original instruction transparently.
//!
//! # Hooking a function
//!
//! ```no_run
//! use std::ops::ControlFlow;
//!
//! use crobar_hook::breakpoint::{BreakpointHandler, LoopExit};
//! use crobar_hook::debugger::DebugSession;
//!
//! fn hook<S: DebugSession>(session: S) -> crobar_hook::Result<(), S::Error> {
//!     let mut handler = BreakpointHandler::new(session);
//!
//!     // relative to the image base the binary was built for
//!     let addr = handler.session().from_relative_addr(0x0041_2a30);
//!
//!     let mut hits = 0;
//!     handler.install(addr, Some("start_game"), move || {
//!         hits += 1;
//!
//!         if hits == 3 {
//!             ControlFlow::Break(())
//!         } else {
//!             ControlFlow::Continue(())
//!         }
//!     })?;
//!
//!     if let LoopExit::TargetExited { exit_code } = handler.run_event_loop()? {
//!         println!("debuggee exited with {exit_code}");
//!     }
//!
//!     handler.shutdown()
//! }
//! ```

/// Module converting build-relative addresses to absolute addresses.
pub mod address;

/// Module implementing software breakpoints.
pub mod breakpoint;

/// Module containing traits for implementing a debugger backend.
pub mod debugger;

mod error;

/// Module implementing verified memory patches.
pub mod patch;

#[cfg(test)]
mod testing;

pub use self::error::{DebuggerError, DesyncReason, Error, Result};
