//! This crate provides the default debugger backends of Crobar (to be used
//! with `crobar-hook`).
//!
//! The debugger attaches to a process already running on the **same host
//! machine**, and lets `crobar-hook` patch its memory and place software
//! breakpoints within it.
//!
//! ```no_run
//! use crobar_debugger::{Session, SessionConfig};
//! use crobar_hook::patch::patch_memory;
//! use crobar_hook::debugger::DebugSession;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::attach_by_name("talos", SessionConfig::default())?;
//!
//! let addr = session.from_relative_addr(0x0047_3d5e);
//! patch_memory(&mut session, addr, &[0x74, 0x1c], &[0xeb, 0x1c])?;
//! # Ok(())
//! # }
//! ```
//!
//! # Supported Platforms
//!
//! <table>
//!     <thead>
//!         <tr>
//!             <th>Host Machine</th>
//!             <th>Debuggee Platform</th>
//!         </tr>
//!     </thead>
//!     <tbody>
//!         <tr>
//!             <td rowspan="2">Linux <code>x86_64</code></td>
//!             <td><code>x86_64</code></td>
//!         </tr>
//!         <tr>
//!             <td><code>i386</code></td>
//!         </tr>
//!         <tr>
//!             <td rowspan="2">Windows <code>x86_64</code></td>
//!             <td><code>x86_64</code></td>
//!         </tr>
//!         <tr>
//!             <td><code>i386</code> (WOW64)</td>
//!         </tr>
//!     </tbody>
//! </table>

mod common;
mod error;
mod sys;

pub use self::common::session::{DEFAULT_PREFERRED_BASE, Session, SessionConfig};
pub use self::error::{Error, Result};
pub use self::sys::{Registers, find_process_by_name};
