mod error;
mod handle;
mod mem;
mod process;
mod session;
mod thread;

pub use self::error::{Error, Result};
pub use self::process::find_process_by_name;
pub use self::session::Session;
pub use self::thread::Registers;
