use std::path::Path;
use std::process::{Child, Command};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Serializes the tests tracing a debuggee.
///
/// Waiting for any traced thread may report a thread of another test.
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());

    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn compile_tracee(c_path: &Path) -> tempfile::TempPath {
    let out_file = tempfile::NamedTempFile::new().expect("tempfile");

    let mut gcc = Command::new("gcc");
    gcc.arg(c_path)
        .args(["-O1", "-fPIE", "-pie", "-pthread", "-o"])
        .arg(out_file.path());

    println!("running: {gcc:?}");

    let gcc = gcc.output().expect("gcc");

    if !gcc.status.success() {
        let msg = String::from_utf8_lossy(&gcc.stderr);
        panic!("{msg}");
    }

    out_file.into_temp_path()
}

/// Returns the build-relative address of a symbol of the given executable.
pub fn symbol_addr(exe_path: &Path, symbol: &str) -> u64 {
    let nm = Command::new("nm").arg(exe_path).output().expect("nm");
    assert!(nm.status.success());

    String::from_utf8_lossy(&nm.stdout)
        .lines()
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            let addr = fields.next()?;
            let name = fields.nth(1)?;

            (name == symbol).then(|| u64::from_str_radix(addr, 16).expect("address"))
        })
        .unwrap_or_else(|| panic!("symbol {symbol} not found"))
}

/// Waits for a freshly spawned debuggee to run `exe_path` with `threads`
/// threads.
pub fn wait_for_debuggee(child: &Child, exe_path: &Path, threads: usize) {
    let pid = child.id();
    let exe_path = std::fs::canonicalize(exe_path).expect("canonicalize");

    for _ in 0..100 {
        let exe = std::fs::read_link(format!("/proc/{pid}/exe")).unwrap_or_default();

        let task_count = std::fs::read_dir(format!("/proc/{pid}/task"))
            .map(|tasks| tasks.count())
            .unwrap_or_default();

        if exe == exe_path && task_count >= threads {
            return;
        }

        thread::sleep(Duration::from_millis(20));
    }

    panic!("debuggee didn't start");
}
