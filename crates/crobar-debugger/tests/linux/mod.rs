mod utils;

use std::cell::Cell;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crobar_debugger::{Error, Session, SessionConfig, find_process_by_name};
use crobar_hook::breakpoint::{BreakpointHandler, LoopExit, TRAP_OPCODE};
use crobar_hook::debugger::{DebugSession, MemoryAccess};
use test_log::test;

use self::utils::serial;

/// Translates build-relative addresses into offsets from the image base.
const CONFIG: SessionConfig = SessionConfig { preferred_base: 0 };

struct Debuggee(Child);

impl Debuggee {
    fn spawn() -> Self {
        let child = Command::new("sleep").arg("30").spawn().expect("spawn");
        let pid = child.id();

        // wait for the exec
        for _ in 0..50 {
            let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).unwrap_or_default();
            if comm.trim_end() == "sleep" {
                return Self(child);
            }
            thread::sleep(Duration::from_millis(20));
        }

        panic!("debuggee didn't start");
    }

    /// Spawns the looping tracee, with the given number of threads calling
    /// `tick`.
    fn spawn_tracee(exe_path: &Path, threads: usize) -> Self {
        let child = Command::new(exe_path)
            .arg(threads.to_string())
            .spawn()
            .expect("spawn");

        self::utils::wait_for_debuggee(&child, exe_path, threads);

        Self(child)
    }

    fn is_alive(&mut self) -> bool {
        self.0.try_wait().expect("try_wait").is_none()
    }

    fn pid(&self) -> u64 {
        self.0.id() as u64
    }
}

impl Drop for Debuggee {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
#[ignore = "requires ptrace permissions"]
fn read_elf_header() {
    let _guard = serial();

    let debuggee = Debuggee::spawn();

    let mut session = Session::attach(debuggee.pid(), CONFIG).unwrap();
    assert_eq!(session.process_id(), debuggee.pid());

    let base = session.from_relative_addr(0);
    assert_eq!(base, session.image_base().actual());

    let magic = session.read_bytes(base, 4).unwrap();
    assert_eq!(magic, b"\x7fELF");

    session.detach().unwrap();
}

#[test]
#[ignore = "requires ptrace permissions"]
fn unaligned_write_keeps_neighbours() {
    let _guard = serial();

    let debuggee = Debuggee::spawn();

    let mut session = Session::attach(debuggee.pid(), CONFIG).unwrap();
    let addr = session.from_relative_addr(0x40);

    let before = session.read_bytes(addr, 16).unwrap();

    session.write_memory(addr + 1, &[0xde, 0xad, 0xbe]).unwrap();

    let after = session.read_bytes(addr, 16).unwrap();
    assert_eq!(after[0], before[0]);
    assert_eq!(&after[1..4], &[0xde, 0xad, 0xbe]);
    assert_eq!(&after[4..], &before[4..]);

    session.write_memory(addr, &before).unwrap();
    assert_eq!(session.read_bytes(addr, 16).unwrap(), before);

    session.detach().unwrap();
}

#[test]
#[ignore = "requires ptrace permissions"]
fn resume_without_stopped_thread() {
    let _guard = serial();

    let debuggee = Debuggee::spawn();

    let mut session = Session::attach(debuggee.pid(), CONFIG).unwrap();

    assert!(matches!(session.resume(), Err(Error::NoStoppedThread)));
    assert!(matches!(session.get_registers(), Err(Error::NoStoppedThread)));

    session.detach().unwrap();

    // idempotent
    session.detach().unwrap();
}

#[test]
#[ignore = "requires ptrace permissions"]
fn memory_access_while_running() {
    let _guard = serial();

    let debuggee = Debuggee::spawn();

    let mut session = Session::attach(debuggee.pid(), CONFIG).unwrap();
    session.attach_debugger().unwrap();

    let base = session.from_relative_addr(0);
    assert_eq!(session.read_bytes(base, 4).unwrap(), b"\x7fELF");

    session.detach().unwrap();
}

#[test]
#[ignore = "requires ptrace permissions"]
fn find_debuggee_by_name() {
    let _guard = serial();

    let debuggee = Debuggee::spawn();

    let pid = find_process_by_name("sleep").unwrap();

    // another `sleep` may have a lower ID
    assert!(pid <= debuggee.pid());

    assert!(matches!(
        find_process_by_name("crobar-no-such-process"),
        Err(Error::ProcessNotFound(_))
    ));
}

#[test]
#[ignore = "requires ptrace permissions and gcc"]
fn breakpoint_hits_single_thread() {
    test_tick_breakpoint(1, 50);
}

#[test]
#[ignore = "requires ptrace permissions and gcc"]
fn breakpoint_hits_concurrent_threads() {
    test_tick_breakpoint(2, 200);
}

#[test]
#[ignore = "requires ptrace permissions and gcc"]
fn breakpoint_hits_many_threads() {
    test_tick_breakpoint(4, 500);
}

/// Counts `hits` breakpoint hits on `tick` in a tracee spinning on it with
/// `threads` threads, then checks the tracee survives the shutdown.
fn test_tick_breakpoint(threads: usize, hits: usize) {
    let _guard = serial();


    let base_dir: PathBuf = "tests/linux".to_owned().into();

    let tracee_path = self::utils::compile_tracee(&base_dir.join("tick.c"));
    let tick_addr = self::utils::symbol_addr(&tracee_path, "tick");

    let mut debuggee = Debuggee::spawn_tracee(&tracee_path, threads);

    let session = Session::attach(debuggee.pid(), CONFIG).unwrap();
    let addr = session.from_relative_addr(tick_addr);

    let mut handler = BreakpointHandler::new(session);

    let original = handler.session_mut().read_bytes(addr, 1).unwrap()[0];
    assert_ne!(original, TRAP_OPCODE);

    let counter = Rc::new(Cell::new(0));
    let counter_cb = counter.clone();

    handler
        .install(addr, Some("tick"), move || {
            counter_cb.set(counter_cb.get() + 1);

            if counter_cb.get() == hits {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    assert_eq!(handler.run_event_loop().unwrap(), LoopExit::Stopped);
    assert_eq!(counter.get(), hits);

    handler.shutdown().unwrap();

    // a pending trap or single-step would kill it
    thread::sleep(Duration::from_millis(200));
    assert!(debuggee.is_alive());

    let mut session = Session::attach(debuggee.pid(), CONFIG).unwrap();
    assert_eq!(session.read_bytes(addr, 1).unwrap(), [original]);
    session.detach().unwrap();

    assert!(debuggee.is_alive());

    drop(debuggee);
    drop(tracee_path);
}
