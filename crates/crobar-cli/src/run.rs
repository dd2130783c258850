use std::cell::Cell;
use std::ffi::OsStr;
use std::ops::ControlFlow;
use std::path::Path;
use std::rc::Rc;

use crobar_debugger::{Session, SessionConfig};
use crobar_hook::breakpoint::{BreakpointHandler, LoopExit};
use crobar_hook::debugger::DebugSession;
use crobar_hook::patch::patch_memory;
use miette::IntoDiagnostic;

use crate::{CliTarget, HookConfig};

/// Runs the subcommand for attaching to a process and hooking it.
pub fn evaluate_attach(target: CliTarget, config: String) -> miette::Result<()> {
    let config = parse_hook_config(config)?;

    let session_config = SessionConfig {
        preferred_base: config.preferred_base,
    };

    let mut session = match (target.pid, target.name) {
        (Some(pid), _) => Session::attach(pid, session_config),
        (None, Some(name)) => Session::attach_by_name(&name, session_config),
        (None, None) => miette::bail!("no process to attach to"),
    }
    .into_diagnostic()?;

    for patch in &config.patches {
        let addr = session.from_relative_addr(patch.address);

        let outcome =
            patch_memory(&mut session, addr, &patch.old.0, &patch.new.0).into_diagnostic()?;

        tracing::info!(
            name = %patch.name,
            addr = format_args!("{addr:#x}"),
            ?outcome,
            "patch"
        );
    }

    if config.breakpoints.is_empty() {
        tracing::info!("no breakpoint to install");
        return session.detach().into_diagnostic();
    }

    let mut handler = BreakpointHandler::new(session);
    let hits = Rc::new(Cell::new(0));

    for bk in &config.breakpoints {
        let callback = hit_logger(bk.name.clone(), Rc::clone(&hits), config.stop_after);

        handler
            .install_relative(bk.address, Some(&bk.name), callback)
            .into_diagnostic()?;
    }

    match handler.run_event_loop().into_diagnostic()? {
        LoopExit::Stopped => tracing::info!(hits = hits.get(), "hooking stopped"),
        LoopExit::TargetExited { exit_code } => {
            tracing::info!(exit_code, hits = hits.get(), "debuggee exited")
        }
    }

    handler.shutdown().into_diagnostic()
}

/// Returns a breakpoint callback logging its hits, which stops hooking after
/// `stop_after` hits of all breakpoints sharing `hits`.
fn hit_logger(
    name: String,
    hits: Rc<Cell<u64>>,
    stop_after: Option<u64>,
) -> impl FnMut() -> ControlFlow<()> + 'static {
    move || {
        let count = hits.get() + 1;
        hits.set(count);

        tracing::info!(name = %name, hits = count, "breakpoint hit");

        match stop_after {
            Some(max) if count >= max => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }
}

fn parse_hook_config(config: String) -> miette::Result<HookConfig> {
    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Write;
    use std::ops::ControlFlow;
    use std::rc::Rc;

    use super::{hit_logger, parse_hook_config};

    #[test]
    fn hit_logger_stops_after_shared_hits() {
        let hits = Rc::new(Cell::new(0));

        let mut first = hit_logger("first".to_owned(), Rc::clone(&hits), Some(3));
        let mut second = hit_logger("second".to_owned(), Rc::clone(&hits), Some(3));

        assert_eq!(first(), ControlFlow::Continue(()));
        assert_eq!(second(), ControlFlow::Continue(()));
        assert_eq!(first(), ControlFlow::Break(()));
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn hit_logger_never_stops() {
        let hits = Rc::new(Cell::new(0));
        let mut callback = hit_logger("bk".to_owned(), Rc::clone(&hits), None);

        for _ in 0..10 {
            assert_eq!(callback(), ControlFlow::Continue(()));
        }
        assert_eq!(hits.get(), 10);
    }

    #[test]
    fn config_inline_or_file() {
        let content = indoc::indoc! {r#"
            stop-after 1
            breakpoint "start-game" address=0x4a0000
        "#};

        let inline = parse_hook_config(content.to_owned()).expect("inline config");

        let mut file = tempfile::Builder::new()
            .suffix(".kdl")
            .tempfile()
            .expect("tempfile");
        file.write_all(content.as_bytes()).expect("write config");

        let path = file.path().to_str().expect("utf-8 path").to_owned();
        let from_file = parse_hook_config(path).expect("file config");

        assert_eq!(inline, from_file);
        assert_eq!(inline.stop_after, Some(1));
        assert_eq!(inline.breakpoints.len(), 1);
    }

    #[test]
    fn config_file_missing() {
        assert!(parse_hook_config("/nonexistent/crobar.kdl".to_owned()).is_err());
    }
}
