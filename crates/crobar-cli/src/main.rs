#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use crobar_cli::{CliAction, CliOpts};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("CROBAR_LOG")
                .from_env_lossy(),
        )
        .init();

    let res = match cli.action {
        CliAction::Attach { target, config } => crobar_cli::evaluate_attach(target, config),
    };

    if let Err(e) = res {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}
