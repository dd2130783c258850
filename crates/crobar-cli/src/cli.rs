/// The Crobar process hooker.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to attach to a running process, patch it and hook it.
    Attach {
        /// Process to attach to.
        #[clap(flatten)]
        target: CliTarget,

        /// Hooking configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file for the hooking operation. Otherwise it is directly parsed as
        /// inline KDL-formatted configuration.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: String,
    },
}

/// Process to attach to.
#[derive(clap::Args)]
#[group(required = true, multiple = false)]
pub struct CliTarget {
    /// ID of the process.
    #[clap(short, long, value_name = "PID")]
    pub pid: Option<u64>,

    /// Prefix of the process name (the lowest matching process ID is
    /// picked).
    #[clap(short, long, value_name = "NAME")]
    pub name: Option<String>,
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{CliAction, CliOpts};

    #[test]
    fn attach_by_pid() {
        let opts = CliOpts::try_parse_from(["crobar", "attach", "--pid", "1234", "-c", "x.kdl"])
            .expect("parse cli");

        let CliAction::Attach { target, config } = opts.action;

        assert_eq!(target.pid, Some(1234));
        assert_eq!(target.name, None);
        assert_eq!(config, "x.kdl");
    }

    #[test]
    fn attach_by_name() {
        let opts = CliOpts::try_parse_from(["crobar", "attach", "--name", "Talos", "-c", "x.kdl"])
            .expect("parse cli");

        let CliAction::Attach { target, .. } = opts.action;

        assert_eq!(target.pid, None);
        assert_eq!(target.name.as_deref(), Some("Talos"));
    }

    #[test]
    fn attach_target_required_once() {
        assert!(CliOpts::try_parse_from(["crobar", "attach", "-c", "x.kdl"]).is_err());

        assert!(
            CliOpts::try_parse_from([
                "crobar", "attach", "--pid", "1", "--name", "Talos", "-c", "x.kdl"
            ])
            .is_err()
        );
    }
}
