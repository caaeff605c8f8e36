use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "cvflow CLI - evaluate collective variables and biases over stored frames and inspect action graphs.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads used inside each action's task loop.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate the action graph of a run file over its frames.
    Run(RunArgs),
    /// Draw the action graph of a run file as a Mermaid flowchart.
    ShowGraph(ShowGraphArgs),
    /// List the registered actions, or document one of them.
    Actions(ActionsArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// CSV file receiving the bias and watched values of every step. Defaults to stdout.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// CSV file receiving the force on every atom at every step.
    #[arg(short, long, value_name = "PATH")]
    pub forces: Option<PathBuf>,

    /// Evaluate every task loop on the calling thread, overriding the run file.
    #[arg(long)]
    pub serial: bool,
}

/// Arguments for the `show-graph` subcommand.
#[derive(Args, Debug)]
pub struct ShowGraphArgs {
    /// Path to the run file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// File receiving the flowchart. Defaults to stdout.
    #[arg(short, long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Draw how forces flow back to the atoms instead of how values flow forward.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `actions` subcommand.
#[derive(Args, Debug)]
pub struct ActionsArgs {
    /// Action to document, e.g. LOWER_WALLS.
    #[arg(value_name = "NAME")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_are_parsed() {
        let cli = Cli::parse_from(["cvflow", "-vv", "-j", "4", "run", "-c", "run.toml", "--serial", "-f", "f.csv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(4));
        let Commands::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.config, PathBuf::from("run.toml"));
        assert!(args.serial);
        assert_eq!(args.forces, Some(PathBuf::from("f.csv")));
        assert!(args.output.is_none());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["cvflow", "-q", "-v", "actions"]).is_err());
    }
}
