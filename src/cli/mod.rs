pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pidmon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Monitor a process and all of its descendants", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "YAML settings file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run a command and monitor its process tree")]
    Run {
        #[command(flatten)]
        monitor: MonitorArgs,

        #[arg(last = true, required = true, help = "Command to run, after `--`")]
        command: Vec<String>,
    },
    #[command(about = "Monitor the process tree of a running process")]
    Attach {
        #[arg(help = "Process id of the tree root")]
        pid: u32,

        #[command(flatten)]
        monitor: MonitorArgs,
    },
    #[command(about = "Render reports for a finished run")]
    Report {
        #[arg(help = "Basename the run wrote its logs under")]
        basename: PathBuf,

        #[arg(short, long, help = "Maximum number of concurrent renderer jobs")]
        jobs: Option<usize>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    #[arg(
        short,
        long,
        default_value = "pidmon",
        help = "Basename of every log file written"
    )]
    pub output: PathBuf,

    #[arg(short, long, help = "Polling and supervision interval in milliseconds")]
    pub interval_ms: Option<u64>,

    #[arg(long, help = "Show a live dashboard while monitoring")]
    pub live: bool,

    #[arg(long, help = "Render reports once monitoring ends")]
    pub report: bool,

    #[arg(short, long, help = "Maximum number of concurrent renderer jobs")]
    pub jobs: Option<usize>,

    #[arg(long, help = "Do not monitor system-wide metrics")]
    pub no_system: bool,
}

impl Commands {
    /// Monitoring options, for the commands that monitor
    pub fn monitor_args(&self) -> Option<&MonitorArgs> {
        match self {
            Commands::Run { monitor, .. } | Commands::Attach { monitor, .. } => Some(monitor),
            Commands::Report { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "pidmon", "-v", "run", "-o", "/tmp/x", "--interval-ms", "200", "--live", "--", "make",
            "-j4",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Run { monitor, command }) => {
                assert_eq!(monitor.output, PathBuf::from("/tmp/x"));
                assert_eq!(monitor.interval_ms, Some(200));
                assert!(monitor.live);
                assert!(!monitor.no_system);
                assert_eq!(command, vec!["make".to_string(), "-j4".to_string()]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["pidmon", "run"]).is_err());
    }

    #[test]
    fn test_parse_attach_and_report() {
        let cli = Cli::try_parse_from(["pidmon", "attach", "42", "--no-system"]).unwrap();
        let command = cli.command.unwrap();
        let args = command.monitor_args().unwrap();
        assert!(args.no_system);
        assert_eq!(args.output, PathBuf::from("pidmon"));

        let cli = Cli::try_parse_from(["pidmon", "report", "out/run", "--jobs", "2"]).unwrap();
        match cli.command {
            Some(Commands::Report { basename, jobs }) => {
                assert_eq!(basename, PathBuf::from("out/run"));
                assert_eq!(jobs, Some(2));
            }
            _ => panic!("expected report"),
        }
    }
}
