use clap::Parser;
use pidmon::cli::{commands, Cli};
use pidmon::Settings;
use pidmon_agent::table::run_path;
use std::fs::File;
use std::process;
use std::sync::Mutex;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    // The dashboard owns the terminal, so logs go to a file next to the run
    let log_file = cli
        .command
        .as_ref()
        .and_then(|c| c.monitor_args())
        .filter(|args| args.live)
        .map(|args| run_path(&args.output, "pidmon.log"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = match File::create(&path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("Error: cannot create {}: {}", path.display(), e);
                    process::exit(1);
                }
            };
            FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .expect("Failed to set tracing subscriber");
        }
        None => {
            FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .expect("Failed to set tracing subscriber");
        }
    }

    info!("Starting pidmon v{}", env!("CARGO_PKG_VERSION"));

    let settings = match cli.config.as_deref().map(Settings::load).transpose() {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Some(command) => commands::handle_command(command, settings).await,
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            process::exit(1);
        }
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
