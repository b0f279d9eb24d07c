use crate::cli::{Commands, MonitorArgs};
use crate::config::Settings;
use crate::error::{PidmonError, Result};
use crate::ui::dashboard::Dashboard;
use pidmon_agent::registry::read_registry_log;
use pidmon_agent::table::run_path;
use pidmon_agent::{render_all, Monitor, MonitorConfig};
use pidmon_common::EntityId;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often the CLI checks whether the monitored tree is gone
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Run a command and return the process exit code
pub async fn handle_command(command: Commands, settings: Settings) -> Result<i32> {
    match command {
        Commands::Run { monitor, command } => handle_run(monitor, command, settings).await,
        Commands::Attach { pid, monitor } => handle_attach(pid, monitor, settings).await,
        Commands::Report { basename, jobs } => handle_report(&basename, jobs, &settings).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    TreeExited,
    Interrupted,
}

async fn handle_run(args: MonitorArgs, command: Vec<String>, settings: Settings) -> Result<i32> {
    let (program, program_args) = command
        .split_first()
        .ok_or_else(|| PidmonError::UsageError("no command to run".to_string()))?;

    let monitor = start_monitor(&args, &settings)?;

    let mut child = match Command::new(program).args(program_args).spawn() {
        Ok(child) => child,
        Err(e) => {
            stop_monitor(&monitor).await?;
            return Err(e.into());
        }
    };
    let pid = child.id().unwrap_or_default();
    info!("Started `{}` as pid {}", command.join(" "), pid);

    match monitor.attach(pid) {
        Ok(_) => {}
        Err(e) if e.is_entity_gone() => info!("Process {} exited before it was attached", pid),
        Err(e) => {
            error!("Failed to attach to {} ({}): {}", pid, e.kind(), e);
        }
    }

    let ended = supervise(&monitor, args.live).await?;
    stop_monitor(&monitor).await?;

    let code = match ended {
        Ended::TreeExited => exit_code(child.wait().await?),
        Ended::Interrupted => match child.try_wait()? {
            Some(status) => exit_code(status),
            None => 130,
        },
    };
    info!("`{}` finished with exit code {}", program, code);

    if args.report {
        render_reports(&monitor, &args, &settings).await?;
    }
    Ok(code)
}

async fn handle_attach(pid: u32, args: MonitorArgs, settings: Settings) -> Result<i32> {
    let monitor = start_monitor(&args, &settings)?;

    if let Err(e) = monitor.attach(pid) {
        stop_monitor(&monitor).await?;
        return Err(e.into());
    }
    info!("Attached to pid {}", pid);

    supervise(&monitor, args.live).await?;
    stop_monitor(&monitor).await?;

    if args.report {
        render_reports(&monitor, &args, &settings).await?;
    }
    Ok(0)
}

async fn handle_report(basename: &Path, jobs: Option<usize>, settings: &Settings) -> Result<i32> {
    let ids = read_registry_log(&run_path(basename, "reg.tsv"))?;
    info!("Rendering reports for {} processes", ids.len());

    report(basename, ids, settings.jobs(jobs), settings).await?;
    Ok(0)
}

fn start_monitor(args: &MonitorArgs, settings: &Settings) -> Result<Monitor> {
    let config = settings.monitor_config(args.output.clone(), args.interval_ms, !args.no_system)?;
    let system = config.monitor_system;
    let monitor = open_monitor(config)?;

    if system {
        monitor.start_system()?;
    }
    Ok(monitor)
}

#[cfg(target_os = "linux")]
fn open_monitor(config: MonitorConfig) -> Result<Monitor> {
    Ok(Monitor::procfs(config)?)
}

#[cfg(not(target_os = "linux"))]
fn open_monitor(_config: MonitorConfig) -> Result<Monitor> {
    Err(PidmonError::UnsupportedFeature(
        "process monitoring requires Linux /proc".to_string(),
    ))
}

/// Wait until the whole tree is gone or the user interrupts
async fn supervise(monitor: &Monitor, live: bool) -> Result<Ended> {
    let dashboard: Option<JoinHandle<std::io::Result<()>>> = live.then(|| {
        let mut dashboard = Dashboard::new(monitor.clone());
        tokio::task::spawn_blocking(move || dashboard.run())
    });

    let waiter = {
        let monitor = monitor.clone();
        tokio::task::spawn_blocking(move || monitor.wait_for_processes(WAIT_POLL))
    };

    let ended = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            monitor.shutdown_token().cancel();
            Ended::Interrupted
        }
        joined = waiter => {
            joined?;
            if monitor.is_shutting_down() {
                Ended::Interrupted
            } else {
                Ended::TreeExited
            }
        }
    };

    if let Some(dashboard) = dashboard {
        if let Err(e) = dashboard.await? {
            warn!("Dashboard failed: {}", e);
        }
    }
    Ok(ended)
}

async fn stop_monitor(monitor: &Monitor) -> Result<()> {
    let monitor = monitor.clone();
    tokio::task::spawn_blocking(move || monitor.shutdown()).await?;
    Ok(())
}

async fn render_reports(monitor: &Monitor, args: &MonitorArgs, settings: &Settings) -> Result<()> {
    let ids: BTreeSet<EntityId> = monitor.seen();
    report(&monitor.basename(), ids, settings.jobs(args.jobs), settings).await
}

async fn report(
    basename: &Path,
    ids: BTreeSet<EntityId>,
    jobs: usize,
    settings: &Settings,
) -> Result<()> {
    let summary = render_all(settings.renderer_config(), basename, ids, jobs).await;
    if summary.all_succeeded() {
        info!("Rendered {} reports", summary.total());
        Ok(())
    } else {
        Err(PidmonError::ReportsFailed {
            failed: summary.failed.len(),
            total: summary.total(),
        })
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
