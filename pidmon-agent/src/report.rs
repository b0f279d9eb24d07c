//! Report rendering jobs
//!
//! Rendering is delegated to an external program run once per entity. Its
//! output goes to a per-entity log file that is removed when the program
//! succeeds and kept for diagnosis when it fails.

use crate::error::{AgentError, Result};
use crate::job_pool::{JobPool, JobSummary};
use log::{debug, info};
use pidmon_common::EntityId;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// How to invoke the external renderer
///
/// Process reports run `program process_args... --pid <pid> --basename
/// <basename>`; the system report runs `program system_args... --basename
/// <basename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    pub program: String,
    pub process_args: Vec<String>,
    pub system_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "pidmon-render".to_string(),
            process_args: vec!["process".to_string()],
            system_args: vec!["system".to_string()],
            working_dir: None,
        }
    }
}

/// `<basename>_report_<pid>.log`, or `<basename>_report_system.log`
pub fn report_log_path(basename: &Path, id: EntityId) -> PathBuf {
    let mut path: OsString = basename.as_os_str().to_owned();
    match id {
        EntityId::System => path.push("_report_system.log"),
        EntityId::Process(pid) => path.push(format!("_report_{}.log", pid)),
    }
    PathBuf::from(path)
}

fn renderer_args(config: &RendererConfig, basename: &Path, id: EntityId) -> Vec<OsString> {
    let mut args: Vec<OsString> = match id {
        EntityId::System => config.system_args.iter().map(OsString::from).collect(),
        EntityId::Process(pid) => {
            let mut args: Vec<OsString> = config.process_args.iter().map(OsString::from).collect();
            args.push("--pid".into());
            args.push(pid.to_string().into());
            args
        }
    };
    args.push("--basename".into());
    args.push(basename.as_os_str().to_owned());
    args
}

/// Run the renderer for one entity
pub async fn render_report(config: Arc<RendererConfig>, basename: PathBuf, id: EntityId) -> Result<()> {
    let args = renderer_args(&config, &basename, id);
    let command_line = std::iter::once(config.program.clone())
        .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ");

    let log_path = report_log_path(&basename, id);
    let log = std::fs::File::create(&log_path)?;

    let mut command = Command::new(&config.program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log));
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }

    debug!("Rendering report: {}", command_line);
    let status = command
        .status()
        .await
        .map_err(|e| AgentError::RendererFailure {
            command: command_line.clone(),
            status: e.to_string(),
        })?;

    if !status.success() {
        return Err(AgentError::RendererFailure {
            command: command_line,
            status: status.to_string(),
        });
    }

    if let Err(e) = std::fs::remove_file(&log_path) {
        debug!("Could not remove {}: {}", log_path.display(), e);
    }
    Ok(())
}

/// Render one report per entity through a bounded job pool
///
/// The system entity is always included. Returns once every job is done.
pub async fn render_all(
    config: RendererConfig,
    basename: &Path,
    ids: impl IntoIterator<Item = EntityId>,
    jobs: usize,
) -> JobSummary {
    let config = Arc::new(config);
    let mut ids: Vec<EntityId> = ids.into_iter().collect();
    if !ids.contains(&EntityId::System) {
        ids.push(EntityId::System);
    }
    ids.sort();
    ids.dedup();

    let mut pool = JobPool::new("report", jobs);
    for id in ids {
        pool.submit(
            format!("report {}", id),
            render_report(config.clone(), basename.to_path_buf(), id),
        );
    }
    info!("Rendering {} reports, {} at a time", pool.len(), jobs.max(1));
    pool.join().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> RendererConfig {
        let args = vec!["-c".to_string(), script.to_string(), "renderer".to_string()];
        RendererConfig {
            program: "sh".to_string(),
            process_args: args.clone(),
            system_args: args,
            working_dir: None,
        }
    }

    #[test]
    fn test_report_log_path() {
        let basename = Path::new("/tmp/out/run");
        assert_eq!(
            report_log_path(basename, EntityId::Process(42)),
            PathBuf::from("/tmp/out/run_report_42.log")
        );
        assert_eq!(
            report_log_path(basename, EntityId::System),
            PathBuf::from("/tmp/out/run_report_system.log")
        );
    }

    #[test]
    fn test_renderer_args() {
        fn os(args: &[&str]) -> Vec<OsString> {
            args.iter().map(OsString::from).collect()
        }

        let config = RendererConfig::default();
        let args = renderer_args(&config, Path::new("run"), EntityId::Process(7));
        assert_eq!(args, os(&["process", "--pid", "7", "--basename", "run"]));

        let args = renderer_args(&config, Path::new("run"), EntityId::System);
        assert_eq!(args, os(&["system", "--basename", "run"]));
    }

    #[tokio::test]
    async fn test_failed_report_keeps_its_log() {
        let dir = tempfile::tempdir().unwrap();
        let basename = dir.path().join("run");
        // $1 is --pid and $2 the pid for process reports
        let config = sh("echo rendering $2; test \"$2\" != 13");

        let summary = render_all(
            config,
            &basename,
            [11, 12, 13, 14].map(EntityId::Process),
            2,
        )
        .await;

        assert_eq!(summary.total(), 5);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "report 13");

        let kept = std::fs::read_to_string(report_log_path(&basename, EntityId::Process(13))).unwrap();
        assert_eq!(kept.trim(), "rendering 13");
        assert!(!report_log_path(&basename, EntityId::Process(11)).exists());
        assert!(!report_log_path(&basename, EntityId::System).exists());
    }

    #[tokio::test]
    async fn test_missing_renderer_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = RendererConfig {
            program: dir.path().join("no-such-renderer").display().to_string(),
            ..RendererConfig::default()
        };

        let err = render_report(Arc::new(config), dir.path().join("run"), EntityId::System)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "renderer_failure");
    }

    #[tokio::test]
    async fn test_exit_status_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_report(Arc::new(sh("exit 3")), dir.path().join("run"), EntityId::Process(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit status: 3"));
    }
}
