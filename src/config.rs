//! YAML settings file
//!
//! ```yaml
//! interval_ms: 500
//! intervals_ms:
//!   fd: 5000
//!   sys_cpu: 250
//! jobs: 4
//! renderer:
//!   program: Rscript
//!   process_args: [reports/process.R]
//!   system_args: [reports/system.R]
//!   working_dir: /opt/pidmon
//! ```
//!
//! Every key is optional. Command-line flags take precedence.

use crate::error::{PidmonError, Result};
use pidmon_agent::{MonitorConfig, RendererConfig};
use pidmon_common::MetricDomain;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub interval_ms: Option<u64>,
    /// Per-domain overrides keyed by domain name (`cpu`, `sys_mem`, ...)
    pub intervals_ms: BTreeMap<String, u64>,
    pub jobs: Option<usize>,
    pub renderer: Option<RendererSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RendererSettings {
    pub program: String,
    #[serde(default)]
    pub process_args: Vec<String>,
    #[serde(default)]
    pub system_args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Build the engine configuration, applying the command-line overrides
    pub fn monitor_config(
        &self,
        basename: PathBuf,
        interval_ms: Option<u64>,
        monitor_system: bool,
    ) -> Result<MonitorConfig> {
        let interval = interval_ms
            .or(self.interval_ms)
            .unwrap_or(DEFAULT_INTERVAL_MS);

        let mut config = MonitorConfig::new(basename)
            .with_interval(Duration::from_millis(interval))
            .with_system(monitor_system);

        for (name, ms) in &self.intervals_ms {
            let domain = MetricDomain::from_name(name).ok_or_else(|| {
                PidmonError::ConfigError(format!("unknown metric domain `{}`", name))
            })?;
            config = config.with_domain_interval(domain, Duration::from_millis(*ms));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn renderer_config(&self) -> RendererConfig {
        match &self.renderer {
            Some(r) => RendererConfig {
                program: r.program.clone(),
                process_args: r.process_args.clone(),
                system_args: r.system_args.clone(),
                working_dir: r.working_dir.clone(),
            },
            None => RendererConfig::default(),
        }
    }

    /// Report concurrency: flag, then file, then the number of cores
    pub fn jobs(&self, jobs: Option<usize>) -> usize {
        jobs.or(self.jobs)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_settings() {
        let settings = Settings::from_yaml(
            "interval_ms: 500\nintervals_ms:\n  fd: 5000\n  sys_cpu: 250\njobs: 3\nrenderer:\n  program: Rscript\n  process_args: [process.R]\n",
        )
        .unwrap();

        let config = settings
            .monitor_config(PathBuf::from("out/run"), None, true)
            .unwrap();
        assert_eq!(config.dispatcher_interval, Duration::from_millis(500));
        assert_eq!(config.interval(MetricDomain::Cpu), Duration::from_millis(500));
        assert_eq!(config.interval(MetricDomain::Fd), Duration::from_secs(5));
        assert_eq!(config.interval(MetricDomain::SysCpu), Duration::from_millis(250));

        let renderer = settings.renderer_config();
        assert_eq!(renderer.program, "Rscript");
        assert_eq!(renderer.process_args, vec!["process.R".to_string()]);
        assert!(renderer.system_args.is_empty());
        assert_eq!(settings.jobs(None), 3);
        assert_eq!(settings.jobs(Some(8)), 8);
    }

    #[test]
    fn test_flag_overrides_file_interval() {
        let settings = Settings::from_yaml("interval_ms: 500").unwrap();
        let config = settings
            .monitor_config(PathBuf::from("run"), Some(100), false)
            .unwrap();
        assert_eq!(config.dispatcher_interval, Duration::from_millis(100));
        assert!(!config.monitor_system);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::from_yaml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.renderer_config(), RendererConfig::default());

        let config = settings.monitor_config(PathBuf::from("run"), None, true).unwrap();
        assert_eq!(config.dispatcher_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_domain_rejected() {
        let settings = Settings::from_yaml("intervals_ms:\n  gpu: 100").unwrap();
        let err = settings
            .monitor_config(PathBuf::from("run"), None, true)
            .unwrap_err();
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = Settings::default();
        assert!(settings
            .monitor_config(PathBuf::from("run"), Some(0), true)
            .is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::from_yaml("intervall_ms: 10").is_err());
    }
}
