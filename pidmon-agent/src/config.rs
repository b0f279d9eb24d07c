use crate::error::{AgentError, Result};
use pidmon_common::MetricDomain;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Settings shared by every dispatcher of a run
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Path prefix of every log file written during the run
    pub basename: PathBuf,
    /// Period of frontend refresh and child discovery
    pub dispatcher_interval: Duration,
    /// Polling period per metric domain, indexed by `MetricDomain::index`
    pub intervals: [Duration; MetricDomain::COUNT],
    /// Whether the run also supervises the system entity
    pub monitor_system: bool,
}

impl MonitorConfig {
    pub fn new(basename: impl Into<PathBuf>) -> Self {
        Self {
            basename: basename.into(),
            dispatcher_interval: DEFAULT_INTERVAL,
            intervals: [DEFAULT_INTERVAL; MetricDomain::COUNT],
            monitor_system: true,
        }
    }

    /// Use one interval for the dispatchers and every poller
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.dispatcher_interval = interval;
        self.intervals = [interval; MetricDomain::COUNT];
        self
    }

    pub fn with_domain_interval(mut self, domain: MetricDomain, interval: Duration) -> Self {
        self.intervals[domain.index()] = interval;
        self
    }

    pub fn with_system(mut self, monitor_system: bool) -> Self {
        self.monitor_system = monitor_system;
        self
    }

    pub fn interval(&self, domain: MetricDomain) -> Duration {
        self.intervals[domain.index()]
    }

    pub fn validate(&self) -> Result<()> {
        if self.basename.as_os_str().is_empty() {
            return Err(AgentError::Config("output basename is empty".to_string()));
        }
        if self.dispatcher_interval.is_zero() {
            return Err(AgentError::Config(
                "dispatcher interval must be positive".to_string(),
            ));
        }
        if let Some(domain) = MetricDomain::ALL
            .into_iter()
            .find(|d| self.interval(*d).is_zero())
        {
            return Err(AgentError::Config(format!(
                "polling interval of {} must be positive",
                domain
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_interval_override() {
        let config = MonitorConfig::new("/tmp/run")
            .with_interval(Duration::from_millis(200))
            .with_domain_interval(MetricDomain::Fd, Duration::from_secs(5));

        assert_eq!(config.interval(MetricDomain::Fd), Duration::from_secs(5));
        assert_eq!(config.interval(MetricDomain::Cpu), Duration::from_millis(200));
        assert_eq!(config.dispatcher_interval, Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config =
            MonitorConfig::new("/tmp/run").with_domain_interval(MetricDomain::SysSwap, Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sys_swap"));
    }

    #[test]
    fn test_empty_basename_rejected() {
        assert!(MonitorConfig::new("").validate().is_err());
    }
}
