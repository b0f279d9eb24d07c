//! Bounded pool for independent post-processing jobs
//!
//! At most `max_concurrency` jobs run at any moment. A failing job is logged
//! and counted; it never prevents the remaining jobs from running.

use crate::error::Result;
use log::{debug, error, info};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of every job submitted to a pool
#[derive(Debug, Default)]
pub struct JobSummary {
    pub succeeded: Vec<String>,
    /// Label and error message of each failed job
    pub failed: Vec<(String, String)>,
}

impl JobSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct JobPool {
    name: String,
    limit: Arc<Semaphore>,
    jobs: JoinSet<(String, Result<()>)>,
}

impl JobPool {
    /// Create a pool; a limit of zero is treated as one
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            limit: Arc::new(Semaphore::new(max_concurrency.max(1))),
            jobs: JoinSet::new(),
        }
    }

    /// Queue a job; it starts as soon as a slot is free
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&mut self, label: impl Into<String>, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let limit = self.limit.clone();
        debug!("[{}] queued {}", self.name, label);

        self.jobs.spawn(async move {
            // The semaphore is never closed, so a permit always arrives
            let _permit = limit.acquire_owned().await.ok();
            let outcome = job.await;
            (label, outcome)
        });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Wait for every queued job and collect their outcomes
    pub async fn join(mut self) -> JobSummary {
        let mut summary = JobSummary::default();
        if self.is_empty() {
            debug!("[{}] nothing to wait for", self.name);
            return summary;
        }

        while let Some(joined) = self.jobs.join_next().await {
            match joined {
                Ok((label, Ok(()))) => {
                    debug!("[{}] {} finished", self.name, label);
                    summary.succeeded.push(label);
                }
                Ok((label, Err(e))) => {
                    error!("[{}] {} failed ({}): {}", self.name, label, e.kind(), e);
                    summary.failed.push((label, e.to_string()));
                }
                Err(e) => {
                    error!("[{}] job aborted: {}", self.name, e);
                    summary.failed.push(("<aborted>".to_string(), e.to_string()));
                }
            }
        }

        info!(
            "[{}] {} jobs done, {} failed",
            self.name,
            summary.total(),
            summary.failed.len()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_failures_do_not_stop_other_jobs() {
        let mut pool = JobPool::new("test", 2);
        for i in 0..10 {
            pool.submit(format!("job-{}", i), async move {
                if i % 3 == 0 {
                    Err(AgentError::Config(format!("job {} failed", i)))
                } else {
                    Ok(())
                }
            });
        }
        assert_eq!(pool.len(), 10);

        let summary = pool.join().await;
        assert_eq!(summary.total(), 10);
        assert_eq!(summary.failed.len(), 4);
        assert_eq!(summary.succeeded.len(), 6);
        assert!(!summary.all_succeeded());
        assert!(summary.failed.iter().any(|(label, _)| label == "job-9"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = JobPool::new("bounded", 3);

        for i in 0..12 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(format!("job-{}", i), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let summary = pool.join().await;
        assert!(summary.all_succeeded());
        assert_eq!(summary.succeeded.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let pool = JobPool::new("empty", 0);
        assert!(pool.is_empty());
        let summary = pool.join().await;
        assert_eq!(summary.total(), 0);
        assert!(summary.all_succeeded());
    }
}
