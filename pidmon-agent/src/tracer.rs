//! Metric pollers ("tracers") and the pool a dispatcher owns
//!
//! Each tracer runs on its own thread and polls one metric domain for one
//! entity at a fixed interval. Every cycle it appends a row to the domain's
//! log and publishes the reading as its cached value.
//!
//! Cached values are eventually consistent: a reader sees the reading of the
//! latest completed cycle, at most one polling interval stale, and always a
//! whole reading since each cycle swaps in a new `Arc` rather than mutating
//! the previous one.

use crate::config::MonitorConfig;
use crate::error::{AgentError, Result};
use crate::introspect::Introspector;
use crate::table::{entity_path, TableAppender};
use arc_swap::ArcSwapOption;
use log::{debug, error, warn};
use pidmon_common::{EntityId, MetricDomain, Reading};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Longest uninterrupted sleep between two cancellation checks
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Anything that exposes the latest reading per domain
pub trait ReadingSource {
    fn cached(&self, domain: MetricDomain) -> Option<Arc<Reading>>;
}

/// Why the tracers of one entity stopped on their own
#[derive(Default)]
pub struct TracerSignals {
    gone: AtomicBool,
    fault: Mutex<Option<AgentError>>,
}

impl TracerSignals {
    /// Whether a tracer observed the entity exiting
    pub fn entity_gone(&self) -> bool {
        self.gone.load(Ordering::Acquire)
    }

    /// First non-recoverable error raised by a tracer, if any
    pub fn take_fault(&self) -> Option<AgentError> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn mark_gone(&self) {
        self.gone.store(true, Ordering::Release);
    }

    fn record_fault(&self, err: AgentError) {
        let mut fault = self.fault.lock().unwrap_or_else(|e| e.into_inner());
        if fault.is_none() {
            *fault = Some(err);
        }
    }
}

/// Sleep for `interval`, waking early if `token` is cancelled
///
/// Returns `false` when cancelled.
pub(crate) fn sleep_unless_cancelled(token: &CancellationToken, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// One running poller
struct Tracer {
    domain: MetricDomain,
    cache: Arc<ArcSwapOption<Reading>>,
    handle: Option<JoinHandle<()>>,
}

/// Everything a tracer thread owns
struct TracerTask {
    id: EntityId,
    domain: MetricDomain,
    interval: Duration,
    introspector: Arc<dyn Introspector>,
    appender: TableAppender,
    cache: Arc<ArcSwapOption<Reading>>,
    stop: CancellationToken,
    owner: CancellationToken,
    signals: Arc<TracerSignals>,
}

impl TracerTask {
    fn run(mut self) {
        debug!("entity {}: {} tracer started", self.id, self.domain);

        while !self.stop.is_cancelled() {
            match self.introspector.probe(self.id, self.domain) {
                Ok(reading) => {
                    if let Err(e) = self.appender.append(&reading.fields()) {
                        warn!(
                            "entity {}: failed to append to {}: {}",
                            self.id,
                            self.appender.path().display(),
                            e
                        );
                    }
                    self.cache.store(Some(Arc::new(reading)));
                }
                Err(e) if e.is_entity_gone() => {
                    debug!("entity {}: {} tracer observed exit", self.id, self.domain);
                    self.signals.mark_gone();
                    self.owner.cancel();
                    break;
                }
                Err(e) => {
                    error!(
                        "entity {}: {} tracer failed ({}): {}",
                        self.id,
                        self.domain,
                        e.kind(),
                        e
                    );
                    self.signals.record_fault(e);
                    self.owner.cancel();
                    break;
                }
            }

            if !sleep_unless_cancelled(&self.stop, self.interval) {
                break;
            }
        }

        debug!("entity {}: {} tracer stopped", self.id, self.domain);
    }
}

/// The set of tracers owned by one dispatcher, indexed by metric domain
pub struct TracerPool {
    tracers: [Option<Tracer>; MetricDomain::COUNT],
    stop: CancellationToken,
}

impl TracerPool {
    /// A pool with no tracers
    pub fn idle() -> Self {
        Self {
            tracers: std::array::from_fn(|_| None),
            stop: CancellationToken::new(),
        }
    }

    /// Start one tracer per domain
    ///
    /// A tracer that sees the entity vanish, or fails, cancels `owner` so the
    /// dispatcher begins its teardown; `signals` records which of the two
    /// happened.
    pub fn start(
        id: EntityId,
        domains: &[MetricDomain],
        config: &MonitorConfig,
        introspector: &Arc<dyn Introspector>,
        owner: &CancellationToken,
        signals: &Arc<TracerSignals>,
    ) -> Result<Self> {
        let mut pool = Self {
            tracers: std::array::from_fn(|_| None),
            stop: owner.child_token(),
        };
        let cpu_count = introspector.cpu_count();

        for &domain in domains {
            let path = entity_path(&config.basename, id, &format!("{}.tsv", domain.file_suffix()));
            // Dropping a partially started pool stops what already runs
            let tracer = Self::spawn_tracer(
                TracerSpawn {
                    id,
                    domain,
                    interval: config.interval(domain),
                    path: &path,
                    cpu_count,
                },
                introspector,
                &pool.stop,
                owner,
                signals,
            )?;
            pool.tracers[domain.index()] = Some(tracer);
        }

        Ok(pool)
    }

    fn spawn_tracer(
        params: TracerSpawn<'_>,
        introspector: &Arc<dyn Introspector>,
        stop: &CancellationToken,
        owner: &CancellationToken,
        signals: &Arc<TracerSignals>,
    ) -> Result<Tracer> {
        let appender = TableAppender::create(params.path, &params.domain.header(params.cpu_count))?;
        let cache = Arc::new(ArcSwapOption::empty());

        let task = TracerTask {
            id: params.id,
            domain: params.domain,
            interval: params.interval,
            introspector: introspector.clone(),
            appender,
            cache: cache.clone(),
            stop: stop.clone(),
            owner: owner.clone(),
            signals: signals.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("tracer-{}-{}", params.id, params.domain))
            .spawn(move || task.run())?;

        Ok(Tracer {
            domain: params.domain,
            cache,
            handle: Some(handle),
        })
    }

    /// Domains with a tracer in this pool
    pub fn domains(&self) -> Vec<MetricDomain> {
        self.tracers.iter().flatten().map(|t| t.domain).collect()
    }

    /// Signal every tracer to stop and join them all
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop.cancel();
        for tracer in self.tracers.iter_mut().flatten() {
            if let Some(handle) = tracer.handle.take() {
                if handle.join().is_err() {
                    warn!("{} tracer thread panicked", tracer.domain);
                }
            }
        }
    }
}

impl ReadingSource for TracerPool {
    fn cached(&self, domain: MetricDomain) -> Option<Arc<Reading>> {
        self.tracers[domain.index()]
            .as_ref()
            .and_then(|t| t.cache.load_full())
    }
}

impl Drop for TracerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct TracerSpawn<'a> {
    id: EntityId,
    domain: MetricDomain,
    interval: Duration,
    path: &'a Path,
    cpu_count: usize,
}
