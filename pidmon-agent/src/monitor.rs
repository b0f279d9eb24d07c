//! Entry point of the supervision engine
//!
//! A `Monitor` owns everything shared by the dispatchers of one run: the
//! configuration, the entity registry, the introspection backend, the spawn
//! lock and the global shutdown token. Attaching a root process starts the
//! recursive discovery of its descendants.

use crate::config::MonitorConfig;
use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::error::Result;
use crate::frontend::FrontendSnapshot;
use crate::introspect::Introspector;
use crate::registry::EntityRegistry;
use crate::table::run_path;
use dashmap::DashSet;
use log::{info, warn};
use pidmon_common::EntityId;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct MonitorContext {
    pub(crate) config: MonitorConfig,
    pub(crate) registry: EntityRegistry,
    pub(crate) introspector: Arc<dyn Introspector>,
    /// Serializes "is this child new" checks with the attach that follows
    pub(crate) spawn_lock: Mutex<()>,
    pub(crate) shutdown: CancellationToken,
    /// Processes that failed to attach, keyed by pid and start time
    refused: DashSet<(u32, Option<u64>)>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorContext {
    pub(crate) fn track(&self, join: JoinHandle<()>) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        threads.retain(|t| !t.is_finished());
        threads.push(join);
    }

    /// Remember that `pid` could not be attached
    pub(crate) fn refuse(&self, pid: u32) {
        self.refused.insert(self.process_key(pid));
    }

    pub(crate) fn is_refused(&self, pid: u32) -> bool {
        self.refused.contains(&self.process_key(pid))
    }

    fn process_key(&self, pid: u32) -> (u32, Option<u64>) {
        (pid, self.introspector.start_time(pid).ok())
    }

    fn take_threads(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.threads.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[derive(Clone)]
pub struct Monitor {
    ctx: Arc<MonitorContext>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, introspector: Arc<dyn Introspector>) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.basename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let registry = EntityRegistry::with_log(run_path(&config.basename, "reg.tsv"));

        Ok(Self {
            ctx: Arc::new(MonitorContext {
                config,
                registry,
                introspector,
                spawn_lock: Mutex::new(()),
                shutdown: CancellationToken::new(),
                refused: DashSet::new(),
                threads: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Monitor backed by `/proc`
    #[cfg(target_os = "linux")]
    pub fn procfs(config: MonitorConfig) -> Result<Self> {
        let introspector = crate::introspect::procfs::ProcfsIntrospector::new();
        Self::new(config, Arc::new(introspector))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.ctx.config
    }

    pub fn basename(&self) -> PathBuf {
        self.ctx.config.basename.clone()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.ctx.registry
    }

    /// Start the system-wide dispatcher
    pub fn start_system(&self) -> Result<DispatcherHandle> {
        Dispatcher::attach_system(&self.ctx)
    }

    /// Attach a dispatcher to `pid` and, transitively, to its descendants
    pub fn attach(&self, pid: u32) -> Result<DispatcherHandle> {
        let _guard = self
            .ctx
            .spawn_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Dispatcher::attach(&self.ctx, pid)
    }

    /// Latest frontend snapshot of every active entity, system first
    pub fn snapshots(&self) -> Vec<(EntityId, Arc<FrontendSnapshot>)> {
        self.ctx
            .registry
            .handles()
            .into_iter()
            .map(|h| (h.id(), h.snapshot()))
            .collect()
    }

    /// Every entity supervised at some point of the run
    pub fn seen(&self) -> BTreeSet<EntityId> {
        self.ctx.registry.seen_ids()
    }

    pub fn has_live_processes(&self) -> bool {
        self.ctx
            .registry
            .active_ids()
            .iter()
            .any(|id| !id.is_system())
    }

    /// Block until no process entity remains or shutdown is requested
    pub fn wait_for_processes(&self, poll: Duration) {
        while self.has_live_processes() && !self.ctx.shutdown.is_cancelled() {
            std::thread::sleep(poll);
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }

    /// Stop every dispatcher and wait for all of them to finish
    ///
    /// Dispatchers attached while the shutdown is in progress start with a
    /// cancelled token and are joined as well.
    pub fn shutdown(&self) {
        info!("Shutting down monitor");
        self.ctx.shutdown.cancel();

        loop {
            let threads = self.ctx.take_threads();
            if threads.is_empty() {
                break;
            }
            for thread in threads {
                if thread.join().is_err() {
                    warn!("dispatcher thread panicked");
                }
            }
        }

        info!(
            "Monitor stopped ({} entities seen)",
            self.ctx.registry.seen_ids().len()
        );
    }
}
