//! Per-entity supervisor
//!
//! A dispatcher owns the tracer pool of one entity. It captures the entity's
//! static metadata once, keeps the frontend cache fresh, discovers child
//! processes and attaches a dispatcher to each one it finds, and finally
//! tears everything down when the entity exits or the run shuts down.
//!
//! Lifecycle: `Initializing -> Running <-> ChildScan -> Terminating ->
//! Terminated`. The system entity never enters `ChildScan`.

use crate::error::{AgentError, Result};
use crate::frontend::{process_snapshot, system_snapshot, FrontendCache, FrontendSnapshot};
use crate::introspect::ProcessInfo;
use crate::monitor::MonitorContext;
use crate::table::{entity_path, run_path, timestamp, write_table};
use crate::tracer::{sleep_unless_cancelled, ReadingSource, TracerPool, TracerSignals};
use log::{debug, error, info, warn};
use pidmon_common::{EntityId, MetricDomain, Reading};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;

pub const ENV_HEADER: [&str; 2] = ["NAME", "VALUE"];
pub const MAPFILE_HEADER: [&str; 4] = ["PATH", "RESIDENT", "VIRT", "SWAP"];
pub const MOUNT_HEADER: [&str; 6] = ["DEVICE", "MOUNT_POINT", "FSTYPE", "OPTS", "TOTAL", "USED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    Initializing = 0,
    Running = 1,
    ChildScan = 2,
    Terminating = 3,
    Terminated = 4,
}

impl DispatcherState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DispatcherState::Initializing,
            1 => DispatcherState::Running,
            2 => DispatcherState::ChildScan,
            3 => DispatcherState::Terminating,
            _ => DispatcherState::Terminated,
        }
    }
}

struct HandleInner {
    id: EntityId,
    frontend: FrontendCache,
    state: AtomicU8,
    token: CancellationToken,
}

/// Shared view of a running dispatcher
///
/// Cloning is cheap. The registry holds one clone per active entity and
/// front ends read frontend snapshots through it.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<HandleInner>,
}

impl DispatcherHandle {
    pub(crate) fn new(id: EntityId) -> Self {
        Self::with_token(id, CancellationToken::new())
    }

    pub(crate) fn with_token(id: EntityId, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                frontend: FrontendCache::default(),
                state: AtomicU8::new(DispatcherState::Initializing as u8),
                token,
            }),
        }
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Latest frontend snapshot of the entity
    pub fn snapshot(&self) -> Arc<FrontendSnapshot> {
        self.inner.frontend.load()
    }

    /// Ask the dispatcher to tear down
    pub fn stop(&self) {
        self.inner.token.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    fn set_state(&self, state: DispatcherState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn publish(&self, snapshot: FrontendSnapshot) {
        self.inner.frontend.store(snapshot);
    }
}

pub(crate) struct Dispatcher {
    ctx: Arc<MonitorContext>,
    handle: DispatcherHandle,
    pool: TracerPool,
    signals: Arc<TracerSignals>,
    /// `None` for the system entity
    info: Option<ProcessInfo>,
    /// Running maximum of the CPU time readings
    cpu_time: Option<f64>,
    started: bool,
    torn_down: bool,
}

impl Dispatcher {
    /// Start supervising process `pid`
    ///
    /// Fails with `EntityGone` if the process is already gone and with
    /// `DuplicateEntity` if another dispatcher supervises it.
    pub(crate) fn attach(ctx: &Arc<MonitorContext>, pid: u32) -> Result<DispatcherHandle> {
        let id = EntityId::Process(pid);
        if !ctx.introspector.exists(pid) {
            return Err(AgentError::EntityGone(id));
        }
        let info = ctx.introspector.info(pid)?;
        Self::launch(ctx, id, Some(info))
    }

    /// Start supervising the whole machine
    pub(crate) fn attach_system(ctx: &Arc<MonitorContext>) -> Result<DispatcherHandle> {
        Self::launch(ctx, EntityId::System, None)
    }

    fn launch(
        ctx: &Arc<MonitorContext>,
        id: EntityId,
        info: Option<ProcessInfo>,
    ) -> Result<DispatcherHandle> {
        let handle = DispatcherHandle::with_token(id, ctx.shutdown.child_token());
        ctx.registry.register(handle.clone())?;

        // From here on, dropping the dispatcher runs the teardown
        let mut dispatcher = Dispatcher {
            ctx: ctx.clone(),
            handle: handle.clone(),
            pool: TracerPool::idle(),
            signals: Arc::new(TracerSignals::default()),
            info,
            cpu_time: None,
            started: false,
            torn_down: false,
        };
        dispatcher.initialize()?;

        let join = thread::Builder::new()
            .name(format!("dispatcher-{}", id))
            .spawn(move || dispatcher.run())?;
        ctx.track(join);

        info!("entity {}: dispatcher attached", id);
        Ok(handle)
    }

    fn initialize(&mut self) -> Result<()> {
        let id = self.handle.id();
        let basename = &self.ctx.config.basename;
        let introspector = &self.ctx.introspector;

        match &self.info {
            Some(info) => {
                self.ctx.registry.record(&[
                    timestamp(),
                    info.pid.to_string(),
                    info.cmdline.join(" "),
                    info.exe.clone(),
                    info.cwd.clone(),
                ])?;

                let env = introspector.environ(info.pid)?;
                write_table(
                    &entity_path(basename, id, "env.tsv"),
                    &ENV_HEADER,
                    env.into_iter().map(|(name, value)| vec![name, value]),
                )?;

                let maps = introspector.memory_maps(info.pid)?;
                write_table(
                    &entity_path(basename, id, "mapfile.tsv"),
                    &MAPFILE_HEADER,
                    maps.into_iter().map(|m| {
                        vec![
                            m.path,
                            m.resident.to_string(),
                            m.virt.to_string(),
                            m.swap.to_string(),
                        ]
                    }),
                )?;
            }
            None => {
                let mounts = introspector.mounts()?;
                write_table(
                    &run_path(basename, "mnt.tsv"),
                    &MOUNT_HEADER,
                    mounts.into_iter().map(|m| {
                        vec![
                            m.device,
                            m.mount_point,
                            m.fstype,
                            m.options,
                            m.total.to_string(),
                            m.used.to_string(),
                        ]
                    }),
                )?;
            }
        }

        let domains: &[MetricDomain] = if id.is_system() {
            &MetricDomain::SYSTEM
        } else {
            &MetricDomain::PROCESS
        };
        self.pool = TracerPool::start(
            id,
            domains,
            &self.ctx.config,
            introspector,
            self.handle.token(),
            &self.signals,
        )?;
        self.started = true;
        debug!("entity {}: tracing {:?}", id, self.pool.domains());
        self.refresh_frontend();
        Ok(())
    }

    fn run(mut self) {
        let id = self.handle.id();
        let token = self.handle.token().clone();
        self.handle.set_state(DispatcherState::Running);

        while !token.is_cancelled() {
            self.refresh_frontend();

            if let EntityId::Process(pid) = id {
                self.handle.set_state(DispatcherState::ChildScan);
                let scan = self.scan_children(pid);
                self.handle.set_state(DispatcherState::Running);

                match scan {
                    Ok(()) => {}
                    Err(e) if e.is_entity_gone() => {
                        debug!("entity {}: exited during child scan", id);
                        break;
                    }
                    Err(e) => {
                        error!("entity {}: child scan failed ({}): {}", id, e.kind(), e);
                        break;
                    }
                }
            }

            if !sleep_unless_cancelled(&token, self.ctx.config.dispatcher_interval) {
                break;
            }
        }

        if let Some(fault) = self.signals.take_fault() {
            error!("entity {}: stopping after {} failure", id, fault.kind());
        } else if self.signals.entity_gone() {
            info!("entity {}: exited", id);
        } else if self.ctx.shutdown.is_cancelled() {
            debug!("entity {}: stopping on shutdown", id);
        }

        self.teardown();
    }

    /// Attach a dispatcher to every child not yet supervised
    ///
    /// Runs under the spawn lock so two parents racing on the same child
    /// cannot both pass the "not yet registered" check. Failing to attach one
    /// child never affects this dispatcher or its other children; a child
    /// refused for any reason other than exiting is not tried again.
    fn scan_children(&self, pid: u32) -> Result<()> {
        let children = self.ctx.introspector.children(pid)?;
        if children.is_empty() {
            return Ok(());
        }

        let _guard = self
            .ctx
            .spawn_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        for child in children {
            if self.ctx.shutdown.is_cancelled() {
                break;
            }
            if self.ctx.registry.is_active(EntityId::Process(child))
                || self.ctx.is_refused(child)
            {
                continue;
            }

            debug!("entity {}: found child {}", pid, child);
            match Dispatcher::attach(&self.ctx, child) {
                Ok(_) => {}
                Err(e @ (AgentError::EntityGone(_) | AgentError::DuplicateEntity(_))) => {
                    debug!("entity {}: skipped child {}: {}", pid, child, e);
                }
                Err(e) => {
                    self.ctx.refuse(child);
                    error!(
                        "entity {}: failed to attach child {} ({}), not retrying: {}",
                        pid,
                        child,
                        e.kind(),
                        e
                    );
                }
            }
        }
        Ok(())
    }

    fn refresh_frontend(&mut self) {
        let snapshot = match &self.info {
            Some(info) => {
                if let Some(Reading::Cpu(cpu)) = self.pool.cached(MetricDomain::Cpu).as_deref() {
                    self.cpu_time = Some(running_max(self.cpu_time, cpu.cpu_time));
                }
                process_snapshot(info, self.cpu_time, &self.pool)
            }
            None => system_snapshot(&self.pool),
        };
        self.handle.publish(snapshot);
    }

    fn write_cpu_time(&self) -> Result<()> {
        let path = entity_path(&self.ctx.config.basename, self.handle.id(), "cputime");
        std::fs::write(path, format!("{:.2}\n", self.cpu_time.unwrap_or(0.0)))?;
        Ok(())
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let id = self.handle.id();
        self.handle.set_state(DispatcherState::Terminating);
        self.handle.stop();
        self.pool.stop();

        if self.started {
            self.refresh_frontend();
        }
        // Registered processes always get a final cpu time, even when they
        // vanished before their pool started
        if !id.is_system() {
            if let Err(e) = self.write_cpu_time() {
                warn!("entity {}: failed to write cpu time: {}", id, e);
            }
        }

        self.ctx.introspector.release(id);
        self.ctx.registry.unregister(id);
        self.handle.set_state(DispatcherState::Terminated);
        debug!("entity {}: dispatcher terminated", id);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Fold a new CPU time reading into the running maximum
fn running_max(current: Option<f64>, reading: f64) -> f64 {
    match current {
        Some(max) => max.max(reading),
        None => reading,
    }
}
