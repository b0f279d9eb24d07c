//! Entity registry enforcing one dispatcher per monitored entity
//!
//! This module maintains a concurrent map from entity ids to the handle of
//! the dispatcher supervising them. An id is present exactly while its
//! dispatcher runs: it is inserted atomically with the "is this new" check
//! and removed once, at teardown.

use crate::dispatcher::DispatcherHandle;
use crate::error::{AgentError, Result};
use crate::table::TableAppender;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use log::warn;
use pidmon_common::EntityId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Columns of the append-only registry log
pub const REGISTRY_HEADER: [&str; 5] = ["TIME", "PID", "CMD", "EXE", "CWD"];

/// Thread-safe registry shared by every dispatcher of a run
#[derive(Clone)]
pub struct EntityRegistry {
    inner: Arc<DashMap<EntityId, DispatcherHandle>>,
    seen: Arc<DashSet<EntityId>>,
    log: Arc<Mutex<RegistryLog>>,
}

struct RegistryLog {
    path: Option<PathBuf>,
    appender: Option<TableAppender>,
}

impl EntityRegistry {
    /// Create a registry that keeps no registry log
    pub fn new() -> Self {
        Self::with_log_path(None)
    }

    /// Create a registry appending attach records to `path`
    ///
    /// The file is created lazily on the first record.
    pub fn with_log(path: PathBuf) -> Self {
        Self::with_log_path(Some(path))
    }

    fn with_log_path(path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            seen: Arc::new(DashSet::new()),
            log: Arc::new(Mutex::new(RegistryLog {
                path,
                appender: None,
            })),
        }
    }

    /// Register a dispatcher, failing if the id is already supervised
    pub fn register(&self, handle: DispatcherHandle) -> Result<()> {
        let id = handle.id();
        match self.inner.entry(id) {
            Entry::Occupied(_) => Err(AgentError::DuplicateEntity(id)),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                self.seen.insert(id);
                Ok(())
            }
        }
    }

    /// Check whether a dispatcher currently supervises `id`
    pub fn is_active(&self, id: EntityId) -> bool {
        self.inner.contains_key(&id)
    }

    /// Ids of every running dispatcher
    pub fn active_ids(&self) -> BTreeSet<EntityId> {
        self.inner.iter().map(|r| *r.key()).collect()
    }

    /// Remove an id; returns whether it was present
    pub fn unregister(&self, id: EntityId) -> bool {
        self.inner.remove(&id).is_some()
    }

    /// Handles of every running dispatcher, ordered by id
    pub fn handles(&self) -> Vec<DispatcherHandle> {
        let mut handles: Vec<_> = self.inner.iter().map(|r| r.value().clone()).collect();
        handles.sort_by_key(|h| h.id());
        handles
    }

    /// Every id that was ever registered, including terminated ones
    pub fn seen_ids(&self) -> BTreeSet<EntityId> {
        self.seen.iter().map(|r| *r).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Append one line to the registry log, serialized across dispatchers
    pub fn record(&self, fields: &[String]) -> Result<()> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if log.appender.is_none() {
            let Some(path) = log.path.clone() else {
                return Ok(());
            };
            log.appender = Some(TableAppender::open_append(&path, &REGISTRY_HEADER)?);
        }
        if let Some(appender) = log.appender.as_mut() {
            appender.append_fields(fields)?;
        }
        Ok(())
    }
}

/// Process ids recorded in a registry log of a finished run
///
/// Lines whose PID column does not parse are skipped.
pub fn read_registry_log(path: &Path) -> Result<BTreeSet<EntityId>> {
    let text = std::fs::read_to_string(path)?;
    let ids = text
        .lines()
        .skip(1)
        .filter_map(|line| {
            let pid = line.split('\t').nth(1)?.trim().parse::<u32>();
            match pid {
                Ok(pid) if pid > 0 => Some(EntityId::Process(pid)),
                _ => {
                    warn!("Skipping malformed registry line: {}", line);
                    None
                }
            }
        })
        .collect();
    Ok(ids)
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
