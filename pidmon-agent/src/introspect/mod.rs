//! OS introspection used by dispatchers and pollers
//!
//! Every call may fail with `AgentError::EntityGone` when the process has
//! exited in the meantime. Callers must treat that as the normal end of the
//! entity, distinct from any other failure.

#[cfg(test)]
pub(crate) mod fake;
#[cfg(target_os = "linux")]
pub mod procfs;

use crate::error::Result;
use pidmon_common::{EntityId, MetricDomain, Reading};

/// Static facts about a process, captured once at attach time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
    pub exe: String,
    pub cwd: String,
}

/// Memory usage of one mapped path, in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRegion {
    pub path: String,
    pub resident: u64,
    pub virt: u64,
    pub swap: u64,
}

/// One mounted volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub device: String,
    pub mount_point: String,
    pub fstype: String,
    pub options: String,
    pub total: u64,
    pub used: u64,
}

pub trait Introspector: Send + Sync {
    /// Whether the process is alive
    fn exists(&self, pid: u32) -> bool;

    /// Direct children of a live process
    fn children(&self, pid: u32) -> Result<Vec<u32>>;

    fn info(&self, pid: u32) -> Result<ProcessInfo>;

    /// Start time of the process, distinguishing it from a later one
    /// reusing the same pid
    fn start_time(&self, pid: u32) -> Result<u64>;

    /// Environment as `NAME=VALUE` pairs
    fn environ(&self, pid: u32) -> Result<Vec<(String, String)>>;

    fn memory_maps(&self, pid: u32) -> Result<Vec<MapRegion>>;

    /// Read one metric domain for one entity
    fn probe(&self, id: EntityId, domain: MetricDomain) -> Result<Reading>;

    fn mounts(&self) -> Result<Vec<MountInfo>>;

    /// Number of logical cores, used for the system CPU table layout
    fn cpu_count(&self) -> usize;

    /// Drop any per-entity state kept between probes
    fn release(&self, _id: EntityId) {}
}
