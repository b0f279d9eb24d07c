//! Frontend cache: per-entity snapshot of display-ready values
//!
//! Each dispatcher re-aggregates the cached readings of its tracers into a
//! `FrontendSnapshot` of labelled, human-readable strings. Readers load the
//! latest snapshot without blocking the dispatcher.

use crate::introspect::ProcessInfo;
use crate::tracer::ReadingSource;
use arc_swap::ArcSwap;
use pidmon_common::format::{format_percent, format_ratio, to_human_readable, Base};
use pidmon_common::{mean_percent, MetricDomain, Reading};
use std::sync::Arc;

/// Placeholder shown until a domain has produced its first reading
pub const NOT_AVAILABLE: &str = "NA";

pub const PROCESS_LABELS: [&str; 9] = [
    "PID",
    "PPID",
    "NAME",
    "CPU%",
    "STAT",
    "CPU_TIME",
    "RESIDENT_MEM",
    "NUM_THREADS",
    "NUM_CHILD_PROCESS",
];

pub const SYSTEM_LABELS: [&str; 9] = [
    "CPU%",
    "VM_AVAIL",
    "VM_TOTAL",
    "VM_PERCENT",
    "BUFFERED",
    "SHARED",
    "SWAP_AVAIL",
    "SWAP_TOTAL",
    "SWAP_PERCENT",
];

/// Ordered label/value pairs for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontendSnapshot {
    entries: Vec<(&'static str, String)>,
}

impl FrontendSnapshot {
    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(&'static str, String)] {
        &self.entries
    }

    fn push(&mut self, label: &'static str, value: impl Into<String>) {
        self.entries.push((label, value.into()));
    }
}

/// Latest snapshot of one entity, swapped as a whole on every refresh
pub struct FrontendCache {
    current: ArcSwap<FrontendSnapshot>,
}

impl FrontendCache {
    pub fn new(initial: FrontendSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn load(&self) -> Arc<FrontendSnapshot> {
        self.current.load_full()
    }

    pub fn store(&self, snapshot: FrontendSnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

impl Default for FrontendCache {
    fn default() -> Self {
        Self::new(FrontendSnapshot::default())
    }
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn bytes(num: u64) -> String {
    to_human_readable(num, Base::Binary)
}

/// Snapshot of a process entity
///
/// `cpu_time` is the dispatcher's running maximum rather than the latest raw
/// reading, so the displayed value never goes backwards.
pub fn process_snapshot(
    info: &ProcessInfo,
    cpu_time: Option<f64>,
    source: &impl ReadingSource,
) -> FrontendSnapshot {
    let cpu = source.cached(MetricDomain::Cpu);
    let mem = source.cached(MetricDomain::Mem);
    let stat = source.cached(MetricDomain::Stat);
    let child = source.cached(MetricDomain::Child);

    let percent = match cpu.as_deref() {
        Some(Reading::Cpu(c)) => Some(format_percent(c.percent)),
        _ => None,
    };
    let state = match stat.as_deref() {
        Some(Reading::Stat(s)) => Some(s.to_string()),
        _ => None,
    };
    let resident = match mem.as_deref() {
        Some(Reading::Mem(m)) => Some(bytes(m.resident)),
        _ => None,
    };
    let (threads, children) = match child.as_deref() {
        Some(Reading::Child(c)) => (Some(c.threads.to_string()), Some(c.children.to_string())),
        _ => (None, None),
    };

    let mut snapshot = FrontendSnapshot::default();
    snapshot.push("PID", info.pid.to_string());
    snapshot.push("PPID", info.ppid.to_string());
    snapshot.push("NAME", info.name.clone());
    snapshot.push("CPU%", or_na(percent));
    snapshot.push("STAT", or_na(state));
    snapshot.push("CPU_TIME", or_na(cpu_time.map(|t| format!("{:.2}", t))));
    snapshot.push("RESIDENT_MEM", or_na(resident));
    snapshot.push("NUM_THREADS", or_na(threads));
    snapshot.push("NUM_CHILD_PROCESS", or_na(children));
    snapshot
}

/// Snapshot of the system entity
pub fn system_snapshot(source: &impl ReadingSource) -> FrontendSnapshot {
    let cpu = source.cached(MetricDomain::SysCpu);
    let mem = source.cached(MetricDomain::SysMem);
    let swap = source.cached(MetricDomain::SysSwap);

    let mut snapshot = FrontendSnapshot::default();

    let percent = match cpu.as_deref() {
        Some(Reading::SysCpu(cores)) => Some(format_percent(mean_percent(cores))),
        _ => None,
    };
    snapshot.push("CPU%", or_na(percent));

    match mem.as_deref() {
        Some(Reading::SysMem(m)) => {
            let used = m.total.saturating_sub(m.available);
            snapshot.push("VM_AVAIL", bytes(m.available));
            snapshot.push("VM_TOTAL", bytes(m.total));
            snapshot.push("VM_PERCENT", format_ratio(used, m.total));
            snapshot.push("BUFFERED", bytes(m.buffered));
            snapshot.push("SHARED", bytes(m.shared));
        }
        _ => {
            for label in ["VM_AVAIL", "VM_TOTAL", "VM_PERCENT", "BUFFERED", "SHARED"] {
                snapshot.push(label, NOT_AVAILABLE);
            }
        }
    }

    match swap.as_deref() {
        Some(Reading::SysSwap(s)) => {
            snapshot.push("SWAP_AVAIL", bytes(s.free));
            snapshot.push("SWAP_TOTAL", bytes(s.total));
            snapshot.push("SWAP_PERCENT", format_ratio(s.used, s.total));
        }
        _ => {
            for label in ["SWAP_AVAIL", "SWAP_TOTAL", "SWAP_PERCENT"] {
                snapshot.push(label, NOT_AVAILABLE);
            }
        }
    }

    snapshot
}
