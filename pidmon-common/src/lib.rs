//! Shared types between the pidmon supervision engine and its front ends
//!
//! This crate defines:
//! - `EntityId`, the identity of a monitored process or the whole system
//! - `MetricDomain`, the fixed set of metric families a poller can collect
//! - `Reading`, one immutable sample of a metric domain
//! - human-readable formatting for the frontend cache (`format`)

pub mod format;

use std::fmt;

/// Identity of a monitored entity
///
/// The system entity is a singleton. Its raw id is the sentinel `0`, which
/// never names a real process that can be monitored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    System,
    Process(u32),
}

impl EntityId {
    /// Raw id used by external collaborators (`0` for the system entity)
    pub const fn as_raw(&self) -> u32 {
        match self {
            EntityId::System => 0,
            EntityId::Process(pid) => *pid,
        }
    }

    pub const fn pid(&self) -> Option<u32> {
        match self {
            EntityId::System => None,
            EntityId::Process(pid) => Some(*pid),
        }
    }

    pub const fn is_system(&self) -> bool {
        matches!(self, EntityId::System)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::System => write!(f, "sys"),
            EntityId::Process(pid) => write!(f, "{}", pid),
        }
    }
}

/// Metric families collected by independent pollers
///
/// The discriminant doubles as the index into per-domain tables, so the
/// order here is part of the table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricDomain {
    Cpu,
    Mem,
    Io,
    Fd,
    Child,
    Stat,
    Syscall,
    SysCpu,
    SysMem,
    SysSwap,
}

impl MetricDomain {
    pub const COUNT: usize = 10;

    pub const ALL: [MetricDomain; Self::COUNT] = [
        MetricDomain::Cpu,
        MetricDomain::Mem,
        MetricDomain::Io,
        MetricDomain::Fd,
        MetricDomain::Child,
        MetricDomain::Stat,
        MetricDomain::Syscall,
        MetricDomain::SysCpu,
        MetricDomain::SysMem,
        MetricDomain::SysSwap,
    ];

    /// Domains polled for every process entity
    pub const PROCESS: [MetricDomain; 7] = [
        MetricDomain::Io,
        MetricDomain::Fd,
        MetricDomain::Mem,
        MetricDomain::Child,
        MetricDomain::Cpu,
        MetricDomain::Stat,
        MetricDomain::Syscall,
    ];

    /// Domains polled for the system entity
    pub const SYSTEM: [MetricDomain; 3] = [
        MetricDomain::SysMem,
        MetricDomain::SysCpu,
        MetricDomain::SysSwap,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn is_system(self) -> bool {
        matches!(
            self,
            MetricDomain::SysCpu | MetricDomain::SysMem | MetricDomain::SysSwap
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricDomain::Cpu => "cpu",
            MetricDomain::Mem => "mem",
            MetricDomain::Io => "io",
            MetricDomain::Fd => "fd",
            MetricDomain::Child => "child",
            MetricDomain::Stat => "stat",
            MetricDomain::Syscall => "syscall",
            MetricDomain::SysCpu => "sys_cpu",
            MetricDomain::SysMem => "sys_mem",
            MetricDomain::SysSwap => "sys_swap",
        }
    }

    /// Suffix of the log file; system logs already live under the `sys` id
    pub const fn file_suffix(&self) -> &'static str {
        match self {
            MetricDomain::SysCpu => "cpu",
            MetricDomain::SysMem => "mem",
            MetricDomain::SysSwap => "swap",
            other => other.as_str(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }

    /// Column names of this domain's log, timestamp first
    ///
    /// `cpu_count` only matters for `SysCpu`, which has one column per
    /// logical core.
    pub fn header(&self, cpu_count: usize) -> Vec<String> {
        let columns: &[&str] = match self {
            MetricDomain::Cpu => &["CPU_PERCENT", "CPU_TIME"],
            MetricDomain::Mem => &["VIRT", "RESIDENT", "SHARED", "TEXT", "DATA", "SWAP"],
            MetricDomain::Io => &[
                "READ_BYTES",
                "WRITE_BYTES",
                "READ_CHARS",
                "WRITE_CHARS",
                "CANCELLED_WRITE_BYTES",
            ],
            MetricDomain::Fd => &["FD_COUNT"],
            MetricDomain::Child => &["NUM_THREADS", "NUM_CHILD_PROCESS"],
            MetricDomain::Stat => &["STAT"],
            MetricDomain::Syscall => &["READ_SYSCALLS", "WRITE_SYSCALLS"],
            MetricDomain::SysMem => &["AVAIL", "TOTAL", "BUFFERED", "SHARED"],
            MetricDomain::SysSwap => &["FREE", "TOTAL", "USED"],
            MetricDomain::SysCpu => &[],
        };

        let mut header = vec!["TIME".to_string()];
        if *self == MetricDomain::SysCpu {
            header.extend((0..cpu_count).map(|core| core.to_string()));
        } else {
            header.extend(columns.iter().map(|c| c.to_string()));
        }
        header
    }
}

impl fmt::Display for MetricDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuReading {
    /// Percentage of one core since the previous reading
    pub percent: f64,
    /// Cumulative user + system time in seconds
    pub cpu_time: f64,
}

/// Process memory, all values in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemReading {
    pub virt: u64,
    pub resident: u64,
    pub shared: u64,
    pub text: u64,
    pub data: u64,
    pub swap: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoReading {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_chars: u64,
    pub write_chars: u64,
    pub cancelled_write_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildReading {
    pub threads: u64,
    pub children: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyscallReading {
    pub read: u64,
    pub write: u64,
}

/// System memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SysMemReading {
    pub available: u64,
    pub total: u64,
    pub buffered: u64,
    pub shared: u64,
}

/// System swap in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SysSwapReading {
    pub free: u64,
    pub total: u64,
    pub used: u64,
}

/// One sample of a metric domain
///
/// Readings are immutable once produced; pollers publish a fresh one each
/// cycle instead of mutating the previous value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Cpu(CpuReading),
    Mem(MemReading),
    Io(IoReading),
    Fd(u64),
    Child(ChildReading),
    Stat(char),
    Syscall(SyscallReading),
    /// Per-logical-core utilisation percentages
    SysCpu(Vec<f64>),
    SysMem(SysMemReading),
    SysSwap(SysSwapReading),
}

impl Reading {
    pub fn domain(&self) -> MetricDomain {
        match self {
            Reading::Cpu(_) => MetricDomain::Cpu,
            Reading::Mem(_) => MetricDomain::Mem,
            Reading::Io(_) => MetricDomain::Io,
            Reading::Fd(_) => MetricDomain::Fd,
            Reading::Child(_) => MetricDomain::Child,
            Reading::Stat(_) => MetricDomain::Stat,
            Reading::Syscall(_) => MetricDomain::Syscall,
            Reading::SysCpu(_) => MetricDomain::SysCpu,
            Reading::SysMem(_) => MetricDomain::SysMem,
            Reading::SysSwap(_) => MetricDomain::SysSwap,
        }
    }

    /// Log fields in header order, without the timestamp
    pub fn fields(&self) -> Vec<String> {
        match self {
            Reading::Cpu(c) => vec![format!("{:.2}", c.percent), format!("{:.2}", c.cpu_time)],
            Reading::Mem(m) => [m.virt, m.resident, m.shared, m.text, m.data, m.swap]
                .iter()
                .map(u64::to_string)
                .collect(),
            Reading::Io(io) => [
                io.read_bytes,
                io.write_bytes,
                io.read_chars,
                io.write_chars,
                io.cancelled_write_bytes,
            ]
            .iter()
            .map(u64::to_string)
            .collect(),
            Reading::Fd(count) => vec![count.to_string()],
            Reading::Child(c) => vec![c.threads.to_string(), c.children.to_string()],
            Reading::Stat(state) => vec![state.to_string()],
            Reading::Syscall(s) => vec![s.read.to_string(), s.write.to_string()],
            Reading::SysCpu(cores) => cores.iter().map(|p| format!("{:.2}", p)).collect(),
            Reading::SysMem(m) => [m.available, m.total, m.buffered, m.shared]
                .iter()
                .map(u64::to_string)
                .collect(),
            Reading::SysSwap(s) => [s.free, s.total, s.used]
                .iter()
                .map(u64::to_string)
                .collect(),
        }
    }
}

/// Mean of per-core percentages; `0.0` when there are no cores
pub fn mean_percent(cores: &[f64]) -> f64 {
    if cores.is_empty() {
        return 0.0;
    }
    cores.iter().sum::<f64>() / cores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_sentinel() {
        assert_eq!(EntityId::System.as_raw(), 0);
        assert_eq!(EntityId::System.to_string(), "sys");
        assert_eq!(EntityId::Process(7).to_string(), "7");
    }

    #[test]
    fn test_domain_index_matches_table_order() {
        for (i, domain) in MetricDomain::ALL.iter().enumerate() {
            assert_eq!(domain.index(), i);
        }
    }

    #[test]
    fn test_domain_partition() {
        assert!(MetricDomain::PROCESS.iter().all(|d| !d.is_system()));
        assert!(MetricDomain::SYSTEM.iter().all(|d| d.is_system()));
        assert_eq!(
            MetricDomain::PROCESS.len() + MetricDomain::SYSTEM.len(),
            MetricDomain::COUNT
        );
    }

    #[test]
    fn test_domain_from_name() {
        assert_eq!(MetricDomain::from_name("sys_cpu"), Some(MetricDomain::SysCpu));
        assert_eq!(MetricDomain::from_name("fd"), Some(MetricDomain::Fd));
        assert_eq!(MetricDomain::from_name("gpu"), None);
    }

    #[test]
    fn test_header_matches_fields() {
        let samples = [
            Reading::Cpu(CpuReading {
                percent: 12.5,
                cpu_time: 3.0,
            }),
            Reading::Mem(MemReading::default()),
            Reading::Io(IoReading::default()),
            Reading::Fd(3),
            Reading::Child(ChildReading::default()),
            Reading::Stat('S'),
            Reading::Syscall(SyscallReading::default()),
            Reading::SysCpu(vec![1.0, 2.0, 3.0, 4.0]),
            Reading::SysMem(SysMemReading::default()),
            Reading::SysSwap(SysSwapReading::default()),
        ];

        for reading in samples {
            let header = reading.domain().header(4);
            assert_eq!(header[0], "TIME");
            assert_eq!(header.len() - 1, reading.fields().len(), "{:?}", reading);
        }
    }

    #[test]
    fn test_mean_percent() {
        assert_eq!(mean_percent(&[]), 0.0);
        assert_eq!(mean_percent(&[10.0, 30.0]), 20.0);
    }
}
