use super::{Introspector, MapRegion, MountInfo, ProcessInfo};
use crate::error::{AgentError, Result};
use pidmon_common::{
    ChildReading, CpuReading, EntityId, IoReading, MemReading, MetricDomain, Reading,
    SysMemReading, SysSwapReading, SyscallReading,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct FakeProcess {
    ppid: u32,
    cpu_time: f64,
    started: u64,
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<u32, FakeProcess>,
    denied: HashSet<u32>,
    vanish_on_environ: HashSet<u32>,
    info_calls: BTreeMap<u32, usize>,
    released: Vec<EntityId>,
    spawned: u64,
}

/// In-memory process table used in tests to script spawns and exits
#[derive(Default)]
pub(crate) struct FakeIntrospector {
    state: Mutex<FakeState>,
}

impl FakeIntrospector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn(&self, pid: u32, ppid: u32) {
        let mut state = self.lock();
        state.spawned += 1;
        let started = state.spawned;
        state.processes.insert(
            pid,
            FakeProcess {
                ppid,
                cpu_time: 0.0,
                started,
            },
        );
    }

    pub(crate) fn exit(&self, pid: u32) {
        self.lock().processes.remove(&pid);
    }

    pub(crate) fn set_cpu_time(&self, pid: u32, cpu_time: f64) {
        if let Some(process) = self.lock().processes.get_mut(&pid) {
            process.cpu_time = cpu_time;
        }
    }

    /// Make every metadata read of `pid` fail with a permission error
    pub(crate) fn deny(&self, pid: u32) {
        self.lock().denied.insert(pid);
    }

    /// Make `pid` exit while its environment is being read
    pub(crate) fn vanish_on_environ(&self, pid: u32) {
        self.lock().vanish_on_environ.insert(pid);
    }

    /// How many times metadata of `pid` was requested
    pub(crate) fn info_calls(&self, pid: u32) -> usize {
        self.lock().info_calls.get(&pid).copied().unwrap_or(0)
    }

    pub(crate) fn released(&self) -> Vec<EntityId> {
        self.lock().released.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn process(&self, pid: u32) -> Result<FakeProcess> {
        let state = self.lock();
        if state.denied.contains(&pid) {
            return Err(AgentError::PermissionDenied(EntityId::Process(pid)));
        }
        state
            .processes
            .get(&pid)
            .cloned()
            .ok_or(AgentError::EntityGone(EntityId::Process(pid)))
    }
}

impl Introspector for FakeIntrospector {
    fn exists(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>> {
        self.process(pid)?;
        Ok(self
            .lock()
            .processes
            .iter()
            .filter(|(_, p)| p.ppid == pid)
            .map(|(child, _)| *child)
            .collect())
    }

    fn info(&self, pid: u32) -> Result<ProcessInfo> {
        *self.lock().info_calls.entry(pid).or_default() += 1;
        let process = self.process(pid)?;
        Ok(ProcessInfo {
            pid,
            ppid: process.ppid,
            name: format!("fake-{}", pid),
            cmdline: vec!["fake".to_string(), pid.to_string()],
            exe: "/bin/fake".to_string(),
            cwd: "/".to_string(),
        })
    }

    fn start_time(&self, pid: u32) -> Result<u64> {
        self.lock()
            .processes
            .get(&pid)
            .map(|p| p.started)
            .ok_or(AgentError::EntityGone(EntityId::Process(pid)))
    }

    fn environ(&self, pid: u32) -> Result<Vec<(String, String)>> {
        {
            let mut state = self.lock();
            if state.vanish_on_environ.contains(&pid) {
                state.processes.remove(&pid);
            }
        }
        self.process(pid)?;
        Ok(vec![("FAKE_PID".to_string(), pid.to_string())])
    }

    fn memory_maps(&self, pid: u32) -> Result<Vec<MapRegion>> {
        self.process(pid)?;
        Ok(vec![MapRegion {
            path: "/bin/fake".to_string(),
            resident: 4096,
            virt: 8192,
            swap: 0,
        }])
    }

    fn probe(&self, id: EntityId, domain: MetricDomain) -> Result<Reading> {
        let process = match id {
            EntityId::Process(pid) => Some(self.process(pid)?),
            EntityId::System => None,
        };

        let reading = match (process, domain) {
            (Some(p), MetricDomain::Cpu) => Reading::Cpu(CpuReading {
                percent: 12.5,
                cpu_time: p.cpu_time,
            }),
            (Some(_), MetricDomain::Mem) => Reading::Mem(MemReading {
                resident: 2048,
                virt: 4096,
                ..MemReading::default()
            }),
            (Some(_), MetricDomain::Io) => Reading::Io(IoReading::default()),
            (Some(_), MetricDomain::Fd) => Reading::Fd(3),
            (Some(_), MetricDomain::Child) => {
                let children = self.children(id.as_raw())?.len() as u64;
                Reading::Child(ChildReading {
                    threads: 1,
                    children,
                })
            }
            (Some(_), MetricDomain::Stat) => Reading::Stat('S'),
            (Some(_), MetricDomain::Syscall) => Reading::Syscall(SyscallReading::default()),
            (None, MetricDomain::SysCpu) => Reading::SysCpu(vec![10.0, 30.0]),
            (None, MetricDomain::SysMem) => Reading::SysMem(SysMemReading {
                available: 1024,
                total: 4096,
                buffered: 0,
                shared: 512,
            }),
            (None, MetricDomain::SysSwap) => Reading::SysSwap(SysSwapReading {
                free: 0,
                total: 0,
                used: 0,
            }),
            (_, domain) => {
                return Err(AgentError::Introspection {
                    id,
                    message: format!("metric domain {} does not apply", domain),
                })
            }
        };
        Ok(reading)
    }

    fn mounts(&self) -> Result<Vec<MountInfo>> {
        Ok(vec![MountInfo {
            device: "/dev/fake0".to_string(),
            mount_point: "/".to_string(),
            fstype: "ext4".to_string(),
            options: "rw".to_string(),
            total: 1 << 30,
            used: 1 << 29,
        }])
    }

    fn cpu_count(&self) -> usize {
        2
    }

    fn release(&self, id: EntityId) {
        self.lock().released.push(id);
    }
}
