//! Linux introspection backed by /proc
//!
//! Per-process metrics are parsed straight from `/proc/<pid>/*`. System CPU
//! and swap come from `sysinfo`; system memory from `/proc/meminfo`, which
//! also carries the buffer and shared-memory figures.
//!
//! A zombie process counts as gone: it holds no resources worth sampling
//! and can no longer spawn children.

use super::{Introspector, MapRegion, MountInfo, ProcessInfo};
use crate::error::{AgentError, Result};
use dashmap::DashMap;
use log::{debug, warn};
use pidmon_common::{
    ChildReading, CpuReading, EntityId, IoReading, MemReading, MetricDomain, Reading,
    SysMemReading, SysSwapReading, SyscallReading,
};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use sysinfo::System;

/// procfs mount point
const PROC_ROOT: &str = "/proc";

/// Fields of `/proc/<pid>/stat` the engine uses
#[derive(Debug, Clone, PartialEq, Eq)]
struct StatFields {
    name: String,
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    num_threads: u64,
    /// Clock ticks after boot
    start_time: u64,
}

impl StatFields {
    fn is_dead(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Introspector reading a procfs tree
pub struct ProcfsIntrospector {
    proc_root: PathBuf,
    clock_ticks: f64,
    page_size: u64,
    cpu_samples: DashMap<u32, (Instant, f64)>,
    system: Mutex<System>,
}

impl ProcfsIntrospector {
    /// Create an introspector for the host's /proc
    pub fn new() -> Self {
        Self::with_root(PathBuf::from(PROC_ROOT))
    }

    /// Create an introspector over a custom procfs root (for testing)
    pub fn with_root(proc_root: PathBuf) -> Self {
        let clock_ticks = match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
            ticks if ticks > 0 => ticks as f64,
            _ => 100.0,
        };
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as u64,
            _ => 4096,
        };

        // The first CPU refresh only establishes a baseline
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            proc_root,
            clock_ticks,
            page_size,
            cpu_samples: DashMap::new(),
            system: Mutex::new(system),
        }
    }

    fn pid_path(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }

    fn read(&self, id: EntityId, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| classify(id, e))
    }

    fn stat(&self, pid: u32) -> Result<StatFields> {
        let id = EntityId::Process(pid);
        let content = self.read(id, &self.pid_path(pid).join("stat"))?;
        parse_stat(&content).ok_or_else(|| AgentError::Introspection {
            id,
            message: "malformed stat line".to_string(),
        })
    }

    /// Like `stat`, but a zombie is reported as gone
    fn live_stat(&self, pid: u32) -> Result<StatFields> {
        let stat = self.stat(pid)?;
        if stat.is_dead() {
            return Err(AgentError::EntityGone(EntityId::Process(pid)));
        }
        Ok(stat)
    }

    fn read_link_lossy(&self, pid: u32, name: &str) -> Result<String> {
        match fs::read_link(self.pid_path(pid).join(name)) {
            Ok(target) => Ok(target.to_string_lossy().into_owned()),
            // Kernel threads have no exe/cwd although the process is alive
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.exists(pid) => Ok(String::new()),
            Err(e) => Err(classify(EntityId::Process(pid), e)),
        }
    }

    fn scan_children(&self, pid: u32) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.proc_root)?;
        let mut children: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|candidate| {
                // Processes vanish during the walk; skip them silently
                match self.stat(*candidate) {
                    Ok(stat) => stat.ppid == pid && !stat.is_dead(),
                    Err(_) => false,
                }
            })
            .collect();
        children.sort_unstable();
        Ok(children)
    }

    fn probe_cpu(&self, pid: u32) -> Result<Reading> {
        let stat = self.stat(pid)?;
        let cpu_time = (stat.utime + stat.stime) as f64 / self.clock_ticks;
        let now = Instant::now();

        let percent = match self.cpu_samples.insert(pid, (now, cpu_time)) {
            Some((last_at, last_time)) => {
                let elapsed = now.duration_since(last_at).as_secs_f64();
                if elapsed > 0.0 {
                    ((cpu_time - last_time) / elapsed * 100.0).max(0.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        Ok(Reading::Cpu(CpuReading { percent, cpu_time }))
    }

    fn probe_mem(&self, pid: u32) -> Result<Reading> {
        let id = EntityId::Process(pid);
        let statm = self.read(id, &self.pid_path(pid).join("statm"))?;
        let pages: Vec<u64> = statm
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if pages.len() < 6 {
            return Err(AgentError::Introspection {
                id,
                message: "malformed statm line".to_string(),
            });
        }

        let status = self.read(id, &self.pid_path(pid).join("status"))?;
        let swap = parse_key_values(&status).get("VmSwap").copied().unwrap_or(0);

        Ok(Reading::Mem(MemReading {
            virt: pages[0] * self.page_size,
            resident: pages[1] * self.page_size,
            shared: pages[2] * self.page_size,
            text: pages[3] * self.page_size,
            data: pages[5] * self.page_size,
            swap,
        }))
    }

    fn io_counters(&self, pid: u32) -> Result<HashMap<String, u64>> {
        let content = self.read(EntityId::Process(pid), &self.pid_path(pid).join("io"))?;
        Ok(parse_key_values(&content))
    }

    fn probe_fd(&self, pid: u32) -> Result<Reading> {
        let entries = fs::read_dir(self.pid_path(pid).join("fd"))
            .map_err(|e| classify(EntityId::Process(pid), e))?;
        Ok(Reading::Fd(entries.filter_map(|e| e.ok()).count() as u64))
    }

    fn probe_sys_cpu(&self) -> Reading {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu_usage();
        Reading::SysCpu(
            system
                .cpus()
                .iter()
                .map(|cpu| cpu.cpu_usage() as f64)
                .collect(),
        )
    }

    fn probe_sys_mem(&self) -> Result<Reading> {
        let content = self.read(EntityId::System, &self.proc_root.join("meminfo"))?;
        let values = parse_key_values(&content);
        let get = |key: &str| values.get(key).copied().unwrap_or(0);

        Ok(Reading::SysMem(SysMemReading {
            available: get("MemAvailable"),
            total: get("MemTotal"),
            buffered: get("Buffers"),
            shared: get("Shmem"),
        }))
    }

    fn probe_sys_swap(&self) -> Reading {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_memory();
        Reading::SysSwap(SysSwapReading {
            free: system.free_swap(),
            total: system.total_swap(),
            used: system.used_swap(),
        })
    }
}

impl Default for ProcfsIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl Introspector for ProcfsIntrospector {
    fn exists(&self, pid: u32) -> bool {
        matches!(self.stat(pid), Ok(stat) if !stat.is_dead())
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>> {
        self.live_stat(pid)?;
        self.scan_children(pid)
    }

    fn info(&self, pid: u32) -> Result<ProcessInfo> {
        let id = EntityId::Process(pid);
        let stat = self.live_stat(pid)?;

        let raw_cmdline =
            fs::read(self.pid_path(pid).join("cmdline")).map_err(|e| classify(id, e))?;
        let cmdline = split_nul(&raw_cmdline);

        Ok(ProcessInfo {
            pid,
            ppid: stat.ppid,
            name: stat.name,
            cmdline,
            exe: self.read_link_lossy(pid, "exe")?,
            cwd: self.read_link_lossy(pid, "cwd")?,
        })
    }

    fn start_time(&self, pid: u32) -> Result<u64> {
        Ok(self.stat(pid)?.start_time)
    }

    fn environ(&self, pid: u32) -> Result<Vec<(String, String)>> {
        let raw = fs::read(self.pid_path(pid).join("environ"))
            .map_err(|e| classify(EntityId::Process(pid), e))?;

        Ok(split_nul(&raw)
            .into_iter()
            .filter_map(|entry| {
                let (name, value) = entry.split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect())
    }

    fn memory_maps(&self, pid: u32) -> Result<Vec<MapRegion>> {
        let content = self.read(EntityId::Process(pid), &self.pid_path(pid).join("smaps"))?;
        Ok(parse_smaps(&content))
    }

    fn probe(&self, id: EntityId, domain: MetricDomain) -> Result<Reading> {
        match (id, domain) {
            (EntityId::Process(pid), MetricDomain::Cpu) => self.probe_cpu(pid),
            (EntityId::Process(pid), MetricDomain::Mem) => self.probe_mem(pid),
            (EntityId::Process(pid), MetricDomain::Io) => {
                let io = self.io_counters(pid)?;
                let get = |key: &str| io.get(key).copied().unwrap_or(0);
                Ok(Reading::Io(IoReading {
                    read_bytes: get("read_bytes"),
                    write_bytes: get("write_bytes"),
                    read_chars: get("rchar"),
                    write_chars: get("wchar"),
                    cancelled_write_bytes: get("cancelled_write_bytes"),
                }))
            }
            (EntityId::Process(pid), MetricDomain::Fd) => self.probe_fd(pid),
            (EntityId::Process(pid), MetricDomain::Child) => {
                let stat = self.live_stat(pid)?;
                Ok(Reading::Child(ChildReading {
                    threads: stat.num_threads,
                    children: self.scan_children(pid)?.len() as u64,
                }))
            }
            (EntityId::Process(pid), MetricDomain::Stat) => {
                Ok(Reading::Stat(self.stat(pid)?.state))
            }
            (EntityId::Process(pid), MetricDomain::Syscall) => {
                let io = self.io_counters(pid)?;
                Ok(Reading::Syscall(SyscallReading {
                    read: io.get("syscr").copied().unwrap_or(0),
                    write: io.get("syscw").copied().unwrap_or(0),
                }))
            }
            (EntityId::System, MetricDomain::SysCpu) => Ok(self.probe_sys_cpu()),
            (EntityId::System, MetricDomain::SysMem) => self.probe_sys_mem(),
            (EntityId::System, MetricDomain::SysSwap) => Ok(self.probe_sys_swap()),
            (id, domain) => Err(AgentError::Introspection {
                id,
                message: format!("metric domain {} does not apply", domain),
            }),
        }
    }

    fn mounts(&self) -> Result<Vec<MountInfo>> {
        let content = self.read(EntityId::System, &self.proc_root.join("mounts"))?;
        let mut mounts = Vec::new();

        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }

            // Pseudo filesystems have no backing device
            let device = unescape_mount_field(fields[0]);
            if !device.starts_with('/') {
                continue;
            }

            let mount_point = unescape_mount_field(fields[1]);
            match disk_usage(&mount_point) {
                Some((total, used)) => mounts.push(MountInfo {
                    device,
                    mount_point,
                    fstype: fields[2].to_string(),
                    options: fields[3].to_string(),
                    total,
                    used,
                }),
                None => debug!("Skipping mount {}: statvfs failed", mount_point),
            }
        }

        Ok(mounts)
    }

    fn cpu_count(&self) -> usize {
        let system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        match system.cpus().len() {
            0 => {
                warn!("sysinfo reported no CPUs, falling back to available parallelism");
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            }
            n => n,
        }
    }

    fn release(&self, id: EntityId) {
        if let Some(pid) = id.pid() {
            self.cpu_samples.remove(&pid);
        }
    }
}

/// Map an IO error on a /proc path; `ESRCH` also means the process exited
fn classify(id: EntityId, err: io::Error) -> AgentError {
    if err.raw_os_error() == Some(libc::ESRCH) {
        return AgentError::EntityGone(id);
    }
    AgentError::from_io(id, err)
}

/// Parse `/proc/<pid>/stat`; the command name may itself contain `)` or spaces
fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let name = content.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();

    Some(StatFields {
        name,
        state: rest.first()?.chars().next()?,
        ppid: rest.get(1)?.parse().ok()?,
        utime: rest.get(11)?.parse().ok()?,
        stime: rest.get(12)?.parse().ok()?,
        num_threads: rest.get(17)?.parse().ok()?,
        start_time: rest.get(19)?.parse().ok()?,
    })
}

/// Parse `key: value [kB]` lines; `kB` values are converted to bytes
fn parse_key_values(content: &str) -> HashMap<String, u64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let mut parts = rest.split_whitespace();
            let value: u64 = parts.next()?.parse().ok()?;
            let value = match parts.next() {
                Some("kB") => value * 1024,
                _ => value,
            };
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Aggregate `/proc/<pid>/smaps` per mapped path, in first-seen order
fn parse_smaps(content: &str) -> Vec<MapRegion> {
    let mut regions: Vec<MapRegion> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        if let Some((virt, path)) = parse_map_header(line) {
            let slot = *index.entry(path.clone()).or_insert_with(|| {
                regions.push(MapRegion {
                    path,
                    resident: 0,
                    virt: 0,
                    swap: 0,
                });
                regions.len() - 1
            });
            regions[slot].virt += virt;
            current = Some(slot);
            continue;
        }

        let Some(slot) = current else { continue };
        if let Some(kb) = line.strip_prefix("Rss:") {
            regions[slot].resident += parse_kb(kb);
        } else if let Some(kb) = line.strip_prefix("Swap:") {
            regions[slot].swap += parse_kb(kb);
        }
    }

    regions
}

/// `start-end perms offset dev inode [path]` -> (size in bytes, path)
fn parse_map_header(line: &str) -> Option<(u64, String)> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    if perms.len() != 4 {
        return None;
    }
    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;

    let path: Vec<&str> = fields.skip(3).collect();
    let path = if path.is_empty() {
        "[anon]".to_string()
    } else {
        path.join(" ")
    };

    Some((end.saturating_sub(start), path))
}

fn parse_kb(value: &str) -> u64 {
    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Decode the octal escapes (`\040` for space) used in /proc/mounts
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(code) = field
                .get(i + 1..i + 4)
                .and_then(|oct| u8::from_str_radix(oct, 8).ok())
            {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Total and used bytes of the filesystem mounted at `mount_point`
fn disk_usage(mount_point: &str) -> Option<(u64, u64)> {
    let path = CString::new(mount_point).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(path.as_ptr(), &mut stats) } != 0 {
        return None;
    }

    let fragment = stats.f_frsize as u64;
    let total = stats.f_blocks as u64 * fragment;
    let free = stats.f_bfree as u64 * fragment;
    Some((total, total.saturating_sub(free)))
}
