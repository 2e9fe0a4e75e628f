//! Resource sampling for supervised processes.
//!
//! # Data Sources
//! - `/proc/[pid]/stat`: utime, stime (clock ticks)
//! - `/proc/[pid]/status`: RssAnon + VmSwap (private bytes)
//! - System CLK_TCK via sysconf(_SC_CLK_TCK)

use dk_common::ProcessResourceSample;
use std::fs;

/// Source of per-tick resource readings for a running process.
///
/// Returning `None` means no reading was available this tick (process
/// already reaped, unsupported platform); the supervisor skips the check.
pub trait ResourceSampler {
    fn sample(&mut self, pid: u32) -> Option<ProcessResourceSample>;
}

/// System clock ticks per second.
#[cfg(unix)]
pub fn clk_tck() -> u64 {
    static CLK_TCK: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as u64
        } else {
            100
        }
    })
}

#[cfg(not(unix))]
pub fn clk_tck() -> u64 {
    100
}

/// Fields of `/proc/[pid]/stat` (or a task's stat) used here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub comm: String,
    pub state: char,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
}

/// Parse stat file content.
///
/// The comm field is parenthesized and may itself contain spaces or `)`,
/// so fields are located from the last `)`.
pub fn parse_proc_stat_content(content: &str) -> Option<ProcStat> {
    let comm_start = content.find('(')?;
    let comm_end = content.rfind(')')?;
    if comm_end < comm_start {
        return None;
    }
    let comm = content[comm_start + 1..comm_end].to_string();

    let fields: Vec<&str> = content.get(comm_end + 1..)?.split_whitespace().collect();
    // fields[0] is stat field 3 (state); utime/stime are fields 14/15
    if fields.len() < 13 {
        return None;
    }

    Some(ProcStat {
        comm,
        state: fields[0].chars().next()?,
        utime_ticks: fields[11].parse().ok()?,
        stime_ticks: fields[12].parse().ok()?,
    })
}

pub fn parse_proc_stat(pid: u32) -> Option<ProcStat> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_proc_stat_content(&content)
}

/// Private bytes from status content: anonymous resident memory plus swap.
///
/// Kernels without `RssAnon` (pre-4.5) fall back to `VmData`.
pub fn parse_status_private_bytes(content: &str) -> Option<u64> {
    let mut rss_anon = None;
    let mut vm_swap = None;
    let mut vm_data = None;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let slot = match key {
            "RssAnon" => &mut rss_anon,
            "VmSwap" => &mut vm_swap,
            "VmData" => &mut vm_data,
            _ => continue,
        };
        *slot = parse_kb(rest);
    }

    match (rss_anon, vm_data) {
        (Some(anon), _) => Some(anon.saturating_add(vm_swap.unwrap_or(0))),
        (None, Some(data)) => Some(data),
        (None, None) => None,
    }
}

fn parse_kb(value: &str) -> Option<u64> {
    let kb: u64 = value.split_whitespace().next()?.parse().ok()?;
    kb.checked_mul(1024)
}

/// Reads samples from procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsSampler;

impl ResourceSampler for ProcfsSampler {
    #[cfg(target_os = "linux")]
    fn sample(&mut self, pid: u32) -> Option<ProcessResourceSample> {
        let stat = parse_proc_stat(pid)?;
        let status = fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
        let private_bytes = parse_status_private_bytes(&status).unwrap_or(0);
        let tck = clk_tck() as f64;
        Some(ProcessResourceSample::new(
            stat.utime_ticks as f64 / tck,
            stat.stime_ticks as f64 / tck,
            private_bytes,
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&mut self, _pid: u32) -> Option<ProcessResourceSample> {
        None
    }
}

/// Replays a fixed sequence of samples, one per tick.
///
/// Once exhausted, the last sample repeats.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSampler {
    samples: Vec<ProcessResourceSample>,
    next: usize,
}

impl ScriptedSampler {
    pub fn new(samples: Vec<ProcessResourceSample>) -> Self {
        Self { samples, next: 0 }
    }

    /// Number of samples handed out so far.
    pub fn taken(&self) -> usize {
        self.next
    }
}

impl ResourceSampler for ScriptedSampler {
    fn sample(&mut self, _pid: u32) -> Option<ProcessResourceSample> {
        let idx = self.next.min(self.samples.len().checked_sub(1)?);
        self.next += 1;
        self.samples.get(idx).copied()
    }
}
