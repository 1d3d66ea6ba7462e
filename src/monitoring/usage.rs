//! Resource usage sampling via /proc
//!
//! CPU time is the sum of user and system time of the observed process.
//! Memory is the larger of the data segment size (`VmData`) and the resident
//! peak (`VmHWM`), so both heap reservations and touched pages count.

use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::errors::{Result, SandboxError};
use crate::monitoring::stat::read_stat_file;

/// One usage sample of a process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// User + system CPU time
    pub cpu_time: Duration,
    /// Memory in bytes
    pub memory_bytes: u64,
}

impl ResourceUsage {
    /// Sample `/proc/<pid>`
    pub fn sample(pid: i32) -> Result<Self> {
        Self::sample_from(Path::new("/proc"), pid)
    }

    /// Sample `<proc_root>/<pid>`
    pub fn sample_from(proc_root: &Path, pid: i32) -> Result<Self> {
        let dir = proc_root.join(pid.to_string());

        let stat = read_stat_file(&dir.join("stat")).ok_or_else(|| {
            SandboxError::ProcessMonitoring(format!("Process {} not found", pid))
        })?;
        let ticks = cpu_ticks(&stat).ok_or_else(|| {
            SandboxError::ProcessMonitoring(format!("Invalid stat line for {}", pid))
        })?;

        let status = read_stat_file(&dir.join("status")).unwrap_or_default();
        let memory_kb = status_kb(&status, "VmData:").max(status_kb(&status, "VmHWM:"));

        Ok(ResourceUsage {
            cpu_time: ticks_to_duration(ticks, clock_ticks_per_second()),
            memory_bytes: memory_kb * 1024,
        })
    }
}

/// utime + stime, in clock ticks
///
/// Fields are counted from the last `)` so a command name with spaces or
/// parentheses does not shift them.
fn cpu_ticks(stat: &str) -> Option<u64> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is state (field 3); utime is field 14, stime field 15
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

fn status_kb(status: &str, key: &str) -> u64 {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn clock_ticks_per_second() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

fn ticks_to_duration(ticks: u64, clk_tck: u64) -> Duration {
    Duration::from_millis(ticks * 1000 / clk_tck)
}

/// Raise the scheduling priority of the calling thread.
///
/// Best effort: lowering niceness needs `CAP_SYS_NICE`, failures are only
/// logged.
pub fn raise_thread_priority() {
    #[cfg(target_os = "linux")]
    {
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
        let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, tid, -10) };
        if ret != 0 {
            debug!(
                "Cannot raise watcher priority: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    debug!("Watcher priority left unchanged on this platform");
}
