//! setrlimit-based resource limits (no privileges needed)
//!
//! Applied by the `sandbox-exec` helper to itself right before it execs the
//! sandboxed command, so the limits are inherited by the command and all of
//! its descendants. They are a backstop: the supervisor's polling normally
//! fires first.

use crate::errors::{Result, SandboxError};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

/// Resource limits via setrlimit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlimitConfig {
    /// Maximum CPU time in seconds (RLIMIT_CPU); the hard limit is one
    /// second higher so SIGXCPU arrives before SIGKILL
    pub max_cpu_seconds: Option<u64>,
    /// Maximum number of processes and threads of the user (RLIMIT_NPROC)
    pub max_processes: Option<u64>,
    /// Maximum file size in bytes (RLIMIT_FSIZE)
    pub max_file_size: Option<u64>,
    /// Maximum number of open files (RLIMIT_NOFILE)
    pub max_open_files: Option<u64>,
}

impl RlimitConfig {
    /// Build from helper arguments, negative values mean unlimited
    pub fn from_raw(cpu: i64, processes: i64, file_size: i64, open_files: i64) -> Self {
        let limit = |raw: i64| u64::try_from(raw).ok();
        Self {
            max_cpu_seconds: limit(cpu),
            max_processes: limit(processes),
            max_file_size: limit(file_size),
            max_open_files: limit(open_files),
        }
    }

    /// Apply resource limits to the current process.
    ///
    /// Every limit is attempted; the first failure is returned.
    pub fn apply(&self) -> Result<()> {
        let mut outcome = Ok(());
        let mut attempt = |result: Result<()>| {
            if outcome.is_ok() {
                outcome = result;
            }
        };

        if let Some(fsize) = self.max_file_size {
            attempt(set_rlimit(libc::RLIMIT_FSIZE, fsize, fsize));
        }
        if let Some(nofile) = self.max_open_files {
            attempt(set_rlimit(libc::RLIMIT_NOFILE, nofile, nofile));
        }
        if let Some(nproc) = self.max_processes {
            attempt(set_rlimit(libc::RLIMIT_NPROC, nproc, nproc));
        }
        if let Some(cpu) = self.max_cpu_seconds {
            attempt(set_rlimit(libc::RLIMIT_CPU, cpu, cpu.saturating_add(1)));
        }

        outcome
    }
}

fn set_rlimit(resource: Resource, soft: u64, hard: u64) -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };

    let ret = unsafe { libc::setrlimit(resource, &rlim) };
    if ret != 0 {
        let resource_name = match resource {
            libc::RLIMIT_CPU => "RLIMIT_CPU",
            libc::RLIMIT_NPROC => "RLIMIT_NPROC",
            libc::RLIMIT_FSIZE => "RLIMIT_FSIZE",
            libc::RLIMIT_NOFILE => "RLIMIT_NOFILE",
            _ => "UNKNOWN",
        };
        return Err(SandboxError::Syscall(format!(
            "setrlimit({}) failed: {}",
            resource_name,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}
