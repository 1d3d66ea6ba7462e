//! Child process launch strategies
//!
//! Both strategies spawn the child as the leader of a new process group with
//! all three standard streams piped. The constrained strategy goes through
//! the `sandbox-exec` helper, which installs kernel resource limits as a
//! backstop before exec'ing the real command.

use std::env;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use log::{debug, info, warn};
use nix::unistd::User;

use crate::controller::SandboxConfig;
use crate::errors::{Result, SandboxError};

/// File name of the resource-limiting helper binary
pub const HELPER_NAME: &str = "sandbox-exec";

/// Encoded value for a limit the helper should leave alone
const UNSET: i64 = -1;

/// Starts the sandboxed child
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the child with piped standard streams in a fresh process group
    fn launch(&self, config: &SandboxConfig) -> Result<Child>;
}

/// How the child is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Spawn the command directly; limits are only enforced by polling
    Direct,

    /// Spawn through the helper so kernel limits back up the polling.
    /// Fails to launch if the helper is missing.
    Constrained,

    /// Constrained on Linux when the helper can be found, direct otherwise
    #[default]
    Auto,
}

impl LaunchMode {
    /// Resolve Auto mode to a concrete mode
    pub fn resolve(&self, helper_available: bool) -> ResolvedLaunchMode {
        match self {
            LaunchMode::Direct => ResolvedLaunchMode::Direct,
            LaunchMode::Constrained => ResolvedLaunchMode::Constrained,
            LaunchMode::Auto => {
                if cfg!(target_os = "linux") && helper_available {
                    ResolvedLaunchMode::Constrained
                } else {
                    ResolvedLaunchMode::Direct
                }
            }
        }
    }
}

/// A resolved (non-Auto) launch mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLaunchMode {
    Direct,
    Constrained,
}

/// Pick the launcher for `config`
pub fn launcher_for(config: &SandboxConfig) -> Box<dyn ProcessLauncher> {
    let helper = locate_helper(config.helper_path.as_deref());

    match config.launch_mode.resolve(helper.is_some()) {
        ResolvedLaunchMode::Constrained => {
            let helper = helper.unwrap_or_else(|| PathBuf::from(HELPER_NAME));
            debug!("Launching through {}", helper.display());
            Box::new(RlimitLauncher::new(helper))
        }
        ResolvedLaunchMode::Direct => {
            if config.launch_mode == LaunchMode::Auto && cfg!(target_os = "linux") {
                warn!("{} not found, kernel limits will not be applied", HELPER_NAME);
            }
            Box::new(DirectLauncher)
        }
    }
}

/// Find the helper: explicit path, next to the running executable, or on PATH
pub fn locate_helper(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }

    let sibling = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(HELPER_NAME)))
        .filter(|path| path.is_file());
    if sibling.is_some() {
        return sibling;
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(HELPER_NAME))
            .find(|path| path.is_file())
    })
}

/// Positional helper arguments: `CPU NPROC FSIZE NOFILE`
pub fn helper_arguments(config: &SandboxConfig) -> Vec<String> {
    let cpu_seconds = match (config.cpu_limit, config.cpu_limit_addition) {
        (Some(limit), Some(addition)) => (limit + addition).as_secs_f64().ceil() as i64,
        (Some(limit), None) => limit.as_secs_f64().ceil() as i64,
        (None, _) => UNSET,
    };

    vec![
        cpu_seconds.to_string(),
        encode_count(config.thread_count_limit).to_string(),
        encode_count(config.file_size_limit).to_string(),
        encode_count(config.open_file_limit).to_string(),
    ]
}

/// Zero is not a usable kernel limit for these resources and means unset
fn encode_count(limit: Option<u64>) -> i64 {
    match limit {
        Some(value) if value > 0 => i64::try_from(value).unwrap_or(i64::MAX),
        _ => UNSET,
    }
}

fn prepare(mut command: Command, config: &SandboxConfig) -> Result<Command> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }

    if let Some(name) = &config.user {
        let user = User::from_name(name)
            .map_err(|e| SandboxError::Syscall(format!("getpwnam({}) failed: {}", name, e)))?
            .ok_or_else(|| SandboxError::UserNotFound(name.clone()))?;
        command.uid(user.uid.as_raw()).gid(user.gid.as_raw());
    }

    Ok(command)
}

fn spawn(mut command: Command, config: &SandboxConfig) -> Result<Child> {
    let child = command
        .spawn()
        .map_err(|e| SandboxError::launch(&config.program, e))?;
    info!("Started {} as pid {}", config.program, child.id());
    Ok(child)
}

/// Spawns the command as is
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLauncher;

impl ProcessLauncher for DirectLauncher {
    fn launch(&self, config: &SandboxConfig) -> Result<Child> {
        let mut command = Command::new(&config.program);
        command.args(&config.args);
        spawn(prepare(command, config)?, config)
    }
}

/// Spawns the command through the rlimit helper
#[derive(Debug, Clone)]
pub struct RlimitLauncher {
    helper: PathBuf,
}

impl RlimitLauncher {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }
}

impl ProcessLauncher for RlimitLauncher {
    fn launch(&self, config: &SandboxConfig) -> Result<Child> {
        let mut command = Command::new(&self.helper);
        command
            .args(helper_arguments(config))
            .arg(&config.program)
            .args(&config.args);

        let child = prepare(command, config)?
            .spawn()
            .map_err(|e| SandboxError::launch(self.helper.display().to_string(), e))?;
        info!(
            "Started {} through {} as pid {}",
            config.program,
            self.helper.display(),
            child.id()
        );
        Ok(child)
    }
}
