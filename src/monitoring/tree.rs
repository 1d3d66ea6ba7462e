//! Process tree discovery and group-wide termination
//!
//! The sandboxed child is spawned as the leader of a fresh process group.
//! Any other member of that group that is not one of our own ancestors was
//! forked from the child, which is how descendants are detected without
//! walking parent links downwards.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Child;

use log::{debug, warn};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use crate::errors::{Result, SandboxError};
use crate::monitoring::stat::StatRecord;

/// Platform primitive for descendant detection and tree termination
pub trait ProcessTreeInspector: Send + Sync {
    /// Whether any descendant of `observed` is alive
    fn has_children(&self, observed: i32) -> bool;

    /// Kill the child and every member of its process group.
    ///
    /// Returns whether descendants were found before the kill.
    fn terminate_tree(&self, child: &mut Child) -> bool;
}

/// Inspector for the current platform
pub fn default_inspector() -> Box<dyn ProcessTreeInspector> {
    if cfg!(target_os = "linux") {
        Box::new(ProcfsInspector::default())
    } else {
        warn!("No process table available, descendants cannot be detected");
        Box::new(SignalOnlyInspector)
    }
}

/// Inspector backed by the kernel's `/proc` process table
#[derive(Debug, Clone)]
pub struct ProcfsInspector {
    proc_root: PathBuf,
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsInspector {
    pub fn new(proc_root: impl AsRef<Path>) -> Self {
        Self {
            proc_root: proc_root.as_ref().to_path_buf(),
        }
    }

    pub fn current_pid(&self) -> i32 {
        std::process::id() as i32
    }

    pub fn parent_pid(&self) -> i32 {
        nix::unistd::getppid().as_raw()
    }

    pub fn process_group_of(&self, pid: i32) -> Option<i32> {
        StatRecord::read(&self.proc_root, pid).map(|record| record.pgrp)
    }

    pub fn session_of(&self, pid: i32) -> Option<i32> {
        StatRecord::read(&self.proc_root, pid).map(|record| record.session)
    }

    /// Send `signal` to a single process
    pub fn signal(&self, pid: i32, signal: Signal) -> Result<()> {
        kill(Pid::from_raw(pid), signal)
            .map_err(|e| SandboxError::Syscall(format!("kill({}, {}) failed: {}", pid, signal, e)))
    }

    /// Send `signal` to every member of a process group
    pub fn signal_group(&self, pgid: i32, signal: Signal) -> Result<()> {
        killpg(Pid::from_raw(pgid), signal).map_err(|e| {
            SandboxError::Syscall(format!("killpg({}, {}) failed: {}", pgid, signal, e))
        })
    }

    /// All live process ids, in no particular order
    pub fn enumerate_pids(&self) -> Vec<i32> {
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", self.proc_root.display(), e);
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
            .collect()
    }

    /// `pid` and every ancestor up to the root
    pub fn ancestors(&self, pid: i32) -> HashSet<i32> {
        let mut chain = HashSet::new();
        let mut current = pid;

        while current > 0 && chain.insert(current) {
            match StatRecord::read(&self.proc_root, current) {
                Some(record) => current = record.ppid,
                None => break,
            }
        }

        chain
    }

    fn signal_tree(&self, pid: i32, signal: Signal) {
        if let Err(e) = self.signal_group(pid, signal) {
            debug!("{}", e);
        }
        if let Err(e) = self.signal(pid, signal) {
            debug!("{}", e);
        }
    }
}

impl ProcessTreeInspector for ProcfsInspector {
    fn has_children(&self, observed: i32) -> bool {
        let mut own_chain = self.ancestors(self.current_pid());
        own_chain.insert(self.parent_pid());

        self.enumerate_pids().into_iter().any(|pid| {
            pid != observed
                && !own_chain.contains(&pid)
                && self.process_group_of(pid) == Some(observed)
        })
    }

    fn terminate_tree(&self, child: &mut Child) -> bool {
        let pid = child.id() as i32;

        // freeze first so fast-forking descendants stay countable
        self.signal_tree(pid, Signal::SIGSTOP);
        let found = self.has_children(pid);
        self.signal_tree(pid, Signal::SIGKILL);

        debug!("Process tree {} terminated (children: {})", pid, found);
        found
    }
}

/// Fallback that can only kill the direct child
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalOnlyInspector;

impl ProcessTreeInspector for SignalOnlyInspector {
    fn has_children(&self, _observed: i32) -> bool {
        false
    }

    fn terminate_tree(&self, child: &mut Child) -> bool {
        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.kill() {
                debug!("Cannot kill {}: {}", child.id(), e);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::os::unix::process::CommandExt;
    use std::time::Duration;
    use tempfile::tempdir;

    fn fake_process(root: &Path, pid: i32, ppid: i32, pgrp: i32) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("stat"),
            format!("{} (fake) S {} {} {} 0", pid, ppid, pgrp, pgrp),
        )
        .unwrap();
    }

    #[test]
    fn enumerate_skips_non_numeric_entries() {
        let root = tempdir().unwrap();
        fake_process(root.path(), 1, 0, 1);
        fake_process(root.path(), 42, 1, 42);
        fs::create_dir_all(root.path().join("self")).unwrap();
        fs::write(root.path().join("uptime"), "1.0 1.0").unwrap();

        let mut pids = ProcfsInspector::new(root.path()).enumerate_pids();
        pids.sort();
        assert_eq!(pids, vec![1, 42]);
    }

    #[test]
    fn enumerate_missing_root_is_empty() {
        let inspector = ProcfsInspector::new("/definitely/not/a/proc/root");
        assert!(inspector.enumerate_pids().is_empty());
        assert!(!inspector.has_children(1));
    }

    #[test]
    fn ancestors_walk_to_root() {
        let root = tempdir().unwrap();
        fake_process(root.path(), 1, 0, 1);
        fake_process(root.path(), 10, 1, 10);
        fake_process(root.path(), 20, 10, 20);

        let chain = ProcfsInspector::new(root.path()).ancestors(20);
        assert_eq!(chain, HashSet::from([20, 10, 1]));
    }

    #[test]
    fn ancestors_stop_on_cycle() {
        let root = tempdir().unwrap();
        fake_process(root.path(), 5, 6, 5);
        fake_process(root.path(), 6, 5, 5);

        let chain = ProcfsInspector::new(root.path()).ancestors(5);
        assert_eq!(chain, HashSet::from([5, 6]));
    }

    #[test]
    fn group_member_counts_as_child() {
        let root = tempdir().unwrap();
        fake_process(root.path(), 100, 1, 100);
        fake_process(root.path(), 101, 100, 100);
        fake_process(root.path(), 200, 1, 200);

        let inspector = ProcfsInspector::new(root.path());
        assert!(inspector.has_children(100));
        assert!(!inspector.has_children(200));
        assert_eq!(inspector.process_group_of(101), Some(100));
        assert_eq!(inspector.session_of(101), Some(100));
    }

    #[test]
    fn leader_alone_is_not_a_child() {
        let root = tempdir().unwrap();
        fake_process(root.path(), 100, 1, 100);

        assert!(!ProcfsInspector::new(root.path()).has_children(100));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_tree_kills_group_and_reports_children() {
        let _guard = crate::test_support::serial_guard();

        let mut child = Command::new("/bin/sh")
            .args(["-c", "sleep 30 & sleep 30"])
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let inspector = ProcfsInspector::default();
        assert!(inspector.has_children(child.id() as i32));
        assert!(inspector.terminate_tree(&mut child));

        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn terminate_tree_without_children() {
        let _guard = crate::test_support::serial_guard();

        let mut child = Command::new("/bin/sh")
            .args(["-c", "exec sleep 30"])
            .process_group(0)
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));

        assert!(!ProcfsInspector::default().terminate_tree(&mut child));
        assert!(child.wait().is_ok());
    }

    #[test]
    fn signal_only_inspector_kills_direct_child() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "exec sleep 30"])
            .spawn()
            .unwrap();

        assert!(!SignalOnlyInspector.terminate_tree(&mut child));
        assert!(!child.wait().unwrap().success());
        assert!(!SignalOnlyInspector.has_children(child.id() as i32));
    }
}
