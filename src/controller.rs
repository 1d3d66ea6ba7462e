//! Main sandbox controller
//!
//! A [`Sandbox`] supervises exactly one child. Starting it spawns the worker
//! threads (stdin feeder, stdout and stderr drains, completion watcher and,
//! when a CPU or memory limit is set, the resource watcher), waits until all
//! of them are parked on the readiness gate, then launches the child and
//! opens the gate.
//!
//! Every worker that observes an ending condition calls the same termination
//! routine. The first caller settles the exit code and tears the child down;
//! later callers get the settled code back.

use std::future::Future;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::{FutureExt, Shared as SharedFuture};
use log::{debug, info, warn};

use crate::errors::{Result, SandboxError};
use crate::execution::launcher::{launcher_for, LaunchMode, ProcessLauncher};
use crate::execution::stream::{sink_consumer, FaultHook, StreamDrain, StreamFeeder};
use crate::execution::sync::{Flag, Latch};
use crate::exit_code::{raw_exit_code, translate_exit_code, SpecialExitCode, TerminationCause};
use crate::monitoring::tree::{default_inspector, ProcessTreeInspector};
use crate::monitoring::usage::{raise_thread_priority, ResourceUsage};
use crate::report::{millis, SandboxStatistics};

/// Resource poll interval used when none (or zero) is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Head start given to the child before the one-shot descendant check
const CHILDREN_CHECK_DELAY: Duration = Duration::from_millis(50);

#[cfg(not(target_os = "linux"))]
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Map a raw limit to `None` when negative
pub fn limit_from_raw(raw: i64) -> Option<u64> {
    u64::try_from(raw).ok()
}

/// Map a raw millisecond value to `None` when negative
pub fn duration_from_raw_ms(raw: i64) -> Option<Duration> {
    limit_from_raw(raw).map(Duration::from_millis)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Sandbox configuration
///
/// `None` leaves a limit unenforced.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Executable to run
    pub program: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Working directory of the child, inherited when unset
    pub working_dir: Option<PathBuf>,
    /// Run the child as this user
    pub user: Option<String>,
    /// Wall-clock limit
    pub total_timeout: Option<Duration>,
    /// CPU time limit, enforced by polling
    pub cpu_limit: Option<Duration>,
    /// Extra CPU time granted to the kernel backstop limit
    pub cpu_limit_addition: Option<Duration>,
    /// Memory limit in bytes, enforced by polling
    pub memory_limit: Option<u64>,
    /// Characters of stdout delivered to the sink
    pub stdout_limit: Option<u64>,
    /// Characters of stderr delivered to the sink
    pub stderr_limit: Option<u64>,
    /// RLIMIT_NPROC for the constrained launcher
    pub thread_count_limit: Option<u64>,
    /// RLIMIT_NOFILE for the constrained launcher
    pub open_file_limit: Option<u64>,
    /// RLIMIT_FSIZE for the constrained launcher
    pub file_size_limit: Option<u64>,
    /// Kill the child if it has spawned descendants shortly after launch
    pub children_forbidden: bool,
    /// Resource poll interval
    pub poll_interval: Duration,
    pub launch_mode: LaunchMode,
    /// Location of the `sandbox-exec` helper
    pub helper_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            working_dir: None,
            user: None,
            total_timeout: None,
            cpu_limit: None,
            cpu_limit_addition: None,
            memory_limit: None,
            stdout_limit: None,
            stderr_limit: None,
            thread_count_limit: None,
            open_file_limit: None,
            file_size_limit: None,
            children_forbidden: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            launch_mode: LaunchMode::default(),
            helper_path: None,
        }
    }
}

impl SandboxConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(SandboxError::InvalidConfig(
                "Program cannot be empty".to_string(),
            ));
        }

        if self.user.as_deref() == Some("") {
            return Err(SandboxError::InvalidConfig(
                "User name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the resource watcher is needed
    pub fn watches_resources(&self) -> bool {
        self.cpu_limit.is_some() || self.memory_limit.is_some()
    }
}

/// Builder pattern for sandbox creation
pub struct SandboxBuilder {
    config: SandboxConfig,
    stdin: Box<dyn Read + Send>,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
    launcher: Option<Box<dyn ProcessLauncher>>,
    inspector: Option<Box<dyn ProcessTreeInspector>>,
}

impl SandboxBuilder {
    /// Create new builder for `program`
    pub fn new(program: &str) -> Self {
        Self::from_config(SandboxConfig {
            program: program.to_string(),
            ..Default::default()
        })
    }

    /// Start from a complete configuration
    pub fn from_config(config: SandboxConfig) -> Self {
        Self {
            config,
            stdin: Box::new(io::empty()),
            stdout: Box::new(io::sink()),
            stderr: Box::new(io::sink()),
            launcher: None,
            inspector: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.working_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn user(mut self, name: &str) -> Self {
        self.config.user = Some(name.to_string());
        self
    }

    /// Set wall-clock timeout
    pub fn total_timeout(mut self, duration: Duration) -> Self {
        self.config.total_timeout = Some(duration);
        self
    }

    pub fn cpu_limit(mut self, duration: Duration) -> Self {
        self.config.cpu_limit = Some(duration);
        self
    }

    pub fn cpu_limit_addition(mut self, duration: Duration) -> Self {
        self.config.cpu_limit_addition = Some(duration);
        self
    }

    /// Set memory limit in bytes
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.config.memory_limit = Some(bytes);
        self
    }

    pub fn stdout_limit(mut self, chars: u64) -> Self {
        self.config.stdout_limit = Some(chars);
        self
    }

    pub fn stderr_limit(mut self, chars: u64) -> Self {
        self.config.stderr_limit = Some(chars);
        self
    }

    pub fn thread_count_limit(mut self, count: u64) -> Self {
        self.config.thread_count_limit = Some(count);
        self
    }

    pub fn open_file_limit(mut self, count: u64) -> Self {
        self.config.open_file_limit = Some(count);
        self
    }

    pub fn file_size_limit(mut self, bytes: u64) -> Self {
        self.config.file_size_limit = Some(bytes);
        self
    }

    pub fn children_forbidden(mut self, forbidden: bool) -> Self {
        self.config.children_forbidden = forbidden;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn launch_mode(mut self, mode: LaunchMode) -> Self {
        self.config.launch_mode = mode;
        self
    }

    pub fn helper_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.helper_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Source copied into the child's stdin
    pub fn stdin(mut self, source: impl Read + Send + 'static) -> Self {
        self.stdin = Box::new(source);
        self
    }

    /// Sink receiving the child's stdout
    pub fn stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stdout = Box::new(sink);
        self
    }

    /// Sink receiving the child's stderr
    pub fn stderr(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stderr = Box::new(sink);
        self
    }

    /// Replace the launcher chosen from `launch_mode`
    pub fn launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Some(Box::new(launcher));
        self
    }

    /// Replace the platform process tree inspector
    pub fn inspector(mut self, inspector: impl ProcessTreeInspector + 'static) -> Self {
        self.inspector = Some(Box::new(inspector));
        self
    }

    /// Build sandbox
    pub fn build(mut self) -> Result<Sandbox> {
        self.config.validate()?;
        if self.config.poll_interval.is_zero() {
            self.config.poll_interval = DEFAULT_POLL_INTERVAL;
        }

        let launcher = match self.launcher {
            Some(launcher) => launcher,
            None => launcher_for(&self.config),
        };
        let inspector = self.inspector.unwrap_or_else(default_inspector);

        Ok(Sandbox::new(
            self.config,
            launcher,
            inspector,
            self.stdin,
            self.stdout,
            self.stderr,
        ))
    }
}

/// Lifecycle of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    NotStarted,
    Launching,
    Running,
    Terminated,
}

/// Resolves to the final exit code of a sandbox.
///
/// Clones share the same result.
#[derive(Clone)]
pub struct ExitCodeFuture {
    inner: SharedFuture<oneshot::Receiver<i32>>,
}

impl ExitCodeFuture {
    /// The exit code if already settled
    pub fn peek(&self) -> Option<i32> {
        self.inner.peek().map(|settled| settle_code(settled.clone()))
    }
}

/// A dropped sender means the supervisor went away without settling
fn settle_code(result: std::result::Result<i32, oneshot::Canceled>) -> i32 {
    result.unwrap_or(SpecialExitCode::UnexpectedError.code())
}

impl Future for ExitCodeFuture {
    type Output = i32;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        self.inner.poll_unpin(cx).map(settle_code)
    }
}

/// Active sandbox
pub struct Sandbox {
    shared: Arc<Shared>,
    launcher: Mutex<Option<Box<dyn ProcessLauncher>>>,
    result: Mutex<Option<ExitCodeFuture>>,
}

/// State reachable from the worker threads
struct Shared {
    config: SandboxConfig,
    inspector: Box<dyn ProcessTreeInspector>,
    /// Live child; cleared only inside `finish`, under this same lock
    child: Mutex<Option<Child>>,
    terminated: Arc<Flag>,
    finished: Latch,
    state: Mutex<SandboxState>,
    started_at: OnceLock<Instant>,
    elapsed: OnceLock<Duration>,
    cpu_time_ms: AtomicU64,
    memory_bytes: AtomicU64,
    self_completion: AtomicBool,
    had_children: AtomicBool,
    failure: Mutex<Option<Arc<SandboxError>>>,
    exit_code: OnceLock<i32>,
    settle: Mutex<Option<oneshot::Sender<i32>>>,
    feeder: StreamFeeder,
    stdout: StreamDrain,
    stderr: StreamDrain,
}

impl Sandbox {
    fn new(
        config: SandboxConfig,
        launcher: Box<dyn ProcessLauncher>,
        inspector: Box<dyn ProcessTreeInspector>,
        stdin: Box<dyn Read + Send>,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        let shared = Shared {
            feeder: StreamFeeder::new(stdin),
            stdout: StreamDrain::new("stdout", config.stdout_limit, sink_consumer(stdout)),
            stderr: StreamDrain::new("stderr", config.stderr_limit, sink_consumer(stderr)),
            config,
            inspector,
            child: Mutex::new(None),
            terminated: Arc::new(Flag::new()),
            finished: Latch::new(),
            state: Mutex::new(SandboxState::NotStarted),
            started_at: OnceLock::new(),
            elapsed: OnceLock::new(),
            cpu_time_ms: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
            self_completion: AtomicBool::new(false),
            had_children: AtomicBool::new(false),
            failure: Mutex::new(None),
            exit_code: OnceLock::new(),
            settle: Mutex::new(None),
        };

        Self {
            shared: Arc::new(shared),
            launcher: Mutex::new(Some(launcher)),
            result: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SandboxState {
        *lock(&self.shared.state)
    }

    /// Process id of the live child
    pub fn pid(&self) -> Option<u32> {
        lock(&self.shared.child).as_ref().map(Child::id)
    }

    /// Launch the child; the returned future settles to the exit code.
    ///
    /// Calling it again returns the same future without relaunching.
    pub fn start(&self) -> ExitCodeFuture {
        let (future, launcher) = {
            let mut result = lock(&self.result);
            if let Some(future) = result.as_ref() {
                return future.clone();
            }

            let (sender, receiver) = oneshot::channel();
            let future = ExitCodeFuture {
                inner: receiver.shared(),
            };
            *result = Some(future.clone());

            if let Some(code) = self.shared.exit_code.get() {
                // terminated before start
                let _ = sender.send(*code);
                return future;
            }
            *lock(&self.shared.settle) = Some(sender);
            (future, lock(&self.launcher).take())
        };

        let launched = panic::catch_unwind(AssertUnwindSafe(|| match launcher {
            Some(launcher) => self.shared.launch(launcher.as_ref()),
            None => Err(SandboxError::Unexpected("launcher already used".to_string())),
        }));

        let failure = match launched {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(SandboxError::Unexpected("panic while starting".to_string())),
        };
        if let Some(e) = failure {
            warn!("Sandbox start failed: {}", e);
            self.shared
                .finish(Some(SpecialExitCode::UnexpectedError.code()), Some(e));
        }

        future
    }

    /// Start and block until the exit code settles
    pub fn run(&self) -> SandboxStatistics {
        block_on(self.start());
        self.statistics()
    }

    /// Force termination with `code`; returns the settled exit code, which
    /// differs from `code` if another cause won
    pub fn terminate(&self, code: i32) -> i32 {
        self.shared.finish(Some(code), None)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.shared.exit_code.get().copied()
    }

    pub fn termination_cause(&self) -> Option<TerminationCause> {
        self.exit_code().map(TerminationCause::from_exit_code)
    }

    /// Wall-clock time since launch, frozen at termination
    pub fn elapsed(&self) -> Duration {
        self.shared.elapsed()
    }

    pub fn cpu_time(&self) -> Duration {
        Duration::from_millis(self.shared.cpu_time_ms.load(Ordering::SeqCst))
    }

    /// Highest memory usage observed, in bytes
    pub fn memory_usage(&self) -> u64 {
        self.shared.memory_bytes.load(Ordering::SeqCst)
    }

    pub fn stdout_length(&self) -> u64 {
        self.shared.stdout.output_length()
    }

    pub fn stdout_limit_exceeded(&self) -> bool {
        self.shared.stdout.limit_exceeded()
    }

    pub fn stderr_length(&self) -> u64 {
        self.shared.stderr.output_length()
    }

    pub fn stderr_limit_exceeded(&self) -> bool {
        self.shared.stderr.limit_exceeded()
    }

    pub fn self_completion(&self) -> bool {
        self.shared.self_completion.load(Ordering::SeqCst)
    }

    pub fn had_children(&self) -> bool {
        self.shared.had_children.load(Ordering::SeqCst)
    }

    pub fn failure_reason(&self) -> Option<Arc<SandboxError>> {
        lock(&self.shared.failure).clone()
    }

    pub fn statistics(&self) -> SandboxStatistics {
        SandboxStatistics {
            exit_code: self.exit_code(),
            elapsed_ms: millis(self.elapsed()),
            cpu_time_ms: millis(self.cpu_time()),
            memory_bytes: self.memory_usage(),
            stdout_length: self.stdout_length(),
            stdout_limit_exceeded: self.stdout_limit_exceeded(),
            stderr_length: self.stderr_length(),
            stderr_limit_exceeded: self.stderr_limit_exceeded(),
            self_completion: self.self_completion(),
            had_children: self.had_children(),
            failure_reason: self.failure_reason().map(|e| e.to_string()),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let started = lock(&self.result).is_some();
        if started && self.shared.exit_code.get().is_none() {
            self.shared.finish(
                Some(SpecialExitCode::UnexpectedError.code()),
                Some(SandboxError::Unexpected(
                    "sandbox dropped while running".to_string(),
                )),
            );
        }
    }
}

fn fault_hook(shared: Weak<Shared>, code: SpecialExitCode, stream: &'static str) -> FaultHook {
    Box::new(move |source| {
        if let Some(shared) = shared.upgrade() {
            shared.finish(
                Some(code.code()),
                Some(SandboxError::OutputRedirect { stream, source }),
            );
        }
    })
}

impl Shared {
    fn set_state(&self, next: SandboxState) {
        let mut state = lock(&self.state);
        if *state != SandboxState::Terminated {
            *state = next;
        }
    }

    fn elapsed(&self) -> Duration {
        if let Some(frozen) = self.elapsed.get() {
            return *frozen;
        }
        self.started_at
            .get()
            .map(Instant::elapsed)
            .unwrap_or(Duration::ZERO)
    }

    fn child_pid(&self) -> Option<i32> {
        lock(&self.child).as_ref().map(|child| child.id() as i32)
    }

    fn launch(self: &Arc<Self>, launcher: &dyn ProcessLauncher) -> Result<()> {
        self.set_state(SandboxState::Launching);

        let gate = Arc::new(Latch::new());
        let workers = if self.config.watches_resources() { 5 } else { 4 };
        let alive = Arc::new(Latch::with_count(workers));

        if let Err(e) = self.spawn_workers(&gate, &alive) {
            gate.open();
            return Err(e.into());
        }
        alive.wait();
        debug!("{} workers ready", workers);

        let mut child = match launcher.launch(&self.config) {
            Ok(child) => child,
            Err(e) => {
                warn!("Cannot start {}: {}", self.config.program, e);
                gate.open();
                self.finish(Some(SpecialExitCode::CannotStartProcess.code()), Some(e));
                return Ok(());
            }
        };

        let attached = self.attach_streams(&mut child);
        {
            let mut slot = lock(&self.child);
            if self.exit_code.get().is_some() {
                // terminated externally while launching
                drop(slot);
                self.inspector.terminate_tree(&mut child);
                let _ = child.wait();
                gate.open();
                return Ok(());
            }
            *slot = Some(child);
            let _ = self.started_at.set(Instant::now());
        }
        self.set_state(SandboxState::Running);
        gate.open();
        attached?;

        if self.config.children_forbidden {
            self.check_children();
        }
        Ok(())
    }

    fn spawn_workers(self: &Arc<Self>, gate: &Arc<Latch>, alive: &Arc<Latch>) -> io::Result<()> {
        let weak = Arc::downgrade(self);
        self.stdout.set_fault_hook(fault_hook(
            weak.clone(),
            SpecialExitCode::CannotRedirectStandardOutput,
            "output",
        ));
        self.stderr.set_fault_hook(fault_hook(
            weak,
            SpecialExitCode::CannotRedirectStandardError,
            "error",
        ));

        self.feeder
            .spawn(Arc::clone(gate), Arc::clone(alive), Arc::clone(&self.terminated))?;
        self.stdout.spawn(Arc::clone(gate), Arc::clone(alive))?;
        self.stderr.spawn(Arc::clone(gate), Arc::clone(alive))?;

        let (shared, worker_gate, worker_alive) =
            (Arc::clone(self), Arc::clone(gate), Arc::clone(alive));
        thread::Builder::new()
            .name("sandbox-completion".to_string())
            .spawn(move || shared.watch_completion(&worker_gate, &worker_alive))?;

        if self.config.watches_resources() {
            let (shared, worker_gate, worker_alive) =
                (Arc::clone(self), Arc::clone(gate), Arc::clone(alive));
            thread::Builder::new()
                .name("sandbox-resources".to_string())
                .spawn(move || shared.watch_resources(&worker_gate, &worker_alive))?;
        }

        Ok(())
    }

    fn attach_streams(&self, child: &mut Child) -> Result<()> {
        let missing = |stream: &str| {
            SandboxError::Unexpected(format!("child {} is not piped", stream))
        };

        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        self.feeder.attach(stdin)?;
        self.stdout.attach(stdout)?;
        self.stderr.attach(stderr)?;
        Ok(())
    }

    /// One-shot descendant check shortly after launch
    fn check_children(&self) {
        thread::sleep(CHILDREN_CHECK_DELAY);

        let Some(pid) = self.child_pid() else {
            return;
        };
        if self.inspector.has_children(pid) {
            info!("Child {} spawned descendants", pid);
            self.had_children.store(true, Ordering::SeqCst);
            self.finish(Some(SpecialExitCode::HadChildren.code()), None);
        }
    }

    /// Wait for exit plus both streams closing, raced against the timeout
    fn watch_completion(self: Arc<Self>, gate: &Latch, alive: &Latch) {
        alive.count_down();
        gate.wait();

        let Some(pid) = self.child_pid() else {
            return;
        };

        let exited = match self.spawn_exit_observer(pid) {
            Ok(exited) => exited,
            Err(e) => {
                self.finish(
                    Some(SpecialExitCode::UnexpectedError.code()),
                    Some(e.into()),
                );
                return;
            }
        };
        let signals = [exited, self.stdout.closed(), self.stderr.closed()];

        // a zero timeout is not enforced
        let completed = match self.config.total_timeout.filter(|timeout| !timeout.is_zero()) {
            Some(timeout) => {
                let started = self.started_at.get().copied().unwrap_or_else(Instant::now);
                let deadline = started + timeout;
                signals
                    .iter()
                    .all(|signal| signal.wait_timeout(deadline.saturating_duration_since(Instant::now())))
            }
            None => {
                signals.iter().for_each(|signal| signal.wait());
                true
            }
        };

        if completed {
            self.finish(None, None);
        } else {
            self.finish(Some(SpecialExitCode::TotalTimeout.code()), None);
        }
    }

    fn spawn_exit_observer(self: &Arc<Self>, pid: i32) -> io::Result<Arc<Latch>> {
        let exited = Arc::new(Latch::new());
        let signal = Arc::clone(&exited);
        let shared = Arc::clone(self);

        thread::Builder::new()
            .name("sandbox-exit".to_string())
            .spawn(move || {
                shared.wait_for_exit(pid);
                signal.open();
            })?;
        Ok(exited)
    }

    /// Block until `pid` exits, leaving it unreaped
    #[cfg(target_os = "linux")]
    fn wait_for_exit(&self, pid: i32) {
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let ret = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if ret == 0 {
                return;
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                debug!("waitid({}) failed: {}", pid, err);
                return;
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn wait_for_exit(&self, _pid: i32) {
        loop {
            {
                let mut slot = lock(&self.child);
                match slot.as_mut().map(Child::try_wait) {
                    Some(Ok(None)) => {}
                    _ => return,
                }
            }
            if self.finished.wait_timeout(EXIT_POLL_INTERVAL) {
                return;
            }
        }
    }

    fn watch_resources(self: Arc<Self>, gate: &Latch, alive: &Latch) {
        raise_thread_priority();
        alive.count_down();
        gate.wait();

        let Some(pid) = self.child_pid() else {
            return;
        };

        while !self.terminated.is_raised() {
            if !self.sample_usage(pid) {
                break;
            }
            if let Some(breach) = self.limit_breach() {
                info!("Child {} hit {}", pid, breach);
                self.finish(Some(breach.code()), None);
                break;
            }
            if self.finished.wait_timeout(self.config.poll_interval) {
                break;
            }
        }
    }

    /// Record one usage sample; memory only ever grows
    fn sample_usage(&self, pid: i32) -> bool {
        match ResourceUsage::sample(pid) {
            Ok(usage) => {
                self.cpu_time_ms
                    .store(millis(usage.cpu_time), Ordering::SeqCst);
                self.memory_bytes
                    .fetch_max(usage.memory_bytes, Ordering::SeqCst);
                true
            }
            Err(e) => {
                debug!("Usage sample failed: {}", e);
                false
            }
        }
    }

    fn limit_breach(&self) -> Option<SpecialExitCode> {
        if let Some(limit) = self.config.cpu_limit {
            if self.cpu_time_ms.load(Ordering::SeqCst) >= millis(limit) {
                return Some(SpecialExitCode::CpuLimit);
            }
        }
        if let Some(limit) = self.config.memory_limit {
            if self.memory_bytes.load(Ordering::SeqCst) >= limit {
                return Some(SpecialExitCode::MemoryLimit);
            }
        }
        None
    }

    /// The termination routine.
    ///
    /// `requested` of `None` means the child completed on its own and its
    /// translated exit status becomes the result. Only the first call has
    /// any effect.
    fn finish(&self, requested: Option<i32>, reason: Option<SandboxError>) -> i32 {
        let mut slot = lock(&self.child);
        if let Some(code) = self.exit_code.get() {
            return *code;
        }

        self.terminated.raise();
        let _ = self.elapsed.set(self.elapsed());
        if let Some(reason) = reason {
            *lock(&self.failure) = Some(Arc::new(reason));
        }

        self.feeder.dispose();
        let stdout = self.stdout.dispose();
        let stderr = self.stderr.dispose();

        let mut code = requested;
        if let Some(mut child) = slot.take() {
            let pid = child.id() as i32;
            self.sample_usage(pid);

            let completed = requested.is_none();
            self.self_completion.store(completed, Ordering::SeqCst);
            if self.inspector.terminate_tree(&mut child) {
                self.had_children.store(true, Ordering::SeqCst);
            }

            match child.wait() {
                Ok(status) if completed => {
                    code = Some(translate_exit_code(raw_exit_code(status)));
                }
                Ok(_) => {}
                Err(e) => warn!("Cannot reap child {}: {}", pid, e),
            }
        }

        let code = code.unwrap_or(SpecialExitCode::UnexpectedError.code());
        let _ = self.exit_code.set(code);
        self.set_state_terminated();
        self.finished.open();

        info!(
            "Sandbox finished with {:?} after {:?} (stdout {} chars, stderr {} chars)",
            TerminationCause::from_exit_code(code),
            self.elapsed(),
            stdout.length,
            stderr.length
        );

        if let Some(sender) = lock(&self.settle).take() {
            let _ = sender.send(code);
        }
        code
    }

    fn set_state_terminated(&self) {
        *lock(&self.state) = SandboxState::Terminated;
    }
}
