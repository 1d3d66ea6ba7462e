//! process-sandbox: supervise an untrusted child process
//!
//! Runs one child under CPU time, memory, output volume, wall-clock and
//! descendant-process limits, reports usage statistics and a semantic
//! termination cause. Limits are enforced by polling `/proc`; on Linux the
//! `sandbox-exec` helper additionally installs kernel rlimits as a backstop.
//!
//! # Modules
//!
//! - **execution**: Launch strategies, stdin feeder and output drains
//! - **monitoring**: `/proc` stat parsing, process tree inspection, usage sampling
//! - **resources**: setrlimit limits applied by the helper
//! - **exit_code**: Special exit codes and raw status translation
//! - **report**: Statistics snapshot and result files
//! - **controller**: Main sandbox orchestration
//!
//! # Example
//!
//! ```ignore
//! use process_sandbox::SandboxBuilder;
//! use std::time::Duration;
//!
//! let sandbox = SandboxBuilder::new("/bin/echo")
//!     .arg("hello world")
//!     .cpu_limit(Duration::from_secs(1))
//!     .total_timeout(Duration::from_secs(5))
//!     .stdout(std::io::stdout())
//!     .build()?;
//!
//! let stats = sandbox.run();
//! println!("Exit code: {:?}", stats.exit_code);
//! ```

// Core modules
pub mod errors;
pub mod exit_code;

// Layered modules
pub mod execution;
pub mod monitoring;
pub mod resources;

// Main controller
pub mod controller;
pub mod report;

// Public API
pub use controller::{ExitCodeFuture, Sandbox, SandboxBuilder, SandboxConfig, SandboxState};
pub use errors::{Result, SandboxError};
pub use execution::{LaunchMode, ProcessLauncher};
pub use exit_code::{SpecialExitCode, TerminationCause};
pub use monitoring::{ProcessTreeInspector, StatRecord};
pub use report::{ReportFormat, SandboxStatistics};
pub use resources::RlimitConfig;
