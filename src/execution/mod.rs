//! Execution layer: launching the child and moving its standard streams
//!
//! # Features
//!
//! - **Launch strategies**: direct spawn, or through the rlimit helper
//! - **Stream feeder**: copies the input source into the child's stdin
//! - **Stream drains**: bounded, cancelable readers for stdout and stderr
//! - **Readiness gate**: workers block until the launch attempt settles

pub mod launcher;
pub mod stream;
pub mod sync;

pub use launcher::{
    launcher_for, DirectLauncher, LaunchMode, ProcessLauncher, ResolvedLaunchMode,
    RlimitLauncher,
};
pub use stream::{OutputConsumer, OutputCounters, OutputSnapshot, StreamDrain, StreamFeeder};
pub use sync::{Flag, Latch};
