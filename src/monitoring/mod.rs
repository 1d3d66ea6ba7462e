//! Process monitoring via /proc
//!
//! - `stat`: tolerant parser for `/proc/<pid>/stat` identity fields
//! - `tree`: descendant detection and process-group termination
//! - `usage`: CPU time and memory sampling

pub mod stat;
pub mod tree;
pub mod usage;

pub use stat::StatRecord;
pub use tree::{default_inspector, ProcessTreeInspector, ProcfsInspector, SignalOnlyInspector};
pub use usage::ResourceUsage;
