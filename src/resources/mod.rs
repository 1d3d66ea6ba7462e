//! Kernel resource limits applied before exec

pub mod rlimit;

pub use rlimit::RlimitConfig;
