// src/supervisor/mod.rs

//! The entrypoint that runs inside a live-synced workload.

pub mod apply;
pub mod log_sink;
pub mod process;

pub use apply::{ApplySummary, ChangeApplier};
pub use log_sink::{LogShipper, LogStream};
pub use process::{StopHandle, Supervisor, SupervisorOptions, terminate_process_group};
