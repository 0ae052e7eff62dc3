// src/target/kinds/mod.rs

//! Built-in target kinds.

pub mod group;
pub mod live_sync;
pub mod local_exec;
pub mod local_file;
