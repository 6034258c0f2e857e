//! Process spawning with streaming, decoded output.
//!
//! Spawning itself is a thin wrapper over `std::process`; captured pipes are
//! handed to the [`stream`](crate::stream) pipeline for decoding.

mod spawn;

pub use spawn::{run, spawn, OutputLines, ProcessOptions, ProcessOutput, ProcessResult, SpawnedProcess};
