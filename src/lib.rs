//! pairs-bench library
//!
//! Ping-pong pairs throughput benchmark for queue-based event dispatch
//! runtimes with strict-priority scheduling.

pub mod benchmark;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod utils;
pub mod workload;
