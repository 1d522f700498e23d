//! Configuration module

pub mod benchmark_config;
pub mod cli;

pub use benchmark_config::{BenchConfig, EventOptions};
pub use cli::{CliArgs, OutputFormat, PrintScope};
