//! Measurement reporting
//!
//! This module provides:
//! - Per-window throughput figures with cycle-counter wraparound handling
//! - Text/JSON/CSV window lines with print scoping
//! - Run summary (cycles/event distribution) and JSON export

pub mod reporter;
pub mod window;

pub use reporter::{CoreSummary, RunSummary, WindowReporter};
pub use window::{elapsed_cycles, WindowReport};
