//! Ping-pong workload definition
//!
//! This module provides:
//! - Priority assignment of pairs to scheduling classes
//! - The fixed-size event payload exchanged inside each pair

pub mod payload;
pub mod priority;

pub use payload::{PerfEvent, DATA_SIZE, EVENT_SIZE};
pub use priority::{priority_of, PriorityMix};
