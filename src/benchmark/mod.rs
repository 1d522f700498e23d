//! Benchmark core
//!
//! This module provides the ping-pong pairs benchmark:
//! - MeasurementStation: per-core cycle-based measurement windows
//! - HarnessShared: state shared by every handler (exit flag, station, reporter)
//! - PairHandler: receive/forward callback of one half of a pair
//! - Population: build and teardown of all pairs
//! - Orchestrator: run lifecycle and result collection

pub mod orchestrator;
pub mod pair;
pub mod population;
pub mod shared;
pub mod station;

pub use orchestrator::{format_count, Orchestrator};
pub use pair::{PairHandler, Side};
pub use population::{Pair, PairMember, Population};
pub use shared::HarnessShared;
pub use station::{CoreStat, MeasurementStation, WindowSnapshot};
