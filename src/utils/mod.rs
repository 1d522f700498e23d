//! Utility modules

pub mod cache_padded;
pub mod error;

pub use cache_padded::{CachePadded, CACHE_LINE_SIZE};
pub use error::{BenchError, Result, RuntimeError, SetupStage};
