//! Error types for pairs-bench

use std::io;
use thiserror::Error;

use crate::runtime::{HandlerId, HandlerState, PoolId, QueueId};

/// Top-level application error
///
/// Every variant except `Config` is fatal to the run: a partially built or
/// partially forwarding population produces meaningless numbers.
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Setup failed at {stage} (index {index}): {source}")]
    Setup {
        stage: SetupStage,
        index: usize,
        source: RuntimeError,
    },

    #[error("Teardown of handler {handler} failed: {source}")]
    Teardown {
        handler: HandlerId,
        source: RuntimeError,
    },

    #[error("Dispatch on core {core} failed: {source}")]
    Dispatch { core: usize, source: RuntimeError },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Population build step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    QueueCreate,
    HandlerCreate,
    AddQueue,
    HandlerStart,
    EventAlloc,
    EventSend,
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetupStage::QueueCreate => "queue create",
            SetupStage::HandlerCreate => "handler create",
            SetupStage::AddQueue => "handler add queue",
            SetupStage::HandlerStart => "handler start",
            SetupStage::EventAlloc => "event alloc",
            SetupStage::EventSend => "event send",
        };
        f.write_str(s)
    }
}

/// Errors reported by a dispatch runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unknown queue {0}")]
    UnknownQueue(QueueId),

    #[error("Unknown handler {0}")]
    UnknownHandler(HandlerId),

    #[error("Unknown event pool {0}")]
    UnknownPool(PoolId),

    #[error("Handler {handler} is {state:?}, expected {expected:?}")]
    InvalidState {
        handler: HandlerId,
        state: HandlerState,
        expected: HandlerState,
    },

    #[error("Queue {queue} already bound to handler {handler}")]
    QueueBound { queue: QueueId, handler: HandlerId },

    #[error("Queue {0} is not enabled")]
    QueueDisabled(QueueId),

    #[error("Event pool exhausted: {live} live events (capacity {capacity})")]
    PoolExhausted { live: usize, capacity: usize },

    #[error("Event payload too small: {size} bytes, need {needed}")]
    PayloadTooSmall { size: usize, needed: usize },
}

pub type Result<T> = std::result::Result<T, BenchError>;
