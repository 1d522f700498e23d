//! Event dispatch runtime interface
//!
//! The benchmark drives a queue-based, priority-aware dispatch runtime through
//! the narrow [`DispatchRuntime`] capability set:
//! - Handler lifecycle: create / add queue / start / stop / remove queues / delete
//! - Queue lifecycle: create with a scheduling discipline and priority
//! - Event lifecycle: alloc / payload access / send / free
//! - Core queries: current core, core count, cycle counter and its frequency
//!
//! [`LocalRuntime`] is a small in-process implementation used by the binary
//! and the tests.

pub mod clock;
pub mod local;
pub mod pool;

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::Serialize;

use crate::utils::RuntimeError;

pub use clock::{rdtsc, CycleSource, StepClock, Tsc};
pub use local::{LocalRuntime, LocalRuntimeBuilder, RuntimeStats};
pub use pool::{Event, EventPool};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{:#x}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Queue handle
    QueueId,
    "Q"
);
handle_type!(
    /// Handler (execution object) handle
    HandlerId,
    "EO"
);
handle_type!(
    /// Event pool handle
    PoolId,
    "P"
);
handle_type!(
    /// Queue group handle
    QueueGroup,
    "QG"
);

impl PoolId {
    pub const DEFAULT: PoolId = PoolId(0);
}

impl QueueGroup {
    pub const DEFAULT: QueueGroup = QueueGroup(0);
}

/// Queue scheduling priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Service order of a strict-priority scheduler
    pub const BY_URGENCY: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue scheduling discipline
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// At most one event of the queue in flight at a time
    #[default]
    Atomic,
    /// Events of the queue may be processed concurrently
    Parallel,
}

/// Handler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Created,
    Running,
    Stopped,
}

/// Failed send: the event is handed back to the caller, who still owns it
#[derive(Debug)]
pub struct SendError {
    pub event: Event,
    pub reason: RuntimeError,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.reason)
    }
}

impl std::error::Error for SendError {}

/// Per-handler callbacks invoked by the runtime
///
/// One registered handler serves every queue added to it. `on_receive` owns
/// the event for the duration of the call and must either send or free it.
pub trait Handler: Send + Sync {
    fn on_start(&self, _rt: &dyn DispatchRuntime, _handler: HandlerId) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn on_stop(&self, rt: &dyn DispatchRuntime, handler: HandlerId) -> Result<(), RuntimeError>;

    fn on_receive(
        &self,
        rt: &dyn DispatchRuntime,
        event: Event,
        queue: QueueId,
    ) -> Result<(), RuntimeError>;
}

/// Capability set consumed from the dispatch runtime
///
/// All methods must be safe to call concurrently from every dispatch core.
pub trait DispatchRuntime: Send + Sync {
    fn handler_create(&self, name: &str, handler: Arc<dyn Handler>) -> Result<HandlerId, RuntimeError>;

    fn handler_add_queue(&self, handler: HandlerId, queue: QueueId) -> Result<(), RuntimeError>;

    /// Start a handler; returns once `on_start` has completed and its queues
    /// are eligible for scheduling.
    fn handler_start(&self, handler: HandlerId) -> Result<(), RuntimeError>;

    /// Stop a handler; returns once no event of its queues is in flight and
    /// `on_stop` has completed.
    fn handler_stop(&self, handler: HandlerId) -> Result<(), RuntimeError>;

    /// Detach every queue from a handler, optionally deleting the queues and
    /// releasing the events they still hold.
    fn handler_remove_all_queues(&self, handler: HandlerId, delete_queues: bool) -> Result<(), RuntimeError>;

    fn handler_delete(&self, handler: HandlerId) -> Result<(), RuntimeError>;

    fn queue_create(
        &self,
        name: &str,
        kind: QueueKind,
        priority: Priority,
        group: QueueGroup,
    ) -> Result<QueueId, RuntimeError>;

    fn alloc(&self, size: usize, pool: PoolId) -> Result<Event, RuntimeError>;

    fn send(&self, event: Event, queue: QueueId) -> Result<(), SendError>;

    fn free(&self, event: Event);

    /// Index of the core executing the caller, in `[0, core_count())`
    fn core_id(&self) -> usize;

    fn core_count(&self) -> usize;

    /// Frequency of the cycle counter returned by `cycles()`
    fn core_hz(&self) -> u64;

    fn cycles(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_urgency_order() {
        assert_eq!(Priority::BY_URGENCY[0], Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(QueueId(0x1f).to_string(), "Q0x1f");
        assert_eq!(HandlerId(2).to_string(), "EO0x2");
    }
}
