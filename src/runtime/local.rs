//! In-process dispatch runtime
//!
//! A small runtime that implements [`DispatchRuntime`] with:
//! - One registry (handlers, queues, ready lists) behind a single mutex
//! - Strict priority service: HIGH before NORMAL before LOW, FIFO within a class
//! - Atomic queues leave the ready list while one of their events is in flight
//! - One dispatch thread per core, optionally pinned to a CPU
//!
//! Callbacks always run with the registry unlocked so they can re-enter the
//! runtime (send, alloc, remove queues).

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::clock::{CycleSource, Tsc};
use super::pool::{Event, EventPool};
use super::{
    DispatchRuntime, Handler, HandlerId, HandlerState, PoolId, Priority, QueueGroup, QueueId,
    QueueKind, SendError,
};
use crate::utils::{BenchError, RuntimeError};

thread_local! {
    static CURRENT_CORE: Cell<usize> = const { Cell::new(0) };
}

struct QueueSlot {
    name: String,
    kind: QueueKind,
    priority: Priority,
    handler: Option<HandlerId>,
    enabled: bool,
    events: VecDeque<Event>,
    in_flight: usize,
    /// Present in a ready list
    ready: bool,
}

impl QueueSlot {
    fn schedulable(&self) -> bool {
        self.enabled
            && !self.ready
            && !self.events.is_empty()
            && (self.kind == QueueKind::Parallel || self.in_flight == 0)
    }
}

struct HandlerSlot {
    name: String,
    handler: Arc<dyn Handler>,
    state: HandlerState,
    queues: Vec<QueueId>,
}

#[derive(Default)]
struct Registry {
    queues: HashMap<QueueId, QueueSlot>,
    handlers: HashMap<HandlerId, HandlerSlot>,
    ready: [VecDeque<QueueId>; 3],
    next_queue: u32,
    next_handler: u32,
}

impl Registry {
    fn mark_ready(&mut self, queue: QueueId) {
        if let Some(slot) = self.queues.get_mut(&queue) {
            if slot.schedulable() {
                slot.ready = true;
                self.ready[slot.priority.slot()].push_back(queue);
            }
        }
    }

    /// Pop the most urgent queue that can hand out an event
    fn next_dispatch(&mut self) -> Option<(QueueId, Event, Arc<dyn Handler>)> {
        for priority in Priority::BY_URGENCY {
            while let Some(queue) = self.ready[priority.slot()].pop_front() {
                let Some(slot) = self.queues.get_mut(&queue) else {
                    continue;
                };
                slot.ready = false;
                if !slot.enabled {
                    continue;
                }
                let Some(owner) = slot.handler.and_then(|h| self.handlers.get(&h)) else {
                    continue;
                };
                let Some(event) = slot.events.pop_front() else {
                    continue;
                };
                let handler = Arc::clone(&owner.handler);

                slot.in_flight += 1;
                self.mark_ready(queue);
                return Some((queue, event, handler));
            }
        }
        None
    }

    fn queues_in_flight(&self, queues: &[QueueId]) -> usize {
        queues
            .iter()
            .filter_map(|q| self.queues.get(q))
            .map(|slot| slot.in_flight)
            .sum()
    }
}

/// Snapshot of runtime bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub handlers: usize,
    pub queues: usize,
    pub queued_events: usize,
    pub live_events: usize,
    pub dispatched: u64,
}

/// Builder for [`LocalRuntime`]
pub struct LocalRuntimeBuilder {
    cores: usize,
    clock: Option<Arc<dyn CycleSource>>,
    pool_capacity: Option<usize>,
}

impl LocalRuntimeBuilder {
    /// Cycle source (defaults to the calibrated TSC)
    pub fn clock(mut self, clock: Arc<dyn CycleSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Cap on live events in the default pool
    pub fn pool_capacity(mut self, capacity: Option<usize>) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn build(self) -> LocalRuntime {
        let pool = match self.pool_capacity {
            Some(capacity) => EventPool::with_capacity(capacity),
            None => EventPool::unbounded(),
        };
        LocalRuntime {
            registry: Mutex::new(Registry::default()),
            pool,
            clock: self.clock.unwrap_or_else(|| Arc::new(Tsc::shared())),
            cores: self.cores.max(1),
            stop: AtomicBool::new(false),
            fatal: Mutex::new(None),
            dispatched: AtomicU64::new(0),
        }
    }
}

/// In-process multi-core dispatch runtime
pub struct LocalRuntime {
    registry: Mutex<Registry>,
    pool: EventPool,
    clock: Arc<dyn CycleSource>,
    cores: usize,
    stop: AtomicBool,
    fatal: Mutex<Option<BenchError>>,
    dispatched: AtomicU64,
}

impl LocalRuntime {
    pub fn builder(cores: usize) -> LocalRuntimeBuilder {
        LocalRuntimeBuilder {
            cores,
            clock: None,
            pool_capacity: None,
        }
    }

    /// Run one receive callback on behalf of `core`
    ///
    /// Returns `Ok(false)` when no queue had work. A callback error is
    /// returned as a fatal dispatch error for that core.
    pub fn dispatch_one(&self, core: usize) -> Result<bool, BenchError> {
        let Some((queue, event, handler)) = self.registry.lock().next_dispatch() else {
            return Ok(false);
        };

        CURRENT_CORE.with(|c| c.set(core));
        let outcome = handler.on_receive(self, event, queue);
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        {
            let mut reg = self.registry.lock();
            if let Some(slot) = reg.queues.get_mut(&queue) {
                slot.in_flight -= 1;
            }
            reg.mark_ready(queue);
        }

        outcome
            .map(|()| true)
            .map_err(|source| BenchError::Dispatch { core, source })
    }

    /// Dispatch until no queue has work or `limit` callbacks ran
    pub fn run_until_idle(&self, core: usize, limit: usize) -> Result<usize, BenchError> {
        let mut count = 0;
        while count < limit && self.dispatch_one(core)? {
            count += 1;
        }
        Ok(count)
    }

    /// Start one dispatch loop per core
    ///
    /// Each loop runs until [`LocalRuntime::stop`] is called or a callback
    /// fails; the first failure is kept for [`LocalRuntime::take_fatal`].
    pub fn spawn_dispatchers(self: &Arc<Self>, pin_cores: bool) -> std::io::Result<Vec<JoinHandle<()>>> {
        let core_ids = if pin_cores {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut handles = Vec::with_capacity(self.cores);
        for core in 0..self.cores {
            let rt = Arc::clone(self);
            let pin = core_ids.get(core).copied();
            if pin_cores && pin.is_none() {
                warn!("No CPU available to pin dispatch core {}", core);
            }

            let handle = thread::Builder::new()
                .name(format!("dispatch-{}", core))
                .spawn(move || {
                    if let Some(id) = pin {
                        if !core_affinity::set_for_current(id) {
                            warn!("Failed to pin dispatch core {} to CPU {}", core, id.id);
                        }
                    }
                    rt.dispatch_loop(core);
                })?;
            handles.push(handle);
        }
        Ok(handles)
    }

    fn dispatch_loop(&self, core: usize) {
        CURRENT_CORE.with(|c| c.set(core));
        debug!("Dispatch loop started on core {}", core);

        while !self.stop.load(Ordering::Relaxed) {
            match self.dispatch_one(core) {
                Ok(true) => {}
                Ok(false) => thread::yield_now(),
                Err(e) => {
                    error!("{}", e);
                    self.fatal.lock().get_or_insert(e);
                    self.stop.store(true, Ordering::SeqCst);
                }
            }
        }
        debug!("Dispatch loop stopped on core {}", core);
    }

    /// Ask every dispatch loop to exit after its current callback
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// First fatal callback error observed by a dispatch loop
    pub fn take_fatal(&self) -> Option<BenchError> {
        self.fatal.lock().take()
    }

    pub fn pool(&self) -> &EventPool {
        &self.pool
    }

    pub fn stats(&self) -> RuntimeStats {
        let reg = self.registry.lock();
        RuntimeStats {
            handlers: reg.handlers.len(),
            queues: reg.queues.len(),
            queued_events: reg.queues.values().map(|q| q.events.len()).sum(),
            live_events: self.pool.live(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }

    /// Events currently held by a queue
    pub fn queue_depth(&self, queue: QueueId) -> Option<usize> {
        self.registry.lock().queues.get(&queue).map(|q| q.events.len())
    }

    pub fn queue_priority(&self, queue: QueueId) -> Option<Priority> {
        self.registry.lock().queues.get(&queue).map(|q| q.priority)
    }
}

impl DispatchRuntime for LocalRuntime {
    fn handler_create(&self, name: &str, handler: Arc<dyn Handler>) -> Result<HandlerId, RuntimeError> {
        let mut reg = self.registry.lock();
        let id = HandlerId(reg.next_handler);
        reg.next_handler += 1;
        reg.handlers.insert(
            id,
            HandlerSlot {
                name: name.to_string(),
                handler,
                state: HandlerState::Created,
                queues: Vec::new(),
            },
        );
        Ok(id)
    }

    fn handler_add_queue(&self, handler: HandlerId, queue: QueueId) -> Result<(), RuntimeError> {
        let mut reg = self.registry.lock();
        let running = match reg.handlers.get(&handler) {
            Some(slot) => slot.state == HandlerState::Running,
            None => return Err(RuntimeError::UnknownHandler(handler)),
        };

        let slot = reg
            .queues
            .get_mut(&queue)
            .ok_or(RuntimeError::UnknownQueue(queue))?;
        if let Some(owner) = slot.handler {
            return Err(RuntimeError::QueueBound { queue, handler: owner });
        }
        slot.handler = Some(handler);
        slot.enabled = running;

        if let Some(h) = reg.handlers.get_mut(&handler) {
            h.queues.push(queue);
        }
        reg.mark_ready(queue);
        Ok(())
    }

    fn handler_start(&self, handler: HandlerId) -> Result<(), RuntimeError> {
        let callbacks = {
            let reg = self.registry.lock();
            let slot = reg
                .handlers
                .get(&handler)
                .ok_or(RuntimeError::UnknownHandler(handler))?;
            if slot.state == HandlerState::Running {
                return Err(RuntimeError::InvalidState {
                    handler,
                    state: slot.state,
                    expected: HandlerState::Created,
                });
            }
            Arc::clone(&slot.handler)
        };

        callbacks.on_start(self, handler)?;

        let mut reg = self.registry.lock();
        let queues = match reg.handlers.get_mut(&handler) {
            Some(slot) => {
                slot.state = HandlerState::Running;
                slot.queues.clone()
            }
            None => return Err(RuntimeError::UnknownHandler(handler)),
        };
        for queue in queues {
            if let Some(slot) = reg.queues.get_mut(&queue) {
                slot.enabled = true;
            }
            reg.mark_ready(queue);
        }
        Ok(())
    }

    fn handler_stop(&self, handler: HandlerId) -> Result<(), RuntimeError> {
        let (callbacks, queues) = {
            let mut reg = self.registry.lock();
            let slot = reg
                .handlers
                .get_mut(&handler)
                .ok_or(RuntimeError::UnknownHandler(handler))?;
            if slot.state != HandlerState::Running {
                return Err(RuntimeError::InvalidState {
                    handler,
                    state: slot.state,
                    expected: HandlerState::Running,
                });
            }
            slot.state = HandlerState::Stopped;
            let queues = slot.queues.clone();
            let callbacks = Arc::clone(&slot.handler);
            for queue in &queues {
                if let Some(q) = reg.queues.get_mut(queue) {
                    q.enabled = false;
                }
            }
            (callbacks, queues)
        };

        // Wait out receives already running on other cores
        while self.registry.lock().queues_in_flight(&queues) > 0 {
            thread::yield_now();
        }

        callbacks.on_stop(self, handler)
    }

    fn handler_remove_all_queues(&self, handler: HandlerId, delete_queues: bool) -> Result<(), RuntimeError> {
        let mut reg = self.registry.lock();
        let queues = match reg.handlers.get_mut(&handler) {
            Some(slot) => std::mem::take(&mut slot.queues),
            None => return Err(RuntimeError::UnknownHandler(handler)),
        };

        for queue in queues {
            if delete_queues {
                if let Some(slot) = reg.queues.remove(&queue) {
                    debug!(
                        "Deleted queue {} '{}' ({} events released)",
                        queue,
                        slot.name,
                        slot.events.len()
                    );
                }
            } else if let Some(slot) = reg.queues.get_mut(&queue) {
                slot.handler = None;
                slot.enabled = false;
            }
        }
        Ok(())
    }

    fn handler_delete(&self, handler: HandlerId) -> Result<(), RuntimeError> {
        let mut reg = self.registry.lock();
        let slot = reg
            .handlers
            .get(&handler)
            .ok_or(RuntimeError::UnknownHandler(handler))?;
        if slot.state == HandlerState::Running {
            return Err(RuntimeError::InvalidState {
                handler,
                state: slot.state,
                expected: HandlerState::Stopped,
            });
        }

        if let Some(slot) = reg.handlers.remove(&handler) {
            debug!("Deleted handler {} '{}'", handler, slot.name);
            for queue in slot.queues {
                if let Some(q) = reg.queues.get_mut(&queue) {
                    q.handler = None;
                    q.enabled = false;
                }
            }
        }
        Ok(())
    }

    fn queue_create(
        &self,
        name: &str,
        kind: QueueKind,
        priority: Priority,
        group: QueueGroup,
    ) -> Result<QueueId, RuntimeError> {
        let mut reg = self.registry.lock();
        let id = QueueId(reg.next_queue);
        reg.next_queue += 1;
        debug!("Created {:?} queue {} '{}' prio {} in {}", kind, id, name, priority, group);
        reg.queues.insert(
            id,
            QueueSlot {
                name: name.to_string(),
                kind,
                priority,
                handler: None,
                enabled: false,
                events: VecDeque::new(),
                in_flight: 0,
                ready: false,
            },
        );
        Ok(id)
    }

    fn alloc(&self, size: usize, pool: PoolId) -> Result<Event, RuntimeError> {
        if pool != PoolId::DEFAULT {
            return Err(RuntimeError::UnknownPool(pool));
        }
        self.pool.alloc(size)
    }

    fn send(&self, event: Event, queue: QueueId) -> Result<(), SendError> {
        let mut reg = self.registry.lock();
        let Some(slot) = reg.queues.get_mut(&queue) else {
            return Err(SendError {
                event,
                reason: RuntimeError::UnknownQueue(queue),
            });
        };
        if !slot.enabled {
            return Err(SendError {
                event,
                reason: RuntimeError::QueueDisabled(queue),
            });
        }
        slot.events.push_back(event);
        reg.mark_ready(queue);
        Ok(())
    }

    fn free(&self, event: Event) {
        drop(event);
    }

    fn core_id(&self) -> usize {
        CURRENT_CORE.with(|c| c.get())
    }

    fn core_count(&self) -> usize {
        self.cores
    }

    fn core_hz(&self) -> u64 {
        self.clock.hz()
    }

    fn cycles(&self) -> u64 {
        self.clock.cycles()
    }
}
