//! Pair population build and teardown
//!
//! Build order per pair:
//! 1. Create queue A and queue B with the pair's priority class
//! 2. Create, bind and start handler A, then handler B
//! 3. Seed both queues
//!
//! Handlers are started before any event is sent so no event can land in a
//! queue whose handler is not yet running. Any failure aborts the build.

use std::sync::Arc;

use tracing::{debug, info};

use super::pair::{PairHandler, Side};
use super::shared::HarnessShared;
use crate::runtime::{
    DispatchRuntime, HandlerId, PoolId, Priority, QueueGroup, QueueId, QueueKind, SendError,
};
use crate::utils::{BenchError, Result, RuntimeError, SetupStage};
use crate::workload::{priority_of, PerfEvent, PriorityMix, EVENT_SIZE};

/// One handler of a pair and the queue it serves
pub struct PairMember {
    pub handler: HandlerId,
    pub queue: QueueId,
    pub context: Arc<PairHandler>,
}

/// Handles of one built pair
pub struct Pair {
    pub index: usize,
    pub priority: Priority,
    pub a: PairMember,
    pub b: PairMember,
}

/// Every pair created for a run
pub struct Population {
    pairs: Vec<Pair>,
    events_per_queue: u32,
}

fn setup_error(stage: SetupStage, index: usize) -> impl FnOnce(RuntimeError) -> BenchError {
    move |source| BenchError::Setup {
        stage,
        index,
        source,
    }
}

impl Population {
    /// Create `pair_count` pairs and seed `events_per_queue` events into every queue
    pub fn build(
        rt: &dyn DispatchRuntime,
        shared: &Arc<HarnessShared>,
        pair_count: usize,
        events_per_queue: u32,
        kind: QueueKind,
    ) -> Result<Self> {
        let mut pairs = Vec::with_capacity(pair_count);

        for index in 0..pair_count {
            let priority = priority_of(index);

            let queue_a = rt
                .queue_create(Side::A.queue_name(), kind, priority, QueueGroup::DEFAULT)
                .map_err(setup_error(SetupStage::QueueCreate, index))?;
            let queue_b = rt
                .queue_create(Side::B.queue_name(), kind, priority, QueueGroup::DEFAULT)
                .map_err(setup_error(SetupStage::QueueCreate, index))?;

            let a = Self::start_member(rt, shared, Side::A, queue_a, queue_b, 0, index)?;
            let b = Self::start_member(rt, shared, Side::B, queue_b, queue_a, events_per_queue, index)?;

            Self::seed(rt, shared.pool, index, queue_a, queue_b, events_per_queue)?;

            debug!(
                "Pair {}: {} {}/{} <-> {} {}/{} prio {}",
                index, a.handler, Side::A, queue_a, b.handler, Side::B, queue_b, priority
            );
            pairs.push(Pair {
                index,
                priority,
                a,
                b,
            });
        }

        let population = Self {
            pairs,
            events_per_queue,
        };
        info!(
            "Built {} pairs: {} handlers, {} queues, {} events ({})",
            population.pairs.len(),
            population.handler_count(),
            population.queue_count(),
            population.seeded_events(),
            population.priority_mix()
        );
        Ok(population)
    }

    fn start_member(
        rt: &dyn DispatchRuntime,
        shared: &Arc<HarnessShared>,
        side: Side,
        own_queue: QueueId,
        peer_queue: QueueId,
        first_seq: u32,
        index: usize,
    ) -> Result<PairMember> {
        let context = Arc::new(PairHandler::new(
            side,
            own_queue,
            peer_queue,
            first_seq,
            Arc::clone(shared),
        ));

        let handler = rt
            .handler_create(side.handler_name(), context.clone())
            .map_err(setup_error(SetupStage::HandlerCreate, index))?;
        context.bind(handler);

        rt.handler_add_queue(handler, own_queue)
            .map_err(setup_error(SetupStage::AddQueue, index))?;
        rt.handler_start(handler)
            .map_err(setup_error(SetupStage::HandlerStart, index))?;

        Ok(PairMember {
            handler,
            queue: own_queue,
            context,
        })
    }

    /// Sequence numbers `[0, k)` go to queue A and `[k, 2k)` to queue B
    fn seed(
        rt: &dyn DispatchRuntime,
        pool: PoolId,
        index: usize,
        queue_a: QueueId,
        queue_b: QueueId,
        events_per_queue: u32,
    ) -> Result<()> {
        for seq in 0..events_per_queue * 2 {
            let queue = if seq < events_per_queue { queue_a } else { queue_b };

            let mut event = rt
                .alloc(EVENT_SIZE, pool)
                .map_err(setup_error(SetupStage::EventAlloc, index))?;
            PerfEvent::view(&mut event)
                .map_err(setup_error(SetupStage::EventAlloc, index))?
                .set_seq(seq);

            if let Err(SendError { event, reason }) = rt.send(event, queue) {
                rt.free(event);
                return Err(setup_error(SetupStage::EventSend, index)(reason));
            }
        }
        Ok(())
    }

    /// Stop and delete every handler
    ///
    /// Stopping a handler deletes its queue together with any event still
    /// queued there. Call only after the dispatch loops have been stopped.
    pub fn teardown(self, rt: &dyn DispatchRuntime) -> Result<()> {
        for pair in &self.pairs {
            for member in [&pair.a, &pair.b] {
                let handler = member.handler;
                rt.handler_stop(handler)
                    .map_err(|source| BenchError::Teardown { handler, source })?;
                rt.handler_delete(handler)
                    .map_err(|source| BenchError::Teardown { handler, source })?;
            }
        }
        info!("Removed {} handlers and {} queues", self.handler_count(), self.queue_count());
        Ok(())
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn handler_count(&self) -> usize {
        self.pairs.len() * 2
    }

    pub fn queue_count(&self) -> usize {
        self.pairs.len() * 2
    }

    /// Events seeded at build time, all of which circulate until shutdown
    pub fn seeded_events(&self) -> usize {
        self.pairs.len() * self.events_per_queue as usize * 2
    }

    pub fn priority_mix(&self) -> PriorityMix {
        self.pairs.iter().fold(PriorityMix::default(), |mut mix, pair| {
            mix.add(pair.priority);
            mix
        })
    }
}
