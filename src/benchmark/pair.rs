//! Ping-pong pair handler
//!
//! Two handlers form a pair and each owns one queue. Every received event is
//! counted into the receiving core's measurement window and forwarded to the
//! partner's queue, so the events of a pair keep circulating until shutdown.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use super::shared::HarnessShared;
use crate::metrics::WindowReport;
use crate::runtime::{DispatchRuntime, Event, Handler, HandlerId, QueueId, SendError};
use crate::utils::{RuntimeError, CACHE_LINE_SIZE};
use crate::workload::{PerfEvent, EVENT_SIZE};

/// Which half of a pair a handler is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn handler_name(self) -> &'static str {
        match self {
            Side::A => "pairs-EO-A",
            Side::B => "pairs-EO-B",
        }
    }

    pub fn queue_name(self) -> &'static str {
        match self {
            Side::A => "pairs-queue-A",
            Side::B => "pairs-queue-B",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::A => "A",
            Side::B => "B",
        })
    }
}

/// Per-handler context
///
/// Aligned to its own cache line: `next_seq` is written by whichever core
/// runs the handler and must not share a line with a neighbour's context.
#[repr(C, align(64))]
pub struct PairHandler {
    own_queue: QueueId,
    peer_queue: QueueId,
    next_seq: AtomicU32,
    side: Side,
    id: OnceLock<HandlerId>,
    shared: Arc<HarnessShared>,
}

const _: () = assert!(std::mem::align_of::<PairHandler>() == CACHE_LINE_SIZE);

impl PairHandler {
    /// `first_seq` is the sequence number of the first event this handler
    /// will receive: 0 for side A, the per-queue event count for side B.
    pub fn new(
        side: Side,
        own_queue: QueueId,
        peer_queue: QueueId,
        first_seq: u32,
        shared: Arc<HarnessShared>,
    ) -> Self {
        Self {
            own_queue,
            peer_queue,
            next_seq: AtomicU32::new(first_seq),
            side,
            id: OnceLock::new(),
            shared,
        }
    }

    /// Record the handle the runtime assigned to this handler
    pub fn bind(&self, id: HandlerId) {
        if self.id.set(id).is_err() {
            warn!("Pair handler {} already bound, ignoring {}", self.side, id);
        }
    }

    pub fn handler_id(&self) -> Option<HandlerId> {
        self.id.get().copied()
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn own_queue(&self) -> QueueId {
        self.own_queue
    }

    pub fn peer_queue(&self) -> QueueId {
        self.peer_queue
    }

    /// Sequence number expected on the next receive
    pub fn next_seq(&self) -> u32 {
        self.next_seq.load(Ordering::Relaxed)
    }

    /// Compare against the expected sequence number and step it, wrapping at
    /// the number of events in the pair
    fn check_seq(&self, seq: u32, queue: QueueId) {
        let expected = self.next_seq.load(Ordering::Relaxed);
        if seq != expected {
            self.shared.record_seq_mismatch();
            warn!(
                "Bad sequence number: EO-{} {:?} queue {} expected seq {}, event seq {}",
                self.side,
                self.id.get(),
                queue,
                expected,
                seq
            );
        }

        let next = if expected + 1 < self.shared.events_per_pair() {
            expected + 1
        } else {
            0
        };
        self.next_seq.store(next, Ordering::Relaxed);
    }
}

impl Handler for PairHandler {
    fn on_start(&self, _rt: &dyn DispatchRuntime, handler: HandlerId) -> Result<(), RuntimeError> {
        debug!(
            "Pair handler {} ({}) starting on queue {}",
            handler, self.side, self.own_queue
        );
        Ok(())
    }

    fn on_stop(&self, rt: &dyn DispatchRuntime, handler: HandlerId) -> Result<(), RuntimeError> {
        debug!("Pair handler {} ({}) stopping", handler, self.side);
        rt.handler_remove_all_queues(handler, true)
    }

    fn on_receive(&self, rt: &dyn DispatchRuntime, mut event: Event, queue: QueueId) -> Result<(), RuntimeError> {
        let shared = &*self.shared;

        if shared.is_shutdown() {
            rt.free(event);
            return Ok(());
        }

        let core = rt.core_id();
        let station = shared.station();
        let stat = station.core(core);
        let events = stat.advance(
            core,
            station.window_events(),
            || rt.cycles(),
            |snap| shared.reporter().emit(&WindowReport::from_snapshot(snap, rt.core_hz())),
        );

        let options = shared.options();
        if options.check_seq || options.memcpy || options.alloc_free {
            let seq = {
                let mut perf = PerfEvent::view(&mut event)?;
                if options.check_seq {
                    self.check_seq(perf.seq(), queue);
                }
                if options.memcpy {
                    perf.copy_half();
                }
                perf.seq()
            };

            if options.alloc_free {
                rt.free(event);
                event = match rt.alloc(EVENT_SIZE, shared.pool) {
                    Ok(event) => event,
                    Err(reason) if shared.is_shutdown() => {
                        debug!("Allocation refused during shutdown: {}", reason);
                        stat.commit(events);
                        return Ok(());
                    }
                    Err(reason) => return Err(reason),
                };
                PerfEvent::view(&mut event)?.set_seq(seq);
            }
        }

        if let Err(SendError { event, reason }) = rt.send(event, self.peer_queue) {
            rt.free(event);
            if !shared.is_shutdown() {
                return Err(reason);
            }
            debug!("Send to {} refused during shutdown: {}", self.peer_queue, reason);
            stat.commit(events);
            return Ok(());
        }

        stat.commit(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::Population;
    use crate::config::{EventOptions, OutputFormat, PrintScope};
    use crate::metrics::WindowReporter;
    use crate::runtime::{LocalRuntime, PoolId, Priority, QueueGroup, QueueKind, StepClock};
    use crate::utils::BenchError;
    use crate::workload::DATA_SIZE;
    use parking_lot::Mutex;

    fn runtime() -> LocalRuntime {
        LocalRuntime::builder(1)
            .clock(Arc::new(StepClock::new(0, 10, 1_000_000_000)))
            .build()
    }

    fn shared(options: EventOptions, events_per_queue: u32, window: u64) -> Arc<HarnessShared> {
        let reporter = Arc::new(WindowReporter::new(OutputFormat::Text, PrintScope::Silent));
        Arc::new(HarnessShared::new(
            PoolId::DEFAULT,
            1,
            window,
            options,
            events_per_queue * 2,
            reporter,
        ))
    }

    fn one_pair(rt: &LocalRuntime, shared: &Arc<HarnessShared>, events_per_queue: u32) -> Population {
        Population::build(rt, shared, 1, events_per_queue, QueueKind::Atomic).unwrap()
    }

    /// Captures the payload of every event it receives
    #[derive(Default)]
    struct Probe(Mutex<Vec<Vec<u8>>>);

    impl Handler for Probe {
        fn on_stop(&self, rt: &dyn DispatchRuntime, handler: HandlerId) -> Result<(), RuntimeError> {
            rt.handler_remove_all_queues(handler, true)
        }

        fn on_receive(&self, rt: &dyn DispatchRuntime, event: Event, _queue: QueueId) -> Result<(), RuntimeError> {
            self.0.lock().push(event.payload().to_vec());
            rt.free(event);
            Ok(())
        }
    }

    #[test]
    fn test_events_circulate_without_loss() {
        let rt = runtime();
        let shared = shared(EventOptions::default(), 2, 1000);
        let _population = one_pair(&rt, &shared, 2);

        assert_eq!(rt.run_until_idle(0, 100).unwrap(), 100);
        assert_eq!(rt.pool().live(), 4);
        assert_eq!(rt.stats().queued_events, 4);
        assert_eq!(shared.station().core(0).events(), 100);
    }

    #[test]
    fn test_sequence_continuity() {
        let rt = runtime();
        let options = EventOptions {
            check_seq: true,
            ..Default::default()
        };
        let shared = shared(options, 3, 1000);
        let population = one_pair(&rt, &shared, 3);

        rt.run_until_idle(0, 1000).unwrap();
        assert_eq!(shared.seq_mismatches(), 0);

        // 500 receives each: 500 % 6 == 2
        let pair = &population.pairs()[0];
        assert_eq!(pair.a.context.next_seq(), 2);
        assert_eq!(pair.b.context.next_seq(), (3 + 500) % 6);
    }

    #[test]
    fn test_out_of_order_event_is_counted() {
        let rt = runtime();
        let options = EventOptions {
            check_seq: true,
            ..Default::default()
        };
        let shared = shared(options, 3, 1000);
        let population = one_pair(&rt, &shared, 3);

        let mut stray = rt.alloc(EVENT_SIZE, PoolId::DEFAULT).unwrap();
        PerfEvent::view(&mut stray).unwrap().set_seq(99);
        rt.send(stray, population.pairs()[0].a.queue).unwrap();

        rt.run_until_idle(0, 20).unwrap();
        assert!(shared.seq_mismatches() > 0);
        assert_eq!(rt.pool().live(), 7);
    }

    #[test]
    fn test_shutdown_frees_instead_of_forwarding() {
        let rt = runtime();
        let shared = shared(EventOptions::default(), 2, 1000);
        let _population = one_pair(&rt, &shared, 2);

        shared.signal_shutdown();
        assert_eq!(rt.run_until_idle(0, 100).unwrap(), 4);

        assert_eq!(rt.pool().live(), 0);
        let stat = shared.station().core(0);
        assert_eq!(stat.events(), 0);
        assert_eq!(stat.begin_cycles(), 0);
    }

    #[test]
    fn test_alloc_free_keeps_sequence_and_population() {
        let rt = runtime();
        let options = EventOptions {
            alloc_free: true,
            check_seq: true,
            ..Default::default()
        };
        let shared = shared(options, 2, 1000);
        let _population = one_pair(&rt, &shared, 2);

        rt.run_until_idle(0, 200).unwrap();

        assert_eq!(shared.seq_mismatches(), 0);
        assert_eq!(rt.pool().live(), 4);
        let (allocs, frees) = rt.pool().totals();
        assert_eq!(allocs, 4 + 200);
        assert_eq!(frees, 200);
    }

    #[test]
    fn test_memcpy_copies_first_half_over_second() {
        let rt = runtime();
        let options = EventOptions {
            memcpy: true,
            ..Default::default()
        };
        let shared = shared(options, 1, 1000);

        let probe = Arc::new(Probe::default());
        let probe_handler = rt.handler_create("probe", probe.clone()).unwrap();
        let probe_queue = rt
            .queue_create("probe", QueueKind::Atomic, Priority::Low, QueueGroup::DEFAULT)
            .unwrap();
        rt.handler_add_queue(probe_handler, probe_queue).unwrap();
        rt.handler_start(probe_handler).unwrap();

        let handler = PairHandler::new(Side::A, QueueId(0x100), probe_queue, 0, Arc::clone(&shared));
        let mut event = rt.alloc(EVENT_SIZE, PoolId::DEFAULT).unwrap();
        {
            let mut perf = PerfEvent::view(&mut event).unwrap();
            perf.set_seq(7);
            for (i, b) in perf.data_mut().iter_mut().enumerate().take(DATA_SIZE / 2) {
                *b = i as u8;
            }
        }

        handler.on_receive(&rt, event, QueueId(0x100)).unwrap();
        assert_eq!(rt.run_until_idle(0, 10).unwrap(), 1);

        let mut seen = probe.0.lock().pop().unwrap();
        let perf = PerfEvent::from_bytes(&mut seen).unwrap();
        assert_eq!(perf.seq(), 7);
        let data = perf.data();
        assert_eq!(data[..DATA_SIZE / 2], data[DATA_SIZE / 2..]);
        assert_eq!(data[DATA_SIZE / 2 + 3], 3);
    }

    #[test]
    fn test_send_failure_is_fatal() {
        let rt = runtime();
        let shared = shared(EventOptions::default(), 2, 1000);
        let population = one_pair(&rt, &shared, 2);
        let pair = &population.pairs()[0];

        // Stopping B deletes its queue and the two events in it
        rt.handler_stop(pair.b.handler).unwrap();
        assert_eq!(rt.pool().live(), 2);

        let err = rt.dispatch_one(0).unwrap_err();
        assert!(matches!(
            err,
            BenchError::Dispatch {
                core: 0,
                source: RuntimeError::UnknownQueue(q)
            } if q == pair.b.queue
        ));
        assert_eq!(rt.pool().live(), 1);
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Refuse {
        Send,
        Alloc,
    }

    /// Runtime that raises the shutdown flag and then refuses one kind of call
    struct RefusingRuntime<'a> {
        inner: &'a LocalRuntime,
        shared: &'a HarnessShared,
        refuse: Refuse,
    }

    impl DispatchRuntime for RefusingRuntime<'_> {
        fn handler_create(&self, name: &str, handler: Arc<dyn Handler>) -> Result<HandlerId, RuntimeError> {
            self.inner.handler_create(name, handler)
        }
        fn handler_add_queue(&self, handler: HandlerId, queue: QueueId) -> Result<(), RuntimeError> {
            self.inner.handler_add_queue(handler, queue)
        }
        fn handler_start(&self, handler: HandlerId) -> Result<(), RuntimeError> {
            self.inner.handler_start(handler)
        }
        fn handler_stop(&self, handler: HandlerId) -> Result<(), RuntimeError> {
            self.inner.handler_stop(handler)
        }
        fn handler_remove_all_queues(&self, handler: HandlerId, delete_queues: bool) -> Result<(), RuntimeError> {
            self.inner.handler_remove_all_queues(handler, delete_queues)
        }
        fn handler_delete(&self, handler: HandlerId) -> Result<(), RuntimeError> {
            self.inner.handler_delete(handler)
        }
        fn queue_create(
            &self,
            name: &str,
            kind: QueueKind,
            priority: Priority,
            group: QueueGroup,
        ) -> Result<QueueId, RuntimeError> {
            self.inner.queue_create(name, kind, priority, group)
        }
        fn alloc(&self, size: usize, pool: PoolId) -> Result<Event, RuntimeError> {
            if self.refuse == Refuse::Alloc {
                self.shared.signal_shutdown();
                return Err(RuntimeError::PoolExhausted { live: 0, capacity: 0 });
            }
            self.inner.alloc(size, pool)
        }
        fn send(&self, event: Event, queue: QueueId) -> Result<(), SendError> {
            if self.refuse == Refuse::Send {
                self.shared.signal_shutdown();
                return Err(SendError {
                    event,
                    reason: RuntimeError::QueueDisabled(queue),
                });
            }
            self.inner.send(event, queue)
        }
        fn free(&self, event: Event) {
            self.inner.free(event)
        }
        fn core_id(&self) -> usize {
            self.inner.core_id()
        }
        fn core_count(&self) -> usize {
            self.inner.core_count()
        }
        fn core_hz(&self) -> u64 {
            self.inner.core_hz()
        }
        fn cycles(&self) -> u64 {
            self.inner.cycles()
        }
    }

    #[test]
    fn test_send_failure_during_shutdown_is_tolerated() {
        let rt = runtime();
        let shared = shared(EventOptions::default(), 1, 1000);
        let racing = RefusingRuntime {
            inner: &rt,
            shared: &shared,
            refuse: Refuse::Send,
        };

        let handler = PairHandler::new(Side::B, QueueId(1), QueueId(0), 1, Arc::clone(&shared));
        let event = rt.alloc(EVENT_SIZE, PoolId::DEFAULT).unwrap();

        handler.on_receive(&racing, event, QueueId(1)).unwrap();
        assert!(shared.is_shutdown());
        assert_eq!(rt.pool().live(), 0);
        assert_eq!(shared.station().core(0).events(), 1);
    }

    #[test]
    fn test_alloc_failure_during_shutdown_is_tolerated() {
        let rt = runtime();
        let options = EventOptions {
            alloc_free: true,
            ..Default::default()
        };
        let shared = shared(options, 1, 1000);
        let racing = RefusingRuntime {
            inner: &rt,
            shared: &shared,
            refuse: Refuse::Alloc,
        };

        let handler = PairHandler::new(Side::A, QueueId(0), QueueId(1), 0, Arc::clone(&shared));
        let event = rt.alloc(EVENT_SIZE, PoolId::DEFAULT).unwrap();

        handler.on_receive(&racing, event, QueueId(0)).unwrap();
        assert!(shared.is_shutdown());
        assert_eq!(rt.pool().live(), 0);
        assert_eq!(shared.station().core(0).events(), 1);
    }

    #[test]
    fn test_alloc_failure_is_fatal() {
        let rt = runtime();
        let options = EventOptions {
            alloc_free: true,
            ..Default::default()
        };
        // Hot-path allocations target a pool the runtime does not know
        let reporter = Arc::new(WindowReporter::new(OutputFormat::Text, PrintScope::Silent));
        let shared = Arc::new(HarnessShared::new(PoolId(7), 1, 1000, options, 2, reporter));

        let own = rt
            .queue_create("own", QueueKind::Atomic, Priority::Low, QueueGroup::DEFAULT)
            .unwrap();
        let peer = rt
            .queue_create("peer", QueueKind::Atomic, Priority::Low, QueueGroup::DEFAULT)
            .unwrap();
        let context = Arc::new(PairHandler::new(Side::A, own, peer, 0, Arc::clone(&shared)));
        let handler = rt.handler_create("a", context).unwrap();
        rt.handler_add_queue(handler, own).unwrap();
        rt.handler_start(handler).unwrap();
        rt.send(rt.alloc(EVENT_SIZE, PoolId::DEFAULT).unwrap(), own).unwrap();

        let err = rt.dispatch_one(0).unwrap_err();
        assert!(matches!(
            err,
            BenchError::Dispatch {
                core: 0,
                source: RuntimeError::UnknownPool(PoolId(7))
            }
        ));
        assert!(!shared.is_shutdown());
        assert_eq!(rt.pool().live(), 0);
    }

    #[test]
    fn test_bind_records_first_handle() {
        let shared = shared(EventOptions::default(), 1, 1000);
        let handler = PairHandler::new(Side::A, QueueId(0), QueueId(1), 0, shared);
        assert_eq!(handler.handler_id(), None);

        handler.bind(HandlerId(4));
        handler.bind(HandlerId(5));
        assert_eq!(handler.handler_id(), Some(HandlerId(4)));
        assert_eq!(handler.side().handler_name(), "pairs-EO-A");
    }
}
