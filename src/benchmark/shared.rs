//! Harness state shared by every handler
//!
//! Built once on the setup thread before any event is dispatched, handed to
//! each handler as an `Arc`, and dropped after teardown. Apart from the
//! shutdown flag and the diagnostic mismatch counter, nothing here is written
//! by more than one core: each core only touches its own station record.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::station::MeasurementStation;
use crate::config::EventOptions;
use crate::metrics::WindowReporter;
use crate::runtime::PoolId;
use crate::utils::CachePadded;

pub struct HarnessShared {
    /// Event pool all payloads are allocated from
    pub pool: PoolId,
    station: MeasurementStation,
    reporter: Arc<WindowReporter>,
    options: EventOptions,
    /// Ping-pong events per pair; sequence numbers wrap at this value
    events_per_pair: u32,
    shutdown: CachePadded<AtomicBool>,
    seq_mismatches: CachePadded<AtomicU64>,
}

impl HarnessShared {
    pub fn new(
        pool: PoolId,
        core_count: usize,
        window_events: u64,
        options: EventOptions,
        events_per_pair: u32,
        reporter: Arc<WindowReporter>,
    ) -> Self {
        Self {
            pool,
            station: MeasurementStation::new(core_count, window_events),
            reporter,
            options,
            events_per_pair,
            shutdown: CachePadded::new(AtomicBool::new(false)),
            seq_mismatches: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn station(&self) -> &MeasurementStation {
        &self.station
    }

    #[inline]
    pub fn reporter(&self) -> &WindowReporter {
        &self.reporter
    }

    #[inline]
    pub fn options(&self) -> EventOptions {
        self.options
    }

    #[inline]
    pub fn events_per_pair(&self) -> u32 {
        self.events_per_pair
    }

    /// Signal shutdown to all handlers
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown has been signaled
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn record_seq_mismatch(&self) {
        self.seq_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn seq_mismatches(&self) -> u64 {
        self.seq_mismatches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFormat, PrintScope};

    #[test]
    fn test_shutdown_signal() {
        let reporter = Arc::new(WindowReporter::new(OutputFormat::Text, PrintScope::Silent));
        let shared = HarnessShared::new(PoolId::DEFAULT, 4, 100, EventOptions::default(), 16, reporter);

        assert!(!shared.is_shutdown());
        shared.signal_shutdown();
        assert!(shared.is_shutdown());
        assert_eq!(shared.station().core_count(), 4);
        assert_eq!(shared.events_per_pair(), 16);
    }
}
