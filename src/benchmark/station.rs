//! Per-core measurement station
//!
//! Each dispatch core owns one cache-line sized [`CoreStat`]. Only callbacks
//! running on that core write it, so every field is a plain relaxed
//! load/store: no read-modify-write, no locks, no cross-core traffic on the
//! hot path.
//!
//! Window state machine per core:
//!
//! ```text
//! EMPTY --first event--> ACCUMULATING --counter == window--> REPORTING
//!                             ^                                  |
//!                             +------ counter = 0, re-stamp -----+
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::CACHE_LINE_SIZE;

/// Upper bound on dispatch cores tracked by a station
pub const MAX_CORES: usize = 256;

/// Default number of events per measurement window
pub const DEFAULT_WINDOW_EVENTS: u64 = 0xff_0000;

/// Measurement record of one core
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CoreStat {
    events: AtomicU64,
    begin_cycles: AtomicU64,
    end_cycles: AtomicU64,
    windows: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<CoreStat>() == CACHE_LINE_SIZE);

/// A completed window, captured at the moment it closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub core: usize,
    pub begin_cycles: u64,
    pub end_cycles: u64,
    pub events: u64,
    /// 1-based count of windows completed on this core
    pub window: u64,
}

impl CoreStat {
    /// Events counted in the current window (as last committed)
    #[inline]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Persist the counter returned by [`CoreStat::advance`]
    #[inline]
    pub fn commit(&self, events: u64) {
        self.events.store(events, Ordering::Relaxed);
    }

    pub fn begin_cycles(&self) -> u64 {
        self.begin_cycles.load(Ordering::Relaxed)
    }

    pub fn end_cycles(&self) -> u64 {
        self.end_cycles.load(Ordering::Relaxed)
    }

    pub fn windows(&self) -> u64 {
        self.windows.load(Ordering::Relaxed)
    }

    /// Step the window state machine for one received event
    ///
    /// Returns the new counter value; the caller commits it once the event
    /// has been forwarded. When the window closes, `on_close` runs before the
    /// next window's begin stamp is taken so reporting cost stays out of the
    /// measurement.
    #[inline]
    pub fn advance(
        &self,
        core: usize,
        window_events: u64,
        mut now: impl FnMut() -> u64,
        on_close: impl FnOnce(&WindowSnapshot),
    ) -> u64 {
        let events = self.events();

        if events == 0 {
            self.begin_cycles.store(now(), Ordering::Relaxed);
            1
        } else if events >= window_events {
            let end = now();
            self.end_cycles.store(end, Ordering::Relaxed);
            let window = self.windows() + 1;
            self.windows.store(window, Ordering::Relaxed);

            on_close(&WindowSnapshot {
                core,
                begin_cycles: self.begin_cycles(),
                end_cycles: end,
                events,
                window,
            });

            self.begin_cycles.store(now(), Ordering::Relaxed);
            0
        } else {
            events + 1
        }
    }
}

/// Measurement records for every dispatch core
#[derive(Debug)]
pub struct MeasurementStation {
    cores: Box<[CoreStat]>,
    window_events: u64,
}

impl MeasurementStation {
    /// Zero-initialized records for `core_count` cores
    pub fn new(core_count: usize, window_events: u64) -> Self {
        let cores = (0..core_count.clamp(1, MAX_CORES))
            .map(|_| CoreStat::default())
            .collect();
        Self {
            cores,
            window_events,
        }
    }

    #[inline]
    pub fn core(&self, core: usize) -> &CoreStat {
        &self.cores[core]
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    #[inline]
    pub fn window_events(&self) -> u64 {
        self.window_events
    }

    /// Windows completed across all cores
    pub fn total_windows(&self) -> u64 {
        self.cores.iter().map(CoreStat::windows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Drive `n` events through a record with a clock that ticks by 1 per read
    fn feed(stat: &CoreStat, window: u64, n: u64, clock: &Cell<u64>, closed: &mut Vec<WindowSnapshot>) {
        for _ in 0..n {
            let events = stat.advance(
                0,
                window,
                || {
                    let t = clock.get();
                    clock.set(t + 1);
                    t
                },
                |snap| closed.push(*snap),
            );
            stat.commit(events);
        }
    }

    #[test]
    fn test_record_is_one_cache_line() {
        assert_eq!(std::mem::size_of::<CoreStat>(), 64);
        assert_eq!(std::mem::align_of::<CoreStat>(), 64);
    }

    #[test]
    fn test_first_event_stamps_begin() {
        let stat = CoreStat::default();
        let events = stat.advance(0, 8, || 500, |_| panic!("no window yet"));
        assert_eq!(events, 1);
        assert_eq!(stat.begin_cycles(), 500);
        assert_eq!(stat.events(), 0, "counter is only persisted on commit");
    }

    #[test]
    fn test_window_closes_once_threshold_reached() {
        let stat = CoreStat::default();
        let clock = Cell::new(1000);
        let mut closed = Vec::new();

        // Threshold events fill the window; the next one closes it
        feed(&stat, 4, 4, &clock, &mut closed);
        assert_eq!(stat.events(), 4);
        assert!(closed.is_empty());

        stat.commit(stat.advance(0, 4, || 2000, |snap| closed.push(*snap)));

        assert_eq!(closed.len(), 1);
        let snap = closed[0];
        assert_eq!(snap.begin_cycles, 1000);
        assert_eq!(snap.end_cycles, 2000);
        assert_eq!(snap.events, 4);
        assert_eq!(snap.window, 1);
        assert_eq!(stat.windows(), 1);
        assert_eq!(stat.events(), 0);
        assert_eq!(stat.end_cycles(), 2000);
    }

    #[test]
    fn test_begin_restamped_after_report() {
        let stat = CoreStat::default();
        stat.commit(stat.advance(0, 1, || 10, |_| {}));

        let mut reads = vec![50u64, 60];
        let mut reported_begin = None;
        let events = stat.advance(
            0,
            1,
            || reads.remove(0),
            |snap| reported_begin = Some(snap.begin_cycles),
        );
        stat.commit(events);

        assert_eq!(reported_begin, Some(10));
        assert_eq!(stat.end_cycles(), 50);
        assert_eq!(stat.begin_cycles(), 60);
        assert_eq!(stat.events(), 0);
    }

    #[test]
    fn test_windows_keep_cycling() {
        let stat = CoreStat::default();
        let clock = Cell::new(0);
        let mut closed = Vec::new();

        feed(&stat, 3, 3 * 4 + 3, &clock, &mut closed);

        let windows: Vec<u64> = closed.iter().map(|s| s.window).collect();
        assert_eq!(windows, vec![1, 2, 3]);
        assert!(closed.iter().all(|s| s.events == 3));
    }

    #[test]
    fn test_station_is_capped() {
        let station = MeasurementStation::new(1024, 16);
        assert_eq!(station.core_count(), MAX_CORES);
        assert_eq!(station.window_events(), 16);
        assert_eq!(station.total_windows(), 0);
    }
}
