//! Throughput figures for one measurement window

use std::fmt;

use serde::Serialize;

use crate::benchmark::station::WindowSnapshot;

/// Cycles between two counter stamps, assuming at most one wraparound
#[inline]
pub fn elapsed_cycles(begin: u64, end: u64) -> u64 {
    if end >= begin {
        end - begin
    } else {
        u64::MAX - begin + end + 1
    }
}

/// Result of one completed measurement window on one core
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowReport {
    pub core: usize,
    /// 1-based window number on this core
    pub window: u64,
    pub events: u64,
    pub elapsed_cycles: u64,
    pub cycles_per_event: f64,
    /// Million events per second on this core
    pub mevents_per_sec: f64,
    pub core_mhz: f64,
}

impl WindowReport {
    /// Derive throughput from a closed window and the counter frequency
    pub fn from_snapshot(snap: &WindowSnapshot, core_hz: u64) -> Self {
        let elapsed = elapsed_cycles(snap.begin_cycles, snap.end_cycles);
        let core_mhz = core_hz as f64 / 1_000_000.0;
        let cycles_per_event = if snap.events > 0 {
            elapsed as f64 / snap.events as f64
        } else {
            0.0
        };
        let mevents_per_sec = if cycles_per_event > 0.0 {
            core_mhz / cycles_per_event
        } else {
            0.0
        };

        Self {
            core: snap.core,
            window: snap.window,
            events: snap.events,
            elapsed_cycles: elapsed,
            cycles_per_event,
            mevents_per_sec,
            core_mhz,
        }
    }

    /// CSV column names matching [`WindowReport::csv_row`]
    pub fn csv_header() -> &'static str {
        "core,window,events,elapsed_cycles,cycles_per_event,mevents_per_sec,core_mhz"
    }

    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{:.2},{:.2},{:.0}",
            self.core,
            self.window,
            self.events,
            self.elapsed_cycles,
            self.cycles_per_event,
            self.mevents_per_sec,
            self.core_mhz
        )
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles/event:{:<8.2}  Mevents/s/core: {:<6.2} {:5.0} MHz  core{:02} {}",
            self.cycles_per_event, self.mevents_per_sec, self.core_mhz, self.core, self.window
        )
    }
}
