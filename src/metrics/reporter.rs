//! Window reporter - output formatting, history and export
//!
//! Supports multiple output formats for the per-window lines:
//! - Text (human-readable, one line per window)
//! - JSON (one object per line)
//! - CSV

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::window::WindowReport;
use crate::config::{OutputFormat, PrintScope};
use crate::utils::Result;

/// Histogram resolution: cycles/event are recorded in hundredths
const CYCLE_SCALE: f64 = 100.0;

/// Per-core slice of the run summary
#[derive(Debug, Clone, Serialize)]
pub struct CoreSummary {
    pub core: usize,
    pub windows: u64,
    pub mean_cycles_per_event: f64,
    pub last_cycles_per_event: f64,
    pub last_mevents_per_sec: f64,
}

/// Aggregate over every reported window
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_windows: u64,
    /// Sum over cores of each core's latest throughput
    pub aggregate_mevents_per_sec: f64,
    pub cycles_per_event_min: f64,
    pub cycles_per_event_p50: f64,
    pub cycles_per_event_p99: f64,
    pub cycles_per_event_max: f64,
    pub seq_mismatches: u64,
    pub cores: Vec<CoreSummary>,
}

impl RunSummary {
    pub fn print(&self) {
        println!("\n=== pairs summary ===");
        if self.total_windows == 0 {
            println!("No measurement window completed");
        } else {
            println!(
                "Windows: {} | Aggregate: {:.2} Mevents/s",
                self.total_windows, self.aggregate_mevents_per_sec
            );
            println!(
                "Cycles/event: min={:.2} p50={:.2} p99={:.2} max={:.2}",
                self.cycles_per_event_min,
                self.cycles_per_event_p50,
                self.cycles_per_event_p99,
                self.cycles_per_event_max
            );
            for core in &self.cores {
                println!(
                    "  core{:02}: windows={} mean={:.2} last={:.2} cycles/event ({:.2} Mevents/s)",
                    core.core,
                    core.windows,
                    core.mean_cycles_per_event,
                    core.last_cycles_per_event,
                    core.last_mevents_per_sec
                );
            }
        }
        if self.seq_mismatches > 0 {
            println!("Sequence mismatches: {}", self.seq_mismatches);
        }
    }
}

/// Sink for completed measurement windows
///
/// `emit` runs once per window on the reporting core, never per event.
pub struct WindowReporter {
    format: OutputFormat,
    scope: PrintScope,
    header_written: Mutex<bool>,
    history: Mutex<Vec<WindowReport>>,
}

impl WindowReporter {
    pub fn new(format: OutputFormat, scope: PrintScope) -> Self {
        Self {
            format,
            scope,
            header_written: Mutex::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Whether windows of `core` produce an output line
    pub fn prints_core(&self, core: usize) -> bool {
        match self.scope {
            PrintScope::All => true,
            PrintScope::Core0 => core == 0,
            PrintScope::Silent => false,
        }
    }

    /// Print (per scope) and record a completed window
    pub fn emit(&self, report: &WindowReport) {
        if self.prints_core(report.core) {
            if let Some(line) = self.format_line(report) {
                println!("{}", line);
            }
        }
        self.history.lock().push(*report);
    }

    /// Output line for one window; the CSV header is prepended once
    pub fn format_line(&self, report: &WindowReport) -> Option<String> {
        match self.format {
            OutputFormat::Text => Some(report.to_string()),
            OutputFormat::Json => serde_json::to_string(report).ok(),
            OutputFormat::Csv => {
                let mut written = self.header_written.lock();
                if *written {
                    Some(report.csv_row())
                } else {
                    *written = true;
                    Some(format!("{}\n{}", WindowReport::csv_header(), report.csv_row()))
                }
            }
        }
    }

    /// All windows reported so far
    pub fn reports(&self) -> Vec<WindowReport> {
        self.history.lock().clone()
    }

    pub fn window_count(&self) -> usize {
        self.history.lock().len()
    }

    /// Fold the history into a run summary
    pub fn summary(&self, seq_mismatches: u64) -> RunSummary {
        let history = self.history.lock();

        let mut histogram = Histogram::<u64>::new(3).ok();
        let mut by_core: BTreeMap<usize, Vec<&WindowReport>> = BTreeMap::new();
        for report in history.iter() {
            if let Some(ref mut h) = histogram {
                let scaled = (report.cycles_per_event * CYCLE_SCALE).round() as u64;
                if let Err(e) = h.record(scaled) {
                    debug!("Window core{:02}#{} not recorded in histogram: {}", report.core, report.window, e);
                }
            }
            by_core.entry(report.core).or_default().push(report);
        }

        let cores: Vec<CoreSummary> = by_core
            .into_iter()
            .map(|(core, reports)| {
                let mean = reports.iter().map(|r| r.cycles_per_event).sum::<f64>() / reports.len() as f64;
                let last = reports
                    .iter()
                    .max_by_key(|r| r.window)
                    .copied()
                    .copied();
                CoreSummary {
                    core,
                    windows: reports.len() as u64,
                    mean_cycles_per_event: mean,
                    last_cycles_per_event: last.map(|r| r.cycles_per_event).unwrap_or(0.0),
                    last_mevents_per_sec: last.map(|r| r.mevents_per_sec).unwrap_or(0.0),
                }
            })
            .collect();

        let quantile = |q: f64| -> f64 {
            match histogram {
                Some(ref h) if !h.is_empty() => h.value_at_quantile(q) as f64 / CYCLE_SCALE,
                _ => 0.0,
            }
        };
        let (min, max) = match histogram {
            Some(ref h) if !h.is_empty() => (h.min() as f64 / CYCLE_SCALE, h.max() as f64 / CYCLE_SCALE),
            _ => (0.0, 0.0),
        };

        RunSummary {
            total_windows: history.len() as u64,
            aggregate_mevents_per_sec: cores.iter().map(|c| c.last_mevents_per_sec).sum(),
            cycles_per_event_min: min,
            cycles_per_event_p50: quantile(0.50),
            cycles_per_event_p99: quantile(0.99),
            cycles_per_event_max: max,
            seq_mismatches,
            cores,
        }
    }

    /// Write every window and the summary to a JSON file
    pub fn export_json(&self, path: &Path, summary: &RunSummary) -> Result<()> {
        let json = serde_json::json!({
            "summary": summary,
            "windows": self.reports(),
        });

        let mut file = File::create(path)?;
        writeln!(file, "{}", serde_json::to_string_pretty(&json)?)?;
        Ok(())
    }
}
