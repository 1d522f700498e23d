//! Benchmark orchestrator
//!
//! Coordinates the run lifecycle: population build, dispatch threads,
//! shutdown drain, teardown and result collection.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::population::Population;
use super::shared::HarnessShared;
use super::station::MAX_CORES;
use crate::config::BenchConfig;
use crate::metrics::{RunSummary, WindowReporter};
use crate::runtime::{CycleSource, DispatchRuntime, LocalRuntime, PoolId, Tsc};
use crate::utils::{BenchError, Result};

/// Poll interval of the main thread while dispatch threads run
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Benchmark orchestrator
pub struct Orchestrator {
    config: Arc<BenchConfig>,
    runtime: Arc<LocalRuntime>,
    shared: Arc<HarnessShared>,
    reporter: Arc<WindowReporter>,
    interrupted: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Create orchestrator with the calibrated cycle counter (or the
    /// configured frequency)
    pub fn new(config: BenchConfig) -> Result<Self> {
        let clock: Arc<dyn CycleSource> = match config.core_hz {
            Some(hz) => Arc::new(Tsc::with_hz(hz)),
            None => {
                let tsc = Tsc::shared();
                info!("Calibrated cycle counter: {:.0} MHz", tsc.hz() as f64 / 1e6);
                Arc::new(tsc)
            }
        };
        Self::with_clock(config, clock)
    }

    /// Create orchestrator with an explicit cycle source
    pub fn with_clock(config: BenchConfig, clock: Arc<dyn CycleSource>) -> Result<Self> {
        if config.pairs == 0 || config.events_per_queue == 0 || config.window_events == 0 {
            return Err(BenchError::Config(
                "pairs, events per queue and window must be non-zero".to_string(),
            ));
        }
        if config.cores > MAX_CORES {
            return Err(BenchError::Config(format!(
                "{} dispatch cores requested, at most {} supported",
                config.cores, MAX_CORES
            )));
        }

        let runtime = Arc::new(
            LocalRuntime::builder(config.cores)
                .clock(clock)
                .pool_capacity(config.pool_capacity)
                .build(),
        );
        let reporter = Arc::new(WindowReporter::new(config.output_format, config.print_scope));
        let shared = Arc::new(HarnessShared::new(
            PoolId::DEFAULT,
            runtime.core_count(),
            config.window_events,
            config.options,
            config.events_per_pair(),
            Arc::clone(&reporter),
        ));

        Ok(Self {
            config: Arc::new(config),
            runtime,
            shared,
            reporter,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<LocalRuntime> {
        &self.runtime
    }

    pub fn shared(&self) -> &Arc<HarnessShared> {
        &self.shared
    }

    pub fn reporter(&self) -> &Arc<WindowReporter> {
        &self.reporter
    }

    /// Flag that ends the run early when set, e.g. from a signal handler
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Run the benchmark until the configured duration elapses or a
    /// dispatch core fails
    pub fn run(&self) -> Result<RunSummary> {
        let population = Population::build(
            &*self.runtime,
            &self.shared,
            self.config.pairs,
            self.config.events_per_queue,
            self.config.queue_kind,
        )?;

        let handles = self.runtime.spawn_dispatchers(self.config.pin_cores)?;
        info!("Started {} dispatch cores", handles.len());

        let start = Instant::now();
        self.wait_for_exit(start);
        let elapsed = start.elapsed();

        self.shutdown(population, handles)?;

        let summary = self.reporter.summary(self.shared.seq_mismatches());
        let stats = self.runtime.stats();
        info!(
            "Run complete after {:.1}s: {} events dispatched, {} windows",
            elapsed.as_secs_f64(),
            format_count(stats.dispatched),
            summary.total_windows
        );
        Ok(summary)
    }

    fn wait_for_exit(&self, start: Instant) {
        loop {
            if self.runtime.is_stopped() {
                warn!("Dispatch stopped before the run completed");
                return;
            }
            if self.interrupted.load(Ordering::Relaxed) {
                info!("Interrupted, shutting down");
                return;
            }
            if let Some(duration) = self.config.duration {
                if start.elapsed() >= duration {
                    return;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Raise the exit flag, drain, stop dispatching and tear the population down
    fn shutdown(&self, population: Population, handles: Vec<JoinHandle<()>>) -> Result<()> {
        self.shared.signal_shutdown();

        if !self.runtime.is_stopped() {
            info!("Draining in-flight events");
            if !self.drain() {
                warn!(
                    "{} events still live after {:?} drain timeout",
                    self.runtime.pool().live(),
                    self.config.drain_timeout
                );
            }
        }

        self.runtime.stop();
        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        if let Some(err) = self.runtime.take_fatal() {
            return Err(err);
        }
        if panicked > 0 {
            return Err(BenchError::Worker(format!("{} dispatch threads panicked", panicked)));
        }

        population.teardown(&*self.runtime)?;

        let stats = self.runtime.stats();
        debug!(
            "Runtime after teardown: {} handlers, {} queues, {} live events",
            stats.handlers, stats.queues, stats.live_events
        );
        Ok(())
    }

    /// Wait until no event is live or the drain timeout expires
    fn drain(&self) -> bool {
        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            if self.runtime.pool().live() == 0 {
                return true;
            }
            if Instant::now() >= deadline || self.runtime.is_stopped() {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Export every window and the summary to JSON
    pub fn export_json(&self, summary: &RunSummary, path: &Path) -> Result<()> {
        self.reporter.export_json(path, summary)?;
        info!("Results exported to {:?}", path);
        Ok(())
    }
}

/// Format large numbers with thousands separators
/// Examples: 1,234,567 or 987,654
pub fn format_count(value: u64) -> String {
    let s = value.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, c);
    }
    result
}
