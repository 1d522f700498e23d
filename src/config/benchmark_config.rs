//! Benchmark configuration derived from CLI arguments

use super::cli::{CliArgs, OutputFormat, PrintScope};
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::QueueKind;

/// Optional per-event work performed by every handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOptions {
    /// Free and re-allocate the event on every hop
    pub alloc_free: bool,
    /// Copy the first half of the payload over the second half
    pub memcpy: bool,
    /// Validate sequence numbers against the expected order
    pub check_seq: bool,
}

/// Complete benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    // Population
    pub pairs: usize,
    pub events_per_queue: u32,
    pub queue_kind: QueueKind,
    pub options: EventOptions,

    // Measurement
    pub window_events: u64,
    pub print_scope: PrintScope,
    pub core_hz: Option<u64>,

    // Runtime
    pub cores: usize,
    pub pin_cores: bool,
    pub pool_capacity: Option<usize>,

    // Timing
    pub duration: Option<Duration>,
    pub drain_timeout: Duration,

    // Output
    pub output_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
}

impl BenchConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        args.validate()?;

        Ok(Self {
            pairs: args.pairs,
            events_per_queue: args.events_per_queue,
            queue_kind: args.queue_kind,
            options: EventOptions {
                alloc_free: args.alloc_free,
                memcpy: args.memcpy,
                check_seq: args.check_seq,
            },

            window_events: args.window_events,
            print_scope: args.print_scope,
            core_hz: args.core_mhz.map(|mhz| (mhz * 1_000_000.0) as u64),

            cores: args.effective_cores(),
            pin_cores: args.pin_cores,
            pool_capacity: args.pool_capacity,

            duration: args.duration_secs.map(Duration::from_secs),
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),

            output_path: args.output.clone(),
            output_format: args.output_format,
            quiet: args.quiet,
            verbose: args.verbose,
        })
    }

    /// Handlers in the population (two per pair)
    pub fn handler_count(&self) -> usize {
        self.pairs * 2
    }

    /// Events circulating in one pair
    pub fn events_per_pair(&self) -> u32 {
        self.events_per_queue * 2
    }

    /// Events circulating in the whole population
    pub fn total_events(&self) -> usize {
        self.pairs * self.events_per_pair() as usize
    }
}
