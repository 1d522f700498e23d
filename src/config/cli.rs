//! Command-line argument parsing
//!
//! Every tunable of the pairs benchmark is a runtime option. Arguments are
//! grouped by category for clarity.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::benchmark::station::{DEFAULT_WINDOW_EVENTS, MAX_CORES};
use crate::runtime::QueueKind;

/// Ping-pong pairs throughput benchmark for event dispatch runtimes
#[derive(Parser, Debug, Clone)]
#[command(name = "pairs-bench")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Population =====
    /// Number of handler pairs (two handlers and two queues each)
    #[arg(long = "pairs", default_value_t = 64)]
    pub pairs: usize,

    /// Events seeded into every queue
    #[arg(short = 'k', long = "events-per-queue", default_value_t = 8)]
    pub events_per_queue: u32,

    /// Queue scheduling discipline
    #[arg(long = "queue-kind", value_enum, default_value_t = QueueKind::Atomic)]
    pub queue_kind: QueueKind,

    // ===== Per-event Work =====
    /// Free the event and allocate a new one on every hop
    #[arg(long = "alloc-free")]
    pub alloc_free: bool,

    /// Copy half of the payload over the other half on every hop
    #[arg(long = "memcpy")]
    pub memcpy: bool,

    /// Validate sequence numbers (atomic queues only)
    #[arg(long = "check-seq")]
    pub check_seq: bool,

    // ===== Measurement =====
    /// Events per measurement window
    #[arg(short = 'w', long = "window", default_value_t = DEFAULT_WINDOW_EVENTS)]
    pub window_events: u64,

    /// Cores that print a line per completed window
    #[arg(long = "print-scope", value_enum, default_value_t = PrintScope::All)]
    pub print_scope: PrintScope,

    /// Cycle counter frequency in MHz (calibrated when omitted)
    #[arg(long = "core-mhz")]
    pub core_mhz: Option<f64>,

    // ===== Runtime =====
    /// Number of dispatch cores (0 = all available CPUs)
    #[arg(short = 'c', long = "cores", default_value_t = 0)]
    pub cores: usize,

    /// Pin dispatch core N to CPU N
    #[arg(long = "pin-cores")]
    pub pin_cores: bool,

    /// Maximum live events in the event pool
    #[arg(long = "pool-capacity")]
    pub pool_capacity: Option<usize>,

    // ===== Timing Options =====
    /// Run duration in seconds (runs until killed when omitted)
    #[arg(short = 'd', long = "duration")]
    pub duration_secs: Option<u64>,

    /// Time allowed for in-flight events to drain after shutdown
    #[arg(long = "drain-timeout", default_value_t = 2000)]
    pub drain_timeout_ms: u64,

    // ===== Output Options =====
    /// JSON export of all windows and the summary
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Format of the per-window lines
    #[arg(long = "output-format", value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Which cores print window results
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintScope {
    /// Every core prints its own windows
    #[default]
    All,
    /// Only core 0 prints
    #[value(name = "core0")]
    Core0,
    /// Windows are only kept for the summary
    #[value(name = "none")]
    Silent,
}

/// Output format for window lines
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.pairs == 0 {
            return Err("--pairs must be at least 1".to_string());
        }

        if self.events_per_queue == 0 {
            return Err("--events-per-queue must be at least 1".to_string());
        }

        // Sequence numbers are u32 and wrap at 2 * events_per_queue
        if self.events_per_queue > u32::MAX / 2 {
            return Err("--events-per-queue is too large".to_string());
        }

        if self.window_events == 0 {
            return Err("--window must be at least 1".to_string());
        }

        if self.effective_cores() > MAX_CORES {
            return Err(format!("--cores must not exceed {}", MAX_CORES));
        }

        // Ordering within a pair only holds when one event per queue is in flight
        if self.check_seq && self.queue_kind != QueueKind::Atomic {
            return Err("--check-seq requires --queue-kind atomic".to_string());
        }

        if let Some(mhz) = self.core_mhz {
            if !(mhz.is_finite() && mhz > 0.0) {
                return Err("--core-mhz must be positive".to_string());
            }
        }

        if let Some(capacity) = self.pool_capacity {
            if capacity == 0 {
                return Err("--pool-capacity must be at least 1".to_string());
            }
        }

        Ok(())
    }

    /// Get effective number of dispatch cores (0 = auto-detect)
    pub fn effective_cores(&self) -> usize {
        if self.cores == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
                .min(MAX_CORES)
        } else {
            self.cores
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = CliArgs::parse_from(["test"]);
        assert_eq!(args.pairs, 64);
        assert_eq!(args.events_per_queue, 8);
        assert_eq!(args.window_events, 0xff0000);
        assert_eq!(args.queue_kind, QueueKind::Atomic);
        assert_eq!(args.print_scope, PrintScope::All);
        assert!(!args.alloc_free && !args.memcpy && !args.check_seq);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_work_options() {
        let args = CliArgs::parse_from([
            "test",
            "--pairs",
            "4",
            "-k",
            "2",
            "--alloc-free",
            "--memcpy",
            "--check-seq",
            "--print-scope",
            "core0",
            "--cores",
            "3",
        ]);
        assert_eq!(args.pairs, 4);
        assert_eq!(args.events_per_queue, 2);
        assert!(args.alloc_free && args.memcpy && args.check_seq);
        assert_eq!(args.print_scope, PrintScope::Core0);
        assert_eq!(args.effective_cores(), 3);
    }

    #[test]
    fn test_validation_zero_pairs() {
        let args = CliArgs::parse_from(["test", "--pairs", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_events() {
        let args = CliArgs::parse_from(["test", "-k", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_window() {
        let args = CliArgs::parse_from(["test", "--window", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_too_many_cores() {
        let args = CliArgs::parse_from(["test", "--cores", "257"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_check_seq_needs_atomic() {
        let args = CliArgs::parse_from(["test", "--check-seq", "--queue-kind", "parallel"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_core_mhz() {
        let args = CliArgs::parse_from(["test", "--core-mhz", "0"]);
        assert!(args.validate().is_err());
        let args = CliArgs::parse_from(["test", "--core-mhz", "2400"]);
        assert!(args.validate().is_ok());
    }
}
