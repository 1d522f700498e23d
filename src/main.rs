//! pairs-bench - ping-pong pairs throughput benchmark
//!
//! Builds a population of handler pairs that bounce a fixed set of events
//! between their two queues forever, and reports the CPU cycles each dispatch
//! core spends per event.

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use pairs_bench::benchmark::Orchestrator;
use pairs_bench::config::{BenchConfig, CliArgs};
use pairs_bench::runtime::DispatchRuntime;
use pairs_bench::workload::{PriorityMix, EVENT_SIZE};

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn print_banner(config: &BenchConfig, core_hz: u64, pool_capacity: Option<usize>) {
    if config.quiet {
        return;
    }

    println!("pairs-bench v{}", env!("CARGO_PKG_VERSION"));
    println!("====================================");
    println!(
        "Pairs: {}, Handlers: {}, Queues: {} ({:?})",
        config.pairs,
        config.handler_count(),
        config.handler_count(),
        config.queue_kind
    );
    println!(
        "Events: {} per queue, {} total, {} bytes each",
        config.events_per_queue,
        config.total_events(),
        EVENT_SIZE
    );
    println!("Priorities: {}", PriorityMix::for_pairs(config.pairs));
    println!(
        "Cores: {}{}, cycle counter {:.0} MHz",
        config.cores,
        if config.pin_cores { " (pinned)" } else { "" },
        core_hz as f64 / 1e6
    );
    println!("Window: {:#x} events per core", config.window_events);
    match pool_capacity {
        Some(capacity) => println!("Event pool: {} events max", capacity),
        None => println!("Event pool: unbounded"),
    }

    let options = config.options;
    if options.alloc_free || options.memcpy || options.check_seq {
        println!(
            "Per-event work: alloc/free={} memcpy={} check-seq={}",
            options.alloc_free, options.memcpy, options.check_seq
        );
    }
    match config.duration {
        Some(d) => println!("Duration: {}s", d.as_secs()),
        None => println!("Duration: until interrupted"),
    }
    println!("====================================\n");
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Setup logging
    setup_logging(args.verbose, args.quiet)?;

    // Build configuration
    let config = BenchConfig::from_cli(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let orchestrator = Orchestrator::new(config.clone())?;
    let runtime = orchestrator.runtime();
    print_banner(&config, runtime.core_hz(), runtime.pool().capacity());

    // Ctrl-C ends the run through the normal drain and teardown
    let interrupted = orchestrator.interrupt_flag();
    ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let summary = orchestrator.run().context("Benchmark aborted")?;

    if !config.quiet {
        summary.print();
    }

    // Export to JSON if requested
    if let Some(ref output_path) = config.output_path {
        info!("Writing results to: {:?}", output_path);
        orchestrator.export_json(&summary, output_path)?;
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
