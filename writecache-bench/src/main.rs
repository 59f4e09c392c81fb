//! In-process write cache benchmark: concurrent writers and readers against
//! a double-buffered cache, with a drain thread flushing retired buffers in
//! key order.

mod buffer;
mod config;
mod drain;
mod logging;
mod metrics;
mod worker;

use crate::buffer::DoubleBuffer;
use crate::config::Config;
use crate::drain::DiscardSink;
use crate::worker::{Phase, SharedState};

use clap::Parser;
use metriken::{AtomicHistogram, histogram::Histogram};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use writecache::metrics as cache_metrics;

#[derive(Parser)]
#[command(name = "writecache-bench")]
#[command(about = "In-process write cache benchmark")]
struct Args {
    /// Path to configuration file
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    print_config(&config);

    let num_threads = config.general.threads;
    let warmup = config.general.warmup;
    let duration = config.general.duration;

    let cpu_ids = match config.general.cpu_list {
        Some(ref cpu_list) => Some(config::parse_cpu_list(cpu_list)?),
        None => None,
    };

    let buffer = Arc::new(DoubleBuffer::new(&config.cache)?);
    let shared = Arc::new(SharedState::new());

    // Signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(num_threads);

    for id in 0..num_threads {
        let buffer = Arc::clone(&buffer);
        let shared = Arc::clone(&shared);
        let cpu_ids = cpu_ids.clone();
        let config = Arc::clone(&config);

        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                if let Some(ref ids) = cpu_ids
                    && !ids.is_empty()
                {
                    let cpu_id = ids[id % ids.len()];
                    if let Err(e) = pin_to_cpu(cpu_id) {
                        tracing::warn!(worker = id, cpu_id, error = %e, "failed to pin worker");
                    }
                }
                worker::run_worker(id, &config, &buffer, &shared);
            })?;

        handles.push(handle);
    }

    let drainer = {
        let buffer = Arc::clone(&buffer);
        let shared = Arc::clone(&shared);
        let config = Arc::clone(&config);
        thread::Builder::new().name("drain".into()).spawn(move || {
            let sink = DiscardSink::new(config.drain.flush_delay);
            drain::run_drain(&config.drain, &buffer, &shared, sink)
        })?
    };

    tracing::info!(?warmup, "warming up");

    // Main thread: reporting loop
    let start = Instant::now();
    let report_interval = Duration::from_secs(1);
    let mut last_report = Instant::now();
    let mut last_completed = 0u64;
    let mut last_hits = 0u64;
    let mut last_misses = 0u64;
    let mut last_drains = 0u64;
    let mut last_histogram: Option<Histogram> = None;
    let mut current_phase = Phase::Warmup;

    loop {
        thread::sleep(Duration::from_millis(100));

        if !running.load(Ordering::SeqCst) {
            tracing::info!("interrupted, stopping");
            break;
        }

        let elapsed = start.elapsed();
        if elapsed >= warmup + duration {
            break;
        }

        // Transition from warmup to running
        if current_phase == Phase::Warmup && elapsed >= warmup {
            shared.set_phase(Phase::Running);
            current_phase = Phase::Running;
            tracing::info!(?duration, "running");
            print_header();
            last_report = Instant::now();
            last_completed = metrics::COMPLETED_COUNT.value();
            last_hits = cache_metrics::HIT.value();
            last_misses = cache_metrics::MISS.value();
            last_drains = metrics::DRAIN_COUNT.value();
            last_histogram = metrics::RESPONSE_LATENCY.load();
        }

        if current_phase != Phase::Running {
            continue;
        }

        if last_report.elapsed() >= report_interval {
            let completed = metrics::COMPLETED_COUNT.value();
            let hits = cache_metrics::HIT.value();
            let misses = cache_metrics::MISS.value();
            let drains = metrics::DRAIN_COUNT.value();

            let elapsed_secs = last_report.elapsed().as_secs_f64();
            let rate = (completed - last_completed) as f64 / elapsed_secs;
            last_completed = completed;

            let delta_hits = hits - last_hits;
            let delta_gets = delta_hits + (misses - last_misses);
            let hit_pct = if delta_gets > 0 {
                (delta_hits as f64 / delta_gets as f64) * 100.0
            } else {
                0.0
            };
            last_hits = hits;
            last_misses = misses;

            let delta_drains = drains - last_drains;
            last_drains = drains;

            let fill = buffer.active_stats().utilization() * 100.0;

            // Interval percentiles via wrapping_sub
            let current_histogram = metrics::RESPONSE_LATENCY.load();
            let (p50, p99, p999, max) = match (&current_histogram, &last_histogram) {
                (Some(current), Some(previous)) => match current.wrapping_sub(previous) {
                    Ok(delta) => latency_summary(&delta),
                    Err(_) => (0.0, 0.0, 0.0, 0.0),
                },
                (Some(current), None) => latency_summary(current),
                _ => (0.0, 0.0, 0.0, 0.0),
            };
            last_histogram = current_histogram;

            println!(
                "{:>12.0} {:>7.1}% {:>7.1}% {:>7} {:>10.1} {:>10.1} {:>10.1} {:>10.1}",
                rate, hit_pct, fill, delta_drains, p50, p99, p999, max,
            );

            last_report = Instant::now();
        }
    }

    shared.set_phase(Phase::Stop);

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("worker panicked");
        }
    }
    let mut sink = match drainer.join() {
        Ok(result) => result?,
        Err(_) => return Err("drain thread panicked".into()),
    };
    drain::drain_all(&buffer, &mut sink)?;

    print_summary(&config);

    Ok(())
}

fn print_config(config: &Config) {
    eprintln!("writecache-bench configuration:");
    eprintln!("  capacity:   {} bytes (x2 buffers)", config.cache.capacity);
    eprintln!("  layout:     {:?}", config.cache.layout());
    eprintln!("  hugepage:   {:?}", config.cache.hugepage);
    eprintln!("  threads:    {}", config.general.threads);
    eprintln!("  duration:   {:?}", config.general.duration);
    eprintln!("  warmup:     {:?}", config.general.warmup);
    eprintln!(
        "  commands:   put={} get={} last_entry={} delete_ledger={}",
        config.workload.commands.put,
        config.workload.commands.get,
        config.workload.commands.last_entry,
        config.workload.commands.delete_ledger,
    );
    eprintln!("  ledgers:    {}", config.workload.ledgers);
    eprintln!(
        "  values:     {}..={} bytes",
        config.workload.values.min_length, config.workload.values.max_length,
    );
    eprintln!(
        "  drain:      every {:?} or at {:.0}% full",
        config.drain.interval,
        config.drain.high_watermark * 100.0,
    );
    eprintln!();
}

fn print_header() {
    println!(
        "{:>12} {:>8} {:>8} {:>7} {:>10} {:>10} {:>10} {:>10}",
        "ops/sec", "hit%", "fill%", "drains", "p50(us)", "p99(us)", "p999(us)", "max(us)",
    );
    println!("{}", "-".repeat(92));
}

fn print_summary(config: &Config) {
    let completed = metrics::COMPLETED_COUNT.value();
    let puts = cache_metrics::PUT.value();
    let put_bytes = cache_metrics::PUT_BYTES.value();
    let hits = cache_metrics::HIT.value();
    let misses = cache_metrics::MISS.value();
    let backpressure = metrics::BACKPRESSURE_COUNT.value();
    let drains = metrics::DRAIN_COUNT.value();
    let drained_entries = metrics::DRAINED_ENTRIES.value();
    let drained_bytes = metrics::DRAINED_BYTES.value();
    let deleted = cache_metrics::DELETED_ENTRIES.value();
    let violations = metrics::DRAIN_ORDER_VIOLATIONS.value();

    let total_gets = hits + misses;
    let hit_pct = if total_gets > 0 {
        (hits as f64 / total_gets as f64) * 100.0
    } else {
        0.0
    };

    let elapsed = config.general.duration.as_secs_f64();
    let avg_rate = if elapsed > 0.0 {
        completed as f64 / elapsed
    } else {
        0.0
    };

    eprintln!();
    eprintln!("=== Final Summary ===");
    eprintln!("  total ops:      {completed}");
    eprintln!("  avg ops/sec:    {avg_rate:.0}");
    eprintln!("  puts:           {puts} ({put_bytes} bytes, {backpressure} refused)");
    eprintln!("  hit rate:       {hit_pct:.1}%");
    eprintln!("  drains:         {drains}");
    eprintln!("  drained:        {drained_entries} entries, {drained_bytes} bytes");
    eprintln!("  deleted:        {deleted} entries");
    eprintln!("  order errors:   {violations}");
    eprintln!();

    print_latency_summary("PUT", &metrics::PUT_LATENCY);
    print_latency_summary("GET", &metrics::GET_LATENCY);
    print_latency_summary("LAST", &metrics::LAST_ENTRY_LATENCY);
    if config.workload.commands.delete_ledger > 0 {
        print_latency_summary("DELETE", &metrics::DELETE_LEDGER_LATENCY);
    }
    print_latency_summary("DRAIN", &metrics::DRAIN_LATENCY);
    print_latency_summary("ALL", &metrics::RESPONSE_LATENCY);
}

fn print_latency_summary(label: &str, hist: &AtomicHistogram) {
    let (p50, p99, p999, max) = match hist.load() {
        Some(snapshot) => latency_summary(&snapshot),
        None => (0.0, 0.0, 0.0, 0.0),
    };

    eprintln!(
        "  {label:<6} latency (us): p50={p50:.1}  p99={p99:.1}  p999={p999:.1}  max={max:.1}",
    );
}

// --- Histogram helpers ---

/// p50, p99, p99.9 and max in microseconds.
fn latency_summary(hist: &Histogram) -> (f64, f64, f64, f64) {
    (
        percentile(hist, 50.0) / 1000.0,
        percentile(hist, 99.0) / 1000.0,
        percentile(hist, 99.9) / 1000.0,
        percentile(hist, 100.0) / 1000.0,
    )
}

fn percentile(hist: &Histogram, p: f64) -> f64 {
    if let Ok(Some(results)) = hist.percentiles(&[p])
        && let Some((_pct, bucket)) = results.first()
    {
        return bucket.end() as f64;
    }
    0.0
}

// --- CPU pinning ---

#[cfg(target_os = "linux")]
fn pin_to_cpu(cpu_id: usize) -> std::io::Result<()> {
    use std::mem;

    unsafe {
        let mut cpuset: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(cpu_id, &mut cpuset);

        let result = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpuset);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_cpu_id: usize) -> std::io::Result<()> {
    Ok(())
}
