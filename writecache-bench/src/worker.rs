//! Worker thread for the write cache benchmark.

use crate::buffer::DoubleBuffer;
use crate::config::Config;
use crate::metrics;

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use writecache::metrics as cache_metrics;

/// Test phase, controlled by main thread and read by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Warmup phase: run workload but don't record metrics.
    Warmup = 0,
    /// Main measurement phase, record metrics.
    Running = 1,
    /// Stop phase, workers should exit.
    Stop = 2,
}

impl Phase {
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Warmup,
            1 => Phase::Running,
            _ => Phase::Stop,
        }
    }
}

/// Shared state between main thread, workers and the drain thread.
pub struct SharedState {
    phase: AtomicU8,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Warmup as u8),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

/// The ledgers a worker writes to: every `threads`-th ledger starting at `id`.
fn owned_ledgers(id: usize, threads: usize, ledgers: usize) -> Vec<i64> {
    (id..ledgers).step_by(threads).map(|l| l as i64).collect()
}

/// Run a single worker thread.
pub fn run_worker(id: usize, config: &Config, buffer: &DoubleBuffer, shared: &SharedState) {
    let commands = &config.workload.commands;
    let put_threshold = commands.put;
    let get_threshold = put_threshold + commands.get;
    let last_threshold = get_threshold + commands.last_entry;

    let ledgers = owned_ledgers(id, config.general.threads, config.workload.ledgers);
    let mut next_entry = vec![0i64; ledgers.len()];

    let min_len = config.workload.values.min_length;
    let max_len = config.workload.values.max_length;
    let mut value_buf = vec![0u8; max_len];

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42 + id as u64);
    rng.fill_bytes(&mut value_buf);

    loop {
        let phase = shared.phase();
        if phase == Phase::Stop {
            break;
        }
        let recording = phase == Phase::Running;

        let slot = rng.random_range(0..ledgers.len());
        let ledger = ledgers[slot];
        let roll: u8 = rng.random_range(0..100);

        if roll < put_threshold {
            // PUT: retry through backpressure until the drain frees space
            let len = rng.random_range(min_len..=max_len);
            let entry = next_entry[slot];
            let start = Instant::now();
            let stored = put_with_backpressure(buffer, shared, ledger, entry, &value_buf[..len]);
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if stored {
                next_entry[slot] += 1;
            }
            if recording {
                metrics::COMPLETED_COUNT.increment();
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::PUT_LATENCY.increment(elapsed_ns);
            }
        } else if roll < get_threshold {
            // GET: any entry this worker has written may still be buffered
            let written = next_entry[slot];
            let entry = if written > 0 {
                rng.random_range(0..written)
            } else {
                0
            };
            let start = Instant::now();
            let _ = buffer.lookup(|cache| cache.get(ledger, entry).ok().flatten().map(|d| d.len()));
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::COMPLETED_COUNT.increment();
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::GET_LATENCY.increment(elapsed_ns);
            }
        } else if roll < last_threshold {
            // GET_LAST_ENTRY: any ledger, including ones owned by others
            let any_ledger = rng.random_range(0..config.workload.ledgers) as i64;
            let start = Instant::now();
            let _ = buffer.lookup(|cache| {
                cache
                    .get_last_entry(any_ledger)
                    .ok()
                    .flatten()
                    .map(|d| d.len())
            });
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::COMPLETED_COUNT.increment();
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::LAST_ENTRY_LATENCY.increment(elapsed_ns);
            }
        } else {
            // DELETE_LEDGER: from both buffers
            let start = Instant::now();
            buffer.for_both(|cache| {
                if let Err(e) = cache.delete_ledger(ledger) {
                    tracing::error!(ledger, error = %e, "delete_ledger failed");
                }
            });
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::COMPLETED_COUNT.increment();
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::DELETE_LEDGER_LATENCY.increment(elapsed_ns);
            }
        }
    }

    tracing::debug!(
        worker = id,
        puts = cache_metrics::PUT.value(),
        "worker stopped"
    );
}

/// Put into the active buffer, requesting a drain and retrying while full.
///
/// Returns `false` only if the benchmark stops first or the payload can
/// never fit.
fn put_with_backpressure(
    buffer: &DoubleBuffer,
    shared: &SharedState,
    ledger: i64,
    entry: i64,
    data: &[u8],
) -> bool {
    loop {
        match buffer.with_active(|cache| cache.put(ledger, entry, data)) {
            Ok(true) => return true,
            Ok(false) => {
                metrics::BACKPRESSURE_COUNT.increment();
                buffer.request_drain();
                if shared.phase() == Phase::Stop {
                    return false;
                }
                std::thread::yield_now();
            }
            Err(e) => {
                tracing::error!(ledger, entry, error = %e, "put failed");
                return false;
            }
        }
    }
}
