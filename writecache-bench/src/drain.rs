//! Drain thread: moves retired buffers into a sink.

use crate::buffer::DoubleBuffer;
use crate::config::DrainConfig;
use crate::metrics;
use crate::worker::{Phase, SharedState};
use std::time::{Duration, Instant};

/// Destination for drained entries, standing in for the durable store.
pub trait Sink {
    /// Called once per entry, in key order within a drain pass.
    fn write(&mut self, ledger_id: u64, entry_id: u64, data: &[u8]) -> std::io::Result<()>;

    /// Called after the last entry of a pass.
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Discards entries after checking their order and optionally spinning to
/// simulate persistence cost.
pub struct DiscardSink {
    last_key: Option<(u64, u64)>,
    delay: Option<Duration>,
}

impl DiscardSink {
    pub fn new(delay: Option<Duration>) -> Self {
        Self {
            last_key: None,
            delay,
        }
    }
}

impl Sink for DiscardSink {
    fn write(&mut self, ledger_id: u64, entry_id: u64, data: &[u8]) -> std::io::Result<()> {
        let key = (ledger_id, entry_id);
        if self.last_key.is_some_and(|last| last >= key) {
            metrics::DRAIN_ORDER_VIOLATIONS.increment();
        }
        self.last_key = Some(key);

        if let Some(delay) = self.delay {
            let start = Instant::now();
            while start.elapsed() < delay {
                std::hint::spin_loop();
            }
        }

        metrics::DRAINED_ENTRIES.increment();
        metrics::DRAINED_BYTES.add(data.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.last_key = None;
        Ok(())
    }
}

/// Drain one buffer into `sink`.
pub fn drain_once<S: Sink>(buffer: &DoubleBuffer, sink: &mut S) -> std::io::Result<()> {
    let start = Instant::now();
    let report = buffer.drain(|ledger, entry, data| sink.write(ledger, entry, data))?;
    sink.flush()?;
    let elapsed = start.elapsed();

    metrics::DRAIN_COUNT.increment();
    let _ = metrics::DRAIN_LATENCY.increment(elapsed.as_nanos() as u64);

    tracing::debug!(
        buffer = report.buffer,
        entries = report.entries,
        bytes = report.bytes,
        generation = report.generation,
        elapsed = ?elapsed,
        "drained buffer"
    );
    Ok(())
}

/// Drain on demand, on a timer, or when the active buffer passes the high
/// watermark, until the benchmark stops. Returns the sink so the caller can
/// flush what is left once the workers have exited.
pub fn run_drain<S: Sink>(
    config: &DrainConfig,
    buffer: &DoubleBuffer,
    shared: &SharedState,
    mut sink: S,
) -> std::io::Result<S> {
    let poll = config.interval.min(Duration::from_millis(10));
    let mut last_drain = Instant::now();

    while shared.phase() != Phase::Stop {
        let requested = buffer.wait_for_request(poll);
        let due = last_drain.elapsed() >= config.interval;
        let high = buffer.active_stats().utilization() >= config.high_watermark;

        if requested || due || high {
            drain_once(buffer, &mut sink)?;
            last_drain = Instant::now();
        }
    }

    Ok(sink)
}

/// Drain both buffers. Call only after every writer has stopped.
pub fn drain_all<S: Sink>(buffer: &DoubleBuffer, sink: &mut S) -> std::io::Result<()> {
    drain_once(buffer, sink)?;
    drain_once(buffer, sink)
}
