//! Benchmark metrics.
//!
//! Cache-level counters (puts, hits, misses, clears) live in
//! `writecache::metrics`; this module adds what only the harness can see.

use metriken::{AtomicHistogram, Counter, metric};

#[metric(name = "completed_count", description = "Total completed operations")]
pub static COMPLETED_COUNT: Counter = Counter::new();

#[metric(
    name = "backpressure_count",
    description = "Puts refused because the active buffer was full"
)]
pub static BACKPRESSURE_COUNT: Counter = Counter::new();

#[metric(name = "drain_count", description = "Completed drain cycles")]
pub static DRAIN_COUNT: Counter = Counter::new();

#[metric(name = "drained_entries", description = "Entries handed to the sink")]
pub static DRAINED_ENTRIES: Counter = Counter::new();

#[metric(name = "drained_bytes", description = "Payload bytes handed to the sink")]
pub static DRAINED_BYTES: Counter = Counter::new();

#[metric(
    name = "drain_order_violations",
    description = "Drained entries that arrived out of key order"
)]
pub static DRAIN_ORDER_VIOLATIONS: Counter = Counter::new();

// Latency histograms
#[metric(
    name = "response_latency",
    description = "Response latency histogram (nanoseconds)"
)]
pub static RESPONSE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(name = "put_latency", description = "PUT latency histogram (nanoseconds)")]
pub static PUT_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(name = "get_latency", description = "GET latency histogram (nanoseconds)")]
pub static GET_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "last_entry_latency",
    description = "GET_LAST_ENTRY latency histogram (nanoseconds)"
)]
pub static LAST_ENTRY_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "delete_ledger_latency",
    description = "DELETE_LEDGER latency histogram (nanoseconds)"
)]
pub static DELETE_LEDGER_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "drain_latency",
    description = "Drain cycle latency histogram (nanoseconds)"
)]
pub static DRAIN_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);
