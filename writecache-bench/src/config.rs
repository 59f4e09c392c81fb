//! Configuration for the write cache benchmark.

use serde::Deserialize;
use std::time::Duration;
use writecache::{SegmentLayout, WriteCacheConfig};

/// Top-level configuration.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub general: GeneralConfig,
    /// Settings shared by both cache buffers.
    #[serde(default)]
    pub cache: WriteCacheConfig,
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub drain: DrainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// General benchmark settings.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// How long to run the measurement phase.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// How long to warm up before recording metrics.
    #[serde(deserialize_with = "deserialize_duration")]
    pub warmup: Duration,
    /// Number of worker threads.
    pub threads: usize,
    /// Optional list of CPU cores to pin workers to (e.g., "0-3,6-8").
    pub cpu_list: Option<String>,
}

/// Workload configuration.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Number of distinct ledgers. Each worker owns a disjoint subset.
    pub ledgers: usize,
    /// Command mix (must sum to 100).
    pub commands: CommandsConfig,
    /// Payload parameters.
    pub values: ValuesConfig,
}

/// Command mix (percentages, must sum to 100).
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsConfig {
    pub put: u8,
    pub get: u8,
    pub last_entry: u8,
    #[serde(default)]
    pub delete_ledger: u8,
}

/// Payload configuration.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValuesConfig {
    /// Smallest payload in bytes.
    pub min_length: usize,
    /// Largest payload in bytes.
    pub max_length: usize,
}

/// Drain loop configuration.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DrainConfig {
    /// Drain at least this often, even if the active buffer has room.
    #[serde(
        default = "default_drain_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,
    /// Drain early once the active buffer passes this fraction of capacity.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f64,
    /// Simulated persistence cost per drained entry.
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub flush_delay: Option<Duration>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            interval: default_drain_interval(),
            high_watermark: default_high_watermark(),
            flush_delay: None,
        }
    }
}

fn default_drain_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_high_watermark() -> f64 {
    0.75
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "writecache=debug").
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Include the event target (module path).
    #[serde(default)]
    pub target: bool,
    /// Include thread names.
    #[serde(default = "default_true")]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: false,
            thread_names: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
    /// Abbreviated single-line output.
    Compact,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let commands = &self.workload.commands;
        let total = commands.put as u16
            + commands.get as u16
            + commands.last_entry as u16
            + commands.delete_ledger as u16;
        if total != 100 {
            return Err(format!(
                "command mix must sum to 100 (got {}): put={} get={} last_entry={} delete_ledger={}",
                total, commands.put, commands.get, commands.last_entry, commands.delete_ledger,
            )
            .into());
        }

        if self.general.threads == 0 {
            return Err("threads must be at least 1".into());
        }

        if self.workload.ledgers < self.general.threads {
            return Err(format!(
                "ledgers ({}) must be at least threads ({})",
                self.workload.ledgers, self.general.threads
            )
            .into());
        }

        let values = &self.workload.values;
        if values.min_length > values.max_length {
            return Err(format!(
                "min_length ({}) must not exceed max_length ({})",
                values.min_length, values.max_length
            )
            .into());
        }

        let first_segment = match self.cache.layout() {
            SegmentLayout::Single => self.cache.capacity,
            SegmentLayout::MaxSegmentSize(size) => size.min(self.cache.capacity),
            SegmentLayout::SegmentCount(count) => self.cache.capacity / count.max(1),
        };
        if values.max_length > first_segment {
            return Err(format!(
                "max_length ({}) must fit in a segment ({} bytes)",
                values.max_length, first_segment
            )
            .into());
        }

        if !(0.0..=1.0).contains(&self.drain.high_watermark) {
            return Err("drain.high_watermark must be within 0.0..=1.0".into());
        }

        if let Some(ref cpu_list) = self.general.cpu_list {
            parse_cpu_list(cpu_list).map_err(|e| format!("invalid cpu_list: {e}"))?;
        }

        self.cache.validate()?;

        Ok(())
    }
}

/// Deserialize a duration from a human-readable string (e.g., "60s", "5m").
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) => humantime::parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Parse a CPU list string like "0-3,6-8" into a Vec of CPU IDs.
pub fn parse_cpu_list(s: &str) -> Result<Vec<usize>, String> {
    let mut cpus = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start
                .trim()
                .parse()
                .map_err(|e| format!("invalid CPU id '{}': {}", start, e))?;
            let end: usize = end
                .trim()
                .parse()
                .map_err(|e| format!("invalid CPU id '{}': {}", end, e))?;
            if start > end {
                return Err(format!("invalid range {}-{}", start, end));
            }
            cpus.extend(start..=end);
        } else {
            let cpu: usize = part
                .parse()
                .map_err(|e| format!("invalid CPU id '{}': {}", part, e))?;
            cpus.push(cpu);
        }
    }
    Ok(cpus)
}
