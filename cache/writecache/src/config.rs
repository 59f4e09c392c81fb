//! Serde configuration for a write cache.
//!
//! Sizes accept either a byte count or a human-readable string:
//!
//! ```toml
//! capacity = "256MB"
//! segment_size = "1MB"
//! hugepage = "2mb"
//! numa_node = 0
//! ```

use crate::allocator::HugepageSize;
use crate::cache::{WriteCache, WriteCacheBuilder};
use crate::error::{Result, WriteCacheError};
use crate::pool::SegmentLayout;
use serde::Deserialize;

const DEFAULT_SEGMENT_SIZE: usize = 1024 * 1024;

/// Write cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteCacheConfig {
    /// Total capacity (e.g., "256MB", "4GB")
    #[serde(default = "default_capacity", deserialize_with = "deserialize_size")]
    pub capacity: usize,

    /// Maximum segment size (e.g., "1MB"). Mutually exclusive with
    /// `segment_count`. Defaults to 1MB when neither is set.
    #[serde(default, deserialize_with = "deserialize_optional_size")]
    pub segment_size: Option<usize>,

    /// Number of equal segments. Mutually exclusive with `segment_size`.
    #[serde(default)]
    pub segment_count: Option<usize>,

    /// Hugepage size preference: "none", "2mb", or "1gb"
    #[serde(default)]
    pub hugepage: HugepageConfig,

    /// NUMA node to bind cache memory to (Linux only).
    #[serde(default)]
    pub numa_node: Option<u32>,
}

impl Default for WriteCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            segment_size: None,
            segment_count: None,
            hugepage: HugepageConfig::default(),
            numa_node: None,
        }
    }
}

impl WriteCacheConfig {
    /// Check the configuration without allocating anything.
    pub fn validate(&self) -> Result<()> {
        if self.segment_size.is_some() && self.segment_count.is_some() {
            return Err(WriteCacheError::InvalidConfig(
                "segment_size and segment_count are mutually exclusive".into(),
            ));
        }
        self.layout().segment_sizes(self.capacity)?;
        Ok(())
    }

    /// The segment layout this configuration describes.
    pub fn layout(&self) -> SegmentLayout {
        match (self.segment_size, self.segment_count) {
            (_, Some(count)) => SegmentLayout::SegmentCount(count),
            (Some(size), None) => SegmentLayout::MaxSegmentSize(size),
            (None, None) => SegmentLayout::MaxSegmentSize(DEFAULT_SEGMENT_SIZE),
        }
    }

    /// A builder preloaded with this configuration.
    pub fn builder(&self) -> WriteCacheBuilder {
        let mut builder = WriteCacheBuilder::new()
            .capacity(self.capacity)
            .layout(self.layout())
            .hugepage_size(self.hugepage.into());
        if let Some(node) = self.numa_node {
            builder = builder.numa_node(node);
        }
        builder
    }

    /// Validate and build a cache using the mmap allocator.
    pub fn build(&self) -> Result<WriteCache> {
        self.validate()?;
        self.builder().build()
    }
}

/// Hugepage size configuration.
///
/// Falls back to regular pages (with THP hint) if hugepages are unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HugepageConfig {
    /// Regular 4KB pages.
    #[default]
    None,
    /// 2MB hugepages (Linux only).
    TwoMegabyte,
    /// 1GB hugepages (Linux only).
    OneGigabyte,
}

impl From<HugepageConfig> for HugepageSize {
    fn from(config: HugepageConfig) -> Self {
        match config {
            HugepageConfig::None => HugepageSize::None,
            HugepageConfig::TwoMegabyte => HugepageSize::TwoMegabyte,
            HugepageConfig::OneGigabyte => HugepageSize::OneGigabyte,
        }
    }
}

impl<'de> Deserialize<'de> for HugepageConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "none" => Ok(HugepageConfig::None),
            "2mb" => Ok(HugepageConfig::TwoMegabyte),
            "1gb" => Ok(HugepageConfig::OneGigabyte),
            _ => Err(serde::de::Error::custom(format!(
                "invalid hugepage size: '{}' (expected 'none', '2mb', or '1gb')",
                s
            ))),
        }
    }
}

fn default_capacity() -> usize {
    64 * 1024 * 1024 // 64MB
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Number(usize),
    String(String),
}

impl SizeValue {
    fn bytes(self) -> std::result::Result<usize, String> {
        match self {
            SizeValue::Number(n) => Ok(n),
            SizeValue::String(s) => parse_size(&s),
        }
    }
}

/// Deserialize a size string like "64MB" or "4GB" into bytes.
pub fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    SizeValue::deserialize(deserializer)?
        .bytes()
        .map_err(D::Error::custom)
}

fn deserialize_optional_size<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    match Option::<SizeValue>::deserialize(deserializer)? {
        Some(value) => value.bytes().map(Some).map_err(D::Error::custom),
        None => Ok(None),
    }
}

/// Parse a size string like "64MB", "4GB", "1TB" into bytes.
pub fn parse_size(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("64MB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size(" 2 gib ").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("").is_err());
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn test_defaults() {
        let config: WriteCacheConfig = toml::from_str("").unwrap();
        assert_eq!(config.capacity, 64 * 1024 * 1024);
        assert_eq!(
            config.layout(),
            SegmentLayout::MaxSegmentSize(DEFAULT_SEGMENT_SIZE)
        );
        assert_eq!(config.hugepage, HugepageConfig::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full() {
        let config: WriteCacheConfig = toml::from_str(
            r#"
            capacity = "16MB"
            segment_size = 65536
            hugepage = "2MB"
            numa_node = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity, 16 * 1024 * 1024);
        assert_eq!(config.layout(), SegmentLayout::MaxSegmentSize(65536));
        assert_eq!(config.hugepage, HugepageConfig::TwoMegabyte);
        assert_eq!(config.numa_node, Some(1));
    }

    #[test]
    fn test_segment_count() {
        let config: WriteCacheConfig =
            toml::from_str("capacity = \"1KB\"\nsegment_count = 8").unwrap();
        assert_eq!(config.layout(), SegmentLayout::SegmentCount(8));
        let cache = config.build().unwrap();
        assert_eq!(cache.segment_count(), 8);
        assert_eq!(cache.capacity(), 1024);
    }

    #[test]
    fn test_rejects_conflicting_layout() {
        let config: WriteCacheConfig =
            toml::from_str("segment_size = \"1MB\"\nsegment_count = 8").unwrap();
        assert!(matches!(
            config.validate(),
            Err(WriteCacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(toml::from_str::<WriteCacheConfig>("hugepage = \"4mb\"").is_err());
        assert!(toml::from_str::<WriteCacheConfig>("capacity = \"lots\"").is_err());
        assert!(toml::from_str::<WriteCacheConfig>("unknown = 1").is_err());

        let config: WriteCacheConfig = toml::from_str("capacity = 0").unwrap();
        assert!(config.validate().is_err());
    }
}
