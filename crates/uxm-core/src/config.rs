//! Configuration parsing for page sessions
//!
//! TOML configuration for observer timeouts, speed score rank overrides and
//! the reporter endpoint. Every section and field is optional.
//!
//! ```toml
//! [observer]
//! buffered_timeout = 250
//! lcp_max_timeout = 5000
//! cid_max_timeout = 10000
//!
//! [ranks.ttfb]
//! podr = 300
//! median = 1000
//! weight = 10
//!
//! [reporter]
//! url = "https://rum.example.com/collect"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::UxmError;
use crate::metrics::{MetricType, ObserveOptions};
use crate::score::Rank;
use crate::source::DEFAULT_BUFFERED_TIMEOUT;

/// Main configuration structure loaded from TOML files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UxmConfig {
    /// Observer timing settings
    #[serde(default)]
    pub observer: ObserverConfig,
    /// Speed score rank overrides, keyed by metric name
    #[serde(default)]
    pub ranks: BTreeMap<String, Rank>,
    /// Reporter settings
    #[serde(default)]
    pub reporter: ReporterConfig,
}

impl UxmConfig {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML is malformed
    /// - A rank names an unknown metric
    ///
    /// # Example
    ///
    /// ```no_run
    /// use uxm_core::config::UxmConfig;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = UxmConfig::from_file("uxm.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use uxm_core::config::UxmConfig;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = UxmConfig::from_str("[observer]\nlcp_max_timeout = 8000")?;
    /// assert_eq!(config.observer.lcp_max_timeout, Duration::from_millis(8000));
    /// # Ok(())
    /// # }
    /// # example().unwrap();
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse TOML configuration")?;
        config.rank_overrides().context("Invalid [ranks] section")?;
        Ok(config)
    }

    /// Rank overrides by metric. Names go through the same canonicalization
    /// as everywhere else, so `fcp` and `first-contentful-paint` are equal.
    pub fn rank_overrides(&self) -> Result<BTreeMap<MetricType, Rank>, UxmError> {
        self.ranks
            .iter()
            .map(|(name, rank)| Ok((MetricType::canonicalize(name)?, *rank)))
            .collect()
    }

    /// Observer options derived from the `[observer]` section.
    pub fn observe_options(&self) -> ObserveOptions {
        ObserveOptions {
            lcp_max_timeout: self.observer.lcp_max_timeout,
            cid_max_timeout: self.observer.cid_max_timeout,
        }
    }
}

/// Observer timeouts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// How long `get_buffered` waits for replayed entries (default: 250ms)
    #[serde(default = "default_buffered_timeout", with = "duration_ms")]
    pub buffered_timeout: Duration,
    /// LCP candidate window (default: 5000ms)
    #[serde(default = "default_lcp_max_timeout", with = "duration_ms")]
    pub lcp_max_timeout: Duration,
    /// CID idle window, hidden transition only when absent
    #[serde(
        default,
        with = "option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub cid_max_timeout: Option<Duration>,
}

fn default_buffered_timeout() -> Duration {
    DEFAULT_BUFFERED_TIMEOUT
}

fn default_lcp_max_timeout() -> Duration {
    crate::metrics::observe::DEFAULT_LCP_MAX_TIMEOUT
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            buffered_timeout: default_buffered_timeout(),
            lcp_max_timeout: default_lcp_max_timeout(),
            cid_max_timeout: None,
        }
    }
}

/// Where collected metrics are sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Collection endpoint, no reporter when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
