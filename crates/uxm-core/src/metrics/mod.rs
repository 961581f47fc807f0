//! Metric types, results and collection
//!
//! This module provides:
//! - **Computation**: pure functions mapping entries to a [`MetricResult`]
//!   ([`compute`] for paint/input/shift metrics, [`navigation`] for TTFB,
//!   DCL and Load)
//! - **Observation**: per-metric state machines that subscribe to the host
//!   and emit exactly one finalized result ([`observe`])
//!
//! # Example
//!
//! ```
//! use uxm_core::entry::Entry;
//! use uxm_core::metrics::{compute, MetricType};
//!
//! let entries = vec![
//!     Entry::paint("first-paint", 1100.0),
//!     Entry::paint("first-contentful-paint", 1234.4),
//! ];
//! let fcp = compute::fcp(&entries).unwrap();
//! assert_eq!(fcp.metric_type, MetricType::Fcp);
//! assert_eq!(fcp.value, 1234.0);
//! ```

pub mod compute;
pub mod navigation;
pub mod observe;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::entry::EntryType;
use crate::error::UxmError;

pub use observe::{MetricCallback, MetricObserver, ObserveOptions};

/// A metric the engine knows how to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Fcp,
    Fid,
    Lcp,
    Cls,
    Ttfb,
    Dcl,
    Load,
    /// Cumulative input delay over the whole session
    Cid,
}

impl MetricType {
    pub const ALL: [MetricType; 8] = [
        MetricType::Fcp,
        MetricType::Fid,
        MetricType::Lcp,
        MetricType::Cls,
        MetricType::Ttfb,
        MetricType::Dcl,
        MetricType::Load,
        MetricType::Cid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Fcp => "fcp",
            MetricType::Fid => "fid",
            MetricType::Lcp => "lcp",
            MetricType::Cls => "cls",
            MetricType::Ttfb => "ttfb",
            MetricType::Dcl => "dcl",
            MetricType::Load => "load",
            MetricType::Cid => "cid",
        }
    }

    /// Resolve a caller supplied metric name, case-insensitively.
    ///
    /// Both the short names (`fcp`) and the long names
    /// (`first-contentful-paint`) are accepted.
    pub fn canonicalize(name: &str) -> Result<Self, UxmError> {
        let metric = match name.trim().to_ascii_lowercase().as_str() {
            "fcp" | "first-contentful-paint" => MetricType::Fcp,
            "fid" | "first-input-delay" | "first-input" => MetricType::Fid,
            "lcp" | "largest-contentful-paint" => MetricType::Lcp,
            "cls" | "cumulative-layout-shift" | "layout-shift" => MetricType::Cls,
            "ttfb" | "time-to-first-byte" => MetricType::Ttfb,
            "dcl" | "dom-content-loaded" | "domcontentloaded" => MetricType::Dcl,
            "load" | "onload" => MetricType::Load,
            "cid" | "cumulative-input-delay" => MetricType::Cid,
            _ => return Err(UxmError::InvalidMetric(name.to_string())),
        };
        Ok(metric)
    }

    /// The entry category the metric is computed from, `None` for the
    /// navigation timing metrics.
    pub fn entry_type(&self) -> Option<EntryType> {
        match self {
            MetricType::Fcp => Some(EntryType::Paint),
            MetricType::Fid => Some(EntryType::FirstInput),
            MetricType::Lcp => Some(EntryType::LargestContentfulPaint),
            MetricType::Cls => Some(EntryType::LayoutShift),
            MetricType::Cid => Some(EntryType::Event),
            MetricType::Ttfb | MetricType::Dcl | MetricType::Load => None,
        }
    }

    /// Whether the value is a duration in milliseconds (everything but CLS).
    pub fn is_duration(&self) -> bool {
        !matches!(self, MetricType::Cls)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = UxmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::canonicalize(s)
    }
}

/// Diagnostic data attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum MetricDetail {
    FirstInput {
        start_time: f64,
        name: String,
    },
    LargestPaint {
        size: f64,
        element_selector: Option<String>,
    },
    Session {
        total_entries: usize,
        session_duration: f64,
    },
}

/// One finalized metric value.
///
/// `value` is in milliseconds for every metric except CLS, where it is the
/// raw unitless layout shift score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<MetricDetail>,
}

impl MetricResult {
    pub fn new(metric_type: MetricType, value: f64) -> Self {
        Self {
            metric_type,
            value,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: MetricDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Value for display. CLS is shown as a percentage-like number (score
    /// times 100, 3 decimals); every other metric is returned unchanged.
    pub fn presentation_value(&self) -> f64 {
        match self.metric_type {
            MetricType::Cls => round(self.value * 100.0, 3),
            _ => self.value,
        }
    }
}

/// A metric to collect plus its per-request options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricRequest {
    pub metric: MetricType,
    /// LCP candidate window and CID idle window. `None` uses the configured
    /// default.
    pub max_timeout: Option<Duration>,
}

impl MetricRequest {
    pub fn new(metric: MetricType) -> Self {
        Self {
            metric,
            max_timeout: None,
        }
    }

    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = Some(max_timeout);
        self
    }
}

impl From<MetricType> for MetricRequest {
    fn from(metric: MetricType) -> Self {
        Self::new(metric)
    }
}

impl FromStr for MetricRequest {
    type Err = UxmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.parse()?))
    }
}

/// Round `x` half up to `precision` decimals.
///
/// Values too large to scale safely, and non-finite values, are returned
/// unchanged, which keeps the function idempotent over every finite input.
///
/// # Examples
///
/// ```
/// use uxm_core::metrics::round;
///
/// assert_eq!(round(1234.4, 0), 1234.0);
/// assert_eq!(round(0.5, 0), 1.0);
/// assert_eq!(round(0.08000000000000002, 4), 0.08);
/// ```
pub fn round(x: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let scaled = x * factor;
    if !scaled.is_finite() || scaled.abs() >= 1e15 {
        return x;
    }
    let rounded = (scaled + 0.5).floor() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_canonicalize_short_and_long_names() {
        assert_eq!(MetricType::canonicalize("FCP").unwrap(), MetricType::Fcp);
        assert_eq!(
            MetricType::canonicalize("largest-contentful-paint").unwrap(),
            MetricType::Lcp
        );
        assert_eq!(
            "cumulative-layout-shift".parse::<MetricType>().unwrap(),
            MetricType::Cls
        );
        assert_eq!(
            MetricType::canonicalize("first-input-delay").unwrap(),
            MetricType::Fid
        );
        for metric in MetricType::ALL {
            assert_eq!(MetricType::canonicalize(metric.as_str()).unwrap(), metric);
        }
    }

    #[test]
    fn test_canonicalize_rejects_unknown() {
        assert_eq!(
            MetricType::canonicalize("fmp"),
            Err(UxmError::InvalidMetric("fmp".to_string()))
        );
    }

    #[test]
    fn test_round() {
        assert_eq!(round(1234.4, 0), 1234.0);
        assert_eq!(round(1234.5, 0), 1235.0);
        assert_eq!(round(-2.5, 0), -2.0);
        assert_eq!(round(0.123456, 4), 0.1235);
        assert!(round(f64::NAN, 2).is_nan());
        assert_eq!(round(f64::INFINITY, 2), f64::INFINITY);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = MetricResult::new(MetricType::Fid, 50.0).with_detail(MetricDetail::FirstInput {
            start_time: 100.0,
            name: "mousedown".to_string(),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "metricType": "fid",
                "value": 50.0,
                "detail": { "startTime": 100.0, "name": "mousedown" }
            })
        );

        let parsed: MetricResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_result_without_detail_omits_field() {
        let json = serde_json::to_string(&MetricResult::new(MetricType::Fcp, 900.0)).unwrap();
        assert_eq!(json, r#"{"metricType":"fcp","value":900.0}"#);
    }

    #[test]
    fn test_presentation_value_scales_cls_only() {
        assert_eq!(MetricResult::new(MetricType::Cls, 0.0812).presentation_value(), 8.12);
        assert_eq!(MetricResult::new(MetricType::Lcp, 1600.0).presentation_value(), 1600.0);
    }
}
