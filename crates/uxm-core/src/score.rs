//! Speed score: log-normal scoring of metric values.
//!
//! Each metric value is mapped to a 0..=1 score through a log-normal
//! complementary percentile calibrated by two control points: the median,
//! which scores 0.5, and the point of diminishing returns, past which
//! improvements yield ever smaller gains. The composite score is the
//! weighted mean of the per-metric scores.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::UxmError;
use crate::metrics::{round, MetricType};

/// Calibration of one metric's scoring curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rank {
    /// Point of diminishing returns
    pub podr: f64,
    /// The value scoring 0.5
    pub median: f64,
    /// Contribution to the composite score
    pub weight: f64,
}

impl Rank {
    pub const fn new(podr: f64, median: f64, weight: f64) -> Self {
        Self {
            podr,
            median,
            weight,
        }
    }

    /// Score of `value` on this rank's curve.
    pub fn score(&self, value: f64) -> Option<f64> {
        log_normal_score(value, self.podr, self.median)
    }
}

/// Built-in rank of `metric`, calibrated so the "good" threshold of each
/// metric scores 0.9.
///
/// | Metric | podr | median | weight |
/// |--------|------|--------|--------|
/// | FCP | 400 | 3000 | 25 |
/// | LCP | 2250 | 4000 | 40 |
/// | FID | 40 | 300 | 20 |
/// | CLS | 0.055 | 0.25 | 15 |
pub fn default_rank(metric: MetricType) -> Option<Rank> {
    match metric {
        MetricType::Fcp => Some(Rank::new(400.0, 3000.0, 25.0)),
        MetricType::Lcp => Some(Rank::new(2250.0, 4000.0, 40.0)),
        MetricType::Fid => Some(Rank::new(40.0, 300.0, 20.0)),
        MetricType::Cls => Some(Rank::new(0.055, 0.25, 15.0)),
        _ => None,
    }
}

/// Gauss error function, Abramowitz and Stegun formula 7.1.26.
///
/// The maximum absolute error is about 1.5e-7.
///
/// # Examples
///
/// ```
/// use uxm_core::score::erf;
///
/// assert_eq!(erf(0.0), 0.0);
/// assert!((erf(1.0) - 0.842_700_79).abs() < 1.5e-7);
/// assert!((erf(-1.0) + 0.842_700_79).abs() < 1.5e-7);
/// ```
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    if x == 0.0 {
        return 0.0;
    }
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = t * (A1 + t * (A2 + t * (A3 + t * (A4 + t * A5))));
    sign * (1.0 - y * (-x * x).exp())
}

/// Score `value` against a log-normal curve.
///
/// # Arguments
///
/// * `value` - The measured metric value
/// * `podr` - The point of diminishing returns of the curve
/// * `median` - The median value, which scores 0.5
///
/// # Returns
///
/// * `Some(score)` - Clamped to `[0, 1]` and rounded to 2 decimals
/// * `None` - If the value cannot be scored (negative or not a number)
///
/// # Examples
///
/// ```
/// use uxm_core::score::log_normal_score;
///
/// assert_eq!(log_normal_score(3000.0, 400.0, 3000.0), Some(0.5));
/// assert_eq!(log_normal_score(1000.0, 400.0, 3000.0), Some(0.9));
/// assert_eq!(log_normal_score(-1.0, 400.0, 3000.0), None);
/// ```
pub fn log_normal_score(value: f64, podr: f64, median: f64) -> Option<f64> {
    let location = median.ln();
    let log_ratio = (podr / median).ln();
    let shape = (1.0 - 3.0 * log_ratio - ((log_ratio - 3.0).powi(2) - 8.0).sqrt()).sqrt() / 2.0;

    let standardized = (value.ln() - location) / (std::f64::consts::SQRT_2 * shape);
    let score = (1.0 - erf(standardized)) / 2.0;
    if score.is_nan() {
        return None;
    }
    Some(round(score.clamp(0.0, 1.0), 2))
}

/// Weighted mean of `(score, weight)` pairs.
///
/// Items with a non-positive weight are ignored. A single unmeasurable
/// score among the rest withholds the mean.
fn weighted_mean(items: &[(Option<f64>, f64)]) -> Option<f64> {
    let weighted: Vec<(Option<f64>, f64)> = items
        .iter()
        .copied()
        .filter(|(_, weight)| *weight > 0.0)
        .collect();

    let mut sum = 0.0;
    let mut total_weight = 0.0;
    for (score, weight) in weighted {
        sum += score? * weight;
        total_weight += weight;
    }
    if total_weight == 0.0 {
        return Some(0.0);
    }
    Some(round(sum / total_weight, 2))
}

/// Composite speed score of `values`.
///
/// Ranks from `ranks` override the defaults of [`default_rank`].
///
/// # Returns
///
/// * `Ok(Some(score))` - The weighted mean, 2 decimals
/// * `Ok(None)` - If a weighted metric could not be scored
/// * `Err(UxmError::EmptyScoreInput)` - If `values` is empty
/// * `Err(UxmError::UnknownRank)` - If a metric has neither a supplied nor a
///   default rank
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use uxm_core::metrics::MetricType;
/// use uxm_core::score::speed_score;
///
/// let values = BTreeMap::from([(MetricType::Fcp, 1000.0), (MetricType::Lcp, 2500.0)]);
/// let score = speed_score(&values, &BTreeMap::new()).unwrap();
/// assert_eq!(score, Some(0.9));
/// ```
pub fn speed_score(
    values: &BTreeMap<MetricType, f64>,
    ranks: &BTreeMap<MetricType, Rank>,
) -> Result<Option<f64>, UxmError> {
    if values.is_empty() {
        return Err(UxmError::EmptyScoreInput);
    }

    let items = values
        .iter()
        .map(|(metric, value)| {
            let rank = ranks
                .get(metric)
                .copied()
                .or_else(|| default_rank(*metric))
                .ok_or(UxmError::UnknownRank(*metric))?;
            Ok((rank.score(*value), rank.weight))
        })
        .collect::<Result<Vec<_>, UxmError>>()?;

    let score = weighted_mean(&items);
    debug!(metrics = values.len(), ?score, "speed score");
    Ok(score)
}

/// [`speed_score`] keyed by metric names, as received from JavaScript.
pub fn speed_score_named(
    values: &BTreeMap<String, f64>,
    ranks: &BTreeMap<String, Rank>,
) -> Result<Option<f64>, UxmError> {
    let values = values
        .iter()
        .map(|(name, value)| Ok((MetricType::canonicalize(name)?, *value)))
        .collect::<Result<BTreeMap<_, _>, UxmError>>()?;
    let ranks = ranks
        .iter()
        .map(|(name, rank)| Ok((MetricType::canonicalize(name)?, *rank)))
        .collect::<Result<BTreeMap<_, _>, UxmError>>()?;
    speed_score(&values, &ranks)
}
