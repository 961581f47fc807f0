//! TTFB, DCL and Load from navigation timing
//!
//! The navigation timing entry is preferred. Hosts without one still expose
//! the legacy `performance.timing` object, whose epoch timestamps are taken
//! relative to `navigationStart`. A zero timestamp means the host has not
//! recorded the event yet and yields `None`.

use crate::entry::{Entry, LegacyTiming, NavigationTiming};

use super::{round, MetricResult, MetricType};

fn field(metric: MetricType, timing: &NavigationTiming) -> Option<f64> {
    match metric {
        MetricType::Ttfb => Some(timing.response_start),
        MetricType::Dcl => Some(timing.dom_content_loaded_event_end),
        MetricType::Load => Some(timing.load_event_end),
        _ => None,
    }
}

fn legacy_field(metric: MetricType, timing: &LegacyTiming) -> Option<f64> {
    match metric {
        MetricType::Ttfb => Some(timing.response_start),
        MetricType::Dcl => Some(timing.dom_content_loaded_event_end),
        MetricType::Load => Some(timing.load_event_end),
        _ => None,
    }
}

/// Raw timestamp of `metric` relative to navigation start, unrounded.
pub fn timestamp(
    metric: MetricType,
    navigation: &[Entry],
    legacy: Option<LegacyTiming>,
) -> Option<f64> {
    if let Some(timing) = navigation.iter().find_map(|entry| entry.as_navigation()) {
        return field(metric, timing).filter(|value| *value > 0.0);
    }

    let legacy = legacy?;
    let value = legacy_field(metric, &legacy)?;
    if value <= 0.0 || legacy.navigation_start <= 0.0 {
        return None;
    }
    Some(value - legacy.navigation_start)
}

/// Compute TTFB, DCL or Load. Other metrics yield `None`.
pub fn compute(
    metric: MetricType,
    navigation: &[Entry],
    legacy: Option<LegacyTiming>,
) -> Option<MetricResult> {
    timestamp(metric, navigation, legacy).map(|value| MetricResult::new(metric, round(value, 0)))
}

pub fn ttfb(navigation: &[Entry], legacy: Option<LegacyTiming>) -> Option<MetricResult> {
    compute(MetricType::Ttfb, navigation, legacy)
}

pub fn dcl(navigation: &[Entry], legacy: Option<LegacyTiming>) -> Option<MetricResult> {
    compute(MetricType::Dcl, navigation, legacy)
}

pub fn load(navigation: &[Entry], legacy: Option<LegacyTiming>) -> Option<MetricResult> {
    compute(MetricType::Load, navigation, legacy)
}
