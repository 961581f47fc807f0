//! Pure metric computations over entry lists
//!
//! Each function maps the entries of one category to a [`MetricResult`], or
//! `None` when the entries do not contain what the metric needs. Values are
//! rounded to whole milliseconds, CLS to 4 decimals and CID to 2.

use crate::entry::Entry;

use super::{round, MetricDetail, MetricResult, MetricType};

const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";

/// First contentful paint from paint entries.
pub fn fcp(entries: &[Entry]) -> Option<MetricResult> {
    entries
        .iter()
        .find(|entry| entry.name == FIRST_CONTENTFUL_PAINT)
        .map(|entry| MetricResult::new(MetricType::Fcp, round(entry.start_time, 0)))
}

/// Whether a paint batch holds the first contentful paint.
pub fn has_fcp(entries: &[Entry]) -> bool {
    entries.iter().any(|entry| entry.name == FIRST_CONTENTFUL_PAINT)
}

/// First input delay. Only the first input entry counts.
pub fn fid(entries: &[Entry]) -> Option<MetricResult> {
    let entry = entries.iter().find(|entry| entry.as_input().is_some())?;
    let delay = entry.input_delay()?;
    Some(
        MetricResult::new(MetricType::Fid, round(delay, 0)).with_detail(MetricDetail::FirstInput {
            start_time: round(entry.start_time, 0),
            name: entry.name.clone(),
        }),
    )
}

/// Largest contentful paint. The last candidate is authoritative.
pub fn lcp(entries: &[Entry]) -> Option<MetricResult> {
    let paint = entries
        .iter()
        .rev()
        .find_map(|entry| entry.as_largest_paint())?;
    let time = if paint.render_time != 0.0 {
        paint.render_time
    } else {
        paint.load_time
    };
    Some(
        MetricResult::new(MetricType::Lcp, round(time, 0)).with_detail(MetricDetail::LargestPaint {
            size: paint.size,
            element_selector: paint.element.as_ref().map(|element| element.path_selector()),
        }),
    )
}

/// Cumulative layout shift: the raw sum of shift scores that did not follow
/// recent input. `None` when no shift was observed at all.
pub fn cls(entries: &[Entry], session_duration: f64) -> Option<MetricResult> {
    let shifts: Vec<_> = entries
        .iter()
        .filter_map(|entry| entry.as_layout_shift())
        .collect();
    if shifts.is_empty() {
        return None;
    }
    let score: f64 = shifts
        .iter()
        .filter(|shift| !shift.had_recent_input)
        .map(|shift| shift.value)
        .sum();
    Some(
        MetricResult::new(MetricType::Cls, round(score, 4)).with_detail(MetricDetail::Session {
            total_entries: shifts.len(),
            session_duration: round(session_duration, 0),
        }),
    )
}

/// Collapse runs of consecutive events sharing the same `duration` (one
/// physical interaction reported as several events) to the event with the
/// longest input delay.
pub fn filter_input_delays(entries: &[Entry]) -> Vec<&Entry> {
    let inputs: Vec<&Entry> = entries
        .iter()
        .filter(|entry| entry.as_input().is_some())
        .collect();

    let mut kept = Vec::new();
    let mut group_start = 0;
    for index in 0..inputs.len() {
        let ends_group = inputs
            .get(index + 1)
            .map_or(true, |next| next.duration != inputs[index].duration);
        if !ends_group {
            continue;
        }
        let longest = inputs[group_start..=index].iter().copied().max_by(|a, b| {
            let a = a.input_delay().unwrap_or(0.0);
            let b = b.input_delay().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        });
        kept.extend(longest);
        group_start = index + 1;
    }
    kept
}

/// Cumulative input delay over every batch delivered so far. Batches are
/// filtered independently, the way the host delivered them. Always yields a
/// result, zero when no input happened.
pub fn cid(batches: &[Vec<Entry>], session_duration: f64) -> MetricResult {
    let (total, count) = batches
        .iter()
        .map(|batch| filter_input_delays(batch))
        .fold((0.0, 0), |(total, count), kept| {
            let sum: f64 = kept.iter().filter_map(|entry| entry.input_delay()).sum();
            (total + sum, count + kept.len())
        });
    MetricResult::new(MetricType::Cid, round(total, 2)).with_detail(MetricDetail::Session {
        total_entries: count,
        session_duration: round(session_duration, 0),
    })
}

/// Compute `metric` from the entries of its category. Navigation metrics
/// and CID are not handled here.
pub fn from_entries(metric: MetricType, entries: &[Entry], now: f64) -> Option<MetricResult> {
    match metric {
        MetricType::Fcp => fcp(entries),
        MetricType::Fid => fid(entries),
        MetricType::Lcp => lcp(entries),
        MetricType::Cls => cls(entries, now),
        MetricType::Cid => Some(cid(&[entries.to_vec()], now)),
        MetricType::Ttfb | MetricType::Dcl | MetricType::Load => None,
    }
}
