//! Consistently Interactive
//!
//! The earliest point after FCP where the CPU (no long tasks) and the
//! network (at most two requests in flight) are both quiet for at least
//! [`REQUIRED_QUIET_WINDOW`].

use std::cmp::Ordering;
use tracing::trace;

use super::{LongTask, NetworkRecord, QuietWindowTrace, TimePeriod, REQUIRED_QUIET_WINDOW};

/// Requests allowed in flight during a network quiet period.
pub const ALLOWED_CONCURRENT_REQUESTS: usize = 2;

/// The pair of quiet periods whose overlap defines Consistently Interactive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuietPeriods {
    pub cpu: TimePeriod,
    pub network: TimePeriod,
}

impl QuietPeriods {
    /// Start of the span where both periods are quiet.
    pub fn overlap_start(&self) -> f64 {
        self.cpu.start.max(self.network.start)
    }
}

/// Gaps between long tasks, from time 0 to `end_time`.
pub fn cpu_quiet_periods(tasks: &[LongTask], end_time: f64) -> Vec<TimePeriod> {
    let Some(first) = tasks.first() else {
        return vec![TimePeriod::new(0.0, end_time)];
    };

    let mut periods = vec![TimePeriod::new(0.0, first.start)];
    for pair in tasks.windows(2) {
        periods.push(TimePeriod::new(pair[0].end(), pair[1].start));
    }
    if let Some(last) = tasks.last() {
        periods.push(TimePeriod::new(last.end(), end_time));
    }
    periods
}

#[derive(Debug, Clone, Copy)]
struct Boundary {
    time: f64,
    is_start: bool,
}

/// Periods with at most [`ALLOWED_CONCURRENT_REQUESTS`] requests in flight,
/// found by sweeping over request start/end boundaries. When a request ends
/// at the same time another starts, the end is processed first. Requests
/// without a positive duration are never in flight.
pub fn network_quiet_periods(records: &[NetworkRecord], end_time: f64) -> Vec<TimePeriod> {
    let mut boundaries: Vec<Boundary> = records
        .iter()
        .filter(|record| record.duration > 0.0)
        .flat_map(|record| {
            [
                Boundary {
                    time: record.start,
                    is_start: true,
                },
                Boundary {
                    time: record.end(),
                    is_start: false,
                },
            ]
        })
        .collect();
    boundaries.sort_by(|a, b| {
        a.time
            .partial_cmp(&b.time)
            .unwrap_or(Ordering::Equal)
            .then(a.is_start.cmp(&b.is_start))
    });

    let mut in_flight = 0usize;
    let mut quiet_start = 0.0;
    let mut periods = Vec::new();
    for boundary in boundaries {
        if boundary.is_start {
            if in_flight == ALLOWED_CONCURRENT_REQUESTS {
                periods.push(TimePeriod::new(quiet_start, boundary.time));
            }
            in_flight += 1;
        } else {
            in_flight = in_flight.saturating_sub(1);
            if in_flight == ALLOWED_CONCURRENT_REQUESTS {
                quiet_start = boundary.time;
            }
        }
    }

    if in_flight <= ALLOWED_CONCURRENT_REQUESTS {
        periods.push(TimePeriod::new(quiet_start, end_time));
    }
    periods
}

/// The first CPU quiet period and network quiet period that overlap for at
/// least [`REQUIRED_QUIET_WINDOW`], both ending after FCP plus that window.
pub fn find_overlapping_quiet_periods(trace: &QuietWindowTrace) -> Option<QuietPeriods> {
    let fcp = trace.fcp;
    let end_time = trace.end_time();
    let long_enough = |period: &TimePeriod| {
        period.end > fcp + REQUIRED_QUIET_WINDOW && period.duration() >= REQUIRED_QUIET_WINDOW
    };

    let cpu: Vec<TimePeriod> = cpu_quiet_periods(&trace.sorted_long_tasks(), end_time)
        .into_iter()
        .filter(long_enough)
        .collect();
    let network: Vec<TimePeriod> = match &trace.network {
        Some(records) => network_quiet_periods(records, end_time),
        None => vec![TimePeriod::new(0.0, end_time)],
    }
    .into_iter()
    .filter(long_enough)
    .collect();

    let mut cpu = cpu.into_iter();
    let mut network = network.into_iter();
    let mut cpu_candidate = cpu.next();
    let mut network_candidate = network.next();

    while let (Some(cpu_period), Some(network_period)) = (cpu_candidate, network_candidate) {
        if cpu_period.start >= network_period.start {
            if network_period.end >= cpu_period.start + REQUIRED_QUIET_WINDOW {
                return Some(QuietPeriods {
                    cpu: cpu_period,
                    network: network_period,
                });
            }
            network_candidate = network.next();
        } else {
            if cpu_period.end >= network_period.start + REQUIRED_QUIET_WINDOW {
                return Some(QuietPeriods {
                    cpu: cpu_period,
                    network: network_period,
                });
            }
            cpu_candidate = cpu.next();
        }
    }

    trace!("no overlapping quiet periods");
    None
}

/// Consistently Interactive of `trace`: the start of the quiet overlap,
/// never earlier than FCP or DOMContentLoaded. `None` until such an overlap
/// exists.
pub fn consistently_interactive(trace: &QuietWindowTrace) -> Option<f64> {
    if !trace.fcp.is_finite() || trace.fcp <= 0.0 {
        return None;
    }
    let periods = find_overlapping_quiet_periods(trace)?;
    Some(periods.overlap_start().max(trace.fcp).max(trace.dcl))
}
