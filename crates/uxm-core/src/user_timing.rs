//! Custom timing through the User Timing API
//!
//! [`UserTiming`] forwards `performance.mark()` / `performance.measure()` to
//! the host so application code can inject its own metrics into the same
//! reporting pipeline. Host failures (a measure referencing an unknown mark,
//! a host without user timing) are logged and surface as `None`; they never
//! reach the caller as errors.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use uxm_core::host::sim::SimulatedHost;
//! use uxm_core::user_timing::UserTiming;
//!
//! let host = SimulatedHost::new();
//! let timing = UserTiming::new(Rc::new(host.clone()));
//!
//! host.set_now(100.0);
//! timing.time("render");
//! host.set_now(142.0);
//! let measurement = timing.time_end("render").unwrap();
//! assert_eq!(measurement.duration, 42.0);
//! assert_eq!(measurement.start_mark.as_deref(), Some("start:render"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, instrument, warn};

use crate::entry::{Entry, EntryType};
use crate::host::PerformanceHost;
use crate::metrics::round;

/// A measurement created via `performance.measure()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimingMeasurement {
    pub name: String,
    /// Duration in milliseconds
    pub duration: f64,
    /// Start time relative to navigation start (milliseconds)
    pub start_time: f64,
    pub start_mark: Option<String>,
    pub end_mark: Option<String>,
}

/// Prefix of the marks created by [`UserTiming::time`].
const TIME_MARK_PREFIX: &str = "start:";

/// User timing helpers bound to one host.
#[derive(Clone)]
pub struct UserTiming {
    host: Rc<dyn PerformanceHost>,
}

impl UserTiming {
    pub fn new(host: Rc<dyn PerformanceHost>) -> Self {
        Self { host }
    }

    /// Create a performance mark.
    ///
    /// Equivalent to `performance.mark(name)`. Returns the mark entry, or
    /// `None` if the host refused it.
    #[instrument(skip(self))]
    pub fn mark(&self, name: &str) -> Option<Entry> {
        match self.host.mark(name) {
            Ok(entry) => {
                debug!(start_time = entry.start_time, "performance mark created");
                Some(entry)
            }
            Err(err) => {
                warn!(error = %err, "performance.mark failed");
                None
            }
        }
    }

    /// Measure between two marks.
    ///
    /// # Arguments
    ///
    /// * `name` - Name for this measurement
    /// * `start_mark` - Start mark, navigation start when `None`
    /// * `end_mark` - End mark, the current time when `None`
    ///
    /// # Returns
    ///
    /// The measurement, or `None` if the host failed (for example when a
    /// mark does not exist).
    #[instrument(skip(self))]
    pub fn measure(
        &self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Option<TimingMeasurement> {
        match self.host.measure(name, start_mark, end_mark) {
            Ok(entry) => {
                debug!(duration = entry.duration, "performance measure created");
                Some(TimingMeasurement {
                    name: entry.name,
                    duration: entry.duration,
                    start_time: entry.start_time,
                    start_mark: start_mark.map(str::to_string),
                    end_mark: end_mark.map(str::to_string),
                })
            }
            Err(err) => {
                warn!(error = %err, "performance.measure failed");
                None
            }
        }
    }

    /// Start a measurement, like `console.time(label)`.
    pub fn time(&self, label: &str) -> Option<Entry> {
        self.mark(&format!("{}{}", TIME_MARK_PREFIX, label))
    }

    /// End a measurement started with [`time`](Self::time), like
    /// `console.timeEnd(label)`.
    pub fn time_end(&self, label: &str) -> Option<TimingMeasurement> {
        self.measure(label, Some(&format!("{}{}", TIME_MARK_PREFIX, label)), None)
    }

    /// End a measurement on the next animation frame, after the pending
    /// paint.
    pub fn time_end_paint<F>(&self, label: &str, callback: F)
    where
        F: FnOnce(Option<TimingMeasurement>) + 'static,
    {
        let timing = self.clone();
        let label = label.to_string();
        self.host.request_animation_frame(Box::new(move || {
            callback(timing.time_end(&label));
        }));
    }

    /// Every mark by its start time and every measure by its duration,
    /// rounded to whole milliseconds. A measure wins over a mark of the same
    /// name.
    pub fn custom_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        for entry_type in [EntryType::Mark, EntryType::Measure] {
            if !self.host.supports(entry_type) {
                continue;
            }
            for entry in self.host.entries_by_type(entry_type) {
                let value = match entry_type {
                    EntryType::Mark => entry.start_time,
                    _ => entry.duration,
                };
                metrics.insert(entry.name, round(value, 0));
            }
        }
        metrics
    }
}
