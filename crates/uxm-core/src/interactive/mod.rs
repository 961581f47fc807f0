//! Quiet-window interactivity
//!
//! Derives **First Interactive** and **Consistently Interactive** timestamps
//! from FCP, DOMContentLoaded and the long tasks of the main thread,
//! following the Lighthouse quiet-window heuristics.
//!
//! - [`first_interactive`]: the end of the first long task followed by a
//!   window free of bad task clusters, the window shrinking from 5s toward
//!   1s as the page ages
//! - [`consistently_interactive`]: the earliest overlap of a 5s CPU quiet
//!   period with a 5s network quiet period (at most 2 requests in flight)
//!
//! Both are recomputed from scratch from a [`QuietWindowTrace`]. Long tasks
//! are not replayed by hosts, so a [`LongTaskRecorder`] has to be started
//! early in the page session to collect them.
//!
//! # Example
//!
//! ```
//! use uxm_core::interactive::{first_interactive, LongTask, QuietWindowTrace};
//!
//! let trace = QuietWindowTrace::new(1000.0, 1200.0)
//!     .with_long_tasks(vec![LongTask::new(1200.0, 60.0)]);
//! assert_eq!(first_interactive(&trace), Some(1260.0));
//! ```

pub mod consistently_interactive;
pub mod first_interactive;

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use crate::entry::{Entry, EntryType};
use crate::source::{EntrySource, ObserverHandle};

pub use consistently_interactive::{consistently_interactive, find_overlapping_quiet_periods};
pub use first_interactive::{first_interactive, required_window_size};

/// Tasks shorter than this do not block interactivity.
pub const LONG_TASK_THRESHOLD: f64 = 50.0;

/// Length of quiet both CPU and network need for consistent interactivity.
pub const REQUIRED_QUIET_WINDOW: f64 = 5000.0;

/// One main-thread long task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTask {
    #[serde(alias = "startTime")]
    pub start: f64,
    pub duration: f64,
}

impl LongTask {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// A long task from a `longtask` entry. Other entries yield `None`.
    pub fn from_entry(entry: &Entry) -> Option<Self> {
        (entry.entry_type() == EntryType::Longtask)
            .then(|| Self::new(entry.start_time, entry.duration))
    }
}

/// The lifetime of one network request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    #[serde(alias = "startTime")]
    pub start: f64,
    pub duration: f64,
}

impl NetworkRecord {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Requests from `resource` entries, plus the document request itself
    /// when its navigation entry is present.
    pub fn from_entries(entries: &[Entry]) -> Vec<Self> {
        entries
            .iter()
            .filter_map(|entry| match entry.entry_type() {
                EntryType::Resource => Some(Self::new(entry.start_time, entry.duration)),
                EntryType::Navigation => entry
                    .as_navigation()
                    .filter(|nav| nav.response_end > 0.0)
                    .map(|nav| Self::new(0.0, nav.response_end)),
                _ => None,
            })
            .collect()
    }
}

/// A half-open span of time, `end` may be infinite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: f64,
    pub end: f64,
}

impl TimePeriod {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Input of the interactivity algorithms.
///
/// Field names also accept the long forms (`firstContentfulPaint`,
/// `domContentLoaded`, `resources`) so plain JS objects deserialize.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietWindowTrace {
    #[serde(alias = "firstContentfulPaint")]
    pub fcp: f64,
    #[serde(default, alias = "domContentLoaded")]
    pub dcl: f64,
    #[serde(default)]
    pub long_tasks: Vec<LongTask>,
    /// `None` treats the network as quiet for the whole trace.
    #[serde(default, alias = "resources")]
    pub network: Option<Vec<NetworkRecord>>,
    /// End of the observed trace, unbounded when `None`.
    #[serde(default)]
    pub trace_end: Option<f64>,
}

impl QuietWindowTrace {
    pub fn new(fcp: f64, dcl: f64) -> Self {
        Self {
            fcp,
            dcl,
            ..Self::default()
        }
    }

    pub fn with_long_tasks(mut self, long_tasks: Vec<LongTask>) -> Self {
        self.long_tasks = long_tasks;
        self
    }

    pub fn with_network(mut self, network: Vec<NetworkRecord>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_trace_end(mut self, trace_end: f64) -> Self {
        self.trace_end = Some(trace_end);
        self
    }

    pub(crate) fn end_time(&self) -> f64 {
        self.trace_end.unwrap_or(f64::INFINITY)
    }

    /// Long tasks at or above the threshold, in chronological order.
    pub(crate) fn sorted_long_tasks(&self) -> Vec<LongTask> {
        let mut tasks: Vec<LongTask> = self
            .long_tasks
            .iter()
            .copied()
            .filter(|task| task.duration >= LONG_TASK_THRESHOLD)
            .collect();
        tasks.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
        tasks
    }
}

/// Live long-task subscription feeding the interactivity algorithms.
pub struct LongTaskRecorder {
    tasks: Rc<RefCell<Vec<LongTask>>>,
    handle: ObserverHandle,
}

impl LongTaskRecorder {
    /// Start recording. Only tasks that happen from now on are seen.
    pub fn start(source: &EntrySource) -> Self {
        let tasks = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&tasks);
        let handle = source.subscribe(EntryType::Longtask, false, move |entries, _| {
            sink.borrow_mut()
                .extend(entries.iter().filter_map(LongTask::from_entry));
        });
        Self { tasks, handle }
    }

    pub fn is_recording(&self) -> bool {
        self.handle.is_active()
    }

    /// Every task recorded so far, including the ones the host queued but
    /// did not deliver yet.
    pub fn long_tasks(&self) -> Vec<LongTask> {
        let pending = self.handle.take_records();
        let mut tasks = self.tasks.borrow_mut();
        tasks.extend(pending.iter().filter_map(LongTask::from_entry));
        tasks.clone()
    }

    pub fn stop(&self) {
        let pending = self.handle.take_records();
        self.handle.disconnect();
        self.tasks
            .borrow_mut()
            .extend(pending.iter().filter_map(LongTask::from_entry));
    }

    pub fn trace(&self, fcp: f64, dcl: f64, network: Option<Vec<NetworkRecord>>) -> QuietWindowTrace {
        QuietWindowTrace {
            fcp,
            dcl,
            long_tasks: self.long_tasks(),
            network,
            trace_end: None,
        }
    }
}

impl std::fmt::Debug for LongTaskRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTaskRecorder")
            .field("tasks", &self.tasks.borrow().len())
            .field("recording", &self.is_recording())
            .finish()
    }
}
