//! User experience metrics for real user monitoring
//!
//! This crate collects page-load and interactivity metrics from a browser's
//! performance timeline: First Contentful Paint, Largest Contentful Paint,
//! First Input Delay, Cumulative Layout Shift, TTFB, DOMContentLoaded, Load
//! and Cumulative Input Delay.
//!
//! # Features
//!
//! - **Observers**: one state machine per metric, emitting at most once per
//!   page load, finalized by timers, first input or the page going hidden
//! - **Host abstraction**: everything platform specific sits behind
//!   [`PerformanceHost`]; a deterministic [`SimulatedHost`] ships for tests
//!   and trace replay
//! - **Interactivity**: First Interactive and Consistently Interactive from
//!   long tasks and network quiet windows
//! - **Speed score**: log-normal scoring and weighted aggregation
//! - **Reporting**: an accumulating reporter flushed when the page hides
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use uxm_core::{Entry, MetricType, PageSession, SimulatedHost};
//!
//! let host = SimulatedHost::new();
//! let page = PageSession::new(Rc::new(host.clone()));
//!
//! host.record(Entry::layout_shift(400.0, 0.05, false));
//! host.record(Entry::layout_shift(900.0, 0.30, true));
//! host.record(Entry::layout_shift(1500.0, 0.03, false));
//!
//! // snapshot of the shifts recorded so far
//! let cls = page.get_metric_by_type(MetricType::Cls);
//! host.flush();
//!
//! let cls = futures::executor::block_on(cls).unwrap();
//! assert_eq!(cls.value, 0.08);
//! ```
//!
//! # Configuration
//!
//! Sessions are configured using TOML files, see [`config`]:
//!
//! ```toml
//! [observer]
//! lcp_max_timeout = 5000
//!
//! [ranks.ttfb]
//! podr = 300
//! median = 1000
//! weight = 10
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod host;
pub mod interactive;
pub mod lifecycle;
pub mod metrics;
pub mod reporter;
pub mod score;
pub mod session;
pub mod source;
pub mod user_timing;

// Re-export main types for convenience
pub use config::UxmConfig;
pub use entry::{Entry, EntryType};
pub use error::{HostError, UxmError};
pub use host::sim::SimulatedHost;
pub use host::PerformanceHost;
pub use interactive::{LongTask, NetworkRecord, QuietWindowTrace};
pub use metrics::{round, MetricRequest, MetricResult, MetricType};
pub use reporter::{ApiReporter, ReportSink};
pub use score::{speed_score, Rank};
pub use session::PageSession;
