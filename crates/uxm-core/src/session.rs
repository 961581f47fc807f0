//! Per page load facade
//!
//! A [`PageSession`] owns everything one page load needs: the entry source,
//! the lifecycle gate shared by every observer, user timing helpers and the
//! configuration. There is no global state; create one session when the
//! page starts and drop it with the page.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use uxm_core::entry::Entry;
//! use uxm_core::host::sim::SimulatedHost;
//! use uxm_core::metrics::MetricType;
//! use uxm_core::session::PageSession;
//!
//! let host = SimulatedHost::new();
//! let page = PageSession::new(Rc::new(host.clone()));
//!
//! let values = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&values);
//! page.collect_metrics([MetricType::Fcp, MetricType::Fid], move |result| {
//!     sink.borrow_mut().push((result.metric_type, result.value));
//! });
//!
//! host.record(Entry::paint("first-contentful-paint", 640.2));
//! host.record(Entry::first_input("click", 1500.0, 1512.0));
//! host.flush();
//!
//! assert_eq!(
//!     *values.borrow(),
//!     vec![(MetricType::Fcp, 640.0), (MetricType::Fid, 12.0)]
//! );
//! ```

use futures::future::{self, FutureExt, LocalBoxFuture};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, instrument};

use crate::config::UxmConfig;
use crate::entry::{Entry, EntryType};
use crate::error::UxmError;
use crate::host::PerformanceHost;
use crate::interactive::{
    consistently_interactive, first_interactive, LongTaskRecorder, NetworkRecord,
    QuietWindowTrace,
};
use crate::lifecycle::LifecycleGate;
use crate::metrics::observe::observe;
use crate::metrics::{
    compute, navigation, MetricCallback, MetricObserver, MetricRequest, MetricResult, MetricType,
    ObserveOptions,
};
use crate::reporter::{ApiReporter, ReportSink};
use crate::score;
use crate::source::EntrySource;
use crate::user_timing::{TimingMeasurement, UserTiming};

/// Metric collection for one page load.
pub struct PageSession {
    host: Rc<dyn PerformanceHost>,
    source: EntrySource,
    gate: LifecycleGate,
    timing: UserTiming,
    config: UxmConfig,
}

impl PageSession {
    pub fn new(host: Rc<dyn PerformanceHost>) -> Self {
        Self::with_config(host, UxmConfig::default())
    }

    pub fn with_config(host: Rc<dyn PerformanceHost>, config: UxmConfig) -> Self {
        Self {
            source: EntrySource::with_buffered_timeout(
                Rc::clone(&host),
                config.observer.buffered_timeout,
            ),
            gate: LifecycleGate::new(Rc::clone(&host)),
            timing: UserTiming::new(Rc::clone(&host)),
            host,
            config,
        }
    }

    pub fn host(&self) -> &Rc<dyn PerformanceHost> {
        &self.host
    }

    pub fn source(&self) -> &EntrySource {
        &self.source
    }

    pub fn gate(&self) -> &LifecycleGate {
        &self.gate
    }

    pub fn config(&self) -> &UxmConfig {
        &self.config
    }

    pub fn user_timing(&self) -> &UserTiming {
        &self.timing
    }

    fn options_for(&self, request: &MetricRequest) -> ObserveOptions {
        let mut options = self.config.observe_options();
        match (request.metric, request.max_timeout) {
            (MetricType::Lcp, Some(timeout)) => options.lcp_max_timeout = timeout,
            (MetricType::Cid, Some(timeout)) => options.cid_max_timeout = Some(timeout),
            _ => {}
        }
        options
    }

    /// Observe every requested metric. `callback` receives each finalized
    /// result, at most once per metric.
    pub fn collect_metrics<I, F>(&self, requests: I, callback: F) -> Vec<MetricObserver>
    where
        I: IntoIterator,
        I::Item: Into<MetricRequest>,
        F: Fn(MetricResult) + 'static,
    {
        let callback: MetricCallback = Rc::new(callback);
        requests
            .into_iter()
            .map(|request| {
                let request: MetricRequest = request.into();
                observe(
                    &self.source,
                    &self.gate,
                    request.metric,
                    self.options_for(&request),
                    Rc::clone(&callback),
                )
            })
            .collect()
    }

    /// [`collect_metrics`](Self::collect_metrics) by metric name. Every name
    /// is resolved before anything is observed, so an unknown name leaves
    /// the session untouched.
    pub fn collect_metrics_by_name<F>(
        &self,
        names: &[&str],
        callback: F,
    ) -> Result<Vec<MetricObserver>, UxmError>
    where
        F: Fn(MetricResult) + 'static,
    {
        let requests = names
            .iter()
            .map(|name| name.parse::<MetricRequest>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.collect_metrics(requests, callback))
    }

    /// One-shot snapshot of `metric` from the entries recorded so far.
    ///
    /// Nothing stays subscribed once the future resolves. It resolves to
    /// `None` when the recorded entries do not yield a value yet (e.g. LCP
    /// before the first candidate) or the host cannot observe the category.
    /// Navigation metrics resolve immediately from the synchronous buffer.
    #[instrument(skip(self))]
    pub fn get_metric_by_type(
        &self,
        metric: MetricType,
    ) -> LocalBoxFuture<'static, Option<MetricResult>> {
        let Some(entry_type) = metric.entry_type() else {
            let entries = self.sync_entries(EntryType::Navigation);
            let result = navigation::compute(metric, &entries, self.host.legacy_timing());
            return future::ready(result).boxed_local();
        };

        let host = Rc::clone(&self.host);
        let entries = self.source.get_buffered(entry_type);
        async move {
            let entries = entries.await;
            let result = compute::from_entries(metric, &entries, host.now());
            debug!(%metric, count = entries.len(), found = result.is_some(), "metric snapshot");
            result
        }
        .boxed_local()
    }

    /// [`get_metric_by_type`](Self::get_metric_by_type) by metric name.
    pub fn get_metric_by_name(
        &self,
        name: &str,
    ) -> Result<LocalBoxFuture<'static, Option<MetricResult>>, UxmError> {
        Ok(self.get_metric_by_type(MetricType::canonicalize(name)?))
    }

    pub fn mark(&self, name: &str) -> Option<Entry> {
        self.timing.mark(name)
    }

    pub fn measure(
        &self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Option<TimingMeasurement> {
        self.timing.measure(name, start_mark, end_mark)
    }

    pub fn time(&self, label: &str) -> Option<Entry> {
        self.timing.time(label)
    }

    pub fn time_end(&self, label: &str) -> Option<TimingMeasurement> {
        self.timing.time_end(label)
    }

    pub fn time_end_paint<F>(&self, label: &str, callback: F)
    where
        F: FnOnce(Option<TimingMeasurement>) + 'static,
    {
        self.timing.time_end_paint(label, callback)
    }

    pub fn custom_metrics(&self) -> BTreeMap<String, f64> {
        self.timing.custom_metrics()
    }

    /// Composite speed score using the configured rank overrides.
    pub fn speed_score(&self, values: &BTreeMap<MetricType, f64>) -> Result<Option<f64>, UxmError> {
        score::speed_score(values, &self.config.rank_overrides()?)
    }

    /// Start recording long tasks. Hosts do not replay long tasks, so this
    /// has to happen early in the page session.
    pub fn record_long_tasks(&self) -> LongTaskRecorder {
        LongTaskRecorder::start(&self.source)
    }

    /// Snapshot of the interactivity inputs observed so far.
    ///
    /// Long tasks, DCL and network requests are read immediately and the
    /// trace ends now. FCP comes from the buffered paint entries, which is
    /// why the result is a future.
    #[instrument(skip(self, recorder))]
    pub fn interactivity_trace(
        &self,
        recorder: &LongTaskRecorder,
    ) -> LocalBoxFuture<'static, QuietWindowTrace> {
        let navigation_entries = self.sync_entries(EntryType::Navigation);
        let dcl = navigation::timestamp(
            MetricType::Dcl,
            &navigation_entries,
            self.host.legacy_timing(),
        )
        .unwrap_or(0.0);

        let network = self.host.supports(EntryType::Resource).then(|| {
            let mut entries = navigation_entries;
            entries.extend(self.host.entries_by_type(EntryType::Resource));
            NetworkRecord::from_entries(&entries)
        });

        let trace = QuietWindowTrace {
            fcp: 0.0,
            dcl,
            long_tasks: recorder.long_tasks(),
            network,
            trace_end: Some(self.host.now()),
        };

        let paints = self.source.get_buffered(EntryType::Paint);
        async move {
            let fcp = compute::fcp(&paints.await).map_or(0.0, |result| result.value);
            debug!(fcp, dcl = trace.dcl, tasks = trace.long_tasks.len(), "interactivity trace");
            QuietWindowTrace { fcp, ..trace }
        }
        .boxed_local()
    }

    /// First Interactive of the trace observed so far.
    pub fn first_interactive(
        &self,
        recorder: &LongTaskRecorder,
    ) -> LocalBoxFuture<'static, Option<f64>> {
        self.interactivity_trace(recorder)
            .map(|trace| first_interactive(&trace))
            .boxed_local()
    }

    /// Consistently Interactive of the trace observed so far.
    pub fn consistently_interactive(
        &self,
        recorder: &LongTaskRecorder,
    ) -> LocalBoxFuture<'static, Option<f64>> {
        self.interactivity_trace(recorder)
            .map(|trace| consistently_interactive(&trace))
            .boxed_local()
    }

    /// A reporter flushing to `url` when the page goes hidden.
    pub fn reporter(&self, url: impl Into<String>, sink: Rc<dyn ReportSink>) -> ApiReporter {
        ApiReporter::new(url, sink, &self.gate)
    }

    /// A reporter for the configured `[reporter] url`, if any.
    pub fn configured_reporter(&self, sink: Rc<dyn ReportSink>) -> Option<ApiReporter> {
        let url = self.config.reporter.url.clone()?;
        Some(self.reporter(url, sink))
    }

    fn sync_entries(&self, entry_type: EntryType) -> Vec<Entry> {
        if self.host.supports(entry_type) {
            self.host.entries_by_type(entry_type)
        } else {
            Vec::new()
        }
    }
}

impl std::fmt::Debug for PageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSession")
            .field("config", &self.config)
            .field("hidden", &self.gate.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NavigationTiming;
    use crate::error::HostError;
    use crate::host::sim::SimulatedHost;
    use crate::interactive::LongTask;
    use futures::executor::block_on;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::time::Duration;

    fn page(host: &SimulatedHost) -> PageSession {
        PageSession::new(Rc::new(host.clone()))
    }

    fn collect(page: &PageSession, names: &[&str]) -> Rc<RefCell<Vec<MetricResult>>> {
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&results);
        page.collect_metrics_by_name(names, move |result| sink.borrow_mut().push(result))
            .unwrap();
        results
    }

    #[test]
    fn test_unknown_name_observes_nothing() {
        let host = SimulatedHost::new();
        let page = page(&host);
        let err = page
            .collect_metrics_by_name(&["fcp", "tti"], |_| {})
            .unwrap_err();
        assert_eq!(err, UxmError::InvalidMetric("tti".to_string()));
        assert_eq!(host.active_observers(EntryType::Paint), 0);
    }

    #[test]
    fn test_collects_all_metrics_of_a_page_load() {
        let host = SimulatedHost::new();
        let page = page(&host);
        let results = collect(&page, &["FCP", "first-input-delay", "lcp", "cls", "ttfb"]);

        host.record(Entry::navigation(
            "https://example.com/",
            NavigationTiming {
                response_start: 180.0,
                dom_content_loaded_event_end: 900.0,
                load_event_end: 1400.0,
                ..NavigationTiming::default()
            },
        ));
        host.record(Entry::paint("first-contentful-paint", 720.0));
        host.record(Entry::largest_paint(1100.0, 0.0, 5000.0));
        host.record(Entry::layout_shift(1200.0, 0.02, false));
        host.flush();
        host.finish_loading();
        host.run_frames();
        host.record(Entry::first_input("keydown", 2000.0, 2030.0));
        host.flush();
        host.hide();

        let values: Vec<(MetricType, f64)> = results
            .borrow()
            .iter()
            .map(|result| (result.metric_type, result.value))
            .collect();
        assert_eq!(
            values,
            vec![
                (MetricType::Fcp, 720.0),
                (MetricType::Ttfb, 180.0),
                (MetricType::Fid, 30.0),
                (MetricType::Lcp, 1100.0),
                (MetricType::Cls, 0.02),
            ]
        );
    }

    #[test]
    fn test_request_timeout_overrides_config() {
        let host = SimulatedHost::new();
        let page = page(&host);
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&results);
        page.collect_metrics(
            [MetricRequest::new(MetricType::Lcp).with_max_timeout(Duration::from_millis(1000))],
            move |result: MetricResult| sink.borrow_mut().push(result.value),
        );

        host.record(Entry::largest_paint(500.0, 0.0, 10.0));
        host.advance(1000.0);
        assert_eq!(*results.borrow(), vec![500.0]);
    }

    #[test]
    fn test_config_timeout_applies() {
        let host = SimulatedHost::new();
        let config = UxmConfig::from_str("[observer]\nlcp_max_timeout = 2000").unwrap();
        let page = PageSession::with_config(Rc::new(host.clone()), config);
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&results);
        page.collect_metrics([MetricType::Lcp], move |result: MetricResult| {
            sink.borrow_mut().push(result.value)
        });

        host.record(Entry::largest_paint(500.0, 0.0, 10.0));
        host.advance(1999.0);
        assert!(results.borrow().is_empty());
        host.advance(1.0);
        assert_eq!(*results.borrow(), vec![500.0]);
    }

    #[test]
    fn test_get_metric_is_a_snapshot() {
        let host = SimulatedHost::new();
        let page = page(&host);
        host.record(Entry::largest_paint(800.0, 0.0, 1200.0));
        host.record(Entry::largest_paint(1300.0, 0.0, 4000.0));

        let lcp = page.get_metric_by_name("largest-contentful-paint").unwrap();
        host.flush();
        assert_eq!(block_on(lcp).map(|result| result.value), Some(1300.0));

        // nothing keeps observing after the snapshot
        assert_eq!(host.active_observers(EntryType::LargestContentfulPaint), 0);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_get_metric_resolves_none_without_value() {
        let host = SimulatedHost::new();
        let page = page(&host);
        let mut lcp = page.get_metric_by_type(MetricType::Lcp);

        host.advance(249.0);
        assert!((&mut lcp).now_or_never().is_none());
        host.advance(1.0);
        assert_eq!(lcp.now_or_never(), Some(None));
    }

    #[test]
    fn test_get_navigation_metric_is_immediate() {
        let host = SimulatedHost::new();
        let page = page(&host);
        host.record(Entry::navigation(
            "https://example.com/",
            NavigationTiming {
                response_start: 180.4,
                ..NavigationTiming::default()
            },
        ));

        let ttfb = page.get_metric_by_type(MetricType::Ttfb).now_or_never();
        assert_eq!(ttfb.flatten().map(|result| result.value), Some(180.0));
        let load = page.get_metric_by_type(MetricType::Load).now_or_never();
        assert_eq!(load, Some(None));
    }

    #[test]
    fn test_speed_score_uses_configured_ranks() {
        let host = SimulatedHost::new();
        let config = UxmConfig::from_str("[ranks.ttfb]\npodr = 300\nmedian = 1000\nweight = 1")
            .unwrap();
        let page = PageSession::with_config(Rc::new(host), config);

        let values = BTreeMap::from([(MetricType::Ttfb, 1000.0)]);
        assert_eq!(page.speed_score(&values), Ok(Some(0.5)));
    }

    #[test]
    fn test_interactivity_trace() {
        let host = SimulatedHost::new();
        let page = page(&host);
        let recorder = page.record_long_tasks();

        host.record(Entry::navigation(
            "https://example.com/",
            NavigationTiming {
                response_end: 300.0,
                dom_content_loaded_event_end: 1200.0,
                ..NavigationTiming::default()
            },
        ));
        host.record(Entry::paint("first-contentful-paint", 1000.0));
        host.record(Entry::resource("app.js", 350.0, 400.0));
        host.record(Entry::long_task(1200.0, 60.0));
        host.flush();
        host.set_now(12_000.0);

        let trace = page.interactivity_trace(&recorder);
        host.flush();
        let trace = block_on(trace);
        assert_eq!(
            trace,
            QuietWindowTrace::new(1000.0, 1200.0)
                .with_long_tasks(vec![LongTask::new(1200.0, 60.0)])
                .with_network(vec![
                    NetworkRecord::new(0.0, 300.0),
                    NetworkRecord::new(350.0, 400.0),
                ])
                .with_trace_end(12_000.0)
        );

        let fi = page.first_interactive(&recorder);
        host.flush();
        assert_eq!(block_on(fi), Some(1260.0));
    }

    #[test]
    fn test_configured_reporter() {
        let host = SimulatedHost::new();
        let sink: Rc<dyn ReportSink> =
            Rc::new(|_: &str, _: &str| -> Result<(), HostError> { Ok(()) });

        assert!(page(&host).configured_reporter(Rc::clone(&sink)).is_none());

        let config = UxmConfig::from_str("[reporter]\nurl = \"/rum\"").unwrap();
        let page = PageSession::with_config(Rc::new(host), config);
        assert!(page.configured_reporter(sink).is_some());
    }
}
