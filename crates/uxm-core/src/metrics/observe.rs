//! Metric observation state machines
//!
//! [`observe`] wires one metric to the entry source and the lifecycle gate
//! and returns a [`MetricObserver`]. Every observer emits at most once:
//!
//! | Metric | Subscription | Finalizes on |
//! |--------|--------------|--------------|
//! | FCP | paint, buffered | first batch holding `first-contentful-paint` |
//! | FID | first-input, buffered | first non-empty batch |
//! | LCP | largest-contentful-paint + first-input, buffered | `max_timeout` after the last batch, first input, or hidden |
//! | CLS | layout-shift, buffered | hidden |
//! | CID | event, buffered | hidden, or `cid_max_timeout` after the last batch |
//! | TTFB/DCL/Load | none | the frame after the load event |
//!
//! Finalization marks the session finalized, drains the records the host
//! queued but did not deliver, and disconnects every subscription before the
//! value is computed. Nothing is processed afterwards. Unsupported categories
//! leave the observer open forever, which is not an error.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, instrument, trace};

use crate::entry::{Entry, EntryType};
use crate::host::{PerformanceHost, TimerId};
use crate::lifecycle::{HiddenSubscription, LifecycleGate};
use crate::source::{EntrySource, ObserverHandle};

use super::{compute, navigation, MetricResult, MetricType};

/// Default LCP candidate window.
pub const DEFAULT_LCP_MAX_TIMEOUT: Duration = Duration::from_millis(5000);

/// Receives finalized results. Shared by every metric of one
/// `collect_metrics` call.
pub type MetricCallback = Rc<dyn Fn(MetricResult)>;

/// Timing knobs of the observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOptions {
    /// LCP finalizes this long after the last candidate batch.
    pub lcp_max_timeout: Duration,
    /// CID finalizes this long after the last input batch. `None` waits for
    /// the hidden transition only.
    pub cid_max_timeout: Option<Duration>,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            lcp_max_timeout: DEFAULT_LCP_MAX_TIMEOUT,
            cid_max_timeout: None,
        }
    }
}

/// Per metric, per page load state.
struct ObservationSession {
    metric: MetricType,
    host: Weak<dyn PerformanceHost>,
    batches: Vec<Vec<Entry>>,
    finalized: bool,
    timer: Option<TimerId>,
    hidden: Option<HiddenSubscription>,
    /// The metric's own subscription first, trigger subscriptions after.
    handles: Vec<ObserverHandle>,
    callback: Option<MetricCallback>,
}

type SharedSession = Rc<RefCell<ObservationSession>>;

impl ObservationSession {
    fn entries(&self) -> Vec<Entry> {
        self.batches.concat()
    }

    fn result(&self, host: &dyn PerformanceHost) -> Option<MetricResult> {
        let now = host.now();
        match self.metric {
            MetricType::Cid => Some(compute::cid(&self.batches, now)),
            MetricType::Ttfb | MetricType::Dcl | MetricType::Load => {
                let entries = if host.supports(EntryType::Navigation) {
                    host.entries_by_type(EntryType::Navigation)
                } else {
                    Vec::new()
                };
                navigation::compute(self.metric, &entries, host.legacy_timing())
            }
            metric => compute::from_entries(metric, &self.entries(), now),
        }
    }
}

/// Live observation of one metric.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct MetricObserver {
    session: SharedSession,
}

impl MetricObserver {
    pub fn metric(&self) -> MetricType {
        self.session.borrow().metric
    }

    /// Whether the observer reached its terminal state, through emission or
    /// [`disconnect`](Self::disconnect).
    pub fn is_finalized(&self) -> bool {
        self.session.borrow().finalized
    }

    /// Number of entries accumulated so far.
    pub fn entries_seen(&self) -> usize {
        self.session.borrow().batches.iter().map(Vec::len).sum()
    }

    /// Stop observing without emitting. Safe to call repeatedly and after
    /// the observer finalized on its own.
    pub fn disconnect(&self) {
        finalize(&self.session, false);
    }
}

impl std::fmt::Debug for MetricObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.session.borrow();
        f.debug_struct("MetricObserver")
            .field("metric", &session.metric)
            .field("finalized", &session.finalized)
            .field("batches", &session.batches.len())
            .finish()
    }
}

/// Start observing `metric`. `callback` runs at most once.
#[instrument(skip(source, gate, callback))]
pub fn observe(
    source: &EntrySource,
    gate: &LifecycleGate,
    metric: MetricType,
    options: ObserveOptions,
    callback: MetricCallback,
) -> MetricObserver {
    let session = Rc::new(RefCell::new(ObservationSession {
        metric,
        host: Rc::downgrade(source.host()),
        batches: Vec::new(),
        finalized: false,
        timer: None,
        hidden: None,
        handles: Vec::new(),
        callback: Some(callback),
    }));

    if let Some(entry_type) = metric.entry_type() {
        if !source.host().supports(entry_type) {
            debug!(%metric, %entry_type, "entry type not supported, observer stays open");
            return MetricObserver { session };
        }
    }

    match metric {
        MetricType::Fcp => observe_fcp(source, &session),
        MetricType::Fid => observe_fid(source, &session),
        MetricType::Lcp => observe_lcp(source, gate, &session, options.lcp_max_timeout),
        MetricType::Cls => observe_cls(source, gate, &session),
        MetricType::Cid => observe_cid(source, gate, &session, options.cid_max_timeout),
        MetricType::Ttfb | MetricType::Dcl | MetricType::Load => {
            let loaded = Rc::clone(&session);
            gate.on_page_loaded(move || finalize(&loaded, true));
        }
    }

    MetricObserver { session }
}

fn observe_fcp(source: &EntrySource, session: &SharedSession) {
    let batch_session = Rc::clone(session);
    let handle = source.subscribe(EntryType::Paint, true, move |entries, _| {
        if !compute::has_fcp(&entries) {
            return;
        }
        accumulate(&batch_session, entries);
        finalize(&batch_session, true);
    });
    session.borrow_mut().handles.push(handle);
}

fn observe_fid(source: &EntrySource, session: &SharedSession) {
    let batch_session = Rc::clone(session);
    let handle = source.subscribe(EntryType::FirstInput, true, move |entries, _| {
        if entries.is_empty() {
            return;
        }
        accumulate(&batch_session, entries);
        finalize(&batch_session, true);
    });
    session.borrow_mut().handles.push(handle);
}

fn observe_lcp(
    source: &EntrySource,
    gate: &LifecycleGate,
    session: &SharedSession,
    max_timeout: Duration,
) {
    let batch_session = Rc::clone(session);
    let candidates = source.subscribe(EntryType::LargestContentfulPaint, true, move |entries, _| {
        if !accumulate(&batch_session, entries) {
            return;
        }
        restart_timer(&batch_session, max_timeout);
    });

    // candidate reporting stops at the first interaction
    let input_session = Rc::clone(session);
    let first_input = source.subscribe(EntryType::FirstInput, true, move |entries, _| {
        if !entries.is_empty() {
            trace!("first input, finalizing lcp");
            finalize(&input_session, true);
        }
    });

    let hidden_session = Rc::clone(session);
    let hidden = gate.on_hidden(move || finalize(&hidden_session, true));

    let mut state = session.borrow_mut();
    state.handles.push(candidates);
    state.handles.push(first_input);
    state.hidden = Some(hidden);
}

fn observe_cls(source: &EntrySource, gate: &LifecycleGate, session: &SharedSession) {
    let batch_session = Rc::clone(session);
    let handle = source.subscribe(EntryType::LayoutShift, true, move |entries, _| {
        accumulate(&batch_session, entries);
    });

    let hidden_session = Rc::clone(session);
    let hidden = gate.on_hidden(move || finalize(&hidden_session, true));

    let mut state = session.borrow_mut();
    state.handles.push(handle);
    state.hidden = Some(hidden);
}

fn observe_cid(
    source: &EntrySource,
    gate: &LifecycleGate,
    session: &SharedSession,
    max_timeout: Option<Duration>,
) {
    let batch_session = Rc::clone(session);
    let handle = source.subscribe(EntryType::Event, true, move |entries, _| {
        if !accumulate(&batch_session, entries) {
            return;
        }
        if let Some(max_timeout) = max_timeout {
            restart_timer(&batch_session, max_timeout);
        }
    });

    let hidden_session = Rc::clone(session);
    let hidden = gate.on_hidden(move || finalize(&hidden_session, true));

    let mut state = session.borrow_mut();
    state.handles.push(handle);
    state.hidden = Some(hidden);
}

/// Append a batch. Returns false once the session is finalized.
fn accumulate(session: &SharedSession, entries: Vec<Entry>) -> bool {
    let mut state = session.borrow_mut();
    if state.finalized {
        return false;
    }
    trace!(metric = %state.metric, count = entries.len(), "accumulating batch");
    if !entries.is_empty() {
        state.batches.push(entries);
    }
    true
}

fn restart_timer(session: &SharedSession, delay: Duration) {
    let (previous, host) = {
        let mut state = session.borrow_mut();
        (state.timer.take(), state.host.upgrade())
    };
    let Some(host) = host else {
        return;
    };
    if let Some(id) = previous {
        host.clear_timeout(id);
    }

    let timer_session = Rc::clone(session);
    let id = host.set_timeout(
        delay.as_secs_f64() * 1000.0,
        Box::new(move || {
            trace!("max timeout reached");
            finalize(&timer_session, true);
        }),
    );
    session.borrow_mut().timer = id;
}

/// Drive the session to its terminal state. Only the first call has any
/// effect; `emit` false cancels without invoking the callback.
fn finalize(session: &SharedSession, emit: bool) {
    let (metric, handles, timer, hidden, host) = {
        let mut state = session.borrow_mut();
        if state.finalized {
            return;
        }
        state.finalized = true;
        (
            state.metric,
            std::mem::take(&mut state.handles),
            state.timer.take(),
            state.hidden.take(),
            state.host.upgrade(),
        )
    };

    let pending = handles
        .first()
        .map(ObserverHandle::take_records)
        .unwrap_or_default();
    for handle in &handles {
        handle.disconnect();
    }
    if let (Some(id), Some(host)) = (timer, host.as_ref()) {
        host.clear_timeout(id);
    }
    if let Some(hidden) = hidden {
        hidden.cancel();
    }

    let (result, callback) = {
        let mut state = session.borrow_mut();
        let callback = state.callback.take();
        if !emit {
            debug!(%metric, "observer disconnected");
            return;
        }
        if !pending.is_empty() {
            state.batches.push(pending);
        }
        let result = host.as_ref().and_then(|host| state.result(host.as_ref()));
        (result, callback)
    };

    match (result, callback) {
        (Some(result), Some(callback)) => {
            debug!(%metric, value = result.value, "metric finalized");
            callback(result);
        }
        (None, _) => debug!(%metric, "metric finalized without a value"),
        (Some(_), None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NavigationTiming;
    use crate::host::sim::SimulatedHost;
    use crate::metrics::MetricDetail;
    use pretty_assertions::assert_eq;

    struct Harness {
        host: SimulatedHost,
        source: EntrySource,
        gate: LifecycleGate,
        results: Rc<RefCell<Vec<MetricResult>>>,
    }

    impl Harness {
        fn new(host: SimulatedHost) -> Self {
            let shared: Rc<dyn PerformanceHost> = Rc::new(host.clone());
            Self {
                source: EntrySource::new(Rc::clone(&shared)),
                gate: LifecycleGate::new(shared),
                host,
                results: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn observe(&self, metric: MetricType) -> MetricObserver {
            self.observe_with(metric, ObserveOptions::default())
        }

        fn observe_with(&self, metric: MetricType, options: ObserveOptions) -> MetricObserver {
            let results = Rc::clone(&self.results);
            observe(
                &self.source,
                &self.gate,
                metric,
                options,
                Rc::new(move |result| results.borrow_mut().push(result)),
            )
        }

        fn values(&self) -> Vec<f64> {
            self.results.borrow().iter().map(|result| result.value).collect()
        }
    }

    #[test]
    fn test_fcp_waits_for_contentful_paint() {
        let harness = Harness::new(SimulatedHost::new());
        harness.host.record(Entry::paint("first-paint", 900.0));
        let observer = harness.observe(MetricType::Fcp);

        harness.host.flush();
        assert!(harness.values().is_empty());
        assert!(!observer.is_finalized());

        harness.host.record(Entry::paint("first-contentful-paint", 1234.4));
        harness.host.flush();
        assert_eq!(harness.values(), vec![1234.0]);
        assert!(observer.is_finalized());
        assert_eq!(harness.host.active_observers(EntryType::Paint), 0);
    }

    #[test]
    fn test_fid_emits_first_input_only() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe(MetricType::Fid);
        harness.host.record(Entry::first_input("mousedown", 100.0, 150.0));
        harness.host.flush();
        harness.host.record(Entry::first_input("keydown", 5000.0, 5001.0));
        harness.host.flush();

        assert_eq!(harness.values(), vec![50.0]);
    }

    #[test]
    fn test_lcp_finalizes_after_max_timeout() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe(MetricType::Lcp);

        harness.host.record(Entry::largest_paint(800.0, 0.0, 100.0));
        harness.host.flush();
        harness.host.advance(3000.0);
        harness.host.record(Entry::largest_paint(1600.0, 0.0, 400.0));
        harness.host.advance(4999.0);
        assert!(harness.values().is_empty());

        harness.host.advance(1.0);
        assert_eq!(harness.values(), vec![1600.0]);
        assert_eq!(
            harness.results.borrow()[0].detail,
            Some(MetricDetail::LargestPaint {
                size: 400.0,
                element_selector: None
            })
        );
        assert_eq!(harness.host.pending_timers(), 0);
    }

    #[test]
    fn test_lcp_custom_timeout() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe_with(
            MetricType::Lcp,
            ObserveOptions {
                lcp_max_timeout: Duration::from_millis(10_000),
                ..ObserveOptions::default()
            },
        );
        harness.host.record(Entry::largest_paint(700.0, 0.0, 50.0));
        harness.host.advance(9000.0);
        assert!(harness.values().is_empty());
        harness.host.advance(1000.0);
        assert_eq!(harness.values(), vec![700.0]);
    }

    #[test]
    fn test_lcp_finalizes_on_first_input() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe(MetricType::Lcp);
        harness.host.record(Entry::largest_paint(1200.0, 0.0, 300.0));
        harness.host.flush();
        harness.host.record(Entry::first_input("click", 2000.0, 2004.0));
        harness.host.flush();

        assert_eq!(harness.values(), vec![1200.0]);
        assert_eq!(harness.host.active_observers(EntryType::LargestContentfulPaint), 0);
        assert_eq!(harness.host.active_observers(EntryType::FirstInput), 0);
        assert_eq!(harness.host.pending_timers(), 0);
    }

    #[test]
    fn test_lcp_hidden_takes_pending_records() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe(MetricType::Lcp);
        harness.host.record(Entry::largest_paint(800.0, 0.0, 100.0));
        harness.host.flush();
        harness.host.record(Entry::largest_paint(1250.0, 0.0, 250.0));

        harness.host.hide();
        assert_eq!(harness.values(), vec![1250.0]);

        harness.host.advance(10_000.0);
        assert_eq!(harness.values().len(), 1);
    }

    #[test]
    fn test_lcp_refused_timer_waits_for_hidden() {
        let harness = Harness::new(SimulatedHost::new().without_timers());
        harness.observe(MetricType::Lcp);
        harness.host.record(Entry::largest_paint(900.0, 0.0, 120.0));
        harness.host.flush();

        harness.host.advance(10_000.0);
        assert!(harness.values().is_empty());

        harness.host.hide();
        assert_eq!(harness.values(), vec![900.0]);
        assert_eq!(harness.host.active_observers(EntryType::LargestContentfulPaint), 0);
    }

    #[test]
    fn test_lcp_without_candidates_never_emits() {
        let harness = Harness::new(SimulatedHost::new());
        let observer = harness.observe(MetricType::Lcp);
        harness.host.hide();

        assert!(harness.values().is_empty());
        assert!(observer.is_finalized());
        assert_eq!(harness.host.active_observers(EntryType::LargestContentfulPaint), 0);
    }

    #[test]
    fn test_cls_accumulates_until_hidden() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe(MetricType::Cls);
        harness.host.record(Entry::layout_shift(100.0, 0.05, false));
        harness.host.record(Entry::layout_shift(200.0, 0.20, true));
        harness.host.flush();
        harness.host.record(Entry::layout_shift(300.0, 0.03, false));
        harness.host.set_now(4000.0);
        assert!(harness.values().is_empty());

        harness.host.hide();
        let results = harness.results.borrow();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 0.08);
        assert_eq!(
            results[0].detail,
            Some(MetricDetail::Session {
                total_entries: 3,
                session_duration: 4000.0
            })
        );
    }

    #[test]
    fn test_cls_without_visibility_signal_stays_open() {
        let harness = Harness::new(SimulatedHost::new().without_visibility());
        let observer = harness.observe(MetricType::Cls);
        harness.host.record(Entry::layout_shift(100.0, 0.1, false));
        harness.host.flush();
        harness.host.hide();

        assert!(harness.values().is_empty());
        assert!(!observer.is_finalized());
        assert_eq!(observer.entries_seen(), 1);
    }

    #[test]
    fn test_cid_emits_zero_without_input() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe(MetricType::Cid);
        harness.host.hide();
        assert_eq!(harness.values(), vec![0.0]);
    }

    #[test]
    fn test_cid_idle_timeout() {
        let harness = Harness::new(SimulatedHost::new());
        harness.observe_with(
            MetricType::Cid,
            ObserveOptions {
                cid_max_timeout: Some(Duration::from_millis(2000)),
                ..ObserveOptions::default()
            },
        );
        harness.host.record(Entry::event("keydown", 100.0, 16.0, 112.5));
        harness.host.advance(1999.0);
        assert!(harness.values().is_empty());
        harness.host.advance(1.0);
        assert_eq!(harness.values(), vec![12.5]);
    }

    #[test]
    fn test_navigation_metrics_wait_for_load() {
        let harness = Harness::new(SimulatedHost::new());
        harness.host.record(Entry::navigation(
            "https://example.com/",
            NavigationTiming {
                response_start: 120.2,
                dom_content_loaded_event_end: 800.0,
                load_event_end: 1500.0,
                ..NavigationTiming::default()
            },
        ));
        for metric in [MetricType::Ttfb, MetricType::Dcl, MetricType::Load] {
            harness.observe(metric);
        }

        harness.host.run_frames();
        assert!(harness.values().is_empty());
        harness.host.finish_loading();
        harness.host.run_frames();
        assert_eq!(harness.values(), vec![120.0, 800.0, 1500.0]);
    }

    #[test]
    fn test_unsupported_cls_ignores_hidden() {
        let harness = Harness::new(SimulatedHost::new().without_support(EntryType::LayoutShift));
        let observer = harness.observe(MetricType::Cls);
        harness.host.hide();

        assert!(!observer.is_finalized());
        assert_eq!(harness.gate.pending_hidden(), 0);
        assert_eq!(harness.host.visibility_listeners(), 0);
    }

    #[test]
    fn test_unsupported_category_never_finalizes() {
        let harness = Harness::new(SimulatedHost::new().without_support(EntryType::Paint));
        let observer = harness.observe(MetricType::Fcp);
        harness.host.record(Entry::paint("first-contentful-paint", 500.0));
        harness.host.flush();
        harness.host.hide();

        assert!(harness.values().is_empty());
        assert!(!observer.is_finalized());
        observer.disconnect();
        observer.disconnect();
    }

    #[test]
    fn test_disconnect_cancels_without_emission() {
        let harness = Harness::new(SimulatedHost::new());
        let observer = harness.observe(MetricType::Lcp);
        harness.host.record(Entry::largest_paint(900.0, 0.0, 10.0));
        harness.host.flush();

        observer.disconnect();
        observer.disconnect();
        assert!(observer.is_finalized());
        assert_eq!(harness.host.pending_timers(), 0);
        assert_eq!(harness.gate.pending_hidden(), 0);

        harness.host.advance(6000.0);
        harness.host.hide();
        assert!(harness.values().is_empty());
    }
}
