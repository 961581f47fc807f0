//! Accumulating metrics reporter
//!
//! [`ApiReporter`] merges metric values into one JSON object over the life of
//! the page and hands the serialized object to a [`ReportSink`] when the page
//! goes hidden. The flush is registered on the lifecycle gate with order 1,
//! after every metric finalizer, so late metrics like LCP and CLS make it
//! into the payload.
//!
//! Transport is not handled here: the browser app wires a sink that calls
//! `navigator.sendBeacon`.

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, instrument, trace, warn};

use crate::error::HostError;
use crate::lifecycle::{HiddenSubscription, LifecycleGate};
use crate::metrics::MetricResult;

/// Hidden-gate order of the reporter flush.
pub const REPORTER_FLUSH_ORDER: i32 = 1;

/// Delivers a serialized payload to `url`.
pub trait ReportSink {
    fn send(&self, url: &str, payload: &str) -> Result<(), HostError>;
}

impl<F> ReportSink for F
where
    F: Fn(&str, &str) -> Result<(), HostError>,
{
    fn send(&self, url: &str, payload: &str) -> Result<(), HostError> {
        self(url, payload)
    }
}

struct ReporterState {
    url: String,
    values: Map<String, Value>,
    sent: bool,
    sink: Rc<dyn ReportSink>,
    before_send: Option<Box<dyn Fn(&mut Map<String, Value>)>>,
}

/// Accumulates values and sends them once the page goes hidden.
pub struct ApiReporter {
    state: Rc<RefCell<ReporterState>>,
    subscription: Option<HiddenSubscription>,
}

impl ApiReporter {
    /// Create a reporter for `url` and register its flush on `gate`.
    pub fn new(url: impl Into<String>, sink: Rc<dyn ReportSink>, gate: &LifecycleGate) -> Self {
        let state = Rc::new(RefCell::new(ReporterState {
            url: url.into(),
            values: Map::new(),
            sent: false,
            sink,
            before_send: None,
        }));

        let flush_state = Rc::clone(&state);
        let subscription = gate.on_hidden_ordered(REPORTER_FLUSH_ORDER, move || {
            send_values(&flush_state);
        });

        Self {
            state,
            subscription: Some(subscription),
        }
    }

    /// Start from `initial` instead of an empty object.
    pub fn with_initial(self, initial: Map<String, Value>) -> Self {
        self.state.borrow_mut().values = initial;
        self
    }

    /// Run `hook` on the accumulated values right before they are
    /// serialized, e.g. to record last-moment values.
    pub fn with_before_send<F: Fn(&mut Map<String, Value>) + 'static>(self, hook: F) -> Self {
        self.state.borrow_mut().before_send = Some(Box::new(hook));
        self
    }

    /// Merge `values` into the accumulated object.
    ///
    /// Arrays are appended to the array already stored under the same key;
    /// any other value replaces the stored one. Changing a key between
    /// array and scalar logs a warning and keeps the new shape.
    pub fn record(&self, values: Map<String, Value>) {
        let mut state = self.state.borrow_mut();
        for (key, value) in values {
            merge_value(&mut state.values, key, value);
        }
    }

    /// Store `result` as `metricType -> value`.
    pub fn record_metric(&self, result: &MetricResult) {
        self.record_value(result.metric_type.as_str(), result.value);
    }

    /// Store every custom metric, as returned by
    /// [`UserTiming::custom_metrics`](crate::user_timing::UserTiming::custom_metrics).
    pub fn record_custom_metrics(&self, metrics: &BTreeMap<String, f64>) {
        for (name, value) in metrics {
            self.record_value(name, *value);
        }
    }

    fn record_value(&self, key: &str, value: f64) {
        let Some(number) = serde_json::Number::from_f64(value) else {
            warn!(key, value, "non-finite metric value dropped");
            return;
        };
        let mut state = self.state.borrow_mut();
        merge_value(&mut state.values, key.to_string(), Value::Number(number));
    }

    /// Snapshot of the accumulated values.
    pub fn values(&self) -> Map<String, Value> {
        self.state.borrow().values.clone()
    }

    /// Serialize the accumulated values.
    ///
    /// # Arguments
    ///
    /// * `pretty` - Whether to pretty-print the JSON
    pub fn payload(&self, pretty: bool) -> Result<String, serde_json::Error> {
        format_values(&self.state.borrow().values, pretty)
    }

    /// Whether the values were sent at least once.
    pub fn is_sent(&self) -> bool {
        self.state.borrow().sent
    }

    /// Send now instead of waiting for the hidden transition.
    pub fn flush(&self) {
        send_values(&self.state);
    }

    /// Stop waiting for the hidden transition. Values are kept.
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

impl std::fmt::Debug for ApiReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ApiReporter")
            .field("url", &state.url)
            .field("keys", &state.values.len())
            .field("sent", &state.sent)
            .finish()
    }
}

fn merge_value(values: &mut Map<String, Value>, key: String, value: Value) {
    let previous_is_array = values.get(&key).map(Value::is_array);
    match (previous_is_array, value) {
        (Some(true), Value::Array(items)) => {
            if let Some(Value::Array(existing)) = values.get_mut(&key) {
                existing.extend(items);
            }
        }
        (Some(was_array), value) if was_array != value.is_array() => {
            warn!(%key, replacement = %value, "double metric occurrence");
            values.insert(key, value);
        }
        (_, value) => {
            trace!(%key, "recording value");
            values.insert(key, value);
        }
    }
}

fn format_values(values: &Map<String, Value>, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(values)
    } else {
        serde_json::to_string(values)
    }
}

#[instrument(skip(state))]
fn send_values(state: &Rc<RefCell<ReporterState>>) {
    let hook = {
        let mut state = state.borrow_mut();
        if state.sent {
            warn!(url = %state.url, "data is already sent");
        }
        state.sent = true;
        state.before_send.take()
    };

    // No borrow is held while the hook runs. Values recorded meanwhile are
    // merged over its result.
    if let Some(hook) = hook {
        let mut values = std::mem::take(&mut state.borrow_mut().values);
        hook(&mut values);
        let mut state = state.borrow_mut();
        let recorded = std::mem::replace(&mut state.values, values);
        for (key, value) in recorded {
            merge_value(&mut state.values, key, value);
        }
        state.before_send = Some(hook);
    }

    let (url, payload, sink) = {
        let state = state.borrow();
        (
            state.url.clone(),
            format_values(&state.values, false),
            Rc::clone(&state.sink),
        )
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize report");
            return;
        }
    };

    match sink.send(&url, &payload) {
        Ok(()) => debug!(%url, bytes = payload.len(), "report sent"),
        Err(err) => warn!(%url, error = %err, "report delivery failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimulatedHost;
    use crate::host::PerformanceHost;
    use crate::metrics::MetricType;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::rc::Weak;

    type Sent = Rc<RefCell<Vec<(String, String)>>>;

    fn collecting_sink() -> (Rc<dyn ReportSink>, Sent) {
        let sent: Sent = Rc::new(RefCell::new(Vec::new()));
        let sink_sent = Rc::clone(&sent);
        let sink = move |url: &str, payload: &str| -> Result<(), HostError> {
            sink_sent
                .borrow_mut()
                .push((url.to_string(), payload.to_string()));
            Ok(())
        };
        (Rc::new(sink), sent)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn gate(host: &SimulatedHost) -> LifecycleGate {
        let shared: Rc<dyn PerformanceHost> = Rc::new(host.clone());
        LifecycleGate::new(shared)
    }

    #[test]
    fn test_record_appends_arrays_and_replaces_scalars() {
        let host = SimulatedHost::new();
        let (sink, _) = collecting_sink();
        let reporter = ApiReporter::new("/rum", sink, &gate(&host));

        reporter.record(object(json!({"fcp": 1200, "marks": ["a"]})));
        reporter.record(object(json!({"fcp": 1100, "marks": ["b", "c"]})));

        assert_eq!(
            Value::Object(reporter.values()),
            json!({"fcp": 1100, "marks": ["a", "b", "c"]})
        );
    }

    #[test]
    fn test_shape_change_keeps_new_value() {
        let host = SimulatedHost::new();
        let (sink, _) = collecting_sink();
        let reporter = ApiReporter::new("/rum", sink, &gate(&host));

        reporter.record(object(json!({"lcp": 2000})));
        reporter.record(object(json!({"lcp": [2100]})));
        assert_eq!(Value::Object(reporter.values()), json!({"lcp": [2100]}));

        reporter.record(object(json!({"lcp": 2200})));
        assert_eq!(Value::Object(reporter.values()), json!({"lcp": 2200}));
    }

    #[test]
    fn test_flushes_after_metric_finalizers_on_hidden() {
        let host = SimulatedHost::new();
        let gate = gate(&host);
        let (sink, sent) = collecting_sink();
        let reporter = Rc::new(ApiReporter::new("https://rum.example.com", sink, &gate));

        // registered after the reporter but with a lower order
        let late = Rc::clone(&reporter);
        gate.on_hidden(move || late.record_metric(&MetricResult::new(MetricType::Cls, 0.08)));

        host.hide();
        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://rum.example.com");
        assert_eq!(sent[0].1, r#"{"cls":0.08}"#);
        assert!(reporter.is_sent());
    }

    #[test]
    fn test_before_send_runs_before_serialization() {
        let host = SimulatedHost::new();
        let (sink, sent) = collecting_sink();
        let reporter = ApiReporter::new("/rum", sink, &gate(&host))
            .with_initial(object(json!({"page": "/home"})))
            .with_before_send(|values| {
                values.insert("sessionEnd".to_string(), json!(true));
            });

        reporter.flush();
        assert_eq!(sent.borrow()[0].1, r#"{"page":"/home","sessionEnd":true}"#);
    }

    #[test]
    fn test_before_send_can_record_through_reporter() {
        let host = SimulatedHost::new();
        let (sink, sent) = collecting_sink();
        let slot: Rc<RefCell<Weak<ApiReporter>>> = Rc::new(RefCell::new(Weak::new()));
        let hook_slot = Rc::clone(&slot);
        let reporter = Rc::new(ApiReporter::new("/rum", sink, &gate(&host)).with_before_send(
            move |values| {
                values.insert("sessionEnd".to_string(), json!(true));
                if let Some(reporter) = hook_slot.borrow().upgrade() {
                    reporter.record_metric(&MetricResult::new(MetricType::Ttfb, 95.0));
                }
            },
        ));
        *slot.borrow_mut() = Rc::downgrade(&reporter);
        reporter.record_metric(&MetricResult::new(MetricType::Fcp, 900.0));

        reporter.flush();
        let payload: Value = serde_json::from_str(&sent.borrow()[0].1).unwrap();
        assert_eq!(
            payload,
            json!({"fcp": 900.0, "sessionEnd": true, "ttfb": 95.0})
        );

        // the hook stays installed for the next send
        host.hide();
        assert_eq!(sent.borrow().len(), 2);
    }

    #[test]
    fn test_second_flush_still_sends() {
        let host = SimulatedHost::new();
        let (sink, sent) = collecting_sink();
        let reporter = ApiReporter::new("/rum", sink, &gate(&host));
        reporter.record_metric(&MetricResult::new(MetricType::Fcp, 900.0));

        reporter.flush();
        host.hide();
        assert_eq!(sent.borrow().len(), 2);
    }

    #[test]
    fn test_detach_skips_hidden_flush() {
        let host = SimulatedHost::new();
        let gate = gate(&host);
        let (sink, sent) = collecting_sink();
        let mut reporter = ApiReporter::new("/rum", sink, &gate);
        reporter.detach();

        host.hide();
        assert!(sent.borrow().is_empty());
        assert!(!reporter.is_sent());
    }

    #[test]
    fn test_custom_metrics_and_payload_format() {
        let host = SimulatedHost::new();
        let (sink, _) = collecting_sink();
        let reporter = ApiReporter::new("/rum", sink, &gate(&host));
        reporter.record_custom_metrics(&BTreeMap::from([("hero".to_string(), 1500.0)]));
        reporter.record_value("bad", f64::NAN);

        assert_eq!(reporter.payload(false).unwrap(), r#"{"hero":1500.0}"#);
        assert!(reporter.payload(true).unwrap().contains('\n'));
    }
}
