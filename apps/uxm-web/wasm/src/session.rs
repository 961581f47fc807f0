//! Page session exposed to JavaScript
//!
//! Holds the engine state for one page load in Rust. JavaScript only
//! passes names and callbacks in and receives plain objects back.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;
use uxm_core::interactive::LongTaskRecorder;
use uxm_core::metrics::MetricObserver;
use uxm_core::{
    ApiReporter, HostError, MetricResult, MetricType, PageSession, ReportSink, UxmConfig, UxmError,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::browser_host::{send_beacon, BrowserHost};

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Metrics session for the current page
#[wasm_bindgen]
pub struct UxmSession {
    page: PageSession,
    recorder: LongTaskRecorder,
    observers: RefCell<Vec<MetricObserver>>,
    reporter: Option<Rc<ApiReporter>>,
}

#[wasm_bindgen]
impl UxmSession {
    /// Start a session. `config` is an optional TOML document, see
    /// `UxmConfig`.
    #[wasm_bindgen(constructor)]
    pub fn new(config: Option<String>) -> Result<UxmSession, JsValue> {
        let config = match config {
            Some(toml) => UxmConfig::from_str(&toml)
                .map_err(|e| JsValue::from_str(&format!("Invalid configuration: {:#}", e)))?,
            None => UxmConfig::default(),
        };
        let host = BrowserHost::new()?;
        let page = PageSession::with_config(Rc::new(host), config);
        // Long tasks are only observable while subscribed, so recording
        // starts with the session.
        let recorder = page.record_long_tasks();

        Ok(Self {
            page,
            recorder,
            observers: RefCell::new(Vec::new()),
            reporter: None,
        })
    }

    /// Observe metrics by name.
    /// Callback signature: (result: {metricType, value, detail?}) => void
    #[wasm_bindgen(js_name = collectMetrics)]
    pub fn collect_metrics(
        &self,
        names: Vec<String>,
        callback: js_sys::Function,
    ) -> Result<(), JsValue> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let observers = self
            .page
            .collect_metrics_by_name(&names, move |result: MetricResult| {
                match to_js(&result) {
                    Ok(value) => {
                        let _ = callback.call1(&JsValue::NULL, &value);
                    }
                    Err(err) => tracing::warn!(error = ?err, "metric result not delivered"),
                }
            })
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        self.observers.borrow_mut().extend(observers);
        Ok(())
    }

    /// Promise of one metric computed from the entries recorded so far.
    /// Resolves to `undefined` when there is no value yet.
    #[wasm_bindgen(js_name = getMetricByType)]
    pub fn get_metric_by_type(&self, name: &str) -> Result<js_sys::Promise, JsValue> {
        let result = self
            .page
            .get_metric_by_name(name)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(future_to_promise(async move {
            match result.await {
                Some(result) => to_js(&result),
                None => Ok(JsValue::UNDEFINED),
            }
        }))
    }

    /// Send every listed metric to `url` with `navigator.sendBeacon` once
    /// the page goes hidden.
    #[wasm_bindgen(js_name = startReporting)]
    pub fn start_reporting(&mut self, url: &str, names: Vec<String>) -> Result<(), JsValue> {
        let navigator = BrowserHost::new()?.navigator();
        let sink: Rc<dyn ReportSink> =
            Rc::new(move |url: &str, payload: &str| -> Result<(), HostError> {
                send_beacon(&navigator, url, payload)
            });
        let reporter = Rc::new(self.page.reporter(url, sink));

        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let metrics_reporter = Rc::clone(&reporter);
        let observers = self
            .page
            .collect_metrics_by_name(&names, move |result| metrics_reporter.record_metric(&result))
            .map_err(|e| JsValue::from_str(&e.to_string()))?;

        self.observers.borrow_mut().extend(observers);
        self.reporter = Some(reporter);
        Ok(())
    }

    /// Add the current custom metrics to the pending report.
    #[wasm_bindgen(js_name = reportCustomMetrics)]
    pub fn report_custom_metrics(&self) -> Result<(), JsValue> {
        let reporter = self
            .reporter
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Reporting not started"))?;
        reporter.record_custom_metrics(&self.page.custom_metrics());
        Ok(())
    }

    /// Send the pending report now instead of waiting for the page to hide.
    #[wasm_bindgen(js_name = sendReport)]
    pub fn send_report(&self) -> Result<(), JsValue> {
        let reporter = self
            .reporter
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Reporting not started"))?;
        reporter.flush();
        Ok(())
    }

    pub fn mark(&self, name: &str) -> bool {
        self.page.mark(name).is_some()
    }

    /// Measure between two marks, `undefined` when the browser refused.
    pub fn measure(
        &self,
        name: &str,
        start_mark: Option<String>,
        end_mark: Option<String>,
    ) -> Result<JsValue, JsValue> {
        match self
            .page
            .measure(name, start_mark.as_deref(), end_mark.as_deref())
        {
            Some(measurement) => to_js(&measurement),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    pub fn time(&self, label: &str) -> bool {
        self.page.time(label).is_some()
    }

    #[wasm_bindgen(js_name = timeEnd)]
    pub fn time_end(&self, label: &str) -> Result<JsValue, JsValue> {
        match self.page.time_end(label) {
            Some(measurement) => to_js(&measurement),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    /// Like `timeEnd`, after the next paint.
    /// Callback signature: (measurement | undefined) => void
    #[wasm_bindgen(js_name = timeEndPaint)]
    pub fn time_end_paint(&self, label: &str, callback: js_sys::Function) {
        self.page.time_end_paint(label, move |measurement| {
            let value = match measurement {
                Some(measurement) => to_js(&measurement).unwrap_or(JsValue::UNDEFINED),
                None => JsValue::UNDEFINED,
            };
            let _ = callback.call1(&JsValue::NULL, &value);
        });
    }

    /// Marks and measures as `{name: milliseconds}`.
    #[wasm_bindgen(js_name = customMetrics)]
    pub fn custom_metrics(&self) -> Result<JsValue, JsValue> {
        to_js(&self.page.custom_metrics())
    }

    /// Weighted speed score of `{metric: value}` using the configured ranks.
    #[wasm_bindgen(js_name = speedScore)]
    pub fn speed_score(&self, values: JsValue) -> Result<Option<f64>, JsValue> {
        let values: BTreeMap<String, f64> = serde_wasm_bindgen::from_value(values)?;
        let values = values
            .into_iter()
            .map(|(name, value)| Ok((MetricType::canonicalize(&name)?, value)))
            .collect::<Result<BTreeMap<MetricType, f64>, UxmError>>()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        self.page
            .speed_score(&values)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Promise of First Interactive from the long tasks seen so far.
    #[wasm_bindgen(js_name = firstInteractive)]
    pub fn first_interactive(&self) -> js_sys::Promise {
        let interactive = self.page.first_interactive(&self.recorder);
        future_to_promise(async move {
            Ok(interactive.await.map_or(JsValue::UNDEFINED, JsValue::from))
        })
    }

    /// Promise of Consistently Interactive from the long tasks and network
    /// requests seen so far.
    #[wasm_bindgen(js_name = consistentlyInteractive)]
    pub fn consistently_interactive(&self) -> js_sys::Promise {
        let interactive = self.page.consistently_interactive(&self.recorder);
        future_to_promise(async move {
            Ok(interactive.await.map_or(JsValue::UNDEFINED, JsValue::from))
        })
    }

    /// Stop every observer started by this session.
    pub fn disconnect(&self) {
        for observer in self.observers.borrow_mut().drain(..) {
            observer.disconnect();
        }
        self.recorder.stop();
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_session_creation() {
        let session = UxmSession::new(None);
        assert!(session.is_ok());
    }

    #[wasm_bindgen_test]
    fn test_invalid_config_is_rejected() {
        let session = UxmSession::new(Some("[ranks.speed-index]\npodr = 1".to_string()));
        assert!(session.is_err());
    }

    #[wasm_bindgen_test]
    fn test_time_and_custom_metrics() {
        let session = UxmSession::new(None).unwrap();
        assert!(session.time("boot"));
        assert!(session.time_end("boot").unwrap().is_object());

        let metrics: BTreeMap<String, f64> =
            serde_wasm_bindgen::from_value(session.custom_metrics().unwrap()).unwrap();
        assert!(metrics.contains_key("boot"));
        assert!(metrics.contains_key("start:boot"));
    }

    #[wasm_bindgen_test]
    fn test_unknown_metric_name() {
        let session = UxmSession::new(None).unwrap();
        assert!(session.get_metric_by_type("speed-index").is_err());
        let names = vec!["fcp".to_string(), "tti".to_string()];
        assert!(session
            .collect_metrics(names, js_sys::Function::new_no_args(""))
            .is_err());
    }

    #[wasm_bindgen_test]
    fn test_report_requires_reporting() {
        let session = UxmSession::new(None).unwrap();
        assert!(session.send_report().is_err());
    }
}
