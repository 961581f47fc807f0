//! Metrics flowing from observers into the reporter

#[path = "common/page.rs"]
mod page;

use page::TestPage;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use uxm_core::entry::NavigationTiming;
use uxm_core::{ApiReporter, Entry, HostError, MetricType, ReportSink};

type Beacons = Rc<RefCell<Vec<Value>>>;

fn beacon_sink() -> (Rc<dyn ReportSink>, Beacons) {
    let beacons: Beacons = Rc::new(RefCell::new(Vec::new()));
    let sink_beacons = Rc::clone(&beacons);
    let sink = move |_url: &str, payload: &str| -> Result<(), HostError> {
        let value = serde_json::from_str(payload).map_err(|err| HostError::new(err.to_string()))?;
        sink_beacons.borrow_mut().push(value);
        Ok(())
    };
    (Rc::new(sink), beacons)
}

#[test]
fn test_hidden_page_sends_every_metric_once() {
    let page = TestPage::new();
    let (sink, beacons) = beacon_sink();
    let reporter = Rc::new(page.page.reporter("https://rum.example.com/collect", sink));

    let metrics_reporter = Rc::clone(&reporter);
    page.page.collect_metrics(
        [
            MetricType::Fcp,
            MetricType::Lcp,
            MetricType::Cls,
            MetricType::Ttfb,
            MetricType::Cid,
        ],
        move |result| metrics_reporter.record_metric(&result),
    );

    page.host.record(Entry::navigation(
        "https://example.com/",
        NavigationTiming {
            response_start: 95.0,
            load_event_end: 1300.0,
            ..NavigationTiming::default()
        },
    ));
    page.host.record(Entry::paint("first-contentful-paint", 610.0));
    page.host.record(Entry::largest_paint(1450.0, 0.0, 20_000.0));
    page.host.record(Entry::layout_shift(1500.0, 0.12, false));
    page.host.record(Entry::event("keydown", 2000.0, 24.0, 2018.0));
    page.host.flush();
    page.host.finish_loading();
    page.host.run_frames();
    page.host.hide();

    assert_eq!(
        *beacons.borrow(),
        vec![json!({
            "fcp": 610.0,
            "ttfb": 95.0,
            "lcp": 1450.0,
            "cls": 0.12,
            "cid": 18.0
        })]
    );
    assert!(reporter.is_sent());
}

#[test]
fn test_custom_metrics_ride_along() {
    let page = TestPage::new();
    let (sink, beacons) = beacon_sink();
    let reporter: ApiReporter = page.page.reporter("/rum", sink);

    page.host.set_now(120.0);
    page.page.time("app-init");
    page.host.set_now(470.0);
    page.page.time_end("app-init");
    reporter.record_custom_metrics(&page.page.custom_metrics());

    reporter.flush();
    assert_eq!(
        *beacons.borrow(),
        vec![json!({"app-init": 350.0, "start:app-init": 120.0})]
    );
}

#[test]
fn test_failed_delivery_is_not_fatal() {
    let page = TestPage::new();
    let sink: Rc<dyn ReportSink> = Rc::new(|_: &str, _: &str| -> Result<(), HostError> {
        Err(HostError::new("sendBeacon refused"))
    });
    let reporter = page.page.reporter("/rum", sink);
    reporter.record_metric(&uxm_core::MetricResult::new(MetricType::Fcp, 100.0));

    page.host.hide();
    assert!(reporter.is_sent());
}
