//! Shared page fixture for integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use uxm_core::metrics::MetricObserver;
use uxm_core::{MetricResult, MetricType, PageSession, SimulatedHost};

/// Install a test-friendly subscriber once, so `RUST_LOG`-style debugging
/// works with `cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A simulated page with a session collecting every emitted result.
pub struct TestPage {
    pub host: SimulatedHost,
    pub page: PageSession,
    pub results: Rc<RefCell<Vec<MetricResult>>>,
}

impl TestPage {
    pub fn new() -> Self {
        Self::with_host(SimulatedHost::new())
    }

    pub fn with_host(host: SimulatedHost) -> Self {
        init_tracing();
        Self {
            page: PageSession::new(Rc::new(host.clone())),
            host,
            results: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn collect(&self, metrics: &[MetricType]) -> Vec<MetricObserver> {
        let results = Rc::clone(&self.results);
        self.page
            .collect_metrics(metrics.iter().copied(), move |result| {
                results.borrow_mut().push(result)
            })
    }

    pub fn values_of(&self, metric: MetricType) -> Vec<f64> {
        self.results
            .borrow()
            .iter()
            .filter(|result| result.metric_type == metric)
            .map(|result| result.value)
            .collect()
    }

    pub fn emissions(&self) -> usize {
        self.results.borrow().len()
    }
}
