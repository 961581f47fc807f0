//! WASM bindings for user experience metrics
//!
//! This module runs the `uxm-core` engine inside the page it measures.
//! Observer state lives in Rust. JavaScript registers callbacks and reads
//! plain result objects.
//!
//! ## Architecture
//!
//! - `BrowserHost` implements the engine's host capability over `web-sys`
//! - `UxmSession` owns one page session and its observers
//! - Pure helpers (`calcSpeedScore`, `getFirstInteractive`,
//!   `getConsistentlyInteractive`) work on JSON-shaped input without a page
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { UxmSession, calcSpeedScore } from './pkg/uxm_wasm.js';
//!
//! await init();
//!
//! const session = new UxmSession();
//! session.collectMetrics(["fcp", "lcp", "cls"], (result) => console.log(result));
//! session.startReporting("/rum", ["fcp", "lcp", "fid", "cls", "ttfb"]);
//!
//! const lcp = await session.getMetricByType("lcp");
//! const ci = await session.consistentlyInteractive();
//!
//! calcSpeedScore({ fcp: 1000, lcp: 2500 }); // 0.9
//! ```

pub mod browser_host;
pub mod session;

use std::collections::BTreeMap;
use uxm_core::interactive::{consistently_interactive, first_interactive};
use uxm_core::score::speed_score_named;
use uxm_core::{QuietWindowTrace, Rank, UxmError};
use wasm_bindgen::prelude::*;

// Re-export main types for JavaScript
pub use browser_host::BrowserHost;
pub use session::UxmSession;

/// Initialize the WASM module
/// Called automatically by wasm-bindgen
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Get the library version
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Speed score from JSON text, `{metric: value}` and `{metric: rank}`
fn speed_score_json(values: &str, ranks: Option<&str>) -> Result<Option<f64>, UxmError> {
    let values: BTreeMap<String, f64> = serde_json::from_str(values)
        .map_err(|e| UxmError::InvalidScoreInput(format!("metric values: {}", e)))?;
    let ranks: BTreeMap<String, Rank> = match ranks {
        Some(ranks) => serde_json::from_str(ranks)
            .map_err(|e| UxmError::InvalidScoreInput(format!("ranks: {}", e)))?,
        None => BTreeMap::new(),
    };
    speed_score_named(&values, &ranks)
}

fn parse_trace(trace: &str) -> Result<QuietWindowTrace, UxmError> {
    serde_json::from_str(trace).map_err(|e| UxmError::InvalidTrace(e.to_string()))
}

fn js_error(err: UxmError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn js_json(value: &JsValue) -> Result<String, JsValue> {
    js_sys::JSON::stringify(value)?
        .as_string()
        .ok_or_else(|| JsValue::from_str("Value is not serializable"))
}

/// Weighted speed score in [0, 1], `undefined` when a metric could not be
/// scored
#[wasm_bindgen(js_name = calcSpeedScore)]
pub fn calc_speed_score(
    values: &JsValue,
    ranks: Option<js_sys::Object>,
) -> Result<Option<f64>, JsValue> {
    let ranks = ranks.map(|ranks| js_json(&ranks)).transpose()?;
    speed_score_json(&js_json(values)?, ranks.as_deref()).map_err(js_error)
}

/// First Interactive of a recorded trace
/// Input: `{fcp, dcl, longTasks: [{start, duration}], traceEnd?}`
#[wasm_bindgen(js_name = getFirstInteractive)]
pub fn get_first_interactive(trace: &JsValue) -> Result<Option<f64>, JsValue> {
    let trace = parse_trace(&js_json(trace)?).map_err(js_error)?;
    Ok(first_interactive(&trace))
}

/// Consistently Interactive of a recorded trace
/// Input: as `getFirstInteractive`, plus `network: [{start, duration}]`
#[wasm_bindgen(js_name = getConsistentlyInteractive)]
pub fn get_consistently_interactive(trace: &JsValue) -> Result<Option<f64>, JsValue> {
    let trace = parse_trace(&js_json(trace)?).map_err(js_error)?;
    Ok(consistently_interactive(&trace))
}


// ============================================================================
// Property tests
// ============================================================================
