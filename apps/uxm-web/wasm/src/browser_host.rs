//! `PerformanceHost` backed by the browser
//!
//! Entries are converted through their `toJSON()` form, which already uses
//! the field names `uxm_core::Entry` deserializes. Element references of
//! paint entries are not part of that form and are read separately.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use js_sys::{Array, Object, Reflect};
use tracing::{trace, warn};
use uxm_core::entry::{ElementInfo, Entry, EntryTiming, EntryType, LegacyTiming};
use uxm_core::error::HostError;
use uxm_core::host::{
    BatchCallback, HostObserver, ListenerId, PerformanceHost, ReadyState, TimerId,
    VisibilityState,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Document, Element, Navigator, Performance, PerformanceEntry, PerformanceObserver,
    PerformanceObserverEntryList, Window,
};

/// The browser page, as seen by the metrics engine.
pub struct BrowserHost {
    window: Window,
    document: Document,
    performance: Performance,
    /// `PerformanceObserver.supportedEntryTypes`, `None` on browsers that
    /// predate it.
    supported: Option<Vec<String>>,
    visibility_listeners: RefCell<HashMap<ListenerId, Closure<dyn FnMut()>>>,
    next_listener: Cell<u64>,
}

impl BrowserHost {
    pub fn new() -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window object"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("No document object"))?;
        let performance = window
            .performance()
            .ok_or_else(|| JsValue::from_str("Performance API not available"))?;
        let supported = supported_entry_types(&window);

        Ok(Self {
            window,
            document,
            performance,
            supported,
            visibility_listeners: RefCell::new(HashMap::new()),
            next_listener: Cell::new(0),
        })
    }

    pub fn navigator(&self) -> Navigator {
        self.window.navigator()
    }

    fn last_entry(&self, name: &str, entry_type: EntryType) -> Result<Entry, HostError> {
        let entries = self
            .performance
            .get_entries_by_name_with_entry_type(name, entry_type.as_str());
        convert_entries(&entries).pop().ok_or_else(|| {
            HostError::new(format!("no {} entry named {}", entry_type, name))
        })
    }
}

fn supported_entry_types(window: &Window) -> Option<Vec<String>> {
    let constructor = Reflect::get(window, &JsValue::from_str("PerformanceObserver")).ok()?;
    if constructor.is_undefined() {
        return Some(Vec::new());
    }
    let types = Reflect::get(&constructor, &JsValue::from_str("supportedEntryTypes")).ok()?;
    let types: Array = types.dyn_into().ok()?;
    Some(types.iter().filter_map(|value| value.as_string()).collect())
}

fn js_error(err: JsValue) -> HostError {
    HostError::new(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

fn convert_entries(list: &Array) -> Vec<Entry> {
    list.iter()
        .filter_map(|value| value.dyn_into::<PerformanceEntry>().ok())
        .filter_map(|entry| convert_entry(&entry))
        .collect()
}

fn convert_entry(entry: &PerformanceEntry) -> Option<Entry> {
    let json = js_sys::JSON::stringify(&entry.to_json()).ok()?.as_string()?;
    let mut converted: Entry = match serde_json::from_str(&json) {
        Ok(converted) => converted,
        Err(err) => {
            trace!(entry_type = %entry.entry_type(), error = %err, "skipping entry");
            return None;
        }
    };

    let element = Reflect::get(entry, &JsValue::from_str("element"))
        .ok()
        .and_then(|value| value.dyn_into::<Element>().ok())
        .map(|element| element_info(&element));
    match &mut converted.timing {
        EntryTiming::LargestContentfulPaint(paint) => paint.element = element,
        EntryTiming::Element(timing) => timing.element = element,
        _ => {}
    }
    Some(converted)
}

fn element_info(element: &Element) -> ElementInfo {
    let info = ElementInfo::new(element.tag_name(), element.class_name());
    match element.parent_element() {
        Some(parent) => info.with_parent(ElementInfo::new(parent.tag_name(), parent.class_name())),
        None => info,
    }
}

struct BrowserObserver {
    observer: PerformanceObserver,
}

impl HostObserver for BrowserObserver {
    fn disconnect(&self) {
        self.observer.disconnect();
    }

    fn take_records(&self) -> Vec<Entry> {
        convert_entries(&self.observer.take_records())
    }
}

impl PerformanceHost for BrowserHost {
    fn supports(&self, entry_type: EntryType) -> bool {
        match &self.supported {
            Some(types) => types.iter().any(|name| name == entry_type.as_str()),
            None => true,
        }
    }

    fn observe(
        &self,
        entry_type: EntryType,
        buffered: bool,
        callback: BatchCallback,
    ) -> Option<Box<dyn HostObserver>> {
        let mut callback = callback;
        let closure = Closure::<dyn FnMut(PerformanceObserverEntryList, PerformanceObserver)>::new(
            move |list: PerformanceObserverEntryList, _observer: PerformanceObserver| {
                callback(convert_entries(&list.get_entries()));
            },
        );

        let observer = match PerformanceObserver::new(closure.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(err) => {
                warn!(%entry_type, error = ?err, "PerformanceObserver construction failed");
                return None;
            }
        };

        let options = Object::new();
        let configured = Reflect::set(&options, &"type".into(), &entry_type.as_str().into())
            .and_then(|_| Reflect::set(&options, &"buffered".into(), &buffered.into()))
            .and_then(|_| Reflect::get(&observer, &"observe".into()))
            .and_then(|observe| observe.dyn_into::<js_sys::Function>())
            .and_then(|observe| observe.call1(&observer, &options));
        if let Err(err) = configured {
            warn!(%entry_type, error = ?err, "observe() rejected");
            return None;
        }

        // The engine may disconnect from inside the callback, so the closure
        // must outlive the observer.
        closure.forget();
        Some(Box::new(BrowserObserver { observer }))
    }

    fn entries_by_type(&self, entry_type: EntryType) -> Vec<Entry> {
        convert_entries(&self.performance.get_entries_by_type(entry_type.as_str()))
    }

    fn now(&self) -> f64 {
        self.performance.now()
    }

    fn set_timeout(&self, delay_ms: f64, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        let handler = Closure::once_into_js(move || callback());
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                handler.unchecked_ref(),
                delay_ms.round() as i32,
            ) {
            Ok(handle) => Some(TimerId(handle as u64)),
            Err(err) => {
                warn!(error = ?err, "setTimeout failed");
                None
            }
        }
    }

    fn clear_timeout(&self, id: TimerId) {
        self.window.clear_timeout_with_handle(id.0 as i32);
    }

    fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) {
        let handler = Closure::once_into_js(move || callback());
        if let Err(err) = self.window.request_animation_frame(handler.unchecked_ref()) {
            warn!(error = ?err, "requestAnimationFrame failed");
        }
    }

    fn visibility_state(&self) -> Option<VisibilityState> {
        Some(match self.document.visibility_state() {
            web_sys::VisibilityState::Hidden => VisibilityState::Hidden,
            _ => VisibilityState::Visible,
        })
    }

    fn add_visibility_listener(
        &self,
        callback: Box<dyn FnMut(VisibilityState)>,
    ) -> Option<ListenerId> {
        let mut callback = callback;
        let document = self.document.clone();
        let closure = Closure::<dyn FnMut()>::new(move || {
            let state = match document.visibility_state() {
                web_sys::VisibilityState::Hidden => VisibilityState::Hidden,
                _ => VisibilityState::Visible,
            };
            callback(state);
        });

        if let Err(err) = self
            .document
            .add_event_listener_with_callback("visibilitychange", closure.as_ref().unchecked_ref())
        {
            warn!(error = ?err, "visibilitychange listener refused");
            return None;
        }

        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.visibility_listeners.borrow_mut().insert(id, closure);
        Some(id)
    }

    fn remove_visibility_listener(&self, id: ListenerId) {
        let Some(closure) = self.visibility_listeners.borrow_mut().remove(&id) else {
            return;
        };
        let _ = self.document.remove_event_listener_with_callback(
            "visibilitychange",
            closure.as_ref().unchecked_ref(),
        );
        // Removal can happen while the listener runs.
        closure.forget();
    }

    fn ready_state(&self) -> ReadyState {
        match self.document.ready_state().as_str() {
            "complete" => ReadyState::Complete,
            "interactive" => ReadyState::Interactive,
            _ => ReadyState::Loading,
        }
    }

    fn add_load_listener(&self, callback: Box<dyn FnOnce()>) {
        let handler = Closure::once_into_js(move || callback());
        if let Err(err) = self
            .window
            .add_event_listener_with_callback("load", handler.unchecked_ref())
        {
            warn!(error = ?err, "load listener refused");
        }
    }

    fn legacy_timing(&self) -> Option<LegacyTiming> {
        let timing = self.performance.timing();
        Some(LegacyTiming {
            navigation_start: timing.navigation_start(),
            response_start: timing.response_start(),
            dom_content_loaded_event_end: timing.dom_content_loaded_event_end(),
            load_event_end: timing.load_event_end(),
        })
    }

    fn mark(&self, name: &str) -> Result<Entry, HostError> {
        self.performance.mark(name).map_err(js_error)?;
        self.last_entry(name, EntryType::Mark)
    }

    fn measure(
        &self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Result<Entry, HostError> {
        match (start_mark, end_mark) {
            (Some(start), Some(end)) => self
                .performance
                .measure_with_start_mark_and_end_mark(name, start, end),
            (None, Some(end)) => measure_until(&self.performance, name, end),
            (Some(start), None) => self.performance.measure_with_start_mark(name, start),
            (None, None) => self.performance.measure(name),
        }
        .map_err(js_error)?;
        self.last_entry(name, EntryType::Measure)
    }
}

/// `performance.measure(name, {end})`, measuring from the time origin.
fn measure_until(performance: &Performance, name: &str, end_mark: &str) -> Result<(), JsValue> {
    let options = Object::new();
    Reflect::set(&options, &"end".into(), &end_mark.into())?;
    let measure: js_sys::Function = Reflect::get(performance, &"measure".into())?.dyn_into()?;
    measure.call2(performance, &name.into(), &options)?;
    Ok(())
}

/// Deliver a payload with `navigator.sendBeacon`.
pub fn send_beacon(navigator: &Navigator, url: &str, payload: &str) -> Result<(), HostError> {
    let queued = navigator
        .send_beacon_with_opt_str(url, Some(payload))
        .map_err(js_error)?;
    if queued {
        Ok(())
    } else {
        Err(HostError::new("sendBeacon did not queue the payload"))
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_browser_host_creation() {
        let host = BrowserHost::new().unwrap();
        assert!(host.now() >= 0.0);
        assert!(host.supports(EntryType::Mark));
        assert_ne!(host.ready_state(), ReadyState::Loading);
    }

    #[wasm_bindgen_test]
    fn test_mark_and_measure_entries() {
        let host = BrowserHost::new().unwrap();
        let mark = host.mark("uxm-test-start").unwrap();
        assert_eq!(mark.entry_type(), EntryType::Mark);

        let measure = host.measure("uxm-test", Some("uxm-test-start"), None).unwrap();
        assert_eq!(measure.entry_type(), EntryType::Measure);
        assert!(measure.duration >= 0.0);

        assert!(host.measure("uxm-missing", Some("never-marked"), None).is_err());
    }

    #[wasm_bindgen_test]
    fn test_measure_from_time_origin_to_mark() {
        let host = BrowserHost::new().unwrap();
        let end = host.mark("uxm-test-end").unwrap();

        let measure = host.measure("uxm-origin", None, Some("uxm-test-end")).unwrap();
        assert_eq!(measure.start_time, 0.0);
        assert_eq!(measure.duration, end.start_time);
    }

    #[wasm_bindgen_test]
    fn test_timers_are_scheduled() {
        let host = BrowserHost::new().unwrap();
        let id = host.set_timeout(10.0, Box::new(|| {}));
        assert!(id.is_some());
        host.clear_timeout(id.unwrap());
    }
}
