//! Deterministic in-memory host
//!
//! [`SimulatedHost`] plays the part of the browser: it keeps a performance
//! timeline, a virtual clock, timers, animation frames, and explicit
//! visibility/load transitions. Nothing happens on its own; the owner drives
//! it with [`record`](SimulatedHost::record), [`flush`](SimulatedHost::flush),
//! [`advance`](SimulatedHost::advance), [`hide`](SimulatedHost::hide) and
//! friends. Batches are delivered asynchronously, on `flush`, the way a
//! `PerformanceObserver` queues them until the next task.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use uxm_core::entry::Entry;
//! use uxm_core::host::sim::SimulatedHost;
//! use uxm_core::session::PageSession;
//!
//! let host = SimulatedHost::new();
//! let page = PageSession::new(Rc::new(host.clone()));
//!
//! host.record(Entry::paint("first-contentful-paint", 812.6));
//! let fcp = page.get_metric_by_type(uxm_core::metrics::MetricType::Fcp);
//! host.flush();
//! let result = futures::executor::block_on(fcp).unwrap();
//! assert_eq!(result.value, 813.0);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::{Rc, Weak};

use super::{
    BatchCallback, HostObserver, ListenerId, PerformanceHost, ReadyState, TimerId,
    VisibilityState,
};
use crate::entry::{Entry, EntryType, LegacyTiming};
use crate::error::HostError;

type VisibilityCallback = Rc<RefCell<Box<dyn FnMut(VisibilityState)>>>;

struct SimObserver {
    entry_type: EntryType,
    callback: Rc<RefCell<BatchCallback>>,
    queue: Vec<Entry>,
}

struct PendingTimer {
    due: f64,
    callback: Box<dyn FnOnce()>,
}

struct SimState {
    now: f64,
    unsupported: BTreeSet<EntryType>,
    timeline: Vec<Entry>,
    observers: BTreeMap<u64, SimObserver>,
    timers: BTreeMap<u64, PendingTimer>,
    frames: VecDeque<Box<dyn FnOnce()>>,
    visibility: Option<VisibilityState>,
    visibility_listeners: BTreeMap<u64, VisibilityCallback>,
    ready_state: ReadyState,
    load_listeners: Vec<Box<dyn FnOnce()>>,
    legacy_timing: Option<LegacyTiming>,
    timers_refused: bool,
    next_id: u64,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A scriptable host with a virtual clock.
///
/// Cloning is cheap and every clone drives the same page.
#[derive(Clone)]
pub struct SimulatedHost {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedHost {
    /// A visible, still loading page at time 0 that supports every entry type.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                now: 0.0,
                unsupported: BTreeSet::new(),
                timeline: Vec::new(),
                observers: BTreeMap::new(),
                timers: BTreeMap::new(),
                frames: VecDeque::new(),
                visibility: Some(VisibilityState::Visible),
                visibility_listeners: BTreeMap::new(),
                ready_state: ReadyState::Loading,
                load_listeners: Vec::new(),
                legacy_timing: None,
                timers_refused: false,
                next_id: 0,
            })),
        }
    }

    /// Build a host whose timeline already holds the entries of a recorded
    /// trace (a JSON array of entries).
    pub fn from_trace_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<Entry> = serde_json::from_str(json)?;
        let host = Self::new();
        host.record_all(entries);
        Ok(host)
    }

    /// Pretend the host cannot observe `entry_type`.
    pub fn without_support(self, entry_type: EntryType) -> Self {
        self.state.borrow_mut().unsupported.insert(entry_type);
        self
    }

    /// Pretend the host has no visibility signal at all.
    pub fn without_visibility(self) -> Self {
        self.state.borrow_mut().visibility = None;
        self
    }

    /// Pretend every `setTimeout` call fails.
    pub fn without_timers(self) -> Self {
        self.state.borrow_mut().timers_refused = true;
        self
    }

    pub fn with_legacy_timing(self, timing: LegacyTiming) -> Self {
        self.state.borrow_mut().legacy_timing = Some(timing);
        self
    }

    pub fn with_ready_state(self, ready_state: ReadyState) -> Self {
        self.state.borrow_mut().ready_state = ready_state;
        self
    }

    pub fn set_now(&self, now: f64) {
        self.state.borrow_mut().now = now;
    }

    /// Append an entry to the timeline and queue it for live observers of
    /// its type. Nothing is delivered until [`flush`](Self::flush).
    pub fn record(&self, entry: Entry) {
        let mut state = self.state.borrow_mut();
        let entry_type = entry.entry_type();
        if state.unsupported.contains(&entry_type) {
            return;
        }
        for observer in state.observers.values_mut() {
            if observer.entry_type == entry_type {
                observer.queue.push(entry.clone());
            }
        }
        state.timeline.push(entry);
    }

    pub fn record_all(&self, entries: impl IntoIterator<Item = Entry>) {
        for entry in entries {
            self.record(entry);
        }
    }

    /// Deliver every queued batch, one batch per observer per round, until
    /// no observer has anything queued. Returns the number of batches.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                state
                    .observers
                    .values_mut()
                    .find(|observer| !observer.queue.is_empty())
                    .map(|observer| {
                        (
                            Rc::clone(&observer.callback),
                            std::mem::take(&mut observer.queue),
                        )
                    })
            };
            let Some((callback, batch)) = next else {
                break;
            };
            let mut callback = callback.borrow_mut();
            (*callback)(batch);
            delivered += 1;
        }
        delivered
    }

    /// Move the clock forward by `ms`, delivering queued batches and firing
    /// due timers in order along the way.
    pub fn advance(&self, ms: f64) {
        let target = self.now() + ms.max(0.0);
        self.flush();
        loop {
            let due = {
                let mut state = self.state.borrow_mut();
                let next_id = state
                    .timers
                    .iter()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by(|(a_id, a), (b_id, b)| {
                        a.due
                            .partial_cmp(&b.due)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a_id.cmp(b_id))
                    })
                    .map(|(id, _)| *id);
                next_id.and_then(|id| state.timers.remove(&id))
            };
            let Some(timer) = due else {
                break;
            };
            {
                let mut state = self.state.borrow_mut();
                state.now = state.now.max(timer.due);
            }
            (timer.callback)();
            self.flush();
        }
        self.state.borrow_mut().now = target;
    }

    /// Run the callbacks requested for the next animation frame. Frames
    /// requested while running wait for the following call.
    pub fn run_frames(&self) {
        let frames = std::mem::take(&mut self.state.borrow_mut().frames);
        for frame in frames {
            frame();
        }
        self.flush();
    }

    /// Switch the page to hidden and notify visibility listeners. Queued
    /// batches are deliberately left queued.
    pub fn hide(&self) {
        self.set_visibility(VisibilityState::Hidden);
    }

    pub fn show(&self) {
        self.set_visibility(VisibilityState::Visible);
    }

    fn set_visibility(&self, visibility: VisibilityState) {
        let listeners: Vec<VisibilityCallback> = {
            let mut state = self.state.borrow_mut();
            if state.visibility.is_none() {
                return;
            }
            state.visibility = Some(visibility);
            state.visibility_listeners.values().cloned().collect()
        };
        for listener in listeners {
            let mut listener = listener.borrow_mut();
            (*listener)(visibility);
        }
    }

    /// Fire the load event.
    pub fn finish_loading(&self) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            state.ready_state = ReadyState::Complete;
            std::mem::take(&mut state.load_listeners)
        };
        for listener in listeners {
            listener();
        }
    }

    /// Number of live observers for `entry_type`.
    pub fn active_observers(&self, entry_type: EntryType) -> usize {
        self.state
            .borrow()
            .observers
            .values()
            .filter(|observer| observer.entry_type == entry_type)
            .count()
    }

    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn visibility_listeners(&self) -> usize {
        self.state.borrow().visibility_listeners.len()
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

struct SimObserverHandle {
    id: u64,
    state: Weak<RefCell<SimState>>,
}

impl HostObserver for SimObserverHandle {
    fn disconnect(&self) {
        if let Some(state) = self.state.upgrade() {
            let removed = state.borrow_mut().observers.remove(&self.id);
            drop(removed);
        }
    }

    fn take_records(&self) -> Vec<Entry> {
        self.state
            .upgrade()
            .and_then(|state| {
                state
                    .borrow_mut()
                    .observers
                    .get_mut(&self.id)
                    .map(|observer| std::mem::take(&mut observer.queue))
            })
            .unwrap_or_default()
    }
}

impl PerformanceHost for SimulatedHost {
    fn supports(&self, entry_type: EntryType) -> bool {
        !self.state.borrow().unsupported.contains(&entry_type)
    }

    fn observe(
        &self,
        entry_type: EntryType,
        buffered: bool,
        callback: BatchCallback,
    ) -> Option<Box<dyn HostObserver>> {
        let mut state = self.state.borrow_mut();
        if state.unsupported.contains(&entry_type) {
            return None;
        }
        let queue = if buffered {
            state
                .timeline
                .iter()
                .filter(|entry| entry.entry_type() == entry_type)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        let id = state.next_id();
        state.observers.insert(
            id,
            SimObserver {
                entry_type,
                callback: Rc::new(RefCell::new(callback)),
                queue,
            },
        );
        Some(Box::new(SimObserverHandle {
            id,
            state: Rc::downgrade(&self.state),
        }))
    }

    fn entries_by_type(&self, entry_type: EntryType) -> Vec<Entry> {
        self.state
            .borrow()
            .timeline
            .iter()
            .filter(|entry| entry.entry_type() == entry_type)
            .cloned()
            .collect()
    }

    fn now(&self) -> f64 {
        self.state.borrow().now
    }

    fn set_timeout(&self, delay_ms: f64, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        let mut state = self.state.borrow_mut();
        if state.timers_refused {
            return None;
        }
        let id = state.next_id();
        let due = state.now + delay_ms.max(0.0);
        state.timers.insert(id, PendingTimer { due, callback });
        Some(TimerId(id))
    }

    fn clear_timeout(&self, id: TimerId) {
        let removed = self.state.borrow_mut().timers.remove(&id.0);
        drop(removed);
    }

    fn request_animation_frame(&self, callback: Box<dyn FnOnce()>) {
        self.state.borrow_mut().frames.push_back(callback);
    }

    fn visibility_state(&self) -> Option<VisibilityState> {
        self.state.borrow().visibility
    }

    fn add_visibility_listener(
        &self,
        callback: Box<dyn FnMut(VisibilityState)>,
    ) -> Option<ListenerId> {
        let mut state = self.state.borrow_mut();
        state.visibility?;
        let id = state.next_id();
        state
            .visibility_listeners
            .insert(id, Rc::new(RefCell::new(callback)));
        Some(ListenerId(id))
    }

    fn remove_visibility_listener(&self, id: ListenerId) {
        let removed = self.state.borrow_mut().visibility_listeners.remove(&id.0);
        drop(removed);
    }

    fn ready_state(&self) -> ReadyState {
        self.state.borrow().ready_state
    }

    fn add_load_listener(&self, callback: Box<dyn FnOnce()>) {
        self.state.borrow_mut().load_listeners.push(callback);
    }

    fn legacy_timing(&self) -> Option<LegacyTiming> {
        self.state.borrow().legacy_timing
    }

    fn mark(&self, name: &str) -> Result<Entry, HostError> {
        if !self.supports(EntryType::Mark) {
            return Err(HostError::new("performance.mark is not available"));
        }
        let entry = Entry::mark(name, self.now());
        self.record(entry.clone());
        Ok(entry)
    }

    fn measure(
        &self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Result<Entry, HostError> {
        let find_mark = |mark: &str| -> Result<f64, HostError> {
            self.entries_by_type(EntryType::Mark)
                .iter()
                .rev()
                .find(|entry| entry.name == mark)
                .map(|entry| entry.start_time)
                .ok_or_else(|| HostError::new(format!("The mark '{}' does not exist", mark)))
        };
        let start = match start_mark {
            Some(mark) => find_mark(mark)?,
            None => 0.0,
        };
        let end = match end_mark {
            Some(mark) => find_mark(mark)?,
            None => self.now(),
        };
        let entry = Entry::measure(name, start, end - start);
        self.record(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn collecting_callback(sink: &Rc<RefCell<Vec<Vec<Entry>>>>) -> BatchCallback {
        let sink = Rc::clone(sink);
        Box::new(move |batch| sink.borrow_mut().push(batch))
    }

    #[test]
    fn test_buffered_replay_is_delivered_on_flush() {
        let host = SimulatedHost::new();
        host.record(Entry::paint("first-paint", 500.0));
        host.record(Entry::paint("first-contentful-paint", 600.0));

        let batches = Rc::new(RefCell::new(Vec::new()));
        let _observer = host
            .observe(EntryType::Paint, true, collecting_callback(&batches))
            .unwrap();
        assert!(batches.borrow().is_empty());

        assert_eq!(host.flush(), 1);
        assert_eq!(batches.borrow()[0].len(), 2);
    }

    #[test]
    fn test_unbuffered_observer_only_sees_new_entries() {
        let host = SimulatedHost::new();
        host.record(Entry::long_task(100.0, 80.0));

        let batches = Rc::new(RefCell::new(Vec::new()));
        let _observer = host
            .observe(EntryType::Longtask, false, collecting_callback(&batches))
            .unwrap();
        host.record(Entry::long_task(400.0, 60.0));
        host.flush();

        assert_eq!(batches.borrow().len(), 1);
        assert_eq!(batches.borrow()[0], vec![Entry::long_task(400.0, 60.0)]);
    }

    #[test]
    fn test_take_records_drains_the_queue() {
        let host = SimulatedHost::new();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let observer = host
            .observe(EntryType::LayoutShift, true, collecting_callback(&batches))
            .unwrap();
        host.record(Entry::layout_shift(10.0, 0.1, false));

        assert_eq!(observer.take_records().len(), 1);
        assert_eq!(host.flush(), 0);
        assert!(batches.borrow().is_empty());
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let host = SimulatedHost::new();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let observer = host
            .observe(EntryType::Paint, false, collecting_callback(&batches))
            .unwrap();
        observer.disconnect();
        observer.disconnect();
        host.record(Entry::paint("first-paint", 10.0));
        host.flush();

        assert!(batches.borrow().is_empty());
        assert_eq!(host.active_observers(EntryType::Paint), 0);
    }

    #[test]
    fn test_unsupported_type_refuses_observer() {
        let host = SimulatedHost::new().without_support(EntryType::LayoutShift);
        assert!(!host.supports(EntryType::LayoutShift));
        assert!(host
            .observe(EntryType::LayoutShift, true, Box::new(|_| {}))
            .is_none());
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let host = SimulatedHost::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (delay, label) in [(300.0, "c"), (100.0, "a"), (200.0, "b")] {
            let order = Rc::clone(&order);
            host.set_timeout(delay, Box::new(move || order.borrow_mut().push(label)));
        }
        let cancelled = host
            .set_timeout(150.0, Box::new(|| panic!("cleared timer fired")))
            .unwrap();
        host.clear_timeout(cancelled);

        host.advance(250.0);
        assert_eq!(*order.borrow(), vec!["a", "b"]);
        assert_eq!(host.now(), 250.0);

        host.advance(100.0);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_timer_sees_its_due_time() {
        let host = SimulatedHost::new();
        let seen = Rc::new(Cell::new(0.0));
        let clock = host.clone();
        let seen_clone = Rc::clone(&seen);
        host.set_timeout(
            40.0,
            Box::new(move || seen_clone.set(clock.now())),
        );
        host.advance(1000.0);
        assert_eq!(seen.get(), 40.0);
    }

    #[test]
    fn test_refused_timer_never_fires() {
        let host = SimulatedHost::new().without_timers();
        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        let id = host.set_timeout(10.0, Box::new(move || fired_clone.set(true)));
        assert_eq!(id, None);

        host.advance(100.0);
        assert!(!fired.get());
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_hidden_without_visibility_support_is_silent() {
        let host = SimulatedHost::new().without_visibility();
        assert!(host.add_visibility_listener(Box::new(|_| {})).is_none());
        host.hide();
        assert_eq!(host.visibility_state(), None);
    }

    #[test]
    fn test_measure_between_marks() {
        let host = SimulatedHost::new();
        host.set_now(100.0);
        host.mark("start:render").unwrap();
        host.set_now(175.0);

        let measure = host.measure("render", Some("start:render"), None).unwrap();
        assert_eq!(measure.start_time, 100.0);
        assert_eq!(measure.duration, 75.0);

        let missing = host.measure("broken", Some("nope"), None);
        assert!(missing.is_err());
    }

    #[test]
    fn test_from_trace_json() {
        let json = r#"[
            {"entryType":"paint","name":"first-contentful-paint","startTime":900},
            {"entryType":"longtask","name":"self","startTime":1200,"duration":60}
        ]"#;
        let host = SimulatedHost::from_trace_json(json).unwrap();
        assert_eq!(host.entries_by_type(EntryType::Paint).len(), 1);
        assert_eq!(host.entries_by_type(EntryType::Longtask).len(), 1);
    }
}
