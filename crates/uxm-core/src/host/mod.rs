//! The host performance capability
//!
//! Everything the engine needs from the page lives behind
//! [`PerformanceHost`]: entry subscriptions, synchronous entry buffers,
//! timers, animation frames, visibility and load signals and the user
//! timing calls. The engine never reaches for a global; a host is handed to
//! [`PageSession`](crate::session::PageSession) when the page session starts.
//!
//! Two implementations exist:
//!
//! - [`sim::SimulatedHost`]: deterministic, virtual clock, used by tests and
//!   for replaying recorded traces
//! - `BrowserHost` in the `uxm-wasm` app, backed by `web-sys`

pub mod sim;

use crate::entry::{Entry, EntryType, LegacyTiming};
use crate::error::HostError;

/// Callback receiving one batch of entries from a host subscription.
pub type BatchCallback = Box<dyn FnMut(Vec<Entry>)>;

/// Identifier of a pending host timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Identifier of a registered visibility listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

/// A live host subscription.
pub trait HostObserver {
    /// Stop delivering batches. Must be safe to call more than once.
    fn disconnect(&self);

    /// Drain records queued for this observer but not delivered yet.
    fn take_records(&self) -> Vec<Entry>;
}

/// Capability surface of the page the engine runs in.
pub trait PerformanceHost {
    /// Whether the host can observe `entry_type` at all.
    fn supports(&self, entry_type: EntryType) -> bool;

    /// Subscribe to entries of one type. `buffered` asks the host to replay
    /// entries recorded before the subscription. Returns `None` when the host
    /// refuses the subscription.
    fn observe(
        &self,
        entry_type: EntryType,
        buffered: bool,
        callback: BatchCallback,
    ) -> Option<Box<dyn HostObserver>>;

    /// Entries already recorded for `entry_type` (synchronous path).
    fn entries_by_type(&self, entry_type: EntryType) -> Vec<Entry>;

    /// Milliseconds since navigation start.
    fn now(&self) -> f64;

    /// Schedule `callback` after `delay_ms`. `None` when the host refused,
    /// in which case the callback never runs.
    fn set_timeout(&self, delay_ms: f64, callback: Box<dyn FnOnce()>) -> Option<TimerId>;

    fn clear_timeout(&self, id: TimerId);

    fn request_animation_frame(&self, callback: Box<dyn FnOnce()>);

    /// Current visibility, `None` when the host has no visibility signal.
    fn visibility_state(&self) -> Option<VisibilityState>;

    /// Listen for visibility changes. `None` when the host has no
    /// visibility signal.
    fn add_visibility_listener(
        &self,
        callback: Box<dyn FnMut(VisibilityState)>,
    ) -> Option<ListenerId>;

    fn remove_visibility_listener(&self, id: ListenerId);

    fn ready_state(&self) -> ReadyState;

    /// Run `callback` once when the load event fires.
    fn add_load_listener(&self, callback: Box<dyn FnOnce()>);

    /// The legacy `performance.timing` object, if the host still has one.
    fn legacy_timing(&self) -> Option<LegacyTiming>;

    fn mark(&self, name: &str) -> Result<Entry, HostError>;

    fn measure(
        &self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Result<Entry, HostError>;
}
