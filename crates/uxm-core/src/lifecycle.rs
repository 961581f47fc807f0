//! Visibility and load lifecycle gate
//!
//! Metrics like LCP and CLS have no natural end, so they are flushed when
//! the page goes to the background for the first time. [`LifecycleGate`]
//! coalesces every such registration behind one host visibility listener
//! and runs them in ascending `order` (ties in registration order), which
//! lets a reporter registered with a higher order run after every metric
//! finalizer.
//!
//! The hidden transition is one-way: once it fired, the listener detaches
//! and later registrations are never invoked.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

use crate::host::{ListenerId, PerformanceHost, ReadyState, VisibilityState};

type HiddenCallback = Box<dyn FnOnce()>;

#[derive(Default)]
struct GateState {
    /// Keyed by (order, registration sequence).
    hidden: BTreeMap<(i32, u64), HiddenCallback>,
    listener: Option<ListenerId>,
    hidden_fired: bool,
    next_seq: u64,
    load: Vec<Box<dyn FnOnce()>>,
    load_listening: bool,
}

/// Registration returned by [`LifecycleGate::on_hidden`].
#[derive(Debug)]
pub struct HiddenSubscription {
    key: (i32, u64),
    state: Weak<RefCell<GateState>>,
}

impl HiddenSubscription {
    /// Drop the registration. A no-op once the callback ran.
    pub fn cancel(self) {
        if let Some(state) = self.state.upgrade() {
            let removed = state.borrow_mut().hidden.remove(&self.key);
            drop(removed);
        }
    }
}

/// Page visibility and load gate shared by every observer of a page session.
#[derive(Clone)]
pub struct LifecycleGate {
    host: Rc<dyn PerformanceHost>,
    state: Rc<RefCell<GateState>>,
}

impl LifecycleGate {
    pub fn new(host: Rc<dyn PerformanceHost>) -> Self {
        Self {
            host,
            state: Rc::new(RefCell::new(GateState::default())),
        }
    }

    /// Run `callback` once on the first transition to hidden.
    pub fn on_hidden<F: FnOnce() + 'static>(&self, callback: F) -> HiddenSubscription {
        self.on_hidden_ordered(0, callback)
    }

    /// Like [`on_hidden`](Self::on_hidden), running after every registration
    /// with a lower `order`.
    pub fn on_hidden_ordered<F: FnOnce() + 'static>(
        &self,
        order: i32,
        callback: F,
    ) -> HiddenSubscription {
        let (key, needs_listener) = {
            let mut state = self.state.borrow_mut();
            state.next_seq += 1;
            let key = (order, state.next_seq);
            if state.hidden_fired {
                debug!(order, "page already went hidden, registration ignored");
            } else {
                state.hidden.insert(key, Box::new(callback));
            }
            let needs_listener = !state.hidden_fired && state.listener.is_none();
            (key, needs_listener)
        };

        if needs_listener {
            self.attach_visibility_listener();
        }

        HiddenSubscription {
            key,
            state: Rc::downgrade(&self.state),
        }
    }

    fn attach_visibility_listener(&self) {
        let state = Rc::downgrade(&self.state);
        let host = Rc::downgrade(&self.host);
        let listener = self.host.add_visibility_listener(Box::new(move |visibility| {
            if visibility != VisibilityState::Hidden {
                return;
            }
            if let Some(state) = state.upgrade() {
                fire_hidden(&state, host.upgrade());
            }
        }));

        match listener {
            Some(id) => self.state.borrow_mut().listener = Some(id),
            None => debug!("host has no visibility signal, hidden callbacks will not run"),
        }
    }

    /// Whether the hidden transition already happened.
    pub fn has_fired(&self) -> bool {
        self.state.borrow().hidden_fired
    }

    /// Number of callbacks waiting for the hidden transition.
    pub fn pending_hidden(&self) -> usize {
        self.state.borrow().hidden.len()
    }

    /// Run `callback` once the page finished loading, on the next animation
    /// frame so the host can settle its navigation timing bookkeeping.
    pub fn on_page_loaded<F: FnOnce() + 'static>(&self, callback: F) {
        if self.host.ready_state() == ReadyState::Complete {
            self.host.request_animation_frame(Box::new(callback));
            return;
        }

        let needs_listener = {
            let mut state = self.state.borrow_mut();
            state.load.push(Box::new(callback));
            !std::mem::replace(&mut state.load_listening, true)
        };
        if !needs_listener {
            return;
        }

        let state = Rc::downgrade(&self.state);
        let host = Rc::downgrade(&self.host);
        self.host.add_load_listener(Box::new(move || {
            let (Some(state), Some(host)) = (state.upgrade(), host.upgrade()) else {
                return;
            };
            trace!("load event, deferring callbacks to next frame");
            host.request_animation_frame(Box::new(move || {
                let callbacks = std::mem::take(&mut state.borrow_mut().load);
                for callback in callbacks {
                    callback();
                }
            }));
        }));
    }
}

fn fire_hidden(state: &Rc<RefCell<GateState>>, host: Option<Rc<dyn PerformanceHost>>) {
    let (callbacks, listener) = {
        let mut state = state.borrow_mut();
        if state.hidden_fired {
            return;
        }
        state.hidden_fired = true;
        let callbacks = std::mem::take(&mut state.hidden);
        (callbacks, state.listener.take())
    };
    debug!(count = callbacks.len(), "page hidden, running finalizers");

    if let (Some(host), Some(id)) = (host, listener) {
        host.remove_visibility_listener(id);
    }
    // BTreeMap iteration is ascending (order, sequence)
    for (_, callback) in callbacks {
        callback();
    }
}
