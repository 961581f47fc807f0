//! Event source adapter
//!
//! [`EntrySource`] is the one place that talks to the host's performance
//! observer capability. It gives every caller the same shape regardless of
//! what the host supports:
//!
//! - [`subscribe`](EntrySource::subscribe) always returns an
//!   [`ObserverHandle`]; on hosts that cannot observe a category the handle
//!   is a no-op and the callback is simply never invoked
//! - [`get_buffered`](EntrySource::get_buffered) resolves with the entries
//!   already recorded, never hangs, and uses the synchronous
//!   `getEntriesByType` path for mark/measure/resource/navigation

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, instrument, trace};

use crate::entry::{Entry, EntryType};
use crate::error::UxmError;
use crate::host::{HostObserver, PerformanceHost, TimerId};

/// Default time `get_buffered` waits for the host to replay entries.
pub const DEFAULT_BUFFERED_TIMEOUT: Duration = Duration::from_millis(250);

struct HandleInner {
    entry_type: Option<EntryType>,
    observer: RefCell<Option<Box<dyn HostObserver>>>,
    closed: Cell<bool>,
}

/// Handle to a subscription made through [`EntrySource`].
///
/// Clones share the same subscription. `disconnect` and `take_records` are
/// safe to call any number of times, before or after the subscription ended,
/// and on the no-op handle of an unsupported category.
#[derive(Clone)]
pub struct ObserverHandle {
    inner: Rc<HandleInner>,
}

impl ObserverHandle {
    /// A handle that observes nothing.
    pub fn noop() -> Self {
        Self::pending(None)
    }

    fn pending(entry_type: Option<EntryType>) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                entry_type,
                observer: RefCell::new(None),
                closed: Cell::new(false),
            }),
        }
    }

    fn attach(&self, observer: Box<dyn HostObserver>) {
        if self.inner.closed.get() {
            // disconnected from inside a synchronous first delivery
            observer.disconnect();
            return;
        }
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        self.inner.entry_type
    }

    /// Whether the handle still holds a live host subscription.
    pub fn is_active(&self) -> bool {
        !self.inner.closed.get() && self.inner.observer.borrow().is_some()
    }

    pub fn disconnect(&self) {
        self.inner.closed.set(true);
        let observer = self.inner.observer.borrow_mut().take();
        if let Some(observer) = observer {
            trace!(entry_type = ?self.inner.entry_type, "disconnecting observer");
            observer.disconnect();
        }
    }

    /// Records the host has queued but not delivered yet.
    pub fn take_records(&self) -> Vec<Entry> {
        match self.inner.observer.borrow().as_ref() {
            Some(observer) => observer.take_records(),
            None => Vec::new(),
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("entry_type", &self.inner.entry_type)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Uniform access to the host's performance entry stream.
#[derive(Clone)]
pub struct EntrySource {
    host: Rc<dyn PerformanceHost>,
    buffered_timeout: Duration,
}

impl EntrySource {
    pub fn new(host: Rc<dyn PerformanceHost>) -> Self {
        Self::with_buffered_timeout(host, DEFAULT_BUFFERED_TIMEOUT)
    }

    pub fn with_buffered_timeout(host: Rc<dyn PerformanceHost>, buffered_timeout: Duration) -> Self {
        Self {
            host,
            buffered_timeout,
        }
    }

    pub fn host(&self) -> &Rc<dyn PerformanceHost> {
        &self.host
    }

    /// Subscribe to `entry_type`. The callback receives each batch together
    /// with the subscription's own handle, so it can disconnect itself.
    ///
    /// Long tasks are never requested with buffered replay.
    pub fn subscribe<F>(&self, entry_type: EntryType, buffered: bool, callback: F) -> ObserverHandle
    where
        F: FnMut(Vec<Entry>, &ObserverHandle) + 'static,
    {
        if !self.host.supports(entry_type) {
            debug!(%entry_type, "entry type not supported by host, using no-op observer");
            return ObserverHandle::noop();
        }

        let handle = ObserverHandle::pending(Some(entry_type));
        let callback_handle = handle.clone();
        let mut callback = callback;
        let buffered = buffered && entry_type.supports_buffered_replay();

        let observer = self.host.observe(
            entry_type,
            buffered,
            Box::new(move |entries: Vec<Entry>| {
                if callback_handle.inner.closed.get() {
                    return;
                }
                trace!(%entry_type, count = entries.len(), "entry batch");
                callback(entries, &callback_handle);
            }),
        );

        match observer {
            Some(observer) => handle.attach(observer),
            None => {
                debug!(%entry_type, "host refused observer, using no-op observer");
                handle.inner.closed.set(true);
            }
        }
        handle
    }

    /// Subscribe by category name, e.g. `"long-task"` or `"first-paint"`.
    pub fn subscribe_named<F>(
        &self,
        name: &str,
        buffered: bool,
        callback: F,
    ) -> Result<ObserverHandle, UxmError>
    where
        F: FnMut(Vec<Entry>, &ObserverHandle) + 'static,
    {
        let entry_type = EntryType::normalize(name)?;
        Ok(self.subscribe(entry_type, buffered, callback))
    }

    /// Entries already recorded for `entry_type`.
    ///
    /// The returned future resolves with the first buffered batch, or after
    /// the buffered timeout with whatever the host has queued so far. Long
    /// tasks and unsupported categories resolve to an empty list.
    #[instrument(skip(self))]
    pub fn get_buffered(&self, entry_type: EntryType) -> LocalBoxFuture<'static, Vec<Entry>> {
        if !self.host.supports(entry_type) || !entry_type.supports_buffered_replay() {
            return future::ready(Vec::new()).boxed_local();
        }
        if entry_type.has_sync_buffer() {
            return future::ready(self.host.entries_by_type(entry_type)).boxed_local();
        }

        let (sender, receiver) = oneshot::channel::<Vec<Entry>>();
        let sender = Rc::new(RefCell::new(Some(sender)));
        let timer: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));

        let batch_sender = Rc::clone(&sender);
        let batch_timer = Rc::clone(&timer);
        let batch_host = Rc::clone(&self.host);
        let handle = self.subscribe(entry_type, true, move |entries, handle| {
            handle.disconnect();
            if let Some(id) = batch_timer.take() {
                batch_host.clear_timeout(id);
            }
            if let Some(sender) = batch_sender.borrow_mut().take() {
                let _ = sender.send(entries);
            }
        });

        if sender.borrow().is_some() {
            let timeout_sender = Rc::clone(&sender);
            let timeout_handle = handle.clone();
            let delay = self.buffered_timeout.as_secs_f64() * 1000.0;
            let id = self.host.set_timeout(
                delay,
                Box::new(move || {
                    let entries = timeout_handle.take_records();
                    timeout_handle.disconnect();
                    if let Some(sender) = timeout_sender.borrow_mut().take() {
                        debug!(%entry_type, count = entries.len(), "buffered entries timed out");
                        let _ = sender.send(entries);
                    }
                }),
            );
            timer.set(id);
        }

        async move { receiver.await.unwrap_or_default() }.boxed_local()
    }

    /// [`get_buffered`](Self::get_buffered) by category name.
    pub fn get_buffered_named(
        &self,
        name: &str,
    ) -> Result<LocalBoxFuture<'static, Vec<Entry>>, UxmError> {
        let entry_type = EntryType::normalize(name)?;
        Ok(self.get_buffered(entry_type))
    }
}
