use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use crate::backend::Backend;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::{Result, TransportError};

/// Reserved event name for inbound requests.
pub const REQUEST_EVENT: &str = "request";

/// Reserved event name for inbound events.
pub const EVENT_EVENT: &str = "event";

/// What a listener observes: a plain event payload, or a request payload
/// paired with the responder that answers it.
pub enum TransportEvent {
    Event(Value),
    Request(Value, Responder),
}

impl TransportEvent {
    /// The payload, whichever variant this is.
    pub fn data(&self) -> &Value {
        match self {
            TransportEvent::Event(data) => data,
            TransportEvent::Request(data, _) => data,
        }
    }
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::Event(data) => f.debug_tuple("Event").field(data).finish(),
            TransportEvent::Request(data, _) => {
                f.debug_tuple("Request").field(data).field(&"..").finish()
            }
        }
    }
}

/// Answers one inbound request.
///
/// Cloneable and callable from any thread; the response travels through
/// whatever backend the transport holds at the time of the reply. A
/// responder outliving its transport becomes a no-op.
#[derive(Clone)]
pub struct Responder {
    reply: Arc<dyn Fn(Option<Value>, Option<Value>) + Send + Sync>,
}

impl Responder {
    /// Answer with a result.
    pub fn resolve(&self, result: Value) {
        (self.reply)(Some(result), None);
    }

    /// Answer with an error.
    pub fn reject(&self, error: Value) {
        (self.reply)(None, Some(error));
    }

    /// Answer with an explicit result/error pair.
    pub fn respond(&self, result: Option<Value>, error: Option<Value>) {
        (self.reply)(result, error);
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

/// A registered listener. Returned by [`Transport::on`]; pass it back to
/// [`Transport::remove_listener`] to deregister. Returning `true` claims
/// the dispatched event.
pub type Listener = Arc<dyn Fn(&TransportEvent) -> bool + Send + Sync>;

type PendingSender = Sender<Result<Value>>;

#[derive(Default)]
struct TransportState {
    backend: Option<Arc<dyn Backend>>,
    /// Request id → response waiter. Entries are consumed exactly once.
    pending: HashMap<u64, PendingSender>,
    listeners: HashMap<String, Vec<Listener>>,
    /// Unclaimed dispatches, keyed by event name, replayed to every
    /// subsequently registered listener until one claims them.
    backlog: HashMap<String, Vec<TransportEvent>>,
    disposed: bool,
}

struct TransportInner {
    state: Mutex<TransportState>,
    next_request_id: AtomicU64,
}

/// Request/response and event multiplexer over a pluggable backend.
///
/// Request ids are unique and strictly increasing for the lifetime of one
/// transport. Dispatch follows claim-or-backlog semantics: every listener
/// registered for an event name runs in registration order, and if none
/// returns `true` the dispatch is kept and replayed to listeners
/// registered later, until claimed.
///
/// `dispose` is terminal: it clears pending requests (their handles
/// resolve to [`TransportError::Disposed`]), listeners, and the backlog,
/// and disposes the backend.
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Create a transport with no backend.
    ///
    /// `send_event` is a no-op and `send_request` fails until a backend
    /// is supplied via `set_backend`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransportInner {
                state: Mutex::new(TransportState::default()),
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a transport wired to `backend`.
    pub fn with_backend(backend: impl Backend + 'static) -> Self {
        let transport = Self::new();
        transport.set_backend(backend);
        transport
    }

    /// Install a backend, disposing any previous one.
    pub fn set_backend(&self, backend: impl Backend + 'static) {
        let backend: Arc<dyn Backend> = Arc::new(backend);

        let weak = Arc::downgrade(&self.inner);
        backend.set_receive_callback(Arc::new(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.on_message_received(&inner, envelope);
            }
        }));

        let (old, stillborn) = {
            let mut state = self.inner.lock_state();
            if state.disposed {
                (None, Some(Arc::clone(&backend)))
            } else {
                (state.backend.replace(backend), None)
            }
        };
        if let Some(old) = old {
            old.dispose();
        }
        if let Some(backend) = stillborn {
            backend.dispose();
        }
    }

    /// Register a listener for `event`.
    ///
    /// Backlogged dispatches for that event are replayed to the new
    /// listener immediately, in arrival order; each one it claims is
    /// removed. Returns the listener handle for later removal.
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&TransportEvent) -> bool + Send + Sync + 'static,
    ) -> Listener {
        let listener: Listener = Arc::new(listener);
        self.add_listener(event, Arc::clone(&listener));
        listener
    }

    /// Register an existing listener handle for `event`.
    pub fn add_listener(&self, event: &str, listener: Listener) {
        let entries = {
            let mut state = self.inner.lock_state();
            if state.disposed {
                return;
            }
            state
                .listeners
                .entry(event.to_string())
                .or_default()
                .push(Arc::clone(&listener));
            state.backlog.remove(event).unwrap_or_default()
        };
        if entries.is_empty() {
            return;
        }

        let mut unclaimed: Vec<TransportEvent> = Vec::new();
        for entry in entries {
            if !listener(&entry) {
                unclaimed.push(entry);
            }
        }
        if !unclaimed.is_empty() {
            let mut state = self.inner.lock_state();
            // Anything backlogged while we were replaying goes after the
            // surviving entries, preserving arrival order.
            let newer = state.backlog.remove(event).unwrap_or_default();
            unclaimed.extend(newer);
            if !state.disposed {
                state.backlog.insert(event.to_string(), unclaimed);
            }
        }
    }

    /// Remove one listener from one event's set.
    ///
    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, event: &str, listener: &Listener) -> bool {
        let mut state = self.inner.lock_state();
        let Some(list) = state.listeners.get_mut(event) else {
            return false;
        };
        match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Clear one event's listener set, or all sets if no name is given.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut state = self.inner.lock_state();
        match event {
            Some(event) => {
                state.listeners.remove(event);
            }
            None => state.listeners.clear(),
        }
    }

    /// Dispatch to every listener registered for `event`, in registration
    /// order. Returns whether any listener claimed it; an unclaimed
    /// dispatch is backlogged for future listeners.
    pub fn emit(&self, event: &str, payload: TransportEvent) -> bool {
        self.inner.emit(event, payload)
    }

    /// Send a fire-and-forget event. Silently a no-op without a backend.
    pub fn send_event(&self, payload: Value) -> Result<()> {
        let backend = self.inner.lock_state().backend.clone();
        match backend {
            Some(backend) => backend.send(&Envelope::event(payload)),
            None => Ok(()),
        }
    }

    /// Send a request and return a handle resolving to its response.
    ///
    /// Fails immediately without a backend. If the backend send itself
    /// fails, the pending entry is rolled back and the error returned.
    /// No timeout is built in; use [`RequestHandle::wait_timeout`] to
    /// bound the wait.
    pub fn send_request(&self, payload: Value) -> Result<RequestHandle> {
        let backend = {
            let state = self.inner.lock_state();
            if state.disposed {
                return Err(TransportError::Disposed);
            }
            state.backend.clone().ok_or(TransportError::NoBackend)?
        };

        let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.inner.lock_state().pending.insert(id, tx);

        if let Err(err) = backend.send(&Envelope::request(id, payload)) {
            self.inner.lock_state().pending.remove(&id);
            return Err(err);
        }
        Ok(RequestHandle { id, rx })
    }

    /// Tear the transport down: pending requests resolve to `Disposed`,
    /// listeners and backlog are cleared, the backend is disposed.
    /// Irreversible and idempotent.
    pub fn dispose(&self) {
        let (backend, pending) = {
            let mut state = self.inner.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.listeners.clear();
            state.backlog.clear();
            (state.backend.take(), std::mem::take(&mut state.pending))
        };
        // Dropping the senders wakes every pending waiter with Disposed.
        drop(pending);
        if let Some(backend) = backend {
            backend.dispose();
        }
        debug!("transport disposed");
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Transport")
            .field("backend", &state.backend.is_some())
            .field("pending", &state.pending.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl TransportInner {
    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &str, payload: TransportEvent) -> bool {
        let listeners = {
            let state = self.lock_state();
            if state.disposed {
                return false;
            }
            state.listeners.get(event).cloned().unwrap_or_default()
        };

        // Every listener runs, even after one claims.
        let mut claimed = false;
        for listener in &listeners {
            if listener(&payload) {
                claimed = true;
            }
        }

        if !claimed {
            let mut state = self.lock_state();
            if !state.disposed {
                state
                    .backlog
                    .entry(event.to_string())
                    .or_default()
                    .push(payload);
            }
        }
        claimed
    }

    /// Inbound dispatcher, invoked by the backend for every envelope.
    fn on_message_received(&self, this: &Arc<Self>, envelope: Envelope) {
        if self.lock_state().disposed {
            return;
        }

        match envelope.kind {
            Some(EnvelopeKind::Response) => {
                let Some(id) = envelope.id else {
                    debug!("dropping response without id");
                    return;
                };
                let Some(sender) = self.lock_state().pending.remove(&id) else {
                    // Duplicate or stale; dispose may already have
                    // cleared the table. Not an error.
                    debug!(id, "dropping response for unknown request id");
                    return;
                };
                let outcome = match (envelope.result, envelope.error) {
                    (Some(result), _) => Ok(result),
                    (None, Some(error)) => Err(TransportError::ErrorResponse(error)),
                    (None, None) => Err(TransportError::MalformedResponse),
                };
                let _ = sender.send(outcome);
            }
            Some(EnvelopeKind::Request) => {
                let Some(id) = envelope.id else {
                    debug!("dropping request without id");
                    return;
                };
                let data = envelope.data.unwrap_or(Value::Null);
                let responder = Self::responder_for(this, id);
                self.emit(REQUEST_EVENT, TransportEvent::Request(data, responder));
            }
            _ => {
                let data = envelope.data.unwrap_or(Value::Null);
                self.emit(EVENT_EVENT, TransportEvent::Event(data));
            }
        }
    }

    fn responder_for(this: &Arc<Self>, id: u64) -> Responder {
        let weak: Weak<Self> = Arc::downgrade(this);
        Responder {
            reply: Arc::new(move |result, error| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let backend = {
                    let state = inner.lock_state();
                    if state.disposed {
                        None
                    } else {
                        state.backend.clone()
                    }
                };
                let Some(backend) = backend else {
                    trace!(id, "no backend; dropping response");
                    return;
                };
                if let Err(err) = backend.send(&Envelope::response(id, result, error)) {
                    debug!(id, error = %err, "failed sending response");
                }
            }),
        }
    }
}

/// Handle to one in-flight request.
///
/// Resolved by a later inbound response envelope: `{result}` yields
/// `Ok(result)`, `{error}` yields `ErrorResponse`, neither yields
/// `MalformedResponse`. Disposing the transport resolves every
/// outstanding handle to `Disposed`.
pub struct RequestHandle {
    id: u64,
    rx: Receiver<Result<Value>>,
}

impl RequestHandle {
    /// The id assigned to this request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the response arrives.
    pub fn wait(&self) -> Result<Value> {
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Disposed),
        }
    }

    /// Block until the response arrives or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Value> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disposed),
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}
