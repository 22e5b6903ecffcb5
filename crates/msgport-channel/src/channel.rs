use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use msgport_port::{MessagePort, PortMessage};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{ChannelError, Result};
use crate::wire::{probe_token, WireMessage, DEFAULT_PROBE_INTERVAL, PROBE_METHOD};

/// Configuration for channel behavior.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Interval between readiness probes. Default: 50ms.
    pub probe_interval: Duration,
    /// Maximum number of probes before giving up. `None` (the default)
    /// probes until confirmed or destroyed.
    pub max_probes: Option<u32>,
    /// If set, inbound messages from any other origin are dropped.
    pub allowed_origin: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            max_probes: None,
            allowed_origin: None,
        }
    }
}

type MethodCallback = Arc<dyn Fn(&Value) + Send + Sync>;
type ReadyCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ChannelState {
    confirmed: bool,
    destroyed: bool,
    /// Outbound sends buffered until confirmation, flushed FIFO once.
    outbound: VecDeque<(String, Value)>,
    /// Set while `confirm` drains the buffer. Sends observing it keep
    /// buffering, so nothing can overtake the flush.
    flushing: bool,
    listeners: HashMap<String, Vec<MethodCallback>>,
    /// Inbound payloads received before any listener existed, per method.
    inbound_backlog: HashMap<String, Vec<Value>>,
    ready_callbacks: Vec<ReadyCallback>,
}

struct ChannelInner {
    scope: String,
    token: String,
    port: Arc<dyn MessagePort>,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    /// Signaled on the Unconfirmed → Confirmed transition and on destroy.
    ready_cv: Condvar,
    probe_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Scope-isolated bidirectional channel over a raw message port.
///
/// Both endpoints of a channel pair open a `MessageChannel` with the same
/// scope on their side of a port pair. Each side announces itself with
/// periodic probes carrying a locally unique token; receiving your own
/// token echoed back proves a live listener exists on the far end, and
/// receiving the far end's token means you must echo it so *they* can
/// reach the same conclusion. This handles arbitrary startup-order races
/// between the two endpoints.
///
/// Sends issued before confirmation are buffered and flushed FIFO exactly
/// once when the handshake completes. The channel is a scoped resource:
/// `destroy` (also run on drop) stops the probe loop and detaches from
/// the port.
pub struct MessageChannel {
    inner: Arc<ChannelInner>,
}

impl MessageChannel {
    /// Open a channel on `port` with default configuration.
    pub fn open(scope: impl Into<String>, port: Arc<dyn MessagePort>) -> Self {
        Self::open_with_config(scope, port, ChannelConfig::default())
    }

    /// Open a channel on `port` with explicit configuration.
    pub fn open_with_config(
        scope: impl Into<String>,
        port: Arc<dyn MessagePort>,
        config: ChannelConfig,
    ) -> Self {
        let inner = Arc::new(ChannelInner {
            scope: scope.into(),
            token: probe_token(),
            port: Arc::clone(&port),
            config,
            state: Mutex::new(ChannelState::default()),
            ready_cv: Condvar::new(),
            probe_thread: Mutex::new(None),
        });

        // Attach the inbound handler before the first probe goes out so a
        // fast remote echo cannot be missed.
        let weak = Arc::downgrade(&inner);
        port.set_on_message(Arc::new(move |msg| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_raw(msg);
            }
        }));

        let weak = Arc::downgrade(&inner);
        let thread = std::thread::Builder::new()
            .name(format!("msgport-probe-{}", inner.scope))
            .spawn(move || probe_loop(weak));
        match thread {
            Ok(handle) => {
                *inner
                    .probe_thread
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => debug!(error = %err, "failed to spawn probe thread"),
        }

        Self { inner }
    }

    /// The scope this channel is partitioned under.
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Whether the readiness handshake has completed.
    pub fn is_confirmed(&self) -> bool {
        self.inner.lock_state().confirmed
    }

    /// Send `params` to the remote endpoint under `method`.
    ///
    /// Delivered immediately once confirmed; buffered FIFO until then.
    /// Scope filtering happens on the receiving side only.
    pub fn send(&self, method: &str, params: Value) -> Result<()> {
        {
            let mut state = self.inner.lock_state();
            if state.destroyed {
                return Err(ChannelError::Destroyed);
            }
            if (!state.confirmed || state.flushing) && method != PROBE_METHOD {
                state.outbound.push_back((method.to_string(), params));
                return Ok(());
            }
        }
        self.inner.post_wire(method, &params)
    }

    /// Register a callback for a method name.
    ///
    /// Any payloads received for `method` before a listener existed are
    /// replayed to the new callback immediately, in arrival order, and
    /// the backlog for that method is cleared.
    pub fn listen(&self, method: &str, callback: impl Fn(&Value) + Send + Sync + 'static) {
        let callback: MethodCallback = Arc::new(callback);
        let backlog = {
            let mut state = self.inner.lock_state();
            if state.destroyed {
                return;
            }
            state
                .listeners
                .entry(method.to_string())
                .or_default()
                .push(Arc::clone(&callback));
            state.inbound_backlog.remove(method).unwrap_or_default()
        };
        for params in &backlog {
            callback(params);
        }
    }

    /// Invoke `callback` once the channel is confirmed.
    ///
    /// Fires immediately if already confirmed; otherwise fires exactly
    /// once on the Unconfirmed → Confirmed transition. Never fires after
    /// `destroy`.
    pub fn ready(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.lock_state();
        if state.confirmed {
            drop(state);
            callback();
        } else if !state.destroyed {
            state.ready_callbacks.push(Box::new(callback));
        }
    }

    /// Block until the channel is confirmed, or `timeout` elapses.
    ///
    /// Returns `true` if confirmed. Returns `false` on timeout or if the
    /// channel is destroyed while waiting.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock_state();
        loop {
            if state.confirmed {
                return true;
            }
            if state.destroyed {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .ready_cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Tear the channel down: stop the probe loop, reset to unconfirmed,
    /// and detach from the port. Idempotent.
    pub fn destroy(&self) {
        let already = {
            let mut state = self.inner.lock_state();
            let already = state.destroyed;
            state.destroyed = true;
            state.confirmed = false;
            state.outbound.clear();
            state.ready_callbacks.clear();
            already
        };
        self.inner.ready_cv.notify_all();
        if already {
            return;
        }

        self.inner.port.clear_on_message();
        let handle = self
            .inner
            .probe_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        debug!(scope = %self.inner.scope, "channel destroyed");
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("MessageChannel")
            .field("scope", &self.inner.scope)
            .field("confirmed", &state.confirmed)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl ChannelInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post_wire(&self, method: &str, params: &Value) -> Result<()> {
        let wire = WireMessage::new(&self.scope, method, params.clone());
        let payload = serde_json::to_string(&wire)?;
        self.port.post(&payload)?;
        Ok(())
    }

    /// Inbound path. Anything that isn't well-formed channel traffic for
    /// this scope is dropped without surfacing an error.
    fn handle_raw(&self, msg: PortMessage) {
        if let Some(allowed) = &self.config.allowed_origin {
            if *allowed != msg.origin {
                trace!(origin = %msg.origin, "dropping message from unexpected origin");
                return;
            }
        }

        let wire: WireMessage = match serde_json::from_str(&msg.payload) {
            Ok(wire) => wire,
            Err(err) => {
                trace!(error = %err, "dropping unparseable payload");
                return;
            }
        };
        if !wire.msgport || wire.scope != self.scope {
            trace!(scope = %wire.scope, "dropping message for other scope");
            return;
        }

        if wire.method == PROBE_METHOD {
            self.handle_probe(wire.params);
            return;
        }

        let callbacks = {
            let mut state = self.lock_state();
            if state.destroyed {
                return;
            }
            match state.listeners.get(&wire.method) {
                Some(list) if !list.is_empty() => list.clone(),
                _ => {
                    state
                        .inbound_backlog
                        .entry(wire.method)
                        .or_default()
                        .push(wire.params);
                    return;
                }
            }
        };
        for callback in &callbacks {
            callback(&wire.params);
        }
    }

    fn handle_probe(&self, params: Value) {
        let Some(token) = params.as_str() else {
            trace!("dropping probe without token");
            return;
        };
        if token == self.token {
            // Our own token came back: a live listener exists remotely.
            self.confirm();
        } else if let Err(err) = self.post_wire(PROBE_METHOD, &params) {
            trace!(error = %err, "probe echo failed");
        }
    }

    /// Unconfirmed → Confirmed transition. Flushes the outbound buffer
    /// FIFO exactly once and fires queued ready callbacks. The buffer
    /// is posted outside the lock, so sends racing the flush buffer
    /// behind `flushing` and drain on a later pass, preserving order.
    fn confirm(&self) {
        {
            let mut state = self.lock_state();
            if state.confirmed || state.destroyed {
                return;
            }
            state.confirmed = true;
            state.flushing = true;
        }

        loop {
            let batch = {
                let mut state = self.lock_state();
                if state.outbound.is_empty() {
                    state.flushing = false;
                    break;
                }
                state.outbound.drain(..).collect::<Vec<_>>()
            };
            for (method, params) in batch {
                if let Err(err) = self.post_wire(&method, &params) {
                    debug!(error = %err, %method, "buffered send failed during flush");
                }
            }
        }

        let callbacks = std::mem::take(&mut self.lock_state().ready_callbacks);
        debug!(scope = %self.scope, "channel confirmed");
        self.ready_cv.notify_all();
        for callback in callbacks {
            callback();
        }
    }
}

fn probe_loop(inner: Weak<ChannelInner>) {
    let mut sent: u32 = 0;
    loop {
        let Some(inner) = inner.upgrade() else { return };
        {
            let state = inner.lock_state();
            if state.confirmed || state.destroyed {
                return;
            }
        }
        if let Some(max) = inner.config.max_probes {
            if sent >= max {
                debug!(scope = %inner.scope, probes = sent, "probe budget exhausted; giving up");
                return;
            }
        }

        let token = Value::String(inner.token.clone());
        if let Err(err) = inner.post_wire(PROBE_METHOD, &token) {
            trace!(error = %err, "probe send failed");
        }
        sent += 1;

        // Interruptible sleep: confirm/destroy signal the condvar.
        let state = inner.lock_state();
        if state.confirmed || state.destroyed {
            return;
        }
        let _ = inner.ready_cv.wait_timeout(state, inner.config.probe_interval);
    }
}
