use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved method name for readiness probes.
pub const PROBE_METHOD: &str = "__ready__";

/// Default interval between readiness probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Raw channel envelope, JSON-serialized onto the port.
///
/// The `msgport` marker distinguishes channel traffic from arbitrary
/// other payloads sharing the port; `scope` partitions multiple logical
/// channels sharing one port pair. Receivers accept a message only when
/// the marker is set and the scope matches — everything else is silently
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    /// Marker flag. Always `true` on messages this library produces.
    pub msgport: bool,
    /// Channel scope identifier.
    pub scope: String,
    /// Method name the payload is addressed to.
    pub method: String,
    /// Method payload.
    pub params: Value,
}

impl WireMessage {
    /// Create a marked wire message for `scope`/`method`.
    pub fn new(scope: &str, method: &str, params: Value) -> Self {
        Self {
            msgport: true,
            scope: scope.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Generate a collision-improbable probe token.
///
/// Epoch nanos + process id + per-process counter. Both endpoints probe
/// with their own token; receiving your own token echoed back is the
/// liveness proof, so tokens only need to be unique across the two
/// endpoints of one channel pair.
pub fn probe_token() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{:x}-{:x}-{:x}",
        nanos,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
