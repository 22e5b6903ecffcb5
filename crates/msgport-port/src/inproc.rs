use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use tracing::{debug, trace};

use crate::error::{PortError, Result};
use crate::traits::{MessagePort, PortCallback, PortMessage};

/// In-process message port.
///
/// `InProcPort::pair` returns two connected endpoints. Each endpoint
/// delivers to the other asynchronously on a dedicated delivery thread,
/// FIFO per direction. A payload arriving while the receiving endpoint
/// has no handler installed is dropped — faithful best-effort semantics,
/// and exactly the race the channel layer's readiness handshake covers.
pub struct InProcPort {
    /// Sender into the peer endpoint's inbox. `None` once closed.
    tx: Mutex<Option<Sender<String>>>,
    handler: Arc<RwLock<Option<PortCallback>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl InProcPort {
    /// Create a connected pair of ports.
    ///
    /// `origin_a` / `origin_b` are the origins attached to messages sent
    /// *by* the first / second endpoint respectively.
    pub fn pair(origin_a: &str, origin_b: &str) -> (Arc<InProcPort>, Arc<InProcPort>) {
        let (tx_ab, rx_ab) = mpsc::channel::<String>();
        let (tx_ba, rx_ba) = mpsc::channel::<String>();

        let a = Arc::new(Self::with_sender(tx_ab));
        let b = Arc::new(Self::with_sender(tx_ba));

        // Messages from B arrive at A carrying B's origin, and vice versa.
        a.spawn_delivery(rx_ba, origin_b);
        b.spawn_delivery(rx_ab, origin_a);

        (a, b)
    }

    fn with_sender(tx: Sender<String>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            handler: Arc::new(RwLock::new(None)),
            delivery: Mutex::new(None),
        }
    }

    fn spawn_delivery(&self, rx: Receiver<String>, peer_origin: &str) {
        let handler = Arc::clone(&self.handler);
        let origin = peer_origin.to_string();

        let thread = std::thread::Builder::new()
            .name("msgport-deliver".to_string())
            .spawn(move || {
                for payload in rx {
                    let callback = handler
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    match callback {
                        Some(callback) => callback(PortMessage {
                            payload,
                            origin: origin.clone(),
                        }),
                        None => trace!(%origin, "no handler installed; dropping message"),
                    }
                }
                debug!(%origin, "delivery loop stopped");
            });

        match thread {
            Ok(handle) => {
                *self
                    .delivery
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(err) => debug!(error = %err, "failed to spawn delivery thread"),
        }
    }
}

impl MessagePort for InProcPort {
    fn post(&self, payload: &str) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(PortError::Closed)?;
        tx.send(payload.to_string())
            .map_err(|_| PortError::Disconnected("peer inbox dropped".to_string()))
    }

    fn set_on_message(&self, callback: PortCallback) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn clear_on_message(&self) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn close(&self) {
        // Dropping the sender ends the peer's delivery loop once its
        // inbox drains; our own loop ends when the peer closes.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.clear_on_message();
        trace!("port closed");
    }
}

impl Drop for InProcPort {
    fn drop(&mut self) {
        self.close();
        // The delivery thread exits on its own when the peer's sender is
        // dropped; detach rather than block here.
        self.delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for InProcPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let closed = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none();
        f.debug_struct("InProcPort").field("closed", &closed).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn delivers_to_installed_handler_with_peer_origin() {
        let (a, b) = InProcPort::pair("https://origin-a", "https://origin-b");

        let (tx, rx) = mpsc::channel();
        b.set_on_message(Arc::new(move |msg| {
            tx.send(msg).expect("test receiver should be alive");
        }));

        a.post("hello").expect("post should succeed");

        let msg = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("message should be delivered");
        assert_eq!(msg.payload, "hello");
        assert_eq!(msg.origin, "https://origin-a");
    }

    #[test]
    fn preserves_fifo_per_direction() {
        let (a, b) = InProcPort::pair("a", "b");

        let (tx, rx) = mpsc::channel();
        b.set_on_message(Arc::new(move |msg| {
            tx.send(msg.payload).expect("test receiver should be alive");
        }));

        for i in 0..20 {
            a.post(&format!("m{i}")).expect("post should succeed");
        }

        for i in 0..20 {
            let payload = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("message should be delivered");
            assert_eq!(payload, format!("m{i}"));
        }
    }

    #[test]
    fn drops_messages_when_no_handler_installed() {
        let (a, b) = InProcPort::pair("a", "b");

        a.post("lost").expect("post should succeed");
        // Give the delivery thread time to process (and drop) the message.
        std::thread::sleep(Duration::from_millis(50));

        let (tx, rx) = mpsc::channel();
        b.set_on_message(Arc::new(move |msg| {
            tx.send(msg.payload).expect("test receiver should be alive");
        }));

        a.post("kept").expect("post should succeed");
        let payload = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("message should be delivered");
        assert_eq!(payload, "kept", "pre-handler message must not be replayed");
    }

    #[test]
    fn post_after_close_fails() {
        let (a, _b) = InProcPort::pair("a", "b");
        a.close();
        assert!(matches!(a.post("x"), Err(PortError::Closed)));
    }

    #[test]
    fn clear_on_message_detaches_handler() {
        let (a, b) = InProcPort::pair("a", "b");

        let (tx, rx) = mpsc::channel();
        b.set_on_message(Arc::new(move |msg| {
            tx.send(msg.payload).expect("test receiver should be alive");
        }));
        b.clear_on_message();

        a.post("unseen").expect("post should succeed");
        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "detached handler must not receive messages"
        );
    }
}
