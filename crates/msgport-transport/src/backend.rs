use std::sync::{Arc, PoisonError, RwLock};

use msgport_channel::MessageChannel;
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::Result;

/// Reserved channel method carrying transport envelopes.
pub const MESSAGE_METHOD: &str = "message";

/// Callback receiving inbound envelopes from a backend.
pub type ReceiveCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Point-to-point delivery contract the transport builds on.
///
/// Anything that can send an envelope, hand inbound envelopes to a
/// callback, and release its resources can back a `Transport`.
pub trait Backend: Send + Sync {
    /// Send an envelope to the remote endpoint.
    fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Install the inbound envelope callback, replacing any previous one.
    fn set_receive_callback(&self, callback: ReceiveCallback);

    /// Release the backend's resources.
    fn dispose(&self);
}

/// Binds one `MessageChannel` to the backend contract.
///
/// All envelopes travel as the `params` of one reserved channel method.
/// The channel listener is registered once, at construction, and forwards
/// to whatever receive callback is currently stored — so the transport
/// can rebind without re-registering with the channel.
pub struct ChannelBackend {
    channel: MessageChannel,
    callback: Arc<RwLock<Option<ReceiveCallback>>>,
}

impl ChannelBackend {
    /// Wrap a channel. The channel may still be mid-handshake; sends
    /// issued before confirmation are buffered by the channel itself.
    pub fn new(channel: MessageChannel) -> Self {
        let callback: Arc<RwLock<Option<ReceiveCallback>>> = Arc::new(RwLock::new(None));

        let forward = Arc::clone(&callback);
        channel.listen(MESSAGE_METHOD, move |params| {
            let envelope: Envelope = match serde_json::from_value(params.clone()) {
                Ok(envelope) => envelope,
                Err(err) => {
                    trace!(error = %err, "dropping malformed envelope");
                    return;
                }
            };
            let callback = forward
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            match callback {
                Some(callback) => callback(envelope),
                None => trace!("no receive callback installed; dropping envelope"),
            }
        });

        Self { channel, callback }
    }

    /// Borrow the underlying channel.
    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }
}

impl Backend for ChannelBackend {
    fn send(&self, envelope: &Envelope) -> Result<()> {
        let params = serde_json::to_value(envelope)?;
        self.channel.send(MESSAGE_METHOD, params)?;
        Ok(())
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn dispose(&self) {
        self.channel.destroy();
    }
}
