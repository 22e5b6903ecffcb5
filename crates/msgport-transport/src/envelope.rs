use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Event,
    Request,
    Response,
    /// Any tag this version doesn't know. Dispatched as an event.
    Unknown,
}

// Tolerant tag parsing: an unrecognized tag must not reject the whole
// envelope, it downgrades to Unknown and is dispatched as an event.
impl<'de> Deserialize<'de> for EnvelopeKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "event" => Self::Event,
            "request" => Self::Request,
            "response" => Self::Response,
            _ => Self::Unknown,
        })
    }
}

/// Transport-level wire envelope.
///
/// `id` is present on a request and its correlated response. `data`
/// carries the payload for events and requests. `result`/`error` belong
/// to responses; a response setting neither is treated as malformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    /// Fire-and-forget event envelope.
    pub fn event(data: Value) -> Self {
        Self {
            kind: Some(EnvelopeKind::Event),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Request envelope with a correlation id.
    pub fn request(id: u64, data: Value) -> Self {
        Self {
            kind: Some(EnvelopeKind::Request),
            data: Some(data),
            id: Some(id),
            ..Self::default()
        }
    }

    /// Response envelope correlated to request `id`.
    pub fn response(id: u64, result: Option<Value>, error: Option<Value>) -> Self {
        Self {
            kind: Some(EnvelopeKind::Response),
            id: Some(id),
            result,
            error,
            ..Self::default()
        }
    }
}
