use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `type` discriminant of an `Envelope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Request,
    Response,
    Error,
}

/// A single message on the bus. Self-delimited (one JSON object per line
/// over the wire); Transport is otherwise agnostic to what `payload` means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    /// Method name for requests; echoed back for replies.
    pub id: String,
    /// Sending process id.
    pub source: String,
    /// Receiving process id; `"broker"` means "route via supervisor".
    pub target: String,
    /// Required on every request and every reply to a request.
    pub correlation_id: String,
    pub payload: Value,
    /// Only present when `kind == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn request(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Envelope {
            kind: EnvelopeType::Request,
            id: id.into(),
            source: source.into(),
            target: target.into(),
            correlation_id: correlation_id.into(),
            payload,
            error: None,
        }
    }

    pub fn response(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Envelope {
            kind: EnvelopeType::Response,
            id: id.into(),
            source: source.into(),
            target: target.into(),
            correlation_id: correlation_id.into(),
            payload,
            error: None,
        }
    }

    pub fn error(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        correlation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Envelope {
            kind: EnvelopeType::Error,
            id: id.into(),
            source: source.into(),
            target: target.into(),
            correlation_id: correlation_id.into(),
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.kind, EnvelopeType::Response | EnvelopeType::Error)
    }
}
