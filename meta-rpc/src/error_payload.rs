use meta_core::CoreError;
use serde_json::{json, Value};

/// Encodes a `CoreError` into the payload carried by a `type=error`
/// envelope: `{"kind": "...", "message": "..."}`. The envelope's own
/// `error` field only carries a human-readable string; encoding the kind
/// into the payload as well lets the remote RPC Client reconstruct the
/// right `CoreError` variant instead of collapsing every remote failure
/// into one undifferentiated kind.
pub fn encode(err: &CoreError) -> Value {
    json!({
        "kind": err.kind(),
        "message": err.to_string(),
    })
}

/// Decode a `type=error` envelope's payload back into a `CoreError`.
/// Falls back to `Internal` if the payload doesn't carry a recognized kind
/// (e.g. a peer that only understands the plain `error` string).
pub fn decode(payload: &Value, fallback_message: &str) -> CoreError {
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(fallback_message)
        .to_string();
    match payload.get("kind").and_then(Value::as_str) {
        Some("not_found") => CoreError::NotFound(message),
        Some("invalid_transition") => CoreError::InvalidTransition(message),
        Some("invalid_argument") => CoreError::InvalidArgument(message),
        Some("transient") => CoreError::Transient(message),
        Some("permanent") => CoreError::Permanent(message),
        Some("timeout") => CoreError::Timeout,
        Some("cancelled") => CoreError::Cancelled,
        _ => CoreError::Internal(message),
    }
}
