/// The error kinds every component in the core converts into.
///
/// Hand-written `Display`/`Error` impls rather than a `thiserror`-derived
/// enum.
#[derive(Debug)]
pub enum CoreError {
    /// Unknown provider id / unknown correlation id.
    NotFound(String),
    /// Requested state change rejected by the FSM transition table.
    InvalidTransition(String),
    /// Malformed request payload or missing required field.
    InvalidArgument(String),
    /// Transport hiccup, rate-limited, remote temporarily unavailable.
    Transient(String),
    /// Malformed source data, schema violation, storage-side fatal.
    Permanent(String),
    /// RPC deadline elapsed.
    Timeout,
    /// Cooperative cancel fired.
    Cancelled,
    /// A component's own invariant was violated; must be logged with full context.
    Internal(String),
}

impl CoreError {
    /// The stable machine-friendly tag used on the wire (`type=error` envelopes).
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidTransition(_) => "invalid_transition",
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::Transient(_) => "transient",
            CoreError::Permanent(_) => "permanent",
            CoreError::Timeout => "timeout",
            CoreError::Cancelled => "cancelled",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Whether a provider executor should schedule a backoff-and-retry for
    /// an error of this kind.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Timeout)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        CoreError::InvalidTransition(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }

    /// Render as a `"meta: ..."`-prefixed message for `type=error` envelopes.
    pub fn wire_message(&self) -> String {
        format!("meta: {self}")
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            CoreError::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            CoreError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            CoreError::Transient(msg) => write!(f, "transient error: {msg}"),
            CoreError::Permanent(msg) => write!(f, "permanent error: {msg}"),
            CoreError::Timeout => write!(f, "timed out"),
            CoreError::Cancelled => write!(f, "cancelled"),
            CoreError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_is_prefixed() {
        let err = CoreError::invalid_argument("cve_id is required");
        assert_eq!(err.wire_message(), "meta: invalid argument: cve_id is required");
    }

    #[test]
    fn transient_classification() {
        assert!(CoreError::Transient("rate limited".into()).is_transient());
        assert!(CoreError::Timeout.is_transient());
        assert!(!CoreError::Permanent("bad schema".into()).is_transient());
        assert!(!CoreError::Internal("bug".into()).is_transient());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(CoreError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(CoreError::InvalidTransition("x".into()).kind(), "invalid_transition");
        assert_eq!(CoreError::Cancelled.kind(), "cancelled");
    }
}
