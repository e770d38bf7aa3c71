//! Error taxonomy shared by every component.
//!
//! Components raise typed kinds; the orchestrator is the single place that
//! maps kinds to user-visible assistant messages. Webhook handlers never
//! propagate these to the payment processor — they acknowledge receipt and
//! log instead.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds the core can raise.
#[derive(Debug, Error)]
pub enum Error {
    /// The session id does not refer to an extant session.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// User or document values violate an invariant (date order, duration
    /// cap, age range, unknown destination). Recovered locally with a
    /// clarifying question; no state write.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested operation is not legal in the session's current
    /// dialogue state.
    #[error("invalid state for {action}: session is in {state}")]
    InvalidState { action: &'static str, state: String },

    /// Transient downstream failure (insurer, LLM, OCR, embeddings, payment
    /// processor) that survived the component's retry budget.
    #[error("{service} unavailable: {detail}")]
    DownstreamUnavailable { service: &'static str, detail: String },

    /// Non-retryable 4xx or structured rejection from a downstream service.
    #[error("{service} rejected the request: {detail}")]
    DownstreamRejected { service: &'static str, detail: String },

    /// The 24-hour quote TTL elapsed between pricing and bind.
    #[error("quote expired")]
    QuoteExpired,

    /// The insurer returned zero applicable offers.
    #[error("insurer returned no applicable offers")]
    NoOffers,

    /// A policy already exists for this payment reference. Callers treat
    /// this as idempotent success.
    #[error("policy already bound for payment_ref {payment_ref}")]
    BindConflict { payment_ref: String },

    /// Stored records disagree with each other (e.g. a bound policy whose
    /// insurer reference no longer matches). Logged and raised to
    /// operations, never surfaced to the end user.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// The per-request wall-clock budget was exceeded.
    #[error("operation exceeded {seconds}s deadline")]
    InternalTimeout { seconds: u64 },

    /// An upload or synthesis request exceeded a hard size limit.
    #[error("{what} too large: {actual} bytes exceeds limit of {limit}")]
    InputTooLarge {
        what: &'static str,
        limit: usize,
        actual: usize,
    },

    /// An LLM reply failed strict-JSON parsing or schema validation.
    /// Extraction callers map this to an empty patch.
    #[error("failed to parse structured output: {0}")]
    Parse(String),
}

impl Error {
    /// Whether a caller holding its own retry budget may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DownstreamUnavailable { .. })
    }

    /// Stable machine-readable label for logs and wire serialization.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SessionNotFound(_) => "session_not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::InvalidState { .. } => "invalid_state",
            Error::DownstreamUnavailable { .. } => "downstream_unavailable",
            Error::DownstreamRejected { .. } => "downstream_rejected",
            Error::QuoteExpired => "quote_expired",
            Error::NoOffers => "no_offers",
            Error::BindConflict { .. } => "bind_conflict",
            Error::IntegrityViolation(_) => "integrity_violation",
            Error::InternalTimeout { .. } => "internal_timeout",
            Error::InputTooLarge { .. } => "input_too_large",
            Error::Parse(_) => "parse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let transient = Error::DownstreamUnavailable {
            service: "insurer",
            detail: "HTTP 503".into(),
        };
        assert!(transient.is_retryable());

        let rejected = Error::DownstreamRejected {
            service: "insurer",
            detail: "HTTP 400".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(!Error::QuoteExpired.is_retryable());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::QuoteExpired.kind(), "quote_expired");
        assert_eq!(
            Error::BindConflict {
                payment_ref: "pay-1".into()
            }
            .kind(),
            "bind_conflict"
        );
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::InputTooLarge {
            what: "audio",
            limit: 5_242_880,
            actual: 5_242_881,
        };
        let msg = err.to_string();
        assert!(msg.contains("audio"));
        assert!(msg.contains("5242881"));
    }
}
