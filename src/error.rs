use serde_json::Value;
use thiserror::Error;

/// Errors the rest of the engine needs to discriminate on. Anything that is
/// only ever logged or surfaced verbatim stays an `anyhow::Error`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Connection-level failure; retried with fixed backoff, never shown to
    /// the user.
    #[error("transport: {0}")]
    Transport(String),

    /// Cooperative signature endpoints are disabled by configuration. Fails
    /// immediately, not retried.
    #[error("cooperative signatures for swaps are disabled")]
    CooperativeDisabled,

    /// A server rejection we know how to react to.
    #[error("server rejected: {0}")]
    Rejection(String),

    /// Malformed input data, rejected before any network or signing attempt.
    #[error("invalid input: {0}")]
    Validation(String),
}

/// Known server rejection strings, pattern-matched into recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The output was already spent or the transaction is already known.
    AlreadySpent,
    /// The refund locktime has not been reached yet.
    LocktimeNotSatisfied,
    /// Server declined a cooperative submarine claim; unilateral path follows.
    NotEligibleForCooperativeClaim,
    Other,
}

pub fn classify_rejection(message: &str) -> Rejection {
    match message {
        "bad-txns-inputs-missingorspent" | "Transaction already in block chain" => {
            Rejection::AlreadySpent
        }
        m if m.starts_with("insufficient fee") => Rejection::AlreadySpent,
        "mandatory-script-verify-flag-failed" | "non-final" => Rejection::LocktimeNotSatisfied,
        "swap not eligible for a cooperative claim" => {
            Rejection::NotEligibleForCooperativeClaim
        }
        _ => Rejection::Other,
    }
}

/// Best-effort extraction of a human-readable message from a server error
/// body. Precedence: `error.message`, `message`, `error`, `data`, then the
/// serialized value.
pub fn format_error_body(body: &Value) -> String {
    if let Value::String(s) = body {
        return s.clone();
    }

    if let Value::Object(map) = body {
        if let Some(Value::Object(err)) = map.get("error")
            && let Some(Value::String(msg)) = err.get("message")
        {
            return msg.clone();
        }
        if let Some(Value::String(msg)) = map.get("message") {
            return msg.clone();
        }
        if let Some(Value::String(msg)) = map.get("error") {
            return msg.clone();
        }
        if let Some(Value::String(msg)) = map.get("data") {
            return msg.clone();
        }
    }

    body.to_string()
}
