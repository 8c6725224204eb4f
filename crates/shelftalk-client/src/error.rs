//! API error types.
//!
//! Every client operation surfaces failures through [`ApiError`]. The
//! variants distinguish the failure kinds callers react to differently:
//! transport problems, rejected credentials, structured validation errors,
//! and server faults. Mutation operations are atomic - none of these errors
//! leaves a partial local patch behind.

use thiserror::Error;

use shelftalk_store::StoreError;

/// Alias for `Result<T, ApiError>`.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified error type for the shelftalk client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, TLS, ...).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The request timed out in flight.
    #[error("request timed out: {reason}")]
    Timeout { reason: String },

    /// The server rejected the credentials or token (401/403).
    #[error("authentication failed (status {status})")]
    Auth { status: u16 },

    /// A 4xx response with a structured error body (field errors, lookup
    /// failures). State is unchanged; the body is surfaced to the caller.
    #[error("validation failed (status {status}): {errors}")]
    Validation {
        status: u16,
        errors: serde_json::Value,
    },

    /// A 5xx response.
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// A response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The persistence mirror failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Client-side validation rejected the input before any request was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation's precondition on local state does not hold (e.g. a
    /// like-toggle without a matching selected detail item).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal client error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether this error indicates a rejected or missing credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}
