//! Client error types.
//!
//! This module defines [`ClientError`], the single error type returned by every
//! component of the client. The variants follow the failure taxonomy the
//! operator sees:
//!
//! - **`Transport`**: the backend could not be reached at all. The operation is
//!   treated as not applied.
//! - **`Rejected`**: the backend answered with a non-2xx HTTP status. The message
//!   is taken from the response body when present, otherwise synthesized from
//!   the status code.
//! - **`SoftFailure`**: the backend answered 2xx but the body carries a failure
//!   indicator. Handled exactly like `Rejected`.
//! - **`Validation`** / **`ImportFormat`**: local checks failed before any request
//!   was dispatched.
//! - **`Busy`**: another operation of the same class is still in flight.
//!
//! `Rejected` and `SoftFailure` display only the backend's own message, so the
//! text surfaced to the operator is exactly what the backend said.

use thiserror::Error;

use crate::connection::AddressError;
use crate::inflight::OperationClass;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the simulator backend.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No response was received (connection refused, DNS, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend returned a non-success HTTP status.
    #[error("{message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Message extracted from the body, or synthesized from `status`
        message: String,
    },

    /// Backend returned 2xx but reported a logical failure in the body.
    #[error("{0}")]
    SoftFailure(String),

    /// A 2xx response body could not be understood.
    #[error("Unexpected response body: {0}")]
    Decode(String),

    /// Local validation failed; nothing was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Imported data did not have the expected shape.
    #[error("Invalid import format: {0}")]
    ImportFormat(String),

    /// Another operation of the same class has not completed yet.
    #[error("A {0} operation is already in progress")]
    Busy(OperationClass),

    /// Invalid backend address.
    #[error("Invalid backend address: {0}")]
    Address(#[from] AddressError),

    /// File I/O error during import/export.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error during import/export.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns `true` if the backend actively refused the operation
    /// (non-2xx status or a soft-failure body).
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::SoftFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_displays_backend_message_verbatim() {
        let err = ClientError::Rejected {
            status: 500,
            message: "device busy".into(),
        };
        assert_eq!(err.to_string(), "device busy");
        assert!(err.is_backend_failure());
    }

    #[test]
    fn soft_failure_displays_message_verbatim() {
        let err = ClientError::SoftFailure("Driver not loaded".into());
        assert_eq!(err.to_string(), "Driver not loaded");
        assert!(err.is_backend_failure());
    }

    #[test]
    fn busy_names_the_operation_class() {
        let err = ClientError::Busy(OperationClass::Lifecycle);
        assert_eq!(
            err.to_string(),
            "A driver lifecycle operation is already in progress"
        );
        assert!(!err.is_backend_failure());
    }
}
