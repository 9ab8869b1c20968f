//! Error types for the generation service.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable outcome of a generation request that is not a successful
//! response. It implements [`IntoResponse`] so handlers can return
//! `Result<_, Error>` and have each case mapped to its HTTP status code and a
//! JSON error body.
//!
//! ## Error Cases
//! - `MalformedRequest`: The request body is missing `prompt`, carries a
//!   non-boolean `stream`, or is not a JSON object.
//! - `InvalidSamplingConfig`: The engine contract rejected the sampling
//!   options. The message is surfaced verbatim.
//! - `ClientDisconnected`: The client went away mid-request. Not a true error;
//!   it produces status `499` with no body.
//! - `EngineFailure`: The engine failed irrecoverably.
//! - `EmptyResult`: The engine finished without producing any output.
//! - `ServiceOverloaded`: The engine queue is full.
//! - `ServiceShutdown`: A request arrived or was running while the service was
//!   shutting down.
//! - `ChannelError`: An internal communication failure between tasks.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub type Result<T> = core::result::Result<T, Error>;

/// Status code for a request the client closed before a response was ready.
///
/// Not registered with IANA, so `http` has no named constant for it.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Unified error type for the generation service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The request body violated the request shape.
    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// The engine contract rejected the sampling configuration.
    #[error("{reason}")]
    InvalidSamplingConfig { reason: String },

    /// The client disconnected before the response was complete.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The engine failed while producing results.
    #[error("Engine failure: {context}")]
    EngineFailure { context: String },

    /// The engine finished a request without producing any output.
    #[error("Engine produced no output")]
    EmptyResult,

    /// The engine cannot accept more work right now.
    #[error("Service is overloaded: {details}")]
    ServiceOverloaded { details: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    /// Returns the HTTP status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::MalformedRequest { .. } | Error::InvalidSamplingConfig { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::ClientDisconnected => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
            Error::ServiceOverloaded { .. } | Error::ServiceShutdown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::EngineFailure { .. } | Error::EmptyResult | Error::ChannelError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True for errors caused by the client's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedRequest { .. } | Error::InvalidSamplingConfig { .. }
        )
    }
}

/// JSON body returned alongside every error status except `499`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Error::ClientDisconnected => return status.into_response(),
            Error::MalformedRequest { .. }
            | Error::InvalidSamplingConfig { .. }
            | Error::ServiceOverloaded { .. }
            | Error::ServiceShutdown => self.to_string(),
            // Internal details stay in the logs, the client gets a generic
            // message.
            Error::EngineFailure { .. } | Error::EmptyResult | Error::ChannelError { .. } => {
                tracing::error!("Internal server error: {self}");
                "Internal server error".to_string()
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        let err = Error::MalformedRequest {
            reason: "missing `prompt`".to_string(),
        };
        assert!(err.is_client_error());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = Error::InvalidSamplingConfig {
            reason: "n must be at least 1, got 0.".to_string(),
        };
        assert_eq!(err.to_string(), "n must be at least 1, got 0.");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn disconnect_is_499_without_body() {
        let resp = Error::ClientDisconnected.into_response();
        assert_eq!(resp.status().as_u16(), CLIENT_CLOSED_REQUEST);
        assert!(resp.headers().get("content-type").is_none());
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = Error::EngineFailure {
            context: "worker 3 panicked".to_string(),
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::EmptyResult.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_client_error());
    }

    #[test]
    fn unavailable_cases() {
        assert_eq!(
            Error::ServiceShutdown.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::ServiceOverloaded {
                details: "queue full".into()
            }
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
