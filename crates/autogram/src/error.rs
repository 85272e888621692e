use std::time::Duration;

use axum::{Json, http::StatusCode};
use axum_core::response::{IntoResponse as AxumCoreIntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::token::TokenError;

/// Every way a signing job can fail, as seen by whoever submitted it.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error("Malformed MIME type: {value}")]
    MalformedMimeType { value: String },
    #[error("Unsupported MIME type: {value}")]
    UnsupportedMimeType { value: String },
    #[error("Failed to decode {field} from base64: {reason}")]
    DecodingFailed { field: &'static str, reason: String },
    #[error("Malformed {field}: {reason}")]
    MalformedContent { field: &'static str, reason: String },
    #[error("Unsupported signature parameter {field}: {value}")]
    UnsupportedParameter { field: &'static str, value: String },
    #[error("No signing key has been selected")]
    NotReady,
    #[error("Signing was canceled by the user")]
    SigningCanceledByUser,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Unrecognized error from the signing engine: {0}")]
    UnrecognizedCollaborator(String),
    #[error("Signing did not finish within {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Wire body of every non-2xx answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SigningError {
    pub fn status(&self) -> StatusCode {
        match self {
            SigningError::MalformedBody(_)
            | SigningError::MalformedMimeType { .. }
            | SigningError::DecodingFailed { .. } => StatusCode::BAD_REQUEST,
            SigningError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SigningError::UnsupportedMimeType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            SigningError::MalformedContent { .. } | SigningError::UnsupportedParameter { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SigningError::NotReady => StatusCode::CONFLICT,
            SigningError::SigningCanceledByUser => StatusCode::NO_CONTENT,
            SigningError::SigningFailed(_) | SigningError::UnrecognizedCollaborator(_) => {
                StatusCode::BAD_GATEWAY
            }
            SigningError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            SigningError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SigningError::MalformedBody(_) => "MALFORMED_INPUT",
            SigningError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            SigningError::MalformedMimeType { .. } => "MALFORMED_MIMETYPE",
            SigningError::DecodingFailed { .. } => "DECODING_FAILED",
            SigningError::UnsupportedMimeType { .. } => "UNSUPPORTED_MIMETYPE",
            SigningError::MalformedContent { .. } => "UNPROCESSABLE_INPUT",
            SigningError::UnsupportedParameter { field: "level", .. } => {
                "UNSUPPORTED_SIGNATURE_LEVEL"
            }
            SigningError::UnsupportedParameter { .. } => "UNSUPPORTED_SIGNATURE_PARAMETER",
            SigningError::NotReady => "NOT_READY",
            SigningError::SigningCanceledByUser => "USER_CANCELLED",
            SigningError::SigningFailed(_) => "SIGNING_FAILED",
            SigningError::UnrecognizedCollaborator(_) => "UNRECOGNIZED_SIGNING_ERROR",
            SigningError::TimedOut(_) => "SIGNING_TIMEOUT",
            SigningError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for failures caused by the request itself rather than by signing.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let (message, details) = match self {
            SigningError::MalformedBody(reason) => ("Request body is malformed", Some(reason.clone())),
            SigningError::PayloadTooLarge { limit } => {
                ("Request body is too large", Some(format!("limit: {limit} bytes")))
            }
            SigningError::MalformedMimeType { value } => {
                ("Payload MIME type is malformed", Some(format!("payloadMimeType: {value}")))
            }
            SigningError::UnsupportedMimeType { value } => {
                ("Payload MIME type is not supported", Some(format!("payloadMimeType: {value}")))
            }
            SigningError::DecodingFailed { field, reason } => {
                ("Failed to decode base64 content", Some(format!("{field}: {reason}")))
            }
            SigningError::MalformedContent { field, reason } => {
                ("Document content is not valid", Some(format!("{field}: {reason}")))
            }
            SigningError::UnsupportedParameter { field, value } => {
                ("Unsupported signature parameters", Some(format!("{field}: {value}")))
            }
            SigningError::NotReady => ("No signing key has been selected", None),
            SigningError::SigningCanceledByUser => ("Signing was canceled by the user", None),
            SigningError::SigningFailed(reason) => ("Signing failed", Some(reason.clone())),
            SigningError::UnrecognizedCollaborator(reason) => {
                ("Signing engine raised an unrecognized error", Some(reason.clone()))
            }
            SigningError::TimedOut(limit) => {
                ("Signing timed out", Some(format!("limit: {}s", limit.as_secs())))
            }
            // Display of anyhow::Error without `{:#}` stops at the outermost context.
            SigningError::Internal(error) => {
                ("Unexpected exception signing document", Some(error.to_string()))
            }
        };

        ErrorResponse {
            code: self.code().to_string(),
            message: message.to_string(),
            details,
        }
    }
}

impl From<TokenError> for SigningError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Canceled => SigningError::SigningCanceledByUser,
            other => SigningError::SigningFailed(other.to_string()),
        }
    }
}

impl From<EngineError> for SigningError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Rejected(reason) => SigningError::SigningFailed(reason),
            EngineError::Unrecognized(source) => {
                SigningError::UnrecognizedCollaborator(source.to_string())
            }
        }
    }
}

/// Trait implementation to convert this error into an axum http response
impl AxumCoreIntoResponse for SigningError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_error_response())).into_response()
    }
}
