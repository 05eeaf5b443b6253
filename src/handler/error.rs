//! Request error type
//!
//! Every handler returns `Result<Response, GatewayError>`, and
//! [`GatewayError::into_response`] is the only place errors become status
//! codes. Backend failures the store explicitly recognizes are client
//! errors (400); anything else it reports is a server error (500).

use hyper::{Method, Response, StatusCode};
use thiserror::Error;

use crate::http::{self, ResponseBody};
use crate::logger;
use crate::storage::StoreError;

/// How a backend rejection is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    /// Serialized error object, `application/json`
    Json,
    /// Error message only, `text/plain`
    Text,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Missing action query parameter")]
    MissingAction,

    #[error("Unknown action {action} for {method}")]
    UnknownAction { action: String, method: Method },

    #[error("{0}")]
    MissingParameter(&'static str),

    #[error("Invalid partNumber {0}")]
    InvalidPartNumber(String),

    #[error("Missing request body")]
    MissingBody,

    #[error("Missing or incomplete body")]
    IncompleteBody,

    #[error("Payload Too Large")]
    PayloadTooLarge,

    #[error("Object Not Found")]
    ObjectNotFound,

    #[error("Invalid key {0}")]
    InvalidKey(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// The backend refused the operation
    #[error("{source}")]
    Rejected {
        source: StoreError,
        format: ErrorFormat,
    },

    /// The backend failed for reasons unrelated to the request
    #[error("storage backend failure: {0}")]
    Internal(#[source] StoreError),
}

impl GatewayError {
    /// Classify a backend error raised by an action whose rejections are
    /// rendered as `format`
    pub fn from_store(err: StoreError, format: ErrorFormat) -> Self {
        if err.is_rejection() {
            Self::Rejected {
                source: err,
                format,
            }
        } else {
            Self::Internal(err)
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingAction
            | Self::UnknownAction { .. }
            | Self::InvalidKey(_)
            | Self::MissingParameter(_)
            | Self::InvalidPartNumber(_)
            | Self::MissingBody
            | Self::IncompleteBody
            | Self::Rejected { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ObjectNotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        match self {
            Self::MethodNotAllowed => http::build_405_response(),
            Self::PayloadTooLarge => http::build_413_response(),
            Self::Internal(err) => {
                logger::log_error(&format!("Storage backend failure: {err}"));
                http::build_500_response()
            }
            Self::Rejected {
                source,
                format: ErrorFormat::Json,
            } => {
                logger::log_debug(&format!("Backend rejected request: {source}"));
                http::json_response(StatusCode::BAD_REQUEST, &source)
            }
            other => {
                let status = other.status();
                http::text_response(status, other.to_string())
            }
        }
    }
}

impl From<StoreError> for GatewayError {
    /// Errors from operations with no rejection contract (get, delete,
    /// create) are always internal
    fn from(err: StoreError) -> Self {
        Self::Internal(err)
    }
}
