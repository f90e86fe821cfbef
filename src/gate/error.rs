//! Error taxonomy for gated actions.
//!
//! Every variant is handled at the gate boundary. Messages shown to users are
//! deliberately coarse: a bad token and a bad payload both read as a failed
//! form submission.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Failure reported by the external authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account is locked")]
    AccountLocked,
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the configuration store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration document is invalid: {0}")]
    Document(#[from] serde_json::Error),
    #[error("reinitialization failed: {0}")]
    Reinitialize(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("form token is missing or invalid")]
    InvalidFormToken,
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("action is not permitted in the current state")]
    Unauthorized,
    #[error("configuration format error: {0}")]
    ConfigFormat(String),
    #[error("unable to read upload: {0}")]
    Read(String),
    #[error("configuration store failure: {0}")]
    Store(#[from] StoreError),
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Stable machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidFormToken,
    MissingParameter,
    AuthError,
    Unauthorized,
    ConfigFormatError,
    ReadError,
    StoreError,
    UnknownAction,
}

/// Error details attached to a session or a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorInformation {
    pub code: ErrorCode,
    pub message: String,
}

impl GateError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidFormToken => ErrorCode::InvalidFormToken,
            Self::MissingParameter(_) => ErrorCode::MissingParameter,
            Self::Auth(_) => ErrorCode::AuthError,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::ConfigFormat(_) => ErrorCode::ConfigFormatError,
            Self::Read(_) => ErrorCode::ReadError,
            Self::Store(_) => ErrorCode::StoreError,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidFormToken | Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::MissingParameter(_) | Self::ConfigFormat(_) | Self::UnknownAction(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Read(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            // Token and payload failures share one message.
            Self::InvalidFormToken | Self::Read(_) => "Unable to read or submit form".to_string(),
            Self::MissingParameter(name) => format!("Missing required field: {name}"),
            Self::Auth(AuthError::Unavailable(_)) => {
                "Authentication service is unavailable".to_string()
            }
            Self::Auth(_) => "Invalid username or password".to_string(),
            Self::Unauthorized => "This action is not available".to_string(),
            Self::ConfigFormat(_) => "Configuration is not valid".to_string(),
            Self::Store(_) => "Unable to save configuration".to_string(),
            Self::UnknownAction(_) => "Unknown action".to_string(),
        }
    }

    #[must_use]
    pub fn information(&self) -> ErrorInformation {
        ErrorInformation {
            code: self.code(),
            message: self.user_message(),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.information())).into_response()
    }
}
