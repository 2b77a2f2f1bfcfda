//! Unified application error model and mapping helpers.
//! Every failure that can reach an HTTP response is expressed as one `AppError`
//! kind; the kind decides the status code and how much detail the client sees.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::credentials::CredentialError;
use crate::storage::StoreError;
use crate::validation::ValidationErrors;

/// Non-standard "page expired" status used for rejected CSRF tokens.
pub const CSRF_REJECTED_STATUS: u16 = 419;

const GENERIC_STORAGE_MESSAGE: &str = "The request could not be completed. Please try again.";
const GENERIC_INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Validation { code: String, message: String, fields: BTreeMap<String, Vec<String>> },
    Auth { code: String, message: String },
    Forbidden { code: String, message: String },
    Csrf { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Storage { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Csrf { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Storage { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Csrf { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Storage { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn validation(fields: ValidationErrors) -> Self {
        AppError::Validation {
            code: "validation_failed".into(),
            message: "The submitted data is invalid".into(),
            fields: fields.into_map(),
        }
    }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn csrf<S: Into<String>>(code: S, msg: S) -> Self { AppError::Csrf { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn storage<S: Into<String>>(code: S, msg: S) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 422,
            AppError::Auth { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::Csrf { .. } => CSRF_REJECTED_STATUS,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Storage { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }

    /// Message safe to show to the client. Storage and internal failures never
    /// leak their detail.
    pub fn client_message(&self) -> &str {
        match self {
            AppError::Storage { .. } => GENERIC_STORAGE_MESSAGE,
            AppError::Internal { .. } => GENERIC_INTERNAL_MESSAGE,
            other => other.message(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: format!("{err:#}") }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unique(field) => AppError::Conflict {
                code: "unique_violation".into(),
                message: format!("{} is already in use", field.as_str()),
            },
            StoreError::NotFound(what) => AppError::NotFound { code: "not_found".into(), message: what },
            other => AppError::Storage { code: "storage_error".into(), message: other.to_string() },
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Taken(field) => {
                let key = field.as_str().replace(' ', "_");
                AppError::validation(ValidationErrors::single(&key, format!("This {} is already taken", field.as_str())))
            }
            CredentialError::NotFound(id) => AppError::NotFound { code: "user_not_found".into(), message: format!("user {id} not found") },
            CredentialError::Hash(msg) => AppError::Internal { code: "hash_failed".into(), message: msg },
            CredentialError::Store(e) => AppError::from(e),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self { AppError::validation(errors) }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Storage { .. } | AppError::Internal { .. } => {
                error!(target: "http", code = self.code_str(), "request failed: {}", self.message());
            }
            _ => {}
        }
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.client_message(),
        });
        if let AppError::Validation { fields, .. } = &self {
            body["fields"] = serde_json::json!(fields);
        }
        (status, Json(body)).into_response()
    }
}
