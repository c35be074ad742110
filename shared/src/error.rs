//! Typed application error kinds and their HTTP boundary mapping.
//!
//! Follows an `ApiError`-enum-plus-`IntoResponse` shape: one `thiserror`
//! variant per kind, covering the six kinds this platform's components
//! actually raise: `conflict`, `internal`, `invalid`, `not_found`,
//! `not_implemented`, `unauthorized`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Machine-readable discriminant for an [`AppError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Internal,
    Invalid,
    NotFound,
    NotImplemented,
    Unauthorized,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Unauthorized => "unauthorized",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

/// A typed application error, one variant per [`ErrorKind`], each carrying a
/// human message, an optional wrapped internal cause, and optional
/// structured data for validation errors.
///
/// The wrapped cause is kept as plain data rather than wired into
/// `std::error::Error::source`: `anyhow::Error` does not itself implement
/// `std::error::Error` (it only derefs to `dyn Error`), so it cannot sit
/// behind a `#[source]` field.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        cause: Option<anyhow::Error>,
        validation: Option<serde_json::Value>,
    },
    #[error("internal: {message}")]
    Internal {
        message: String,
        cause: Option<anyhow::Error>,
        validation: Option<serde_json::Value>,
    },
    #[error("invalid: {message}")]
    Invalid {
        message: String,
        cause: Option<anyhow::Error>,
        validation: Option<serde_json::Value>,
    },
    #[error("not_found: {message}")]
    NotFound {
        message: String,
        cause: Option<anyhow::Error>,
        validation: Option<serde_json::Value>,
    },
    #[error("not_implemented: {message}")]
    NotImplemented {
        message: String,
        cause: Option<anyhow::Error>,
        validation: Option<serde_json::Value>,
    },
    #[error("unauthorized: {message}")]
    Unauthorized {
        message: String,
        cause: Option<anyhow::Error>,
        validation: Option<serde_json::Value>,
    },
}

impl AppError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Conflict => AppError::Conflict { message, cause: None, validation: None },
            ErrorKind::Internal => AppError::Internal { message, cause: None, validation: None },
            ErrorKind::Invalid => AppError::Invalid { message, cause: None, validation: None },
            ErrorKind::NotFound => AppError::NotFound { message, cause: None, validation: None },
            ErrorKind::NotImplemented => {
                AppError::NotImplemented { message, cause: None, validation: None }
            }
            ErrorKind::Unauthorized => {
                AppError::Unauthorized { message, cause: None, validation: None }
            }
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Conflict { .. } => ErrorKind::Conflict,
            AppError::Internal { .. } => ErrorKind::Internal,
            AppError::Invalid { .. } => ErrorKind::Invalid,
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::NotImplemented { .. } => ErrorKind::NotImplemented,
            AppError::Unauthorized { .. } => ErrorKind::Unauthorized,
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Conflict { message, .. }
            | AppError::Internal { message, .. }
            | AppError::Invalid { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::NotImplemented { message, .. }
            | AppError::Unauthorized { message, .. } => message,
        }
    }

    pub fn with_source(self, cause: anyhow::Error) -> Self {
        match self {
            AppError::Conflict { message, validation, .. } => {
                AppError::Conflict { message, cause: Some(cause), validation }
            }
            AppError::Internal { message, validation, .. } => {
                AppError::Internal { message, cause: Some(cause), validation }
            }
            AppError::Invalid { message, validation, .. } => {
                AppError::Invalid { message, cause: Some(cause), validation }
            }
            AppError::NotFound { message, validation, .. } => {
                AppError::NotFound { message, cause: Some(cause), validation }
            }
            AppError::NotImplemented { message, validation, .. } => {
                AppError::NotImplemented { message, cause: Some(cause), validation }
            }
            AppError::Unauthorized { message, validation, .. } => {
                AppError::Unauthorized { message, cause: Some(cause), validation }
            }
        }
    }

    pub fn with_validation(self, data: serde_json::Value) -> Self {
        match self {
            AppError::Conflict { message, cause, .. } => {
                AppError::Conflict { message, cause, validation: Some(data) }
            }
            AppError::Internal { message, cause, .. } => {
                AppError::Internal { message, cause, validation: Some(data) }
            }
            AppError::Invalid { message, cause, .. } => {
                AppError::Invalid { message, cause, validation: Some(data) }
            }
            AppError::NotFound { message, cause, .. } => {
                AppError::NotFound { message, cause, validation: Some(data) }
            }
            AppError::NotImplemented { message, cause, .. } => {
                AppError::NotImplemented { message, cause, validation: Some(data) }
            }
            AppError::Unauthorized { message, cause, .. } => {
                AppError::Unauthorized { message, cause, validation: Some(data) }
            }
        }
    }

    fn validation_data(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Conflict { validation, .. }
            | AppError::Internal { validation, .. }
            | AppError::Invalid { validation, .. }
            | AppError::NotFound { validation, .. }
            | AppError::NotImplemented { validation, .. }
            | AppError::Unauthorized { validation, .. } => validation.clone(),
        }
    }
}

/// A generic error crossing a module boundary is upgraded to `internal`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        AppError::internal(message).with_source(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.kind().status();
        let code = self.kind().code();
        let body = ErrorBody {
            error: self.message().to_string(),
            code,
            details: self.validation_data(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_code_and_status_mapping() {
        assert_eq!(ErrorKind::Conflict.code(), "conflict");
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::Invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::NotImplemented.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn generic_error_upgrades_to_internal() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
