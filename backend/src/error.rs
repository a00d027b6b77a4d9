//! Standardized error handling for the workflow API
//!
//! This module provides a consistent error response format across all endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::workflows::WorkflowError;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "INVALID_TRANSITION", "NOT_FOUND")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    // Resource errors
    NotFound(String),
    Conflict(String),

    // Validation errors
    ValidationError { details: HashMap<String, Vec<String>> },

    // Workflow rule errors
    InvalidTransition(String),
    ConditionFailed { field: String, message: String },

    // Server errors
    DatabaseError(String),
    ExternalServiceError { service: String, message: String, retryable: bool },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::ValidationError { .. } | Self::ConditionFailed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalServiceError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::ConditionFailed { .. } => "CONDITION_FAILED",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ExternalServiceError { retryable: true, .. } => "EXTERNAL_SERVICE_UNAVAILABLE",
            Self::ExternalServiceError { retryable: false, .. } => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::Conflict(msg) => msg.clone(),
            Self::ValidationError { .. } => "Validation failed".to_string(),
            Self::InvalidTransition(msg) => msg.clone(),
            Self::ConditionFailed { message, .. } => message.clone(),
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::ExternalServiceError { service, message, .. } => {
                tracing::error!("External service error ({}): {}", service, message);
                format!("External service '{}' failed: {}", service, message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        match &self {
            Self::ValidationError { details } => error.details = Some(details.clone()),
            Self::ConditionFailed { field, message } => {
                error.details = Some(HashMap::from([(field.clone(), vec![message.clone()])]));
            }
            _ => {}
        }

        (status, Json(error)).into_response()
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(id) => Self::NotFound(format!("Workflow or order {}", id)),
            WorkflowError::AlreadyExists(_) => Self::Conflict(err.to_string()),
            WorkflowError::InvalidTransition { .. } => Self::InvalidTransition(err.to_string()),
            WorkflowError::ConditionFailure { ref field, .. } => Self::ConditionFailed {
                field: field.clone(),
                message: err.to_string(),
            },
            WorkflowError::InvalidPriority(_) => validation_error("priority", &err.to_string()),
            WorkflowError::HookFailure {
                hook,
                message,
                retryable,
            } => Self::ExternalServiceError {
                service: hook,
                message,
                retryable,
            },
            WorkflowError::PersistenceFailure(e) => Self::DatabaseError(e.to_string()),
        }
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to create validation errors
pub fn validation_error(field: &str, message: &str) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![message.to_string()]);
    AppError::ValidationError { details }
}
