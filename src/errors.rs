use axum::{
    extract::rejection::BytesRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors, including RPC failures.
    DatabaseError(sqlx::Error),
    /// Payload validation failure carrying a stable machine-readable code
    /// (e.g. `click_id_required`).
    Validation(&'static str),
    /// Resource not found, carrying an error code.
    NotFound(&'static str),
    /// HTTP method not accepted by the endpoint.
    MethodNotAllowed,
    /// Request body above the configured size limit.
    PayloadTooLarge,
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::Validation(code) => write!(f, "Validation failed: {}", code),
            AppError::NotFound(code) => write!(f, "Not found: {}", code),
            AppError::MethodNotAllowed => write!(f, "Method not allowed"),
            AppError::PayloadTooLarge => write!(f, "Payload too large"),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// HTTP status this error maps to, following context chains.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::WithContext { source, .. } => source.status(),
        }
    }
}

impl AppError {
    /// JSON body of the shape `{"error": <code>, "details"?: <message>}`.
    fn body(&self) -> serde_json::Value {
        match self {
            AppError::DatabaseError(e) => {
                json!({ "error": "db_error", "details": database_message(e) })
            }
            AppError::Validation(code) | AppError::NotFound(code) => json!({ "error": code }),
            AppError::MethodNotAllowed => json!({ "error": "method_not_allowed" }),
            AppError::PayloadTooLarge => json!({ "error": "payload_too_large" }),
            AppError::ExternalApiError(_) => json!({ "error": "upstream_error" }),
            AppError::Unauthorized(msg) => json!({ "error": "unauthorized", "details": msg }),
            AppError::WithContext { source, .. } => source.body(),
        }
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response, logging by severity.
    fn into_response(self) -> Response {
        match &self {
            AppError::DatabaseError(e) => tracing::error!("Database error: {:?}", e),
            AppError::Validation(code) => tracing::debug!("Rejected payload: {}", code),
            AppError::PayloadTooLarge => tracing::warn!("Rejected oversized request body"),
            AppError::ExternalApiError(msg) => tracing::error!("External API error: {}", msg),
            AppError::Unauthorized(msg) => tracing::warn!("Unauthorized access: {}", msg),
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source)
            }
            _ => {}
        }

        (self.status(), Json(self.body())).into_response()
    }
}

/// The message a client should see for a failed query or RPC. Postgres
/// errors (raised by the ingestion procedures) expose their own message
/// rather than the driver's wrapper text.
fn database_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        other => other.to_string(),
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

/// Body read failures. Only the size limit gets its own status; anything
/// else means the body could not be read at all.
impl From<BytesRejection> for AppError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge
        } else {
            tracing::debug!("Unreadable request body: {}", rejection.body_text());
            AppError::Validation("invalid_body")
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
