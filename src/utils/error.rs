use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Guidebook limit reached ({limit} active allowed on current plan)")]
    PlanLimitReached { limit: u32 },

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        redirect: Option<String>,
    },

    #[error("{service} responded with status {status}: {message}")]
    UpstreamError {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Webhook signature rejected: {message}")]
    SignatureError { message: String },

    #[error("Render error: {message}")]
    RenderError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Storage,
    Configuration,
    Client,
    Billing,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::ValidationError {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: resource.to_string(),
            id: id.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::ApiError(_) | AppError::UpstreamError { .. } => ErrorCategory::Network,
            AppError::DatabaseError(_) | AppError::IoError(_) => ErrorCategory::Storage,
            AppError::ConfigError { .. }
            | AppError::ConfigValidationError { .. }
            | AppError::InvalidConfigValueError { .. }
            | AppError::MissingConfigError { .. } => ErrorCategory::Configuration,
            AppError::ValidationError { .. }
            | AppError::NotFound { .. }
            | AppError::Unauthorized { .. }
            | AppError::Forbidden { .. }
            | AppError::SignatureError { .. } => ErrorCategory::Client,
            AppError::PlanLimitReached { .. } | AppError::Conflict { .. } => ErrorCategory::Billing,
            AppError::SerializationError(_)
            | AppError::RenderError { .. }
            | AppError::ProcessingError { .. } => ErrorCategory::Processing,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Client | ErrorCategory::Billing => ErrorSeverity::Low,
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Processing => ErrorSeverity::High,
            ErrorCategory::Storage | ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            AppError::SignatureError { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::PlanLimitReached { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ApiError(_) | AppError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            AppError::MissingConfigError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 給終端使用者看的訊息，不洩漏內部細節
    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Client | ErrorCategory::Billing => self.to_string(),
            ErrorCategory::Network => "An external service is unavailable right now".to_string(),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Storage => "The database could not complete the request".to_string(),
            ErrorCategory::Processing => "The request could not be processed".to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            AppError::MissingConfigError { .. }
            | AppError::InvalidConfigValueError { .. }
            | AppError::ConfigValidationError { .. }
            | AppError::ConfigError { .. } => {
                "Check the TOML configuration file and the environment variables it references"
            }
            AppError::DatabaseError(_) => "Verify the database path is writable and not locked",
            AppError::IoError(_) => "Check file permissions and available disk space",
            AppError::ApiError(_) | AppError::UpstreamError { .. } => {
                "Retry later; verify API keys and upstream base URLs"
            }
            AppError::PlanLimitReached { .. } => "Upgrade the plan or deactivate another guidebook",
            AppError::Unauthorized { .. } => "Sign in again to obtain a fresh token",
            AppError::RenderError { .. } => "Check that the PDF renderer program is installed",
            _ => "Review the request and try again",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(
                "❌ {} (Category: {:?}, Severity: {:?})",
                self,
                self.category(),
                self.severity()
            );
        }

        let body = match &self {
            AppError::Conflict {
                message,
                redirect: Some(redirect),
            } => serde_json::json!({ "error": message, "redirect": redirect }),
            _ => serde_json::json!({ "error": self.user_friendly_message() }),
        };

        (status, Json(body)).into_response()
    }
}
