use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    TokenNotFound,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("principal disabled")]
    PrincipalDisabled,

    #[error("insufficient scope")]
    InsufficientScope,

    #[error("voting is disabled")]
    VotingDisabled,

    #[error("question not found")]
    QuestionNotFound,

    #[error("option not found for this question")]
    OptionNotFound,

    #[error("results are hidden for this question")]
    ResultsHidden,

    #[error("already voted on this question")]
    AlreadyVoted,

    #[error("rate limit exceeded")]
    RateLimitExceeded {
        /// Seconds until the current window rolls over.
        retry_after_secs: u64,
    },

    #[error("token secret is not configured")]
    SecretNotConfigured,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidBody(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_body",
                m.clone(),
            ),
            AppError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_token",
                "missing bearer token".to_string(),
            ),
            AppError::TokenNotFound => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "token_not_found",
                "invalid or expired token".to_string(),
            ),
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_api_key",
                "invalid API key".to_string(),
            ),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credentials",
                "invalid credentials".to_string(),
            ),
            AppError::PrincipalDisabled => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "principal_disabled",
                "principal is disabled".to_string(),
            ),
            AppError::InsufficientScope => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "insufficient_scope",
                "token lacks the required scope".to_string(),
            ),
            AppError::VotingDisabled => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "voting_disabled",
                "voting is disabled".to_string(),
            ),
            AppError::QuestionNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "question_not_found",
                "question not found or disabled".to_string(),
            ),
            AppError::OptionNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "option_not_found",
                "option not found for this question".to_string(),
            ),
            AppError::ResultsHidden => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "results_hidden",
                "results are hidden for this question".to_string(),
            ),
            AppError::AlreadyVoted => (
                StatusCode::BAD_REQUEST,
                "conflict_error",
                "already_voted",
                "you have already voted on this question".to_string(),
            ),
            AppError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                "rate limit exceeded, try again later".to_string(),
            ),
            AppError::SecretNotConfigured => {
                tracing::error!("token secret is not configured");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    "secret_not_configured",
                    "server misconfiguration".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("redis error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // Rate-limit rejections are retryable once the window rolls over.
        if let AppError::RateLimitExceeded { retry_after_secs } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", val);
            }
        }

        response
    }
}
