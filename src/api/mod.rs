use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};

use crate::auth::password::constant_time_eq;
use crate::errors::AppError;
use crate::AppState;

pub mod handlers;

/// Build the poll API router. All routes are relative — the caller mounts
/// this under `/api/v1`. The optional API-key gate covers the question,
/// vote and results routes; login/logout stay open (login is how a caller
/// obtains credentials in the first place).
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let gated = Router::new()
        .route("/questions", get(handlers::list_questions))
        .route("/questions/:id", get(handlers::get_question))
        .route("/questions/:id/votes", post(handlers::post_vote))
        .route("/questions/:id/results", get(handlers::get_results))
        .layer(middleware::from_fn_with_state(state, api_key_auth));

    Router::new()
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .merge(gated)
}

/// Middleware: when `POLL_API_KEY` is configured, the `X-API-Key` header
/// must match it. Comparison is constant-time. No key configured = gate
/// disabled.
async fn api_key_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &state.config.api_key {
        let provided = req
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(expected, provided) {
            tracing::warn!("rejected request with missing or invalid X-API-Key");
            return Err(AppError::InvalidApiKey);
        }
    }
    Ok(next.run(req).await)
}
