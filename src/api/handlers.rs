use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::password::verify_password;
use crate::auth::token::{bearer_token, default_scopes, SCOPE_VOTE};
use crate::cache::results_key;
use crate::errors::AppError;
use crate::store::postgres::{OptionCountRow, OptionRow, QuestionRow};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub expires_at: i64,
    pub principal_id: i64,
    pub name: String,
    pub scopes: Vec<String>,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub option_id: i64,
}

#[derive(Deserialize, Default)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Serialize)]
pub struct PageMeta {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Serialize)]
pub struct QuestionSummary {
    pub id: i64,
    pub title: String,
    pub show_results: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct OptionSummary {
    pub id: i64,
    pub title: String,
    pub weight: i32,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct OptionResult {
    pub option_id: i64,
    pub title: String,
    pub votes: i64,
    pub percent: f64,
}

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;
const RESULTS_CACHE_TTL_SECS: u64 = 30;

/// `(page, per_page, offset)` with page >= 1 and per_page clamped to
/// `1..=100` (default 20). The offset saturates so an absurd client-chosen
/// page cannot overflow into a negative OFFSET.
pub fn paginate(params: &PaginationParams) -> (i64, i64, i64) {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    (page, per_page, (page - 1).saturating_mul(per_page))
}

fn total_pages(total: i64, per_page: i64) -> i64 {
    (total + per_page - 1) / per_page.max(1)
}

/// Share of `votes` in `total`, as a percentage with one decimal.
pub fn percent_of(votes: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (votes as f64 * 1000.0 / total as f64).round() / 10.0
}

fn question_summary(q: &QuestionRow) -> QuestionSummary {
    QuestionSummary {
        id: q.id,
        title: q.title.clone(),
        show_results: q.show_results,
        created_at: q.created_at.to_rfc3339(),
    }
}

fn option_summary(o: &OptionRow) -> OptionSummary {
    OptionSummary {
        id: o.id,
        title: o.title.clone(),
        weight: o.weight,
    }
}

fn bearer_from(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok()))
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/login — authenticate and receive a bearer token.
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(req) = body.map_err(|e| AppError::InvalidBody(e.body_text()))?;
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidBody("missing credentials".into()));
    }

    let principal = state
        .db
        .get_principal_by_username(username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&req.password, &principal.password_hash, &principal.password_salt) {
        tracing::warn!(username, "login failed: bad password");
        return Err(AppError::InvalidCredentials);
    }
    if !principal.is_active {
        return Err(AppError::PrincipalDisabled);
    }

    let scopes = default_scopes();
    let ttl = state.config.token_ttl;
    let issued = state.tokens.issue(principal.id, ttl, scopes.clone()).await?;

    Ok(Json(LoginResponse {
        access_token: issued.token,
        token_type: "Bearer",
        expires_in: issued.expires_in,
        expires_at: Utc::now().timestamp() + issued.expires_in as i64,
        principal_id: principal.id,
        name: principal.username,
        scopes,
    }))
}

/// POST /api/v1/logout — revoke the presented bearer token.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let bearer = bearer_from(&headers).ok_or(AppError::MissingToken)?;
    // Idempotent: revoking an unknown or expired token still succeeds.
    state.tokens.revoke(bearer).await?;
    Ok(Json(json!({ "ok": true, "message": "Token revoked." })))
}

/// GET /api/v1/questions — paginated listing of active questions.
pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (page, per_page, offset) = paginate(&params);
    let total = state.db.count_active_questions().await?;
    let items = state.db.list_active_questions(offset, per_page).await?;

    Ok(Json(json!({
        "data": items.iter().map(question_summary).collect::<Vec<_>>(),
        "meta": PageMeta {
            total,
            page,
            per_page,
            total_pages: total_pages(total, per_page),
        },
    })))
}

/// GET /api/v1/questions/{id} — question detail with paginated options.
pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (page, per_page, offset) = paginate(&params);
    let question = state
        .db
        .get_active_question(question_id)
        .await?
        .ok_or(AppError::QuestionNotFound)?;

    let options_total = state.db.count_options(question.id).await?;
    let options = state.db.list_options(question.id, offset, per_page).await?;

    Ok(Json(json!({
        "data": {
            "id": question.id,
            "title": question.title,
            "show_results": question.show_results,
            "options": options.iter().map(option_summary).collect::<Vec<_>>(),
        },
        "meta": {
            "options_total": options_total,
            "page": page,
            "per_page": per_page,
            "total_pages": total_pages(options_total, per_page),
        },
    })))
}

/// POST /api/v1/questions/{id}/votes — cast a vote.
///
/// Gate order: bearer with `poll:vote` scope, rate limit on
/// (principal, question), active principal, body validation, then the
/// casting engine (which owns the voting-enabled switch, question/option
/// checks, and the idempotent insert).
pub async fn post_vote(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<i64>,
    headers: HeaderMap,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bearer = bearer_from(&headers).ok_or(AppError::MissingToken)?;
    let cred = state.tokens.validate(bearer, Some(SCOPE_VOTE)).await?;
    let principal_id = cred.principal_id;

    // 10 votes per 60s per (principal, question) by default.
    let rate_key = format!("vote:uid:{}:q:{}", principal_id, question_id);
    let admitted = state
        .limiter
        .allow(
            &rate_key,
            state.config.vote_rate_max,
            state.config.vote_rate_window,
        )
        .await?;
    if !admitted {
        return Err(AppError::RateLimitExceeded {
            retry_after_secs: crate::ratelimit::retry_after_secs(state.config.vote_rate_window),
        });
    }

    let principal = state
        .db
        .get_principal(principal_id)
        .await?
        .ok_or(AppError::PrincipalDisabled)?;
    if !principal.is_active {
        return Err(AppError::PrincipalDisabled);
    }

    let Json(req) = body.map_err(|e| AppError::InvalidBody(e.body_text()))?;
    if req.option_id <= 0 {
        return Err(AppError::InvalidBody("missing or invalid option_id".into()));
    }

    let receipt = state
        .votes
        .cast_vote(question_id, req.option_id, principal_id)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "message": "Vote registered.",
        "vote": receipt,
    })))
}

/// GET /api/v1/questions/{id}/results — per-option counts and percentages.
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<i64>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (page, per_page, offset) = paginate(&params);
    let question = state
        .db
        .get_active_question(question_id)
        .await?
        .ok_or(AppError::QuestionNotFound)?;

    if !question.show_results {
        return Err(AppError::ResultsHidden);
    }

    // Only the default first page is cached; other pages go to Postgres.
    let cache_key = results_key(question.id);
    let cacheable = page == 1 && per_page == DEFAULT_PER_PAGE;
    if cacheable {
        if let Some(cached) = state.cache.get::<serde_json::Value>(&cache_key).await {
            return Ok(Json(cached));
        }
    }

    let total = state.db.total_votes(question.id).await?;
    let options_total = state.db.count_options(question.id).await?;
    let counts = state.db.option_counts(question.id, offset, per_page).await?;

    let options: Vec<OptionResult> = counts
        .into_iter()
        .map(|OptionCountRow { option_id, title, votes }| OptionResult {
            option_id,
            title,
            votes,
            percent: percent_of(votes, total),
        })
        .collect();

    let body = json!({
        "question": {
            "id": question.id,
            "title": question.title,
            "show_results": true,
        },
        "results": {
            "total_votes": total,
            "options": options,
        },
        "meta": {
            "options_total": options_total,
            "page": page,
            "per_page": per_page,
            "total_pages": total_pages(options_total, per_page),
        },
    });

    if cacheable {
        if let Err(e) = state
            .cache
            .set(&cache_key, &body, RESULTS_CACHE_TTL_SECS)
            .await
        {
            tracing::warn!("failed to cache results for question {}: {}", question.id, e);
        }
    }

    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        let (page, per_page, offset) = paginate(&PaginationParams::default());
        assert_eq!((page, per_page, offset), (1, 20, 0));

        let p = PaginationParams {
            page: Some(3),
            per_page: Some(50),
        };
        assert_eq!(paginate(&p), (3, 50, 100));

        let p = PaginationParams {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(paginate(&p), (1, 100, 0));

        let p = PaginationParams {
            page: Some(-2),
            per_page: Some(0),
        };
        assert_eq!(paginate(&p), (1, 1, 0));
    }

    #[test]
    fn pagination_offset_saturates_on_huge_page() {
        let p = PaginationParams {
            page: Some(i64::MAX),
            per_page: Some(100),
        };
        let (page, per_page, offset) = paginate(&p);
        assert_eq!(page, i64::MAX);
        assert_eq!(per_page, 100);
        // saturates instead of wrapping to a negative OFFSET
        assert_eq!(offset, i64::MAX);

        let p = PaginationParams {
            page: Some(i64::MAX - 1),
            per_page: Some(2),
        };
        assert_eq!(paginate(&p).2, i64::MAX);
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(1, 20), 1);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
    }

    #[test]
    fn percent_math() {
        assert_eq!(percent_of(0, 0), 0.0);
        assert_eq!(percent_of(5, 0), 0.0);
        assert_eq!(percent_of(1, 3), 33.3);
        assert_eq!(percent_of(2, 3), 66.7);
        assert_eq!(percent_of(3, 3), 100.0);
        assert_eq!(percent_of(1, 8), 12.5);
    }
}
