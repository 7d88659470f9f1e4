//! pollserv — poll voting API.
//!
//! Authenticated principals cast exactly one vote per question. Bearer
//! tokens live in an expiring key-value store keyed by HMAC digest, vote
//! attempts pass a fixed-window rate limiter, and the vote insert is
//! idempotent per (question, principal) under concurrency.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod ratelimit;
pub mod store;
pub mod vote;

use cache::ResultsCache;
use ratelimit::RateLimiter;
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub tokens: auth::token::TokenService,
    pub limiter: RateLimiter,
    pub votes: vote::VoteService,
    pub cache: ResultsCache,
    pub config: config::Config,
}
