use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    /// HMAC key for token digests. An empty value is tolerated at startup
    /// but fails the first operation that needs a digest.
    pub token_secret: String,
    /// Optional API key for the read endpoints. None = gate disabled.
    pub api_key: Option<String>,
    /// TTL in seconds for issued bearer tokens.
    pub token_ttl: u64,
    /// Global switch: when false every vote attempt is rejected.
    pub voting_enabled: bool,
    /// Vote quota per (principal, question) within one window.
    pub vote_rate_max: u64,
    /// Window in seconds for the vote quota.
    pub vote_rate_window: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let token_secret =
        std::env::var("POLL_TOKEN_SECRET").unwrap_or_else(|_| "CHANGE_ME_DEV_ONLY_SECRET".into());

    if token_secret == "CHANGE_ME_DEV_ONLY_SECRET" {
        let env_mode = std::env::var("POLL_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "POLL_TOKEN_SECRET is still the insecure placeholder. \
                 Set a proper random secret before running in production."
            );
        }
        eprintln!("⚠️  POLL_TOKEN_SECRET is not set — using insecure placeholder. Set a random secret for production.");
    }

    Ok(Config {
        port: std::env::var("POLL_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/pollserv".into()),
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
        token_secret,
        api_key: std::env::var("POLL_API_KEY").ok().filter(|k| !k.trim().is_empty()),
        token_ttl: std::env::var("POLL_TOKEN_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
        voting_enabled: std::env::var("POLL_VOTING_ENABLED")
            .ok()
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true),
        vote_rate_max: std::env::var("POLL_VOTE_RATE_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        vote_rate_window: std::env::var("POLL_VOTE_RATE_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    })
}
