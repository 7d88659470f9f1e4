use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use pollserv::auth::password::hash_password;
use pollserv::auth::token::{default_scopes, TokenService};
use pollserv::cache::ResultsCache;
use pollserv::config;
use pollserv::ratelimit::RateLimiter;
use pollserv::store::keyvalue::RedisKv;
use pollserv::store::postgres::PgStore;
use pollserv::vote::VoteService;
use pollserv::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pollserv=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Principal { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_principal_command(&db, command).await
        }
        Some(cli::Commands::Question { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_question_command(&db, command).await
        }
        Some(cli::Commands::Token { command }) => {
            let tokens = connect_token_service(&cfg).await?;
            handle_token_command(&cfg, &tokens, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect_token_service(cfg: &config::Config) -> anyhow::Result<TokenService> {
    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let kv = Arc::new(RedisKv::new(redis_conn));
    Ok(TokenService::new(kv, cfg.token_secret.clone()))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!("Connecting to Redis...");
    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let kv = Arc::new(RedisKv::new(redis_conn.clone()));

    let tokens = TokenService::new(kv.clone(), cfg.token_secret.clone());
    let limiter = RateLimiter::new(kv);
    let cache = ResultsCache::new(redis_conn);
    let votes = VoteService::new(db.clone(), cache.clone(), cfg.voting_enabled);

    let state = Arc::new(AppState {
        db,
        tokens,
        limiter,
        votes,
        cache: cache.clone(),
        config: cfg,
    });

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        // Vote and login bodies are tiny; cap requests well below default
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    // Bound the local cache tier: sweep expired entries every minute.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = cache.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "results cache sweep");
            }
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("pollserv listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn readiness_check() -> &'static str {
    "ok"
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    // API responses may carry tokens; keep them out of caches
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.remove("Server");

    resp
}

async fn handle_principal_command(
    db: &PgStore,
    cmd: cli::PrincipalCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::PrincipalCommands::Add { username, password } => {
            let (hash, salt) = hash_password(&password);
            let id = db.insert_principal(&username, &hash, &salt).await?;
            println!("Principal created:\n  ID:       {}\n  Username: {}", id, username);
        }
        cli::PrincipalCommands::List => {
            let principals = db.list_principals().await?;
            if principals.is_empty() {
                println!("No principals found.");
            } else {
                println!("{:<8} {:<24} {:<8}", "ID", "USERNAME", "ACTIVE");
                for p in principals {
                    println!("{:<8} {:<24} {:<8}", p.id, p.username, p.is_active);
                }
            }
        }
        cli::PrincipalCommands::Disable { id } => {
            let updated = db.set_principal_active(id, false).await?;
            if updated {
                println!("Principal {} disabled.", id);
            } else {
                println!("Principal {} not found.", id);
            }
        }
    }
    Ok(())
}

async fn handle_question_command(db: &PgStore, cmd: cli::QuestionCommands) -> anyhow::Result<()> {
    match cmd {
        cli::QuestionCommands::Add { title, hide_results } => {
            let id = db.insert_question(&title, !hide_results).await?;
            println!("Question created:\n  ID:    {}\n  Title: {}", id, title);
        }
        cli::QuestionCommands::AddOption {
            question_id,
            title,
            weight,
        } => {
            let id = db.insert_option(question_id, &title, weight).await?;
            println!(
                "Option created:\n  ID:       {}\n  Question: {}\n  Title:    {}",
                id, question_id, title
            );
        }
    }
    Ok(())
}

async fn handle_token_command(
    cfg: &config::Config,
    tokens: &TokenService,
    cmd: cli::TokenCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Issue { principal_id, ttl } => {
            let ttl = ttl.unwrap_or(cfg.token_ttl);
            let issued = tokens
                .issue(principal_id, ttl, default_scopes())
                .await
                .map_err(|e| anyhow::anyhow!("token issue failed: {e}"))?;
            println!(
                "Token issued (expires in {}s):\n  Use: Authorization: Bearer {}",
                issued.expires_in, issued.token
            );
        }
        cli::TokenCommands::Revoke { token } => {
            tokens
                .revoke(&token)
                .await
                .map_err(|e| anyhow::anyhow!("token revoke failed: {e}"))?;
            println!("Token revoked.");
        }
    }
    Ok(())
}
