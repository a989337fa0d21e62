//! Social Linker
//!
//! A small HTTP service that provides:
//!
//! 1. **Account linking**: Facebook and Instagram OAuth, with the resulting
//!    long-lived credential stored per user.
//!
//! 2. **Publishing**: a page post on Facebook, an image post on Instagram,
//!    using the stored credential.
//!
//! 3. **Meta webhooks**: subscription handshake and event intake.
//!
//! Callers identify themselves with a bearer identity token (a JWT issued
//! by the app's identity provider).

mod error;
mod identity;
mod linking;
mod state;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use identity::JwtIdentityVerifier;
use linking::LinkConfig;
use state::AppState;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "social-linker", version, about = "Social account linking service")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// Pending OAuth state lifetime in seconds
    #[arg(long, default_value_t = 900, env = "OAUTH_STATE_TTL_SECS")]
    state_ttl_secs: i64,

    /// Cleanup interval in seconds
    #[arg(
        long,
        default_value_t = 300,
        env = "CLEANUP_INTERVAL_SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    cleanup_interval_secs: u64,

    /// Timeout for each outbound provider request, in seconds
    #[arg(long, default_value_t = 10, env = "HTTP_TIMEOUT_SECS")]
    http_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "social_linker=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = LinkConfig {
        state_ttl_secs: args.state_ttl_secs,
        http_timeout_secs: args.http_timeout_secs,
        ..LinkConfig::from_env()
    };

    tracing::info!(
        facebook = config.facebook_enabled(),
        instagram = config.instagram_enabled(),
        webhook = config.meta_verify_token.is_some(),
        tiktok_forward = config.tiktok_callback_forward_url.is_some(),
        graph_api_version = config.graph_api_version.as_str(),
        "Providers configured"
    );

    let identity = JwtIdentityVerifier::new(&config.identity).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid identity verifier configuration");
        std::process::exit(1);
    });

    let state = AppState::new(config, Arc::new(identity)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to initialize state");
        std::process::exit(1);
    });

    // Spawn periodic cleanup task
    let cleanup_state = state.clone();
    let cleanup_interval = args.cleanup_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval));
        loop {
            interval.tick().await;
            cleanup_state.cleanup_expired();
        }
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Social linker starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Router ────────────────────────────────────────────────────────────────────

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route(
            "/auth/:provider/start",
            get(linking::api::auth_start).post(linking::api::auth_start),
        )
        .route("/auth/:provider/callback", get(linking::api::auth_callback))
        .route("/publish/facebook", post(linking::api::publish_facebook))
        .route("/publish/instagram", post(linking::api::publish_instagram))
        .route("/webhooks/meta", get(webhook::verify).post(webhook::receive))
        .route("/tiktok/callback", get(linking::tiktok::callback))
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer CORS preflight with 204 rather than the layer's 200.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

// ── Route Handlers ────────────────────────────────────────────────────────────

async fn ping_handler() -> impl IntoResponse {
    Json(json!({ "ok": true, "msg": "pong" }))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "social-linker",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "pending_authorizations": state.links.pending_count(),
        "linked_credentials": state.links.credential_count(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
