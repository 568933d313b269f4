//! # Footprint HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /chains` - Create a chain (caller becomes owner)
//! - `GET /chains/{chain_id}` - All instances of a chain
//! - `GET /instances/{instance_id}` - Instance, roster and progress
//! - `POST /instances/{instance_id}/members` - Add a member
//! - `POST /instances/{instance_id}/complete` - Complete the caller's stage
//! - `POST /instances/{instance_id}/accrue` - Apply a session-stop event
//! - `POST /instances/{instance_id}/archive` - Archive an instance
//! - `POST /sweep` - Run a completion sweep
//!
//! Endpoints acting for a user read the caller from `X-User-Id`.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `FOOTPRINT_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `FOOTPRINT_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `FOOTPRINT_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod error;
mod handlers;
mod middleware;
pub mod types;

pub use auth::{CurrentUser, USER_ID_HEADER, get_api_key_from_env};
pub use error::{ApiError, status_for};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};

use crate::services::Services;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use footprint_core::FootprintError;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

impl AppState {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services: Arc::new(services),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

fn allowed_headers() -> [HeaderName; 3] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static(USER_ID_HEADER),
    ]
}

/// Build CORS layer from `FOOTPRINT_CORS_ORIGINS`.
///
/// - `*`: all origins (development only)
/// - unset: localhost only
/// - otherwise: comma-separated list of origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("FOOTPRINT_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (FOOTPRINT_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in FOOTPRINT_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(allowed_headers())
            }
        }
        None => {
            tracing::info!("CORS: No FOOTPRINT_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(allowed_headers())
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Rate Limiting - if enabled
/// 4. Authentication - if an API key is configured
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set FOOTPRINT_API_KEY environment variable to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/chains", post(handlers::create_chain_handler))
        .route("/chains/{chain_id}", get(handlers::chain_handler))
        .route("/instances/{instance_id}", get(handlers::instance_handler))
        .route(
            "/instances/{instance_id}/members",
            post(handlers::add_member_handler),
        )
        .route(
            "/instances/{instance_id}/complete",
            post(handlers::complete_handler),
        )
        .route(
            "/instances/{instance_id}/accrue",
            post(handlers::accrue_handler),
        )
        .route(
            "/instances/{instance_id}/archive",
            post(handlers::archive_handler),
        )
        .route("/sweep", post(handlers::sweep_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// BACKGROUND SWEEP
// =============================================================================

/// Spawn the periodic completion sweep. `interval_secs == 0` disables it.
pub fn spawn_sweep_task(
    services: Arc<Services>,
    interval_secs: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        tracing::info!("Completion sweep disabled");
        return None;
    }

    tracing::info!("Completion sweep every {} seconds", interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let services = Arc::clone(&services);
            match tokio::task::spawn_blocking(move || services.engine.sweep()).await {
                Ok(Ok(report)) => tracing::debug!(
                    scanned = report.scanned,
                    advanced = report.advanced,
                    completed = report.completed,
                    failed = report.failed,
                    "periodic sweep finished"
                ),
                Ok(Err(e)) => tracing::error!(error = %e, "periodic sweep failed"),
                Err(e) => tracing::error!(error = %e, "periodic sweep task panicked"),
            }
        }
    }))
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Start the HTTP server and the sweep task; returns on Ctrl-C.
pub async fn run_server(
    addr: &str,
    services: Services,
    sweep_interval_secs: u64,
) -> Result<(), FootprintError> {
    let state = AppState::new(services);
    let sweeper = spawn_sweep_task(Arc::clone(&state.services), sweep_interval_secs);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FootprintError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Footprint HTTP server listening on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| FootprintError::Io(format!("Server error: {}", e)));

    if let Some(handle) = sweeper {
        handle.abort();
    }
    served
}
