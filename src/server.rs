//! Application state, router construction, and server lifecycle.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tokio::signal;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::correlation;
use crate::handlers;
use crate::metrics::ProxyMetrics;
use crate::session::{ManagerConfig, SessionManager};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<ProxyMetrics>,
    pub max_payload_bytes: usize,
    pub started_at: Instant,
}

pub fn build_app(state: AppState, config: &Config) -> Router {
    let mut app = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route("/health", get(handlers::health))
        .route("/admin/sessions", get(handlers::admin_sessions));

    if config.observability.enable_metrics {
        app = app.route("/metrics", get(handlers::metrics));
    }

    app.with_state(state)
        .layer(axum::middleware::from_fn(
            correlation::propagate_request_id,
        ))
        .layer(cors_layer(&config.server.cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build everything, bind, and serve until ctrl-c/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let sessions = Arc::new(SessionManager::new(ManagerConfig {
        handshake_budget: config.session.handshake_budget(),
        turn_budget: config.session.turn_budget(),
        session_ttl: config.session.session_ttl(),
        max_sessions: config.session.max_sessions,
        evict_on_full: config.session.evict_on_full,
    }));
    let sweeper = Arc::clone(&sessions).spawn_sweeper(config.session.cleanup_interval());

    let state = AppState {
        sessions: Arc::clone(&sessions),
        metrics: Arc::new(ProxyMetrics::new()),
        max_payload_bytes: config.session.max_payload_bytes,
        started_at: Instant::now(),
    };
    let app = build_app(state, &config);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    sessions.shutdown();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
