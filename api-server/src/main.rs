//! SheetDrop server - email signup API backed by Google Sheets.
//!
//! Startup order:
//! 1. Structured JSON logging
//! 2. Configuration from the environment (a local `.env` is honoured)
//! 3. Prometheus recorder (when the metrics flag is on)
//! 4. Shared HTTP client and Sheets adapter
//! 5. Router with trace + CORS layers, graceful shutdown on SIGINT/SIGTERM

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sheetdrop::metrics::init_metrics_recorder;
use sheetdrop::web::{router, AppState};
use sheetdrop::{Config, SheetsClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        host = %config.host,
        port = config.port,
        default_sheet_tab = %config.default_sheet_tab,
        turnstile_enabled = config.turnstile_enabled(),
        discord_configured = config.discord_webhook_url.is_some(),
        metrics_enabled = config.metrics_enabled,
        "config_loaded"
    );

    // Install the Prometheus recorder before anything records a metric
    let metrics_handle = if config.metrics_enabled {
        let handle = init_metrics_recorder().map_err(|e| anyhow::anyhow!(e))?;
        info!("metrics_recorder_installed");
        Some(handle)
    } else {
        None
    };

    // Shared HTTP client for all vendor calls
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .context("Failed to build HTTP client")?;

    // Sheets adapter (fails fast on missing credentials)
    let sheets = SheetsClient::new(http.clone(), &config)?;
    info!(spreadsheet_id = %config.spreadsheet_id, "sheets_client_created");

    let cors = cors_layer(&config.cors_origins);

    let state = AppState::new(config.clone(), sheets, http, metrics_handle);
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid host/port")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server_shutdown_complete");

    Ok(())
}

/// Build the CORS layer from the configured origin list. `*` means any
/// origin; otherwise only the listed origins are allowed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE])
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE])
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("server_shutting_down");
}
