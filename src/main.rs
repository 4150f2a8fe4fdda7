use std::{sync::Arc, time::Duration};

use clipstream::{
    config::ServerConfig, download::AppState, error::ApiError, extractor::YtDlp, router,
    scratch::sweep_stale,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

const STALE_SCRATCH_SECONDS: u64 = 2 * 60 * 60;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "clipstream=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = ServerConfig::from_env();

    tokio::fs::create_dir_all(&config.scratch_root)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "could not create scratch root {}: {error}",
                config.scratch_root.display()
            ))
        })?;

    let swept = sweep_stale(
        &config.scratch_root,
        Duration::from_secs(STALE_SCRATCH_SECONDS),
    )
    .await;
    if swept > 0 {
        info!("removed {swept} stale scratch director(ies)");
    }

    if config
        .cookies_file
        .as_deref()
        .is_some_and(|path| !path.exists())
    {
        warn!("cookies file not found, downloads will run without cookies");
    }

    info!(
        engine = %config.yt_dlp_bin.display(),
        profile = %config.default_profile,
        timeout_secs = config.extraction_timeout.as_secs(),
        max_concurrent = config.max_concurrent_downloads,
        scratch_root = %config.scratch_root.display(),
        "configuration loaded"
    );

    let extractor = Arc::new(YtDlp::from_config(&config));
    let addr = config.bind_addr.clone();
    let app = router(AppState::new(config, extractor));

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("could not bind {addr}: {error}")))?;

    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
