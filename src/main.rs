use anyhow::{Context, Result};
use std::{io::ErrorKind, time::Duration};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;
use wavshare::{build_app, config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting wavshare with config: {:?}", cfg);

    // --- Ensure local directories exist ---
    for dir in [
        cfg.tmp_dir.clone(),
        cfg.chunks_dir(),
        cfg.shares_dir(),
        cfg.local_files_dir(),
    ] {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    // --- Initialize services ---
    let state = AppState::from_config(cfg.clone()).await;
    spawn_sweeper(&state, cfg.sweep_interval_secs);

    // --- Build router ---
    let app = build_app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic expiry sweep. An interval of zero disables it.
fn spawn_sweeper(state: &AppState, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::info!("background sweep disabled");
        return;
    }
    let sweeper = state.sweeper.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately, so a sweep also runs at startup.
        loop {
            ticker.tick().await;
            let summary = sweeper.sweep().await;
            tracing::debug!(deleted = summary.total_deleted(), "background sweep done");
        }
    });
}
