use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use trackline_buffer::{MemoryBuffer, RedisBuffer};
use trackline_core::{
    buffer::BufferStore,
    clock::{Clock, SystemClock},
};
use trackline_server::state::AppState;

/// `trackline health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$TRACKLINE_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("TRACKLINE_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trackline=info".parse()?),
        )
        .json()
        .init();

    let cfg = trackline_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/trackline.db", cfg.data_dir);
    let db = trackline_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let buffer: Arc<dyn BufferStore> = match cfg.redis_url.as_deref() {
        Some(url) => {
            let redis = RedisBuffer::connect(url, cfg.buffer_ttl()).await?;
            info!("Buffer store: Redis");
            Arc::new(redis)
        }
        None => {
            tracing::warn!(
                "TRACKLINE_REDIS_URL not set. Buffering events in process memory; \
                 buffered data is lost on restart and cannot be shared between instances."
            );
            Arc::new(MemoryBuffer::new(Arc::clone(&clock), cfg.buffer_ttl()))
        }
    };

    let state = Arc::new(AppState::new(cfg.clone(), clock, buffer, db));

    let shutdown = CancellationToken::new();
    let scheduler_task = if cfg.scheduler_enabled {
        let scheduler = state.scheduler();
        let token = shutdown.clone();
        Some(tokio::spawn(async move { scheduler.run(token).await }))
    } else {
        info!("Rollup scheduler disabled (TRACKLINE_SCHEDULER=false)");
        None
    };

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = trackline_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        timezone = %cfg.timezone,
        "Trackline listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = server_shutdown.cancelled() => {}
        }
    })
    .await?;

    shutdown.cancel();
    if let Some(task) = scheduler_task {
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .ok();
    }

    Ok(())
}
