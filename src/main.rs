use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yuga::ai::build_provider;
use yuga::api::auth::ensure_dev_user;
use yuga::api::rate_limit::spawn_cleanup_task;
use yuga::config::Config;
use yuga::runtime::detect_runtime;
use yuga::AppState;

#[derive(Parser, Debug)]
#[command(name = "yuga")]
#[command(author, version, about = "Backend for the Yuga AI game editor", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "YUGA_CONFIG", default_value = "yuga.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long, env = "YUGA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Override the data directory (database, assets, workspaces)
    #[arg(short, long, env = "YUGA_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Yuga backend v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    let db = yuga::db::init(&config.server.data_dir).await?;

    let runtime = detect_runtime(&config.sandbox).await;
    let ai = build_provider(&config.ai);

    let (mut state, worker) = AppState::new(config.clone(), db.clone(), runtime, ai);

    if config.auth.disabled {
        let user = ensure_dev_user(&db, &config.auth.dev_user_email).await?;
        tracing::warn!(
            "Authentication is DISABLED; every request acts as {}",
            user.email
        );
        state = state.with_dev_user(user);
    }

    if let Some(handle) = yuga::api::metrics::init_metrics() {
        state = state.with_metrics(handle);
    }

    let state = Arc::new(state);

    tokio::spawn(worker.run());

    if config.rate_limit.enabled {
        spawn_cleanup_task(state.rate_limiter.clone(), config.rate_limit.cleanup_interval);
    }

    let app = yuga::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
