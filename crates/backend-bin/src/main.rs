use anyhow::Context;
use clap::Parser;
use ridelink_realtime::{config::Settings, ws_router, AppState};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Real-time notification and vehicle-location server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file, merged over the built-in defaults
    #[arg(long, default_value = ridelink_realtime::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Listen address, overrides `server.host` and `server.port`
    #[arg(long)]
    bind: Option<String>,

    /// Default log filter, overrides `log.level`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        settings.log.level = level;
    }
    if cli.json_logs {
        settings.log.json = true;
    }
    let addr = match cli.bind {
        Some(bind) => bind.parse().context("invalid --bind address")?,
        None => settings.bind_addr()?,
    };

    init_tracing(&settings);

    let state = AppState::from_settings(settings)?;
    let tasks = state.spawn_background_tasks();
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in tasks {
        task.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
