use clap::Parser;
use silo_thermo::levels::LevelEngine;
use silo_thermo::settings::{Settings, StoreBackend};
use silo_thermo::web::{self, AppState};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a settings file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective settings to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Override the HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve from a JSON fixture instead of the configured store
    #[arg(long)]
    fixture: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut settings = Settings::new(args.config.clone())?;

    let default_level = if settings.settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = args.dump_config {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => "yaml",
            _ => "toml",
        };
        std::fs::write(&path, settings.dump(format)?)?;
        tracing::info!("Settings written to {:?}", path);
        return Ok(());
    }

    if let Some(port) = args.port {
        settings.settings.port = port;
    }
    if let Some(fixture) = args.fixture {
        tracing::info!("Demo mode: serving fixture {:?}", fixture);
        settings.store.backend = StoreBackend::Fixture;
        settings.store.fixture_path = fixture;
    }

    let engine = LevelEngine::from_settings(&settings)?;
    let router = web::create_router(AppState::new(engine));

    let addr = format!("{}:{}", settings.settings.bind, settings.settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("silo-thermo listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
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
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
