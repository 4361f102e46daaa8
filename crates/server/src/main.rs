use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use genqueue_core::{
    create_authenticator, ledger_from_config, load_config, validate_config, Authenticator, Config,
    GenerationService, ProviderChoice, SanitizedConfig,
};
use genqueue_server::{api::create_router, state::AppState};

/// Config file location, overridable with `GENQUEUE_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` filters; `GENQUEUE_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("GENQUEUE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_validated_config(path: &Path) -> Result<Config> {
    info!("Loading configuration from {:?}", path);
    let config =
        load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?;
    validate_config(&config).context("Configuration validation failed")?;

    // Fingerprint of the effective settings without secrets.
    let sanitized = serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default();
    let fingerprint = format!("{:x}", Sha256::digest(sanitized.as_bytes()));
    info!(
        auth = ?config.auth.method,
        backup = %config.persistence.backup_path.display(),
        orphans = %config.persistence.orphan_path.display(),
        config_hash = &fingerprint[..16],
        "Configuration loaded"
    );

    if !config.provider.has_api_key() && !config.provider.allow_simulator {
        warn!("No provider API key and simulator disabled; submissions will fail with 500");
    }

    Ok(config)
}

async fn run() -> Result<()> {
    let config_path = std::env::var("GENQUEUE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_validated_config(&config_path)?;

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!(method = authenticator.label(), "Authenticator ready");

    let service = Arc::new(
        GenerationService::start(
            &config,
            ProviderChoice::FromConfig,
            ledger_from_config(&config.credits),
        )
        .await
        .context("Failed to start generation service")?,
    );

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let app = create_router(Arc::new(AppState::new(
        config,
        authenticator,
        Arc::clone(&service),
    )));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // Flush the snapshot even when serving failed.
    info!("Stopping generation service");
    service.shutdown().await;

    served.context("Server error")
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received Ctrl+C"),
        _ = sigterm => info!("Received SIGTERM"),
    }
}
