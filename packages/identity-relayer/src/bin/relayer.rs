//! Identity relayer binary.

use identity_relayer::{create_router, AppState, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting identity relayer");

    let config: Config = config::Config::builder()
        .add_source(config::File::with_name("relayer").required(false))
        .add_source(
            config::Environment::with_prefix("RELAYER")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("allowed_contracts")
                .with_list_parse_key("replica_set_wallet_allowlist")
                .with_list_parse_key("wormhole.guardian_hosts")
                .with_list_parse_key("rate_limits.allowlist")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_else(|e| {
            // Fall back only when no config exists; parsing errors fail hard.
            let err_str = format!("{e}");
            if err_str.contains("not found") {
                warn!(error = %e, "No config file found, using defaults");
                Config::default()
            } else {
                error!(error = %e, "FATAL: Config error, fix env vars or relayer.toml");
                std::process::exit(1);
            }
        });

    info!(
        data_chain = config.data_chain.chain_id,
        data_rpc = %config.data_chain.rpc_url,
        eth_rpc = %config.eth_chain.rpc_url,
        "Configuration loaded"
    );

    // `relayer seal-keys` encrypts the plaintext key file and exits.
    if std::env::args().nth(1).as_deref() == Some("seal-keys") {
        let sealed = identity_relayer::key_store::seal_key_file(&config)?;
        info!(path = %config.keys_path, wallets = sealed, "Key file encrypted");
        return Ok(());
    }

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config).await?);

    let cancel = CancellationToken::new();
    let worker = match &state.wormhole {
        Some(wormhole) => {
            let handle = wormhole.spawn_worker(cancel.clone());
            if let Err(e) = wormhole.resume_pending().await {
                error!(error = %e, "Failed to resume pending wormhole transfers");
            }
            handle
        }
        None => None,
    };

    let app = create_router(state.clone());

    info!(address = %bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Transfers still in phase 3 stay in the pending set for the next start.
    info!("HTTP server stopped, stopping wormhole worker...");
    cancel.cancel();

    if let Some(handle) = worker {
        match tokio::time::timeout(std::time::Duration::from_secs(30), handle).await {
            Ok(_) => info!("Wormhole worker drained"),
            Err(_) => warn!("Wormhole worker drain timed out"),
        }
    }

    if let Some(wormhole) = &state.wormhole {
        let pending = wormhole.pending_count().await;
        if pending > 0 {
            info!(pending, "Wormhole transfers left for resume");
        }
    }

    info!("Relayer shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
