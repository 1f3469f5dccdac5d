//! Application entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::ExposeSecret;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use solana_reward_relayer::api::create_router;
use solana_reward_relayer::app::{
    AppConfig, AppState, LogFormat, ReconciliationScanner, RewardService, RewardWorker,
    spawn_scanner, spawn_worker,
};
use solana_reward_relayer::domain::{ChainAdapter, Notifier, RewardQueue, ScanLock};
use solana_reward_relayer::infra::{
    KeyVault, PostgresClient, PostgresConfig, RpcClientConfig, SolanaChainAdapter,
    WebhookNotifier, blockchain::decode_signing_key,
};

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    info!("Solana Reward Relayer v{}", env!("CARGO_PKG_VERSION"));

    let vault = Arc::new(KeyVault::new(&config.secret_key, &config.secret_iv));
    let signing_secret = vault
        .decrypt(config.encrypted_signing_key.expose_secret())
        .context("Failed to decrypt ADMIN_PRIVATE_KEY_SOLANA")?;
    let signer = decode_signing_key(&signing_secret)
        .context("ADMIN_PRIVATE_KEY_SOLANA does not hold a usable signing key")?;
    info!(
        signer = %bs58::encode(signer.verifying_key().as_bytes()).into_string(),
        custodial = %config.custodial_address,
        "Custodial key loaded"
    );

    let db_config = PostgresConfig {
        max_connections: config.db_max_connections,
        visibility_timeout: config.worker.visibility_timeout,
        ..Default::default()
    };
    let postgres = Arc::new(
        PostgresClient::new(&config.database_url, db_config)
            .await?
            .with_vault(Arc::clone(&vault)),
    );
    postgres.run_migrations().await?;
    info!("Database connected and migrations applied");

    let chain: Arc<dyn ChainAdapter> = Arc::new(SolanaChainAdapter::new(
        &config.rpc_url,
        &config.custodial_address,
        RpcClientConfig::default(),
    )?);
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new()?);
    let queue: Arc<dyn RewardQueue> = postgres.clone();
    let scan_lock: Arc<dyn ScanLock> = postgres;

    let service = Arc::new(RewardService::new(
        Arc::clone(&queue),
        Arc::clone(&chain),
        signing_secret,
        config.worker.max_attempts,
    ));
    let app_state = Arc::new(AppState::new(service, config.api_key.clone()));

    let worker_shutdown_tx = if config.worker.enabled {
        let worker = Arc::new(RewardWorker::new(
            Arc::clone(&queue),
            Arc::clone(&chain),
            Arc::clone(&notifier),
            config.worker.clone(),
            config.confirm_target(),
        ));
        let (_handle, shutdown_tx) = spawn_worker(worker);
        info!(concurrency = config.worker.concurrency, "Reward worker started");
        Some(shutdown_tx)
    } else {
        info!("Reward worker disabled");
        None
    };

    let scanner = Arc::new(ReconciliationScanner::new(
        Arc::clone(&chain),
        scan_lock,
        Arc::clone(&notifier),
        config.scanner.clone(),
        config.sync_target(),
    ));
    let (_scanner_handle, scanner_shutdown_tx) = spawn_scanner(scanner);

    let router = create_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server starting on http://{}", addr);
    info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx) = worker_shutdown_tx {
        let _ = tx.send(true);
    }
    let _ = scanner_shutdown_tx.send(true);

    info!("Server shutdown complete");
    Ok(())
}
