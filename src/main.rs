//! Calsync API service entry point.
//!
//! Wires configuration, storage, provider adapters, the token lifecycle
//! manager, the aggregator, and the background retention sweep into one
//! process with a shared shutdown token.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sea_orm_migration::MigratorTrait;
use tokio_util::sync::CancellationToken;

use calsync::{
    aggregator::CalendarAggregator,
    config::ConfigLoader,
    crypto::CryptoKey,
    db,
    lifecycle::TokenLifecycleManager,
    maintenance::MaintenanceService,
    migration::Migrator,
    providers::{
        AdapterRegistry, build_http_client,
        google::{GoogleAdapter, GoogleConfig},
        microsoft::{MicrosoftAdapter, MicrosoftConfig},
        outlook::{OutlookAdapter, OutlookConfig},
    },
    server::{AppState, run_server},
    store::{SqlTokenStore, TokenStore},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ConfigLoader::new().load()?);
    telemetry::init_tracing(&config);

    tracing::info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "effective configuration");
    }

    let db = db::init_pool(&config).await?;
    Migrator::up(&db, None).await?;

    let key_bytes = config
        .crypto_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("crypto key missing after validation"))?;
    let crypto_key = CryptoKey::new(key_bytes)?;
    let store: Arc<dyn TokenStore> = Arc::new(SqlTokenStore::new(Arc::new(db.clone()), crypto_key));

    let http = build_http_client(Duration::from_millis(config.http_client.connect_timeout_ms))?;
    let registry = build_registry(&config, &http)?;
    if registry.is_empty() {
        tracing::warn!("no calendar provider credentials configured, aggregation will be empty");
    } else {
        tracing::info!(providers = ?registry.providers(), "calendar providers registered");
    }

    let safety_margin = ChronoDuration::seconds(config.token_refresh.safety_margin_seconds as i64);
    let lifecycle = TokenLifecycleManager::new(store.clone(), registry.clone(), safety_margin);
    let aggregator = CalendarAggregator::new(
        store.clone(),
        registry,
        lifecycle.clone(),
        config.aggregator.window_days,
        config.aggregator.fetch_concurrency,
    );

    let shutdown = CancellationToken::new();

    let maintenance = MaintenanceService::new(
        lifecycle.clone(),
        config.token_refresh.cleanup_interval_seconds,
        config.token_refresh.retention_days,
        config.token_refresh.cleanup_jitter_factor,
    );
    let maintenance_shutdown = shutdown.clone();
    let maintenance_handle = tokio::spawn(async move {
        maintenance.run(maintenance_shutdown).await;
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    let state = AppState {
        config: Arc::clone(&config),
        db,
        store,
        lifecycle,
        aggregator,
    };

    let result = run_server(Arc::clone(&config), state, shutdown.clone()).await;

    // The server has drained; stop the retention sweep before exiting.
    shutdown.cancel();
    let _ = maintenance_handle.await;

    result
}

fn build_registry(
    config: &calsync::config::AppConfig,
    http: &reqwest::Client,
) -> anyhow::Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    let refresh_timeout = Duration::from_secs(config.http_client.refresh_timeout_seconds);
    let fetch_timeout = Duration::from_secs(config.http_client.fetch_timeout_seconds);

    if let Some(client_id) = config.google_client_id.clone() {
        let adapter_config = GoogleConfig {
            refresh_timeout,
            fetch_timeout,
            page_size: config.aggregator.page_size,
            max_pages: config.aggregator.max_pages,
            ..GoogleConfig::new(client_id, config.google_client_secret.clone())
        };
        registry.register(Arc::new(GoogleAdapter::new(adapter_config, http.clone())))?;
    }

    if let Some(client_id) = config.microsoft_client_id.clone() {
        let adapter_config = MicrosoftConfig {
            refresh_timeout,
            fetch_timeout,
            page_size: config.aggregator.page_size,
            max_pages: config.aggregator.max_pages,
            ..MicrosoftConfig::new(client_id, config.microsoft_client_secret.clone())
        };
        registry.register(Arc::new(MicrosoftAdapter::new(
            adapter_config,
            http.clone(),
        )))?;
    }

    if let Some(client_id) = config.outlook_client_id.clone() {
        let adapter_config = OutlookConfig {
            refresh_timeout,
            fetch_timeout,
            page_size: config.aggregator.page_size,
            max_pages: config.aggregator.max_pages,
            ..OutlookConfig::new(client_id, config.outlook_client_secret.clone())
        };
        registry.register(Arc::new(OutlookAdapter::new(
            adapter_config,
            http.clone(),
        )))?;
    }

    Ok(registry)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
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
}
