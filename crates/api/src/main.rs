//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{Adapters, rate_limit};
use clients::{HttpCatalog, HttpNotificationSink};
use inventory::PostgresInventoryLedger;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Picks real collaborators for whatever the configuration points at.
async fn adapters(config: &Config) -> Result<Adapters, BoxError> {
    let mut adapters = Adapters::in_memory();

    if config.catalog_url.is_some() || config.notification_url.is_some() {
        let client = clients::http_client(config.http_client_timeout)?;
        if let Some(url) = &config.catalog_url {
            tracing::info!(%url, "using remote catalog");
            adapters.catalog = Arc::new(HttpCatalog::new(client.clone(), url.as_str()));
        }
        if let Some(url) = &config.notification_url {
            tracing::info!(%url, "delivering notifications over HTTP");
            adapters.notifications = Arc::new(HttpNotificationSink::new(client, url.as_str()));
        }
    }

    if let Some(url) = &config.database_url {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        let ledger = PostgresInventoryLedger::new(pool);
        ledger.run_migrations().await?;
        tracing::info!("inventory ledger backed by PostgreSQL");
        adapters.ledger = Arc::new(ledger);
    }

    Ok(adapters)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = api::build_state(&config, adapters(&config).await?);
    let compaction = rate_limit::spawn_compaction(state.limiter.clone());
    let key_expiry =
        inventory::spawn_key_expiry(state.ledger.clone(), config.idempotency_key_retention);
    let payments = state.payments.clone();

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    compaction.abort();
    key_expiry.abort();
    payments.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}
