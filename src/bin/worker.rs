//! Worker entrypoint: connects to the database, applies the schema, and
//! runs the polling loop until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use receipt_relay::logging::init_structured_logging;
use receipt_relay::notify::HttpNotifier;
use receipt_relay::provider::HttpProviderFactory;
use receipt_relay::storage::PgStorage;
use receipt_relay::worker::{ReceiptWorker, WorkerConfig};
use receipt_relay::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config = RelayConfig::from_env().context("loading configuration")?;

    let storage = PgStorage::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    storage.migrate().await.context("applying schema")?;
    let storage = Arc::new(storage);

    let providers =
        Arc::new(HttpProviderFactory::new(&config).context("building provider factory")?);
    let notifier = Arc::new(HttpNotifier::new(&config).context("building notifier")?);

    let worker = ReceiptWorker::new(
        storage,
        providers,
        notifier,
        WorkerConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            processing_grace: Duration::from_secs(config.processing_grace_secs),
            ..WorkerConfig::default()
        },
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    worker.run(shutdown).await;
    Ok(())
}
