//! Leadflow worker entry point.

use std::sync::Arc;

use leadflow_core::clock::{Clock, SystemClock};
use leadflow_core::task::TaskKind;
use leadflow_leads::application::event_log::EventLog;
use leadflow_leads::application::reactions::standard_reactions;
use leadflow_leads::application::task_handlers::{AdConversionHandler, SendToCrmHandler};
use leadflow_store::{SqliteEventRepository, SqliteTaskQueue};
use leadflow_worker::config::WorkerSettings;
use leadflow_worker::error::AppError;
use leadflow_worker::http_adapters::{HttpConversionReporter, HttpCrmSender};
use leadflow_worker::worker::{HandlerRegistry, Worker, WorkerConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting leadflow worker");

    let settings = WorkerSettings::from_env()?;

    // Open the database and bring the schema up to date.
    let pool = leadflow_store::connect(&settings.database_url, settings.max_connections).await?;
    leadflow_store::MIGRATOR.run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = Arc::new(SqliteTaskQueue::with_max_attempts(
        pool.clone(),
        clock.clone(),
        settings.max_attempts,
    ));
    let log = Arc::new(EventLog::new(
        Arc::new(SqliteEventRepository::new(pool)),
        queue.clone(),
        standard_reactions(),
    ));

    let client = reqwest::Client::builder()
        .timeout(settings.http_timeout)
        .build()
        .map_err(|e| AppError::Config(format!("cannot build HTTP client: {e}")))?;
    let handlers = HandlerRegistry::new()
        .with(
            TaskKind::SendToCrm,
            Arc::new(SendToCrmHandler::new(
                log.clone(),
                Arc::new(HttpCrmSender::new(client.clone())),
                clock.clone(),
            )),
        )
        .with(
            TaskKind::SendAdConversion,
            Arc::new(AdConversionHandler::new(
                log,
                Arc::new(HttpConversionReporter::new(
                    client,
                    settings.ad_platform_endpoint.clone(),
                    settings.ad_platform_campaigns.clone(),
                )),
                clock,
            )),
        );

    let worker = Worker::new(
        queue,
        handlers,
        WorkerConfig {
            name: settings.worker_name.clone(),
            poll_interval: settings.poll_interval,
        },
    );

    // Stop after the current task on Ctrl-C.
    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { worker.run(shutdown).await });
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    // The worker may already have exited; nothing to notify then.
    let _ = stop.send(true);
    running
        .await
        .map_err(|e| AppError::Server(std::io::Error::other(e)))?;

    Ok(())
}
