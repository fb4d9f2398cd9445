//! Alert Notifier Service - main entry point
//!
//! Runs the Kafka alert consumer and the registration HTTP API side by side
//! until SIGINT/SIGTERM, then leaves the group and drains in-flight
//! notifications before exiting.

use actix_web::{web, App, HttpServer};
use alert_notifier_service::{
    db, handlers,
    repository::{
        InMemoryRegistrationRepository, PostgresRegistrationRepository, RegistrationRepository,
        RegistrationResolver,
    },
    AlertEventsConsumer, Config, ConsumerError, KafkaConsumerGroup, NotificationDispatcher,
    RegistrationService, RegistrationStore, TelegramSender,
};
use anyhow::{Context, Result};
use opentelemetry_config::{init_tracing, TracingConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;

const SERVICE_NAME: &str = "alert-notifier-service";
const DEFAULT_LOG_FILTER: &str = "info,alert_notifier_service=debug,rdkafka=warn";

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let tracing_config = TracingConfig::from_env().with_default_filter(DEFAULT_LOG_FILTER);
    let telemetry =
        init_tracing(SERVICE_NAME, &tracing_config).context("Failed to initialize tracing")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        exporting_spans = telemetry.is_exporting(),
        "Starting alert notifier service"
    );

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let repository = build_repository(&config).await?;

    let sender = TelegramSender::new(config.telegram_sender_config())
        .map_err(anyhow::Error::msg)
        .context("Failed to create Telegram sender")?;
    let dispatcher = NotificationDispatcher::new(
        Arc::new(RegistrationResolver::new(repository.clone())),
        Arc::new(sender),
    );

    let group = KafkaConsumerGroup::new(&config.kafka_group_config())
        .context("Failed to create Kafka consumer group")?;
    let consumer_config = config
        .alert_consumer_config()
        .map_err(anyhow::Error::msg)?;
    let consumer = Arc::new(
        AlertEventsConsumer::new(Arc::new(group), Arc::new(dispatcher), consumer_config)
            .context("Failed to create alert consumer")?,
    );

    let shutdown = CancellationToken::new();
    let mut consumer_task: JoinHandle<std::result::Result<(), ConsumerError>> = tokio::spawn({
        let consumer = consumer.clone();
        let token = shutdown.clone();
        async move { consumer.run(token).await }
    });

    let registration_service = web::Data::new(RegistrationService::new(repository));
    let metrics_registry = web::Data::new(consumer.registry().clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(registration_service.clone())
            .app_data(metrics_registry.clone())
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(("0.0.0.0", config.http_port))
    .with_context(|| format!("Failed to bind HTTP port {}", config.http_port))?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    let mut server_task = actix_rt::spawn(server);

    info!(port = config.http_port, "HTTP server listening");

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            shutdown.cancel();
            consumer_outcome((&mut consumer_task).await)
        }
        joined = &mut consumer_task => consumer_outcome(joined),
        served = &mut server_task => {
            shutdown.cancel();
            if let Err(e) = consumer_outcome((&mut consumer_task).await) {
                error!(error = %e, "Alert consumer failed during shutdown");
            }
            match served {
                Ok(Ok(())) => Err(anyhow::anyhow!("HTTP server stopped unexpectedly")),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("HTTP server failed")),
                Err(e) => Err(anyhow::Error::new(e).context("HTTP server task failed")),
            }
        }
    };

    // The consumer may have exited on its own; stop whatever is still running
    shutdown.cancel();
    server_handle.stop(true).await;
    if !server_task.is_finished() {
        if let Ok(Err(e)) = server_task.await {
            warn!(error = %e, "HTTP server exited with error");
        }
    }

    if consumer.wait_for_in_flight(config.shutdown_grace()).await {
        info!("In-flight notifications drained");
    }

    let metrics = consumer.metrics();
    info!(
        received = metrics.messages_received_total.get(),
        dispatched = metrics.dispatches_total.get(),
        delivered = metrics.deliveries_total.get(),
        failed = metrics.delivery_failures_total.get(),
        "Alert notifier service stopped"
    );

    telemetry.shutdown();
    outcome
}

async fn build_repository(config: &Config) -> Result<Arc<dyn RegistrationRepository>> {
    match config.registration_store {
        RegistrationStore::Postgres => {
            let database_url = config.database_url().map_err(anyhow::Error::msg)?;
            let pool = db::init_pool(database_url, config.database_max_connections)
                .await
                .context("Failed to initialize database")?;
            let repository = PostgresRegistrationRepository::new(pool);
            repository
                .health_check()
                .await
                .context("Database health check failed")?;
            Ok(Arc::new(repository))
        }
        RegistrationStore::Memory => {
            warn!("Using in-memory registration store; registrations are lost on restart");
            Ok(Arc::new(InMemoryRegistrationRepository::new()))
        }
    }
}

fn consumer_outcome(
    joined: std::result::Result<std::result::Result<(), ConsumerError>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("Alert consumer failed")),
        Err(e) => Err(anyhow::Error::new(e).context("Alert consumer task failed")),
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
