use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pet_tee::{
    config::AppConfig,
    db,
    services::{
        generation::ReplicateClient,
        queue::{RedisQueue, WorkQueue},
        storage::R2Client,
        store::PgTaskStore,
    },
    worker::{shutdown_signal, TaskWorker, WorkerSettings},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image generation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("WORKER_METRICS_ADDR must be host:port");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }

    metrics::describe_counter!("tasks_completed_total", "Tasks that reached DONE");
    metrics::describe_counter!("tasks_failed_total", "Tasks that reached ERROR");
    metrics::describe_counter!("tasks_dropped_total", "Queue entries discarded without processing");
    metrics::describe_counter!("tasks_stuck_total", "Tasks left IN_PROGRESS by a failed terminal write");
    metrics::describe_histogram!("task_processing_seconds", "Time from claim to terminal state");
    metrics::describe_gauge!("task_queue_depth", "Pending entries on the work queue");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, db::WORKER_MAX_CONNECTIONS)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let queue = RedisQueue::new(&config.redis_url, &config.queue_name)
        .expect("Failed to initialize work queue");
    queue
        .health_check()
        .await
        .expect("Failed to reach Redis");

    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let generator = ReplicateClient::new(
        &config.replicate_base_url,
        &config.replicate_model,
        &config.replicate_api_token,
        config.generation_timeout(),
    )
    .expect("Failed to initialize Replicate client");

    let worker = TaskWorker::new(
        Arc::new(PgTaskStore::new(db_pool)),
        Arc::new(queue),
        Arc::new(generator),
        Arc::new(r2_client),
        WorkerSettings {
            dequeue_timeout: config.dequeue_timeout(),
            drain_timeout: config.drain_timeout(),
            retry_backoff: config.store_retry_backoff(),
        },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    worker.run(shutdown).await;
}
