use genjobs::{
    config::AppConfig,
    db::{self, PgJobStore},
    services::{
        metrics::{self as job_metrics, MetricsRecorder},
        orchestrator::Orchestrator,
        processors::ProcessorRegistry,
        queue::QueueSignal,
        storage::{ArtifactStore, R2Client},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting generation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let tuning = config
        .orchestrator()
        .expect("Invalid orchestrator configuration");

    // Completion, failure and stall counters originate here, so the worker
    // serves its own scrape endpoint.
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");
    job_metrics::describe();
    tracing::info!(%metrics_addr, "Serving worker metrics");

    let (metrics_sink, metrics_recorder) = MetricsRecorder::channel();
    tokio::spawn(metrics_recorder.run());

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage: Arc<dyn ArtifactStore> = Arc::new(
        R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )
        .expect("Failed to initialize R2 client"),
    );

    let queue = config
        .redis_url
        .as_deref()
        .map(|url| Arc::new(QueueSignal::new(url).expect("Failed to initialize Redis client")));

    let registry = ProcessorRegistry::from_config(&config, storage);
    let run_slots = !registry.is_empty();
    if !run_slots {
        tracing::warn!("No processors configured; this worker will only run stall recovery");
    }

    let orchestrator = Orchestrator::builder(Arc::new(PgJobStore::new(db_pool)), registry)
        .config(tuning)
        .metrics(metrics_sink)
        .signal(queue.clone())
        .build();

    let cancel = CancellationToken::new();
    let pool = orchestrator.worker_pool();
    let monitor = orchestrator.stall_monitor();

    if let Some(queue) = queue {
        let wake = orchestrator.dispatcher().wake_handle();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.forward_to(wake, cancel).await {
                tracing::warn!(error = %e, "Queue subscription ended, falling back to polling");
            }
        });
    }

    let depth_sync = orchestrator.depth_sync();
    let depth_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { depth_sync.run(cancel).await }
    });

    let monitor_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });
    let pool_task = run_slots.then(|| tokio::spawn(pool.run(cancel.clone())));

    tracing::info!(processing = run_slots, "Worker ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received, draining in-flight jobs");
    cancel.cancel();

    // Slots finish their current job before exiting. Anything left
    // `processing` by a hard kill is recovered by the next stall scan.
    if let Some(pool_task) = pool_task {
        if let Err(e) = pool_task.await {
            tracing::error!(error = %e, "Worker pool task failed");
        }
    }
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "Stall monitor task failed");
    }
    if let Err(e) = depth_task.await {
        tracing::error!(error = %e, "Queue depth sync task failed");
    }

    tracing::info!("Worker stopped");
}
