use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use genjobs::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgJobStore, PgUserStore},
    routes,
    services::{
        accounts::AccountService,
        auth::JwtVerifier,
        metrics::{self as job_metrics, MetricsRecorder},
        orchestrator::Orchestrator,
        processors::ProcessorRegistry,
        queue::QueueSignal,
        storage::{ArtifactStore, R2Client},
    },
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

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let tuning = config
        .orchestrator()
        .expect("Invalid orchestrator configuration");

    tracing::info!("Initializing genjobs API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    job_metrics::describe();

    let (metrics_sink, metrics_recorder) = MetricsRecorder::channel();
    tokio::spawn(metrics_recorder.run());

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize R2 storage client
    tracing::info!("Initializing R2 storage client");
    let storage: Arc<dyn ArtifactStore> = Arc::new(
        R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )
        .expect("Failed to initialize R2 client"),
    );

    let queue = config.redis_url.as_deref().map(|url| {
        tracing::info!("Connecting to Redis for queue announcements");
        Arc::new(QueueSignal::new(url).expect("Failed to initialize Redis client"))
    });

    let auth = JwtVerifier::new(&config.jwt_secret).expect("Failed to initialize JWT verifier");

    // The API accepts exactly the kinds the worker fleet is configured to run.
    let registry = ProcessorRegistry::from_config(&config, storage.clone());
    tracing::info!(
        kinds = ?registry.kinds().iter().map(ToString::to_string).collect::<Vec<_>>(),
        "Accepting job kinds"
    );

    let accounts = AccountService::new(
        Arc::new(PgUserStore::new(db_pool.clone())),
        Arc::new(auth),
        Duration::from_secs(config.jwt_ttl_secs),
    );

    let orchestrator = Orchestrator::builder(Arc::new(PgJobStore::new(db_pool)), registry)
        .config(tuning)
        .metrics(metrics_sink)
        .signal(queue.clone())
        .build();

    // Completions happen in worker processes; re-read the gauge from the store.
    let shutdown = CancellationToken::new();
    let depth_sync = orchestrator.depth_sync();
    let depth_task = tokio::spawn({
        let cancel = shutdown.clone();
        async move { depth_sync.run(cancel).await }
    });

    let state = AppState::new(&orchestrator, storage, queue, accounts);

    let app = routes::router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    tracing::info!("Starting genjobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Err(e) = depth_task.await {
        tracing::error!(error = %e, "Queue depth sync task failed");
    }
}
