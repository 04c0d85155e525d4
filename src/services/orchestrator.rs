//! Wiring for the orchestration core.
//!
//! Both binaries build one [`Orchestrator`] from the same store, registry and
//! configuration: the API server uses its [`JobService`], the worker process
//! runs its [`WorkerPool`] and [`StallMonitor`].

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::db::JobStore;
use crate::services::access::{AccessPolicy, OwnerOrAdmin};
use crate::services::dispatcher::Dispatcher;
use crate::services::jobs::JobService;
use crate::services::metrics::{MetricsSink, QueueDepthSync};
use crate::services::processors::ProcessorRegistry;
use crate::services::queue::QueueSignal;
use crate::services::retry::RetryController;
use crate::services::stall_monitor::StallMonitor;
use crate::services::worker_pool::WorkerPool;

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    registry: Arc<ProcessorRegistry>,
    dispatcher: Arc<Dispatcher>,
    jobs: Arc<JobService>,
    metrics: MetricsSink,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn JobStore>, registry: ProcessorRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            registry,
            config: OrchestratorConfig::default(),
            metrics: MetricsSink::disabled(),
            signal: None,
            policy: Arc::new(OwnerOrAdmin),
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn jobs(&self) -> Arc<JobService> {
        self.jobs.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            self.dispatcher.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.config.worker_concurrency,
            self.config.soft_time_limit,
        ))
    }

    pub fn depth_sync(&self) -> QueueDepthSync {
        QueueDepthSync::new(
            self.store.clone(),
            self.metrics.clone(),
            self.config.depth_sync_interval,
        )
    }

    pub fn stall_monitor(&self) -> StallMonitor {
        StallMonitor::new(
            self.store.clone(),
            self.metrics.clone(),
            self.config.stall_threshold,
            self.config.stall_scan_interval,
        )
    }
}

pub struct OrchestratorBuilder {
    store: Arc<dyn JobStore>,
    registry: ProcessorRegistry,
    config: OrchestratorConfig,
    metrics: MetricsSink,
    signal: Option<Arc<QueueSignal>>,
    policy: Arc<dyn AccessPolicy>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: MetricsSink) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn signal(mut self, signal: Option<Arc<QueueSignal>>) -> Self {
        self.signal = signal;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Orchestrator {
        if self.registry.is_empty() {
            tracing::warn!("No processors registered; every submission will be rejected");
        }

        let mut dispatcher = Dispatcher::new(
            self.store.clone(),
            self.registry.kinds(),
            self.metrics.clone(),
            self.config.poll_interval,
        );
        if let Some(signal) = self.signal {
            dispatcher = dispatcher.with_signal(signal);
        }
        let dispatcher = Arc::new(dispatcher);

        let retries = RetryController::new(
            self.store.clone(),
            dispatcher.clone(),
            self.metrics.clone(),
            self.config.max_attempts,
        );
        let jobs = Arc::new(JobService::new(
            self.store.clone(),
            dispatcher.clone(),
            retries,
            self.policy,
        ));

        Orchestrator {
            store: self.store,
            registry: Arc::new(self.registry),
            dispatcher,
            jobs,
            metrics: self.metrics,
            config: self.config,
        }
    }
}
