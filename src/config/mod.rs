use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Ignored by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus scrape address served by worker processes
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string. When set, submissions wake idle workers in
    /// other processes instead of waiting for the next poll.
    pub redis_url: Option<String>,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Lifetime of tokens issued by the login endpoint
    #[serde(default = "default_jwt_ttl_secs")]
    pub jwt_ttl_secs: u64,

    /// Concurrent execution slots per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,

    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,

    #[serde(default = "default_stall_scan_interval_secs")]
    pub stall_scan_interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// How often each process re-reads the queue depth gauge from the store
    #[serde(default = "default_depth_sync_interval_secs")]
    pub depth_sync_interval_secs: u64,

    /// Fallback poll interval for idle worker slots
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Cloudflare account ID (enables the Workers AI processors)
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    pub cf_api_token: Option<String>,

    /// R2 bucket name for uploads and results
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Image-to-3D reconstruction command, e.g.
    /// `python run.py {input} --output {output}`
    pub reconstruct_command: Option<String>,

    /// Scratch directory for external processors
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_jwt_ttl_secs() -> u64 {
    3600
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_soft_time_limit_secs() -> u64 {
    600
}

fn default_stall_threshold_secs() -> u64 {
    300
}

fn default_stall_scan_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> i32 {
    3
}

fn default_depth_sync_interval_secs() -> u64 {
    15
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_work_dir() -> String {
    "output".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn orchestrator(&self) -> Result<OrchestratorConfig, ConfigError> {
        OrchestratorConfig {
            worker_concurrency: self.worker_concurrency,
            soft_time_limit: Duration::from_secs(self.soft_time_limit_secs),
            stall_threshold: Duration::from_secs(self.stall_threshold_secs),
            stall_scan_interval: Duration::from_secs(self.stall_scan_interval_secs),
            max_attempts: self.max_attempts,
            depth_sync_interval: Duration::from_secs(self.depth_sync_interval_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
        .validated()
    }
}

/// Tuning for the dispatch, execution and recovery loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub worker_concurrency: usize,
    /// A processor call running longer than this is abandoned and failed.
    pub soft_time_limit: Duration,
    /// Processing jobs older than this are force-failed as stalled.
    pub stall_threshold: Duration,
    pub stall_scan_interval: Duration,
    /// Total dispatch cycles allowed per job, counting the first.
    pub max_attempts: i32,
    pub depth_sync_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            soft_time_limit: Duration::from_secs(default_soft_time_limit_secs()),
            stall_threshold: Duration::from_secs(default_stall_threshold_secs()),
            stall_scan_interval: Duration::from_secs(default_stall_scan_interval_secs()),
            max_attempts: default_max_attempts(),
            depth_sync_interval: Duration::from_secs(default_depth_sync_interval_secs()),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
        }
    }
}

impl OrchestratorConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("worker_concurrency must be at least 1"));
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1"));
        }
        if self.soft_time_limit.is_zero() || self.stall_scan_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "soft_time_limit and stall_scan_interval must be non-zero",
            ));
        }
        if self.poll_interval.is_zero() || self.depth_sync_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval and depth_sync_interval must be non-zero",
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
