//! Task processors: the pluggable units that do the actual generation work.
//!
//! The orchestrator only sees two outcomes per call, a result key or an
//! error. Processors are registered per [`JobKind`] at start-up; submissions
//! for kinds without a processor are rejected before a job is created.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::config::AppConfig;
use crate::models::job::{FailureReason, ImageTransform, Job, JobId, JobInput, JobKind};
use crate::services::storage::{ArtifactStore, StorageError};

pub mod command;
pub mod workers_ai;

pub use command::CommandProcessor;
pub use workers_ai::WorkersAiProcessor;

/// What a processor receives for one dispatch of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub job_id: JobId,
    pub kind: JobKind,
    pub input: JobInput,
    pub attempt: i32,
}

impl From<&Job> for WorkItem {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            input: job.input.clone(),
            attempt: job.attempt_count,
        }
    }
}

#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Produce the artifact for `item` and return its storage key.
    async fn process(&self, item: &WorkItem) -> Result<String, ProcessorError>;
}

/// One processor per job kind, fixed at start-up.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobKind, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: JobKind, processor: Arc<dyn TaskProcessor>) -> &mut Self {
        if self.processors.insert(kind, processor).is_some() {
            tracing::warn!(kind = %kind, "Replacing registered processor");
        }
        self
    }

    pub fn with(mut self, kind: JobKind, processor: Arc<dyn TaskProcessor>) -> Self {
        self.register(kind, processor);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.processors.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Build the registry both binaries agree on from configuration.
    pub fn from_config(config: &AppConfig, storage: Arc<dyn ArtifactStore>) -> Self {
        let mut registry = Self::new();

        if let (Some(account_id), Some(api_token)) = (&config.cf_account_id, &config.cf_api_token) {
            let workers_ai: Arc<dyn TaskProcessor> = Arc::new(WorkersAiProcessor::new(
                account_id.clone(),
                api_token.clone(),
                storage.clone(),
            ));
            registry.register(JobKind::TextToImage, workers_ai.clone());
            for transform in ImageTransform::iter() {
                registry.register(JobKind::ImageToImage(transform), workers_ai.clone());
            }
        }

        if let Some(template) = &config.reconstruct_command {
            match CommandProcessor::from_template(
                template,
                PathBuf::from(&config.work_dir),
                storage.clone(),
            ) {
                Ok(processor) => {
                    registry.register(JobKind::ImageTo3d, Arc::new(processor));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid reconstruct_command");
                }
            }
        }

        registry
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{0}")]
    Failed(String),

    #[error("exceeded soft time limit of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("processor crashed: {0}")]
    Panicked(String),

    #[error("no processor registered for {0}")]
    Unregistered(JobKind),

    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("artifact storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessorError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ProcessorError::Timeout(_) => FailureReason::Timeout,
            _ => FailureReason::ProcessorError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskProcessor for Echo {
        async fn process(&self, item: &WorkItem) -> Result<String, ProcessorError> {
            Ok(format!("results/{}.png", item.job_id))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProcessorRegistry::new().with(JobKind::TextToImage, Arc::new(Echo));

        assert!(registry.get(JobKind::TextToImage).is_some());
        assert!(registry.get(JobKind::ImageTo3d).is_none());
        assert_eq!(registry.kinds(), vec![JobKind::TextToImage]);
    }

    #[test]
    fn test_only_timeouts_map_to_timeout_reason() {
        assert_eq!(
            ProcessorError::Timeout(Duration::from_secs(600)).reason(),
            FailureReason::Timeout
        );
        assert_eq!(
            ProcessorError::Panicked("boom".into()).reason(),
            FailureReason::ProcessorError
        );
        assert_eq!(
            ProcessorError::Timeout(Duration::from_secs(600)).to_string(),
            "exceeded soft time limit of 600s"
        );
    }

    #[test]
    fn test_work_item_carries_original_input() {
        let job = Job::new(JobKind::TextToImage, JobInput::prompt("a red cube"), "u");
        let item = WorkItem::from(&job);
        assert_eq!(item.input, job.input);
        assert_eq!(item.attempt, 1);
    }
}
