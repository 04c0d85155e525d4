//! Scripted task processors and sample payloads for orchestration tests

use async_trait::async_trait;
use genjobs::models::job::JobId;
use genjobs::services::processors::{ProcessorError, TaskProcessor, WorkItem};
use genjobs::services::storage::{result_key, ArtifactStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Smallest byte string `image::guess_format` accepts as PNG.
pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

pub const RESULT_BYTES: &[u8] = b"generated artifact";

/// What a [`ScriptedProcessor`] does on every call.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(&'static str),
    Panic,
    Sleep(Duration),
}

/// Processor that follows a fixed script and records every call.
pub struct ScriptedProcessor {
    script: Script,
    storage: Option<Arc<dyn ArtifactStore>>,
    calls: Mutex<HashMap<JobId, Vec<i32>>>,
}

impl ScriptedProcessor {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            storage: None,
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Like `new`, but successful calls also write [`RESULT_BYTES`] to
    /// `storage` under the returned key.
    pub fn storing(script: Script, storage: Arc<dyn ArtifactStore>) -> Arc<Self> {
        Arc::new(Self {
            script,
            storage: Some(storage),
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Attempts this processor was invoked with for `job_id`.
    pub fn attempts_for(&self, job_id: JobId) -> Vec<i32> {
        self.calls
            .lock()
            .unwrap()
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().map(Vec::len).sum()
    }

    async fn succeed(&self, item: &WorkItem) -> Result<String, ProcessorError> {
        let key = result_key(item.job_id, "png");
        if let Some(storage) = &self.storage {
            storage.put(&key, RESULT_BYTES, "image/png").await?;
        }
        Ok(key)
    }
}

#[async_trait]
impl TaskProcessor for ScriptedProcessor {
    async fn process(&self, item: &WorkItem) -> Result<String, ProcessorError> {
        self.calls
            .lock()
            .unwrap()
            .entry(item.job_id)
            .or_default()
            .push(item.attempt);

        match &self.script {
            Script::Succeed => self.succeed(item).await,
            Script::Fail(message) => Err(ProcessorError::Failed(message.to_string())),
            Script::Panic => panic!("processor crashed mid-inference"),
            Script::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                self.succeed(item).await
            }
        }
    }
}
