//! External reconstruction pipeline (image-to-3D).
//!
//! Runs a configured command line against the downloaded source image and
//! uploads the archive it writes. The child is spawned with `kill_on_drop`,
//! so abandoning the call at the soft time limit also kills the process.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use super::{ProcessorError, TaskProcessor, WorkItem};
use crate::services::storage::{content_type_for, result_key, ArtifactStore};

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";
const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";

/// File the command must produce inside the job's scratch directory.
const OUTPUT_FILE: &str = "result.zip";

/// Trailing stderr kept in a failure summary.
const MAX_STDERR_TAIL: usize = 1000;

pub struct CommandProcessor {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    storage: Arc<dyn ArtifactStore>,
}

/// Split a whitespace-separated command template into program and args.
pub fn parse_template(template: &str) -> Result<(String, Vec<String>), ProcessorError> {
    let mut parts = template.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| ProcessorError::Failed("command template is empty".to_string()))?;
    Ok((program, parts.collect()))
}

/// Substitute `{input}`, `{output}` and `{output_dir}` in every argument.
pub fn render_args(args: &[String], input: &Path, output: &Path, output_dir: &Path) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
                .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy())
                .replace(OUTPUT_DIR_PLACEHOLDER, &output_dir.to_string_lossy())
        })
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|i| text.len() - i <= MAX_STDERR_TAIL)
        .unwrap_or(text.len());
    text[start..].to_string()
}

impl CommandProcessor {
    pub fn from_template(
        template: &str,
        work_dir: PathBuf,
        storage: Arc<dyn ArtifactStore>,
    ) -> Result<Self, ProcessorError> {
        let (program, args) = parse_template(template)?;
        Ok(Self {
            program,
            args,
            work_dir,
            storage,
        })
    }

    async fn run(&self, item: &WorkItem, job_dir: &Path) -> Result<String, ProcessorError> {
        let source_key = item
            .input
            .source_ref
            .as_deref()
            .ok_or_else(|| ProcessorError::Failed("source image is missing".to_string()))?;

        let source = self.storage.get(source_key).await?;
        let extension = image::guess_format(&source)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin");
        let input_path = job_dir.join(format!("input.{extension}"));
        tokio::fs::write(&input_path, &source).await?;

        let output_path = job_dir.join(OUTPUT_FILE);
        let args = render_args(&self.args, &input_path, &output_path, job_dir);

        tracing::debug!(
            job_id = %item.job_id,
            program = %self.program,
            args = ?args,
            "Starting reconstruction command"
        );

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProcessorError::Failed(format!(
                "reconstruction exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let artifact = tokio::fs::read(&output_path).await.map_err(|e| {
            ProcessorError::Failed(format!("reconstruction produced no {OUTPUT_FILE}: {e}"))
        })?;

        let key = result_key(item.job_id, "zip");
        self.storage
            .put(&key, &artifact, content_type_for(&key))
            .await?;
        Ok(key)
    }
}

#[async_trait]
impl TaskProcessor for CommandProcessor {
    async fn process(&self, item: &WorkItem) -> Result<String, ProcessorError> {
        let job_dir = self
            .work_dir
            .join(format!("{}-{}", item.job_id, item.attempt));
        tokio::fs::create_dir_all(&job_dir).await?;

        let result = self.run(item, &job_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            tracing::warn!(job_id = %item.job_id, error = %e, "Failed to clean scratch directory");
        }
        result
    }
}
