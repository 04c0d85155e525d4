use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use std::sync::Arc;

use super::{ProcessorError, TaskProcessor, WorkItem};
use crate::models::job::{ImageTransform, JobKind};
use crate::services::storage::{content_type_for, result_key, ArtifactStore};

const TEXT_TO_IMAGE_MODEL: &str = "@cf/stabilityai/stable-diffusion-xl-base-1.0";
const IMAGE_TO_IMAGE_MODEL: &str = "@cf/runwayml/stable-diffusion-v1-5-img2img";

/// Workers AI caps diffusion models at 20 steps.
const NUM_STEPS: u32 = 20;

const VARIATION_PROMPT: &str = "same subject and composition, highly detailed";

/// Longest error body kept in a failure summary.
const MAX_ERROR_BODY: usize = 500;

/// Text-to-image and image-to-image generation on Cloudflare Workers AI.
pub struct WorkersAiProcessor {
    http: Client,
    account_id: String,
    api_token: String,
    storage: Arc<dyn ArtifactStore>,
}

/// Model that serves `kind`, if Workers AI can run it.
pub fn model_for(kind: JobKind) -> Option<&'static str> {
    match kind {
        JobKind::TextToImage => Some(TEXT_TO_IMAGE_MODEL),
        JobKind::ImageToImage(_) => Some(IMAGE_TO_IMAGE_MODEL),
        JobKind::ImageTo3d => None,
    }
}

/// How far img2img may move away from the source image.
pub fn strength_for(transform: ImageTransform) -> f64 {
    match transform {
        ImageTransform::Restyle => 0.75,
        ImageTransform::Variation => 0.35,
    }
}

/// JSON body for the model call. `source` is the raw source image for
/// image-to-image kinds.
pub fn request_body(item: &WorkItem, source: Option<&[u8]>) -> Result<serde_json::Value, ProcessorError> {
    let prompt = item.input.prompt.as_deref().unwrap_or_default();
    match item.kind {
        JobKind::TextToImage => Ok(serde_json::json!({
            "prompt": prompt,
            "num_steps": NUM_STEPS,
        })),
        JobKind::ImageToImage(transform) => {
            let source = source
                .ok_or_else(|| ProcessorError::Failed("source image is missing".to_string()))?;
            let prompt = if prompt.trim().is_empty() {
                VARIATION_PROMPT
            } else {
                prompt
            };
            Ok(serde_json::json!({
                "prompt": prompt,
                "image_b64": base64::engine::general_purpose::STANDARD.encode(source),
                "strength": strength_for(transform),
                "num_steps": NUM_STEPS,
            }))
        }
        JobKind::ImageTo3d => Err(ProcessorError::Unregistered(item.kind)),
    }
}

impl WorkersAiProcessor {
    pub fn new(account_id: String, api_token: String, storage: Arc<dyn ArtifactStore>) -> Self {
        Self {
            http: Client::new(),
            account_id,
            api_token,
            storage,
        }
    }

    async fn run_model(&self, model: &str, body: &serde_json::Value) -> Result<Vec<u8>, ProcessorError> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, model
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| text.is_char_boundary(*i))
                    .unwrap_or(0);
                text.truncate(cut);
            }
            return Err(ProcessorError::Failed(format!(
                "Workers AI returned {status}: {text}"
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl TaskProcessor for WorkersAiProcessor {
    async fn process(&self, item: &WorkItem) -> Result<String, ProcessorError> {
        let model = model_for(item.kind).ok_or(ProcessorError::Unregistered(item.kind))?;

        let source = match (&item.input.source_ref, item.kind.needs_source()) {
            (Some(key), true) => {
                tracing::debug!(job_id = %item.job_id, key = %key, "Downloading source image");
                Some(self.storage.get(key).await?)
            }
            _ => None,
        };
        let body = request_body(item, source.as_deref())?;

        tracing::debug!(job_id = %item.job_id, model, "Calling Workers AI");
        let start = std::time::Instant::now();
        let image_bytes = self.run_model(model, &body).await?;

        let format = image::guess_format(&image_bytes).map_err(|_| {
            ProcessorError::Failed("Workers AI returned a non-image payload".to_string())
        })?;
        let extension = format.extensions_str().first().copied().unwrap_or("png");
        let key = result_key(item.job_id, extension);
        self.storage
            .put(&key, &image_bytes, content_type_for(&key))
            .await?;

        tracing::info!(
            job_id = %item.job_id,
            model,
            inference_ms = start.elapsed().as_millis() as u64,
            bytes = image_bytes.len(),
            "Generated image stored"
        );

        Ok(key)
    }
}
