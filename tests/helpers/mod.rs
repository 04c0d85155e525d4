//! HTTP helpers shared by the API and end-to-end tests

use genjobs::{
    app_state::AppState,
    config::OrchestratorConfig,
    db::{MemoryJobStore, MemoryUserStore},
    routes,
    services::{
        access::Principal,
        accounts::AccountService,
        auth::JwtVerifier,
        orchestrator::Orchestrator,
        processors::ProcessorRegistry,
        storage::{ArtifactStore, MemoryArtifactStore},
    },
};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Response from POST /api/v1/jobs and POST /api/v1/jobs/{id}/retry
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
    pub attempt_count: i32,
}

/// Response from GET /api/v1/jobs/{id}/status
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub attempt_count: i32,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub failure_reason: Option<String>,
}

/// Response from POST /api/v1/auth/login
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// A server running in-process on an ephemeral port, backed by in-memory
/// storage, with its worker pool running alongside.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryJobStore>,
    pub storage: Arc<dyn ArtifactStore>,
    auth: JwtVerifier,
    cancel: CancellationToken,
}

impl TestApp {
    pub async fn spawn(
        build_registry: impl FnOnce(Arc<dyn ArtifactStore>) -> ProcessorRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let storage: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        let registry = build_registry(storage.clone());

        let orchestrator = Orchestrator::builder(store.clone(), registry)
            .config(config)
            .build();
        let accounts = AccountService::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(JwtVerifier::new(TEST_JWT_SECRET).unwrap()),
            Duration::from_secs(3600),
        );
        let state = AppState::new(&orchestrator, storage.clone(), None, accounts);

        let cancel = CancellationToken::new();
        tokio::spawn(orchestrator.worker_pool().run(cancel.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            store,
            storage,
            auth: JwtVerifier::new(TEST_JWT_SECRET).unwrap(),
            cancel,
        }
    }

    pub fn token(&self, principal: &Principal) -> String {
        self.auth.issue(principal, 3600).unwrap()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Submit a job and return the raw response
pub async fn submit_job(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    body: serde_json::Value,
) -> Result<reqwest::Response, reqwest::Error> {
    client
        .post(format!("{}/api/v1/jobs", base_url))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
}

/// Upload source image bytes, returning the raw response
pub async fn upload_image(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    bytes: Vec<u8>,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "image",
        multipart::Part::bytes(bytes)
            .file_name("source.png")
            .mime_str("image/png")?,
    );

    let response = client
        .post(format!("{}/api/v1/uploads", base_url))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await?;
    Ok(response)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 10; // Poll every 100ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}/status", base_url, job_id))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "queued" | "processing" => sleep(Duration::from_millis(100)).await,
            _ => {
                return Err(format!("Unknown job status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
