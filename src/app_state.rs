use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{
    accounts::AccountService, auth::JwtVerifier, jobs::JobService, orchestrator::Orchestrator,
    queue::QueueSignal, storage::ArtifactStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn ArtifactStore>,
    pub queue: Option<Arc<QueueSignal>>,
    pub auth: Arc<JwtVerifier>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    pub fn new(
        orchestrator: &Orchestrator,
        storage: Arc<dyn ArtifactStore>,
        queue: Option<Arc<QueueSignal>>,
        accounts: AccountService,
    ) -> Self {
        Self {
            jobs: orchestrator.jobs(),
            store: orchestrator.store(),
            storage,
            queue,
            auth: accounts.verifier(),
            accounts: Arc::new(accounts),
        }
    }
}
