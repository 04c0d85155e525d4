pub mod access;
pub mod accounts;
pub mod auth;
pub mod dispatcher;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod processors;
pub mod queue;
pub mod retry;
pub mod stall_monitor;
pub mod storage;
pub mod worker_pool;
