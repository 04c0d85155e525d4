//! Generation job orchestrator
//!
//! Accepts long-running generation requests (text-to-image, image-to-3D,
//! image-to-image), persists them as jobs, and runs them on a bounded worker
//! pool with stall recovery and bounded retries. Results are stored in
//! Cloudflare R2; Workers AI and external commands do the generation.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
