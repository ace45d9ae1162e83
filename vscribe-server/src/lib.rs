//! vscribe-server library interface
//!
//! Exposes the application state and router so integration tests drive the
//! HTTP surface in-process.

pub mod api;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod utils;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use vscribe_common::config::AppConfig;

use crate::pipeline::Pipeline;
use crate::registry::RegistryHandle;
use crate::services::file_manager::FileManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration (never logged unredacted)
    pub config: Arc<AppConfig>,
    /// Task registry actor handle
    pub registry: RegistryHandle,
    /// Pipeline engine handle
    pub pipeline: Pipeline,
    /// File manager bound to the configured roots
    pub files: FileManager,
}

impl AppState {
    /// Wire up the registry, pipeline, and file manager from a configuration.
    ///
    /// Boot recovery happens inside `RegistryHandle::open`, before the
    /// pipeline exists, so no worker can observe a stale task.
    pub fn initialize(config: Arc<AppConfig>) -> vscribe_common::Result<Self> {
        let registry = RegistryHandle::open(&config.system.temp_dir)?;
        let pipeline = Pipeline::start(config.clone(), registry.clone());
        let files = FileManager::new(
            config.system.temp_dir.clone(),
            config.system.output_dir.clone(),
        );
        Ok(Self {
            config,
            registry,
            pipeline,
            files,
        })
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    // Uploads are the largest request bodies; leave headroom for the
    // multipart framing around the configured file cap.
    let body_limit = (state.config.system.max_file_size_mb + 8) * 1024 * 1024;

    Router::new()
        .merge(api::process::routes())
        .merge(api::tasks::routes())
        .merge(api::download::routes())
        .merge(api::files::routes())
        .merge(api::translate::routes())
        .merge(api::health::routes())
        .layer(axum::middleware::from_fn(api::request_id::assign))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .with_state(state)
}
