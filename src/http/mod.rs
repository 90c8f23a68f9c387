//! HTTP Surface.
//!
//! Wires the controller's components behind an axum router. Grounded on
//! `src-tauri/src/api/server.rs`/`routes.rs` for the `AppState`-plus-
//! `CorsLayer` shape (trace layering added on top); streaming endpoints
//! feed `Body::from_stream` from an `mpsc` channel instead of returning
//! a single `Json` body.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use parking_lot::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Configuration;
use crate::db::DbStorage;
use crate::error::Result;
use crate::provider::InstanceProvider;
use crate::registry::ImageRegistry;
use crate::results::ResultsStorage;

/// Shared controller state. The per-user last-execution pointer is cached
/// here behind a `parking_lot::RwLock` rather than a module-level static,
/// per the redesign note on global mutable state; it is also persisted
/// through `db` so a restart does not lose it.
pub struct Controller {
    pub db: Arc<dyn DbStorage>,
    pub provider: Arc<dyn InstanceProvider>,
    pub registry: Arc<dyn ImageRegistry>,
    pub results: Arc<dyn ResultsStorage>,
    pub config: Arc<Configuration>,
    last_execution_ids: RwLock<HashMap<String, String>>,
}

impl Controller {
    pub fn new(
        db: Arc<dyn DbStorage>,
        provider: Arc<dyn InstanceProvider>,
        registry: Arc<dyn ImageRegistry>,
        results: Arc<dyn ResultsStorage>,
        config: Arc<Configuration>,
    ) -> Self {
        Self { db, provider, registry, results, config, last_execution_ids: RwLock::new(HashMap::new()) }
    }

    /// Record `execution_id` as `user`'s most recent submission, updating
    /// both the in-memory cache handlers read from and the durable store.
    pub async fn remember_last_execution(&self, user: &str, execution_id: &str) -> Result<()> {
        self.last_execution_ids.write().insert(user.to_string(), execution_id.to_string());
        self.db.set_last_execution_id(user, execution_id).await
    }

    /// Look up `user`'s most recent execution id, preferring the in-memory
    /// cache and falling back to the durable store (e.g. after a restart).
    pub async fn last_execution_for(&self, user: &str) -> Result<Option<String>> {
        if let Some(id) = self.last_execution_ids.read().get(user).cloned() {
            return Ok(Some(id));
        }
        let stored = self.db.get_last_execution_id(user).await?;
        if let Some(id) = &stored {
            self.last_execution_ids.write().insert(user.to_string(), id.clone());
        }
        Ok(stored)
    }
}

pub type AppState = Arc<Controller>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/snapshots", post(handlers::snapshots::submit_snapshot))
        .route("/commands", post(handlers::commands::submit_command))
        .route("/commands/list", get(handlers::commands::list_commands))
        .route("/commands/tidy", post(handlers::commands::tidy))
        .route("/commands/:id/status", get(handlers::commands::status))
        .route("/commands/:id/logs", get(handlers::commands::logs_combined))
        .route("/commands/:id/logs/stdout", get(handlers::commands::logs_stdout))
        .route("/commands/:id/logs/stderr", get(handlers::commands::logs_stderr))
        .route("/commands/:id/output/files", get(handlers::commands::output_files))
        .route("/commands/:id/stop", post(handlers::commands::stop))
        .route("/commands/:id", delete(handlers::commands::delete_command))
        .route("/users/:user/last_execution_id", get(handlers::users::last_execution_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
