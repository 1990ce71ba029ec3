//! Application state and router builder
//!
//! # Architecture
//!
//! ```text
//! /
//! ├── /health                                  # liveness
//! └── /api/
//!     ├── /dashboard/stats
//!     ├── /instances...                        # CRUD, options, test, sync, export, import
//!     ├── /databases...                        # observed databases
//!     ├── /query-tasks...                      # the task pipeline surface
//!     ├── /doc-tasks...                        # doc jobs: CRUD + manual run
//!     ├── /sql/validate
//!     └── /configs...
//! ```
//!
//! # Middleware Stack
//!
//! 1. Logging (tower-http TraceLayer)
//! 2. CORS (permissive; the UI is served from arbitrary origins)

use crate::routes;
use axum::{
    routing::{get, post},
    Router,
};
use sqlfan_runner::{DocJobHandler, TaskCreator, TaskRunner};
use sqlfan_shared::config_cache::ConfigCache;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state, cloned per request handler
#[derive(Clone)]
pub struct AppState {
    /// Local store
    pub db: SqlitePool,

    /// Process-wide config cache
    pub configs: Arc<ConfigCache>,

    /// Task creation service
    pub creator: Arc<TaskCreator>,

    /// Fan-out engine
    pub runner: Arc<TaskRunner>,

    /// Doc-job handler, shared with the interval scheduler
    pub doc_handler: Arc<dyn DocJobHandler>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        configs: Arc<ConfigCache>,
        doc_handler: Arc<dyn DocJobHandler>,
    ) -> Self {
        let creator = Arc::new(TaskCreator::new(db.clone()));
        let runner = Arc::new(TaskRunner::new(db.clone(), configs.clone()));
        AppState {
            db,
            configs,
            creator,
            runner,
            doc_handler,
        }
    }
}

/// Builds the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let instance_routes = Router::new()
        .route("/", post(routes::instances::create).get(routes::instances::list))
        .route("/options", get(routes::instances::options))
        .route("/export", post(routes::instances::export))
        .route("/import", post(routes::instances::import))
        .route("/sync", post(routes::instances::sync))
        .route(
            "/:id",
            get(routes::instances::get_one)
                .put(routes::instances::update)
                .delete(routes::instances::delete_one),
        )
        .route("/:id/test", post(routes::instances::test));

    let database_routes = Router::new()
        .route("/", get(routes::databases::list))
        .route("/batch-list", post(routes::databases::batch_list))
        .route("/:id", get(routes::databases::get_one));

    let task_routes = Router::new()
        .route(
            "/",
            post(routes::tasks::create)
                .get(routes::tasks::list)
                .delete(routes::tasks::batch_delete),
        )
        .route("/sqls/:sqlId/results", get(routes::tasks::sql_results))
        .route("/sqls/:sqlId/export", get(routes::tasks::sql_export))
        .route("/:id", get(routes::tasks::get_one))
        .route("/:id/run", post(routes::tasks::run))
        .route("/:id/toggle-favorite", post(routes::tasks::toggle_favorite))
        .route("/:id/sqls", get(routes::tasks::sqls))
        .route("/:id/sqls/executions", get(routes::tasks::sqls_with_executions))
        .route("/:id/execution-stats", get(routes::tasks::execution_stats));

    let doc_task_routes = Router::new()
        .route("/", post(routes::doc_tasks::create).get(routes::doc_tasks::list))
        .route(
            "/:id",
            get(routes::doc_tasks::get_one)
                .put(routes::doc_tasks::update)
                .delete(routes::doc_tasks::delete_one),
        )
        .route("/:id/run", post(routes::doc_tasks::run));

    let config_routes = Router::new()
        .route("/", post(routes::configs::set_one))
        .route("/batch-get", post(routes::configs::batch_get))
        .route("/batch-set", post(routes::configs::batch_set))
        .route("/:key", get(routes::configs::get_one));

    let api_routes = Router::new()
        .route("/dashboard/stats", get(routes::dashboard::stats))
        .nest("/instances", instance_routes)
        .nest("/databases", database_routes)
        .nest("/query-tasks", task_routes)
        .nest("/doc-tasks", doc_task_routes)
        .route("/sql/validate", post(routes::sql::validate))
        .nest("/configs", config_routes);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
