//! Application setup and server configuration.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domains::generation::scheduler;
use crate::domains::generation::store::PgGenerationStore;
use crate::kernel::{
    tick_channel, OpenAiEngine, RestContentStore, RestSeoProvider, SeoCapabilities, ServerDeps,
    TickHandler, TickRunner,
};
use crate::server::routes::{
    active_batch_handler, approve_backup_handler, auto_restore_check_handler,
    batch_results_handler, batch_status_handler, bulk_backup_handler, cancel_batch_handler,
    create_batch_handler, health_handler, restore_backup_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub deps: ServerDeps,
}

/// Build the Axum application router and spawn the tick runner.
pub fn build_app(pool: PgPool, config: &Config) -> Result<Router> {
    let (tick_scheduler, tick_rx) = tick_channel();

    let deps = ServerDeps::new(
        Arc::new(PgGenerationStore::new(pool.clone())),
        Arc::new(OpenAiEngine::new(config.openai_api_key.clone())),
        Arc::new(RestContentStore::new(
            config.store_api_url.clone(),
            config.store_api_token.clone(),
        )?),
        Arc::new(RestSeoProvider::new(
            config.seo_api_url.clone(),
            config.seo_api_token.clone(),
            SeoCapabilities {
                supports_scoring: config.seo_supports_scoring,
                max_score: config.seo_max_score,
            },
        )?),
        Arc::new(tick_scheduler),
    );

    // The tick runner drains the scheduler channel for the life of the
    // process.
    let handler_deps = deps.clone();
    let handler: TickHandler = Arc::new(move |task| {
        let deps = handler_deps.clone();
        Box::pin(async move { scheduler::run_tick(&deps, task.batch_id).await })
    });
    let runner = TickRunner::new(tick_rx, handler);
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!(error = %e, "Tick runner exited with error");
        }
    });

    let state = AppState {
        db_pool: pool,
        deps,
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = Router::new()
        .route(
            "/api/batches",
            post(create_batch_handler).get(active_batch_handler),
        )
        .route("/api/batches/:id/status", get(batch_status_handler))
        .route("/api/batches/:id/results", get(batch_results_handler))
        .route("/api/batches/:id/cancel", post(cancel_batch_handler))
        .route("/api/backups/:item_id/approve", post(approve_backup_handler))
        .route("/api/backups/:item_id/restore", post(restore_backup_handler))
        .route("/api/backups/bulk", post(bulk_backup_handler))
        .route(
            "/api/backups/auto-restore-check",
            post(auto_restore_check_handler),
        )
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}
