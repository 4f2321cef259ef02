// Forgeloop API server
// Decision: no auth, no persistence schema, no metrics surface beyond a
//   tower-http trace layer — those remain collaborators (spec.md §1).

mod config;
mod events;
mod state;
mod webhooks;
mod workflows;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Json, Router};
use forgeloop_eventbus::EventBus;
use forgeloop_schemas::store::{InMemoryWorkflowStore, WorkflowStore};
use forgeloop_workflow::WorkflowRunner;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::EngineConfig;
use state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forgeloop_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("forgeloop-api starting...");

    let config = EngineConfig::from_env();
    tracing::info!(?config, "engine configuration loaded");

    let bus = EventBus::with_capacities(
        config.event_bus_queue_capacity,
        forgeloop_eventbus::DEFAULT_HISTORY_CAPACITY,
    );
    let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryWorkflowStore::new());
    let runner = Arc::new(WorkflowRunner::new(store.clone(), bus.clone()));

    forgeloop_sandbox::install_shutdown_hook();

    let state = AppState::new(runner, store, bus, config);

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhooks/pr-validation", post(webhooks::pr_validation))
        .route("/webhooks/pr-update", post(webhooks::pr_update))
        .route("/events", get(events::stream_events))
        .merge(workflows::routes())
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = "0.0.0.0:8080";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
