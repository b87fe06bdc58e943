pub mod handlers;
pub mod identity;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use state::AppState;

/// Build the complete router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        // Owner routes (X-Owner-Id, checked by extractor)
        .route(
            "/api/v1/purchases",
            post(handlers::create_purchase).get(handlers::list_purchases),
        )
        .route("/api/v1/purchases/status", get(handlers::get_purchase_status))
        .route(
            "/api/v1/purchases/{id}/confirm",
            post(handlers::confirm_purchase),
        )
        .route("/api/v1/account/balance", get(handlers::get_balance))
        .route("/api/v1/inventory", get(handlers::get_inventory))
        // Webhook glue (X-Internal-Secret)
        .route(
            "/internal/purchases/confirm",
            post(handlers::internal_confirm),
        )
        .with_state(state)
        // Stateless, added after with_state
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Start HTTP Gateway server
pub async fn run_server(config: &GatewayConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!(addr = %addr, "Gateway listening");
    tracing::info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
