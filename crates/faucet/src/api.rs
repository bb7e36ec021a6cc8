//! HTTP API for the faucet

use crate::coins::CoinSet;
use crate::error::FaucetError;
use crate::orchestrator::TransferOrchestrator;
use crate::validator::TransferRequest;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

const OPENAPI_TEMPLATE: &str = include_str!("../assets/openapi.yml");
const INDEX_TEMPLATE: &str = include_str!("../assets/index.html");

/// Transfer request body
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransferBody {
    pub address: String,
    pub coins: Vec<String>,
}

/// Transfer response body: `{}` on success
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub chain_id: Arc<str>,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub cors_enabled: bool,
    pub metrics_enabled: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            cors_enabled: true,
            metrics_enabled: true,
        }
    }
}

/// Transfer handler
pub async fn transfer_handler(
    State(state): State<AppState>,
    body: Result<Json<TransferBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return FaucetError::InvalidRequest(rejection.body_text()).into_response(),
    };
    debug!("Transfer request: address={} coins={:?}", body.address, body.coins);

    let coins = match CoinSet::parse_list(&body.coins) {
        Ok(coins) => coins,
        Err(err) => return err.into_response(),
    };

    let outcome = state
        .orchestrator
        .submit(TransferRequest::new(body.address, coins))
        .await;
    match outcome.into_result() {
        Ok(()) => Json(TransferResponse::default()).into_response(),
        Err(err) => err.into_response(),
    }
}

/// OpenAPI document with the chain id filled in
pub async fn openapi_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/yaml")],
        OPENAPI_TEMPLATE.replace("{{CHAIN_ID}}", &state.chain_id),
    )
}

/// API console for the OpenAPI document
pub async fn index_handler() -> Html<String> {
    Html(
        INDEX_TEMPLATE
            .replace("{{TITLE}}", "Faucet")
            .replace("{{SPEC_URL}}", "openapi.yml"),
    )
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.metrics().gather() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn router(state: AppState, options: RouterOptions) -> Router {
    let mut transfer = get(index_handler).post(transfer_handler);
    if options.cors_enabled {
        transfer = transfer.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
    }

    let mut app = Router::new()
        .route("/", transfer)
        .route("/openapi.yml", get(openapi_handler))
        .route("/health", get(health_handler));
    if options.metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
