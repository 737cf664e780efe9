//! Chain definition handlers and execution start.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use skillchain_core::chain::definition::parse_chain_yaml;
use skillchain_types::chain::{ChainRecord, ChainSummary};
use skillchain_types::error::EngineError;
use skillchain_types::execution::Transition;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Body for `POST /chains`.
#[derive(Debug, Deserialize)]
pub struct ImportChainRequest {
    /// Chain definition in YAML.
    pub definition: String,
    /// Publish the chain right away.
    #[serde(default)]
    pub publish: bool,
}

/// Body for `POST /chains/{chain}/executions`.
#[derive(Debug, Deserialize)]
pub struct StartExecutionRequest {
    #[serde(default = "empty_object")]
    pub input: serde_json::Value,
    #[serde(default)]
    pub started_by: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// Chain routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chains", post(import_chain).get(list_chains))
        .route("/chains/{chain}", get(get_chain))
        .route("/chains/{chain}/publish", post(publish_chain))
        .route("/chains/{chain}/unpublish", post(unpublish_chain))
        .route("/chains/{chain}/executions", post(start_execution))
}

/// POST /api/v1/chains - Import (or replace) a chain from YAML.
pub async fn import_chain(
    State(state): State<AppState>,
    Json(body): Json<ImportChainRequest>,
) -> Result<Json<ApiResponse<ChainRecord>>, AppError> {
    let timer = RequestTimer::start();

    let mut record = parse_chain_yaml(&body.definition, state.engine.config())
        .map_err(EngineError::from)?;
    if body.publish {
        record.published = true;
    }
    let chain = state.engine.import_chain(record).await?;

    let href = format!("/api/v1/chains/{}", chain.id);
    Ok(Json(timer.success(chain).with_link("self", &href)))
}

/// GET /api/v1/chains - List stored chains.
pub async fn list_chains(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ChainSummary>>>, AppError> {
    let timer = RequestTimer::start();
    let chains = state.engine.list_chains().await?;
    Ok(Json(timer.success(chains).with_link("self", "/api/v1/chains")))
}

/// GET /api/v1/chains/{chain} - Get a chain by id or name.
pub async fn get_chain(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<ChainRecord>>, AppError> {
    let timer = RequestTimer::start();
    let chain = state.engine.find_chain(&key).await?;

    let href = format!("/api/v1/chains/{}", chain.id);
    let executions = format!("/api/v1/executions?chain={}", chain.id);
    Ok(Json(
        timer
            .success(chain)
            .with_link("self", &href)
            .with_link("executions", &executions),
    ))
}

/// POST /api/v1/chains/{chain}/publish
pub async fn publish_chain(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<ChainSummary>>, AppError> {
    set_published(state, &key, true).await
}

/// POST /api/v1/chains/{chain}/unpublish
pub async fn unpublish_chain(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<ChainSummary>>, AppError> {
    set_published(state, &key, false).await
}

async fn set_published(
    state: AppState,
    key: &str,
    published: bool,
) -> Result<Json<ApiResponse<ChainSummary>>, AppError> {
    let timer = RequestTimer::start();
    let chain = state.engine.set_chain_published(key, published).await?;

    let href = format!("/api/v1/chains/{}", chain.id);
    Ok(Json(
        timer
            .success(ChainSummary::from(&chain))
            .with_link("self", &href),
    ))
}

/// POST /api/v1/chains/{chain}/executions - Start an execution.
///
/// The response carries the first dispatch request for the link invoker.
pub async fn start_execution(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<StartExecutionRequest>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let chain = state.engine.find_chain(&key).await?;
    let transition = state
        .engine
        .start(&chain.id, body.input, body.started_by)
        .await?;

    let href = format!("/api/v1/executions/{}", transition.execution.id);
    Ok(Json(timer.success(transition).with_link("self", &href)))
}
