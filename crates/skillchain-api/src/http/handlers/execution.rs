//! Execution handlers: status, outcome reports, operator control and the
//! audit logs.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skillchain_types::chain::ChainId;
use skillchain_types::execution::{
    Checkpoint, Execution, ExecutionContext, ExecutionId, ExecutionStatus, LinkExecution,
    OutcomeReport, Resolution, Transition,
};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Query parameters for listing executions.
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    /// Chain id or name.
    pub chain: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// Body for pause, unpause and cancel.
#[derive(Debug, Default, Deserialize)]
pub struct ActorRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

/// Body for `POST /executions/{id}/resume`, e.g.
/// `{"action": "skip", "link_id": "reply", "actor": "dana"}`.
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    #[serde(flatten)]
    pub resolution: Resolution,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Body for `POST /executions/{id}/fail`.
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub reason: String,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Rebuilt context plus whether it matches the stored one.
#[derive(Debug, Serialize)]
pub struct ContextView {
    pub context: ExecutionContext,
    pub consistent: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Execution routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/outcomes", post(record_outcome))
        .route("/executions/{id}/pause", post(pause_execution))
        .route("/executions/{id}/unpause", post(unpause_execution))
        .route("/executions/{id}/resume", post(resume_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/executions/{id}/fail", post(fail_execution))
        .route("/executions/{id}/attempts", get(list_attempts))
        .route("/executions/{id}/checkpoints", get(list_checkpoints))
        .route("/executions/{id}/context", get(get_context))
}

fn execution_href(id: &ExecutionId) -> String {
    format!("/api/v1/executions/{id}")
}

fn transition_response(
    timer: RequestTimer,
    transition: Transition,
) -> Json<ApiResponse<Transition>> {
    let href = execution_href(&transition.execution.id);
    let attempts = format!("{href}/attempts");
    Json(
        timer
            .success(transition)
            .with_link("self", &href)
            .with_link("attempts", &attempts),
    )
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/executions - Newest executions first.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<Vec<Execution>>>, AppError> {
    let timer = RequestTimer::start();

    let chain_id: Option<ChainId> = match &query.chain {
        Some(key) => Some(state.engine.find_chain(key).await?.id),
        None => None,
    };
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<ExecutionStatus>())
        .transpose()
        .map_err(AppError::Validation)?;

    let executions = state
        .engine
        .list_executions(chain_id.as_ref(), status, query.limit)
        .await?;

    Ok(Json(timer.success(executions).with_link("self", "/api/v1/executions")))
}

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let timer = RequestTimer::start();
    let id = ExecutionId(id);
    let execution = state.engine.get_execution(&id).await?;

    let href = execution_href(&id);
    let checkpoints = format!("{href}/checkpoints");
    Ok(Json(
        timer
            .success(execution)
            .with_link("self", &href)
            .with_link("checkpoints", &checkpoints),
    ))
}

/// GET /api/v1/executions/{id}/attempts - Every attempt, in creation order.
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<LinkExecution>>>, AppError> {
    let timer = RequestTimer::start();
    let attempts = state.engine.link_executions(&ExecutionId(id)).await?;
    Ok(Json(timer.success(attempts)))
}

/// GET /api/v1/executions/{id}/checkpoints - The success log, in order.
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Checkpoint>>>, AppError> {
    let timer = RequestTimer::start();
    let checkpoints = state.engine.checkpoint_log(&ExecutionId(id)).await?;
    Ok(Json(timer.success(checkpoints)))
}

/// GET /api/v1/executions/{id}/context - Context rebuilt from checkpoints.
pub async fn get_context(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ContextView>>, AppError> {
    let timer = RequestTimer::start();
    let id = ExecutionId(id);
    let execution = state.engine.get_execution(&id).await?;
    let context = state.engine.reconstruct_context(&id).await?;
    let consistent = context == execution.execution_context;
    Ok(Json(timer.success(ContextView {
        context,
        consistent,
    })))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// POST /api/v1/executions/{id}/outcomes - Report the pending attempt's outcome.
pub async fn record_outcome(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(report): Json<OutcomeReport>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let transition = state.engine.record_outcome(&ExecutionId(id), report).await?;
    Ok(transition_response(timer, transition))
}

/// POST /api/v1/executions/{id}/pause
pub async fn pause_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let transition = state.engine.pause(&ExecutionId(id), body.actor).await?;
    Ok(transition_response(timer, transition))
}

/// POST /api/v1/executions/{id}/unpause
pub async fn unpause_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let transition = state.engine.unpause(&ExecutionId(id), body.actor).await?;
    Ok(transition_response(timer, transition))
}

/// POST /api/v1/executions/{id}/resume - Resolve an intervention.
pub async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let transition = state
        .engine
        .resume(&ExecutionId(id), body.resolution, body.actor)
        .await?;
    Ok(transition_response(timer, transition))
}

/// POST /api/v1/executions/{id}/cancel
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let transition = state.engine.cancel(&ExecutionId(id), body.actor).await?;
    Ok(transition_response(timer, transition))
}

/// POST /api/v1/executions/{id}/fail
pub async fn fail_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FailRequest>,
) -> Result<Json<ApiResponse<Transition>>, AppError> {
    let timer = RequestTimer::start();
    let transition = state
        .engine
        .fail(&ExecutionId(id), body.reason, body.actor)
        .await?;
    Ok(transition_response(timer, transition))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_request_flattens_resolution() {
        let body: ResumeRequest =
            serde_json::from_str(r#"{"action": "skip", "link_id": "reply", "actor": "dana"}"#)
                .unwrap();
        assert_eq!(
            body.resolution,
            Resolution::Skip {
                link_id: "reply".to_string()
            }
        );
        assert_eq!(body.actor.as_deref(), Some("dana"));

        let retry: ResumeRequest = serde_json::from_str(r#"{"action": "retry"}"#).unwrap();
        assert_eq!(retry.resolution, Resolution::Retry);
        assert!(retry.actor.is_none());
    }

    #[test]
    fn outcome_report_body_shape() {
        let report: OutcomeReport = serde_json::from_str(
            r#"{"link_id": "triage", "attempt_number": 2, "outcome": "failure", "error": "timeout"}"#,
        )
        .unwrap();
        assert_eq!(report.attempt_number, 2);
        assert_eq!(report, OutcomeReport::failure("triage", 2, "timeout"));
    }
}
