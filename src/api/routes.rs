//! REST endpoints for starting, resuming and inspecting workflow runs, plus
//! the Slack interactivity webhook.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::notify::{SlackAction, parse_action_payload, post_response};
use crate::workflow::dispatcher::{ActionEvent, ActionKind, ResumeDispatcher};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::state::RunResult;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub dispatcher: Arc<ResumeDispatcher>,
    /// Client for Slack `response_url` follow-ups.
    pub http: reqwest::Client,
}

/// Build the Axum router for the workflow API.
pub fn workflow_routes(engine: Arc<WorkflowEngine>) -> Router {
    let state = AppState {
        dispatcher: Arc::new(ResumeDispatcher::new(Arc::clone(&engine))),
        engine,
        http: reqwest::Client::new(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/workflow/start", post(start_workflow))
        .route("/api/workflow/resume", post(resume_workflow))
        .route(
            "/api/workflow/{user_id}",
            get(get_workflow).delete(clear_workflow),
        )
        .route("/api/workflows/active", get(list_active))
        .route("/slack/actions", post(slack_actions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Error response carrying the HTTP status for a workflow error.
struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        Self(e)
    }
}

fn status_for(e: &WorkflowError) -> (StatusCode, &'static str) {
    match e {
        WorkflowError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "already_running"),
        WorkflowError::NoActiveRun { .. } => (StatusCode::NOT_FOUND, "no_active_run"),
        WorkflowError::NotAwaitingApproval { .. } => {
            (StatusCode::CONFLICT, "not_awaiting_approval")
        }
        WorkflowError::StaleDecision { .. } => (StatusCode::CONFLICT, "stale_decision"),
        WorkflowError::StaleRun { .. } => (StatusCode::CONFLICT, "stale_run"),
        WorkflowError::InvalidDecision(_) => (StatusCode::BAD_REQUEST, "invalid_decision"),
        WorkflowError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "Workflow request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": code,
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-assist"
    }))
}

// ── Workflow ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StartRequest {
    user_id: String,
}

async fn start_workflow(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let user_id = non_empty_user(&body.user_id)?;
    let result = state.engine.start(user_id).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ResumeRequest {
    user_id: String,
    action: String,
    #[serde(default)]
    draft_index: Option<usize>,
    #[serde(default)]
    run_id: Option<Uuid>,
}

async fn resume_workflow(
    State(state): State<AppState>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let user_id = non_empty_user(&body.user_id)?;
    let kind: ActionKind = body
        .action
        .parse::<ActionKind>()
        .map_err(|e: String| ApiError(WorkflowError::InvalidDecision(e)))?;
    let draft_index = body.draft_index.ok_or_else(|| {
        ApiError(WorkflowError::InvalidDecision(
            "draft_index is required".into(),
        ))
    })?;

    let event = ActionEvent {
        user_id: user_id.to_string(),
        kind,
        draft_index,
        run_id: body.run_id,
    };
    let result = state.dispatcher.dispatch(event).await?;
    Ok(Json(result))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.engine.status(&user_id).await? {
        Some(checkpoint) => Ok((StatusCode::OK, Json(checkpoint)).into_response()),
        None => Err(ApiError(WorkflowError::NoActiveRun { user_id })),
    }
}

async fn clear_workflow(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    if state.engine.cancel(&user_id).await? {
        Ok((
            StatusCode::OK,
            Json(serde_json::json!({"status": "cleared", "user_id": user_id})),
        )
            .into_response())
    } else {
        Err(ApiError(WorkflowError::NoActiveRun { user_id }))
    }
}

async fn list_active(State(state): State<AppState>) -> Result<Response, ApiError> {
    let runs = state.engine.active_runs().await?;
    Ok(Json(runs).into_response())
}

fn non_empty_user(user_id: &str) -> Result<&str, ApiError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError(WorkflowError::InvalidDecision(
            "user_id must not be empty".into(),
        )));
    }
    Ok(trimmed)
}

// ── Slack ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SlackForm {
    payload: String,
}

/// Slack wants a 200 within three seconds and ignores the response body of
/// a block action, so the click is acknowledged right away and its outcome
/// is posted to the payload's `response_url` once the dispatch finishes.
async fn slack_actions(State(state): State<AppState>, Form(form): Form<SlackForm>) -> StatusCode {
    let SlackAction {
        event,
        response_url,
    } = match parse_action_payload(&form.payload) {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, "Ignoring Slack interaction");
            return StatusCode::OK;
        }
    };

    info!(user_id = %event.user_id, action = %event.kind, "Slack action received");
    tokio::spawn(async move {
        let user_id = event.user_id.clone();
        let outcome = state.dispatcher.dispatch(event).await;
        match &outcome {
            Ok(result) => {
                info!(%user_id, run_id = %result.run_id(), status = result.status(), "Slack action applied")
            }
            Err(e) => warn!(%user_id, error = %e, "Slack action not applied"),
        }

        let Some(url) = response_url else {
            return;
        };
        if let Err(e) = post_response(&state.http, &url, &outcome_text(&outcome)).await {
            warn!(%user_id, error = %e, "Slack follow-up not delivered");
        }
    });

    StatusCode::OK
}

/// What the reviewer is told about their click.
fn outcome_text(outcome: &Result<RunResult, WorkflowError>) -> String {
    match outcome {
        Ok(RunResult::Paused { draft, .. }) => format!(
            "Recorded. Next draft ({}/{}) is on its way.",
            draft.index + 1,
            draft.total
        ),
        Ok(RunResult::Completed { .. }) => "Recorded. All drafts reviewed.".to_string(),
        Ok(RunResult::Failed { reason, .. }) => format!("❌ Run failed: {reason}"),
        Err(
            e @ (WorkflowError::StaleDecision { .. }
            | WorkflowError::StaleRun { .. }
            | WorkflowError::NotAwaitingApproval { .. }),
        ) => format!("This draft was already handled ({e})."),
        Err(e) => format!("⚠️ {e}"),
    }
}
