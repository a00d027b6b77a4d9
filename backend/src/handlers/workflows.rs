use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use marketplace_shared::{OrderAction, OrderState, TransitionLogEntry, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::workflows::WorkflowOptions;
use crate::AppState;

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(initialize_workflow))
        .route("/escalated", get(list_escalated))
        .route("/order/:order_id", get(get_workflow_by_order))
        .route("/:id", get(get_workflow))
        .route("/:id/actions", get(available_actions).post(execute_action))
        .route("/:id/history", get(get_history))
        .route("/:id/escalation/reset", post(reset_escalation))
        .route("/:id/priority", put(set_priority))
}

#[derive(Debug, Deserialize)]
pub struct InitializeWorkflowRequest {
    pub order_id: Uuid,
    #[serde(flatten)]
    pub options: WorkflowOptions,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteActionRequest {
    pub action: OrderAction,
    pub actor: Option<Uuid>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetEscalationRequest {
    pub actor: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SetPriorityRequest {
    pub priority: i16,
}

#[derive(Debug, Serialize)]
pub struct AvailableActionsResponse {
    pub workflow_id: Uuid,
    pub current_state: OrderState,
    pub actions: Vec<OrderAction>,
}

async fn initialize_workflow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitializeWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let order = state
        .orders
        .fetch(request.order_id)
        .await
        .map_err(|e| AppError::ExternalServiceError {
            service: "order_directory".to_string(),
            message: e.message,
            retryable: e.retryable,
        })?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", request.order_id)))?;

    let workflow = state
        .engine
        .initialize_workflow_with(&order, request.options)
        .await?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.get_workflow(id).await?))
}

async fn get_workflow_by_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.get_workflow_by_order_id(order_id).await?))
}

async fn execute_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExecuteActionRequest>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state
        .engine
        .execute_action(id, request.action, request.actor, request.data)
        .await?;
    Ok(Json(workflow))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<TransitionLogEntry>>> {
    Ok(Json(state.engine.get_workflow_history(id).await?))
}

async fn available_actions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AvailableActionsResponse>> {
    let workflow = state.engine.get_workflow(id).await?;
    let actions = state.engine.available_actions(id).await?;

    Ok(Json(AvailableActionsResponse {
        workflow_id: workflow.id,
        current_state: workflow.current_state,
        actions,
    }))
}

async fn reset_escalation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    request: Option<Json<ResetEscalationRequest>>,
) -> ApiResult<Json<Workflow>> {
    let actor = request.and_then(|Json(r)| r.actor);
    Ok(Json(state.engine.reset_escalation(id, actor).await?))
}

async fn set_priority(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetPriorityRequest>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.set_priority(id, request.priority).await?))
}

async fn list_escalated(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Workflow>>> {
    Ok(Json(state.engine.escalated_workflows().await?))
}
