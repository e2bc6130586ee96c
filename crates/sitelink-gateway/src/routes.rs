//! Command-issuing endpoints and tracker introspection.
//!
//! Command endpoints respond `202 Accepted` with the generated message id;
//! the actual outcome arrives later on the tenant's WebSocket.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use sitelink_core::envelope::{
    ActionCommand, ActionKind, CommandAccepted, ScheduleCommand, ScheduleEntry, SettingUpdate,
    SettingsCommand,
};
use sitelink_core::CommandType;
use sitelink_dispatch::{CommandRecord, PublishError};
use tracing::error;
use uuid::Uuid;

use crate::AppState;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub plant_id: i64,
    pub date: NaiveDate,
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub plant_id: i64,
    pub settings: Vec<SettingUpdate>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub plant_id: i64,
    pub command: ActionKind,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

fn publish_failure(err: PublishError) -> ApiError {
    error!(event = "publish_failed", error = %err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": "Failed to publish command" })),
    )
}

fn accepted(message: &str, message_id: String) -> (StatusCode, Json<CommandAccepted>) {
    (
        StatusCode::ACCEPTED,
        Json(CommandAccepted {
            message: message.to_string(),
            message_id,
        }),
    )
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    let command = ScheduleCommand::new(body.plant_id, body.date, body.schedule, body.updated_by);
    let message_id = state
        .publisher
        .send_schedule(query.tenant_id, &command)
        .await
        .map_err(publish_failure)?;
    Ok(accepted("Schedule update sent", message_id))
}

pub async fn update_plc_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<SettingsRequest>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    let command = SettingsCommand::new(body.plant_id, body.settings, body.updated_by);
    let message_id = state
        .publisher
        .send_settings(CommandType::PlcSettings, query.tenant_id, &command)
        .await
        .map_err(publish_failure)?;
    Ok(accepted("PLC data settings update sent", message_id))
}

pub async fn update_plc_control(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<SettingsRequest>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    let command = SettingsCommand::new(body.plant_id, body.settings, body.updated_by);
    let message_id = state
        .publisher
        .send_settings(CommandType::PlcControl, query.tenant_id, &command)
        .await
        .map_err(publish_failure)?;
    Ok(accepted("PLC control update sent", message_id))
}

pub async fn trigger_action(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<(StatusCode, Json<CommandAccepted>)> {
    let command = ActionCommand::new(body.command, body.payload);
    let message_id = state
        .publisher
        .send_action(query.tenant_id, body.plant_id, &command)
        .await
        .map_err(publish_failure)?;
    Ok(accepted("Action sent", message_id))
}

pub async fn command_status(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<CommandRecord>> {
    state
        .tracker
        .get_command_status(&message_id)
        .await
        .map(Json)
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Command not found" })),
        ))
}

pub async fn pending_commands(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<CommandRecord>> {
    Json(state.tracker.get_pending_commands().await)
}

pub async fn command_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<CommandRecord>> {
    Json(state.tracker.get_recent_history(query.limit).await)
}
