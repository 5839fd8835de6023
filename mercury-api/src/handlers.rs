use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use mercury_core::types::ConvType;
use mercury_core::CoreError;
use mercury_msg::message::repository::PullDirection;
use mercury_msg::message::service::CreateMessageRequest;
use serde::Deserialize;
use tracing;

use crate::auth::{self, AuthenticatedDevice};
use crate::state::ApiState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mercury-gateway"
    }))
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CoreError::FailedPrecondition(_) => StatusCode::PRECONDITION_FAILED,
        CoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(context: &str, err: CoreError) -> StatusCode {
    tracing::warn!("{}: {}", context, err);
    status_for(&err)
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub user_uuid: String,
    pub device_id: String,
}

/// Dev-facing token mint; production deployments issue tokens from the
/// account service.
pub async fn generate_token(
    Extension(state): Extension<ApiState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if req.user_uuid.is_empty() || req.device_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let token = auth::generate_token(
        &req.user_uuid,
        &req.device_id,
        &state.ctx.config.server.jwt_secret,
        7,
    )?;
    Ok(Json(serde_json::json!({ "token": token })))
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub client_msg_id: String,
    pub conv_type: ConvType,
    pub target_uuid: String,
    pub msg_type: i16,
    pub content: serde_json::Value,
}

pub async fn send_message(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let req = CreateMessageRequest {
        from_uuid: device.user_uuid,
        device_id: device.device_id,
        client_msg_id: body.client_msg_id,
        conv_type: body.conv_type,
        target_uuid: body.target_uuid,
        msg_type: body.msg_type,
        content: body.content,
    };

    let resp = state
        .send_workflow
        .execute(&req)
        .await
        .map_err(|e| reject("send_message", e))?;

    Ok(Json(serde_json::json!({
        "msg_id": resp.msg_id,
        "seq": resp.seq,
        "conv_id": resp.conv_id,
        "send_time": resp.send_time,
    })))
}

#[derive(Deserialize)]
pub struct PullMessagesQuery {
    pub conv_id: String,
    #[serde(default)]
    pub anchor_seq: i64,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn pull_messages(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Query(params): Query<PullMessagesQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let direction = match params.direction.as_deref() {
        None | Some("FORWARD") => PullDirection::Forward,
        Some("BACKWARD") => PullDirection::Backward,
        Some(_) => return Err(StatusCode::BAD_REQUEST),
    };

    // The caller's own clear marker bounds how far back history is visible.
    let clear_seq = state
        .conv_service
        .get(&device.user_uuid, &params.conv_id)
        .await
        .map_err(|e| reject("pull_messages", e))?
        .map(|conv| conv.clear_seq)
        .unwrap_or(0);

    let messages = state
        .msg_service
        .pull_messages(
            &params.conv_id,
            params.anchor_seq,
            direction,
            params.limit.unwrap_or(0),
            clear_seq,
        )
        .await
        .map_err(|e| reject("pull_messages", e))?;

    Ok(Json(serde_json::json!({ "messages": messages })))
}

#[derive(Deserialize)]
pub struct MessagesByIdsBody {
    pub conv_id: String,
    pub msg_ids: Vec<String>,
}

pub async fn get_messages_by_ids(
    Extension(state): Extension<ApiState>,
    Json(body): Json<MessagesByIdsBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let messages = state
        .msg_service
        .get_messages_by_ids(&body.conv_id, &body.msg_ids)
        .await
        .map_err(|e| reject("get_messages_by_ids", e))?;

    Ok(Json(serde_json::json!({ "messages": messages })))
}

#[derive(Deserialize)]
pub struct RecallBody {
    pub conv_id: String,
    pub msg_id: String,
}

pub async fn recall_message(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Json(body): Json<RecallBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let message = state
        .recall_workflow
        .execute(
            &body.conv_id,
            &body.msg_id,
            &device.user_uuid,
            &device.device_id,
        )
        .await
        .map_err(|e| reject("recall_message", e))?;

    Ok(Json(serde_json::json!({
        "msg_id": message.msg_id,
        "conv_id": message.conv_id,
        "status": message.status,
    })))
}

#[derive(Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub updated_since: i64,
    #[serde(default)]
    pub cursor: String,
    #[serde(default)]
    pub page_size: Option<i64>,
}

pub async fn list_conversations(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Query(params): Query<ListConversationsQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let page = state
        .conv_service
        .list(
            &device.user_uuid,
            params.updated_since,
            &params.cursor,
            params.page_size.unwrap_or(0),
        )
        .await
        .map_err(|e| reject("list_conversations", e))?;

    Ok(Json(serde_json::json!({
        "items": page.items,
        "has_more": page.has_more,
        "next_cursor": page.next_cursor,
    })))
}

#[derive(Deserialize)]
pub struct MarkReadBody {
    pub conv_id: String,
    pub read_seq: i64,
}

pub async fn mark_read(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let unread = state
        .mark_read_workflow
        .execute(
            &device.user_uuid,
            &device.device_id,
            &body.conv_id,
            body.read_seq,
        )
        .await
        .map_err(|e| reject("mark_read", e))?;

    Ok(Json(serde_json::json!({ "unread_count": unread })))
}

pub async fn delete_conversation(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Path(conv_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .conv_service
        .delete(&device.user_uuid, &conv_id)
        .await
        .map_err(|e| reject("delete_conversation", e))?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct SettingsBody {
    pub conv_id: String,
    #[serde(default)]
    pub mute: Option<bool>,
    #[serde(default)]
    pub pin: Option<bool>,
}

pub async fn update_settings(
    Extension(state): Extension<ApiState>,
    Extension(device): Extension<AuthenticatedDevice>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .conv_service
        .update_settings(&device.user_uuid, &body.conv_id, body.mute, body.pin)
        .await
        .map_err(|e| reject("update_settings", e))?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}
