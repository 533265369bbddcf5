use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use application::{
    ConversationView, ConversationWithMessages, SendDirectMessageRequest,
    StartConversationResponse,
};
use domain::{ClientMessageId, ConversationId, Message, User};

use crate::{auth::bearer_token, error::ApiError, state::AppState, ws_connection::SocketConnection};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartConversationPayload {
    other_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    receiver_id: String,
    text: String,
    #[serde(default)]
    client_message_id: Option<ClientMessageId>,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
}

#[derive(Debug, Serialize)]
struct MarkReadResponse {
    updated: u64,
}

#[derive(Debug, Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/sync-user", post(sync_user))
        .route("/auth/me", get(me))
        .route("/users", get(list_users))
        .route("/conversations", get(list_conversations))
        .route("/messages/conversations", get(list_conversations))
        .route("/messages/start-conversation", post(start_conversation))
        .route("/messages/conversation/{user_id}", get(conversation_with))
        .route("/messages/conversation/{user_id}/read", post(mark_read))
        .route("/messages/send", post(send_message))
        .route("/socket", get(socket_upgrade))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn sync_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let user = state.user_service.sync_user(&identity).await?;
    Ok(Json(user))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<User>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let user = state.user_service.me(&identity).await?;
    Ok(Json(user))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let users = state.user_service.list_others(&identity).await?;
    Ok(Json(users))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let views = state
        .conversation_service
        .list_conversations(&identity.user_id)
        .await?;
    Ok(Json(views))
}

async fn start_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StartConversationPayload>,
) -> Result<Json<StartConversationResponse>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let response = state
        .conversation_service
        .start_conversation(&identity, payload.other_user_id)
        .await?;
    Ok(Json(response))
}

async fn conversation_with(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<ConversationWithMessages>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let conversation = state
        .conversation_service
        .conversation_with(&identity, &user_id)
        .await?;
    Ok(Json(conversation))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let updated = state
        .message_service
        .mark_read(&identity.user_id, &user_id)
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// 实时通道的幂等重试入口：相同 `clientMessageId` 返回已持久化的消息
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let identity = state.jwt_service.extract_identity_from_headers(&headers)?;
    let outcome = state
        .message_service
        .send_direct(SendDirectMessageRequest {
            sender_id: identity.user_id,
            receiver_id: payload.receiver_id,
            text: payload.text,
            client_message_id: payload.client_message_id,
            expected_conversation: payload.conversation_id,
        })
        .await
        .map_err(ApiError::send_failure)?;

    if !outcome.is_created() {
        return Ok((StatusCode::OK, Json(outcome.into_message())));
    }

    let message = outcome.into_message();
    state.realtime.publish(&message).await;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn socket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers).map(str::to_owned))
        .ok_or_else(|| ApiError::unauthorized("Missing socket credential"))?;

    let handshake = state
        .realtime
        .authenticate(&token)
        .await
        .map_err(|err| ApiError::unauthorized(err.to_string()))?;

    // 升级成功后才注册连接，升级失败不会在连接表中留下条目
    Ok(ws
        .on_failed_upgrade(|err| tracing::warn!(error = %err, "socket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let session = state.realtime.attach(handshake, events_tx).await;
            SocketConnection::new(socket, state, session, events_rx)
                .run()
                .await
        }))
}
