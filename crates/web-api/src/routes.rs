use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::{Authorizer, ChatService};
use domain::{
    Caller, ChatMessage, MessageId, PresenceEntry, PrivateMessage, Role, Timestamp, UserId,
};

use crate::{
    auth::Authenticated, error::ApiError, state::AppState, ws_connection::WebSocketConnection,
};

/// 未指定 limit 时返回的历史条数
const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
struct TextPayload {
    text: String,
}

#[derive(Debug, Deserialize)]
struct PrivatePayload {
    recipient_id: i64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    user_id: i64,
    display_name: String,
    role: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct UnreadResponse {
    unread: usize,
}

#[derive(Debug, Serialize)]
struct VisitResponse {
    visited_at: Timestamp,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/presence", get(online_users))
        .route("/auth/token", post(issue_dev_token))
        .route(
            "/chat/group",
            get(list_messages).post(send_message).delete(clear_messages),
        )
        .route("/chat/group/unread", get(group_unread))
        .route("/chat/group/visit", post(group_visit))
        .route(
            "/chat/group/{id}",
            put(edit_message).delete(delete_message),
        )
        .route("/chat/conversations/{user_id}", get(list_conversation))
        .route("/chat/private", post(send_private))
        .route(
            "/chat/private/{id}",
            put(edit_private).delete(delete_private),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(tower_http::cors::Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "instance_id": state.relay.instance_id().as_str(),
        "bus_available": state.relay.router().bus_available(),
        "connections": state.relay.registry().len().await,
    }))
}

/// 浏览器无法给 WebSocket 握手加请求头，允许用 `?token=` 传递凭证
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .or(query.token.as_deref());
    let caller = state.jwt_service.authorize(credential).map_err(|err| {
        tracing::debug!(error = %err, "WebSocket 握手认证失败");
        ApiError::from(err)
    })?;

    Ok(ws.on_upgrade(move |socket| async move {
        let handle = state.relay.connect_as(caller).await;
        WebSocketConnection::new(socket, handle, state.ping_interval)
            .run()
            .await;
    }))
}

async fn online_users(State(state): State<AppState>) -> Json<Vec<PresenceEntry>> {
    Json(state.relay.online_users().await)
}

/// 开发环境签发 token，生产环境关闭
async fn issue_dev_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenPayload>,
) -> Result<Json<TokenResponse>, ApiError> {
    if !state.jwt_service.allows_dev_tokens() {
        return Err(ApiError::not_found("route not found"));
    }
    let caller = Caller {
        user_id: UserId(payload.user_id),
        display_name: payload.display_name,
        role: Role::new(payload.role.unwrap_or_else(|| "member".to_string())),
    };
    let token = state.jwt_service.generate_token(&caller)?;
    Ok(Json(TokenResponse { token }))
}

fn chat(state: &AppState) -> &ChatService {
    &state.chat_service
}

async fn list_messages(
    State(state): State<AppState>,
    Authenticated(_caller): Authenticated,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let messages = chat(&state).list_messages(query.limit()).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(payload): Json<TextPayload>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let message = chat(&state).send_message(&caller, payload.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<i64>,
    Json(payload): Json<TextPayload>,
) -> Result<Json<ChatMessage>, ApiError> {
    let message = chat(&state)
        .edit_message(&caller, MessageId(id), payload.text)
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    chat(&state).delete_message(&caller, MessageId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_messages(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<StatusCode, ApiError> {
    chat(&state).clear_messages(&caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn group_unread(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<Json<UnreadResponse>, ApiError> {
    let unread = chat(&state).unread_count(&caller).await?;
    Ok(Json(UnreadResponse { unread }))
}

async fn group_visit(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<Json<VisitResponse>, ApiError> {
    let visited_at = chat(&state).mark_group_visited(&caller).await?;
    Ok(Json(VisitResponse { visited_at }))
}

async fn list_conversation(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(user_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PrivateMessage>>, ApiError> {
    let messages = chat(&state)
        .list_conversation(&caller, UserId(user_id), query.limit())
        .await?;
    Ok(Json(messages))
}

async fn send_private(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Json(payload): Json<PrivatePayload>,
) -> Result<(StatusCode, Json<PrivateMessage>), ApiError> {
    let message = chat(&state)
        .send_private(&caller, UserId(payload.recipient_id), payload.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_private(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<i64>,
    Json(payload): Json<TextPayload>,
) -> Result<Json<PrivateMessage>, ApiError> {
    let message = chat(&state)
        .edit_private(&caller, MessageId(id), payload.text)
        .await?;
    Ok(Json(message))
}

async fn delete_private(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    chat(&state).delete_private(&caller, MessageId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
