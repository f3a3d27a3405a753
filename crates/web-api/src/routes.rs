use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::PresenceSnapshot;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

/// WebSocket 握手参数；token 放在查询参数里，握手阶段不依赖请求头
#[derive(Debug, Deserialize)]
struct WebSocketQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/presence", get(online_users))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WebSocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // 认证失败时拒绝升级，连接不会进入注册表
    let user_id = state.identity.authenticate(query.token.as_deref()).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        match WebSocketConnection::new(socket, state, user_id).await {
            Ok(connection) => connection.run().await,
            Err(err) => tracing::error!(error = ?err, user_id = %user_id, "WebSocket 连接初始化失败"),
        }
    }))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PresenceSnapshot>>, ApiError> {
    state.identity.authenticate_headers(&headers).await?;
    Ok(Json(state.registry.online_users().await))
}
