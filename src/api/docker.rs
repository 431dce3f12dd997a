//! 容器引擎安装 API

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::services::workflows::engine;
use crate::state::AppState;

/// 创建容器引擎路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/docker/install/stream", get(install_stream))
        .route("/docker/install", post(install_detached))
}

/// 安装 Docker，实时推送进度
///
/// GET /docker/install/stream
async fn install_stream(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(engine::install(state).await?.into_response())
}

/// 后台安装 Docker
///
/// POST /docker/install
async fn install_detached(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    engine::install(state).await?.detach("docker:install");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "operation": "docker:install",
            "message": "Docker installation started; see GET /health for docker_installed",
        })),
    ))
}
