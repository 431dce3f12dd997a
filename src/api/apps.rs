//! 应用管理 API
//!
//! 安装/卸载以 SSE 流或后台任务方式执行，启停操作同步返回状态

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::domain::app::{is_valid_identifier, AppStatusView, ManagedApplication};
use crate::error::{ApiError, ApiResult};
use crate::services::workflows::apps::{self, ControlAction, ControlResponse};
use crate::state::AppState;

/// 后台任务已接受
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub id: String,
    pub operation: &'static str,
    pub message: String,
}

/// 创建应用路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/apps", get(list_apps))
        .route("/apps/:id", get(get_app))
        .route("/apps/:id/status", get(app_status))
        .route("/apps/:id/install/stream", get(install_stream))
        .route("/apps/:id/uninstall/stream", get(uninstall_stream))
        .route("/apps/:id/install", post(install_detached))
        .route("/apps/:id/uninstall", post(uninstall_detached))
        .route("/apps/:id/start", post(start_app))
        .route("/apps/:id/stop", post(stop_app))
        .route("/apps/:id/restart", post(restart_app))
}

fn validate_id(id: &str) -> ApiResult<()> {
    if is_valid_identifier(id) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("invalid application id '{}'", id)))
    }
}

/// 列出所有应用
///
/// GET /apps
async fn list_apps(State(state): State<Arc<AppState>>) -> Json<Vec<ManagedApplication>> {
    Json(state.store.apps().await)
}

/// 获取单个应用
///
/// GET /apps/:id
async fn get_app(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ManagedApplication>> {
    validate_id(&id)?;
    Ok(Json(state.store.require_app(&id).await?))
}

/// 应用状态（真实模式下与容器/服务实际状态对齐）
///
/// GET /apps/:id/status
async fn app_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AppStatusView>> {
    validate_id(&id)?;
    Ok(Json(apps::refresh_status(&state, &id).await?))
}

/// 安装应用，实时推送进度
///
/// GET /apps/:id/install/stream
async fn install_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    validate_id(&id)?;
    Ok(apps::install(state, &id).await?.into_response())
}

/// 卸载应用，实时推送进度
///
/// GET /apps/:id/uninstall/stream
async fn uninstall_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    validate_id(&id)?;
    Ok(apps::uninstall(state, &id).await?.into_response())
}

/// 后台安装，立即返回 202
///
/// POST /apps/:id/install
async fn install_detached(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    validate_id(&id)?;
    apps::install(state, &id).await?.detach(format!("install:{}", id));
    Ok(accepted(id, "install"))
}

/// 后台卸载，立即返回 202
///
/// POST /apps/:id/uninstall
async fn uninstall_detached(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    validate_id(&id)?;
    apps::uninstall(state, &id).await?.detach(format!("uninstall:{}", id));
    Ok(accepted(id, "uninstall"))
}

fn accepted(id: String, operation: &'static str) -> (StatusCode, Json<AcceptedResponse>) {
    let message = format!("{} started; poll /apps/{}/status for progress", operation, id);
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            id,
            operation,
            message,
        }),
    )
}

/// POST /apps/:id/start
async fn start_app(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    run_control(state, id, ControlAction::Start).await
}

/// POST /apps/:id/stop
async fn stop_app(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    run_control(state, id, ControlAction::Stop).await
}

/// POST /apps/:id/restart
async fn restart_app(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    run_control(state, id, ControlAction::Restart).await
}

/// 命令失败时返回 200，状态为 error 并带错误信息
async fn run_control(
    state: Arc<AppState>,
    id: String,
    action: ControlAction,
) -> ApiResult<Json<ControlResponse>> {
    validate_id(&id)?;
    Ok(Json(apps::control(state, &id, action).await?))
}
