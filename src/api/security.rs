//! 安全加固 API

use axum::{
    extract::State,
    response::Response,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::domain::security::SecurityReport;
use crate::error::{ApiError, ApiResult};
use crate::services::workflows::security::{self, CheckInfo};
use crate::state::AppState;

/// 创建安全加固路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/security/checks", get(list_checks))
        .route("/security/fix/stream", get(fix_stream))
        .route("/security/report", get(last_report))
}

/// 列出检查项
///
/// GET /security/checks
async fn list_checks() -> Json<Vec<CheckInfo>> {
    Json(security::checks().iter().map(CheckInfo::from).collect())
}

/// 执行检查并修复，实时推送进度
///
/// GET /security/fix/stream
async fn fix_stream(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(security::fix(state).await?.into_response())
}

/// 最近一次修复报告
///
/// GET /security/report
async fn last_report(State(state): State<Arc<AppState>>) -> ApiResult<Json<SecurityReport>> {
    state
        .security_report
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("security report"))
}
