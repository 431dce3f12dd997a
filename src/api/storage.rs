//! 存储池 API
//!
//! 分区增删后同步推送 greyhole 配置（失败只记录日志）

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::domain::storage::StoragePoolPartition;
use crate::error::{ApiError, ApiResult};
use crate::services::config_gen::push::push_greyhole_after_change;
use crate::services::config_gen::ConfigPusher;
use crate::services::workflows::pool;
use crate::state::AppState;

/// 删除分区请求
#[derive(Debug, Deserialize)]
pub struct RemovePartitionRequest {
    pub path: String,
}

/// 创建存储池路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/partitions",
            get(list_partitions)
                .post(add_partition)
                .delete(remove_partition),
        )
        .route("/greyhole/install/stream", get(install_stream))
        .route("/greyhole/configure/stream", get(configure_stream))
        .route("/greyhole/config", get(preview_config))
}

/// 列出存储池分区
///
/// GET /partitions
async fn list_partitions(State(state): State<Arc<AppState>>) -> Json<Vec<StoragePoolPartition>> {
    Json(state.store.partitions().await)
}

/// 添加存储池分区
///
/// POST /partitions
async fn add_partition(
    State(state): State<Arc<AppState>>,
    Json(partition): Json<StoragePoolPartition>,
) -> ApiResult<impl IntoResponse> {
    if !StoragePoolPartition::is_valid_path(&partition.path) {
        return Err(ApiError::bad_request(format!(
            "partition path must be absolute: '{}'",
            partition.path
        )));
    }

    state.store.add_partition(partition.clone()).await?;
    info!(path = %partition.path, minimum_free = partition.minimum_free, "Partition added");
    push_greyhole_after_change(&state, "partition added").await;

    Ok((StatusCode::CREATED, Json(partition)))
}

/// 移除存储池分区
///
/// DELETE /partitions  body: {"path": "..."}
async fn remove_partition(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemovePartitionRequest>,
) -> ApiResult<StatusCode> {
    state.store.remove_partition(&req.path).await?;
    info!(path = %req.path, "Partition removed");
    push_greyhole_after_change(&state, "partition removed").await;

    Ok(StatusCode::NO_CONTENT)
}

/// 安装 greyhole，实时推送进度
///
/// GET /greyhole/install/stream
async fn install_stream(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(pool::install(state).await?.into_response())
}

/// 重新配置存储池，实时推送进度
///
/// GET /greyhole/configure/stream
async fn configure_stream(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(pool::configure(state).await?.into_response())
}

/// 预览当前生成的 greyhole.conf
///
/// GET /greyhole/config
async fn preview_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let text = ConfigPusher::render_greyhole(&state.store).await;
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text)
}
