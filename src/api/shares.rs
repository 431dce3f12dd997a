//! 共享、主机别名与全局设置 API
//!
//! 这些实体是 Samba 配置的输入：持久化成功后推送 smb.conf / lmhosts，
//! 推送失败只记录日志，不影响数据修改本身

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::info;

use crate::domain::share::{HostAlias, Settings, Share};
use crate::error::{ApiError, ApiResult};
use crate::services::config_gen::push::{push_greyhole_after_change, push_samba_after_change};
use crate::services::config_gen::{ConfigPusher, PushReport};
use crate::state::AppState;

/// 设置更新（安装标记不可由客户端修改）
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub workgroup: Option<String>,
    pub server_name: Option<String>,
    pub domain: Option<String>,
    pub server_address: Option<Ipv4Addr>,
    pub domain_master: Option<bool>,
}

/// 创建共享相关路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shares", get(list_shares).post(add_share))
        .route("/shares/:name", put(update_share).delete(remove_share))
        .route("/hosts", get(list_hosts).post(add_host))
        .route("/hosts/:name", delete(remove_host))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/samba/config", get(preview_config))
        .route("/samba/push", post(push_config))
}

fn validate_share(share: &Share) -> ApiResult<()> {
    if !Share::is_valid_name(&share.name) {
        return Err(ApiError::bad_request(format!(
            "invalid share name '{}'",
            share.name
        )));
    }
    if !Share::is_valid_path(&share.path) {
        return Err(ApiError::bad_request(format!(
            "share path must be a single-line absolute path: {:?}",
            share.path
        )));
    }
    if let Some(user) = share
        .users
        .iter()
        .chain(&share.write_users)
        .find(|u| !Share::is_valid_user(u))
    {
        return Err(ApiError::bad_request(format!("invalid share user {:?}", user)));
    }
    if share.extras.as_deref().is_some_and(|e| e.contains('[')) {
        return Err(ApiError::bad_request("share extras cannot open a new section"));
    }
    Ok(())
}

// ========== 共享 ==========

/// GET /shares
async fn list_shares(State(state): State<Arc<AppState>>) -> Json<Vec<Share>> {
    Json(state.store.shares().await)
}

/// 添加共享
///
/// POST /shares
async fn add_share(
    State(state): State<Arc<AppState>>,
    Json(share): Json<Share>,
) -> ApiResult<impl IntoResponse> {
    validate_share(&share)?;
    state.store.add_share(share.clone()).await?;
    info!(share = %share.name, "Share added");

    push_samba_after_change(&state, "share added").await;
    if share.disk_pool_copies > 0 {
        push_greyhole_after_change(&state, "pooled share added").await;
    }
    Ok((StatusCode::CREATED, Json(share)))
}

/// 修改共享（允许改名）
///
/// PUT /shares/:name
async fn update_share(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(share): Json<Share>,
) -> ApiResult<Json<Share>> {
    validate_share(&share)?;
    state.store.update_share(&name, share.clone()).await?;
    info!(share = %name, new_name = %share.name, "Share updated");

    push_samba_after_change(&state, "share updated").await;
    push_greyhole_after_change(&state, "share updated").await;
    Ok(Json(share))
}

/// DELETE /shares/:name
async fn remove_share(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.remove_share(&name).await?;
    info!(share = %name, "Share removed");

    push_samba_after_change(&state, "share removed").await;
    push_greyhole_after_change(&state, "share removed").await;
    Ok(StatusCode::NO_CONTENT)
}

// ========== 主机别名 ==========

/// GET /hosts
async fn list_hosts(State(state): State<Arc<AppState>>) -> Json<Vec<HostAlias>> {
    Json(state.store.hosts().await)
}

/// POST /hosts
async fn add_host(
    State(state): State<Arc<AppState>>,
    Json(host): Json<HostAlias>,
) -> ApiResult<impl IntoResponse> {
    if !HostAlias::is_valid_name(&host.name) {
        return Err(ApiError::bad_request(format!(
            "invalid host name '{}'",
            host.name
        )));
    }
    state.store.add_host(host.clone()).await?;
    info!(host = %host.name, address = %host.address, "Host alias added");

    push_samba_after_change(&state, "host added").await;
    Ok((StatusCode::CREATED, Json(host)))
}

/// DELETE /hosts/:name
async fn remove_host(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.remove_host(&name).await?;
    info!(host = %name, "Host alias removed");

    push_samba_after_change(&state, "host removed").await;
    Ok(StatusCode::NO_CONTENT)
}

// ========== 设置 ==========

/// GET /settings
async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(state.store.settings().await)
}

/// 修改全局设置
///
/// PUT /settings
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    if let Some(name) = update.server_name.as_deref() {
        if !HostAlias::is_valid_name(name) {
            return Err(ApiError::bad_request(format!("invalid server name '{}'", name)));
        }
    }

    let settings = state
        .store
        .update_settings(|s| {
            if let Some(v) = update.workgroup {
                s.workgroup = v;
            }
            if let Some(v) = update.server_name {
                s.server_name = v;
            }
            if let Some(v) = update.domain {
                s.domain = v;
            }
            if let Some(v) = update.server_address {
                s.server_address = v;
            }
            if let Some(v) = update.domain_master {
                s.domain_master = v;
            }
        })
        .await?;
    info!(workgroup = %settings.workgroup, server = %settings.server_name, "Settings updated");

    push_samba_after_change(&state, "settings updated").await;
    Ok(Json(settings))
}

// ========== Samba ==========

/// 预览当前生成的 smb.conf
///
/// GET /samba/config
async fn preview_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let text = ConfigPusher::render_samba(&state.store).await;
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text)
}

/// 强制推送 Samba 配置
///
/// POST /samba/push
async fn push_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<PushReport>> {
    let report = ConfigPusher::from_state(&state).push_samba(&state.store).await?;
    info!(files = report.deployed.len(), reloaded = report.reloaded, "Samba configuration pushed");
    Ok(Json(report))
}
