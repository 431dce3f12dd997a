//! 健康检查 API

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::flights::Flight;
use crate::state::AppState;

/// 实体数量
#[derive(Debug, Serialize)]
struct EntityCounts {
    apps: usize,
    installed_apps: usize,
    partitions: usize,
    shares: usize,
    hosts: usize,
}

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    hostname: String,
    timestamp: String,
    uptime_secs: i64,
    mode: &'static str,
    docker_installed: bool,
    greyhole_installed: bool,
    /// 持久化文件路径（内存模式为空）
    store_path: Option<String>,
    /// 进行中的操作
    in_flight: Vec<Flight>,
    counts: EntityCounts,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// 健康检查 - 返回状态、版本、运行模式、进行中的操作与实体数量
///
/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data = state.store.snapshot().await;

    let counts = EntityCounts {
        apps: data.apps.len(),
        installed_apps: data.apps.values().filter(|a| a.status.is_installed()).count(),
        partitions: data.partitions.len(),
        shares: data.shares.len(),
        hosts: data.hosts.len(),
    };

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    Json(HealthResponse {
        status: "ok",
        service: "amahi-agent",
        version: VERSION,
        hostname,
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        mode: state.exec_mode().name(),
        docker_installed: data.settings.docker_installed,
        greyhole_installed: data.settings.greyhole_installed,
        store_path: state.store.path().map(|p| p.display().to_string()),
        in_flight: state.flights.active(),
        counts,
    })
}
