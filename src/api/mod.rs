//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod apps;
pub mod docker;
pub mod health;
pub mod security;
pub mod shares;
pub mod storage;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .merge(health::router())
        // Applications
        .merge(apps::router())
        // Container engine
        .merge(docker::router())
        // Storage pool
        .merge(storage::router())
        // Shares / hosts / Samba
        .merge(shares::router())
        // Security
        .merge(security::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
