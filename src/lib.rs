//! Amahi Agent - 家庭服务器编排代理
//!
//! 应用安装、容器引擎与存储池部署、Samba 配置生成，进度通过 SSE 推送

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::env::constants::VERSION;
use crate::config::EnvConfig;
use crate::infra::command::ExecMode;
use crate::services::workflows::apps::recover_interrupted;
use crate::state::AppState;

/// 默认日志过滤
const DEFAULT_LOG_FILTER: &str = "amahi_agent=info,tower_http=info";

/// 命令行覆盖的运行时配置
#[derive(Debug, Default, Clone)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
    /// 覆盖数据目录
    pub data_dir: Option<PathBuf>,
    /// 覆盖应用目录文件
    pub catalog: Option<PathBuf>,
    /// 强制执行模式（`Some(true)` 模拟，`Some(false)` 真实）
    pub simulate: Option<bool>,
}

impl RuntimeConfig {
    /// 在环境配置之上应用命令行覆盖
    pub fn apply(&self, mut config: EnvConfig) -> EnvConfig {
        if let Some(port) = self.port_override {
            config.port = port;
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ref catalog) = self.catalog {
            config.catalog_path = Some(catalog.clone());
        }
        match (self.simulate, &config.exec_mode) {
            (Some(true), ExecMode::Real) => {
                config.exec_mode = ExecMode::Simulate(Default::default());
            }
            (Some(false), _) => config.exec_mode = ExecMode::Real,
            _ => {}
        }
        config
    }
}

/// 初始化日志（RUST_LOG 优先）
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
}

/// 加载配置并运行 HTTP 服务，直到收到退出信号
pub async fn run(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let config = runtime.apply(EnvConfig::from_env());
    info!(version = VERSION, mode = config.exec_mode.name(), "Starting amahi-agent");

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let state = Arc::new(AppState::initialize(config).await?);

    let recovered = recover_interrupted(&state).await;
    if recovered > 0 {
        warn!(count = recovered, "Marked interrupted installs as failed");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let app = api::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("Shut down cleanly");
    Ok(())
}

async fn wait_for_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_overrides() {
        let base = EnvConfig::for_data_dir("/tmp/amahi", ExecMode::Real);
        let runtime = RuntimeConfig {
            port_override: Some(9000),
            catalog: Some(PathBuf::from("/etc/amahi/catalog.json")),
            simulate: Some(true),
            ..Default::default()
        };

        let config = runtime.apply(base);
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/amahi"));
        assert!(config.exec_mode.is_simulated());
        assert_eq!(config.catalog_path, Some(PathBuf::from("/etc/amahi/catalog.json")));

        let real = RuntimeConfig {
            simulate: Some(false),
            ..Default::default()
        }
        .apply(config);
        assert!(!real.exec_mode.is_simulated());
    }
}
