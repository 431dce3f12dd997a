//! 应用状态

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::catalog::Catalog;
use crate::config::env::EnvConfig;
use crate::domain::security::SecurityReport;
use crate::infra::command::{CommandRunner, ExecMode};

use super::flights::FlightRegistry;
use super::store::Store;

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// 环境配置
    pub config: EnvConfig,
    /// 应用目录
    pub catalog: Catalog,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 实体与工作流 ==========
    /// 实体存储
    pub store: Store,
    /// 每个实体当前进行中的工作流
    pub flights: FlightRegistry,
    /// 最近一次安全修复报告
    pub security_report: RwLock<Option<SecurityReport>>,
}

impl AppState {
    pub fn new(config: EnvConfig, catalog: Catalog, store: Store) -> Self {
        Self {
            config,
            catalog,
            started_at: Utc::now(),
            store,
            flights: FlightRegistry::new(),
            security_report: RwLock::new(None),
        }
    }

    /// 加载目录、打开存储并合并目录条目
    pub async fn initialize(config: EnvConfig) -> anyhow::Result<Self> {
        let catalog = match config.catalog_path {
            Some(ref path) => Catalog::load_from_file(path)
                .with_context(|| format!("loading catalog {}", path.display()))?,
            None => Catalog::builtin(),
        };

        let store_path = config.store_path();
        let store = Store::open(&store_path)
            .await
            .with_context(|| format!("opening store {}", store_path.display()))?;
        let added = store.merge_catalog(&catalog).await?;

        info!(
            port = config.port,
            data_dir = %config.data_dir.display(),
            exec_mode = config.exec_mode.name(),
            catalog = catalog.len(),
            new_apps = added,
            "Loaded configuration"
        );

        Ok(Self::new(config, catalog, store))
    }

    /// 默认执行模式
    pub fn exec_mode(&self) -> &ExecMode {
        &self.config.exec_mode
    }

    /// 为一次工作流调用创建命令执行器
    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(self.config.exec_mode.clone())
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
