//! 应用相关领域模型
//!
//! `ManagedApplication` 及其状态机。纯数据结构，不依赖 axum/tokio

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 容器名前缀
pub const CONTAINER_PREFIX: &str = "amahi-";

/// 应用生命周期状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Available,
    Pulling,
    Installing,
    Running,
    Stopped,
    Error,
}

impl AppStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Available => "available",
            AppStatus::Pulling => "pulling",
            AppStatus::Installing => "installing",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Error => "error",
        }
    }

    /// 是否已安装（容器/服务已创建）
    pub fn is_installed(&self) -> bool {
        matches!(self, AppStatus::Running | AppStatus::Stopped)
    }

    /// 是否处于安装过程中
    pub fn is_transient(&self) -> bool {
        matches!(self, AppStatus::Pulling | AppStatus::Installing)
    }
}

/// 端口映射（容器端口 -> 主机端口）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub container: u16,
    pub host: u16,
}

/// 卷映射
///
/// `host` 为相对路径时，挂载到 `AMAHI_APPS_ROOT/<id>/` 下
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMapping {
    pub host: String,
    pub container: String,
}

/// 应用来源（集成类型）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppSource {
    /// Docker 镜像
    Container {
        image: String,
        #[serde(default)]
        ports: Vec<PortMapping>,
        #[serde(default)]
        volumes: Vec<VolumeMapping>,
        #[serde(default)]
        environment: BTreeMap<String, String>,
    },
    /// 系统软件包 + systemd 服务
    Package {
        packages: Vec<String>,
        service: String,
        #[serde(default)]
        port: Option<u16>,
    },
}

impl AppSource {
    /// 集成类型名称
    pub fn kind(&self) -> &'static str {
        match self {
            AppSource::Container { .. } => "container",
            AppSource::Package { .. } => "package",
        }
    }

    /// 镜像或软件包引用
    pub fn reference(&self) -> String {
        match self {
            AppSource::Container { image, .. } => image.clone(),
            AppSource::Package { packages, .. } => packages.join(" "),
        }
    }

    /// 安装成功后分配的主机端口
    pub fn host_port(&self) -> Option<u16> {
        match self {
            AppSource::Container { ports, .. } => ports.first().map(|p| p.host),
            AppSource::Package { port, .. } => *port,
        }
    }
}

/// 状态机事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppEvent {
    /// 开始安装（available/error -> pulling）
    Install,
    /// 镜像已拉取（pulling -> installing）
    Fetched,
    /// 已创建并启动（installing -> running）
    Created {
        container_name: String,
        host_port: Option<u16>,
    },
    Stop,
    Start,
    Restart,
    /// 卸载（任意 -> available）
    Uninstall,
    /// 步骤失败（任意 -> error）
    Fail(String),
}

impl AppEvent {
    fn name(&self) -> &'static str {
        match self {
            AppEvent::Install => "install",
            AppEvent::Fetched => "fetched",
            AppEvent::Created { .. } => "created",
            AppEvent::Stop => "stop",
            AppEvent::Start => "start",
            AppEvent::Restart => "restart",
            AppEvent::Uninstall => "uninstall",
            AppEvent::Fail(_) => "fail",
        }
    }
}

/// 非法状态转换
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {event} application '{id}' while it is {from}")]
pub struct TransitionError {
    pub id: String,
    pub from: &'static str,
    pub event: &'static str,
}

/// 可管理的应用
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagedApplication {
    /// 唯一标识（创建后不可变）
    pub id: String,
    pub name: String,
    pub source: AppSource,
    pub status: AppStatus,
    /// 容器名 / 服务名（仅 running/stopped 时有值）
    pub container_name: Option<String>,
    /// 主机端口（仅 running/stopped 时有值）
    pub host_port: Option<u16>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedApplication {
    /// 创建新的可用应用
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: AppSource) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source,
            status: AppStatus::Available,
            container_name: None,
            host_port: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// 安装后使用的容器名 / 服务名
    pub fn assigned_name(&self) -> String {
        match &self.source {
            AppSource::Container { .. } => format!("{}{}", CONTAINER_PREFIX, self.id),
            AppSource::Package { service, .. } => service.clone(),
        }
    }

    /// 应用状态机事件
    ///
    /// 失败时实体保持不变
    pub fn apply(&mut self, event: AppEvent) -> Result<(), TransitionError> {
        use AppStatus::*;

        let next = match (&event, self.status) {
            (AppEvent::Install, Available | Error) => Pulling,
            (AppEvent::Fetched, Pulling) => Installing,
            (AppEvent::Created { .. }, Installing) => Running,
            (AppEvent::Stop, Running) => Stopped,
            (AppEvent::Start, Stopped) => Running,
            (AppEvent::Restart, Running | Stopped) => Running,
            (AppEvent::Uninstall, _) => Available,
            (AppEvent::Fail(_), _) => Error,
            _ => {
                return Err(TransitionError {
                    id: self.id.clone(),
                    from: self.status.as_str(),
                    event: event.name(),
                })
            }
        };

        match event {
            AppEvent::Install | AppEvent::Uninstall => {
                self.container_name = None;
                self.host_port = None;
                self.error_message = None;
            }
            AppEvent::Created {
                container_name,
                host_port,
            } => {
                self.container_name = Some(container_name);
                self.host_port = host_port;
                self.error_message = None;
            }
            AppEvent::Fail(message) => self.error_message = Some(message),
            AppEvent::Start | AppEvent::Restart | AppEvent::Stop => self.error_message = None,
            AppEvent::Fetched => {}
        }

        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 状态是否允许该事件（不修改实体）
    pub fn check(&self, event: &AppEvent) -> Result<(), TransitionError> {
        self.clone().apply(event.clone())
    }
}

/// 应用状态响应（供 UI 轮询）
#[derive(Clone, Debug, Serialize)]
pub struct AppStatusView {
    pub id: String,
    pub status: AppStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ManagedApplication> for AppStatusView {
    fn from(app: &ManagedApplication) -> Self {
        Self {
            id: app.id.clone(),
            status: app.status,
            host_port: app.host_port,
            error: app.error_message.clone(),
        }
    }
}

/// 检查标识是否合法
///
/// 小写字母/数字开头，仅包含小写字母、数字、`-`、`_`，最长 63 个字符
pub fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    id.len() <= 63
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
