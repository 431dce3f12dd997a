//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::infra::command::{ExecMode, SimulationConfig};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口
    pub port: u16,
    /// 数据目录（实体存储、模拟部署根目录）
    pub data_dir: PathBuf,
    /// 应用目录文件（未设置时使用内置目录）
    pub catalog_path: Option<PathBuf>,
    /// 默认执行模式
    pub exec_mode: ExecMode,
    /// 部署配置文件前是否保留带时间戳的备份
    pub debug_backups: bool,
    /// 配置文件部署目标
    pub paths: ConfigPaths,
    /// 应用卷的根目录
    pub apps_root: PathBuf,
    /// 加入 docker 组的系统用户
    pub system_user: String,
}

/// 配置文件部署路径
#[derive(Clone, Debug)]
pub struct ConfigPaths {
    pub smb_conf: PathBuf,
    pub lmhosts: PathBuf,
    pub greyhole_conf: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            smb_conf: PathBuf::from("/etc/samba/smb.conf"),
            lmhosts: PathBuf::from("/etc/samba/lmhosts"),
            greyhole_conf: PathBuf::from("/etc/greyhole.conf"),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let port = load_with_fallback("AMAHI_PORT", "PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_PORT);

        let data_dir = env::var("AMAHI_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_DATA_DIR));

        let catalog_path = env::var("AMAHI_CATALOG")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let simulation = SimulationConfig {
            line_delay: env::var("AMAHI_SIMULATE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(SimulationConfig::default().line_delay),
            fail_matching: env::var("AMAHI_SIMULATE_FAIL")
                .ok()
                .filter(|s| !s.is_empty()),
        };
        let exec_mode = parse_exec_mode(env::var("AMAHI_EXEC_MODE").ok().as_deref(), simulation);

        let debug_backups = env::var("AMAHI_DEBUG")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let defaults = ConfigPaths::default();
        let paths = ConfigPaths {
            smb_conf: path_var("SAMBA_CONF_PATH", defaults.smb_conf),
            lmhosts: path_var("SAMBA_LMHOSTS_PATH", defaults.lmhosts),
            greyhole_conf: path_var("GREYHOLE_CONF_PATH", defaults.greyhole_conf),
        };

        let apps_root = path_var("AMAHI_APPS_ROOT", PathBuf::from(constants::DEFAULT_APPS_ROOT));
        let system_user = env::var("AMAHI_SYSTEM_USER").unwrap_or_else(|_| "amahi".to_string());

        Self {
            port,
            data_dir,
            catalog_path,
            exec_mode,
            debug_backups,
            paths,
            apps_root,
            system_user,
        }
    }

    /// 测试与开发用配置：全部落在 `data_dir` 下
    pub fn for_data_dir(data_dir: impl Into<PathBuf>, exec_mode: ExecMode) -> Self {
        let data_dir = data_dir.into();
        Self {
            port: constants::DEFAULT_PORT,
            catalog_path: None,
            exec_mode,
            debug_backups: false,
            paths: ConfigPaths {
                smb_conf: data_dir.join("etc/samba/smb.conf"),
                lmhosts: data_dir.join("etc/samba/lmhosts"),
                greyhole_conf: data_dir.join("etc/greyhole.conf"),
            },
            apps_root: data_dir.join("apps"),
            system_user: "amahi".to_string(),
            data_dir,
        }
    }

    /// 实体存储文件
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(constants::STORE_FILE_NAME)
    }
}

/// 解析执行模式
///
/// 未设置时 debug 构建默认模拟，release 构建默认真实执行
fn parse_exec_mode(value: Option<&str>, simulation: SimulationConfig) -> ExecMode {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("real") => ExecMode::Real,
        Some("simulate") | Some("simulated") => ExecMode::Simulate(simulation),
        Some(other) => {
            warn!(value = %other, "Unknown AMAHI_EXEC_MODE, falling back to default");
            default_exec_mode(simulation)
        }
        None => default_exec_mode(simulation),
    }
}

fn default_exec_mode(simulation: SimulationConfig) -> ExecMode {
    if cfg!(debug_assertions) {
        ExecMode::Simulate(simulation)
    } else {
        ExecMode::Real
    }
}

fn path_var(name: &str, default: PathBuf) -> PathBuf {
    env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 默认端口
    pub const DEFAULT_PORT: u16 = 4567;

    /// 默认数据目录
    pub const DEFAULT_DATA_DIR: &str = "/var/lib/amahi-agent";

    /// 默认应用卷根目录
    pub const DEFAULT_APPS_ROOT: &str = "/var/hda/apps";

    /// 实体存储文件名
    pub const STORE_FILE_NAME: &str = "amahi.json";

    /// 模拟部署时配置文件的根目录（相对 data_dir）
    pub const SIMULATED_ROOT: &str = "sim-root";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
