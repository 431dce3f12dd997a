//! 共享、主机别名与全局设置
//!
//! 这些实体不由编排核心拥有，仅作为配置生成的输入

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// 文件共享
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    /// 共享名（唯一，即 smb.conf 中的 section 名）
    pub name: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub readonly: bool,
    /// 所有用户可访问（忽略访问列表）
    #[serde(default = "default_true")]
    pub everyone: bool,
    #[serde(default)]
    pub guest_access: bool,
    #[serde(default)]
    pub guest_writeable: bool,
    /// 可访问用户
    #[serde(default)]
    pub users: Vec<String>,
    /// 可写用户
    #[serde(default)]
    pub write_users: Vec<String>,
    /// 存储池副本数（0 表示不进入存储池）
    #[serde(default)]
    pub disk_pool_copies: u32,
    /// 追加到 section 末尾的原始配置
    #[serde(default)]
    pub extras: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Share {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            visible: true,
            readonly: false,
            everyone: true,
            guest_access: false,
            guest_writeable: false,
            users: Vec::new(),
            write_users: Vec::new(),
            disk_pool_copies: 0,
            extras: None,
        }
    }

    /// 共享名不能包含 section 分隔符或换行
    pub fn is_valid_name(name: &str) -> bool {
        !name.trim().is_empty()
            && name.len() <= 80
            && !name.contains(['[', ']', '\n', '\r', '/'])
            && !name.eq_ignore_ascii_case("global")
            && !name.eq_ignore_ascii_case("homes")
    }

    /// 路径必须是绝对路径且为单行
    pub fn is_valid_path(path: &str) -> bool {
        path.starts_with('/') && !path.contains(['\n', '\r'])
    }

    /// 用户名会写入 `valid users` / `write list`，不能含空白或 section 分隔符
    pub fn is_valid_user(user: &str) -> bool {
        !user.is_empty() && !user.contains(|c: char| c.is_whitespace() || c == '[' || c == ']')
    }
}

/// 主机别名（lmhosts 中的一行）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostAlias {
    pub name: String,
    pub address: Ipv4Addr,
}

impl HostAlias {
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 63
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    }
}

/// 全局设置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub workgroup: String,
    /// 服务器 NetBIOS 名
    pub server_name: String,
    pub domain: String,
    /// 本机地址
    pub server_address: Ipv4Addr,
    /// 是否作为域主浏览器
    pub domain_master: bool,
    pub docker_installed: bool,
    pub greyhole_installed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workgroup: "WORKGROUP".to_string(),
            server_name: "hda".to_string(),
            domain: "home.com".to_string(),
            server_address: Ipv4Addr::new(192, 168, 1, 10),
            domain_master: true,
            docker_installed: false,
            greyhole_installed: false,
        }
    }
}
