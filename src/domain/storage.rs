//! 存储池领域模型

use serde::{Deserialize, Serialize};

/// 存储池分区
///
/// 参与 greyhole 存储池的挂载点
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoragePoolPartition {
    /// 挂载路径（唯一）
    pub path: String,
    /// 最小剩余空间（GB）
    pub minimum_free: u32,
}

impl StoragePoolPartition {
    pub fn new(path: impl Into<String>, minimum_free: u32) -> Self {
        Self {
            path: path.into(),
            minimum_free,
        }
    }

    /// greyhole 在分区上使用的目录
    pub fn pool_dir(&self) -> String {
        format!("{}/gh", self.path.trim_end_matches('/'))
    }

    /// 路径必须是绝对路径，且不含 `..`
    pub fn is_valid_path(path: &str) -> bool {
        path.starts_with('/') && !path.split('/').any(|seg| seg == "..")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_dir() {
        assert_eq!(
            StoragePoolPartition::new("/mnt/disk1/", 10).pool_dir(),
            "/mnt/disk1/gh"
        );
        assert_eq!(StoragePoolPartition::new("/var/hda", 10).pool_dir(), "/var/hda/gh");
    }

    #[test]
    fn test_path_validation() {
        assert!(StoragePoolPartition::is_valid_path("/mnt/disk1"));
        assert!(!StoragePoolPartition::is_valid_path("mnt/disk1"));
        assert!(!StoragePoolPartition::is_valid_path("/mnt/../etc"));
    }
}
