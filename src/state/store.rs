//! 实体存储
//!
//! 应用、存储池分区、共享、主机别名和全局设置保存在一个 JSON 文档里，
//! 每次修改后原子写入（临时文件 + 重命名）

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::catalog::Catalog;
use crate::domain::app::{AppEvent, ManagedApplication, TransitionError};
use crate::domain::share::{HostAlias, Settings, Share};
use crate::domain::storage::StoragePoolPartition;

/// 存储格式版本
const STORE_VERSION: u32 = 1;

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{key}' already exists")]
    Duplicate { kind: &'static str, key: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("failed to persist store: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    fn duplicate(kind: &'static str, key: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            key: key.into(),
        }
    }
}

/// 持久化文档
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreData {
    pub version: u32,
    #[serde(default)]
    pub apps: BTreeMap<String, ManagedApplication>,
    /// 按添加顺序保存
    #[serde(default)]
    pub partitions: Vec<StoragePoolPartition>,
    #[serde(default)]
    pub shares: Vec<Share>,
    #[serde(default)]
    pub hosts: Vec<HostAlias>,
    #[serde(default)]
    pub settings: Settings,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            apps: BTreeMap::new(),
            partitions: Vec::new(),
            shares: Vec::new(),
            hosts: Vec::new(),
            settings: Settings::default(),
        }
    }
}

/// 实体存储
pub struct Store {
    /// 为 None 时只保存在内存中
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl Store {
    /// 打开存储文件，不存在时从空文档开始
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let data: StoreData = serde_json::from_str(&content)?;
            info!(
                path = %path.display(),
                apps = data.apps.len(),
                partitions = data.partitions.len(),
                shares = data.shares.len(),
                "Loaded entity store"
            );
            data
        } else {
            info!(path = %path.display(), "No entity store yet, starting empty");
            StoreData::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// 仅内存存储
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(StoreData::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 数据快照
    pub async fn snapshot(&self) -> StoreData {
        self.data.read().await.clone()
    }

    /// 在写锁内修改并保存
    ///
    /// 闭包返回错误时不写盘
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut data = self.data.write().await;
        let mut draft = data.clone();
        let value = f(&mut draft)?;
        self.save(&draft).await?;
        *data = draft;
        Ok(value)
    }

    /// 原子写入
    async fn save(&self, data: &StoreData) -> Result<(), StoreError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let temp_path = path.with_extension("json.tmp");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, path).await?;

        debug!(path = %path.display(), "Saved entity store");
        Ok(())
    }

    // ========== 应用 ==========

    /// 合并目录：新条目以 available 创建，已有实体保留状态
    pub async fn merge_catalog(&self, catalog: &Catalog) -> Result<usize, StoreError> {
        self.mutate(|data| {
            let mut added = 0;
            for entry in catalog.entries() {
                match data.apps.get_mut(&entry.id) {
                    Some(app) => {
                        app.name = entry.name.clone();
                        app.source = entry.source.clone();
                    }
                    None => {
                        data.apps.insert(entry.id.clone(), entry.to_application());
                        added += 1;
                    }
                }
            }
            Ok(added)
        })
        .await
    }

    pub async fn apps(&self) -> Vec<ManagedApplication> {
        self.data.read().await.apps.values().cloned().collect()
    }

    pub async fn app(&self, id: &str) -> Option<ManagedApplication> {
        self.data.read().await.apps.get(id).cloned()
    }

    pub async fn require_app(&self, id: &str) -> Result<ManagedApplication, StoreError> {
        self.app(id)
            .await
            .ok_or_else(|| StoreError::not_found("application", id))
    }

    /// 应用状态机事件并持久化
    pub async fn transition_app(
        &self,
        id: &str,
        event: AppEvent,
    ) -> Result<ManagedApplication, StoreError> {
        self.mutate(|data| {
            let app = data
                .apps
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found("application", id))?;
            app.apply(event)?;
            Ok(app.clone())
        })
        .await
    }

    // ========== 存储池分区 ==========

    pub async fn partitions(&self) -> Vec<StoragePoolPartition> {
        self.data.read().await.partitions.clone()
    }

    pub async fn add_partition(&self, partition: StoragePoolPartition) -> Result<(), StoreError> {
        self.mutate(|data| {
            if data.partitions.iter().any(|p| p.path == partition.path) {
                return Err(StoreError::duplicate("partition", partition.path));
            }
            data.partitions.push(partition);
            Ok(())
        })
        .await
    }

    pub async fn remove_partition(&self, path: &str) -> Result<(), StoreError> {
        self.mutate(|data| {
            let before = data.partitions.len();
            data.partitions.retain(|p| p.path != path);
            if data.partitions.len() == before {
                return Err(StoreError::not_found("partition", path));
            }
            Ok(())
        })
        .await
    }

    // ========== 共享 ==========

    pub async fn shares(&self) -> Vec<Share> {
        self.data.read().await.shares.clone()
    }

    pub async fn add_share(&self, share: Share) -> Result<(), StoreError> {
        self.mutate(|data| {
            if data
                .shares
                .iter()
                .any(|s| s.name.eq_ignore_ascii_case(&share.name))
            {
                return Err(StoreError::duplicate("share", share.name));
            }
            data.shares.push(share);
            Ok(())
        })
        .await
    }

    /// 替换共享（名称可以修改）
    pub async fn update_share(&self, name: &str, share: Share) -> Result<(), StoreError> {
        self.mutate(|data| {
            if !share.name.eq_ignore_ascii_case(name)
                && data
                    .shares
                    .iter()
                    .any(|s| s.name.eq_ignore_ascii_case(&share.name))
            {
                return Err(StoreError::duplicate("share", share.name));
            }
            let slot = data
                .shares
                .iter_mut()
                .find(|s| s.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| StoreError::not_found("share", name))?;
            *slot = share;
            Ok(())
        })
        .await
    }

    pub async fn remove_share(&self, name: &str) -> Result<(), StoreError> {
        self.mutate(|data| {
            let before = data.shares.len();
            data.shares.retain(|s| !s.name.eq_ignore_ascii_case(name));
            if data.shares.len() == before {
                return Err(StoreError::not_found("share", name));
            }
            Ok(())
        })
        .await
    }

    // ========== 主机别名 ==========

    pub async fn hosts(&self) -> Vec<HostAlias> {
        self.data.read().await.hosts.clone()
    }

    pub async fn add_host(&self, host: HostAlias) -> Result<(), StoreError> {
        self.mutate(|data| {
            if data
                .hosts
                .iter()
                .any(|h| h.name.eq_ignore_ascii_case(&host.name))
            {
                return Err(StoreError::duplicate("host", host.name));
            }
            data.hosts.push(host);
            Ok(())
        })
        .await
    }

    pub async fn remove_host(&self, name: &str) -> Result<(), StoreError> {
        self.mutate(|data| {
            let before = data.hosts.len();
            data.hosts.retain(|h| !h.name.eq_ignore_ascii_case(name));
            if data.hosts.len() == before {
                return Err(StoreError::not_found("host", name));
            }
            Ok(())
        })
        .await
    }

    // ========== 设置 ==========

    pub async fn settings(&self) -> Settings {
        self.data.read().await.settings.clone()
    }

    pub async fn update_settings(
        &self,
        f: impl FnOnce(&mut Settings),
    ) -> Result<Settings, StoreError> {
        self.mutate(|data| {
            f(&mut data.settings);
            Ok(data.settings.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::AppStatus;

    #[tokio::test]
    async fn test_merge_catalog_keeps_status() {
        let store = Store::in_memory();
        let catalog = Catalog::builtin();

        assert_eq!(store.merge_catalog(&catalog).await.unwrap(), catalog.len());
        store.transition_app("wiki", AppEvent::Install).await.unwrap();

        assert_eq!(store.merge_catalog(&catalog).await.unwrap(), 0);
        assert_eq!(store.app("wiki").await.unwrap().status, AppStatus::Pulling);
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_entity_unchanged() {
        let store = Store::in_memory();
        store.merge_catalog(&Catalog::builtin()).await.unwrap();

        let err = store.transition_app("wiki", AppEvent::Stop).await.unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));
        assert_eq!(store.app("wiki").await.unwrap().status, AppStatus::Available);

        let err = store.transition_app("nope", AppEvent::Install).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amahi.json");

        {
            let store = Store::open(&path).await.unwrap();
            store
                .add_partition(StoragePoolPartition::new("/mnt/disk1", 10))
                .await
                .unwrap();
            store.add_share(Share::new("Books", "/var/hda/files/books")).await.unwrap();
            store
                .update_settings(|s| s.docker_installed = true)
                .await
                .unwrap();
        }

        assert!(!dir.path().join("amahi.json.tmp").exists());

        let store = Store::open(&path).await.unwrap();
        assert_eq!(store.partitions().await.len(), 1);
        assert_eq!(store.shares().await[0].name, "Books");
        assert!(store.settings().await.docker_installed);
    }

    #[tokio::test]
    async fn test_uniqueness_and_removal() {
        let store = Store::in_memory();
        store
            .add_partition(StoragePoolPartition::new("/mnt/disk1", 10))
            .await
            .unwrap();
        assert!(matches!(
            store
                .add_partition(StoragePoolPartition::new("/mnt/disk1", 20))
                .await,
            Err(StoreError::Duplicate { .. })
        ));
        store.remove_partition("/mnt/disk1").await.unwrap();
        assert!(matches!(
            store.remove_partition("/mnt/disk1").await,
            Err(StoreError::NotFound { .. })
        ));

        store.add_share(Share::new("Books", "/b")).await.unwrap();
        store.add_share(Share::new("Music", "/m")).await.unwrap();
        assert!(matches!(
            store.update_share("Books", Share::new("music", "/x")).await,
            Err(StoreError::Duplicate { .. })
        ));
        store
            .update_share("books", Share::new("Novels", "/b"))
            .await
            .unwrap();
        let names: Vec<String> = store.shares().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Novels".to_string(), "Music".to_string()]);
    }
}
