//! 应用目录
//!
//! 每种集成类型都是带类型的变体，加载时校验必填字段，
//! 格式错误的条目在任何工作流引用之前就被拒绝

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::app::{is_valid_identifier, AppSource, ManagedApplication};

/// 内置目录
const BUILTIN_CATALOG: &str = r#"[
  {
    "id": "wiki",
    "name": "Wiki",
    "kind": "container",
    "image": "wiki-engine:latest",
    "ports": [{ "container": 80, "host": 8088 }],
    "volumes": [{ "host": "data", "container": "/var/www/data" }]
  },
  {
    "id": "jellyfin",
    "name": "Jellyfin",
    "kind": "container",
    "image": "jellyfin/jellyfin:latest",
    "ports": [{ "container": 8096, "host": 8096 }],
    "volumes": [
      { "host": "config", "container": "/config" },
      { "host": "/var/hda/files/movies", "container": "/media/movies" }
    ],
    "environment": { "TZ": "UTC" }
  },
  {
    "id": "tunnel",
    "name": "Remote Access Tunnel",
    "kind": "package",
    "packages": ["cloudflared"],
    "service": "cloudflared.service"
  }
]"#;

/// 目录加载错误
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("catalog entry '{id}' is invalid: {reason}")]
    Invalid { id: String, reason: String },

    #[error("duplicate catalog id '{0}'")]
    Duplicate(String),
}

/// 目录条目
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub source: AppSource,
}

impl CatalogEntry {
    /// 校验必填字段
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if !is_valid_identifier(&self.id) {
            return Err(invalid("id must be lowercase alphanumeric with '-' or '_'"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name is required"));
        }

        match &self.source {
            AppSource::Container {
                image,
                ports,
                volumes,
                environment,
            } => {
                if image.trim().is_empty() || image.contains(char::is_whitespace) {
                    return Err(invalid("image is required and must not contain spaces"));
                }
                if ports.iter().any(|p| p.container == 0 || p.host == 0) {
                    return Err(invalid("ports must be non-zero"));
                }
                let mut host_ports = HashSet::new();
                if !ports.iter().all(|p| host_ports.insert(p.host)) {
                    return Err(invalid("host ports must be unique"));
                }
                for volume in volumes {
                    if volume.host.is_empty()
                        || volume.host.split('/').any(|seg| seg == "..")
                        || !volume.container.starts_with('/')
                    {
                        return Err(invalid("volumes need a host path without '..' and an absolute container path"));
                    }
                }
                if environment
                    .keys()
                    .any(|k| k.is_empty() || k.contains('='))
                {
                    return Err(invalid("environment keys must be non-empty and contain no '='"));
                }
            }
            AppSource::Package {
                packages, service, port,
            } => {
                if packages.is_empty()
                    || packages
                        .iter()
                        .any(|p| p.is_empty() || p.starts_with('-') || p.contains(char::is_whitespace))
                {
                    return Err(invalid("packages must be plain package names"));
                }
                if service.is_empty() || service.starts_with('-') {
                    return Err(invalid("service unit is required"));
                }
                if *port == Some(0) {
                    return Err(invalid("port must be non-zero"));
                }
            }
        }

        Ok(())
    }

    /// 创建对应的应用实体
    pub fn to_application(&self) -> ManagedApplication {
        ManagedApplication::new(self.id.clone(), self.name.clone(), self.source.clone())
    }
}

/// 应用目录
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// 解析并校验目录 JSON
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: Vec<CatalogEntry> = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();
        for entry in raw {
            entry.validate()?;
            if entries.contains_key(&entry.id) {
                return Err(CatalogError::Duplicate(entry.id));
            }
            entries.insert(entry.id.clone(), entry);
        }
        Ok(Self { entries })
    }

    /// 从文件加载
    pub fn load_from_file(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// 内置目录
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_CATALOG).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Built-in catalog is invalid");
            Self::default()
        })
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), 3);
        let wiki = catalog.get("wiki").unwrap();
        assert_eq!(wiki.source.host_port(), Some(8088));
        assert_eq!(catalog.get("tunnel").unwrap().source.kind(), "package");
    }

    #[test]
    fn test_rejects_missing_image() {
        let err = Catalog::from_json_str(
            r#"[{ "id": "bad", "name": "Bad", "kind": "container", "image": "" }]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { ref id, .. } if id == "bad"));
    }

    #[test]
    fn test_rejects_unknown_kind_and_missing_fields() {
        assert!(matches!(
            Catalog::from_json_str(r#"[{ "id": "x", "name": "X", "kind": "vm" }]"#),
            Err(CatalogError::Parse(_))
        ));
        assert!(matches!(
            Catalog::from_json_str(r#"[{ "id": "x", "name": "X", "kind": "package" }]"#),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_bad_identifier_and_duplicates() {
        let err = Catalog::from_json_str(
            r#"[{ "id": "Bad Id", "name": "X", "kind": "container", "image": "x" }]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }));

        let err = Catalog::from_json_str(
            r#"[
              { "id": "x", "name": "X", "kind": "container", "image": "x" },
              { "id": "x", "name": "X2", "kind": "container", "image": "y" }
            ]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate(ref id) if id == "x"));
    }

    #[test]
    fn test_rejects_volume_escape() {
        let err = Catalog::from_json_str(
            r#"[{ "id": "x", "name": "X", "kind": "container", "image": "x",
                  "volumes": [{ "host": "../../etc", "container": "/etc" }] }]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{ "id": "notes", "name": "Notes", "kind": "container", "image": "notes:1" }]"#,
        )
        .unwrap();

        let catalog = Catalog::load_from_file(&path).unwrap();
        assert_eq!(catalog.get("notes").unwrap().to_application().id, "notes");

        assert!(matches!(
            Catalog::load_from_file(&dir.path().join("missing.json")),
            Err(CatalogError::Read { .. })
        ));
    }
}
