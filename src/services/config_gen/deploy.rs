//! Config file deployment
//!
//! Text goes to a fresh temp file which is then copied over the target. The target
//! keeps its inode because other processes may watch or bind-mount it.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("deploy task failed: {0}")]
    Task(String),
}

/// Result of one deployment
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DeployReport {
    pub target: PathBuf,
    /// Copy of the previous target, when one was taken
    pub backup: Option<PathBuf>,
    pub bytes: u64,
}

/// Write `text` to `target`, optionally backing up the existing file first.
pub async fn deploy(text: &str, target: &Path, backup: bool) -> Result<DeployReport, DeployError> {
    let text = text.to_string();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || deploy_blocking(&text, &target, backup))
        .await
        .map_err(|e| DeployError::Task(e.to_string()))?
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> DeployError {
    let path = path.display().to_string();
    move |source| DeployError::Io {
        action,
        path,
        source,
    }
}

fn deploy_blocking(text: &str, target: &Path, backup: bool) -> Result<DeployReport, DeployError> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_error("creating directory", parent))?;

    let backup_path = if backup && target.exists() {
        let path = create_backup(target)?;
        debug!(target = %target.display(), backup = %path.display(), "Backed up config file");
        Some(path)
    } else {
        None
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".amahi-deploy-")
        .tempfile_in(parent)
        .map_err(io_error("creating temp file in", parent))?;
    temp.write_all(text.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(io_error("writing temp file", temp.path()))?;

    let bytes = std::fs::copy(temp.path(), target).map_err(io_error("copying to", target))?;
    temp.close()
        .map_err(io_error("removing temp file in", parent))?;

    info!(target = %target.display(), bytes, backup = backup_path.is_some(), "Deployed config file");

    Ok(DeployReport {
        target: target.to_path_buf(),
        backup: backup_path,
        bytes,
    })
}

/// `<target>.<YYYYmmddHHMMSS>[-N].bak`
fn backup_path_for(target: &Path, stamp: &str, attempt: u32) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    if attempt == 0 {
        name.push(format!(".{}.bak", stamp));
    } else {
        name.push(format!(".{}-{}.bak", stamp, attempt));
    }
    PathBuf::from(name)
}

/// Copy `target` to a backup name that does not exist yet. Several deploys within the
/// same second get a numeric suffix instead of overwriting each other.
fn create_backup(target: &Path) -> Result<PathBuf, DeployError> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let mut source = std::fs::File::open(target).map_err(io_error("reading", target))?;

    let mut attempt = 0;
    loop {
        let path = backup_path_for(target, &stamp, attempt);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                std::io::copy(&mut source, &mut file)
                    .map_err(io_error("backing up to", &path))?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(io_error("backing up to", &path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_backup_taken_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("smb.conf");
        std::fs::write(&target, "old").unwrap();

        let report = deploy("new", &target, true).await.unwrap();

        let backup = report.backup.unwrap();
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("smb.conf.") && name.ends_with(".bak"));
        assert_eq!(entries(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_back_to_back_backups_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("smb.conf");
        std::fs::write(&target, "old").unwrap();

        let first = deploy("first", &target, true).await.unwrap();
        let second = deploy("second", &target, true).await.unwrap();

        let (first, second) = (first.backup.unwrap(), second.backup.unwrap());
        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
        assert_eq!(entries(dir.path()).len(), 3);
    }

    #[test]
    fn test_backup_name_suffix() {
        let target = Path::new("/etc/samba/smb.conf");
        assert_eq!(
            backup_path_for(target, "20240101000000", 0),
            PathBuf::from("/etc/samba/smb.conf.20240101000000.bak")
        );
        assert_eq!(
            backup_path_for(target, "20240101000000", 2),
            PathBuf::from("/etc/samba/smb.conf.20240101000000-2.bak")
        );
    }

    #[tokio::test]
    async fn test_no_backup_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("smb.conf");
        std::fs::write(&target, "old").unwrap();

        let report = deploy("new", &target, false).await.unwrap();

        assert!(report.backup.is_none());
        assert_eq!(report.bytes, 3);
        assert_eq!(entries(dir.path()), vec!["smb.conf".to_string()]);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_missing_target_and_parent_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("etc/samba/lmhosts");

        let report = deploy("192.168.1.10 hda\n", &target, true).await.unwrap();

        assert!(report.backup.is_none());
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "192.168.1.10 hda\n"
        );
        assert_eq!(entries(target.parent().unwrap()), vec!["lmhosts".to_string()]);
    }

    #[tokio::test]
    async fn test_unwritable_target_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be overwritten by a file copy
        let target = dir.path().join("conf");
        std::fs::create_dir(&target).unwrap();

        let err = deploy("x", &target, false).await.unwrap_err();
        assert!(matches!(err, DeployError::Io { action: "copying to", .. }));
        assert_eq!(entries(dir.path()), vec!["conf".to_string()]);
    }
}
