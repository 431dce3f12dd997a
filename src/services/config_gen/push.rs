//! Push generated configuration to the services that own it
//!
//! Each file gets its own temp-file cycle; the owning service is then asked to
//! reload. Failures are reported to the caller, which logs them and carries on:
//! a config push never rolls back the data change that triggered it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::env::{constants, ConfigPaths, EnvConfig};
use crate::infra::command::{CommandRunner, CommandSpec};
use crate::state::{AppState, Store};

use super::deploy::{deploy, DeployError, DeployReport};
use super::samba::SambaInput;
use super::{greyhole, hosts, samba};

/// Result of one push
#[derive(Clone, Debug, Serialize)]
pub struct PushReport {
    pub deployed: Vec<DeployReport>,
    /// Whether the owning service accepted the reload request
    pub reloaded: bool,
}

/// Reload (not restart) Samba
pub fn samba_reload_command() -> CommandSpec {
    CommandSpec::new("smbcontrol", ["all", "reload-config"])
}

/// Reload the pool daemon
pub fn greyhole_reload_command() -> CommandSpec {
    CommandSpec::new("systemctl", ["reload", "greyhole"])
        .simulate(["Reloading greyhole configuration"])
}

pub struct ConfigPusher {
    runner: CommandRunner,
    paths: ConfigPaths,
    backup: bool,
}

impl ConfigPusher {
    /// Simulated runs deploy under `<data_dir>/sim-root` instead of the real targets.
    pub fn new(config: &EnvConfig, runner: CommandRunner) -> Self {
        let paths = if runner.mode().is_simulated() {
            let root = config.data_dir.join(constants::SIMULATED_ROOT);
            ConfigPaths {
                smb_conf: rebase(&root, &config.paths.smb_conf),
                lmhosts: rebase(&root, &config.paths.lmhosts),
                greyhole_conf: rebase(&root, &config.paths.greyhole_conf),
            }
        } else {
            config.paths.clone()
        };

        Self {
            runner,
            paths,
            backup: config.debug_backups,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(&state.config, state.runner())
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Current smb.conf text for the stored shares and settings
    pub async fn render_samba(store: &Store) -> String {
        let input = SambaInput {
            settings: store.settings().await,
            shares: store.shares().await,
        };
        samba::generate(&input, Utc::now())
    }

    /// Current greyhole.conf text
    pub async fn render_greyhole(store: &Store) -> String {
        greyhole::generate(&store.partitions().await, &store.shares().await, Utc::now())
    }

    /// Deploy smb.conf and lmhosts, each on its own
    pub async fn deploy_samba(&self, store: &Store) -> Result<Vec<DeployReport>, DeployError> {
        let smb_conf = Self::render_samba(store).await;
        let lmhosts = hosts::generate(&store.settings().await, &store.hosts().await, Utc::now());

        let mut deployed = Vec::with_capacity(2);
        deployed.push(deploy(&smb_conf, &self.paths.smb_conf, self.backup).await?);
        deployed.push(deploy(&lmhosts, &self.paths.lmhosts, self.backup).await?);
        Ok(deployed)
    }

    pub async fn deploy_greyhole(&self, store: &Store) -> Result<DeployReport, DeployError> {
        let text = Self::render_greyhole(store).await;
        deploy(&text, &self.paths.greyhole_conf, self.backup).await
    }

    pub async fn push_samba(&self, store: &Store) -> Result<PushReport, DeployError> {
        let deployed = self.deploy_samba(store).await?;
        let reloaded = self.reload(&samba_reload_command()).await;
        Ok(PushReport { deployed, reloaded })
    }

    pub async fn push_greyhole(&self, store: &Store) -> Result<PushReport, DeployError> {
        let deployed = vec![self.deploy_greyhole(store).await?];
        let reloaded = self.reload(&greyhole_reload_command()).await;
        Ok(PushReport { deployed, reloaded })
    }

    async fn reload(&self, spec: &CommandSpec) -> bool {
        let outcome = self.runner.capture(spec).await;
        if !outcome.success {
            warn!(
                command = %spec,
                exit_code = ?outcome.exit_code,
                output = ?outcome.last_line(),
                "Config reload failed"
            );
        }
        outcome.success
    }
}

/// Push Samba config after a share/host/settings change; failures are only logged.
pub async fn push_samba_after_change(state: &AppState, reason: &str) {
    match ConfigPusher::from_state(state).push_samba(&state.store).await {
        Ok(report) => info!(reason, reloaded = report.reloaded, "Pushed Samba configuration"),
        Err(e) => warn!(reason, error = %e, "Failed to push Samba configuration"),
    }
}

/// Same as [`push_samba_after_change`] for the pool configuration, skipped until
/// the pool daemon is installed.
pub async fn push_greyhole_after_change(state: &AppState, reason: &str) {
    if !state.store.settings().await.greyhole_installed {
        return;
    }
    match ConfigPusher::from_state(state).push_greyhole(&state.store).await {
        Ok(report) => info!(reason, reloaded = report.reloaded, "Pushed pool configuration"),
        Err(e) => warn!(reason, error = %e, "Failed to push pool configuration"),
    }
}

fn rebase(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}
