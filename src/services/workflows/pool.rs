//! Storage pool (greyhole) workflows
//!
//! install: packages + service, then the first pool configuration push.
//! configure: prepare `<partition>/gh` on every pool drive, deploy the pool
//! configuration, reload the daemon.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::progress::Outcome;
use crate::domain::storage::StoragePoolPartition;
use crate::infra::command::CommandSpec;
use crate::services::config_gen::push::greyhole_reload_command;
use crate::services::config_gen::ConfigPusher;
use crate::services::sequencer::Step;
use crate::services::stream::WorkflowStream;
use crate::state::flights::POOL_KEY;
use crate::state::AppState;

use super::{catch_failure, spawn_guarded, WorkflowContext, WorkflowError};

pub fn install_steps() -> Vec<Step> {
    vec![
        Step::new("Updating package index").command(
            CommandSpec::new("apt-get", ["update", "-q"])
                .simulate(["Hit:1 http://deb.debian.org/debian stable InRelease", "Reading package lists..."]),
        ),
        Step::new("Installing greyhole").command(
            CommandSpec::new("apt-get", ["install", "-y", "-q", "greyhole"]).simulate([
                "Unpacking greyhole ...",
                "Setting up greyhole ...",
            ]),
        ),
        Step::new("Enabling greyhole service").command(
            CommandSpec::new("systemctl", ["enable", "--now", "greyhole"])
                .simulate(["Created symlink /etc/systemd/system/multi-user.target.wants/greyhole.service."]),
        ),
    ]
}

/// Pool directories, one per partition in input order
pub fn prepare_steps(partitions: &[StoragePoolPartition]) -> Vec<Step> {
    if partitions.is_empty() {
        return Vec::new();
    }
    let step = partitions
        .iter()
        .fold(Step::new("Preparing pool drives"), |step, partition| {
            let dir = partition.pool_dir();
            step.command(CommandSpec::new("mkdir", ["-p", dir.as_str()]).only_if_missing(&dir))
        });
    vec![step]
}

fn run_guarded<F, Fut>(state: Arc<AppState>, name: &str, operation: &str, body: F) -> Result<WorkflowStream, WorkflowError>
where
    F: FnOnce(WorkflowContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Outcome, WorkflowError>> + Send + 'static,
{
    let guard = state.flights.acquire(POOL_KEY, operation)?;
    info!(operation, "Starting storage pool workflow");
    Ok(spawn_guarded(state, name, guard, |ctx| async move {
        let sink_ctx = ctx.clone();
        match catch_failure(body(ctx)).await {
            Ok(outcome) => outcome,
            Err(message) => {
                warn!(error = %message, "Storage pool workflow failed");
                sink_ctx.fail_line(&message).await;
                Outcome::Error
            }
        }
    }))
}

/// Validate and start the pool daemon installation.
pub async fn install(state: Arc<AppState>) -> Result<WorkflowStream, WorkflowError> {
    run_guarded(state, "greyhole:install", "install", |ctx| async move {
        ctx.log(format!("Installing storage pool ({} mode)", ctx.mode().name()))
            .await;
        if !ctx.run(&install_steps()).await.success {
            return Ok(Outcome::Error);
        }
        ctx.state
            .store
            .update_settings(|s| s.greyhole_installed = true)
            .await?;
        configure_pool(&ctx).await
    })
}

/// Validate and start a pool configuration push.
pub async fn configure(state: Arc<AppState>) -> Result<WorkflowStream, WorkflowError> {
    if !state.exec_mode().is_simulated() && !state.store.settings().await.greyhole_installed {
        return Err(WorkflowError::Precondition(
            "greyhole is not installed; install it first".to_string(),
        ));
    }
    run_guarded(state, "greyhole:configure", "configure", |ctx| async move {
        configure_pool(&ctx).await
    })
}

async fn configure_pool(ctx: &WorkflowContext) -> Result<Outcome, WorkflowError> {
    let partitions = ctx.state.store.partitions().await;
    if partitions.is_empty() {
        ctx.log("No pool partitions configured; the pool will be empty").await;
    }

    if !ctx.run(&prepare_steps(&partitions)).await.success {
        return Ok(Outcome::Error);
    }

    let pusher = ConfigPusher::new(&ctx.state.config, ctx.runner.clone());
    ctx.log("Writing storage pool configuration").await;
    let report = pusher.deploy_greyhole(&ctx.state.store).await?;
    ctx.log(format!(
        "  {} ({} bytes{})",
        report.target.display(),
        report.bytes,
        report
            .backup
            .as_ref()
            .map(|b| format!(", backup {}", b.display()))
            .unwrap_or_default()
    ))
    .await;

    let reload = Step::new("Reloading storage pool daemon").command(greyhole_reload_command());
    if !ctx.run(&[reload]).await.success {
        return Ok(Outcome::Error);
    }

    info!(partitions = partitions.len(), "Storage pool configured");
    ctx.log(format!("Storage pool configured with {} drive(s)", partitions.len()))
        .await;
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::constants::SIMULATED_ROOT;
    use crate::domain::progress::ProgressEvent;
    use crate::infra::command::SimulationConfig;
    use crate::services::sequencer::FAILURE_MARKER;
    use crate::services::workflows::testing::simulated_state;

    #[test]
    fn test_prepare_steps() {
        assert!(prepare_steps(&[]).is_empty());

        let steps = prepare_steps(&[
            StoragePoolPartition::new("/mnt/disk1", 10),
            StoragePoolPartition::new("/mnt/disk2/", 20),
        ]);
        let commands: Vec<String> = steps[0].commands.iter().map(|c| c.display()).collect();
        assert_eq!(commands, vec!["mkdir -p /mnt/disk1/gh", "mkdir -p /mnt/disk2/gh"]);
    }

    #[tokio::test]
    async fn test_install_then_configure_writes_pool_config() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant()).await;
        state
            .store
            .add_partition(StoragePoolPartition::new("/mnt/disk1", 10))
            .await
            .unwrap();
        state
            .store
            .add_partition(StoragePoolPartition::new("/mnt/disk2", 20))
            .await
            .unwrap();

        let events = install(state.clone()).await.unwrap().collect().await;
        assert_eq!(events.last().unwrap(), &ProgressEvent::done(Outcome::Success));
        assert!(state.store.settings().await.greyhole_installed);

        let target = dir
            .path()
            .join(SIMULATED_ROOT)
            .join(state.config.paths.greyhole_conf.strip_prefix("/").unwrap());
        let text = std::fs::read_to_string(target).unwrap();
        assert!(text.contains("storage_pool_drive = /mnt/disk1/gh, min_free: 10gb"));
        assert!(text.contains("storage_pool_drive = /mnt/disk2/gh, min_free: 20gb"));
    }

    #[tokio::test]
    async fn test_failed_reload_fails_configure() {
        let dir = tempfile::tempdir().unwrap();
        let state =
            simulated_state(dir.path(), SimulationConfig::instant().failing("reload greyhole")).await;

        let events = configure(state).await.unwrap().collect().await;
        assert!(events.iter().any(|e| e.data.contains(FAILURE_MARKER)));
        assert_eq!(events.last().unwrap(), &ProgressEvent::done(Outcome::Error));
    }
}
