//! Container engine (Docker) installation
//!
//! Re-running is safe: the repository key and source list are only written when missing.

use std::sync::Arc;

use tracing::info;

use crate::domain::progress::Outcome;
use crate::infra::command::CommandSpec;
use crate::services::sequencer::Step;
use crate::services::stream::WorkflowStream;
use crate::state::flights::ENGINE_KEY;
use crate::state::AppState;

use super::{catch_failure, spawn_guarded, WorkflowContext, WorkflowError};

const KEYRING_DIR: &str = "/etc/apt/keyrings";
const KEY_PATH: &str = "/etc/apt/keyrings/docker.asc";
const SOURCE_LIST: &str = "/etc/apt/sources.list.d/docker.list";
const REPO_URL: &str = "https://download.docker.com/linux/debian";

/// Docker installation plan
pub fn install_steps(system_user: &str) -> Vec<Step> {
    let key_url = format!("{}/gpg", REPO_URL);
    vec![
        Step::new("Installing prerequisites")
            .command(
                CommandSpec::new("apt-get", ["update", "-q"])
                    .simulate(["Hit:1 http://deb.debian.org/debian stable InRelease", "Reading package lists..."]),
            )
            .command(
                CommandSpec::new("apt-get", ["install", "-y", "-q", "ca-certificates", "curl"])
                    .simulate(["ca-certificates is already the newest version", "curl is already the newest version"]),
            ),
        Step::new("Adding Docker repository key")
            .command(
                CommandSpec::new("install", ["-m", "0755", "-d", KEYRING_DIR])
                    .only_if_missing(KEYRING_DIR),
            )
            .command(
                CommandSpec::new("curl", ["-fsSL", key_url.as_str(), "-o", KEY_PATH])
                    .only_if_missing(KEY_PATH),
            ),
        Step::new("Adding Docker repository").command(
            CommandSpec::new("tee", [SOURCE_LIST])
                .stdin(format!(
                    "deb [signed-by={}] {} stable stable\n",
                    KEY_PATH, REPO_URL
                ))
                .only_if_missing(SOURCE_LIST)
                .simulate([format!("deb [signed-by={}] {} stable stable", KEY_PATH, REPO_URL)]),
        ),
        Step::new("Installing Docker Engine")
            .command(
                CommandSpec::new("apt-get", ["update", "-q"])
                    .simulate([format!("Get:1 {} stable InRelease", REPO_URL), "Reading package lists...".to_string()]),
            )
            .command(
                CommandSpec::new(
                    "apt-get",
                    ["install", "-y", "-q", "docker-ce", "docker-ce-cli", "containerd.io"],
                )
                .simulate([
                    "Unpacking containerd.io ...",
                    "Unpacking docker-ce-cli ...",
                    "Unpacking docker-ce ...",
                    "Setting up docker-ce ...",
                ]),
            ),
        Step::new("Enabling Docker service").command(
            CommandSpec::new("systemctl", ["enable", "--now", "docker"])
                .simulate(["Synchronizing state of docker.service with SysV service script"]),
        ),
        Step::new(format!("Granting {} access to Docker", system_user))
            .command(CommandSpec::new("usermod", ["-aG", "docker", system_user]))
            .best_effort(),
        Step::new("Verifying installation").command(
            CommandSpec::new("docker", ["--version"])
                .simulate(["Docker version 27.3.1, build ce12230"]),
        ),
    ]
}

/// Validate and start the Docker installation.
pub async fn install(state: Arc<AppState>) -> Result<WorkflowStream, WorkflowError> {
    let guard = state.flights.acquire(ENGINE_KEY, "install")?;
    info!("Starting Docker installation");

    Ok(spawn_guarded(state, "docker:install", guard, |ctx| async move {
        match catch_failure(run_install(&ctx)).await {
            Ok(outcome) => outcome,
            Err(message) => {
                ctx.fail_line(&message).await;
                Outcome::Error
            }
        }
    }))
}

async fn run_install(ctx: &WorkflowContext) -> Result<Outcome, WorkflowError> {
    ctx.log(format!("Installing Docker ({} mode)", ctx.mode().name()))
        .await;

    let report = ctx.run(&install_steps(&ctx.state.config.system_user)).await;
    if !report.success {
        return Ok(Outcome::Error);
    }

    ctx.state
        .store
        .update_settings(|s| s.docker_installed = true)
        .await?;
    ctx.log("Docker is installed").await;
    info!("Docker installation finished");
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::progress::ProgressEvent;
    use crate::infra::command::{Guard, SimulationConfig};
    use crate::services::sequencer::FAILURE_MARKER;
    use crate::services::workflows::testing::simulated_state;

    #[test]
    fn test_repository_setup_is_guarded() {
        let steps = install_steps("amahi");
        let guarded: Vec<&CommandSpec> = steps
            .iter()
            .flat_map(|s| &s.commands)
            .filter(|c| matches!(c.guard, Guard::PathMissing(_)))
            .collect();
        assert_eq!(guarded.len(), 3);

        let source = guarded.iter().find(|c| c.program == "tee").unwrap();
        assert!(source.stdin.as_deref().unwrap().starts_with("deb [signed-by="));
        assert!(steps.iter().any(|s| s.best_effort && s.label.contains("amahi")));
    }

    #[tokio::test]
    async fn test_install_marks_docker_installed() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant()).await;

        let events = install(state.clone()).await.unwrap().collect().await;

        assert_eq!(events.last().unwrap(), &ProgressEvent::done(Outcome::Success));
        assert!(events.iter().any(|e| e.data == "Installing Docker Engine"));
        assert!(state.store.settings().await.docker_installed);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_flag_off() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant().failing("docker-ce")).await;

        let events = install(state.clone()).await.unwrap().collect().await;

        assert_eq!(events.last().unwrap(), &ProgressEvent::done(Outcome::Error));
        assert!(events.iter().any(|e| e.data.contains(FAILURE_MARKER)));
        assert!(!events.iter().any(|e| e.data == "Enabling Docker service"));
        assert!(!state.store.settings().await.docker_installed);
    }

    #[tokio::test]
    async fn test_second_install_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant()).await;
        let _guard = state.flights.acquire(ENGINE_KEY, "install").unwrap();

        assert!(matches!(install(state).await, Err(WorkflowError::Busy(_))));
    }
}
