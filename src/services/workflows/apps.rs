//! Application lifecycle workflows
//!
//! install: available/error -> pulling -> installing -> running
//! uninstall: any -> available
//! start/stop/restart run inline and answer with the resulting status.
//!
//! The entity is written only at milestones, after the commands behind them succeeded.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::app::{AppEvent, AppSource, AppStatus, AppStatusView, ManagedApplication};
use crate::domain::progress::Outcome;
use crate::infra::command::{CommandRunner, CommandSpec};
use crate::services::sequencer::{run_steps, Step};
use crate::services::stream::{ProgressSink, WorkflowStream};
use crate::state::flights::app_key;
use crate::state::AppState;

use super::{catch_failure, spawn_guarded, WorkflowContext, WorkflowError};

/// Payload of the non-streaming control actions
pub type ControlResponse = AppStatusView;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
        }
    }

    fn event(&self) -> AppEvent {
        match self {
            ControlAction::Start => AppEvent::Start,
            ControlAction::Stop => AppEvent::Stop,
            ControlAction::Restart => AppEvent::Restart,
        }
    }
}

// ========== Plans ==========

/// Steps up to the "fetched" milestone
pub fn fetch_steps(app: &ManagedApplication) -> Vec<Step> {
    match &app.source {
        AppSource::Container { image, .. } => {
            let repo = image.split(':').next().unwrap_or(image);
            vec![Step::new(format!("Pulling image {}", image)).command(
                CommandSpec::new("docker", ["pull", image.as_str()]).simulate([
                    format!("latest: Pulling from {}", repo),
                    "Pulling fs layer".to_string(),
                    "Download complete".to_string(),
                    format!("Status: Downloaded newer image for {}", image),
                ]),
            )]
        }
        AppSource::Package { packages, .. } => {
            let mut install = vec!["install".to_string(), "-y".to_string(), "-q".to_string()];
            install.extend(packages.iter().cloned());
            vec![
                Step::new("Updating package index").command(
                    CommandSpec::new("apt-get", ["update", "-q"])
                        .simulate(["Hit:1 http://deb.debian.org/debian stable InRelease", "Reading package lists..."]),
                ),
                Step::new(format!("Installing {}", packages.join(", "))).command(
                    CommandSpec::new("apt-get", install).simulate(
                        packages
                            .iter()
                            .map(|p| format!("Setting up {} ...", p))
                            .collect::<Vec<_>>(),
                    ),
                ),
            ]
        }
    }
}

/// Steps from "fetched" up to "created and started"
///
/// Leftovers from an earlier failed attempt are removed first, best effort.
pub fn create_steps(app: &ManagedApplication, apps_root: &Path) -> Vec<Step> {
    let name = app.assigned_name();
    match &app.source {
        AppSource::Container {
            image,
            ports,
            volumes,
            environment,
        } => {
            let mut steps = vec![Step::new("Removing leftovers of previous attempts")
                .command(
                    CommandSpec::new("docker", ["rm", "-f", name.as_str()])
                        .only_if(CommandSpec::new("docker", ["container", "inspect", name.as_str()]).simulate_exit(1)),
                )
                .best_effort()];

            let mut args = vec![
                "create".to_string(),
                "--name".to_string(),
                name.clone(),
                "--restart".to_string(),
                "unless-stopped".to_string(),
            ];
            for port in ports {
                args.push("-p".to_string());
                args.push(format!("{}:{}", port.host, port.container));
            }

            let mut prepare = Step::new("Preparing volumes");
            for volume in volumes {
                let host = volume_host_path(apps_root, &app.id, &volume.host);
                prepare = prepare.command(
                    CommandSpec::new("mkdir", ["-p", host.as_str()]).only_if_missing(&host),
                );
                args.push("-v".to_string());
                args.push(format!("{}:{}", host, volume.container));
            }
            if !prepare.commands.is_empty() {
                steps.push(prepare);
            }

            for (key, value) in environment {
                args.push("-e".to_string());
                args.push(format!("{}={}", key, value));
            }
            args.push(image.clone());

            steps.push(
                Step::new(format!("Creating container {}", name)).command(
                    CommandSpec::new("docker", args)
                        .simulate([format!("{:x}", fake_container_id(&name))]),
                ),
            );
            steps.push(
                Step::new(format!("Starting container {}", name)).command(
                    CommandSpec::new("docker", ["start", name.as_str()]).simulate([name.clone()]),
                ),
            );
            steps
        }
        AppSource::Package { .. } => vec![Step::new(format!("Enabling service {}", name))
            .command(
                CommandSpec::new("systemctl", ["enable", "--now", name.as_str()]).simulate([
                    format!(
                        "Created symlink /etc/systemd/system/multi-user.target.wants/{}.",
                        name
                    ),
                ]),
            )],
    }
}

/// Steps of an uninstall; missing resources are not an error.
pub fn uninstall_steps(app: &ManagedApplication) -> Vec<Step> {
    let name = app.assigned_name();
    match &app.source {
        AppSource::Container { image, .. } => vec![
            Step::new(format!("Stopping container {}", name))
                .command(CommandSpec::new("docker", ["stop", name.as_str()]).simulate([name.clone()]))
                .best_effort(),
            Step::new(format!("Removing container {}", name)).command(
                CommandSpec::new("docker", ["rm", "-f", name.as_str()])
                    .only_if(CommandSpec::new("docker", ["container", "inspect", name.as_str()]))
                    .simulate([name.clone()]),
            ),
            Step::new(format!("Removing image {}", image))
                .command(
                    CommandSpec::new("docker", ["rmi", image.as_str()])
                        .simulate([format!("Untagged: {}", image)]),
                )
                .best_effort(),
        ],
        AppSource::Package { packages, .. } => {
            let mut remove = vec!["remove".to_string(), "-y".to_string(), "-q".to_string()];
            remove.extend(packages.iter().cloned());
            vec![
                Step::new(format!("Disabling service {}", name))
                    .command(CommandSpec::new("systemctl", ["disable", "--now", name.as_str()]))
                    .best_effort(),
                Step::new(format!("Removing {}", packages.join(", "))).command(
                    CommandSpec::new("apt-get", remove).simulate(
                        packages
                            .iter()
                            .map(|p| format!("Removing {} ...", p))
                            .collect::<Vec<_>>(),
                    ),
                ),
            ]
        }
    }
}

/// Command behind a control action
pub fn control_command(app: &ManagedApplication, action: ControlAction) -> CommandSpec {
    let name = app.assigned_name();
    match app.source {
        AppSource::Container { .. } => {
            CommandSpec::new("docker", [action.as_str(), name.as_str()]).simulate([name.clone()])
        }
        AppSource::Package { .. } => CommandSpec::new("systemctl", [action.as_str(), name.as_str()]),
    }
}

/// Relative volume paths live under `<apps_root>/<id>/`
fn volume_host_path(apps_root: &Path, id: &str, host: &str) -> String {
    if host.starts_with('/') {
        host.to_string()
    } else {
        apps_root.join(id).join(host).display().to_string()
    }
}

fn fake_container_id(name: &str) -> u64 {
    name.bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3))
}

// ========== Validation ==========

async fn load(state: &AppState, id: &str) -> Result<ManagedApplication, WorkflowError> {
    state
        .store
        .app(id)
        .await
        .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
}

async fn ensure_engine(state: &AppState, app: &ManagedApplication) -> Result<(), WorkflowError> {
    if matches!(app.source, AppSource::Container { .. })
        && !state.exec_mode().is_simulated()
        && !state.store.settings().await.docker_installed
    {
        return Err(WorkflowError::Precondition(
            "Docker is not installed; install it first".to_string(),
        ));
    }
    Ok(())
}

// ========== Streaming workflows ==========

/// Validate and start an install. Errors here happen before anything runs.
pub async fn install(state: Arc<AppState>, id: &str) -> Result<WorkflowStream, WorkflowError> {
    let app = load(&state, id).await?;
    app.check(&AppEvent::Install)?;
    ensure_engine(&state, &app).await?;
    let guard = state.flights.acquire(app_key(id), "install")?;

    info!(app = %id, kind = app.source.kind(), "Starting install");
    let name = format!("install:{}", id);
    Ok(spawn_guarded(state, &name, guard, move |ctx| async move {
        let id = app.id.clone();
        settle(&ctx, &id, run_install(&ctx, app)).await
    }))
}

/// Validate and start an uninstall.
pub async fn uninstall(state: Arc<AppState>, id: &str) -> Result<WorkflowStream, WorkflowError> {
    let app = load(&state, id).await?;
    let guard = state.flights.acquire(app_key(id), "uninstall")?;

    info!(app = %id, "Starting uninstall");
    let name = format!("uninstall:{}", id);
    Ok(spawn_guarded(state, &name, guard, move |ctx| async move {
        let id = app.id.clone();
        settle(&ctx, &id, run_uninstall(&ctx, app)).await
    }))
}

/// Turn the body's result into the workflow outcome; any error puts the entity in `error`.
async fn settle<Fut>(ctx: &WorkflowContext, id: &str, body: Fut) -> Outcome
where
    Fut: std::future::Future<Output = Result<Outcome, WorkflowError>>,
{
    match catch_failure(body).await {
        Ok(outcome) => outcome,
        Err(message) => {
            ctx.fail_line(&message).await;
            mark_failed(ctx, id, message).await;
            Outcome::Error
        }
    }
}

async fn mark_failed(ctx: &WorkflowContext, id: &str, message: String) {
    warn!(app = %id, error = %message, "Workflow failed");
    if let Err(e) = ctx.state.store.transition_app(id, AppEvent::Fail(message)).await {
        warn!(app = %id, error = %e, "Failed to record failure");
    }
}

async fn run_install(
    ctx: &WorkflowContext,
    app: ManagedApplication,
) -> Result<Outcome, WorkflowError> {
    let store = &ctx.state.store;
    ctx.log(format!(
        "Installing {} ({}, {} mode)",
        app.name,
        app.source.reference(),
        ctx.mode().name()
    ))
    .await;

    store.transition_app(&app.id, AppEvent::Install).await?;

    let report = ctx.run(&fetch_steps(&app)).await;
    if !report.success {
        let message = report
            .first_failure
            .unwrap_or_else(|| "fetch failed".to_string());
        mark_failed(ctx, &app.id, message).await;
        return Ok(Outcome::Error);
    }
    store.transition_app(&app.id, AppEvent::Fetched).await?;

    let report = ctx.run(&create_steps(&app, &ctx.state.config.apps_root)).await;
    if !report.success {
        let message = report
            .first_failure
            .unwrap_or_else(|| "create failed".to_string());
        mark_failed(ctx, &app.id, message).await;
        return Ok(Outcome::Error);
    }

    let installed = store
        .transition_app(
            &app.id,
            AppEvent::Created {
                container_name: app.assigned_name(),
                host_port: app.source.host_port(),
            },
        )
        .await?;

    match installed.host_port {
        Some(port) => ctx.log(format!("{} is running on port {}", app.name, port)).await,
        None => ctx.log(format!("{} is running", app.name)).await,
    }
    info!(app = %app.id, host_port = ?installed.host_port, "Install finished");
    Ok(Outcome::Success)
}

async fn run_uninstall(
    ctx: &WorkflowContext,
    app: ManagedApplication,
) -> Result<Outcome, WorkflowError> {
    ctx.log(format!("Uninstalling {}", app.name)).await;

    let report = ctx.run(&uninstall_steps(&app)).await;
    if !report.success {
        let message = report
            .first_failure
            .unwrap_or_else(|| "uninstall failed".to_string());
        mark_failed(ctx, &app.id, message).await;
        return Ok(Outcome::Error);
    }

    ctx.state
        .store
        .transition_app(&app.id, AppEvent::Uninstall)
        .await?;
    ctx.log(format!("{} removed", app.name)).await;
    info!(app = %app.id, "Uninstall finished");
    Ok(Outcome::Success)
}

// ========== Control actions ==========

/// Run start/stop/restart to completion and report the resulting status.
///
/// The command runs on its own task so a client hanging up does not cut it short.
pub async fn control(
    state: Arc<AppState>,
    id: &str,
    action: ControlAction,
) -> Result<ControlResponse, WorkflowError> {
    let app = load(&state, id).await?;
    app.check(&action.event())?;
    let guard = state.flights.acquire(app_key(id), action.as_str())?;

    let task = tokio::spawn(async move {
        let _guard = guard;
        let runner = state.runner();
        let steps = [Step::new(format!("{} {}", action.as_str(), app.assigned_name()))
            .command(control_command(&app, action))];
        let report = run_steps(&runner, &ProgressSink::detached(), &steps).await;

        let event = if report.success {
            action.event()
        } else {
            let message = report
                .first_failure
                .unwrap_or_else(|| format!("{} failed", action.as_str()));
            warn!(app = %app.id, action = action.as_str(), error = %message, "Control action failed");
            AppEvent::Fail(message)
        };
        let updated = state.store.transition_app(&app.id, event).await?;
        info!(app = %app.id, action = action.as_str(), status = updated.status.as_str(), "Control action finished");
        Ok::<_, WorkflowError>(ControlResponse::from(&updated))
    });

    task.await
        .unwrap_or_else(|e| Err(WorkflowError::Aborted(e.to_string())))
}

// ========== Status reconciliation ==========

/// What the managed subsystem reports for an application
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observed {
    Running,
    Stopped,
    Missing,
}

/// Event that brings the persisted status in line with the observed one
pub fn reconcile(app: &ManagedApplication, observed: Observed) -> Option<AppEvent> {
    match (app.status, observed) {
        (AppStatus::Running, Observed::Stopped) => Some(AppEvent::Stop),
        (AppStatus::Stopped, Observed::Running) => Some(AppEvent::Start),
        (AppStatus::Running | AppStatus::Stopped, Observed::Missing) => Some(AppEvent::Fail(
            format!("{} no longer exists", app.assigned_name()),
        )),
        _ => None,
    }
}

async fn observe(runner: &CommandRunner, app: &ManagedApplication) -> Observed {
    let name = app.assigned_name();
    match app.source {
        AppSource::Container { .. } => {
            let spec = CommandSpec::new(
                "docker",
                ["inspect", "--format", "{{.State.Running}}", name.as_str()],
            );
            let outcome = runner.capture(&spec).await;
            match (outcome.success, outcome.last_line()) {
                (true, Some("true")) => Observed::Running,
                (true, _) => Observed::Stopped,
                (false, _) => Observed::Missing,
            }
        }
        AppSource::Package { .. } => {
            let spec = CommandSpec::new("systemctl", ["is-active", name.as_str()]);
            let outcome = runner.capture(&spec).await;
            match outcome.last_line() {
                Some("active") => Observed::Running,
                Some("unknown") => Observed::Missing,
                _ => Observed::Stopped,
            }
        }
    }
}

/// Current status, reconciled with the real subsystem.
///
/// Simulated mode and applications with a workflow in flight report the persisted state.
pub async fn refresh_status(state: &AppState, id: &str) -> Result<AppStatusView, WorkflowError> {
    let app = load(state, id).await?;
    if state.exec_mode().is_simulated()
        || !app.status.is_installed()
        || state.flights.is_busy(&app_key(id))
    {
        return Ok(AppStatusView::from(&app));
    }

    let observed = observe(&state.runner(), &app).await;
    let Some(event) = reconcile(&app, observed) else {
        return Ok(AppStatusView::from(&app));
    };

    info!(app = %id, from = app.status.as_str(), observed = ?observed, "Reconciling status");
    match state.store.transition_app(id, event).await {
        Ok(updated) => Ok(AppStatusView::from(&updated)),
        Err(e) => {
            warn!(app = %id, error = %e, "Failed to reconcile status");
            Ok(AppStatusView::from(&app))
        }
    }
}

/// Applications left mid-install by a previous run cannot finish; mark them failed.
pub async fn recover_interrupted(state: &AppState) -> usize {
    let mut recovered = 0;
    for app in state.store.apps().await {
        if !app.status.is_transient() {
            continue;
        }
        let event = AppEvent::Fail(format!("{} was interrupted by an agent restart", app.status.as_str()));
        match state.store.transition_app(&app.id, event).await {
            Ok(_) => recovered += 1,
            Err(e) => warn!(app = %app.id, error = %e, "Failed to recover interrupted application"),
        }
    }
    recovered
}
