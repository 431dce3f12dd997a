//! Security remediation
//!
//! A fixed set of checks. Each one has a probe that succeeds when the host is
//! already in the wanted state and a fix that runs otherwise. Checks are fixed and
//! reported independently; the run succeeds only when none of them failed.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::progress::Outcome;
use crate::domain::security::{CheckOutcome, CheckResult, SecurityReport};
use crate::infra::command::CommandSpec;
use crate::services::sequencer::Step;
use crate::services::stream::WorkflowStream;
use crate::state::flights::SECURITY_KEY;
use crate::state::AppState;

use super::{spawn_guarded, WorkflowContext, WorkflowError};

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

/// One environment check
#[derive(Clone, Debug)]
pub struct SecurityCheck {
    pub id: &'static str,
    pub description: &'static str,
    /// Succeeds when nothing needs fixing
    pub probe: CommandSpec,
    pub fix: Vec<CommandSpec>,
}

/// What the API lists for each check
#[derive(Clone, Debug, Serialize)]
pub struct CheckInfo {
    pub id: &'static str,
    pub description: &'static str,
}

impl From<&SecurityCheck> for CheckInfo {
    fn from(check: &SecurityCheck) -> Self {
        Self {
            id: check.id,
            description: check.description,
        }
    }
}

fn apt_install(package: &str) -> CommandSpec {
    CommandSpec::new("apt-get", ["install", "-y", "-q", package])
        .simulate([format!("Setting up {} ...", package)])
}

pub fn checks() -> Vec<SecurityCheck> {
    vec![
        SecurityCheck {
            id: "ssh_root_login",
            description: "SSH does not accept root password logins",
            probe: CommandSpec::new(
                "grep",
                ["-Eq", "^PermitRootLogin (no|prohibit-password)", SSHD_CONFIG],
            ),
            fix: vec![
                CommandSpec::new(
                    "sed",
                    [
                        "-i",
                        "-E",
                        "s/^#?PermitRootLogin.*/PermitRootLogin prohibit-password/",
                        SSHD_CONFIG,
                    ],
                ),
                CommandSpec::new("systemctl", ["reload", "ssh"]),
            ],
        },
        SecurityCheck {
            id: "firewall",
            description: "Firewall is active and only admits SSH, web and file sharing",
            probe: CommandSpec::new("systemctl", ["is-active", "--quiet", "ufw"]).simulate_exit(3),
            fix: vec![
                apt_install("ufw"),
                CommandSpec::new("ufw", ["allow", "22/tcp"]).simulate(["Rule added"]),
                CommandSpec::new("ufw", ["allow", "80/tcp"]).simulate(["Rule added"]),
                CommandSpec::new("ufw", ["allow", "Samba"]).simulate(["Rule added"]),
                CommandSpec::new("ufw", ["--force", "enable"])
                    .simulate(["Firewall is active and enabled on system startup"]),
            ],
        },
        SecurityCheck {
            id: "unattended_upgrades",
            description: "Security updates are installed automatically",
            probe: CommandSpec::new("dpkg", ["-s", "unattended-upgrades"]).simulate_exit(1),
            fix: vec![
                apt_install("unattended-upgrades"),
                CommandSpec::new(
                    "dpkg-reconfigure",
                    ["-f", "noninteractive", "unattended-upgrades"],
                ),
            ],
        },
        SecurityCheck {
            id: "fail2ban",
            description: "Repeated failed logins are banned",
            probe: CommandSpec::new("systemctl", ["is-active", "--quiet", "fail2ban"])
                .simulate_exit(3),
            fix: vec![
                apt_install("fail2ban"),
                CommandSpec::new("systemctl", ["enable", "--now", "fail2ban"]),
            ],
        },
    ]
}

/// Validate and start a remediation run.
pub async fn fix(state: Arc<AppState>) -> Result<WorkflowStream, WorkflowError> {
    let guard = state.flights.acquire(SECURITY_KEY, "fix")?;
    info!("Starting security remediation");

    Ok(spawn_guarded(state, "security:fix", guard, |ctx| async move {
        let report = run_checks(&ctx, &checks()).await;
        let outcome = Outcome::from_success(report.success());
        *ctx.state.security_report.write().await = Some(report);
        outcome
    }))
}

/// Probe and, where needed, fix every check.
pub async fn run_checks(ctx: &WorkflowContext, checks: &[SecurityCheck]) -> SecurityReport {
    let mut outcomes = Vec::with_capacity(checks.len());

    for check in checks {
        ctx.log(format!("Checking: {}", check.description)).await;

        let result = if ctx.runner.capture(&check.probe).await.success {
            ctx.log("  ✓ already secure").await;
            CheckResult::AlreadySecure
        } else {
            let step = check
                .fix
                .iter()
                .cloned()
                .fold(Step::new(format!("Fixing: {}", check.description)), Step::command);
            let report = ctx.run(&[step]).await;
            if report.success {
                ctx.log("  ✓ fixed").await;
                CheckResult::Fixed
            } else {
                let message = report
                    .first_failure
                    .unwrap_or_else(|| format!("{} could not be fixed", check.id));
                warn!(check = check.id, error = %message, "Security check could not be fixed");
                CheckResult::Failed { message }
            }
        };

        outcomes.push(CheckOutcome {
            id: check.id.to_string(),
            description: check.description.to_string(),
            result,
        });
    }

    let report = SecurityReport::new(outcomes);
    info!(
        checks = report.checks.len(),
        failed = report.checks.iter().filter(|c| c.result.is_failed()).count(),
        "Security remediation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::progress::ProgressEvent;
    use crate::infra::command::SimulationConfig;
    use crate::services::sequencer::FAILURE_MARKER;
    use crate::services::stream::ProgressSink;
    use crate::services::workflows::testing::simulated_state;

    #[tokio::test]
    async fn test_simulated_run_fixes_what_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant()).await;

        let events = fix(state.clone()).await.unwrap().collect().await;
        assert_eq!(events.last().unwrap(), &ProgressEvent::done(Outcome::Success));

        let report = state.security_report.read().await.clone().unwrap();
        let results: Vec<(&str, &CheckResult)> = report
            .checks
            .iter()
            .map(|c| (c.id.as_str(), &c.result))
            .collect();
        assert_eq!(
            results,
            vec![
                ("ssh_root_login", &CheckResult::AlreadySecure),
                ("firewall", &CheckResult::Fixed),
                ("unattended_upgrades", &CheckResult::Fixed),
                ("fail2ban", &CheckResult::Fixed),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_check_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant().failing("ufw")).await;
        let ctx = WorkflowContext::new(state, ProgressSink::detached());

        let report = run_checks(&ctx, &checks()).await;

        assert!(!report.success());
        assert!(matches!(report.checks[1].result, CheckResult::Failed { ref message } if message.contains("ufw")));
        assert_eq!(report.checks[2].result, CheckResult::Fixed);
        assert_eq!(report.checks[3].result, CheckResult::Fixed);
    }

    #[tokio::test]
    async fn test_failure_marker_and_error_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let state = simulated_state(dir.path(), SimulationConfig::instant().failing("fail2ban")).await;

        let events = fix(state).await.unwrap().collect().await;
        assert!(events.iter().any(|e| e.data.contains(FAILURE_MARKER)));
        assert_eq!(events.last().unwrap(), &ProgressEvent::done(Outcome::Error));
    }
}
