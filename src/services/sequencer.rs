//! Step sequencer
//!
//! Runs labeled groups of commands in order and streams their output:
//! - a command whose guard says no is skipped silently
//! - the first failure stops everything that follows (fail-fast)
//! - failures inside a best-effort step are recorded and sequencing goes on
//!
//! No retries happen here; retry policy belongs to the workflow.

use serde::Serialize;
use tracing::{debug, warn};

use crate::infra::command::{CommandOutcome, CommandRunner, CommandSpec};
use crate::services::stream::ProgressSink;

/// Marker carried by every failure line
pub const FAILURE_MARKER: &str = "✗ FAILED";

/// Labeled group of commands executed as a unit
#[derive(Clone, Debug)]
pub struct Step {
    pub label: String,
    pub commands: Vec<CommandSpec>,
    pub best_effort: bool,
}

impl Step {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
            best_effort: false,
        }
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommandStatus {
    Executed {
        success: bool,
        exit_code: Option<i32>,
    },
    Skipped,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub status: CommandStatus,
    pub lines: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepResult {
    pub label: String,
    pub best_effort: bool,
    pub success: bool,
    pub commands: Vec<CommandRecord>,
}

/// Aggregate result of one sequence
#[derive(Clone, Debug, Default, Serialize)]
pub struct SequenceReport {
    pub success: bool,
    /// Steps that were started, in order
    pub steps: Vec<StepResult>,
    /// Every emitted progress line, in order
    pub lines: Vec<String>,
    /// Description of the failure that stopped the sequence
    pub first_failure: Option<String>,
}

impl SequenceReport {
    /// Number of commands actually executed
    pub fn executed(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|s| &s.commands)
            .filter(|c| matches!(c.status, CommandStatus::Executed { .. }))
            .count()
    }
}

/// Run `steps` in order, publishing progress to `sink`.
pub async fn run_steps(
    runner: &CommandRunner,
    sink: &ProgressSink,
    steps: &[Step],
) -> SequenceReport {
    let mut report = SequenceReport {
        success: true,
        ..Default::default()
    };

    for step in steps {
        emit(&mut report, sink, step.label.clone()).await;

        let mut result = StepResult {
            label: step.label.clone(),
            best_effort: step.best_effort,
            success: true,
            commands: Vec::new(),
        };
        let mut halted = false;

        for spec in &step.commands {
            if !runner.should_run(spec).await {
                debug!(step = %step.label, command = %spec, "Guard not met, skipping command");
                result.commands.push(CommandRecord {
                    command: spec.display(),
                    status: CommandStatus::Skipped,
                    lines: Vec::new(),
                });
                continue;
            }

            emit(&mut report, sink, format!("  $ {}", spec)).await;
            let mut running = runner.start(spec);
            while let Some(line) = running.next_line().await {
                if !line.is_empty() {
                    emit(&mut report, sink, format!("  {}", line)).await;
                }
            }
            let outcome = running.finish().await;

            result.commands.push(CommandRecord {
                command: spec.display(),
                status: CommandStatus::Executed {
                    success: outcome.success,
                    exit_code: outcome.exit_code,
                },
                lines: outcome.lines.clone(),
            });

            if outcome.success {
                continue;
            }

            result.success = false;
            let detail = failure_detail(&step.label, spec, &outcome);

            if step.best_effort {
                warn!(step = %step.label, command = %spec, "Best-effort command failed");
                emit(
                    &mut report,
                    sink,
                    format!("  ! ignored failure (best effort): {}", detail),
                )
                .await;
                continue;
            }

            warn!(step = %step.label, command = %spec, "Command failed, stopping sequence");
            emit(&mut report, sink, format!("  {}: {}", FAILURE_MARKER, detail)).await;
            report.success = false;
            report.first_failure = Some(detail);
            halted = true;
            break;
        }

        report.steps.push(result);
        if halted {
            break;
        }
    }

    report
}

async fn emit(report: &mut SequenceReport, sink: &ProgressSink, line: String) {
    sink.line(line.clone()).await;
    report.lines.push(line);
}

/// Human readable failure description, used as the entity error message
fn failure_detail(label: &str, spec: &CommandSpec, outcome: &CommandOutcome) -> String {
    let status = match outcome.exit_code {
        Some(code) => format!("exited with code {}", code),
        None => "could not be run".to_string(),
    };
    match outcome.last_line() {
        Some(last) => format!("{}: `{}` {} ({})", label, spec, status, last),
        None => format!("{}: `{}` {}", label, spec, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::progress::Outcome;
    use crate::infra::command::{ExecMode, Guard, SimulationConfig};
    use crate::services::stream::launch;

    fn runner() -> CommandRunner {
        CommandRunner::new(ExecMode::Simulate(SimulationConfig::instant()))
    }

    fn ok(name: &str) -> CommandSpec {
        CommandSpec::new(name, Vec::<String>::new()).simulate([format!("{} output", name)])
    }

    fn failing(name: &str) -> CommandSpec {
        CommandSpec::new(name, Vec::<String>::new())
            .simulate([format!("{} broke", name)])
            .simulate_exit(1)
    }

    #[tokio::test]
    async fn test_fail_fast_stops_later_steps() {
        let runner = runner();
        let steps = vec![
            Step::new("One").command(ok("a")),
            Step::new("Two").command(failing("b")).command(ok("c")),
            Step::new("Three").command(ok("d")),
        ];

        let report = run_steps(&runner, &ProgressSink::detached(), &steps).await;

        assert!(!report.success);
        assert_eq!(runner.invocations(), 2);
        assert_eq!(report.executed(), 2);
        assert_eq!(report.steps.len(), 2);
        assert!(report.lines.iter().any(|l| l.contains(FAILURE_MARKER)));
        assert!(!report.lines.iter().any(|l| l == "Three"));
        let failure = report.first_failure.unwrap();
        assert!(failure.starts_with("Two: `b` exited with code 1"));
        assert!(failure.contains("b broke"));
    }

    #[tokio::test]
    async fn test_best_effort_steps_continue() {
        let runner = runner();
        let steps = vec![
            Step::new("Cleanup").command(failing("rm")).best_effort(),
            Step::new("Cleanup 2").command(failing("rm2")).best_effort(),
            Step::new("Create").command(ok("create")).best_effort(),
        ];

        let report = run_steps(&runner, &ProgressSink::detached(), &steps).await;

        assert!(report.success);
        assert_eq!(runner.invocations(), 3);
        assert_eq!(report.steps.len(), 3);
        assert!(!report.steps[0].success);
        assert!(report.steps[2].success);
        assert!(report.first_failure.is_none());
        assert!(report
            .lines
            .iter()
            .any(|l| l.contains("ignored failure (best effort)")));
    }

    #[tokio::test]
    async fn test_guarded_command_is_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let steps = vec![Step::new("Key")
            .command(ok("fetch").guard(Guard::PathExists(dir.path().join("absent"))))
            .command(ok("update"))];

        let report = run_steps(&runner, &ProgressSink::detached(), &steps).await;

        assert!(report.success);
        assert_eq!(runner.invocations(), 1);
        assert_eq!(report.steps[0].commands[0].status, CommandStatus::Skipped);
        assert!(!report.lines.iter().any(|l| l.contains("fetch")));
        assert_eq!(
            report.lines,
            vec![
                "Key".to_string(),
                "  $ update".to_string(),
                "  update output".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_receives_lines_in_order() {
        let runner = runner();
        let steps = vec![
            Step::new("First").command(ok("a")),
            Step::new("Second").command(failing("b")),
            Step::new("Third").command(ok("c")),
        ];

        let stream = launch("ordered", move |sink| async move {
            let report = run_steps(&runner, &sink, &steps).await;
            Outcome::from_success(report.success)
        });
        let events = stream.collect().await;
        let data: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();

        assert_eq!(
            data,
            vec![
                "First",
                "  $ a",
                "  a output",
                "Second",
                "  $ b",
                "  b broke",
                "  ✗ FAILED: Second: `b` exited with code 1 (b broke)",
                "error",
            ]
        );
        assert!(events.last().unwrap().is_terminal());
    }
}
