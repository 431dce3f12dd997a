//! Orchestration workflows
//!
//! A workflow maps a domain action to step sequences plus the entity mutations that
//! follow each milestone. Validation happens before anything is spawned; once the
//! workflow runs, every outcome (including errors and panics) ends in the stream.

pub mod apps;
pub mod engine;
pub mod pool;
pub mod security;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::error;

use crate::domain::app::TransitionError;
use crate::domain::progress::Outcome;
use crate::infra::command::{CommandRunner, ExecMode};
use crate::services::config_gen::DeployError;
use crate::services::sequencer::{run_steps, SequenceReport, Step, FAILURE_MARKER};
use crate::services::stream::{launch, ProgressSink, WorkflowStream};
use crate::state::{AppState, FlightConflict, FlightGuard, StoreError};

/// Errors that stop a workflow before or while it runs
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("application '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Busy(#[from] FlightConflict),

    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("workflow task aborted: {0}")]
    Aborted(String),
}

/// Everything one workflow invocation works with
#[derive(Clone)]
pub struct WorkflowContext {
    pub state: Arc<AppState>,
    pub runner: CommandRunner,
    pub sink: ProgressSink,
}

impl WorkflowContext {
    /// Runner built from the configured execution mode
    pub fn new(state: Arc<AppState>, sink: ProgressSink) -> Self {
        let runner = state.runner();
        Self {
            state,
            runner,
            sink,
        }
    }

    pub fn with_runner(state: Arc<AppState>, runner: CommandRunner, sink: ProgressSink) -> Self {
        Self {
            state,
            runner,
            sink,
        }
    }

    pub fn mode(&self) -> &ExecMode {
        self.runner.mode()
    }

    pub async fn log(&self, line: impl Into<String>) {
        self.sink.line(line).await;
    }

    /// Publish a failure line carrying the failure marker
    pub async fn fail_line(&self, detail: &str) {
        self.sink.line(format!("{}: {}", FAILURE_MARKER, detail)).await;
    }

    pub async fn run(&self, steps: &[Step]) -> SequenceReport {
        run_steps(&self.runner, &self.sink, steps).await
    }
}

/// Spawn a validated workflow that holds `guard` until it is done.
pub fn spawn_guarded<F, Fut>(
    state: Arc<AppState>,
    name: &str,
    guard: FlightGuard,
    body: F,
) -> WorkflowStream
where
    F: FnOnce(WorkflowContext) -> Fut + Send + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    launch(name, move |sink| async move {
        let _guard = guard;
        body(WorkflowContext::new(state, sink)).await
    })
}

/// Await a workflow body, turning errors and panics into a failure message.
pub(crate) async fn catch_failure<Fut>(body: Fut) -> Result<Outcome, String>
where
    Fut: Future<Output = Result<Outcome, WorkflowError>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(error = %message, "Workflow panicked");
            Err(format!("unexpected error: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "workflow panicked".to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::catalog::Catalog;
    use crate::config::env::EnvConfig;
    use crate::infra::command::SimulationConfig;
    use crate::state::Store;

    /// Simulated state with the built-in catalog, everything under `dir`
    pub async fn simulated_state(dir: &std::path::Path, sim: SimulationConfig) -> Arc<AppState> {
        let config = EnvConfig::for_data_dir(dir, ExecMode::Simulate(sim));
        let catalog = Catalog::builtin();
        let store = Store::in_memory();
        store.merge_catalog(&catalog).await.unwrap();
        Arc::new(AppState::new(config, catalog, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catch_failure_maps_errors_and_panics() {
        let ok = catch_failure(async { Ok(Outcome::Success) }).await;
        assert_eq!(ok, Ok(Outcome::Success));

        let err = catch_failure(async { Err(WorkflowError::Precondition("no docker".into())) }).await;
        assert_eq!(err, Err("no docker".to_string()));

        let panicked = catch_failure(async {
            if true {
                panic!("store exploded");
            }
            Ok(Outcome::Success)
        })
        .await;
        assert_eq!(panicked, Err("unexpected error: store exploded".to_string()));
    }
}
