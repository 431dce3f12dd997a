//! Event stream publisher
//!
//! Each workflow invocation gets its own bounded channel and exactly one subscriber.
//! The workflow runs on its own task; a supervisor task awaits it and always sends the
//! single terminal `done` frame, whether the workflow returned, failed or panicked.
//! A subscriber that goes away only stops delivery: the workflow keeps running.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use axum::http::{header, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::domain::progress::{Outcome, ProgressEvent};
use crate::services::sequencer::FAILURE_MARKER;

/// Progress channel capacity
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// SSE keep-alive interval
const KEEP_ALIVE_SECS: u64 = 15;

/// Sending half handed to a workflow.
///
/// Sends never fail from the workflow's point of view: a closed channel means
/// nobody is listening any more.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// Sink with no subscriber at all (non-streaming control actions).
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Publish one progress line.
    pub async fn line(&self, data: impl Into<String>) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(ProgressEvent::line(data)).await;
        }
    }

    /// Whether a subscriber is still attached.
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().map_or(false, |tx| !tx.is_closed())
    }
}

/// Receiving half: the ordered events of one workflow invocation.
pub struct WorkflowStream {
    rx: mpsc::Receiver<ProgressEvent>,
    finished: bool,
}

/// Run `workflow` on its own task and return its event stream.
///
/// The terminal event is sent by the supervisor after the workflow task has
/// completed, so it is always the last event and is sent exactly once.
pub fn launch<F, Fut>(name: &str, workflow: F) -> WorkflowStream
where
    F: FnOnce(ProgressSink) -> Fut,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let sink = ProgressSink {
        tx: Some(tx.clone()),
    };
    let run_id = Uuid::new_v4();
    let span = info_span!("workflow", name = %name, run_id = %run_id);
    let handle = tokio::spawn(workflow(sink).instrument(span.clone()));
    let name = name.to_string();

    tokio::spawn(async move {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = join_error_message(e);
                error!(workflow = %name, error = %message, "Workflow aborted unexpectedly");
                let _ = tx
                    .send(ProgressEvent::line(format!(
                        "{}: unexpected error: {}",
                        FAILURE_MARKER, message
                    )))
                    .await;
                Outcome::Error
            }
        };

        info!(workflow = %name, outcome = outcome.as_str(), "Workflow finished");
        let _ = tx.send(ProgressEvent::done(outcome)).await;
    }
    .instrument(span));

    WorkflowStream {
        rx,
        finished: false,
    }
}

impl WorkflowStream {
    /// Next event; `None` once the terminal event has been delivered.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }

    /// Drain every event up to and including the terminal one.
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Drain in the background, logging only the outcome.
    ///
    /// Used by the fire-and-forget endpoints.
    pub fn detach(self, name: impl Into<String>) {
        let name = name.into();
        tokio::spawn(async move {
            let events = self.collect().await;
            let outcome = events
                .last()
                .filter(|e| e.is_terminal())
                .map(|e| e.data.clone())
                .unwrap_or_else(|| "unknown".to_string());
            info!(
                workflow = %name,
                outcome = %outcome,
                lines = events.len().saturating_sub(1),
                "Detached workflow finished"
            );
        });
    }

    /// Turn the stream into a `text/event-stream` response.
    pub fn into_response(self) -> Response {
        let mut events = self;
        let stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                yield Ok::<Event, Infallible>(to_sse(&event));
            }
        };

        let headers = [
            (header::CACHE_CONTROL, "no-cache, no-store".to_string()),
            (
                HeaderName::from_static("x-accel-buffering"),
                "no".to_string(),
            ),
            (header::CONNECTION, "keep-alive".to_string()),
            (header::LAST_MODIFIED, http_date()),
        ];

        let sse = Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(KEEP_ALIVE_SECS))
                .text("keepalive"),
        );

        (headers, sse).into_response()
    }
}

fn to_sse(event: &ProgressEvent) -> Event {
    let mut sse = Event::default();
    if let Some(ref name) = event.event {
        sse = sse.event(name);
    }
    sse.data(&event.data)
}

fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "workflow panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_wire_framing() {
        let stream = launch("framing", |sink| async move {
            sink.line("a\r\nb").await;
            Outcome::Error
        });

        let response = stream.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "data: a\ndata: b\n\nevent: done\ndata: error\n\n"
        );
    }

    #[tokio::test]
    async fn test_terminal_event_is_last_and_unique() {
        let stream = launch("test", |sink| async move {
            sink.line("step 1").await;
            sink.line("step 2").await;
            Outcome::Success
        });

        let events = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data, "step 1");
        assert_eq!(events[1].data, "step 2");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events[2], ProgressEvent::done(Outcome::Success));
    }

    #[tokio::test]
    async fn test_panic_still_emits_error_terminal() {
        let stream = launch("panics", |sink| async move {
            sink.line("before").await;
            if sink.is_connected() {
                panic!("collaborator exploded");
            }
            Outcome::Success
        });

        let events = stream.collect().await;
        let last = events.last().unwrap();
        assert_eq!(last, &ProgressEvent::done(Outcome::Error));
        assert!(events
            .iter()
            .any(|e| e.data.contains(FAILURE_MARKER) && e.data.contains("collaborator exploded")));
    }

    #[tokio::test]
    async fn test_workflow_continues_after_subscriber_leaves() {
        let (done_tx, done_rx) = oneshot::channel();
        let stream = launch("orphaned", |sink| async move {
            for i in 0..1000 {
                sink.line(format!("line {}", i)).await;
            }
            let _ = done_tx.send(());
            Outcome::Success
        });

        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("workflow should finish without a subscriber")
            .unwrap();
    }

    #[tokio::test]
    async fn test_detached_sink_ignores_lines() {
        let sink = ProgressSink::detached();
        sink.line("nobody listens").await;
        assert!(!sink.is_connected());
    }
}
