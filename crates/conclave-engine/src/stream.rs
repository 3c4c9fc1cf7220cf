use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use conclave_core::types::{Chunk, LifecycleEvent, Notification, RunId};

/// Turns one run's lifecycle events into its notification sequence.
///
/// Each task name is notified at most once. Individual chunks go out as
/// soon as their node finishes. The combined chunk is held back until the
/// graph finishes and is always the last notification.
#[derive(Debug)]
pub struct StreamProcessor {
    run_id: RunId,
    combined_marker: String,
    seen: HashSet<String>,
    pending_combined: Option<Chunk>,
    finished: bool,
}

impl StreamProcessor {
    pub fn new(run_id: RunId, combined_marker: impl Into<String>) -> Self {
        Self {
            run_id,
            combined_marker: combined_marker.into(),
            seen: HashSet::new(),
            pending_combined: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_combined(&self, chunk: &Chunk) -> bool {
        chunk.task_name.contains(&self.combined_marker)
    }

    /// Feed one event; returns the notifications it releases, in order.
    pub fn on_event(&mut self, event: LifecycleEvent) -> Vec<Notification> {
        if self.finished || event.run_id() != &self.run_id {
            return vec![];
        }

        match event {
            LifecycleEvent::NodeStarted { .. } => vec![],
            LifecycleEvent::NodeFinished { chunk: None, .. } => vec![],
            LifecycleEvent::NodeFinished {
                chunk: Some(chunk), ..
            } => self.admit(chunk).into_iter().collect(),
            LifecycleEvent::GraphFinished { snapshot, .. } => {
                // Sweep for anything a dropped node event left behind
                let mut out: Vec<Notification> = snapshot
                    .chunks
                    .iter()
                    .filter_map(|chunk| self.admit(chunk.clone()))
                    .collect();
                if let Some(combined) = self.pending_combined.take() {
                    if self.seen.insert(combined.task_name.clone()) {
                        out.push(combined.into());
                    }
                }
                self.finished = true;
                out
            }
        }
    }

    /// Emit an individual chunk if unseen; park a combined one.
    fn admit(&mut self, chunk: Chunk) -> Option<Notification> {
        if self.is_combined(&chunk) {
            if self.pending_combined.is_none() && !self.seen.contains(&chunk.task_name) {
                self.pending_combined = Some(chunk);
            }
            return None;
        }
        if self.seen.insert(chunk.task_name.clone()) {
            Some(chunk.into())
        } else {
            None
        }
    }

    /// Terminate with a single error notification.
    pub fn fail(&mut self, message: impl Into<String>) -> Notification {
        self.finished = true;
        self.pending_combined = None;
        Notification::error(message)
    }
}

/// Notification stream for one run. Dropping it cancels the run.
pub struct RunStream {
    run_id: RunId,
    inner: ReceiverStream<Notification>,
    _cancel_on_drop: DropGuard,
}

impl RunStream {
    pub(crate) fn new(
        run_id: RunId,
        rx: mpsc::Receiver<Notification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

impl Stream for RunStream {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Drive a processor from a run's event receiver into `tx` until the run
/// finishes, the caller goes away, or the run is cancelled.
pub(crate) async fn forward(
    mut events: broadcast::Receiver<LifecycleEvent>,
    mut processor: StreamProcessor,
    tx: mpsc::Sender<Notification>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(run_id = %processor.run_id, "Stream forwarding cancelled");
                return;
            }
            received = events.recv() => received,
        };

        match received {
            Ok(event) => {
                for notification in processor.on_event(event) {
                    if tx.send(notification).await.is_err() {
                        debug!(run_id = %processor.run_id, "Caller went away, cancelling run");
                        cancel.cancel();
                        return;
                    }
                }
                if processor.is_finished() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(run_id = %processor.run_id, skipped = n, "Stream lagged, relying on final sweep");
            }
            Err(broadcast::error::RecvError::Closed) => {
                let notification =
                    processor.fail("lifecycle event source closed before the run finished");
                warn!(run_id = %processor.run_id, "{}", notification.content);
                let _ = tx.send(notification).await;
                return;
            }
        }
    }
}
