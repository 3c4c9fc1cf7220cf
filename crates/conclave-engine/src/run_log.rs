use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use conclave_core::error::Result;
use conclave_core::types::{LifecycleEvent, RunId};

/// JSONL run logger.
///
/// Subscribes to one run's lifecycle bus and appends one JSON object per
/// event to `{log_dir}/{run_id}/{timestamp}.jsonl`. Every line is flushed
/// as it is written, so a crash leaves all earlier lines intact.
pub struct RunLogger {
    log_dir: PathBuf,
}

/// A single log entry written to the JSONL file.
#[derive(Debug, Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Write entries until the graph finishes, the bus closes, or `cancel`
    /// fires. Returns the path of the log file.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<LifecycleEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        let run_dir = self.log_dir.join(&run_id.0);
        tokio::fs::create_dir_all(&run_dir).await?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                received = events.recv() => received,
            };

            match received {
                Ok(event) => {
                    if event.run_id() != &run_id {
                        continue;
                    }
                    let line = format!("{}\n", serde_json::to_string(&entry_for(&event))?);
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await?;

                    if matches!(event, LifecycleEvent::GraphFinished { .. }) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "RunLogger lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, RunLogger stopping");
                    break;
                }
            }
        }

        writer.flush().await?;
        debug!(path = %log_path.display(), "RunLogger finished");
        Ok(log_path)
    }
}

fn entry_for(event: &LifecycleEvent) -> LogEntry {
    let (node, detail) = match event {
        LifecycleEvent::NodeStarted { node, .. } => (Some(node.clone()), None),
        LifecycleEvent::NodeFinished { node, chunk, .. } => {
            let detail = match chunk {
                Some(chunk) => serde_json::json!({
                    "produced": true,
                    "chars": chunk.content.chars().count(),
                    "preview": truncate_str(&chunk.content, 200),
                }),
                None => serde_json::json!({ "produced": false }),
            };
            (Some(node.clone()), Some(detail))
        }
        LifecycleEvent::GraphFinished { snapshot, .. } => (
            None,
            Some(serde_json::json!({
                "chunks": snapshot.chunks.len(),
                "failures": snapshot.failures,
                "final_chars": snapshot.final_result.as_deref().map(|r| r.chars().count()),
            })),
        ),
    };

    LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        run_id: event.run_id().to_string(),
        event_type: event.kind(),
        node,
        detail,
    }
}

/// Truncate on a character boundary.
fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use conclave_core::event::EventBus;
    use conclave_core::types::{Chunk, RunSnapshot};

    #[test]
    fn test_entry_shapes() {
        let started = entry_for(&LifecycleEvent::NodeStarted {
            run_id: RunId::from_str("r1"),
            node: "Expert A".into(),
        });
        let json = serde_json::to_string(&started).unwrap();
        assert!(json.contains("\"event_type\":\"node_started\""));
        assert!(json.contains("\"node\":\"Expert A\""));
        assert!(!json.contains("detail"));

        let finished = entry_for(&LifecycleEvent::NodeFinished {
            run_id: RunId::from_str("r1"),
            node: "Expert A".into(),
            chunk: None,
        });
        assert_eq!(finished.detail, Some(serde_json::json!({ "produced": false })));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("综合报告", 2), "综合");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(16);
        let run_id = RunId::from_str("run-log-test");
        let events = bus.subscribe();

        let logger = RunLogger::new(dir.path().to_path_buf());
        let handle = tokio::spawn(logger.run(events, run_id.clone(), CancellationToken::new()));

        bus.publish(LifecycleEvent::NodeStarted {
            run_id: run_id.clone(),
            node: "A".into(),
        });
        bus.publish(LifecycleEvent::NodeFinished {
            run_id: run_id.clone(),
            node: "A".into(),
            chunk: Some(Chunk::new("A", "a")),
        });
        bus.publish(LifecycleEvent::GraphFinished {
            run_id: run_id.clone(),
            snapshot: Arc::new(RunSnapshot::default()),
        });

        let path = handle.await.unwrap().unwrap();
        assert!(path.starts_with(dir.path().join("run-log-test")));
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("graph_finished"));
    }
}
