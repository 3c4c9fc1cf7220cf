use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use conclave_core::types::{Chunk, RunId, RunInput, RunSnapshot, TaskFailure};

use crate::graph::{CollectOutcome, NodeOutcome};

/// Per-run accumulator. Owned by the executor task, which is its only
/// writer; node results reach it one at a time through the merge
/// reducers below.
#[derive(Debug)]
pub struct RunState {
    run_id: RunId,
    input: Arc<RunInput>,
    outputs: HashMap<String, String>,
    chunks: Vec<Chunk>,
    failures: Vec<TaskFailure>,
    final_result: Option<String>,
}

impl RunState {
    pub fn new(run_id: RunId, input: Arc<RunInput>) -> Self {
        Self {
            run_id,
            input,
            outputs: HashMap::new(),
            chunks: Vec::new(),
            failures: Vec::new(),
            final_result: None,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn input(&self) -> &Arc<RunInput> {
        &self.input
    }

    pub fn has_output(&self, task_name: &str) -> bool {
        self.outputs.contains_key(task_name)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Merge a finished task node. Returns the chunk appended, if any.
    ///
    /// Each task owns exactly one key in `outputs`; a second result for
    /// the same name is dropped. A failed node records an empty output
    /// and a failure, and appends no chunk.
    pub fn merge_node(&mut self, outcome: NodeOutcome) -> Option<Chunk> {
        if self.has_output(&outcome.task_name) {
            warn!(task = %outcome.task_name, "Duplicate result for task, ignoring");
            return None;
        }

        match outcome.result {
            Ok(content) => {
                debug!(
                    task = %outcome.task_name,
                    elapsed_ms = outcome.elapsed_ms,
                    chars = content.len(),
                    "Task finished"
                );
                self.outputs.insert(outcome.task_name.clone(), content.clone());
                let chunk = Chunk::new(outcome.task_name, content);
                self.chunks.push(chunk.clone());
                Some(chunk)
            }
            Err(e) => {
                self.record_failure(&outcome.task_name, e.to_string());
                None
            }
        }
    }

    /// Record a task with no usable result.
    pub fn record_failure(&mut self, task_name: &str, reason: String) {
        warn!(task = %task_name, reason = %reason, "Task failed");
        self.outputs.entry(task_name.to_string()).or_default();
        self.failures.push(TaskFailure {
            task_name: task_name.to_string(),
            reason,
        });
    }

    /// `(task_name, content)` for each of `names`, in that order.
    pub fn entries(&self, names: &[&str]) -> Vec<(String, String)> {
        names
            .iter()
            .filter_map(|name| {
                self.outputs
                    .get(*name)
                    .map(|content| (name.to_string(), content.clone()))
            })
            .collect()
    }

    /// Merge the collect stage. Returns the combined chunk, if any.
    pub fn merge_collect(&mut self, outcome: CollectOutcome) -> Option<Chunk> {
        self.final_result = Some(outcome.final_result);
        let chunk = outcome.combined?;
        self.outputs
            .insert(chunk.task_name.clone(), chunk.content.clone());
        self.chunks.push(chunk.clone());
        Some(chunk)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.to_string(),
            outputs: self.outputs.clone(),
            chunks: self.chunks.clone(),
            failures: self.failures.clone(),
            final_result: self.final_result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::error::ConclaveError;

    fn ok(name: &str, content: &str) -> NodeOutcome {
        NodeOutcome {
            task_name: name.into(),
            result: Ok(content.into()),
            warnings: vec![],
            elapsed_ms: 1,
        }
    }

    fn state() -> RunState {
        RunState::new(RunId::from_str("r"), Arc::new(RunInput::new()))
    }

    #[test]
    fn test_chunks_keep_arrival_order() {
        let mut s = state();
        assert!(s.merge_node(ok("B", "b")).is_some());
        assert!(s.merge_node(ok("A", "a")).is_some());
        let names: Vec<_> = s.chunks().iter().map(|c| c.task_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);

        // entries follow the requested order, not arrival order
        assert_eq!(
            s.entries(&["A", "B"]),
            vec![("A".into(), "a".into()), ("B".into(), "b".into())]
        );
    }

    #[test]
    fn test_each_task_writes_once() {
        let mut s = state();
        s.merge_node(ok("A", "first"));
        assert!(s.merge_node(ok("A", "second")).is_none());
        assert_eq!(s.snapshot().output("A"), Some("first"));
        assert_eq!(s.chunks().len(), 1);
    }

    #[test]
    fn test_failure_records_empty_output_and_no_chunk() {
        let mut s = state();
        let chunk = s.merge_node(NodeOutcome {
            task_name: "A".into(),
            result: Err(ConclaveError::TaskTimeout {
                task: "A".into(),
                timeout_secs: 1,
            }),
            warnings: vec![],
            elapsed_ms: 1000,
        });
        assert!(chunk.is_none());
        let snap = s.snapshot();
        assert_eq!(snap.output("A"), Some(""));
        assert!(snap.failed("A"));
        assert!(snap.chunks.is_empty());
    }

    #[test]
    fn test_merge_collect() {
        let mut s = state();
        s.merge_node(ok("A", "a"));
        let chunk = s.merge_collect(CollectOutcome {
            combined: Some(Chunk::new("Combined Report", "all")),
            final_result: "all".into(),
            synthesis_error: None,
            elapsed_ms: 1,
        });
        assert_eq!(chunk.map(|c| c.task_name), Some("Combined Report".to_string()));
        let snap = s.snapshot();
        assert_eq!(snap.final_result.as_deref(), Some("all"));
        assert_eq!(snap.output("Combined Report"), Some("all"));
        assert_eq!(snap.chunks.last().map(|c| c.content.as_str()), Some("all"));
    }
}
