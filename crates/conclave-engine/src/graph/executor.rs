use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use conclave_core::error::{ConclaveError, Result};
use conclave_core::event::EventBus;
use conclave_core::types::{LifecycleEvent, RunId, RunInput, RunSnapshot};

use super::node::NodeOutcome;
use super::plan::ExecutionPlan;
use crate::context::EngineContext;
use crate::state::RunState;

/// Runs one plan for one run id.
///
/// Every fan-out node is spawned at once; results are merged as they
/// complete, so the executor task is the single writer of the run state.
/// The drained `JoinSet` is the barrier before the collect node.
pub struct GraphExecutor {
    plan: Arc<ExecutionPlan>,
    ctx: Arc<EngineContext>,
}

impl GraphExecutor {
    pub fn new(plan: Arc<ExecutionPlan>, ctx: Arc<EngineContext>) -> Self {
        Self { plan, ctx }
    }

    /// Execute the graph, publishing lifecycle events on `bus`.
    ///
    /// Returns `Cancelled` if `cancel` fires first; in-flight nodes are
    /// aborted and nothing more is published.
    pub async fn run(
        &self,
        run_id: RunId,
        input: Arc<RunInput>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Result<RunSnapshot> {
        let start = Instant::now();
        let mut state = RunState::new(run_id.clone(), input.clone());

        info!(run_id = %run_id, tasks = self.plan.fan_out().len(), "Run started");

        let mut nodes = JoinSet::new();
        for node in self.plan.fan_out() {
            bus.publish(LifecycleEvent::NodeStarted {
                run_id: run_id.clone(),
                node: node.name().to_string(),
            });
            let node = node.clone();
            let ctx = self.ctx.clone();
            let input = input.clone();
            nodes.spawn(async move { node.run(&ctx, &input).await });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    nodes.abort_all();
                    info!(run_id = %run_id, "Run cancelled during fan-out");
                    return Err(ConclaveError::Cancelled);
                }
                joined = nodes.join_next() => joined,
            };

            match joined {
                Some(Ok(outcome)) => self.merge(&mut state, &bus, outcome),
                Some(Err(e)) => {
                    // The panicking node is identified after the barrier
                    error!(run_id = %run_id, error = %e, "Task node panicked");
                }
                None => break,
            }
        }

        for node in self.plan.fan_out() {
            if !state.has_output(node.name()) {
                state.record_failure(node.name(), "task did not complete".into());
                bus.publish(LifecycleEvent::NodeFinished {
                    run_id: run_id.clone(),
                    node: node.name().to_string(),
                    chunk: None,
                });
            }
        }

        let collect = self.plan.collect();
        bus.publish(LifecycleEvent::NodeStarted {
            run_id: run_id.clone(),
            node: collect.name().to_string(),
        });
        let entries = state.entries(&self.plan.task_names());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(run_id = %run_id, "Run cancelled during synthesis");
                return Err(ConclaveError::Cancelled);
            }
            outcome = collect.run(&self.ctx, &entries) => outcome,
        };
        let chunk = state.merge_collect(outcome);
        bus.publish(LifecycleEvent::NodeFinished {
            run_id: run_id.clone(),
            node: collect.name().to_string(),
            chunk,
        });

        let snapshot = state.snapshot();
        info!(
            run_id = %run_id,
            chunks = snapshot.chunks.len(),
            failures = snapshot.failures.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run finished"
        );
        bus.publish(LifecycleEvent::GraphFinished {
            run_id,
            snapshot: Arc::new(snapshot.clone()),
        });
        Ok(snapshot)
    }

    fn merge(&self, state: &mut RunState, bus: &EventBus, outcome: NodeOutcome) {
        if !outcome.warnings.is_empty() {
            debug!(
                run_id = %state.run_id(),
                task = %outcome.task_name,
                missing = outcome.warnings.len(),
                "Task ran without some required fields"
            );
        }
        let node = outcome.task_name.clone();
        let chunk = state.merge_node(outcome);
        bus.publish(LifecycleEvent::NodeFinished {
            run_id: state.run_id().clone(),
            node,
            chunk,
        });
    }
}
