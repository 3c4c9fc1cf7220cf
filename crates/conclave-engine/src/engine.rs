use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conclave_core::error::{ConclaveError, Result};
use conclave_core::event::EventBus;
use conclave_core::types::{RunId, RunInput, RunSnapshot, TaskDescriptor};

use crate::context::EngineContext;
use crate::graph::{ExecutionPlan, GraphExecutor};
use crate::run_log::RunLogger;
use crate::stream::{forward, RunStream, StreamProcessor};

/// An active run as seen by the registry.
pub struct RunHandle {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, RunHandle>>>;

/// Removes a run from the registry when dropped.
struct Registration {
    runs: Registry,
    run_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.runs.lock().unwrap().remove(&self.run_id);
    }
}

/// Entry point: starts runs, tracks the active ones, aborts on request.
pub struct Engine {
    ctx: Arc<EngineContext>,
    runs: Registry,
}

impl Engine {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Start a run and return its notification stream.
    ///
    /// Validation happens before anything is spawned: an invalid task list
    /// fails with `Configuration`, a run id already in use with
    /// `RunAlreadyActive`. Must be called from within a Tokio runtime.
    pub fn start_run(
        &self,
        run_id: RunId,
        descriptors: Vec<TaskDescriptor>,
        input: RunInput,
    ) -> Result<RunStream> {
        let plan = Arc::new(ExecutionPlan::build(descriptors, &self.ctx.config.engine)?);
        let cancel = CancellationToken::new();
        let registration = self.register(&run_id, cancel.clone())?;

        let bus = Arc::new(EventBus::new(self.ctx.config.engine.event_capacity));
        // Subscribe before the executor can publish anything
        let events = bus.subscribe();
        self.spawn_logger(&run_id, &bus, &cancel);

        let executor = GraphExecutor::new(plan, self.ctx.clone());
        let exec_run_id = run_id.clone();
        let exec_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = executor
                .run(exec_run_id.clone(), Arc::new(input), bus, exec_cancel)
                .await
            {
                info!(run_id = %exec_run_id, error = %e, "Run ended early");
            }
        });

        let (tx, rx) = mpsc::channel(self.ctx.config.engine.event_capacity.max(1));
        let processor =
            StreamProcessor::new(run_id.clone(), self.ctx.config.engine.combined_marker.clone());
        let forward_cancel = cancel.clone();
        tokio::spawn(async move {
            forward(events, processor, tx, forward_cancel).await;
            drop(registration);
        });

        Ok(RunStream::new(run_id, rx, cancel))
    }

    /// Run the graph to completion without streaming and return its state.
    pub async fn execute(
        &self,
        run_id: RunId,
        descriptors: Vec<TaskDescriptor>,
        input: RunInput,
    ) -> Result<RunSnapshot> {
        let plan = Arc::new(ExecutionPlan::build(descriptors, &self.ctx.config.engine)?);
        let cancel = CancellationToken::new();
        let _registration = self.register(&run_id, cancel.clone())?;

        let bus = Arc::new(EventBus::new(self.ctx.config.engine.event_capacity));
        self.spawn_logger(&run_id, &bus, &cancel);

        GraphExecutor::new(plan, self.ctx.clone())
            .run(run_id, Arc::new(input), bus, cancel)
            .await
    }

    /// Cancel an active run. Returns false if no such run is active.
    pub fn abort(&self, run_id: &RunId) -> bool {
        match self.runs.lock().unwrap().get(&run_id.0) {
            Some(handle) => {
                info!(run_id = %run_id, "Aborting run");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of the runs currently active.
    pub fn active_runs(&self) -> Vec<RunId> {
        self.runs
            .lock()
            .unwrap()
            .values()
            .map(|h| h.run_id.clone())
            .collect()
    }

    pub fn is_active(&self, run_id: &RunId) -> bool {
        self.runs.lock().unwrap().contains_key(&run_id.0)
    }

    fn register(&self, run_id: &RunId, cancel: CancellationToken) -> Result<Registration> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run_id.0) {
            return Err(ConclaveError::RunAlreadyActive(run_id.to_string()));
        }
        runs.insert(
            run_id.0.clone(),
            RunHandle {
                run_id: run_id.clone(),
                started_at: Utc::now(),
                cancel,
            },
        );
        Ok(Registration {
            runs: self.runs.clone(),
            run_id: run_id.0.clone(),
        })
    }

    fn spawn_logger(&self, run_id: &RunId, bus: &EventBus, cancel: &CancellationToken) {
        let Some(log_dir) = self.ctx.config.log_dir() else {
            return;
        };
        let logger = RunLogger::new(log_dir);
        let events = bus.subscribe();
        let run_id = run_id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = logger.run(events, run_id, cancel).await {
                error!(error = %e, "Run logger failed");
            }
        });
    }
}
