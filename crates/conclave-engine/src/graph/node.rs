use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use conclave_core::error::{ConclaveError, Result};
use conclave_core::traits::FactProvider;
use conclave_core::types::{ChatMessage, FieldKind, RunInput, TaskDescriptor};

use crate::context::EngineContext;

/// Media type attached to image fields.
const IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// A fan-out node: one descriptor, one capability invocation.
#[derive(Debug, Clone)]
pub struct TaskNode {
    descriptor: Arc<TaskDescriptor>,
}

/// What a task node hands back to the executor.
#[derive(Debug)]
pub struct NodeOutcome {
    pub task_name: String,
    /// The extracted text, or the error that was contained at the node.
    pub result: Result<String>,
    /// Required fields that had no value.
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

impl TaskNode {
    pub fn new(descriptor: Arc<TaskDescriptor>) -> Self {
        Self { descriptor }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.display_name
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// Build the message list: the system prompt, then one message per
    /// required field in declaration order. Missing fields are skipped
    /// and returned as warnings.
    pub fn build_messages(
        &self,
        input: &RunInput,
        facts: &dyn FactProvider,
    ) -> (Vec<ChatMessage>, Vec<String>) {
        let d = &self.descriptor;
        let mut messages = vec![ChatMessage::system(&d.system_prompt)];
        let mut warnings = Vec::new();

        for field in &d.context_spec {
            let value = match input.get(&d.id, &field.field_id).filter(|v| !v.is_empty()) {
                Some(v) => v,
                None => {
                    warn!(
                        task = %d.display_name,
                        field = %field.field_id,
                        "Required field missing, skipping"
                    );
                    warnings.push(format!("missing field '{}'", field.field_id));
                    continue;
                }
            };

            match field.kind {
                FieldKind::Text => {
                    messages.push(ChatMessage::user(format!("{}: {}", field.label, value)));
                }
                FieldKind::Datetime => {
                    messages.push(ChatMessage::user(facts.compute_fact(&field.label, value)));
                }
                FieldKind::Image => {
                    messages.push(ChatMessage::user(field.label.clone()));
                    messages.push(ChatMessage::user_image(IMAGE_MEDIA_TYPE, value));
                }
            }
        }

        (messages, warnings)
    }

    /// Run the node to completion. Never fails: capability errors and
    /// timeouts are returned inside the outcome.
    pub async fn run(&self, ctx: &EngineContext, input: &RunInput) -> NodeOutcome {
        let start = Instant::now();
        let name = self.name().to_string();
        let (messages, warnings) = self.build_messages(input, ctx.facts.as_ref());

        let model = ctx.model_for(self.descriptor.needs_vision());
        let timeout = ctx.task_timeout();
        debug!(
            task = %name,
            model = %model.config.model_id,
            messages = messages.len(),
            "Invoking capability"
        );

        let result =
            match tokio::time::timeout(timeout, model.client.generate(&model.config, messages))
                .await
            {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(ConclaveError::TaskExecution {
                    task: name.clone(),
                    message: e.to_string(),
                }),
                Err(_) => Err(ConclaveError::TaskTimeout {
                    task: name.clone(),
                    timeout_secs: timeout.as_secs(),
                }),
            };

        NodeOutcome {
            task_name: name,
            result,
            warnings,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}
