use std::time::Instant;

use tracing::{debug, info, warn};

use conclave_core::error::{ConclaveError, Result};
use conclave_core::types::{ChatMessage, Chunk};

use crate::context::EngineContext;

/// The fan-in node. Runs once, after every task node has finished.
#[derive(Debug, Clone)]
pub struct CollectNode {
    name: String,
}

/// Result of the collect stage.
#[derive(Debug)]
pub struct CollectOutcome {
    /// The combined chunk, when more than one task produced output.
    pub combined: Option<Chunk>,
    pub final_result: String,
    /// Set when synthesis was attempted and the fallback was used.
    pub synthesis_error: Option<ConclaveError>,
    pub elapsed_ms: u64,
}

impl CollectNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name of the combined chunk.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Combine `(task_name, content)` entries, given in declaration order.
    ///
    /// A single entry is the final result as-is. With several entries the
    /// non-empty ones are synthesized into one report; if synthesis fails
    /// or comes back empty, the first non-empty entry stands in for it.
    pub async fn run(&self, ctx: &EngineContext, entries: &[(String, String)]) -> CollectOutcome {
        let start = Instant::now();

        if entries.len() <= 1 {
            return CollectOutcome {
                combined: None,
                final_result: entries.first().map(|(_, c)| c.clone()).unwrap_or_default(),
                synthesis_error: None,
                elapsed_ms: start.elapsed().as_millis() as u64,
            };
        }

        let reports: Vec<&(String, String)> = entries
            .iter()
            .filter(|(_, content)| !content.trim().is_empty())
            .collect();

        let Some((_, first)) = reports.first() else {
            info!("No task produced output, nothing to combine");
            return CollectOutcome {
                combined: None,
                final_result: String::new(),
                synthesis_error: None,
                elapsed_ms: start.elapsed().as_millis() as u64,
            };
        };

        let (content, synthesis_error) = if ctx.config.synthesis.enabled {
            match self.synthesize(ctx, &reports).await {
                Ok(text) => match &ctx.config.synthesis.title {
                    Some(title) => (format!("# {}\n\n{}", title, text), None),
                    None => (text, None),
                },
                Err(e) => {
                    warn!(error = %e, "Synthesis failed, falling back to first output");
                    (first.clone(), Some(e))
                }
            }
        } else {
            debug!("Synthesis disabled, using first output");
            (first.clone(), None)
        };

        CollectOutcome {
            combined: Some(Chunk::new(&self.name, content.clone())),
            final_result: content,
            synthesis_error,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn synthesize(&self, ctx: &EngineContext, reports: &[&(String, String)]) -> Result<String> {
        let messages = synthesis_messages(&ctx.config.synthesis.system_prompt, reports);
        let model = &ctx.fast;
        let timeout = ctx.synthesis_timeout();

        info!(reports = reports.len(), model = %model.config.model_id, "Synthesizing combined report");

        let text = tokio::time::timeout(timeout, model.client.generate(&model.config, messages))
            .await
            .map_err(|_| {
                ConclaveError::Synthesis(format!("timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| ConclaveError::Synthesis(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(ConclaveError::Synthesis("empty synthesis result".into()));
        }
        Ok(text)
    }
}

/// System instructions plus one user message with every report under its
/// task name as a section header.
fn synthesis_messages(system_prompt: &str, reports: &[&(String, String)]) -> Vec<ChatMessage> {
    let body: String = reports
        .iter()
        .map(|(name, content)| format!("# {}\n\n{}\n\n", name, content))
        .collect();
    vec![ChatMessage::system(system_prompt), ChatMessage::user(body)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_messages_sections() {
        let a = ("Expert A".to_string(), "report-A".to_string());
        let b = ("Expert B".to_string(), "report-B".to_string());
        let msgs = synthesis_messages("combine", &[&a, &b]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].text(), "combine");
        assert_eq!(
            msgs[1].text(),
            "# Expert A\n\nreport-A\n\n# Expert B\n\nreport-B\n\n"
        );
    }
}
