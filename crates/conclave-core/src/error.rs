use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConclaveError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Plan errors (fatal, raised before any task runs)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Run already active: {0}")]
    RunAlreadyActive(String),

    // Execution errors (contained at the node boundary)
    #[error("Task execution failed: {task}: {message}")]
    TaskExecution { task: String, message: String },

    #[error("Task timeout after {timeout_secs}s: {task}")]
    TaskTimeout { task: String, timeout_secs: u64 },

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    // Stream errors (terminal for one run's stream only)
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Run cancelled")]
    Cancelled,

    // Config file errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConclaveError {
    /// Whether this error is contained inside a run rather than aborting it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TaskExecution { .. }
                | Self::TaskTimeout { .. }
                | Self::Synthesis(_)
                | Self::LlmRequest(_)
                | Self::LlmStream(_)
                | Self::LlmParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConclaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = ConclaveError::TaskTimeout {
            task: "Expert A".into(),
            timeout_secs: 30,
        };
        assert_eq!(e.to_string(), "Task timeout after 30s: Expert A");

        let e = ConclaveError::Configuration("task list is empty".into());
        assert_eq!(e.to_string(), "Configuration error: task list is empty");
    }

    #[test]
    fn test_recoverable_split() {
        assert!(ConclaveError::Synthesis("empty".into()).is_recoverable());
        assert!(ConclaveError::LlmRequest("HTTP 500".into()).is_recoverable());
        assert!(!ConclaveError::Configuration("empty".into()).is_recoverable());
        assert!(!ConclaveError::Stream("closed".into()).is_recoverable());
    }
}
