use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConclaveError, Result};

/// Top-level Conclave configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Execution limits and reserved names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on one task's capability invocation.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Upper bound on the synthesis invocation.
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_secs: u64,
    /// Per-run lifecycle bus capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Name of the combined result chunk.
    #[serde(default = "default_combined_name")]
    pub combined_name: String,
    /// Token identifying the combined chunk; must occur in `combined_name`.
    #[serde(default = "default_combined_marker")]
    pub combined_marker: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout(),
            synthesis_timeout_secs: default_synthesis_timeout(),
            event_capacity: default_event_capacity(),
            combined_name: default_combined_name(),
            combined_marker: default_combined_marker(),
        }
    }
}

impl EngineConfig {
    /// The marker must be non-empty and occur in `combined_name`, or the
    /// combined chunk cannot be told apart from task chunks.
    pub fn validate(&self) -> Result<()> {
        if self.combined_marker.is_empty() {
            return Err(ConclaveError::Config("engine.combined_marker is empty".into()));
        }
        if !self.combined_name.contains(&self.combined_marker) {
            return Err(ConclaveError::Config(format!(
                "engine.combined_name '{}' must contain the marker '{}'",
                self.combined_name, self.combined_marker
            )));
        }
        if self.task_timeout_secs == 0 || self.synthesis_timeout_secs == 0 {
            return Err(ConclaveError::Config("timeouts must be at least 1 second".into()));
        }
        Ok(())
    }
}

fn default_task_timeout() -> u64 { 120 }
fn default_synthesis_timeout() -> u64 { 180 }
fn default_event_capacity() -> usize { 256 }
fn default_combined_name() -> String { "Combined Report".to_string() }
fn default_combined_marker() -> String { "Combined".to_string() }

/// Synthesis stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Issue the synthesis call (default: true). When off, the first
    /// non-empty output stands in for the combined result.
    #[serde(default = "default_synthesis_enabled")]
    pub enabled: bool,
    /// Optional heading placed above the synthesized text.
    #[serde(default)]
    pub title: Option<String>,
    /// System prompt for the synthesis call.
    #[serde(default = "default_synthesis_prompt")]
    pub system_prompt: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: default_synthesis_enabled(),
            title: None,
            system_prompt: default_synthesis_prompt(),
        }
    }
}

fn default_synthesis_enabled() -> bool { true }

fn default_synthesis_prompt() -> String {
    "You are an analyst who combines the findings of several experts into one complete, \
professional report.

Based on the expert analyses below, write a combined report:
1. Integrate the experts' views and identify where they agree and differ
2. Provide a comprehensive analysis
3. Give overall recommendations and an outlook
4. Keep a professional, objective tone

Report format (markdown):
- Overall assessment
- Points of agreement
- Points of disagreement
- Key findings
- Recommendations
- Outlook"
        .to_string()
}

/// Capability providers: a fast text model and an optional media-capable one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub fast: ModelConfig,
    #[serde(default)]
    pub vision: Option<ModelConfig>,
}

impl ModelsConfig {
    /// The media-capable model, falling back to the fast one.
    pub fn vision_or_fast(&self) -> &ModelConfig {
        self.vision.as_ref().unwrap_or(&self.fast)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "anthropic".to_string() }
fn default_max_tokens() -> u32 { 8192 }
fn default_temperature() -> f32 { 0.0 }

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
            retry: None,
        }
    }

    /// Parse a `provider:model` shorthand, e.g. `openai:gpt-4o-mini`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(ConclaveError::Config(format!(
                "invalid model spec '{}', expected '<provider>:<model>'",
                spec
            ))),
        }
    }
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ~/.conclave/logs
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

fn default_log_enabled() -> bool { true }

impl AppConfig {
    /// A config with defaults everywhere except the fast model.
    pub fn new(fast: ModelConfig) -> Self {
        Self {
            engine: EngineConfig::default(),
            synthesis: SynthesisConfig::default(),
            models: ModelsConfig { fast, vision: None },
            log: None,
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConclaveError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| ConclaveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()
    }

    /// Resolve the run log directory (expand ~), if logging is enabled.
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref().filter(|l| l.enabled)?;
        let dir = log.log_dir.as_deref().unwrap_or("~/.conclave/logs");
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return Some(home.join(rest));
            }
        }
        Some(PathBuf::from(dir))
    }

    /// Copy with API keys masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |m: &mut ModelConfig| {
            if m.api_key.is_some() {
                m.api_key = Some("***".to_string());
            }
        };
        mask(&mut copy.models.fast);
        if let Some(ref mut vision) = copy.models.vision {
            mask(vision);
        }
        copy
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CONCLAVE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CONCLAVE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CONCLAVE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CONCLAVE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CONCLAVE_VAR}\"");
    }

    #[test]
    fn test_engine_defaults_from_minimal_toml() {
        let toml_str = r#"
[models.fast]
model_id = "claude-sonnet-4-20250514"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.task_timeout_secs, 120);
        assert_eq!(config.engine.synthesis_timeout_secs, 180);
        assert_eq!(config.engine.combined_name, "Combined Report");
        assert!(config.synthesis.enabled);
        assert!(config.models.vision.is_none());
        assert_eq!(config.models.vision_or_fast().model_id, "claude-sonnet-4-20250514");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_marker_must_occur_in_combined_name() {
        let toml_str = r#"
[engine]
combined_name = "Summary"
combined_marker = "Combined"

[models.fast]
model_id = "m"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(ConclaveError::Config(_))));
    }

    #[test]
    fn test_model_spec_parsing() {
        let m = ModelConfig::from_spec("openai:gpt-4o-mini").unwrap();
        assert_eq!(m.provider, "openai");
        assert_eq!(m.model_id, "gpt-4o-mini");

        // Only the first colon splits
        let m = ModelConfig::from_spec("ollama:llama3.2:3b").unwrap();
        assert_eq!(m.model_id, "llama3.2:3b");

        assert!(ModelConfig::from_spec("gpt-4o").is_err());
        assert!(ModelConfig::from_spec(":gpt-4o").is_err());
    }

    #[test]
    fn test_redacted_masks_keys() {
        let mut fast = ModelConfig::new("openai", "gpt-4o");
        fast.api_key = Some("sk-secret".into());
        let config = AppConfig::new(fast);
        let shown = config.redacted();
        assert_eq!(shown.models.fast.api_key.as_deref(), Some("***"));
        assert_eq!(config.models.fast.api_key.as_deref(), Some("sk-secret"));
    }

    #[test]
    fn test_log_dir_only_when_enabled() {
        let mut config = AppConfig::new(ModelConfig::new("openai", "m"));
        assert!(config.log_dir().is_none());

        config.log = Some(LogConfig {
            enabled: true,
            log_dir: Some("/tmp/conclave-logs".into()),
        });
        assert_eq!(config.log_dir(), Some(PathBuf::from("/tmp/conclave-logs")));

        config.log = Some(LogConfig {
            enabled: false,
            log_dir: None,
        });
        assert!(config.log_dir().is_none());
    }
}
