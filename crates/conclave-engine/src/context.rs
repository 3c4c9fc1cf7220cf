use std::sync::Arc;
use std::time::Duration;

use conclave_core::config::{AppConfig, ModelConfig};
use conclave_core::traits::{FactProvider, LlmClient};

use crate::facts::DatetimeFacts;

/// A capability client paired with the model settings it is called with.
#[derive(Clone)]
pub struct ModelHandle {
    pub client: Arc<dyn LlmClient>,
    pub config: ModelConfig,
}

impl ModelHandle {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }
}

/// Everything a run needs from its surroundings, passed explicitly into
/// the engine instead of living in process-wide state.
#[derive(Clone)]
pub struct EngineContext {
    pub config: AppConfig,
    /// Text-only model.
    pub fast: ModelHandle,
    /// Media-capable model, used when a task takes an image field.
    pub vision: ModelHandle,
    pub facts: Arc<dyn FactProvider>,
}

impl EngineContext {
    /// Build clients for `[models.fast]` and `[models.vision]` from config.
    pub fn from_config(config: AppConfig) -> Self {
        let fast_config = config.models.fast.clone();
        let vision_config = config.models.vision_or_fast().clone();
        let fast = ModelHandle::new(conclave_llm::create_client(&fast_config), fast_config);
        let vision = ModelHandle::new(conclave_llm::create_client(&vision_config), vision_config);
        Self {
            config,
            fast,
            vision,
            facts: Arc::new(DatetimeFacts),
        }
    }

    /// Use one client for both model roles.
    pub fn with_client(config: AppConfig, client: Arc<dyn LlmClient>) -> Self {
        let fast = ModelHandle::new(client.clone(), config.models.fast.clone());
        let vision = ModelHandle::new(client, config.models.vision_or_fast().clone());
        Self {
            config,
            fast,
            vision,
            facts: Arc::new(DatetimeFacts),
        }
    }

    pub fn with_facts(mut self, facts: Arc<dyn FactProvider>) -> Self {
        self.facts = facts;
        self
    }

    pub fn model_for(&self, needs_vision: bool) -> &ModelHandle {
        if needs_vision {
            &self.vision
        } else {
            &self.fast
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.config.engine.task_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.config.engine.synthesis_timeout_secs)
    }
}
