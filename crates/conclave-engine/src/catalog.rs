use std::path::Path;

use tracing::debug;

use conclave_core::error::{ConclaveError, Result};
use conclave_core::types::TaskDescriptor;

/// Read-only set of task descriptors loaded from a JSON array.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<TaskDescriptor>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self { tasks }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&content)?;
        debug!(path = %path.display(), tasks = catalog.tasks.len(), "Loaded task catalog");
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn all(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Descriptors for `ids`, in request order.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<TaskDescriptor>> {
        if ids.is_empty() {
            return Err(ConclaveError::Configuration(
                "at least one task must be selected".into(),
            ));
        }
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.get(id)
                    .cloned()
                    .ok_or_else(|| ConclaveError::UnknownTask(id.to_string()))
            })
            .collect()
    }
}
