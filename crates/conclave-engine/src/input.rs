use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use conclave_core::types::{FieldKind, FieldSpec, RunInput, TaskDescriptor};

/// Raw request input shared by all tasks: form values and uploaded files,
/// both keyed by field id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputForm {
    #[serde(default)]
    pub fields: HashMap<String, String>,
    #[serde(skip)]
    pub files: HashMap<String, Vec<u8>>,
}

impl InputForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field_id.into(), value.into());
        self
    }

    pub fn with_file(mut self, field_id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(field_id.into(), bytes.into());
        self
    }

    /// Resolve one field. An uploaded file wins over a form value; image
    /// files become base64, other files lossy UTF-8. Empty values count
    /// as missing.
    fn value_for(&self, field: &FieldSpec) -> Option<String> {
        if let Some(bytes) = self.files.get(&field.field_id) {
            return Some(match field.kind {
                FieldKind::Image => STANDARD.encode(bytes),
                _ => String::from_utf8_lossy(bytes).into_owned(),
            });
        }
        self.fields
            .get(&field.field_id)
            .filter(|v| !v.is_empty())
            .cloned()
    }
}

/// Project a shared form onto each task's required fields.
///
/// Missing fields are logged and skipped; a task that collects no fields
/// gets no entry at all.
pub fn project_input(descriptors: &[TaskDescriptor], form: &InputForm) -> RunInput {
    let mut input = RunInput::new();
    for d in descriptors {
        for field in &d.context_spec {
            match form.value_for(field) {
                Some(value) => input.insert(&d.id, &field.field_id, value),
                None => warn!(
                    task = %d.display_name,
                    field = %field.field_id,
                    label = %field.label,
                    "No value for required field"
                ),
            }
        }
    }
    input
}
