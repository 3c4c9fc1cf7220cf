use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved task name for the terminal error notification of a failed stream.
pub const ERROR_TASK_NAME: &str = "error";

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    /// Base64-encoded media payload.
    #[serde(rename = "image")]
    Image { media_type: String, data: String },

    #[serde(rename = "thinking")]
    Thinking { thinking: String },
}

impl ContentBlock {
    /// Render an image block as a `data:` URL.
    pub fn data_url(media_type: &str, data: &str) -> String {
        format!("data:{};base64,{}", media_type, data)
    }
}

/// A chat message sent to the capability port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    /// A user message carrying a single media payload.
    pub fn user_image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Image {
                media_type: media_type.into(),
                data: data.into(),
            }],
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// A chunk of thinking/reasoning content.
    ThinkingDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Message ID from the API.
    MessageId(String),
}

/// Kind of a required input field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// A date/time value rendered through a `FactProvider`.
    Datetime,
    /// A base64 media payload; requires the vision model.
    Image,
    /// Plain text; also the fallback for unrecognized kinds.
    #[default]
    #[serde(other)]
    Text,
}

/// One required-input field of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub field_id: String,
    #[serde(rename = "field_type", alias = "kind", default)]
    pub kind: FieldKind,
    #[serde(rename = "field_name", alias = "label", default)]
    pub label: String,
}

impl FieldSpec {
    pub fn new(field_id: impl Into<String>, kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            kind,
            label: label.into(),
        }
    }
}

fn default_icon() -> String {
    "🔮".to_string()
}

/// Immutable description of one fan-out analyzer task.
///
/// Field names follow the catalog format (`name`, `prompt`, `required_fields`);
/// the descriptive names are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    pub id: String,
    #[serde(rename = "name", alias = "display_name")]
    pub display_name: String,
    #[serde(rename = "prompt", alias = "system_prompt", default)]
    pub system_prompt: String,
    #[serde(rename = "required_fields", alias = "context_spec", default)]
    pub context_spec: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(default = "default_icon")]
    pub icon: String,
}

impl TaskDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            system_prompt: system_prompt.into(),
            context_spec: vec![],
            skills: None,
            icon: default_icon(),
        }
    }

    /// Append a required field.
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.context_spec.push(field);
        self
    }

    pub fn with_skills(mut self, skills: impl Into<String>) -> Self {
        self.skills = Some(skills.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Whether any required field needs the media-capable model.
    pub fn needs_vision(&self) -> bool {
        self.context_spec.iter().any(|f| f.kind == FieldKind::Image)
    }
}

/// Per-run input: task id → field id → value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RunInput {
    values: HashMap<String, HashMap<String, String>>,
}

impl RunInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, HashMap<String, String>>) -> Self {
        Self { values }
    }

    pub fn insert(
        &mut self,
        task_id: impl Into<String>,
        field_id: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.values
            .entry(task_id.into())
            .or_default()
            .insert(field_id.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(
        mut self,
        task_id: impl Into<String>,
        field_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert(task_id, field_id, value);
        self
    }

    pub fn get(&self, task_id: &str, field_id: &str) -> Option<&str> {
        self.values
            .get(task_id)
            .and_then(|fields| fields.get(field_id))
            .map(String::as_str)
    }

    /// The field map projected for one task.
    pub fn task(&self, task_id: &str) -> Option<&HashMap<String, String>> {
        self.values.get(task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One unit of produced output, tagged with the producing task's name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub task_name: String,
    pub content: String,
}

impl Chunk {
    pub fn new(task_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            content: content.into(),
        }
    }
}

/// One external result notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub task_name: String,
    pub content: String,
}

impl Notification {
    pub fn new(task_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            content: content.into(),
        }
    }

    /// Terminal error notification under the reserved name.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR_TASK_NAME, message)
    }

    pub fn is_error(&self) -> bool {
        self.task_name == ERROR_TASK_NAME
    }

    /// Encode as a server-sent-events frame.
    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({ "task_name": self.task_name, "content": self.content }).to_string()
        })
    }
}

impl From<Chunk> for Notification {
    fn from(chunk: Chunk) -> Self {
        Self {
            task_name: chunk.task_name,
            content: chunk.content,
        }
    }
}

/// A task that failed or timed out inside a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub task_name: String,
    pub reason: String,
}

/// Immutable view of a run's state, published on graph completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub outputs: HashMap<String, String>,
    pub chunks: Vec<Chunk>,
    pub failures: Vec<TaskFailure>,
    pub final_result: Option<String>,
}

impl RunSnapshot {
    pub fn output(&self, task_name: &str) -> Option<&str> {
        self.outputs.get(task_name).map(String::as_str)
    }

    pub fn failed(&self, task_name: &str) -> bool {
        self.failures.iter().any(|f| f.task_name == task_name)
    }
}

/// Lifecycle event published on a run's event bus.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A node began executing.
    NodeStarted { run_id: RunId, node: String },
    /// A node finished; carries the chunk it appended, if any.
    NodeFinished {
        run_id: RunId,
        node: String,
        chunk: Option<Chunk>,
    },
    /// The whole graph finished; carries the full run state.
    GraphFinished {
        run_id: RunId,
        snapshot: Arc<RunSnapshot>,
    },
}

impl LifecycleEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::NodeStarted { run_id, .. }
            | Self::NodeFinished { run_id, .. }
            | Self::GraphFinished { run_id, .. } => run_id,
        }
    }

    /// Short event kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeStarted { .. } => "node_started",
            Self::NodeFinished { .. } => "node_finished",
            Self::GraphFinished { .. } => "graph_finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_catalog_json() {
        let json = r#"{
            "id": "a1",
            "name": "Palm Reader",
            "prompt": "You read palms.",
            "required_fields": [
                {"field_id": "palm", "field_type": "image", "field_name": "Palm photo"},
                {"field_id": "born", "field_type": "datetime", "field_name": "Birth time"},
                {"field_id": "note", "field_type": "textarea", "field_name": "Note"}
            ]
        }"#;
        let d: TaskDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.display_name, "Palm Reader");
        assert_eq!(d.system_prompt, "You read palms.");
        assert_eq!(d.context_spec.len(), 3);
        assert_eq!(d.context_spec[0].kind, FieldKind::Image);
        assert_eq!(d.context_spec[1].kind, FieldKind::Datetime);
        // Unknown kinds fall back to text
        assert_eq!(d.context_spec[2].kind, FieldKind::Text);
        assert_eq!(d.icon, "🔮");
        assert!(d.needs_vision());
    }

    #[test]
    fn test_descriptor_accepts_descriptive_aliases() {
        let json = r#"{"id": "b", "display_name": "B", "system_prompt": "p", "context_spec": []}"#;
        let d: TaskDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.display_name, "B");
        assert_eq!(d.system_prompt, "p");
        assert!(!d.needs_vision());
    }

    #[test]
    fn test_run_input_lookup() {
        let input = RunInput::new()
            .with("a", "name", "Ada")
            .with("a", "born", "1990-01-01 08:30")
            .with("b", "name", "Bo");

        assert_eq!(input.get("a", "name"), Some("Ada"));
        assert_eq!(input.get("b", "born"), None);
        assert_eq!(input.get("c", "name"), None);
        assert_eq!(input.task("a").map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_run_input_json_shape() {
        let input: RunInput =
            serde_json::from_str(r#"{"a": {"q": "why?"}}"#).unwrap();
        assert_eq!(input.get("a", "q"), Some("why?"));
    }

    #[test]
    fn test_message_text_skips_images() {
        let msg = ChatMessage {
            role: Role::User,
            content: vec![
                ContentBlock::Text { text: "a".into() },
                ContentBlock::Image {
                    media_type: "image/png".into(),
                    data: "xyz".into(),
                },
                ContentBlock::Text { text: "b".into() },
            ],
            timestamp: None,
        };
        assert_eq!(msg.text(), "ab");
        assert!(msg.has_image());
    }

    #[test]
    fn test_notification_encoding() {
        let n = Notification::new("Expert A", "report-A");
        assert_eq!(
            n.to_sse_frame(),
            "data: {\"task_name\":\"Expert A\",\"content\":\"report-A\"}\n\n"
        );
        assert!(!n.is_error());
        assert!(Notification::error("boom").is_error());
    }
}
