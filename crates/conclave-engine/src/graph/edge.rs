use std::fmt;

use serde::{Deserialize, Serialize};

/// One end of an edge in the execution graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Endpoint {
    /// Virtual entry point.
    Start,
    /// A fan-out task node, by task id.
    Task(String),
    /// The single collect node.
    Collect,
    /// Virtual exit point.
    End,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Task(id) => write!(f, "task:{}", id),
            Self::Collect => write!(f, "collect"),
            Self::End => write!(f, "end"),
        }
    }
}

/// An unconditional edge. The graph is a fixed fan-out/fan-in shape, so
/// edges carry no conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: Endpoint,
    pub to: Endpoint,
}

impl Edge {
    pub fn new(from: Endpoint, to: Endpoint) -> Self {
        Self { from, to }
    }

    /// `Start → task`.
    pub fn fan_out(task_id: impl Into<String>) -> Self {
        Self::new(Endpoint::Start, Endpoint::Task(task_id.into()))
    }

    /// `task → Collect`.
    pub fn fan_in(task_id: impl Into<String>) -> Self {
        Self::new(Endpoint::Task(task_id.into()), Endpoint::Collect)
    }

    /// `Collect → End`.
    pub fn finish() -> Self {
        Self::new(Endpoint::Collect, Endpoint::End)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_constructors() {
        assert_eq!(
            Edge::fan_out("a"),
            Edge::new(Endpoint::Start, Endpoint::Task("a".into()))
        );
        assert_eq!(Edge::fan_in("a").to, Endpoint::Collect);
        assert_eq!(Edge::finish().to_string(), "collect -> end");
    }

    #[test]
    fn test_edge_serialization() {
        let json = serde_json::to_value(Edge::fan_out("a")).unwrap();
        assert_eq!(json["from"]["type"], "start");
        assert_eq!(json["to"]["type"], "task");
        assert_eq!(json["to"]["id"], "a");
    }
}
