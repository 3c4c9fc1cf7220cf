use std::collections::HashSet;
use std::sync::Arc;

use conclave_core::config::EngineConfig;
use conclave_core::error::{ConclaveError, Result};
use conclave_core::types::{TaskDescriptor, ERROR_TASK_NAME};

use super::collect::CollectNode;
use super::edge::Edge;
use super::node::TaskNode;

/// A validated fan-out/fan-in plan: `Start → every task → Collect → End`.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    tasks: Vec<TaskNode>,
    collect: CollectNode,
    edges: Vec<Edge>,
}

impl ExecutionPlan {
    /// Build a plan from an ordered descriptor list.
    ///
    /// Fails with `Configuration` before anything runs if the list is
    /// empty, if ids or display names repeat, or if a display name
    /// collides with the combined marker or the reserved error name. An
    /// engine config that fails its own validation is rejected the same way.
    pub fn build(descriptors: Vec<TaskDescriptor>, engine: &EngineConfig) -> Result<Self> {
        engine.validate().map_err(|e| match e {
            ConclaveError::Config(msg) => ConclaveError::Configuration(msg),
            other => other,
        })?;
        if descriptors.is_empty() {
            return Err(ConclaveError::Configuration("task list is empty".into()));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for d in &descriptors {
            if !ids.insert(d.id.as_str()) {
                return Err(ConclaveError::Configuration(format!(
                    "duplicate task id '{}'",
                    d.id
                )));
            }
            if !names.insert(d.display_name.as_str()) {
                return Err(ConclaveError::Configuration(format!(
                    "duplicate task name '{}'",
                    d.display_name
                )));
            }
            if d.display_name.contains(&engine.combined_marker) {
                return Err(ConclaveError::Configuration(format!(
                    "task name '{}' contains the reserved marker '{}'",
                    d.display_name, engine.combined_marker
                )));
            }
            if d.display_name == ERROR_TASK_NAME {
                return Err(ConclaveError::Configuration(format!(
                    "task name '{}' is reserved",
                    ERROR_TASK_NAME
                )));
            }
        }

        let mut edges = Vec::with_capacity(descriptors.len() * 2 + 1);
        edges.extend(descriptors.iter().map(|d| Edge::fan_out(&d.id)));
        edges.extend(descriptors.iter().map(|d| Edge::fan_in(&d.id)));
        edges.push(Edge::finish());

        let tasks = descriptors
            .into_iter()
            .map(|d| TaskNode::new(Arc::new(d)))
            .collect();

        Ok(Self {
            tasks,
            collect: CollectNode::new(&engine.combined_name),
            edges,
        })
    }

    /// Fan-out nodes in declaration order.
    pub fn fan_out(&self) -> &[TaskNode] {
        &self.tasks
    }

    pub fn collect(&self) -> &CollectNode {
        &self.collect
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Display names in declaration order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(TaskNode::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge::Endpoint;

    fn descriptors(n: usize) -> Vec<TaskDescriptor> {
        (0..n)
            .map(|i| TaskDescriptor::new(format!("t{i}"), format!("Expert {i}"), "p"))
            .collect()
    }

    #[test]
    fn test_empty_list_is_configuration_error() {
        let err = ExecutionPlan::build(vec![], &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ConclaveError::Configuration(_)));
    }

    #[test]
    fn test_fan_out_fan_in_topology() {
        let plan = ExecutionPlan::build(descriptors(3), &EngineConfig::default()).unwrap();
        assert_eq!(plan.fan_out().len(), 3);
        assert_eq!(plan.task_names(), vec!["Expert 0", "Expert 1", "Expert 2"]);
        assert_eq!(plan.collect().name(), "Combined Report");

        let edges = plan.edges();
        assert_eq!(edges.len(), 7);
        for i in 0..3 {
            let id = format!("t{i}");
            assert!(edges.contains(&Edge::new(Endpoint::Start, Endpoint::Task(id.clone()))));
            assert!(edges.contains(&Edge::new(Endpoint::Task(id), Endpoint::Collect)));
        }
        assert_eq!(edges.last(), Some(&Edge::finish()));
    }

    #[test]
    fn test_empty_marker_rejected() {
        let engine = EngineConfig {
            combined_marker: String::new(),
            ..Default::default()
        };
        let err = ExecutionPlan::build(descriptors(2), &engine).unwrap_err();
        assert!(matches!(err, ConclaveError::Configuration(ref m) if m.contains("combined_marker")));
    }

    #[test]
    fn test_marker_missing_from_combined_name_rejected() {
        let engine = EngineConfig {
            combined_name: "Summary".into(),
            ..Default::default()
        };
        let err = ExecutionPlan::build(descriptors(2), &engine).unwrap_err();
        assert!(matches!(err, ConclaveError::Configuration(ref m) if m.contains("Summary")));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut list = descriptors(2);
        list[1].id = "t0".into();
        assert!(ExecutionPlan::build(list, &EngineConfig::default()).is_err());

        let mut list = descriptors(2);
        list[1].display_name = "Expert 0".into();
        assert!(ExecutionPlan::build(list, &EngineConfig::default()).is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut list = descriptors(1);
        list[0].display_name = "Combined view".into();
        assert!(ExecutionPlan::build(list, &EngineConfig::default()).is_err());

        let mut list = descriptors(1);
        list[0].display_name = "error".into();
        assert!(ExecutionPlan::build(list, &EngineConfig::default()).is_err());
    }
}
