//! Execution graph: a fixed fan-out/fan-in shape.
//!
//! `ExecutionPlan::build` turns an ordered task list into
//! `Start → every TaskNode → CollectNode → End`. The `GraphExecutor` runs
//! all task nodes concurrently, merges their results into the run state
//! as they arrive, then runs the collect node once behind a join barrier.

pub mod collect;
pub mod edge;
pub mod executor;
pub mod node;
pub mod plan;

pub use collect::{CollectNode, CollectOutcome};
pub use edge::{Edge, Endpoint};
pub use executor::GraphExecutor;
pub use node::{NodeOutcome, TaskNode};
pub use plan::ExecutionPlan;
