pub mod catalog;
pub mod context;
pub mod engine;
pub mod facts;
pub mod graph;
pub mod input;
pub mod run_log;
pub mod state;
pub mod stream;

pub use catalog::TaskCatalog;
pub use context::{EngineContext, ModelHandle};
pub use engine::Engine;
pub use facts::DatetimeFacts;
pub use graph::{CollectNode, Edge, Endpoint, ExecutionPlan, GraphExecutor, NodeOutcome, TaskNode};
pub use input::{project_input, InputForm};
pub use run_log::RunLogger;
pub use state::RunState;
pub use stream::{RunStream, StreamProcessor};
