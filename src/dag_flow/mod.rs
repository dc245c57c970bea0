// Dependency graph construction and execution

pub mod executor;
pub mod function_action;
pub mod graph;
pub mod inference;
pub mod input;
pub mod node;

pub use executor::{ExecutionResult, Executor, NodeResult};
pub use function_action::FnService;
pub use graph::DependencyGraph;
pub use inference::infer_dependencies;
pub use input::resolve_input;
pub use node::{DependencySource, Node, NodeStatus, ServiceSelection};
