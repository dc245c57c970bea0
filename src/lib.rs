//! Builds and executes service dependency graphs planned by a language model.
//!
//! A planner selects services for a prompt; each selection becomes a node of a
//! [`DependencyGraph`], edges come from declared or inferred dependencies, and
//! the [`Executor`] runs the nodes in topological order, threading upstream
//! outputs into downstream inputs.

// Core infrastructure modules
pub mod core;

pub mod coord; // Services, registry, events and parallel coordination
pub mod dag_flow; // Graph construction and execution
pub mod orchestrator; // Prompt-to-graph driver

// Re-exports for convenience
pub use crate::core::config::{
    ConfigLayer, DuplicatePolicy, ExecutionConfig, GraphConfig, InferencePolicy,
    OrchestratorConfig, RetryStrategy, ServiceCatalog, ServiceDefinition,
};
pub use crate::core::errors::{GraphError, OrchestratorError, Result, ServiceError};
pub use coord::{
    CompositeHook, EchoService, EventHook, ExecutionEvent, HookContext, LoggingHook, NodeOutcome,
    NodeRef, Service, ServiceRegistry, ServiceRequest,
};
pub use dag_flow::{
    DependencyGraph, DependencySource, ExecutionResult, Executor, FnService, Node, NodeResult,
    NodeStatus, ServiceSelection,
};
pub use orchestrator::{
    extract_hints, InMemoryHistory, Orchestrator, PlanRequest, Planner, PromptAssessment,
    PromptHistory, Response,
};
