// Shared infrastructure: error types and configuration

pub mod config;
pub mod errors;

pub use config::{
    ConfigLayer, DuplicatePolicy, ExecutionConfig, GraphConfig, InferencePolicy,
    OrchestratorConfig, RetryStrategy, ServiceCatalog, ServiceDefinition,
};
pub use errors::{GraphError, OrchestratorError, Result, ServiceError};
