use thiserror::Error;

/// Errors raised while turning a set of nodes into an executable DAG.
///
/// These are fatal for a request: none of them can occur once a node has
/// started running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node declared a dependency on an id that is not part of the graph
    #[error("Dangling dependency: node '{node}' depends on unknown node '{dependency}'")]
    DanglingDependency { node: String, dependency: String },

    /// The depends-on relation contains a cycle; members listed along the
    /// chain with the first id repeated at the end
    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// The same node name was added twice while duplicates are rejected
    #[error("Duplicate node name: {0}")]
    DuplicateNodeName(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The execution order was requested before a successful build
    #[error("Dependency tree has not been built")]
    NotBuilt,
}

/// Failure of a single node. Localised to that node and its dependents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Service '{service}' is not registered (node '{node_id}')")]
    NotRegistered { node_id: String, service: String },

    #[error("Input resolution failed for node '{node_id}': {message}")]
    InputResolution { node_id: String, message: String },

    #[error("Service '{service}' failed for node '{node_id}': {message}")]
    Invocation {
        node_id: String,
        service: String,
        message: String,
    },

    #[error("Service '{service}' timed out after {timeout_secs}s (node '{node_id}')")]
    Timeout {
        node_id: String,
        service: String,
        timeout_secs: u64,
    },
}

impl ServiceError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Invocation { .. } | Self::Timeout { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotRegistered { .. } => "not_registered",
            Self::InputResolution { .. } => "input_resolution",
            Self::Invocation { .. } => "invocation",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Top-level error type for the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The planner (language model) failed to answer
    #[error("Planner error during {stage}: {source}")]
    Planner {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OrchestratorError {
    pub fn planner<S: Into<String>>(stage: S, source: anyhow::Error) -> Self {
        Self::Planner {
            stage: stage.into(),
            source,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Construction errors abort a request before any node runs
    pub fn is_construction_error(&self) -> bool {
        matches!(self, Self::Graph(_))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_members() {
        let err = GraphError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_dangling_message_names_both_nodes() {
        let err = GraphError::DanglingDependency {
            node: "report".into(),
            dependency: "fetch".into(),
        };
        assert_eq!(
            err.to_string(),
            "Dangling dependency: node 'report' depends on unknown node 'fetch'"
        );
    }

    #[test]
    fn test_retryability() {
        let timeout = ServiceError::Timeout {
            node_id: "n".into(),
            service: "s".into(),
            timeout_secs: 5,
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.category(), "timeout");

        let missing = ServiceError::NotRegistered {
            node_id: "n".into(),
            service: "s".into(),
        };
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_graph_error_converts() {
        let err: OrchestratorError = GraphError::NotBuilt.into();
        assert!(err.is_construction_error());
        assert!(!OrchestratorError::configuration("bad").is_construction_error());
    }
}
