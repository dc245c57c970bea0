//! The service capability interface.
//!
//! A service reads its request, does its work and returns a JSON output. It
//! never touches the graph; the executor writes results back.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything a service gets for one invocation (immutable, clonable)
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRequest {
    /// Node being executed
    pub node_id: String,
    /// Input after dependency outputs were substituted
    pub input: Value,
    /// Planner instructions, unmodified
    pub instructions: String,
    /// Raw outputs of the node's dependencies, keyed by node id
    pub upstream: BTreeMap<String, Value>,
}

impl ServiceRequest {
    pub fn new(node_id: impl Into<String>, input: Value) -> Self {
        Self {
            node_id: node_id.into(),
            input,
            instructions: String::new(),
            upstream: BTreeMap::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_upstream(mut self, upstream: BTreeMap<String, Value>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Get input value by key
    pub fn get_input<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .input
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Input '{}' not found", key))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to deserialize input '{}': {}", key, e))
    }

    /// Get optional input value
    pub fn get_input_opt<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> anyhow::Result<Option<T>> {
        match self.input.get(key) {
            Some(value) if !value.is_null() => {
                let parsed = serde_json::from_value(value.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to deserialize input '{}': {}", key, e))?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }

    /// The input as free text; structured inputs are rendered as JSON
    pub fn input_text(&self) -> String {
        match &self.input {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Output of a dependency, deserialized
    pub fn upstream_output<T: serde::de::DeserializeOwned>(&self, node_id: &str) -> anyhow::Result<T> {
        let value = self
            .upstream
            .get(node_id)
            .ok_or_else(|| anyhow::anyhow!("No output from dependency '{}'", node_id))?;
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("Failed to deserialize output of '{}': {}", node_id, e))
    }
}

/// A named capability the planner can select
#[async_trait]
pub trait Service: Send + Sync {
    /// Name the service is registered under
    fn name(&self) -> &str;

    async fn invoke(&self, request: &ServiceRequest) -> anyhow::Result<Value>;
}

/// Returns its resolved input unchanged
pub struct EchoService {
    name: String,
}

impl EchoService {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Service for EchoService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &ServiceRequest) -> anyhow::Result<Value> {
        tracing::debug!(node_id = %request.node_id, service = %self.name, "Echoing input");
        Ok(request.input.clone())
    }
}
