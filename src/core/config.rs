//! Orchestrator configuration.
//!
//! One explicit configuration value is built at process start and passed by
//! reference into the orchestrator and executor. It can be read from YAML and
//! layered: a project file on top of a core file, with project services
//! replacing core services of the same name.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::errors::{OrchestratorError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Exponential backoff with configurable parameters
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
    /// Linear backoff with fixed delay
    Linear { delay_secs: u64 },
    /// No delay between retries
    Immediate,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_secs: 2,
            max_delay_secs: 60,
            multiplier: 2.0,
        }
    }
}

impl RetryStrategy {
    /// Delay before the retry that follows `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = match self {
            RetryStrategy::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1) as f64;
                let delay = (*initial_delay_secs as f64 * multiplier.powf(exponent)).round() as u64;
                delay.min(*max_delay_secs)
            }
            RetryStrategy::Linear { delay_secs } => *delay_secs,
            RetryStrategy::Immediate => 0,
        };
        Duration::from_secs(secs)
    }
}

/// How nodes are run once the graph is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Run independent nodes concurrently (default: false)
    pub enable_parallel_execution: bool,
    /// Maximum number of nodes in flight when running in parallel
    pub max_parallel_nodes: usize,
    /// Per-invocation timeout; None waits indefinitely
    pub node_timeout_secs: Option<u64>,
    /// Attempts per node, including the first one
    pub max_attempts: u32,
    pub retry_strategy: RetryStrategy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enable_parallel_execution: false,
            max_parallel_nodes: 3,
            node_timeout_secs: None,
            max_attempts: 1,
            retry_strategy: RetryStrategy::default(),
        }
    }
}

/// Which textual references count as an inferred dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferencePolicy {
    Disabled,
    /// `{{ name }}` style placeholders only
    #[default]
    Placeholders,
    /// Placeholders plus bare whole-word mentions of a node name
    Mentions,
}

/// What happens when the planner selects the same node name twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Last write wins; logged as a warning
    #[default]
    Replace,
    /// Fail the build with `DuplicateNodeName`
    Reject,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub inference: InferencePolicy,
    pub duplicate_nodes: DuplicatePolicy,
}

/// Catalog entry describing a service to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub inputs: String,
    #[serde(default)]
    pub outputs: String,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: String::new(),
            outputs: String::new(),
        }
    }

    pub fn with_io(mut self, inputs: impl Into<String>, outputs: impl Into<String>) -> Self {
        self.inputs = inputs.into();
        self.outputs = outputs.into();
        self
    }
}

/// Ordered list of the services the planner may choose from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self { services }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Insert or replace a definition; replacements keep their position
    pub fn upsert(&mut self, definition: ServiceDefinition) {
        match self.services.iter_mut().find(|s| s.name == definition.name) {
            Some(existing) => *existing = definition,
            None => self.services.push(definition),
        }
    }

    /// One line per service, in the form handed to the planner
    pub fn describe(&self) -> String {
        self.services
            .iter()
            .map(|s| {
                format!(
                    "{}: {}. The input for this tool is {}. The output of this tool is {}.",
                    s.name, s.description, s.inputs, s.outputs
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `name: description` lines for the help response
    pub fn help_listing(&self) -> String {
        self.services
            .iter()
            .map(|s| format!("{}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Full orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub execution: ExecutionConfig,
    pub graph: GraphConfig,
    /// Number of previous prompts consulted when a prompt is unclear
    pub history_lookback: usize,
    /// Only prompts recorded within this many seconds count as history
    pub history_window_secs: u64,
    pub services: ServiceCatalog,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            graph: GraphConfig::default(),
            history_lookback: 2,
            history_window_secs: 300,
            services: ServiceCatalog::default(),
        }
    }
}

/// A partial configuration as read from one file. Absent sections leave the
/// underlying values alone when layered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
    pub execution: Option<ExecutionConfig>,
    pub graph: Option<GraphConfig>,
    pub history_lookback: Option<usize>,
    pub history_window_secs: Option<u64>,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

impl ConfigLayer {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::io(format!("read {}", path.display()), e))?;
        let layer = Self::from_yaml_str(&content)?;
        debug!(
            path = %path.display(),
            services = layer.services.len(),
            "Loaded configuration layer"
        );
        Ok(layer)
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply layers in order on top of the defaults
    pub fn from_layers(layers: &[ConfigLayer]) -> Result<Self> {
        layers
            .iter()
            .try_fold(Self::default(), |base, layer| Self::merge(&base, layer))
    }

    /// Load a core file and an optional project file on top of it
    pub fn load_layered(core: impl AsRef<Path>, project: Option<&Path>) -> Result<Self> {
        let mut layers = vec![ConfigLayer::load_yaml_file(core)?];
        if let Some(project) = project {
            layers.push(ConfigLayer::load_yaml_file(project)?);
        }
        let config = Self::from_layers(&layers)?;
        info!(
            services = config.services.len(),
            parallel = config.execution.enable_parallel_execution,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Merges a layer over a base configuration, with the layer taking precedence
    pub fn merge(base: &Self, layer: &ConfigLayer) -> Result<Self> {
        let mut services = base.services.clone();
        for definition in &layer.services {
            services.upsert(definition.clone());
        }

        let merged = Self {
            execution: layer
                .execution
                .clone()
                .unwrap_or_else(|| base.execution.clone()),
            graph: layer.graph.clone().unwrap_or_else(|| base.graph.clone()),
            history_lookback: layer.history_lookback.unwrap_or(base.history_lookback),
            history_window_secs: layer
                .history_window_secs
                .unwrap_or(base.history_window_secs),
            services,
        };

        merged.validate()?;
        Ok(merged)
    }

    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        let execution = &self.execution;
        if execution.max_parallel_nodes == 0 {
            return Err(OrchestratorError::configuration(
                "max_parallel_nodes must be greater than 0",
            ));
        }
        if execution.max_attempts == 0 {
            return Err(OrchestratorError::configuration(
                "max_attempts must be greater than 0",
            ));
        }
        if execution.max_attempts > 10 {
            return Err(OrchestratorError::configuration(
                "max_attempts cannot exceed 10",
            ));
        }
        if let Some(timeout) = execution.node_timeout_secs {
            if timeout == 0 {
                return Err(OrchestratorError::configuration(
                    "node_timeout_secs must be greater than 0",
                ));
            }
            if timeout > 86400 {
                return Err(OrchestratorError::configuration(
                    "node_timeout_secs cannot exceed 24 hours",
                ));
            }
        }
        if let RetryStrategy::Exponential { multiplier, .. } = execution.retry_strategy {
            if multiplier < 1.0 {
                return Err(OrchestratorError::configuration(
                    "retry multiplier must be at least 1.0",
                ));
            }
        }
        if self.history_lookback > 50 {
            return Err(OrchestratorError::configuration(
                "history_lookback cannot exceed 50",
            ));
        }
        if self.history_window_secs == 0 {
            return Err(OrchestratorError::configuration(
                "history_window_secs must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for service in self.services.iter() {
            if service.name.trim().is_empty() {
                return Err(OrchestratorError::configuration(
                    "service name cannot be empty",
                ));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(OrchestratorError::configuration(format!(
                    "service '{}' is defined twice",
                    service.name
                )));
            }
        }

        Ok(())
    }
}
