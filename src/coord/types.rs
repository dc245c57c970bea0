//! Event and outcome types shared by the sequential and parallel executors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag_flow::node::NodeStatus;

/// Reference to a node within one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub run_id: String,
    pub node_id: String,
}

impl NodeRef {
    pub fn new(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id: node_id.into(),
        }
    }
}

/// Events that occur during node execution
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    NodeStarted {
        node: NodeRef,
        service: String,
        at: DateTime<Utc>,
    },
    NodeCompleted {
        node: NodeRef,
        output: Value,
        attempts: u32,
        at: DateTime<Utc>,
    },
    NodeFailed {
        node: NodeRef,
        error: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    /// The node was withheld because `failed_dependency` failed
    NodeSkipped {
        node: NodeRef,
        failed_dependency: String,
        at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn node(&self) -> &NodeRef {
        match self {
            Self::NodeStarted { node, .. }
            | Self::NodeCompleted { node, .. }
            | Self::NodeFailed { node, .. }
            | Self::NodeSkipped { node, .. } => node,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NodeStarted { .. } => "started",
            Self::NodeCompleted { .. } => "completed",
            Self::NodeFailed { .. } => "failed",
            Self::NodeSkipped { .. } => "skipped",
        }
    }
}

/// Terminal outcome of a node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Done { output: Value },
    Failed { error: String },
    Skipped { failed_dependency: String },
}

impl NodeOutcome {
    pub fn status(&self) -> NodeStatus {
        match self {
            Self::Done { .. } => NodeStatus::Done,
            Self::Failed { .. } => NodeStatus::Failed,
            Self::Skipped { .. } => NodeStatus::Skipped,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Done { output } => Some(output),
            _ => None,
        }
    }
}
