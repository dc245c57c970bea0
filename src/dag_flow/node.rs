//! Planned units of work and the planner's selection format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    /// Every dependency is done
    Ready,
    Running,
    Done,
    Failed,
    /// Withheld because a transitive dependency failed
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    /// Dependents of a node in this state can never run
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// Which policy produced a node's `depends_on`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencySource {
    Declared,
    Inferred,
    None,
}

/// One entry of the planner's action map.
///
/// Field names follow the planner's JSON (`Action`, `ActionInput`,
/// `Instructions`, `DependsOn`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSelection {
    pub action: String,
    #[serde(default)]
    pub action_input: Value,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

impl ServiceSelection {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            action_input: Value::Null,
            instructions: String::new(),
            depends_on: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.action_input = input.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = Some(deps.into_iter().map(Into::into).collect());
        self
    }
}

/// A node of the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub service: String,
    pub input: Value,
    pub instructions: String,
    depends_on: Vec<String>,
    dependency_source: DependencySource,
    status: NodeStatus,
    output: Option<Value>,
    error: Option<String>,
    failed_dependency: Option<String>,
}

impl Node {
    /// Build a node from a planner selection. A non-empty `DependsOn` is
    /// authoritative; an absent or empty one leaves room for inference.
    pub fn from_selection(id: impl Into<String>, selection: ServiceSelection) -> Self {
        let mut depends_on: Vec<String> = Vec::new();
        for dep in selection.depends_on.unwrap_or_default() {
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }
        let dependency_source = if depends_on.is_empty() {
            DependencySource::None
        } else {
            DependencySource::Declared
        };

        Self {
            id: id.into(),
            service: selection.action,
            input: selection.action_input,
            instructions: selection.instructions,
            depends_on,
            dependency_source,
            status: NodeStatus::Pending,
            output: None,
            error: None,
            failed_dependency: None,
        }
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn dependency_source(&self) -> DependencySource {
        self.dependency_source
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The upstream node whose failure withheld this one
    pub fn failed_dependency(&self) -> Option<&str> {
        self.failed_dependency.as_deref()
    }

    pub(crate) fn set_inferred(&mut self, deps: Vec<String>) {
        self.dependency_source = if deps.is_empty() {
            DependencySource::None
        } else {
            DependencySource::Inferred
        };
        self.depends_on = deps;
    }

    pub(crate) fn clear_inferred(&mut self) {
        if self.dependency_source == DependencySource::Inferred {
            self.depends_on.clear();
            self.dependency_source = DependencySource::None;
        }
    }

    /// Back to `pending` with no output, error or skip cause
    pub(crate) fn reset(&mut self) {
        self.status = NodeStatus::Pending;
        self.output = None;
        self.error = None;
        self.failed_dependency = None;
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    pub(crate) fn complete(&mut self, output: Value) {
        self.output = Some(output);
        self.error = None;
        self.status = NodeStatus::Done;
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.output = None;
        self.error = Some(error.into());
        self.status = NodeStatus::Failed;
    }

    pub(crate) fn skip(&mut self, failed_dependency: impl Into<String>) {
        self.failed_dependency = Some(failed_dependency.into());
        self.status = NodeStatus::Skipped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selection_parses_planner_json() {
        let raw = json!({
            "Action": "Summarize",
            "ActionInput": "{{ QueryDatabase }}",
            "Instructions": "keep it short",
            "DependsOn": ["QueryDatabase"]
        });
        let selection: ServiceSelection = serde_json::from_value(raw).unwrap();
        assert_eq!(selection.action, "Summarize");
        assert_eq!(selection.depends_on, Some(vec!["QueryDatabase".to_string()]));
    }

    #[test]
    fn test_declared_dependencies_are_deduplicated() {
        let node = Node::from_selection(
            "report",
            ServiceSelection::new("report").depends_on(["b", "a", "b"]),
        );
        assert_eq!(node.depends_on(), ["b".to_string(), "a".to_string()]);
        assert_eq!(node.dependency_source(), DependencySource::Declared);
        assert_eq!(node.status(), NodeStatus::Pending);
    }

    #[test]
    fn test_empty_depends_on_counts_as_absent() {
        let node = Node::from_selection("x", ServiceSelection::new("x").depends_on(Vec::<String>::new()));
        assert_eq!(node.dependency_source(), DependencySource::None);
        assert!(node.depends_on().is_empty());
    }
}
