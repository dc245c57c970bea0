//! The dependency graph of one request.
//!
//! Nodes are added in any order, then `build_dependency_tree` validates the
//! depends-on relation and fixes a deterministic topological order. Edges in
//! the underlying `DiGraph` point from a dependency to its dependents, and node
//! indices follow insertion order.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::coord::registry::ServiceRegistry;
use crate::core::config::{DuplicatePolicy, ExecutionConfig, GraphConfig, InferencePolicy};
use crate::core::errors::GraphError;
use crate::dag_flow::executor::{ExecutionResult, Executor};
use crate::dag_flow::inference::infer_dependencies;
use crate::dag_flow::node::{DependencySource, Node, NodeStatus, ServiceSelection};

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
    insertion: Vec<String>,
    inference: InferencePolicy,
    duplicate_policy: DuplicatePolicy,
    duplicates: Vec<String>,
    inference_applied: bool,
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    order: Option<Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &GraphConfig) -> Self {
        Self {
            inference: config.inference,
            duplicate_policy: config.duplicate_nodes,
            ..Self::default()
        }
    }

    /// Add or replace a node. Never fails; forward references are allowed
    /// and validated at build time.
    pub fn add_node(&mut self, name: impl Into<String>, selection: ServiceSelection) {
        let name = name.into();
        let node = Node::from_selection(name.clone(), selection);

        if node.dependency_source() == DependencySource::Declared {
            for dep in node.depends_on() {
                debug!(node = %name, dependency = %dep, "Declared dependency");
            }
        }

        match self.nodes.insert(name.clone(), node) {
            Some(_) => {
                warn!(node = %name, "Node added twice, replacing earlier definition");
                if self.duplicate_policy == DuplicatePolicy::Reject && !self.duplicates.contains(&name) {
                    self.duplicates.push(name);
                }
            }
            None => self.insertion.push(name),
        }

        self.invalidate();
    }

    fn invalidate(&mut self) {
        if self.inference_applied {
            for node in self.nodes.values_mut() {
                node.clear_inferred();
            }
            self.inference_applied = false;
        }
        self.order = None;
        self.graph = DiGraph::new();
        self.indices.clear();
    }

    /// Fill in dependencies for nodes that declared none. Runs at most once
    /// per build; returns the number of nodes that received inferred edges.
    pub fn infer_dependencies(&mut self) -> usize {
        if self.inference_applied {
            return 0;
        }
        self.inference_applied = true;
        if self.insertion.len() < 2 {
            return 0;
        }

        let mut inferred = 0;
        for id in &self.insertion {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if node.dependency_source() == DependencySource::Declared {
                continue;
            }
            let deps = infer_dependencies(id, &node.input, &self.insertion, self.inference);
            for dep in &deps {
                warn!(node = %id, dependency = %dep, "Inferred dependency from input text");
            }
            if !deps.is_empty() {
                inferred += 1;
            }
            node.set_inferred(deps);
        }
        inferred
    }

    /// Validate the graph and compute its execution order
    pub fn build_dependency_tree(&mut self) -> Result<&[String], GraphError> {
        self.order = None;
        self.infer_dependencies();

        if let Some(name) = self.duplicates.first() {
            return Err(GraphError::DuplicateNodeName(name.clone()));
        }

        for id in &self.insertion {
            for dep in self.nodes[id].depends_on() {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::DanglingDependency {
                        node: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.detect_cycle()?;

        let mut graph = DiGraph::with_capacity(self.insertion.len(), self.insertion.len());
        let mut indices = HashMap::with_capacity(self.insertion.len());
        for id in &self.insertion {
            indices.insert(id.clone(), graph.add_node(id.clone()));
        }
        for id in &self.insertion {
            for dep in self.nodes[id].depends_on() {
                graph.update_edge(indices[dep], indices[id], ());
            }
        }

        // Kahn's algorithm; the heap pops the lowest insertion position first
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();
        let mut heap: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(pos, _)| Reverse(pos))
            .collect();

        let mut order = Vec::with_capacity(self.insertion.len());
        while let Some(Reverse(pos)) = heap.pop() {
            let idx = NodeIndex::new(pos);
            order.push(graph[idx].clone());
            for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    heap.push(Reverse(dependent.index()));
                }
            }
        }

        if order.len() != self.insertion.len() {
            let remaining: Vec<String> = self
                .insertion
                .iter()
                .filter(|id| !order.contains(*id))
                .cloned()
                .collect();
            return Err(GraphError::CircularDependency { cycle: remaining });
        }

        info!(nodes = order.len(), order = ?order, "Dependency tree built");
        self.graph = graph;
        self.indices = indices;
        self.order = Some(order);
        self.execution_order()
    }

    /// Depth-first walk over dependencies with an explicit stack; the first
    /// back edge found yields the cycle path.
    fn detect_cycle(&self) -> Result<(), GraphError> {
        let position: HashMap<&str, usize> = self
            .insertion
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.as_str(), pos))
            .collect();
        let mut state: HashMap<&str, VisitState> = HashMap::new();
        for root in &self.insertion {
            let root = root.as_str();
            if state.contains_key(root) {
                continue;
            }
            state.insert(root, VisitState::Visiting);
            // (node, its dependencies, next dependency to look at)
            let mut stack: Vec<(&str, Vec<&str>, usize)> =
                vec![(root, self.sorted_dependencies(root, &position), 0)];

            while let Some((id, deps, next)) = stack.last_mut() {
                let id: &str = *id;
                let Some(dep) = deps.get(*next).copied() else {
                    state.insert(id, VisitState::Visited);
                    stack.pop();
                    continue;
                };
                *next += 1;

                match state.get(dep) {
                    Some(VisitState::Visiting) => {
                        let start = stack.iter().position(|(p, _, _)| *p == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(p, _, _)| p.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Err(GraphError::CircularDependency { cycle });
                    }
                    Some(VisitState::Visited) => {}
                    None => {
                        state.insert(dep, VisitState::Visiting);
                        stack.push((dep, self.sorted_dependencies(dep, &position), 0));
                    }
                }
            }
        }
        Ok(())
    }

    fn sorted_dependencies(&self, id: &str, position: &HashMap<&str, usize>) -> Vec<&str> {
        let mut deps: Vec<&str> = self.nodes[id].depends_on().iter().map(String::as_str).collect();
        deps.sort_by_key(|dep| position.get(dep).copied().unwrap_or(usize::MAX));
        deps
    }

    /// Clear the outcome of a previous run from every node
    pub(crate) fn reset_state(&mut self) {
        for node in self.nodes.values_mut() {
            node.reset();
        }
    }

    /// The order computed by the last successful build
    pub fn execution_order(&self) -> Result<&[String], GraphError> {
        self.order.as_deref().ok_or(GraphError::NotBuilt)
    }

    pub fn is_built(&self) -> bool {
        self.order.is_some()
    }

    /// Groups of nodes whose dependencies all lie in earlier groups
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let order = self.execution_order()?;
        let mut level_of: HashMap<&str, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Vec<String>> = Vec::new();

        for id in order {
            let level = self.nodes[id]
                .depends_on()
                .iter()
                .filter_map(|dep| level_of.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id.clone());
        }
        Ok(levels)
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: &str) -> Result<&[String], GraphError> {
        self.nodes
            .get(id)
            .map(Node::depends_on)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Direct dependents of a node, in insertion order
    pub fn dependents(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let idx = self.built_index(id)?;
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        dependents.sort();
        Ok(dependents.into_iter().map(|i| self.graph[i].clone()).collect())
    }

    /// Every node reachable through dependents, in insertion order
    pub fn transitive_dependents(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let start = self.built_index(id)?;
        let mut seen = vec![false; self.graph.node_count()];
        let mut queue = VecDeque::from([start]);

        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    queue.push_back(next);
                }
            }
        }

        Ok(seen
            .iter()
            .enumerate()
            .filter(|(_, reached)| **reached)
            .map(|(pos, _)| self.graph[NodeIndex::new(pos)].clone())
            .collect())
    }

    fn built_index(&self, id: &str) -> Result<NodeIndex, GraphError> {
        if !self.is_built() {
            return Err(GraphError::NotBuilt);
        }
        self.indices
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Graphviz rendering of the built graph, coloured by node status
    pub fn to_dot(&self) -> Result<String, GraphError> {
        let order = self.execution_order()?;

        let mut dot = String::from("digraph ServiceGraph {\n");
        dot.push_str("  graph [rankdir=LR, nodesep=0.5, ranksep=1.0];\n");
        dot.push_str("  node [shape=box, style=\"rounded,filled\", fontname=\"Helvetica\"];\n\n");

        for id in order {
            let node = &self.nodes[id];
            let color = match node.status() {
                NodeStatus::Done => "palegreen",
                NodeStatus::Failed => "lightcoral",
                NodeStatus::Skipped => "lightgrey",
                NodeStatus::Running | NodeStatus::Ready => "lightyellow",
                NodeStatus::Pending => "white",
            };
            dot.push_str(&format!(
                "  \"{}\" [label=\"{}\\n({})\", fillcolor={}];\n",
                escape(id),
                escape(id),
                escape(&node.service),
                color
            ));
        }
        dot.push('\n');
        for edge in self.graph.raw_edges() {
            let style = match self.nodes[&self.graph[edge.target()]].dependency_source() {
                DependencySource::Inferred => " [style=dashed]",
                _ => "",
            };
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\"{};\n",
                escape(&self.graph[edge.source()]),
                escape(&self.graph[edge.target()]),
                style
            ));
        }
        dot.push_str("}\n");
        Ok(dot)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.insertion.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.insertion.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insertion.is_empty()
    }

    /// Run the built graph sequentially with default execution settings
    pub async fn run(&mut self, registry: &ServiceRegistry) -> Result<ExecutionResult, GraphError> {
        let config = ExecutionConfig::default();
        Executor::new(registry, &config).run(self).await
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
