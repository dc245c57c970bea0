//! Graph construction tests driven by planner-shaped input

use pretty_assertions::assert_eq;
use serde_json::json;
use servicegraph::{
    DependencyGraph, DependencySource, GraphConfig, GraphError, InferencePolicy, ServiceSelection,
};
use std::collections::BTreeMap;

fn position(order: &[String], id: &str) -> usize {
    order.iter().position(|o| o == id).unwrap()
}

/// Planner output arrives as a map of action name to selection
fn from_planner_json(raw: serde_json::Value, config: &GraphConfig) -> DependencyGraph {
    let selections: BTreeMap<String, ServiceSelection> = serde_json::from_value(raw).unwrap();
    let mut graph = DependencyGraph::with_config(config);
    for (name, selection) in selections {
        graph.add_node(name, selection);
    }
    graph
}

#[test]
fn test_planner_map_builds_valid_order() {
    let raw = json!({
        "QueryDatabase": {
            "Action": "QueryDatabase",
            "ActionInput": "monthly revenue by region",
            "Instructions": ""
        },
        "Chart": {
            "Action": "Chart",
            "ActionInput": "{{ Summarize }}",
            "Instructions": "bar chart",
            "DependsOn": ["Summarize"]
        },
        "Summarize": {
            "Action": "Summarize",
            "ActionInput": "{{ QueryDatabase }}",
            "Instructions": "three bullet points",
            "DependsOn": []
        }
    });
    let mut graph = from_planner_json(raw, &GraphConfig::default());
    let order = graph.build_dependency_tree().unwrap().to_vec();

    assert_eq!(order.len(), 3);
    for node in graph.nodes() {
        for dep in node.depends_on() {
            assert!(position(&order, dep) < position(&order, &node.id));
        }
    }
    assert_eq!(
        graph.node("Summarize").unwrap().dependency_source(),
        DependencySource::Inferred
    );
    assert_eq!(
        graph.node("Chart").unwrap().dependency_source(),
        DependencySource::Declared
    );
    assert_eq!(order, vec!["QueryDatabase", "Summarize", "Chart"]);
}

#[test]
fn test_inference_disabled_leaves_nodes_independent() {
    let raw = json!({
        "a": {"Action": "a", "ActionInput": "{{ b }}"},
        "b": {"Action": "b", "ActionInput": "start"}
    });
    let config = GraphConfig {
        inference: InferencePolicy::Disabled,
        ..GraphConfig::default()
    };
    let mut graph = from_planner_json(raw, &config);
    let order = graph.build_dependency_tree().unwrap().to_vec();

    assert_eq!(order, vec!["a", "b"]);
    assert!(graph.dependencies("a").unwrap().is_empty());
}

#[test]
fn test_inferred_cycle_is_rejected() {
    let mut graph = DependencyGraph::new();
    graph.add_node("a", ServiceSelection::new("a").with_input("{{ c }}"));
    graph.add_node("b", ServiceSelection::new("b").with_input("{{ a }}"));
    graph.add_node("c", ServiceSelection::new("c").with_input("{{ b }}"));

    let err = graph.build_dependency_tree().unwrap_err();
    assert_eq!(
        err,
        GraphError::CircularDependency {
            cycle: vec!["a".into(), "c".into(), "b".into(), "a".into()]
        }
    );
    assert!(!graph.is_built());
}

#[test]
fn test_single_node_graph_skips_inference() {
    let mut graph = DependencyGraph::new();
    graph.add_node("only", ServiceSelection::new("only").with_input("{{ only }}"));

    assert_eq!(graph.infer_dependencies(), 0);
    assert_eq!(graph.build_dependency_tree().unwrap(), ["only".to_string()]);
    assert_eq!(
        graph.node("only").unwrap().dependency_source(),
        DependencySource::None
    );
}

#[test]
fn test_inference_runs_once_per_build() {
    let mut graph = DependencyGraph::new();
    graph.add_node("a", ServiceSelection::new("a"));
    graph.add_node("b", ServiceSelection::new("b").with_input("{{ a }}"));

    assert_eq!(graph.infer_dependencies(), 1);
    assert_eq!(graph.infer_dependencies(), 0);
    graph.build_dependency_tree().unwrap();
    assert_eq!(graph.dependencies("b").unwrap(), ["a".to_string()]);
}

#[test]
fn test_diamond_levels() {
    let mut graph = DependencyGraph::new();
    graph.add_node("sink", ServiceSelection::new("s").depends_on(["left", "right"]));
    graph.add_node("right", ServiceSelection::new("s").depends_on(["source"]));
    graph.add_node("left", ServiceSelection::new("s").depends_on(["source"]));
    graph.add_node("source", ServiceSelection::new("s"));
    graph.build_dependency_tree().unwrap();

    assert_eq!(
        graph.execution_order().unwrap(),
        ["source", "right", "left", "sink"].map(String::from)
    );
    assert_eq!(
        graph.execution_levels().unwrap(),
        vec![vec!["source"], vec!["right", "left"], vec!["sink"]]
    );
    assert_eq!(
        graph.transitive_dependents("source").unwrap(),
        vec!["sink", "right", "left"]
    );
}

#[test]
fn test_dangling_inferred_names_are_never_produced() {
    // Inference only matches ids present in the graph, so an unknown
    // placeholder leaves the node dependency free
    let mut graph = DependencyGraph::new();
    graph.add_node("a", ServiceSelection::new("a").with_input("{{ ghost }}"));
    graph.add_node("b", ServiceSelection::new("b"));
    graph.build_dependency_tree().unwrap();
    assert!(graph.dependencies("a").unwrap().is_empty());

    graph.add_node("c", ServiceSelection::new("c").depends_on(["ghost"]));
    assert_eq!(
        graph.build_dependency_tree().unwrap_err(),
        GraphError::DanglingDependency {
            node: "c".into(),
            dependency: "ghost".into()
        }
    );
}
