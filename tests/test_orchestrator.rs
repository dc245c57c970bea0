//! Orchestrator flow tests with a scripted planner

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use servicegraph::{
    EchoService, FnService, GraphError, InMemoryHistory, NodeStatus, Orchestrator,
    OrchestratorConfig, OrchestratorError, PlanRequest, Planner, PromptAssessment, Response,
    ServiceCatalog, ServiceDefinition, ServiceRegistry, ServiceRequest, ServiceSelection,
};
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};

/// Planner whose answers are fixed up front; records what it was asked
#[derive(Default)]
struct ScriptedPlanner {
    assessments: Mutex<Vec<PromptAssessment>>,
    summary: String,
    selections: Vec<ServiceSelection>,
    fail_selection: bool,
    asked: Mutex<Vec<String>>,
    plan_requests: Mutex<Vec<PlanRequest>>,
}

impl ScriptedPlanner {
    fn clear(selections: Vec<ServiceSelection>) -> Self {
        Self {
            assessments: Mutex::new(vec![PromptAssessment::clear("refined query")]),
            selections,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn assess_prompt(&self, prompt: &str, _catalog: &str) -> anyhow::Result<PromptAssessment> {
        self.asked.lock().unwrap().push(prompt.to_string());
        let mut assessments = self.assessments.lock().unwrap();
        if assessments.is_empty() {
            anyhow::bail!("no scripted assessment left");
        }
        Ok(assessments.remove(0))
    }

    async fn summarize_prompts(&self, _prompt: &str, history: &str) -> anyhow::Result<String> {
        Ok(format!("{} [{}]", self.summary, history.replace('\n', " | ")))
    }

    async fn select_services(
        &self,
        request: &PlanRequest,
        _catalog: &str,
    ) -> anyhow::Result<Vec<ServiceSelection>> {
        self.plan_requests.lock().unwrap().push(request.clone());
        if self.fail_selection {
            anyhow::bail!("model unavailable");
        }
        Ok(self.selections.clone())
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        services: ServiceCatalog::new(vec![
            ServiceDefinition::new("QueryDatabase", "Run SQL against the warehouse")
                .with_io("a question", "rows"),
            ServiceDefinition::new("Summarize", "Summarize text").with_io("text", "summary"),
        ]),
        ..OrchestratorConfig::default()
    }
}

fn registry() -> ServiceRegistry {
    let summarize = FnService::new("Summarize", |req: ServiceRequest| async move {
        let rows: Vec<i64> = req.upstream_output("QueryDatabase")?;
        Ok::<Value, anyhow::Error>(json!(format!("{} rows, total {}", rows.len(), rows.iter().sum::<i64>())))
    });
    ServiceRegistry::new()
        .with_service(Arc::new(EchoService::new("QueryDatabase")))
        .with_service(Arc::new(summarize))
}

#[tokio::test]
async fn test_help_lists_catalog() {
    let planner = Arc::new(ScriptedPlanner::default());
    let orchestrator = Orchestrator::new(config(), registry(), planner.clone());

    match orchestrator.run("HELP").await.unwrap() {
        Response::Help(text) => {
            assert!(text.contains("QueryDatabase: Run SQL against the warehouse"));
            assert!(text.contains("Summarize: Summarize text"));
        }
        other => panic!("unexpected response {:?}", other),
    }
    assert!(planner.asked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unclear_prompt_without_history() {
    let planner = Arc::new(ScriptedPlanner {
        assessments: Mutex::new(vec![PromptAssessment::unclear("Which region?")]),
        ..ScriptedPlanner::default()
    });
    let orchestrator = Orchestrator::new(config(), registry(), planner.clone());

    let response = orchestrator.run("revenue").await.unwrap();
    assert_eq!(response, Response::Clarification("Which region?".into()));
    assert_eq!(planner.asked.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_clarifies_prompt() {
    let planner = Arc::new(ScriptedPlanner {
        assessments: Mutex::new(vec![
            PromptAssessment::unclear("Which region?"),
            PromptAssessment::clear("revenue for EMEA"),
        ]),
        summary: "revenue for EMEA".into(),
        selections: vec![ServiceSelection::new("QueryDatabase").with_input(json!([1, 2, 3]))],
        ..ScriptedPlanner::default()
    });
    let history = Arc::new(InMemoryHistory::with_prompts(["show EMEA", "show EMEA"]));
    let orchestrator =
        Orchestrator::new(config(), registry(), planner.clone()).with_history(history);

    let response = orchestrator.run("and revenue?").await.unwrap();
    let Response::Executed(result) = response else {
        panic!("expected execution");
    };
    assert_eq!(result.output("QueryDatabase"), Some(&json!([1, 2, 3])));

    // Lookback of two covers the repeated prompt and the current one
    let asked = planner.asked.lock().unwrap().clone();
    assert_eq!(
        asked,
        vec![
            "and revenue?".to_string(),
            "revenue for EMEA [show EMEA | and revenue?]\nand revenue?".to_string()
        ]
    );
    let plan = planner.plan_requests.lock().unwrap()[0].clone();
    assert_eq!(plan.refined, "revenue for EMEA");
    assert_eq!(plan.original, "and revenue?");
}

#[tokio::test]
async fn test_no_services_selected() {
    let planner = Arc::new(ScriptedPlanner::clear(Vec::new()));
    let orchestrator = Orchestrator::new(config(), registry(), planner);
    assert_eq!(orchestrator.run("anything").await.unwrap(), Response::NoServices);
}

#[tokio::test]
async fn test_selected_services_execute_in_dependency_order() {
    let planner = Arc::new(ScriptedPlanner::clear(vec![
        ServiceSelection::new("Summarize")
            .with_input("{{ QueryDatabase }}")
            .with_instructions("one line"),
        ServiceSelection::new("QueryDatabase").with_input(json!([4, 5])),
    ]));
    let orchestrator = Orchestrator::new(config(), registry(), planner);

    let Response::Executed(result) = orchestrator.run("summarize sales").await.unwrap() else {
        panic!("expected execution");
    };
    assert_eq!(result.order, vec!["QueryDatabase", "Summarize"]);
    assert_eq!(result.output("Summarize"), Some(&json!("2 rows, total 9")));
    assert_eq!(result.status("QueryDatabase"), Some(NodeStatus::Done));
}

#[tokio::test]
async fn test_graph_errors_are_returned() {
    let planner = Arc::new(ScriptedPlanner::clear(vec![
        ServiceSelection::new("Summarize").depends_on(["QueryDatabase"]),
        ServiceSelection::new("QueryDatabase").depends_on(["Summarize"]),
    ]));
    let orchestrator = Orchestrator::new(config(), registry(), planner);

    let err = orchestrator.run("loop").await.unwrap_err();
    assert!(err.is_construction_error());
    assert!(matches!(
        err,
        OrchestratorError::Graph(GraphError::CircularDependency { .. })
    ));
}

#[tokio::test]
async fn test_planner_failure_is_wrapped() {
    let planner = Arc::new(ScriptedPlanner {
        fail_selection: true,
        ..ScriptedPlanner::clear(Vec::new())
    });
    let orchestrator = Orchestrator::new(config(), registry(), planner);

    let err = orchestrator.run("anything").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Planner error during service selection: model unavailable"
    );
}

#[tokio::test]
async fn test_hints_reach_service_selection() {
    let planner = Arc::new(ScriptedPlanner::clear(vec![
        ServiceSelection::new("QueryDatabase").with_input(json!([1])),
    ]));
    let orchestrator = Orchestrator::new(config(), registry(), planner.clone());

    orchestrator
        .run("monthly revenue [[use the sales schema]] [[exclude refunds]]")
        .await
        .unwrap();

    assert_eq!(
        planner.asked.lock().unwrap().clone(),
        vec!["monthly revenue".to_string()]
    );
    let plan = planner.plan_requests.lock().unwrap()[0].clone();
    assert_eq!(plan.original, "monthly revenue");
    assert_eq!(plan.hints, vec!["use the sales schema", "exclude refunds"]);
}

#[tokio::test]
async fn test_stale_history_is_not_consulted() {
    let planner = Arc::new(ScriptedPlanner {
        assessments: Mutex::new(vec![
            PromptAssessment::unclear("Which region?"),
            PromptAssessment::unclear("Still unclear"),
        ]),
        summary: "revenue".into(),
        ..ScriptedPlanner::default()
    });
    let history = Arc::new(InMemoryHistory::new());
    history
        .record_at("show EMEA", Utc::now() - Duration::minutes(10))
        .await;

    let config = OrchestratorConfig {
        history_lookback: 5,
        history_window_secs: 300,
        ..config()
    };
    let orchestrator = Orchestrator::new(config, registry(), planner.clone()).with_history(history);

    let response = orchestrator.run("and revenue?").await.unwrap();
    assert_eq!(response, Response::Clarification("Still unclear".into()));

    let asked = planner.asked.lock().unwrap().clone();
    assert_eq!(
        asked,
        vec![
            "and revenue?".to_string(),
            "revenue [and revenue?]\nand revenue?".to_string()
        ]
    );
}
