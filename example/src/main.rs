use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use servicegraph::{
    EchoService, FnService, LoggingHook, Orchestrator, OrchestratorConfig, PlanRequest, Planner,
    PromptAssessment, Response, ServiceCatalog, ServiceDefinition, ServiceRegistry,
    ServiceRequest, ServiceSelection,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stand-in for a language model: every prompt is clear and always maps to
/// the same three-step plan.
struct FixedPlanner;

#[async_trait]
impl Planner for FixedPlanner {
    async fn assess_prompt(&self, prompt: &str, _catalog: &str) -> Result<PromptAssessment> {
        if prompt.trim().is_empty() {
            return Ok(PromptAssessment::unclear("Please describe what you need."));
        }
        Ok(PromptAssessment::clear(prompt))
    }

    async fn summarize_prompts(&self, prompt: &str, _history: &str) -> Result<String> {
        Ok(prompt.to_string())
    }

    async fn select_services(
        &self,
        request: &PlanRequest,
        _catalog: &str,
    ) -> Result<Vec<ServiceSelection>> {
        Ok(vec![
            ServiceSelection::new("Report")
                .with_input("Report for '{{ Fetch.query }}': {{ Transform }}")
                .with_instructions("plain text"),
            ServiceSelection::new("Transform")
                .with_input(json!({"values": "{{ Fetch.values }}"}))
                .depends_on(["Fetch"]),
            ServiceSelection::new("Fetch")
                .with_input(json!({"query": request.refined, "values": [3, 1, 4, 1, 5]})),
        ])
    }
}

fn registry() -> ServiceRegistry {
    let transform = FnService::new("Transform", |req: ServiceRequest| async move {
        let values: Vec<f64> = req.get_input("values")?;
        if values.is_empty() {
            return Err(anyhow!("nothing to transform"));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Ok::<Value, anyhow::Error>(json!(format!("mean {:.2} over {} values", mean, values.len())))
    });

    ServiceRegistry::new()
        .with_service(Arc::new(EchoService::new("Fetch")))
        .with_service(Arc::new(transform))
        .with_service(Arc::new(EchoService::new("Report")))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = OrchestratorConfig {
        services: ServiceCatalog::new(vec![
            ServiceDefinition::new("Fetch", "Load raw values").with_io("a query", "values"),
            ServiceDefinition::new("Transform", "Aggregate values").with_io("values", "a statistic"),
            ServiceDefinition::new("Report", "Write the answer").with_io("text", "text"),
        ]),
        ..OrchestratorConfig::default()
    };
    config.execution.enable_parallel_execution = true;
    config.validate()?;

    let orchestrator = Orchestrator::new(config, registry(), Arc::new(FixedPlanner))
        .with_hook(Arc::new(LoggingHook));

    for prompt in ["help", "average of the latest values"] {
        match orchestrator.run(prompt).await? {
            Response::Help(text) => println!("{}", text),
            Response::Clarification(feedback) => println!("Need more detail: {}", feedback),
            Response::NoServices => println!("No services selected."),
            Response::Executed(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
    }

    Ok(())
}
