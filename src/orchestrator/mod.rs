//! Outer driver: turns a free-form prompt into an executed service graph.
//!
//! `run` answers `help` directly, splits `[[...]]` hints out of the prompt,
//! asks the planner whether the rest is clear (consulting recent prompt
//! history once when it is not), lets the planner select services, builds the
//! dependency graph and executes it.

pub mod planner;

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::coord::hooks::EventHook;
use crate::coord::registry::ServiceRegistry;
use crate::core::config::OrchestratorConfig;
use crate::core::errors::{OrchestratorError, Result};
use crate::dag_flow::executor::{ExecutionResult, Executor};
use crate::dag_flow::graph::DependencyGraph;
use crate::dag_flow::node::ServiceSelection;

pub use planner::{
    extract_hints, InMemoryHistory, PlanRequest, Planner, PromptAssessment, PromptHistory,
};

const HELP_HEADER: &str = "I can answer questions using the following services:\n";

/// What the orchestrator produced for one prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Catalog listing for a `help` prompt
    Help(String),
    /// The prompt is not actionable; planner feedback for the user
    Clarification(String),
    /// The planner selected nothing
    NoServices,
    Executed(ExecutionResult),
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: ServiceRegistry,
    planner: Arc<dyn Planner>,
    history: Option<Arc<dyn PromptHistory>>,
    hooks: Vec<Arc<dyn EventHook>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: ServiceRegistry, planner: Arc<dyn Planner>) -> Self {
        Self {
            config,
            registry,
            planner,
            history: None,
            hooks: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn PromptHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn run(&self, prompt: &str) -> Result<Response> {
        if prompt.trim().eq_ignore_ascii_case("help") {
            return Ok(Response::Help(format!(
                "{}{}",
                HELP_HEADER,
                self.config.services.help_listing()
            )));
        }

        info!(prompt = %prompt, "User query");
        if let Some(history) = &self.history {
            if let Err(e) = history.record(prompt).await {
                error!(error = %e, "Failed to record prompt");
            }
        }

        let (prompt, hints) = extract_hints(prompt);
        if !hints.is_empty() {
            debug!(hints = ?hints, "User hints");
        }

        let catalog = self.config.services.describe();
        let assessment = self.assess_prompt(&prompt, &catalog).await?;
        if !assessment.clear {
            return Ok(Response::Clarification(assessment.feedback));
        }

        let request = PlanRequest {
            original: prompt,
            refined: assessment.query,
            feedback: assessment.feedback,
            hints,
        };
        debug!(refined = %request.refined, "Prompt refined");

        let selections = self
            .planner
            .select_services(&request, &catalog)
            .await
            .map_err(|e| OrchestratorError::planner("service selection", e))?;
        if selections.is_empty() {
            info!("No services selected");
            return Ok(Response::NoServices);
        }

        let mut graph = self.build_graph(selections);
        graph.build_dependency_tree()?;

        let mut executor = Executor::new(&self.registry, &self.config.execution);
        for hook in &self.hooks {
            executor = executor.with_hook(hook.clone());
        }
        let result = executor.run(&mut graph).await?;
        Ok(Response::Executed(result))
    }

    /// Clarity check, retried once with prompt history when unclear
    async fn assess_prompt(&self, prompt: &str, catalog: &str) -> Result<PromptAssessment> {
        let assessment = self
            .planner
            .assess_prompt(prompt, catalog)
            .await
            .map_err(|e| OrchestratorError::planner("clarity check", e))?;
        if assessment.clear {
            return Ok(assessment);
        }
        info!(feedback = %assessment.feedback, "Prompt not clear");

        let Some(history) = &self.history else {
            return Ok(assessment);
        };
        let since = Utc::now() - Duration::seconds(self.config.history_window_secs as i64);
        let recent = match history
            .recent_prompts(self.config.history_lookback, since)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                error!(error = %e, "Error retrieving prompt history");
                return Ok(assessment);
            }
        };

        let mut seen = HashSet::new();
        let unique: Vec<String> = recent
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        if unique.is_empty() {
            info!("No prompt history found");
            return Ok(assessment);
        }

        let joined = unique.join("\n");
        let summary = self
            .planner
            .summarize_prompts(prompt, &joined)
            .await
            .map_err(|e| OrchestratorError::planner("history summary", e))?;
        info!(from = %joined, to = %summary, "Prompt rewritten from history");

        let combined = format!("{}\n{}", summary, prompt);
        self.planner
            .assess_prompt(&combined, catalog)
            .await
            .map_err(|e| OrchestratorError::planner("clarity check", e))
    }

    /// Graph of the selected services keyed by action; later selections of
    /// the same action replace earlier ones
    pub fn build_graph(&self, selections: Vec<ServiceSelection>) -> DependencyGraph {
        let mut graph = DependencyGraph::with_config(&self.config.graph);
        for selection in selections {
            if !self.registry.contains(&selection.action) {
                warn!(service = %selection.action, "Selected service is not registered");
            }
            graph.add_node(selection.action.clone(), selection);
        }
        graph
    }
}
