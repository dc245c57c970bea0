//! Runs a built dependency graph through a service registry.
//!
//! Nodes run in topological order. A failed node marks every transitive
//! dependent `skipped` before any of them could start; the run itself only
//! errors when the graph was never built.

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::coord::action::{Service, ServiceRequest};
use crate::coord::coordinator::Coordinator;
use crate::coord::hooks::{EventHook, HookContext};
use crate::coord::registry::ServiceRegistry;
use crate::coord::types::{ExecutionEvent, NodeOutcome, NodeRef};
use crate::core::config::ExecutionConfig;
use crate::core::errors::{GraphError, ServiceError};
use crate::dag_flow::graph::DependencyGraph;
use crate::dag_flow::input::resolve_input;
use crate::dag_flow::node::NodeStatus;

/// Result of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResult {
    pub service: String,
    #[serde(flatten)]
    pub outcome: NodeOutcome,
    /// Invocations made; zero for skipped nodes and nodes that failed before invocation
    pub attempts: u32,
}

/// Total result map of a run, covering every node of the graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub order: Vec<String>,
    pub nodes: BTreeMap<String, NodeResult>,
}

impl ExecutionResult {
    pub fn get(&self, node_id: &str) -> Option<&NodeResult> {
        self.nodes.get(node_id)
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(|r| r.outcome.status())
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id).and_then(|r| r.outcome.output())
    }

    /// Every node done
    pub fn is_success(&self) -> bool {
        self.nodes
            .values()
            .all(|r| r.outcome.status() == NodeStatus::Done)
    }

    /// Node ids with the given status, in execution order
    pub fn with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.status(id) == Some(status))
            .map(String::as_str)
            .collect()
    }
}

pub struct Executor<'a> {
    registry: &'a ServiceRegistry,
    config: &'a ExecutionConfig,
    hooks: Vec<Arc<dyn EventHook>>,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a ServiceRegistry, config: &'a ExecutionConfig) -> Self {
        Self {
            registry,
            config,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Execute every node of a built graph
    #[instrument(skip_all, fields(nodes = graph.len(), parallel = self.config.enable_parallel_execution))]
    pub async fn run(&self, graph: &mut DependencyGraph) -> Result<ExecutionResult, GraphError> {
        let order = graph.execution_order()?.to_vec();
        graph.reset_state();
        let run_id = Uuid::new_v4().to_string();
        let ctx = HookContext::new(run_id.clone(), order.len());
        info!(run_id = %run_id, "Executing dependency graph");

        for hook in &self.hooks {
            hook.on_start(&ctx).await;
        }

        let mut attempts: BTreeMap<String, u32> = BTreeMap::new();
        if self.config.enable_parallel_execution && order.len() > 1 {
            Coordinator::new(self.registry, self.config, &self.hooks, &ctx)
                .run_parallel(graph, &mut attempts)
                .await;
        } else {
            let runner = NodeRunner {
                registry: self.registry,
                config: self.config,
                hooks: &self.hooks,
                ctx: &ctx,
            };
            for id in &order {
                if graph.node(id).map_or(true, |n| n.status().is_terminal()) {
                    continue;
                }
                let (result, count) = match runner.start(graph, id).await {
                    Ok((service, request)) => {
                        invoke_with_retry(service, request, self.config.clone()).await
                    }
                    Err(e) => (Err(e), 0),
                };
                attempts.insert(id.clone(), count);
                runner.finish(graph, id, result, count).await;
            }
        }

        let result = collect_result(graph, run_id, order, &attempts);
        let success = result.is_success();
        for hook in &self.hooks {
            hook.on_complete(&ctx, success).await;
        }
        info!(
            run_id = %result.run_id,
            success,
            failed = result.with_status(NodeStatus::Failed).len(),
            skipped = result.with_status(NodeStatus::Skipped).len(),
            "Dependency graph finished"
        );
        Ok(result)
    }
}

/// Per-node steps shared by the sequential loop and the parallel coordinator
pub(crate) struct NodeRunner<'r> {
    pub(crate) registry: &'r ServiceRegistry,
    pub(crate) config: &'r ExecutionConfig,
    pub(crate) hooks: &'r [Arc<dyn EventHook>],
    pub(crate) ctx: &'r HookContext,
}

impl<'r> NodeRunner<'r> {
    /// Move a node to `running` and prepare its invocation
    pub(crate) async fn start(
        &self,
        graph: &mut DependencyGraph,
        id: &str,
    ) -> Result<(Arc<dyn Service>, ServiceRequest), ServiceError> {
        let (service_name, input, instructions, deps) = match graph.node(id) {
            Some(node) => (
                node.service.clone(),
                node.input.clone(),
                node.instructions.clone(),
                node.depends_on().to_vec(),
            ),
            None => {
                return Err(ServiceError::InputResolution {
                    node_id: id.to_string(),
                    message: "node is not part of the graph".to_string(),
                })
            }
        };

        if let Some(node) = graph.node_mut(id) {
            node.set_status(NodeStatus::Ready);
            node.set_status(NodeStatus::Running);
        }
        self.emit(ExecutionEvent::NodeStarted {
            node: NodeRef::new(&self.ctx.run_id, id),
            service: service_name.clone(),
            at: chrono::Utc::now(),
        })
        .await;

        let upstream: BTreeMap<String, Value> = deps
            .iter()
            .filter_map(|dep| {
                graph
                    .node(dep)
                    .and_then(|n| n.output())
                    .map(|out| (dep.clone(), out.clone()))
            })
            .collect();
        let resolved = resolve_input(id, &input, &upstream)?;

        let service = self
            .registry
            .get(&service_name)
            .ok_or_else(|| ServiceError::NotRegistered {
                node_id: id.to_string(),
                service: service_name.clone(),
            })?;

        debug!(node_id = %id, service = %service_name, dependencies = upstream.len(), "Input resolved");
        let request = ServiceRequest::new(id, resolved)
            .with_instructions(instructions)
            .with_upstream(upstream);
        Ok((service, request))
    }

    /// Record a terminal result, skipping dependents on failure
    pub(crate) async fn finish(
        &self,
        graph: &mut DependencyGraph,
        id: &str,
        result: Result<Value, ServiceError>,
        attempts: u32,
    ) {
        let node = NodeRef::new(&self.ctx.run_id, id);
        match result {
            Ok(output) => {
                if let Some(n) = graph.node_mut(id) {
                    n.complete(output.clone());
                }
                self.emit(ExecutionEvent::NodeCompleted {
                    node,
                    output,
                    attempts,
                    at: chrono::Utc::now(),
                })
                .await;
            }
            Err(err) => {
                warn!(node_id = %id, category = err.category(), error = %err, "Node failed");
                let error = err.to_string();
                if let Some(n) = graph.node_mut(id) {
                    n.fail(error.clone());
                }
                self.emit(ExecutionEvent::NodeFailed {
                    node,
                    error,
                    attempts,
                    at: chrono::Utc::now(),
                })
                .await;
                self.skip_dependents(graph, id).await;
            }
        }
    }

    async fn skip_dependents(&self, graph: &mut DependencyGraph, failed: &str) {
        let dependents = graph.transitive_dependents(failed).unwrap_or_default();
        for dependent in dependents {
            let Some(node) = graph.node_mut(&dependent) else {
                continue;
            };
            if node.status().is_terminal() {
                continue;
            }
            node.skip(failed);
            self.emit(ExecutionEvent::NodeSkipped {
                node: NodeRef::new(&self.ctx.run_id, &dependent),
                failed_dependency: failed.to_string(),
                at: chrono::Utc::now(),
            })
            .await;
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        for hook in self.hooks {
            hook.handle(self.ctx, &event).await;
        }
    }
}

/// Invoke a service with the configured timeout and retry policy.
///
/// Returns the final result and the number of attempts made. Panics inside
/// the service are reported as invocation failures.
#[instrument(skip_all, fields(node_id = %request.node_id, service = %service.name()))]
pub(crate) async fn invoke_with_retry(
    service: Arc<dyn Service>,
    request: ServiceRequest,
    config: ExecutionConfig,
) -> (Result<Value, ServiceError>, u32) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(attempt, max_attempts, "Invoking service");
        let result = invoke_once(service.as_ref(), &request, config.node_timeout_secs).await;

        match result {
            Ok(output) => return (Ok(output), attempt),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = config.retry_strategy.delay_for(attempt);
                warn!(attempt, delay_secs = delay.as_secs(), error = %err, "Attempt failed, retrying");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) => return (Err(err), attempt),
        }
    }
}

async fn invoke_once(
    service: &dyn Service,
    request: &ServiceRequest,
    timeout_secs: Option<u64>,
) -> Result<Value, ServiceError> {
    let invocation = AssertUnwindSafe(service.invoke(request)).catch_unwind();
    let outcome = match timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), invocation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(ServiceError::Timeout {
                    node_id: request.node_id.clone(),
                    service: service.name().to_string(),
                    timeout_secs: secs,
                })
            }
        },
        None => invocation.await,
    };

    match outcome {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ServiceError::Invocation {
            node_id: request.node_id.clone(),
            service: service.name().to_string(),
            message: format!("{:#}", e),
        }),
        Err(_) => Err(ServiceError::Invocation {
            node_id: request.node_id.clone(),
            service: service.name().to_string(),
            message: "service panicked".to_string(),
        }),
    }
}

fn collect_result(
    graph: &DependencyGraph,
    run_id: String,
    order: Vec<String>,
    attempts: &BTreeMap<String, u32>,
) -> ExecutionResult {
    let nodes = graph
        .nodes()
        .map(|node| {
            let outcome = match node.status() {
                NodeStatus::Done => NodeOutcome::Done {
                    output: node.output().cloned().unwrap_or(Value::Null),
                },
                NodeStatus::Skipped => NodeOutcome::Skipped {
                    failed_dependency: node.failed_dependency().unwrap_or_default().to_string(),
                },
                _ => NodeOutcome::Failed {
                    error: node
                        .error()
                        .unwrap_or("node did not reach a terminal state")
                        .to_string(),
                },
            };
            let result = NodeResult {
                service: node.service.clone(),
                outcome,
                attempts: attempts.get(&node.id).copied().unwrap_or(0),
            };
            (node.id.clone(), result)
        })
        .collect();

    ExecutionResult {
        run_id,
        order,
        nodes,
    }
}
