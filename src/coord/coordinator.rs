//! Coordinator - bounded parallel execution
//!
//! Ready nodes are spawned as tokio tasks, at most `max_parallel_nodes` at a
//! time, and report back over a channel. Only the coordinator touches the
//! graph, so workers never need a reference to it.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::coord::hooks::{EventHook, HookContext};
use crate::coord::registry::ServiceRegistry;
use crate::core::config::ExecutionConfig;
use crate::core::errors::ServiceError;
use crate::dag_flow::executor::{invoke_with_retry, NodeRunner};
use crate::dag_flow::graph::DependencyGraph;
use crate::dag_flow::node::NodeStatus;

/// Message sent by a worker when its node is terminal
struct WorkerResult {
    node_id: String,
    result: Result<Value, ServiceError>,
    attempts: u32,
}

/// Coordinator for parallel graph execution
pub struct Coordinator<'a> {
    runner: NodeRunner<'a>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        registry: &'a ServiceRegistry,
        config: &'a ExecutionConfig,
        hooks: &'a [Arc<dyn EventHook>],
        ctx: &'a HookContext,
    ) -> Self {
        Self {
            runner: NodeRunner {
                registry,
                config,
                hooks,
                ctx,
            },
        }
    }

    /// Run every node of a built graph, recording attempts per node.
    ///
    /// Returns once no node is in flight and nothing more can become ready,
    /// at which point every node is terminal.
    pub async fn run_parallel(
        self,
        graph: &mut DependencyGraph,
        attempts: &mut BTreeMap<String, u32>,
    ) {
        let max_parallel = self.runner.config.max_parallel_nodes.max(1);
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let (evt_tx, mut evt_rx) = mpsc::channel::<WorkerResult>(graph.len().max(1));
        let mut in_flight: HashSet<String> = HashSet::new();

        tracing::debug!(max_parallel, "Starting parallel execution");
        self.schedule(graph, &semaphore, &evt_tx, &mut in_flight, attempts)
            .await;

        while !in_flight.is_empty() {
            let Some(done) = evt_rx.recv().await else {
                break;
            };
            in_flight.remove(&done.node_id);
            attempts.insert(done.node_id.clone(), done.attempts);
            self.runner
                .finish(graph, &done.node_id, done.result, done.attempts)
                .await;

            self.schedule(graph, &semaphore, &evt_tx, &mut in_flight, attempts)
                .await;
        }

        tracing::debug!("Parallel execution complete - all nodes finished");
    }

    /// Launch every node whose dependencies are all done, in insertion order
    async fn schedule(
        &self,
        graph: &mut DependencyGraph,
        semaphore: &Arc<Semaphore>,
        evt_tx: &mpsc::Sender<WorkerResult>,
        in_flight: &mut HashSet<String>,
        attempts: &mut BTreeMap<String, u32>,
    ) {
        let ready: Vec<String> = graph
            .nodes()
            .filter(|n| n.status() == NodeStatus::Pending && !in_flight.contains(&n.id))
            .filter(|n| {
                n.depends_on().iter().all(|dep| {
                    graph
                        .node(dep)
                        .map_or(false, |d| d.status() == NodeStatus::Done)
                })
            })
            .map(|n| n.id.clone())
            .collect();

        for id in ready {
            // An earlier failure in this pass may already have skipped it
            if graph
                .node(&id)
                .map_or(true, |n| n.status() != NodeStatus::Pending)
            {
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match self.runner.start(graph, &id).await {
                Ok((service, request)) => {
                    tracing::debug!(node_id = %id, "Scheduling node");
                    in_flight.insert(id.clone());
                    let tx = evt_tx.clone();
                    let config = self.runner.config.clone();
                    tokio::spawn(async move {
                        let (result, attempts) = invoke_with_retry(service, request, config).await;
                        drop(permit);
                        let _ = tx
                            .send(WorkerResult {
                                node_id: id,
                                result,
                                attempts,
                            })
                            .await;
                    });
                }
                Err(err) => {
                    drop(permit);
                    attempts.insert(id.clone(), 0);
                    self.runner.finish(graph, &id, Err(err), 0).await;
                }
            }
        }
    }
}
