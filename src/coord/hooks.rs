//! Event hooks observing node execution.
//!
//! Hooks are notified in order, inline with the executor, and never mutate
//! the graph.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::types::ExecutionEvent;

/// Context provided to hooks for processing events
#[derive(Clone, Debug)]
pub struct HookContext {
    /// Run ID for this execution
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Number of nodes in the graph
    pub node_count: usize,
}

impl HookContext {
    pub fn new(run_id: impl Into<String>, node_count: usize) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            node_count,
        }
    }
}

#[async_trait]
pub trait EventHook: Send + Sync {
    /// Handle an execution event
    async fn handle(&self, ctx: &HookContext, event: &ExecutionEvent);

    /// Optional: Called when the run starts
    async fn on_start(&self, _ctx: &HookContext) {}

    /// Optional: Called when every node is terminal; `success` when all are done
    async fn on_complete(&self, _ctx: &HookContext, _success: bool) {}
}

/// Composite hook that chains multiple hooks
#[derive(Default)]
pub struct CompositeHook {
    hooks: Vec<Arc<dyn EventHook>>,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(&mut self, hook: Arc<dyn EventHook>) {
        self.hooks.push(hook);
    }

    pub fn with_hook(mut self, hook: Arc<dyn EventHook>) -> Self {
        self.add_hook(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl EventHook for CompositeHook {
    async fn handle(&self, ctx: &HookContext, event: &ExecutionEvent) {
        for hook in &self.hooks {
            hook.handle(ctx, event).await;
        }
    }

    async fn on_start(&self, ctx: &HookContext) {
        for hook in &self.hooks {
            hook.on_start(ctx).await;
        }
    }

    async fn on_complete(&self, ctx: &HookContext, success: bool) {
        for hook in &self.hooks {
            hook.on_complete(ctx, success).await;
        }
    }
}

/// Logs every event through `tracing`
pub struct LoggingHook;

#[async_trait]
impl EventHook for LoggingHook {
    async fn handle(&self, ctx: &HookContext, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::NodeStarted { node, service, .. } => {
                tracing::info!(run_id = %ctx.run_id, node_id = %node.node_id, service = %service, "Node started");
            }
            ExecutionEvent::NodeCompleted { node, attempts, .. } => {
                tracing::info!(run_id = %ctx.run_id, node_id = %node.node_id, attempts, "Node completed");
            }
            ExecutionEvent::NodeFailed {
                node,
                error,
                attempts,
                ..
            } => {
                tracing::error!(run_id = %ctx.run_id, node_id = %node.node_id, attempts, error = %error, "Node failed");
            }
            ExecutionEvent::NodeSkipped {
                node,
                failed_dependency,
                ..
            } => {
                tracing::warn!(run_id = %ctx.run_id, node_id = %node.node_id, failed_dependency = %failed_dependency, "Node skipped");
            }
        }
    }

    async fn on_start(&self, ctx: &HookContext) {
        tracing::info!(run_id = %ctx.run_id, nodes = ctx.node_count, "Run started");
    }

    async fn on_complete(&self, ctx: &HookContext, success: bool) {
        let elapsed_ms = (Utc::now() - ctx.started_at).num_milliseconds();
        tracing::info!(run_id = %ctx.run_id, success, elapsed_ms, "Run finished");
    }
}
