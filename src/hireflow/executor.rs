//! Dynamic node execution: run nodes by name, alone or fanned out.
//!
//! The executor does no flow orchestration of its own; that belongs to the
//! groups and the orchestrator. It resolves names through the
//! [`NodeFactory`], and for parallel runs it guarantees a result per input
//! name even under partial failure:
//!
//! * a task that finishes in time contributes its real [`NodeResult`];
//! * a task that errors out is converted into a `None`-action result marked
//!   `is_fallback` with `fallback_reason = "<Kind>: <message>"`;
//! * a task still running when the wall-clock deadline fires is converted
//!   into an `EXECUTION_TIMEOUT` result and aborted. The abort is *not*
//!   awaited, so `execute_parallel` returns within the deadline plus
//!   scheduling noise even when a node is stuck mid-I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::hireflow::error::FlowError;
use crate::hireflow::model::{ConversationContext, NodeAction, NodeResult};
use crate::hireflow::node::FlowDeps;
use crate::hireflow::factory::NodeFactory;

/// Default wall-clock deadline for a parallel fan-out.
pub const DEFAULT_PARALLEL_TIMEOUT: Duration = Duration::from_secs(90);

/// Executes nodes by name through a shared [`NodeFactory`].
pub struct DynamicExecutor {
    factory: Arc<NodeFactory>,
}

impl DynamicExecutor {
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            factory: Arc::new(NodeFactory::new(deps)),
        }
    }

    pub fn has_node(&self, node_name: &str) -> bool {
        self.factory.has_node(node_name)
    }

    /// Run one node by name. Unknown names surface as
    /// [`FlowError::UnknownNode`].
    pub async fn execute(
        &self,
        node_name: &str,
        ctx: &ConversationContext,
    ) -> Result<NodeResult, FlowError> {
        let node = self.factory.create_node(node_name).await?;
        node.execute(ctx).await
    }

    /// Run several nodes concurrently under one wall-clock deadline.
    ///
    /// The returned map contains exactly one entry per input name; see the
    /// module docs for how failures and timeouts are represented.
    pub async fn execute_parallel(
        &self,
        node_names: &[&str],
        ctx: &ConversationContext,
        timeout: Duration,
    ) -> HashMap<String, NodeResult> {
        log::info!(
            "executing {} nodes in parallel (deadline {:?}): {:?}",
            node_names.len(),
            timeout,
            node_names
        );

        let deadline = Instant::now() + timeout;
        let handles: Vec<_> = node_names
            .iter()
            .map(|name| {
                let factory = self.factory.clone();
                let ctx = ctx.clone();
                let task_name = name.to_string();
                let handle = tokio::spawn(async move {
                    let node = factory.create_node(&task_name).await?;
                    node.execute(&ctx).await
                });
                (name.to_string(), handle)
            })
            .collect();

        let mut results = HashMap::new();
        for (name, mut handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(Ok(result))) => {
                    results.insert(name, result);
                }
                Ok(Ok(Err(error))) => {
                    log::error!("node {} failed during parallel run: {}", name, error);
                    let result = error_result(&name, &error);
                    results.insert(name, result);
                }
                Ok(Err(join_error)) => {
                    log::error!("node {} task died during parallel run: {}", name, join_error);
                    let error = FlowError::TaskJoin(join_error.to_string());
                    let result = error_result(&name, &error);
                    results.insert(name, result);
                }
                Err(_elapsed) => {
                    log::warn!(
                        "node {} exceeded the {:?} deadline, abandoning it",
                        name,
                        timeout
                    );
                    handle.abort();
                    let result = timeout_result(&name, timeout);
                    results.insert(name, result);
                }
            }
        }
        results
    }
}

fn error_result(node_name: &str, error: &FlowError) -> NodeResult {
    let mut result = NodeResult::new(node_name, NodeAction::None)
        .with_reason(format!("node execution failed: {}", error));
    result.is_fallback = true;
    result.fallback_reason = Some(format!("{}: {}", error.kind(), error));
    result
}

fn timeout_result(node_name: &str, timeout: Duration) -> NodeResult {
    let mut result = NodeResult::new(node_name, NodeAction::None)
        .with_reason(format!("node execution timed out ({}s)", timeout.as_secs()));
    result.is_fallback = true;
    result.fallback_reason = Some(format!("EXECUTION_TIMEOUT: >{}s", timeout.as_secs()));
    result
}
