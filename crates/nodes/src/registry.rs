//! `NodeHandlerRegistry` — maps node types to handler instances.
//!
//! Dispatch walks handlers in registration order and takes the first whose
//! `can_handle` accepts the node type; a passthrough fallback always
//! matches, so dispatch never fails to find a handler. The registry is
//! immutable once built and safe for concurrent reads across executions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::builtin;
use crate::traits::{NodeHandler, NodeHandlerResult, NodeInvocation, OutputMap};
use crate::HandlerError;

/// Registry of node handlers consulted by the executor for every node.
pub struct NodeHandlerRegistry {
    handlers: Vec<Arc<dyn NodeHandler>>,
    fallback: Arc<dyn NodeHandler>,
}

impl Default for NodeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeHandlerRegistry {
    /// An empty registry (only the passthrough fallback).
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            fallback: Arc::new(PassthroughHandler),
        }
    }

    /// A registry pre-populated with the built-in handler set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for handler in builtin::all() {
            registry.register(handler);
        }
        registry
    }

    /// Append a handler; earlier registrations win ties.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.push(handler);
    }

    /// The handler that will serve `node_type`.
    pub fn resolve(&self, node_type: &str) -> &Arc<dyn NodeHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(node_type))
            .unwrap_or(&self.fallback)
    }

    /// Execute one invocation, folding handler `Err` into a failed result.
    pub async fn dispatch(&self, invocation: &NodeInvocation) -> NodeHandlerResult {
        let handler = self.resolve(&invocation.node_type);
        match handler.execute(invocation).await {
            Ok(result) => result,
            Err(error) => NodeHandlerResult::failure(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Matches every node type; passes the node through with an empty output and
/// a warning in its metadata.
struct PassthroughHandler;

#[async_trait]
impl NodeHandler for PassthroughHandler {
    fn can_handle(&self, _node_type: &str) -> bool {
        true
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        warn!(
            node_id = %invocation.node_id,
            node_type = %invocation.node_type,
            "no handler registered; passing node through"
        );
        let mut metadata = OutputMap::new();
        metadata.insert(
            "fallbackWarning".into(),
            Value::String(format!(
                "no handler registered for node type '{}'",
                invocation.node_type
            )),
        );
        Ok(NodeHandlerResult::empty().with_metadata(metadata))
    }
}
