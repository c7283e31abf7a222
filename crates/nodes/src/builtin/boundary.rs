//! Loop and parallel boundary markers.
//!
//! The orchestrator owns the scope stacks; these handlers only surface the
//! data the scopes are built from (the resolved item collection, the break
//! decision) through their outputs and signals.

use async_trait::async_trait;
use serde_json::Value;

use crate::expr::evaluate_condition;
use crate::node_types;
use crate::resolver::resolve_value;
use crate::traits::{LoopControl, NodeHandler, NodeHandlerResult, NodeInvocation, OutputMap, Signals};
use crate::HandlerError;

// ---------------------------------------------------------------------------
// Loop boundaries
// ---------------------------------------------------------------------------

/// Opens a loop: resolves the `items` config and reports the collection so
/// the orchestrator can seed the loop scope.
pub struct LoopStartHandler;

#[async_trait]
impl NodeHandler for LoopStartHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::LOOP_START
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let items = invocation
            .config
            .get("items")
            .map(|v| resolve_value(&invocation.snapshot, v))
            .unwrap_or_else(|| Value::Array(Vec::new()));

        let items = match items {
            Value::Array(items) => items,
            other => return Err(HandlerError::fatal(format!(
                "loop-start 'items' must resolve to an array, got {other}"
            ))),
        };

        let mut data = OutputMap::new();
        data.insert("count".into(), Value::from(items.len()));
        data.insert("items".into(), Value::Array(items));
        Ok(NodeHandlerResult::ok(data))
    }
}

/// Closes a loop: evaluates the optional `breakCondition` into a loop
/// control signal.
pub struct LoopEndHandler;

#[async_trait]
impl NodeHandler for LoopEndHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::LOOP_END
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let control = match invocation.config_str("breakCondition") {
            Some(condition) => {
                let should_break = evaluate_condition(condition, &invocation.snapshot).map_err(|e| {
                    HandlerError::fatal(format!("invalid breakCondition: {e}")).with_code("bad-condition")
                })?;
                if should_break {
                    LoopControl::Break
                } else {
                    LoopControl::Continue
                }
            }
            None => LoopControl::Continue,
        };

        Ok(NodeHandlerResult::empty().with_signals(Signals {
            loop_control: Some(control),
            ..Signals::default()
        }))
    }
}

// ---------------------------------------------------------------------------
// Parallel boundaries
// ---------------------------------------------------------------------------

/// Opens a parallel region; the orchestrator seeds the parallel scope when
/// this node's result is applied.
pub struct ParallelStartHandler;

#[async_trait]
impl NodeHandler for ParallelStartHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::PARALLEL_START
    }

    async fn execute(&self, _invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        Ok(NodeHandlerResult::empty())
    }
}

/// Closes a parallel region.
pub struct ParallelEndHandler;

#[async_trait]
impl NodeHandler for ParallelEndHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::PARALLEL_END
    }

    async fn execute(&self, _invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        Ok(NodeHandlerResult::empty())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ContextSnapshot;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn invocation(node_type: &str, config: Value, snapshot: ContextSnapshot) -> NodeInvocation {
        NodeInvocation {
            node_id: "b".into(),
            node_type: node_type.into(),
            node_name: "b".into(),
            config: config.as_object().cloned().unwrap_or_default(),
            snapshot,
            user_id: "tester".into(),
            execution_id: "exec".into(),
            connection_id: None,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn loop_start_resolves_items() {
        let mut snapshot = ContextSnapshot::default();
        snapshot.inputs = json!({ "batch": [1, 2, 3] }).as_object().unwrap().clone();

        let result = LoopStartHandler
            .execute(&invocation("loop-start", json!({ "items": "{{inputs.batch}}" }), snapshot))
            .await
            .unwrap();

        let data = result.data.unwrap();
        assert_eq!(data["count"], 3);
        assert_eq!(data["items"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn loop_start_rejects_non_array_items() {
        let result = LoopStartHandler
            .execute(&invocation(
                "loop-start",
                json!({ "items": 42 }),
                ContextSnapshot::default(),
            ))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn loop_end_breaks_when_condition_holds() {
        let mut snapshot = ContextSnapshot::default();
        snapshot.variables = json!({ "done": true }).as_object().unwrap().clone();

        let result = LoopEndHandler
            .execute(&invocation(
                "loop-end",
                json!({ "breakCondition": "variables.done" }),
                snapshot,
            ))
            .await
            .unwrap();
        assert_eq!(result.signals.unwrap().loop_control, Some(LoopControl::Break));
    }

    #[tokio::test]
    async fn loop_end_defaults_to_continue() {
        let result = LoopEndHandler
            .execute(&invocation("loop-end", json!({}), ContextSnapshot::default()))
            .await
            .unwrap();
        assert_eq!(result.signals.unwrap().loop_control, Some(LoopControl::Continue));
    }
}
