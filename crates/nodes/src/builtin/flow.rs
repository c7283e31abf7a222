//! Data-flow handlers: input, output, stop, transform, merge.

use async_trait::async_trait;
use serde_json::Value;

use crate::node_types;
use crate::resolver::resolve_value;
use crate::traits::{NodeHandler, NodeHandlerResult, NodeInvocation, OutputMap, Signals};
use crate::HandlerError;

// ---------------------------------------------------------------------------
// InputHandler
// ---------------------------------------------------------------------------

/// Entry node: emits the workflow inputs as its output so downstream nodes
/// can reference them as `<entry-id>.<field>`.
pub struct InputHandler;

#[async_trait]
impl NodeHandler for InputHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_types::ENTRY_TYPES.contains(&node_type)
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        Ok(NodeHandlerResult::ok(invocation.snapshot.inputs.clone()))
    }
}

// ---------------------------------------------------------------------------
// OutputHandler
// ---------------------------------------------------------------------------

/// Terminal node: wraps its resolved `source` config (default: the workflow
/// inputs) as `{__isOutput: true, result}` for the final-outputs map.
pub struct OutputHandler;

#[async_trait]
impl NodeHandler for OutputHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::OUTPUT
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let result = match invocation.config.get("source") {
            Some(source) => resolve_value(&invocation.snapshot, source),
            None => Value::Object(invocation.snapshot.inputs.clone()),
        };

        let mut data = OutputMap::new();
        data.insert("__isOutput".into(), Value::Bool(true));
        data.insert("result".into(), result);
        Ok(NodeHandlerResult::ok(data))
    }
}

// ---------------------------------------------------------------------------
// StopHandler
// ---------------------------------------------------------------------------

/// Hard stop: completes with no data and signals branch termination.
pub struct StopHandler;

#[async_trait]
impl NodeHandler for StopHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::STOP
    }

    async fn execute(&self, _invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        Ok(NodeHandlerResult::empty().with_signals(Signals {
            is_terminal: true,
            ..Signals::default()
        }))
    }
}

// ---------------------------------------------------------------------------
// TransformHandler
// ---------------------------------------------------------------------------

/// Resolves the `template` config against the snapshot. An object template
/// becomes the node's output map directly; any other shape lands under
/// `result`.
pub struct TransformHandler;

#[async_trait]
impl NodeHandler for TransformHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::TRANSFORM
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let template = invocation
            .config
            .get("template")
            .ok_or_else(|| HandlerError::fatal("transform node requires a 'template' config"))?;

        let resolved = resolve_value(&invocation.snapshot, template);
        let data = match resolved {
            Value::Object(map) => map,
            other => {
                let mut map = OutputMap::new();
                map.insert("result".into(), other);
                map
            }
        };
        Ok(NodeHandlerResult::ok(data))
    }
}

// ---------------------------------------------------------------------------
// MergeHandler
// ---------------------------------------------------------------------------

/// Joins branches: collects the outputs of the `sources` nodes that actually
/// ran, renumbered as `branch_0…` so skipped branches leave no gaps.
pub struct MergeHandler;

#[async_trait]
impl NodeHandler for MergeHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::MERGE
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let sources = invocation
            .config
            .get("sources")
            .and_then(Value::as_array)
            .ok_or_else(|| HandlerError::fatal("merge node requires a 'sources' array config"))?;

        let mut merged = OutputMap::new();
        let mut branch = 0usize;
        for source in sources {
            let Some(node_id) = source.as_str() else {
                return Err(HandlerError::fatal("merge 'sources' entries must be node ids"));
            };
            if let Some(output) = invocation.snapshot.node_output(node_id) {
                merged.insert(format!("branch_{branch}"), Value::Object(output.clone()));
                branch += 1;
            }
        }

        let mut data = OutputMap::new();
        data.insert("merged".into(), Value::Object(merged));
        Ok(NodeHandlerResult::ok(data))
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
            node_id: "n".into(),
            node_type: node_type.into(),
            node_name: "n".into(),
            config: config.as_object().cloned().unwrap_or_default(),
            snapshot,
            user_id: "tester".into(),
            execution_id: "exec".into(),
            connection_id: None,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    fn snapshot_with_output(node_id: &str, output: Value) -> ContextSnapshot {
        let mut snap = ContextSnapshot::default();
        snap.node_outputs
            .insert(node_id.into(), output.as_object().unwrap().clone());
        snap
    }

    #[tokio::test]
    async fn input_emits_workflow_inputs() {
        let mut snap = ContextSnapshot::default();
        snap.inputs = json!({ "x": 2 }).as_object().unwrap().clone();

        let result = InputHandler
            .execute(&invocation("input", json!({}), snap))
            .await
            .unwrap();
        assert_eq!(result.data.unwrap()["x"], 2);
    }

    #[tokio::test]
    async fn output_wraps_resolved_source() {
        let snap = snapshot_with_output("calc", json!({ "result": 6 }));
        let result = OutputHandler
            .execute(&invocation("output", json!({ "source": "{{calc.result}}" }), snap))
            .await
            .unwrap();

        let data = result.data.unwrap();
        assert_eq!(data["__isOutput"], true);
        assert_eq!(data["result"], 6);
    }

    #[tokio::test]
    async fn transform_resolves_object_template() {
        let snap = snapshot_with_output("fetch", json!({ "total": 40 }));
        let result = TransformHandler
            .execute(&invocation(
                "transform",
                json!({ "template": { "doubled": "{{fetch.total}}", "note": "t" } }),
                snap,
            ))
            .await
            .unwrap();

        let data = result.data.unwrap();
        assert_eq!(data["doubled"], 40);
        assert_eq!(data["note"], "t");
    }

    #[tokio::test]
    async fn transform_without_template_fails() {
        let result = TransformHandler
            .execute(&invocation("transform", json!({}), ContextSnapshot::default()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn merge_renumbers_present_branches() {
        // "f" never ran: it must leave no gap in the branch numbering.
        let snap = snapshot_with_output("t", json!({ "value": 1 }));

        let result = MergeHandler
            .execute(&invocation("merge", json!({ "sources": ["t", "f"] }), snap))
            .await
            .unwrap();

        let data = result.data.unwrap();
        assert_eq!(data["merged"], json!({ "branch_0": { "value": 1 } }));
    }

    #[tokio::test]
    async fn stop_signals_terminal() {
        let result = StopHandler
            .execute(&invocation("stop", json!({}), ContextSnapshot::default()))
            .await
            .unwrap();
        assert!(result.signals.unwrap().is_terminal);
    }
}
