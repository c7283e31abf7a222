//! Workflow-variable handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::node_types;
use crate::resolver::resolve_value;
use crate::traits::{NodeHandler, NodeHandlerResult, NodeInvocation, Signals};
use crate::HandlerError;

/// Sets (or, with a `null` value, deletes) workflow variables. The values in
/// the `variables` config are resolved against the snapshot before being
/// signalled back to the orchestrator.
pub struct SetVariableHandler;

#[async_trait]
impl NodeHandler for SetVariableHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::SET_VARIABLE
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let variables = invocation
            .config
            .get("variables")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                HandlerError::fatal("set-variable node requires a 'variables' object config")
            })?;

        let resolved = variables
            .iter()
            .map(|(name, value)| (name.clone(), resolve_value(&invocation.snapshot, value)))
            .collect();

        Ok(NodeHandlerResult::empty().with_signals(Signals {
            set_variables: Some(resolved),
            ..Signals::default()
        }))
    }
}
