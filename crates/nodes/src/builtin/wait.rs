//! Human-in-the-loop wait handler.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::node_types;
use crate::traits::{NodeHandler, NodeHandlerResult, NodeInvocation, PauseSignal, Signals};
use crate::HandlerError;

/// Suspends the execution at this node until external input arrives.
///
/// Config: `waitpointId` (generated when absent), `reason`, `timeoutMs`,
/// `expectedInputSchema`. The orchestrator registers the waitpoint with its
/// store and returns a paused outcome; `resume` later injects the user input
/// into this node's output.
pub struct WaitHandler;

#[async_trait]
impl NodeHandler for WaitHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::WAIT
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let waitpoint_id = invocation
            .config_str("waitpointId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("wp-{}", Uuid::new_v4()));
        let reason = invocation
            .config_str("reason")
            .unwrap_or("waiting for user input")
            .to_string();
        let timeout_ms = invocation.config.get("timeoutMs").and_then(Value::as_u64);
        let expected_input_schema = invocation.config.get("expectedInputSchema").cloned();

        Ok(NodeHandlerResult::empty().with_signals(Signals::paused(PauseSignal {
            waitpoint_id,
            reason,
            expected_input_schema,
            timeout_ms,
        })))
    }
}
