//! Routing handlers: conditional and switch.

use async_trait::async_trait;
use serde_json::Value;

use crate::expr::evaluate_condition;
use crate::traits::{NodeHandler, NodeHandlerResult, NodeInvocation, OutputMap, Signals};
use crate::{node_types, ports, HandlerError};

// ---------------------------------------------------------------------------
// ConditionalHandler
// ---------------------------------------------------------------------------

/// Two-way branch: evaluates the `condition` config and selects the `true`
/// or `false` route.
pub struct ConditionalHandler;

#[async_trait]
impl NodeHandler for ConditionalHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::CONDITIONAL
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let condition = invocation
            .config_str("condition")
            .ok_or_else(|| HandlerError::fatal("conditional node requires a 'condition' config"))?;

        let outcome = evaluate_condition(condition, &invocation.snapshot)
            .map_err(|e| HandlerError::fatal(format!("invalid condition: {e}")).with_code("bad-condition"))?;

        let route = if outcome { ports::TRUE } else { ports::FALSE };
        let mut data = OutputMap::new();
        data.insert("condition".into(), Value::String(condition.to_string()));
        data.insert("result".into(), Value::Bool(outcome));
        Ok(NodeHandlerResult::ok(data).with_signals(Signals::route(route)))
    }
}

// ---------------------------------------------------------------------------
// SwitchHandler
// ---------------------------------------------------------------------------

/// Multi-way branch: evaluates `cases: [{route, condition}]` in order and
/// selects the first matching route, falling back to `fallbackRoute`
/// (default `"default"`). Also serves the plain `router` type.
pub struct SwitchHandler;

#[async_trait]
impl NodeHandler for SwitchHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        node_type == node_types::SWITCH || node_type == node_types::ROUTER
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let cases = invocation
            .config
            .get("cases")
            .and_then(Value::as_array)
            .ok_or_else(|| HandlerError::fatal("switch node requires a 'cases' array config"))?;

        let mut selected: Option<String> = None;
        for case in cases {
            let route = case
                .get("route")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::fatal("switch case requires a 'route'"))?;
            let condition = case
                .get("condition")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::fatal("switch case requires a 'condition'"))?;

            let matched = evaluate_condition(condition, &invocation.snapshot)
                .map_err(|e| HandlerError::fatal(format!("invalid condition: {e}")).with_code("bad-condition"))?;
            if matched {
                selected = Some(route.to_string());
                break;
            }
        }

        let route = selected.unwrap_or_else(|| {
            invocation
                .config_str("fallbackRoute")
                .unwrap_or(ports::DEFAULT)
                .to_string()
        });

        let mut data = OutputMap::new();
        data.insert("selected".into(), Value::String(route.clone()));
        Ok(NodeHandlerResult::ok(data).with_signals(Signals::route(route)))
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

    fn invocation(node_type: &str, config: Value) -> NodeInvocation {
        let mut snapshot = ContextSnapshot::default();
        snapshot.inputs = json!({ "score": 75 }).as_object().unwrap().clone();
        NodeInvocation {
            node_id: "r".into(),
            node_type: node_type.into(),
            node_name: "r".into(),
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
    async fn conditional_selects_true_route() {
        let result = ConditionalHandler
            .execute(&invocation("conditional", json!({ "condition": "inputs.score >= 50" })))
            .await
            .unwrap();

        assert_eq!(result.selected_route(), Some("true"));
        assert_eq!(result.data.unwrap()["result"], true);
    }

    #[tokio::test]
    async fn conditional_selects_false_route() {
        let result = ConditionalHandler
            .execute(&invocation("conditional", json!({ "condition": "inputs.score > 90" })))
            .await
            .unwrap();
        assert_eq!(result.selected_route(), Some("false"));
    }

    #[tokio::test]
    async fn conditional_rejects_bad_expression() {
        let error = ConditionalHandler
            .execute(&invocation("conditional", json!({ "condition": "inputs.score >=" })))
            .await
            .unwrap_err();
        assert_eq!(error.code.as_deref(), Some("bad-condition"));
    }

    #[tokio::test]
    async fn switch_takes_first_matching_case() {
        let config = json!({
            "cases": [
                { "route": "high", "condition": "inputs.score >= 90" },
                { "route": "mid", "condition": "inputs.score >= 50" },
                { "route": "low", "condition": "true" }
            ]
        });
        let result = SwitchHandler
            .execute(&invocation("switch", config))
            .await
            .unwrap();
        assert_eq!(result.selected_route(), Some("mid"));
    }

    #[tokio::test]
    async fn switch_falls_back_when_nothing_matches() {
        let config = json!({
            "cases": [{ "route": "high", "condition": "inputs.score >= 90" }],
            "fallbackRoute": "other"
        });
        let result = SwitchHandler
            .execute(&invocation("switch", config))
            .await
            .unwrap();
        assert_eq!(result.selected_route(), Some("other"));
    }
}
