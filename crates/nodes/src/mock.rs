//! `MockHandler` — a test double for `NodeHandler`.
//!
//! Useful in unit and integration tests where a real handler implementation
//! is either unavailable or irrelevant. Behaviour is configured per node id,
//! and every call is recorded (with timestamps and the snapshot the handler
//! saw) so tests can assert ordering, parallelism, and snapshot contents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{
    ContextSnapshot, NodeHandler, NodeHandlerResult, NodeInvocation, OutputMap, Signals,
};
use crate::HandlerError;

/// Closure behaviour for cases the canned variants don't cover.
pub type ComputeFn = Arc<dyn Fn(&NodeInvocation) -> NodeHandlerResult + Send + Sync>;

/// Behaviour injected into `MockHandler` per node id.
pub enum MockBehaviour {
    /// Succeed with the given output map.
    Return(OutputMap),
    /// Succeed with the given output map and signals.
    WithSignals(OutputMap, Signals),
    /// Fail with the given error.
    Fail(HandlerError),
    /// Sleep, then succeed with the given output map.
    Sleep(Duration, OutputMap),
    /// Delegate to a closure over the invocation.
    Compute(ComputeFn),
}

/// One recorded `execute` call.
#[derive(Clone)]
pub struct RecordedCall {
    pub node_id: String,
    pub started_at: Instant,
    pub finished_at: Instant,
    /// The snapshot the handler received.
    pub snapshot: ContextSnapshot,
}

/// A mock handler with per-node behaviours and a call recorder.
pub struct MockHandler {
    /// Node types this mock serves.
    types: Vec<String>,
    /// Behaviour per node id; unknown ids succeed with an empty output.
    behaviours: HashMap<String, MockBehaviour>,
    /// All calls seen, in completion order.
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockHandler {
    /// A mock serving the `"mock"` node type.
    pub fn new() -> Self {
        Self::for_types(["mock"])
    }

    /// A mock serving the given node types.
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            behaviours: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Install a behaviour for a node id.
    pub fn behave(mut self, node_id: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.behaviours.insert(node_id.into(), behaviour);
        self
    }

    /// Node succeeds with the given JSON object.
    pub fn returning(self, node_id: impl Into<String>, data: Value) -> Self {
        self.behave(node_id, MockBehaviour::Return(as_map(data)))
    }

    /// Node succeeds and emits the given signals.
    pub fn signalling(self, node_id: impl Into<String>, data: Value, signals: Signals) -> Self {
        self.behave(node_id, MockBehaviour::WithSignals(as_map(data), signals))
    }

    /// Node fails.
    pub fn failing(self, node_id: impl Into<String>, error: HandlerError) -> Self {
        self.behave(node_id, MockBehaviour::Fail(error))
    }

    /// Node sleeps before succeeding, for parallelism assertions.
    pub fn sleeping(self, node_id: impl Into<String>, delay: Duration, data: Value) -> Self {
        self.behave(node_id, MockBehaviour::Sleep(delay, as_map(data)))
    }

    /// Node delegates to a closure.
    pub fn computing<F>(self, node_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&NodeInvocation) -> NodeHandlerResult + Send + Sync + 'static,
    {
        self.behave(node_id, MockBehaviour::Compute(Arc::new(f)))
    }

    /// Every recorded call, in completion order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times the given node has executed.
    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.node_id == node_id)
            .count()
    }

    /// Start/end instants of the given node's first call.
    pub fn window(&self, node_id: &str) -> Option<(Instant, Instant)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.node_id == node_id)
            .map(|c| (c.started_at, c.finished_at))
    }

    /// Snapshot the given node's first call received.
    pub fn seen_snapshot(&self, node_id: &str) -> Option<ContextSnapshot> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.node_id == node_id)
            .map(|c| c.snapshot.clone())
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn as_map(data: Value) -> OutputMap {
    data.as_object().cloned().unwrap_or_default()
}

#[async_trait]
impl NodeHandler for MockHandler {
    fn can_handle(&self, node_type: &str) -> bool {
        self.types.iter().any(|t| t == node_type)
    }

    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError> {
        let started_at = Instant::now();

        let result = match self.behaviours.get(&invocation.node_id) {
            None => NodeHandlerResult::empty(),
            Some(MockBehaviour::Return(data)) => NodeHandlerResult::ok(data.clone()),
            Some(MockBehaviour::WithSignals(data, signals)) => {
                NodeHandlerResult::ok(data.clone()).with_signals(signals.clone())
            }
            Some(MockBehaviour::Fail(error)) => NodeHandlerResult::failure(error.clone()),
            Some(MockBehaviour::Sleep(delay, data)) => {
                tokio::time::sleep(*delay).await;
                NodeHandlerResult::ok(data.clone())
            }
            Some(MockBehaviour::Compute(f)) => f(invocation),
        };

        self.calls.lock().unwrap().push(RecordedCall {
            node_id: invocation.node_id.clone(),
            started_at,
            finished_at: Instant::now(),
            snapshot: invocation.snapshot.clone(),
        });

        Ok(result)
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn invocation(node_id: &str) -> NodeInvocation {
        NodeInvocation {
            node_id: node_id.into(),
            node_type: "mock".into(),
            node_name: node_id.into(),
            config: OutputMap::new(),
            snapshot: ContextSnapshot::default(),
            user_id: "tester".into(),
            execution_id: "exec".into(),
            connection_id: None,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn records_calls_and_returns_configured_data() {
        let mock = MockHandler::new()
            .returning("a", json!({ "step": 1 }))
            .failing("b", HandlerError::fatal("boom"));

        let ok = mock.execute(&invocation("a")).await.unwrap();
        assert_eq!(ok.data.unwrap()["step"], 1);

        let failed = mock.execute(&invocation("b")).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.unwrap().message, "boom");

        // Unknown ids succeed with an empty output.
        let default = mock.execute(&invocation("c")).await.unwrap();
        assert_eq!(default.data, Some(OutputMap::new()));

        assert_eq!(mock.call_count("a"), 1);
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn compute_behaviour_sees_the_invocation() {
        let mock = MockHandler::new().computing("calc", |inv| {
            let mut data = OutputMap::new();
            data.insert("id".into(), Value::String(inv.node_id.clone()));
            NodeHandlerResult::ok(data)
        });

        let result = mock.execute(&invocation("calc")).await.unwrap();
        assert_eq!(result.data.unwrap()["id"], "calc");
    }
}
