//! The `NodeHandler` trait and the value types that cross the handler
//! boundary.
//!
//! These types are defined here (in the nodes crate) so both the engine and
//! individual handler implementations can import them without a circular
//! dependency. Handlers never see the live execution context: they receive a
//! [`ContextSnapshot`] — a structural copy — and influence the run only
//! through the [`Signals`] on their returned [`NodeHandlerResult`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::HandlerError;

/// A node's output (and every other structured map in the system): a JSON
/// object keyed by field name.
pub type OutputMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// The innermost loop scope visible to a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopScope {
    /// Id of the loop-start node that opened this scope.
    pub loop_id: String,
    /// Zero-based iteration index.
    pub index: usize,
    /// The item for the current iteration.
    pub item: Value,
    /// Total number of items, when known up front.
    pub total: Option<usize>,
}

/// The innermost parallel scope visible to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelScope {
    /// Id of the parallel-start node that opened this scope.
    pub parallel_id: String,
    /// Zero-based index of the branch this node belongs to.
    pub branch_index: usize,
}

// ---------------------------------------------------------------------------
// ContextSnapshot
// ---------------------------------------------------------------------------

/// An immutable, structurally-copied view of the execution context.
///
/// Mutating a snapshot has no effect on the live context or on any snapshot
/// taken later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// Workflow-level inputs supplied at run start.
    pub inputs: OutputMap,
    /// Outputs of every node resolved so far, keyed by node id.
    pub node_outputs: HashMap<String, OutputMap>,
    /// Workflow variables set via the `setVariables` signal.
    pub variables: OutputMap,
    /// Top of the loop-scope stack, if inside a loop boundary.
    pub loop_scope: Option<LoopScope>,
    /// Top of the parallel-scope stack, if inside a parallel boundary.
    pub parallel_scope: Option<ParallelScope>,
}

impl ContextSnapshot {
    /// Output of a single node, if it has resolved.
    pub fn node_output(&self, node_id: &str) -> Option<&OutputMap> {
        self.node_outputs.get(node_id)
    }
}

// ---------------------------------------------------------------------------
// NodeInvocation
// ---------------------------------------------------------------------------

/// Everything a handler receives for one node execution.
#[derive(Debug, Clone)]
pub struct NodeInvocation {
    /// Id of the node being executed.
    pub node_id: String,
    /// Registered node type (drives registry dispatch).
    pub node_type: String,
    /// Display name of the node.
    pub node_name: String,
    /// Node configuration from the workflow definition.
    pub config: OutputMap,
    /// Immutable view of the context at batch start.
    pub snapshot: ContextSnapshot,
    /// User on whose behalf the workflow runs.
    pub user_id: String,
    /// Id of the surrounding execution.
    pub execution_id: String,
    /// Optional client connection id for handlers that stream.
    pub connection_id: Option<String>,
    /// Deadline after which the handler should abort; exceeding it is a
    /// non-retryable failure unless the handler says otherwise.
    pub deadline: Option<DateTime<Utc>>,
    /// Cooperative cancellation handle shared with the orchestrator.
    pub cancellation: CancellationToken,
}

impl NodeInvocation {
    /// Typed accessor for a string config field.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Request to suspend the execution until external input arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseSignal {
    /// Token identifying the waitpoint with the external store.
    pub waitpoint_id: String,
    /// Why the execution is pausing (shown to the resuming user).
    pub reason: String,
    /// JSON schema the resume input is expected to satisfy.
    pub expected_input_schema: Option<Value>,
    /// How long the waitpoint stays open before timing out.
    pub timeout_ms: Option<u64>,
}

/// Loop-end control decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopControl {
    /// Advance to the next iteration.
    Continue,
    /// Leave the loop.
    Break,
}

/// Control-flow side effects a handler may request alongside its data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Signals {
    /// Suspend the run at this node.
    pub pause: Option<PauseSignal>,
    /// Route dependents through the error port even though `success` holds.
    pub activate_error_port: bool,
    /// Keep only dependents wired to this source port eligible.
    pub selected_route: Option<String>,
    /// Treat this node as a hard stop for its branch.
    pub is_terminal: bool,
    /// Loop-end decision.
    pub loop_control: Option<LoopControl>,
    /// Workflow variables to set; a JSON `null` deletes the variable.
    pub set_variables: Option<OutputMap>,
}

impl Signals {
    /// A signal set carrying only a selected route.
    pub fn route(route: impl Into<String>) -> Self {
        Self {
            selected_route: Some(route.into()),
            ..Self::default()
        }
    }

    /// A signal set carrying only a pause request.
    pub fn paused(pause: PauseSignal) -> Self {
        Self {
            pause: Some(pause),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// NodeHandlerResult
// ---------------------------------------------------------------------------

/// What a handler hands back to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHandlerResult {
    /// Whether the node succeeded.
    pub success: bool,
    /// The node's output map (stored into the context, possibly truncated).
    pub data: Option<OutputMap>,
    /// Failure details when `success` is false.
    pub error: Option<HandlerError>,
    /// Control-flow signals.
    pub signals: Option<Signals>,
    /// Free-form handler metadata (not stored as node output).
    pub metadata: Option<OutputMap>,
}

impl NodeHandlerResult {
    /// Successful result with the given output map.
    pub fn ok(data: OutputMap) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            signals: None,
            metadata: None,
        }
    }

    /// Successful result with an empty output map.
    pub fn empty() -> Self {
        Self::ok(OutputMap::new())
    }

    /// Failed result.
    pub fn failure(error: HandlerError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            signals: None,
            metadata: None,
        }
    }

    /// Attach signals.
    pub fn with_signals(mut self, signals: Signals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: OutputMap) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The selected route, if any.
    pub fn selected_route(&self) -> Option<&str> {
        self.signals
            .as_ref()
            .and_then(|s| s.selected_route.as_deref())
    }
}

// ---------------------------------------------------------------------------
// NodeHandler
// ---------------------------------------------------------------------------

/// The core handler trait.
///
/// Implementations must be safe for concurrent use: one registry instance
/// serves every execution in the process.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Whether this handler serves the given node type. The registry asks
    /// handlers in registration order and takes the first match.
    fn can_handle(&self, node_type: &str) -> bool;

    /// Execute the node against an immutable snapshot.
    ///
    /// # Errors
    /// Returning `Err` is equivalent to returning a failed
    /// [`NodeHandlerResult`] carrying the same [`HandlerError`].
    async fn execute(&self, invocation: &NodeInvocation) -> Result<NodeHandlerResult, HandlerError>;
}
