//! Engine-level error types.

use thiserror::Error;

/// Errors produced while compiling a workflow definition into an execution
/// plan. No partial plan is ever returned alongside one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// No node qualifies as the entry point.
    #[error("workflow has no entry point")]
    NoEntryPoint,

    /// More than one node qualifies as the entry point.
    #[error("workflow has multiple entry points: {0:?}")]
    MultipleEntryPoints(Vec<String>),

    /// A loop or parallel start has no matching end (or an end has no start).
    #[error("unbalanced {kind} boundary at node '{node_id}'")]
    UnbalancedBoundary {
        /// `"loop"` or `"parallel"`.
        kind: &'static str,
        node_id: String,
    },

    /// The non-loop-back graph contains a cycle.
    #[error("workflow graph contains a cycle involving nodes {0:?}")]
    CycleDetected(Vec<String>),
}

/// Programmer-facing errors from the executor's public API. Workflow-level
/// failures never surface here; they are reported inside the outcome record.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// `resume` was called for an execution that is not paused here.
    #[error("no paused execution with id '{0}'")]
    UnknownExecution(String),

    /// `resume` named a waitpoint the paused execution is not waiting on.
    #[error("execution '{execution_id}' is not waiting on waitpoint '{waitpoint_id}'")]
    UnknownWaitpoint {
        execution_id: String,
        waitpoint_id: String,
    },
}
