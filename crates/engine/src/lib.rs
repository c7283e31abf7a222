//! `engine` crate — domain models, plan compilation, and the execution
//! engine.
//!
//! The compile-then-execute pipeline: [`build`] turns a
//! [`WorkflowDefinition`] into an immutable [`ExecutionPlan`];
//! [`WorkflowExecutor::run`] drives the plan batch by batch through the
//! [`ExecutionQueue`] and [`ContextManager`], dispatching nodes to the
//! handler registry of the `nodes` crate.

pub mod builder;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod executor;
pub mod models;
pub mod plan;
pub mod queue;

pub use builder::build;
pub use collaborators::{
    ExecutionStatus, InMemoryWaitpointStore, ProgressSink, ProgressUpdate, RecordingProgressSink,
    WaitOutcome, WaitpointStore,
};
pub use context::ContextManager;
pub use error::{BuildError, ExecutorError};
pub use executor::{ExecutionOutcome, RunOptions, WorkflowExecutor};
pub use models::{EdgeDescriptor, NodeDescriptor, WorkflowDefinition};
pub use plan::{EdgeKind, ExecutableNode, ExecutionPlan, PlanEdge};
pub use queue::ExecutionQueue;
