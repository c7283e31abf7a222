//! `nodes` crate — the `NodeHandler` contract, dispatch registry, and the
//! built-in handler set.
//!
//! Every node — built-in and third-party alike — must implement
//! [`NodeHandler`]. The engine crate dispatches execution through the
//! [`NodeHandlerRegistry`]; handlers receive an immutable
//! [`ContextSnapshot`] and communicate back exclusively through the returned
//! [`NodeHandlerResult`] (data plus optional control signals).

pub mod builtin;
pub mod error;
pub mod expr;
pub mod mock;
pub mod registry;
pub mod resolver;
pub mod traits;

pub use error::HandlerError;
pub use registry::NodeHandlerRegistry;
pub use traits::{
    ContextSnapshot, LoopControl, LoopScope, NodeHandler, NodeHandlerResult, NodeInvocation,
    OutputMap, ParallelScope, PauseSignal, Signals,
};

/// Node type strings understood by the builder and the built-in handlers.
pub mod node_types {
    pub const INPUT: &str = "input";
    pub const TRIGGER: &str = "trigger";
    pub const WEBHOOK: &str = "webhook";
    pub const SCHEDULE: &str = "schedule";
    pub const OUTPUT: &str = "output";
    pub const STOP: &str = "stop";
    pub const TRANSFORM: &str = "transform";
    pub const MERGE: &str = "merge";
    pub const CONDITIONAL: &str = "conditional";
    pub const ROUTER: &str = "router";
    pub const SWITCH: &str = "switch";
    pub const SET_VARIABLE: &str = "set-variable";
    pub const WAIT: &str = "wait";
    pub const LOOP_START: &str = "loop-start";
    pub const LOOP_END: &str = "loop-end";
    pub const PARALLEL_START: &str = "parallel-start";
    pub const PARALLEL_END: &str = "parallel-end";

    /// Types that may serve as the workflow entry point.
    pub const ENTRY_TYPES: [&str; 4] = [INPUT, TRIGGER, WEBHOOK, SCHEDULE];

    /// Types whose completion terminates a branch and feeds final outputs.
    pub const TERMINAL_TYPES: [&str; 2] = [OUTPUT, STOP];

    /// Types that pick one outgoing route per execution.
    pub const ROUTING_TYPES: [&str; 3] = [CONDITIONAL, ROUTER, SWITCH];
}

/// Well-known port names carried on edges.
pub mod ports {
    /// The distinguished failure output of a node with an error port.
    pub const ERROR: &str = "error";
    /// Route taken when a conditional evaluates to true.
    pub const TRUE: &str = "true";
    /// Route taken when a conditional evaluates to false.
    pub const FALSE: &str = "false";
    /// Fallback route of a switch node.
    pub const DEFAULT: &str = "default";
}
