//! Built-in node handlers.
//!
//! Each handler is a stateless unit struct registered in [`all`]; the
//! registration order here is the dispatch priority. Integration-style
//! handlers (HTTP, LLM calls, sandboxes) live outside this crate and are
//! registered by the embedding process.

mod boundary;
mod flow;
mod routing;
mod variables;
mod wait;

pub use boundary::{LoopEndHandler, LoopStartHandler, ParallelEndHandler, ParallelStartHandler};
pub use flow::{InputHandler, MergeHandler, OutputHandler, StopHandler, TransformHandler};
pub use routing::{ConditionalHandler, SwitchHandler};
pub use variables::SetVariableHandler;
pub use wait::WaitHandler;

use std::sync::Arc;

use crate::traits::NodeHandler;

/// The default handler set, in dispatch-priority order.
pub fn all() -> Vec<Arc<dyn NodeHandler>> {
    vec![
        Arc::new(InputHandler),
        Arc::new(OutputHandler),
        Arc::new(StopHandler),
        Arc::new(TransformHandler),
        Arc::new(MergeHandler),
        Arc::new(ConditionalHandler),
        Arc::new(SwitchHandler),
        Arc::new(SetVariableHandler),
        Arc::new(WaitHandler),
        Arc::new(LoopStartHandler),
        Arc::new(LoopEndHandler),
        Arc::new(ParallelStartHandler),
        Arc::new(ParallelEndHandler),
    ]
}
