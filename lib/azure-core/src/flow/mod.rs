//! Flow engine
//!
//! A flow is a DAG of named tasks sharing one context. [`Graph::compile`]
//! orders the tasks into groups with Kahn's algorithm; [`Flow::run`] executes
//! the groups in order and the tasks of a group concurrently. Each task is
//! bounded by a timeout and raced against a cancellation token, and every
//! successful task is reported to a hook that persists the flow's state.

mod graph;
mod whiteboard;

use std::time::Duration;

use thiserror::Error;

pub use graph::{Flow, Graph, RunOptions};
pub use whiteboard::{keys, Whiteboard};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid flow {flow}: {reason}")]
    InvalidGraph { flow: String, reason: String },

    #[error("task {task} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: Box<crate::Error>,
    },

    #[error("task {task} timed out after {after:?}")]
    Timeout { task: String, after: Duration },

    #[error("flow canceled")]
    Canceled,
}
