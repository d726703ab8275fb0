//! Run scheduling and execution.
//!
//! - [`scheduler`]: the FIFO run queue with one current run, events and handles
//! - [`executor`]: walks one graph snapshot, dispatching steps to a worker pool
//! - [`progress`]: hierarchical progress events and cooperative cancellation
//! - [`state`]: run ids, states and outcomes

pub mod executor;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod state;

pub use progress::{CancellationToken, ProgressEvent, ProgressInfo, ProgressLog, ProgressSink};
pub use scheduler::{ListenerId, RunHandle, RunListener, RunSettings, Scheduler};
pub use state::{
    NodeFailure, NodeReport, NodeStatus, RunEvent, RunId, RunOutcome, RunState, RunStats,
};
