//! The Worker Scheduler (spec.md §2, §4.1): a fixed-interval tick loop that
//! drives Reconcile, the Risk Evaluator, the Trigger/Order Engine and the
//! Stopping Executor over every bot in an active status.

pub mod config;
pub mod pipeline;

pub use config::WorkerConfig;
pub use pipeline::Pipeline;
