//! Workload description
//!
//! This module provides:
//! - [`Mix`] - Weighted selection of the next operation tag
//! - [`WorkerContext`] - Per-worker private state handed to every operation

mod context;
mod mix;

pub use context::WorkerContext;
pub use mix::{Mix, MixError, OperationType, MIX_TOTAL};
