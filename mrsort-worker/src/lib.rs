//! Worker node: sorts map chunks, ships keys to their owning reducers and
//! appends reduce batches to owner-keyed files.

pub mod args;
pub mod core;
pub mod deliver;
pub mod register;

pub use crate::core::{serve, WorkerService};
