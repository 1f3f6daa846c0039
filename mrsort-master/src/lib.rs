//! Master node: accepts worker registrations, plans reducer ranges, drives
//! the map phase and combines reducer output, resuming from the checkpoint
//! after a crash.

pub mod args;
pub mod combine;
pub mod core;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod recovery;
pub mod worker_registry;

pub use crate::core::{serve, MasterService};
pub use crate::recovery::{Master, MasterOptions, RecoveryPath};
