//! Standby controller that restarts the master when it stops answering.

pub mod args;
pub mod fleet;
pub mod watchdog;

pub use crate::fleet::{FleetControl, ShellFleet};
pub use crate::watchdog::{WatchOutcome, Watchdog, WatchdogConfig};
