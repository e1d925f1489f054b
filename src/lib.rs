//! Tracks how long a machine is online each day. A background monitor pings a host, watches the
//! lock screen and counts the time the machine is both reachable and unlocked. Totals are kept
//! per calendar day in a small JSON file and can be printed as a report from the terminal.

pub mod cli;
pub mod fs;
pub mod monitor;
pub mod probe;
pub mod session;
pub mod startup;
pub mod status;
pub mod utils;
