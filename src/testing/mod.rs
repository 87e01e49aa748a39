//! Scenario test runner
//!
//! Reads YAML scenarios that script agent events and user actions, replays
//! them against a debug session with recording stand-ins for the transport
//! and the presentation layer, and checks what was sent and signalled.

mod config;
pub mod recorder;
mod runner;

pub use config::*;
pub use runner::{load_scenario, matches_subset, run, run_scenario, TestResult};
