//! erldbg - remote debugger front end for Erlang nodes
//!
//! This library drives a debugger agent running inside the debuggee over a
//! framed JSON connection: it launches or attaches to the node, keeps the
//! breakpoints and interpreted modules in sync, tracks which processes are
//! suspended and pairs evaluation replies with their requests.

pub mod cli;
pub mod commands;
pub mod common;
pub mod debugger;
pub mod node;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use debugger::{BreakpointLocation, DebugSession, SessionHandle, SessionRunner};
