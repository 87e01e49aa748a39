//! Debugger agent protocol
//!
//! This module implements our side of the conversation with the agent that
//! runs inside the debuggee: framing, message types, the connection and the
//! launcher that starts the debuggee with the agent loaded.

pub mod codec;
pub mod connection;
pub mod launcher;
pub mod types;

pub use connection::{AgentConnection, AgentListener, CommandSink, RequestSender};
pub use launcher::{Debuggee, LaunchMode};
pub use types::*;
