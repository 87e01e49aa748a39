//! Error types for the debugger
//!
//! Session-fatal failures (launch, transport) are separated from the
//! per-request outcomes that the session reports and keeps running through.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger
#[derive(Error, Debug)]
pub enum Error {
    // === Launch / Transport Errors (fatal to the session) ===
    #[error("Failed to launch debuggee: {0}")]
    LaunchFailed(String),

    #[error("Debugger support file '{name}' not found in {dir}")]
    AgentFileMissing { name: String, dir: String },

    #[error("Failed to establish debugger connection: {0}")]
    ConnectionFailed(String),

    #[error("Debugger agent disconnected")]
    AgentDisconnected,

    #[error("Failed to debug remote node '{node}': {reason}")]
    RemoteNodeFailed { node: String, reason: String },

    #[error("Timed out after {0} seconds waiting for the debugger agent to connect")]
    Timeout(u64),

    // === Protocol Errors ===
    /// One bad frame; the stream is still at a frame boundary
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The stream can no longer be split into frames
    #[error("Lost frame boundary on the agent connection: {0}")]
    FramingLost(String),

    // === Session Errors ===
    #[error("No debug session active")]
    SessionNotActive,

    #[error("Session terminated: {0}")]
    SessionTerminated(String),

    #[error("No process is suspended")]
    NoSuspendedProcess,

    #[error("Process {0} is not suspended")]
    UnknownProcess(String),

    // === Location Errors ===
    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    #[error("Module '{0}' not found in any source root")]
    ModuleNotFound(String),

    #[error("Unknown command '{0}'. Type 'help' for a list of commands")]
    UnknownCommand(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a launch failure error
    pub fn launch_failed(what: &str, reason: impl std::fmt::Display) -> Self {
        Self::LaunchFailed(format!("{}: {}", what, reason))
    }

    /// Create a missing support file error
    pub fn agent_file_missing(name: &str, dir: &std::path::Path) -> Self {
        Self::AgentFileMissing {
            name: name.to_string(),
            dir: dir.display().to_string(),
        }
    }

    /// Create a remote node failure error
    pub fn remote_node_failed(node: &str, reason: &str) -> Self {
        Self::RemoteNodeFailed {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the debug session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::LaunchFailed(_)
                | Error::AgentFileMissing { .. }
                | Error::ConnectionFailed(_)
                | Error::AgentDisconnected
                | Error::FramingLost(_)
                | Error::RemoteNodeFailed { .. }
                | Error::Timeout(_)
        )
    }
}
