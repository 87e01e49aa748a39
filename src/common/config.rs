//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::{config_path, default_agent_dir};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Erlang runtime used to start the debuggee
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Debugger support files injected into the debuggee
    #[serde(default)]
    pub agent: AgentConfig,

    /// Transport settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Which modules are interpreted up front
    #[serde(default)]
    pub interpret: InterpretConfig,

    /// Where module sources are looked up
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Erlang runtime settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RuntimeConfig {
    /// Path to the `erl` executable; searched on PATH when unset
    pub erl_path: Option<PathBuf>,

    /// Directories added to the code path with `-pa`
    #[serde(default)]
    pub code_paths: Vec<PathBuf>,

    /// Additional flags passed verbatim to `erl`
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

/// Debugger support file settings
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Directory containing the support files
    pub support_dir: Option<PathBuf>,

    /// Files copied into the debuggee working directory
    #[serde(default = "default_agent_files")]
    pub files: Vec<String>,

    /// Module started with `-run` inside the debuggee
    #[serde(default = "default_entry_module")]
    pub entry_module: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            support_dir: None,
            files: default_agent_files(),
            entry_module: default_entry_module(),
        }
    }
}

fn default_agent_files() -> Vec<String> {
    [
        "debug_condition.erl",
        "debug_eval.erl",
        "remote_debugger.erl",
        "remote_debugger_listener.erl",
        "remote_debugger_notifier.erl",
        "process_names.hrl",
        "remote_debugger_messages.hrl",
        "trace_utils.hrl",
        "debugnode.beam",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_entry_module() -> String {
    "debugnode".to_string()
}

/// Transport settings
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Local port the agent connects back to (0 picks a free port)
    #[serde(default)]
    pub listen_port: u16,

    /// How long to wait for the agent to connect after launch
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            accept_timeout_secs: default_accept_timeout(),
        }
    }
}

fn default_accept_timeout() -> u64 {
    30
}

/// Which modules get interpreted when the session starts
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpretScope {
    /// Only modules that receive a breakpoint
    #[default]
    BreakpointFiles,
    /// Every module found under the source roots
    SourceRoots,
}

/// Interpretation settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct InterpretConfig {
    /// Initial interpretation scope
    #[serde(default)]
    pub scope: InterpretScope,

    /// Module names that are never interpreted
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Source lookup settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SourcesConfig {
    /// Directories scanned for `.erl` files
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Prefer files under `test` directories when a module name is ambiguous
    #[serde(default)]
    pub prefer_test_sources: bool,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the `erl` executable
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn erl_executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.runtime.erl_path {
            return Ok(path.clone());
        }
        which::which("erl").map_err(|_| {
            Error::Config("'erl' not found on PATH; set runtime.erl_path in config".to_string())
        })
    }

    /// Resolve the directory holding the debugger support files
    pub fn agent_dir(&self) -> Result<PathBuf> {
        self.agent
            .support_dir
            .clone()
            .or_else(default_agent_dir)
            .ok_or_else(|| Error::Config("agent.support_dir is not set".to_string()))
    }
}
