//! CLI command definitions
//!
//! Defines the clap commands for the debugger CLI.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::common::config::{Config, InterpretScope};
use crate::common::paths;

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new node and debug `module:function(args)` in it
    Launch {
        /// Module holding the entry point
        module: String,

        /// Entry function
        function: String,

        /// Arguments passed to the entry function
        #[arg(last = true)]
        args: Vec<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Debug an already running node
    Attach {
        /// Node name, e.g. app@localhost
        node: String,

        /// Distribution cookie of the node
        #[arg(long)]
        cookie: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Execute test scenarios defined in YAML files
    Test {
        /// Paths to the YAML test scenario files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },
}

impl Commands {
    /// Directory for the full-detail log file, if requested
    pub fn log_dir(&self) -> Option<PathBuf> {
        match self {
            Commands::Launch { session, .. } | Commands::Attach { session, .. } => {
                match (&session.log_dir, session.log) {
                    (Some(dir), _) => Some(dir.clone()),
                    (None, true) => paths::log_dir(),
                    (None, false) => None,
                }
            }
            Commands::Test { .. } => None,
        }
    }
}

/// Options shared by launch and attach
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Configuration file (default: the platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory searched for module sources; repeatable
    #[arg(long = "source-root", short = 'r')]
    pub source_roots: Vec<PathBuf>,

    /// Initial breakpoint(s): module:line or file.erl:line, optionally followed by "if <cond>"
    /// Can be specified multiple times: --break server:42 --break 'src/db.erl:10 if N > 3'
    #[arg(long = "break", short = 'b')]
    pub breakpoints: Vec<String>,

    /// Extra code path for the debuggee (-pa); repeatable
    #[arg(long = "code-path", short = 'p')]
    pub code_paths: Vec<PathBuf>,

    /// erl executable to use
    #[arg(long)]
    pub erl: Option<PathBuf>,

    /// Port the agent connects back to (default: any free port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Interpret every module under the source roots, not only those with breakpoints
    #[arg(long)]
    pub interpret_all: bool,

    /// Write a full-detail log to the per-user log directory
    #[arg(long)]
    pub log: bool,

    /// Write a full-detail log to this directory instead
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl SessionArgs {
    /// Override configuration fields with what was given on the command line
    pub fn apply(&self, config: &mut Config) {
        config.sources.roots.extend(self.source_roots.iter().cloned());
        config.runtime.code_paths.extend(self.code_paths.iter().cloned());
        if let Some(erl) = &self.erl {
            config.runtime.erl_path = Some(erl.clone());
        }
        if let Some(port) = self.port {
            config.session.listen_port = port;
        }
        if self.interpret_all {
            config.interpret.scope = InterpretScope::SourceRoots;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let mut config = Config::default();
        config.sources.roots.push(PathBuf::from("src"));

        let args = SessionArgs {
            source_roots: vec![PathBuf::from("test")],
            port: Some(5555),
            interpret_all: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.sources.roots, vec![PathBuf::from("src"), PathBuf::from("test")]);
        assert_eq!(config.session.listen_port, 5555);
        assert_eq!(config.interpret.scope, InterpretScope::SourceRoots);
        assert_eq!(config.runtime.erl_path, None);
    }
}
