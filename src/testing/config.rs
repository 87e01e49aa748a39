//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML scenarios. A scenario
//! scripts what the agent reports and what the user does, and states what
//! the session must send and signal in response.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::common::config::InterpretConfig;
use crate::node::{Event, LaunchMode, ProcessHandle};

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Module name to source file, as the project index would resolve them
    #[serde(default)]
    pub modules: BTreeMap<String, PathBuf>,
    /// How the session is started
    pub target: TargetConfig,
    /// Modules interpreted up front
    #[serde(default)]
    pub interpret: InterpretConfig,
    /// Whether to drop the startup commands and signals before the first step
    #[serde(default = "default_true")]
    pub skip_startup: bool,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

fn default_true() -> bool {
    true
}

/// Configuration for the debug target
#[derive(Deserialize, Debug)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TargetConfig {
    Run {
        module: String,
        function: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Attach {
        node: String,
        cookie: Option<String>,
    },
}

impl TargetConfig {
    pub fn launch_mode(&self) -> LaunchMode {
        match self {
            TargetConfig::Run {
                module,
                function,
                args,
            } => LaunchMode::Run {
                module: module.clone(),
                function: function.clone(),
                args: args.clone(),
            },
            TargetConfig::Attach { node, cookie } => LaunchMode::Attach {
                node: node.clone(),
                cookie: cookie.clone(),
            },
        }
    }
}

/// A single test step in the execution flow
///
/// Every step is one dispatch turn: queued breakpoint commands are flushed
/// after it. Use `batch` to put several user actions in the same turn.
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Add a breakpoint (`module:line` or `file.erl:line`)
    Break {
        at: String,
        condition: Option<String>,
        /// Expected error substring, if the command should fail
        error: Option<String>,
    },
    /// Remove a breakpoint
    Clear { at: String, error: Option<String> },
    /// Deliver an event as if the agent had sent it
    Event { event: Event },
    StepOver { error: Option<String> },
    StepInto { error: Option<String> },
    StepOut { error: Option<String> },
    Continue { error: Option<String> },
    /// Switch the displayed process
    Select {
        pid: ProcessHandle,
        error: Option<String>,
    },
    /// Submit an evaluation; the outcome is checked with `expect_evaluations`
    Evaluate {
        expression: String,
        pid: Option<ProcessHandle>,
        frame: Option<usize>,
    },
    Stop,
    /// Several actions in one dispatch turn
    Batch { steps: Vec<TestStep> },
    /// Signals emitted since the last check, in order
    ///
    /// Each expected entry only needs the fields it cares about; a field
    /// named `<name>_contains` matches a substring of `<name>`.
    ExpectSignals { signals: Vec<serde_json::Value> },
    /// Commands sent since the last check, in order, matched like signals
    ExpectCommands { commands: Vec<serde_json::Value> },
    /// Rendered evaluation outcomes completed since the last check
    ///
    /// Successes render as the value, failures as `error: <reason>`.
    ExpectEvaluations { results: Vec<String> },
    /// Current session state
    ExpectState {
        state: Option<String>,
        active: Option<ProcessHandle>,
        breakpoints: Option<usize>,
    },
}

impl TestStep {
    /// Short label for progress output
    pub fn label(&self) -> String {
        match self {
            TestStep::Break { at, condition, .. } => match condition {
                Some(c) => format!("break {} if {}", at, c),
                None => format!("break {}", at),
            },
            TestStep::Clear { at, .. } => format!("clear {}", at),
            TestStep::Event { event } => format!("event {}", event.name()),
            TestStep::StepOver { .. } => "step over".to_string(),
            TestStep::StepInto { .. } => "step into".to_string(),
            TestStep::StepOut { .. } => "step out".to_string(),
            TestStep::Continue { .. } => "continue".to_string(),
            TestStep::Select { pid, .. } => format!("select {}", pid),
            TestStep::Evaluate { expression, .. } => format!("eval {}", expression),
            TestStep::Stop => "stop".to_string(),
            TestStep::Batch { steps } => format!("batch of {}", steps.len()),
            TestStep::ExpectSignals { signals } => format!("expect {} signal(s)", signals.len()),
            TestStep::ExpectCommands { commands } => {
                format!("expect {} command(s)", commands.len())
            }
            TestStep::ExpectEvaluations { results } => {
                format!("expect {} evaluation(s)", results.len())
            }
            TestStep::ExpectState { .. } => "expect state".to_string(),
        }
    }
}
