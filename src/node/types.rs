//! Debugger agent message types
//!
//! The agent running inside the debuggee speaks a small JSON protocol.
//! Inbound messages are decoded exactly once, here, into [`Event`]; the
//! session never inspects raw JSON.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// === Identifiers and values ===

/// Identifier of a logical process inside the debuggee, e.g. `<0.84.0>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessHandle(String);

impl ProcessHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value decoded from the debuggee
///
/// Kinds without a variant of their own (bitstrings, improper lists and
/// whatever newer agents send) decode as [`Term::Other`] at any depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[serde(from = "WireTerm")]
pub enum Term {
    Integer(i64),
    Float(f64),
    Atom(String),
    String(String),
    Binary(Vec<u8>),
    Pid(ProcessHandle),
    Port(String),
    Reference(String),
    Tuple(Vec<Term>),
    List(Vec<Term>),
    Map(Vec<(Term, Term)>),
    Fun(String),
    /// Unmodelled kind, kept with the agent's rendering
    Other { kind: String, text: String },
}

/// Inbound shape of a [`Term`]: a known kind, or anything carrying a `type` tag
#[derive(Deserialize)]
#[serde(untagged)]
enum WireTerm {
    Known(KnownTerm),
    Unknown {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        value: serde_json::Value,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum KnownTerm {
    Integer(i64),
    Float(f64),
    Atom(String),
    String(String),
    Binary(Vec<u8>),
    Pid(ProcessHandle),
    Port(String),
    Reference(String),
    Tuple(Vec<Term>),
    List(Vec<Term>),
    Map(Vec<(Term, Term)>),
    Fun(String),
    Other { kind: String, text: String },
}

impl From<WireTerm> for Term {
    fn from(wire: WireTerm) -> Self {
        match wire {
            WireTerm::Known(known) => match known {
                KnownTerm::Integer(n) => Term::Integer(n),
                KnownTerm::Float(x) => Term::Float(x),
                KnownTerm::Atom(a) => Term::Atom(a),
                KnownTerm::String(s) => Term::String(s),
                KnownTerm::Binary(b) => Term::Binary(b),
                KnownTerm::Pid(p) => Term::Pid(p),
                KnownTerm::Port(p) => Term::Port(p),
                KnownTerm::Reference(r) => Term::Reference(r),
                KnownTerm::Tuple(items) => Term::Tuple(items),
                KnownTerm::List(items) => Term::List(items),
                KnownTerm::Map(entries) => Term::Map(entries),
                KnownTerm::Fun(name) => Term::Fun(name),
                KnownTerm::Other { kind, text } => Term::Other { kind, text },
            },
            WireTerm::Unknown { kind, value } => {
                let text = match value {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                };
                Term::Other { kind, text }
            }
        }
    }
}

impl Term {
    /// Short type label shown next to values
    pub fn type_name(&self) -> &'static str {
        match self {
            Term::Integer(_) => "integer",
            Term::Float(_) => "float",
            Term::Atom(_) => "atom",
            Term::String(_) => "string",
            Term::Binary(_) => "binary",
            Term::Pid(_) => "pid",
            Term::Port(_) => "port",
            Term::Reference(_) => "reference",
            Term::Tuple(_) => "tuple",
            Term::List(_) => "list",
            Term::Map(_) => "map",
            Term::Fun(_) => "fun",
            Term::Other { .. } => "other",
        }
    }

    /// Number of direct children for container values
    pub fn child_count(&self) -> usize {
        match self {
            Term::Tuple(items) | Term::List(items) => items.len(),
            Term::Map(entries) => entries.len(),
            _ => 0,
        }
    }
}

/// Atoms that can be printed without quotes
fn is_bare_atom(atom: &str) -> bool {
    let mut chars = atom.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '@')
        }
        _ => false,
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Integer(n) => write!(f, "{}", n),
            Term::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Term::Float(x) => write!(f, "{}", x),
            Term::Atom(a) if is_bare_atom(a) => f.write_str(a),
            Term::Atom(a) => write!(f, "'{}'", a.replace('\'', "\\'")),
            Term::String(s) => write!(f, "{:?}", s),
            Term::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) if text.chars().all(|c| !c.is_control() || c == '\n') => {
                    write!(f, "<<{:?}>>", text)
                }
                _ => {
                    f.write_str("<<")?;
                    for (i, b) in bytes.iter().enumerate() {
                        if i > 0 {
                            f.write_str(",")?;
                        }
                        write!(f, "{}", b)?;
                    }
                    f.write_str(">>")
                }
            },
            Term::Pid(pid) => write!(f, "{}", pid),
            Term::Port(p) => write!(f, "#Port{}", p),
            Term::Reference(r) => write!(f, "#Ref{}", r),
            Term::Tuple(items) => {
                f.write_str("{")?;
                write_seq(f, items)?;
                f.write_str("}")
            }
            Term::List(items) => {
                f.write_str("[")?;
                write_seq(f, items)?;
                f.write_str("]")
            }
            Term::Map(entries) => {
                f.write_str("#{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} => {}", k, v)?;
                }
                f.write_str("}")
            }
            Term::Fun(name) => write!(f, "#Fun<{}>", name),
            Term::Other { text, .. } => f.write_str(text),
        }
    }
}

/// A variable bound in a stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableBinding {
    pub name: String,
    pub value: Term,
}

/// One call-stack frame of a suspended process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceElement {
    pub module: String,
    /// Function name as reported by the runtime, e.g. `loop` or `-loop/2-fun-0-`
    pub function: String,
    #[serde(default)]
    pub arity: Option<u32>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub bindings: Vec<VariableBinding>,
}

/// Scheduling status of a process as reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Break,
    Running,
    Waiting,
    Idle,
    Exit,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Break => "break",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
            Self::Exit => "exit",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// State of one process captured when a suspend notification was processed
///
/// Snapshots are never mutated; a newer snapshot for the same pid replaces
/// the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: ProcessHandle,
    #[serde(default)]
    pub initial_call: Option<String>,
    #[serde(default)]
    pub status: ProcessStatus,
    /// Module the process is stopped in, if it is at a break
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    /// Call stack, innermost frame first
    #[serde(default)]
    pub stack: Vec<TraceElement>,
}

impl ProcessSnapshot {
    /// Variable bindings of the innermost frame
    pub fn bindings(&self) -> &[VariableBinding] {
        self.stack
            .first()
            .map(|frame| frame.bindings.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the process is stopped at a known source line
    pub fn is_at_break(&self) -> bool {
        self.module.is_some() && self.line.is_some()
    }
}

/// Severity of a user-visible message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// === Inbound events ===

/// Message received from the debugger agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Agent is up and the debuggee is running
    DebuggerStarted,
    /// Agent shut down or the connection closed
    DebuggerStopped,
    /// Result of an interpret request; `failed` lists modules that could not be interpreted
    InterpretModulesResponse {
        node: String,
        #[serde(default)]
        failed: Vec<String>,
    },
    /// Result of attaching to a remote node
    DebugRemoteNodeResponse {
        node: String,
        #[serde(default)]
        error: Option<String>,
    },
    /// Result of a set breakpoint request
    SetBreakpointResponse {
        module: String,
        line: u32,
        #[serde(default)]
        error: Option<String>,
    },
    /// A process suspended; `pid` is absent for plain notifications
    BreakpointReached {
        #[serde(default)]
        pid: Option<ProcessHandle>,
        #[serde(default)]
        snapshots: Vec<ProcessSnapshot>,
    },
    /// Reply to the oldest outstanding evaluate request
    EvaluateResponse {
        #[serde(default)]
        result: Option<Term>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Free-form message for the user
    Message {
        text: String,
        #[serde(default)]
        severity: Severity,
    },
    /// Anything that could not be decoded
    #[serde(skip)]
    Unknown { raw: String, reason: String },
}

impl Event {
    /// Decode one frame body; never fails, undecodable input becomes [`Event::Unknown`]
    ///
    /// A malformed evaluation reply still decodes as an error reply so the
    /// oldest pending evaluation is completed and later replies stay paired.
    pub fn decode(json: &str) -> Self {
        match serde_json::from_str(json) {
            Ok(event) => event,
            Err(e) if is_evaluate_response(json) => Event::EvaluateResponse {
                result: None,
                error: Some(format!("undecodable evaluation reply: {}", e)),
            },
            Err(e) => Event::Unknown {
                raw: json.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Event name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::DebuggerStarted => "debugger_started",
            Event::DebuggerStopped => "debugger_stopped",
            Event::InterpretModulesResponse { .. } => "interpret_modules_response",
            Event::DebugRemoteNodeResponse { .. } => "debug_remote_node_response",
            Event::SetBreakpointResponse { .. } => "set_breakpoint_response",
            Event::BreakpointReached { .. } => "breakpoint_reached",
            Event::EvaluateResponse { .. } => "evaluate_response",
            Event::Message { .. } => "message",
            Event::Unknown { .. } => "unknown",
        }
    }
}

fn is_evaluate_response(json: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(json)
        .ok()
        .and_then(|value| value.get("event")?.as_str().map(|tag| tag == "evaluate_response"))
        .unwrap_or(false)
}

// === Outbound requests ===

/// Command sent to the debugger agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Start `module:function(args)` under the debugger (local launch)
    RunDebugger {
        module: String,
        function: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Attach the agent to an already running node
    DebugRemoteNode {
        node: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cookie: Option<String>,
    },
    /// Make modules debuggable; identified by their source files
    InterpretModules { files: Vec<PathBuf> },
    SetBreakpoint {
        module: String,
        line: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    RemoveBreakpoint { module: String, line: u32 },
    StepInto { pid: ProcessHandle },
    StepOver { pid: ProcessHandle },
    StepOut { pid: ProcessHandle },
    Continue { pid: ProcessHandle },
    Evaluate {
        pid: ProcessHandle,
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<usize>,
    },
    Stop,
}

impl Request {
    /// Command name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::RunDebugger { .. } => "run_debugger",
            Request::DebugRemoteNode { .. } => "debug_remote_node",
            Request::InterpretModules { .. } => "interpret_modules",
            Request::SetBreakpoint { .. } => "set_breakpoint",
            Request::RemoveBreakpoint { .. } => "remove_breakpoint",
            Request::StepInto { .. } => "step_into",
            Request::StepOver { .. } => "step_over",
            Request::StepOut { .. } => "step_out",
            Request::Continue { .. } => "continue",
            Request::Evaluate { .. } => "evaluate",
            Request::Stop => "stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_breakpoint_reached() {
        let json = r#"{
            "event": "breakpoint_reached",
            "pid": "<0.84.0>",
            "snapshots": [{
                "pid": "<0.84.0>",
                "status": "break",
                "module": "server",
                "line": 10,
                "stack": [{
                    "module": "server",
                    "function": "loop",
                    "arity": 1,
                    "bindings": [{"name": "State", "value": {"type": "integer", "value": 3}}]
                }]
            }]
        }"#;

        match Event::decode(json) {
            Event::BreakpointReached { pid, snapshots } => {
                assert_eq!(pid, Some(ProcessHandle::new("<0.84.0>")));
                assert_eq!(snapshots.len(), 1);
                assert_eq!(snapshots[0].status, ProcessStatus::Break);
                assert_eq!(snapshots[0].bindings()[0].name, "State");
                assert!(snapshots[0].is_at_break());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_notify_without_pid() {
        let json = r#"{"event": "breakpoint_reached", "snapshots": []}"#;
        assert_eq!(
            Event::decode(json),
            Event::BreakpointReached {
                pid: None,
                snapshots: Vec::new()
            }
        );
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let json = r#"{"pid": "<0.1.0>", "status": "garbage_collecting"}"#;
        let snapshot: ProcessSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status, ProcessStatus::Unknown);
        assert!(!snapshot.is_at_break());
    }

    #[test]
    fn test_undecodable_frame_becomes_unknown() {
        let event = Event::decode(r#"{"event": "flux_capacitor"}"#);
        assert!(matches!(event, Event::Unknown { .. }));
        assert_eq!(event.name(), "unknown");

        let event = Event::decode("not json");
        match event {
            Event::Unknown { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unmodelled_terms_decode_as_other() {
        let json = r#"{"type": "list", "value": [
            {"type": "integer", "value": 1},
            {"type": "bitstring", "value": "<<5:3>>"},
            {"type": "record", "value": {"name": "state"}}
        ]}"#;
        let term: Term = serde_json::from_str(json).unwrap();
        assert_eq!(
            term,
            Term::List(vec![
                Term::Integer(1),
                Term::Other {
                    kind: "bitstring".to_string(),
                    text: "<<5:3>>".to_string()
                },
                Term::Other {
                    kind: "record".to_string(),
                    text: r#"{"name":"state"}"#.to_string()
                },
            ])
        );
        assert_eq!(term.to_string(), r#"[1, <<5:3>>, {"name":"state"}]"#);

        let back: Term = serde_json::from_value(serde_json::to_value(&term).unwrap()).unwrap();
        assert_eq!(back, term);
    }

    #[test]
    fn test_malformed_evaluation_reply_is_an_error_reply() {
        let event = Event::decode(r#"{"event": "evaluate_response", "result": 42}"#);
        match event {
            Event::EvaluateResponse {
                result: None,
                error: Some(reason),
            } => assert!(reason.starts_with("undecodable evaluation reply")),
            other => panic!("unexpected event: {:?}", other),
        }

        let event = Event::decode(
            r#"{"event": "evaluate_response", "result": {"type": "bitstring", "value": "<<1:1>>"}}"#,
        );
        assert!(matches!(
            event,
            Event::EvaluateResponse {
                result: Some(Term::Other { .. }),
                error: None
            }
        ));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = Request::SetBreakpoint {
            module: "server".to_string(),
            line: 12,
            condition: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "set_breakpoint", "module": "server", "line": 12})
        );

        let json = serde_json::to_value(Request::Stop).unwrap();
        assert_eq!(json, serde_json::json!({"command": "stop"}));
    }

    #[test]
    fn test_term_display() {
        let term = Term::Tuple(vec![
            Term::Atom("ok".to_string()),
            Term::List(vec![Term::Integer(1), Term::Float(2.0)]),
            Term::Map(vec![(
                Term::Atom("Key".to_string()),
                Term::Binary(b"abc".to_vec()),
            )]),
            Term::Pid(ProcessHandle::new("<0.5.0>")),
        ]);
        assert_eq!(
            term.to_string(),
            "{ok, [1, 2.0], #{'Key' => <<\"abc\">>}, <0.5.0>}"
        );
        assert_eq!(term.type_name(), "tuple");
        assert_eq!(term.child_count(), 4);
        assert_eq!(Term::Binary(vec![0, 255]).to_string(), "<<0,255>>");
    }
}
