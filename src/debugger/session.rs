//! Debug session coordinator
//!
//! [`DebugSession`] owns all event-driven state: the position mapper, the
//! breakpoint registry, the evaluation queue and the suspension tracker.
//! It is synchronous; the async loop in [`super::runner`] feeds it events
//! and user commands one at a time.

use std::fmt;
use std::sync::Arc;

use crate::common::config::{InterpretConfig, InterpretScope};
use crate::common::{Error, Result};
use crate::node::{CommandSink, Event, LaunchMode, ProcessHandle, Request, Severity, Term};

use super::breakpoints::{AddOutcome, Breakpoint, BreakpointRegistry, NOT_INTERPRETED};
use super::evaluation::{EvalCallback, EvalContext, EvalOutcome, EvaluationCorrelator, EvaluationError};
use super::listener::DebugListener;
use super::position::{
    BreakpointKey, BreakpointLocation, ModuleResolver, PositionMapper, SourcePosition,
};
use super::suspension::{Decision, SuspendContext, SuspensionTracker};

/// Whether the dispatch loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Session lifecycle as seen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, initial command not sent yet
    Idle,
    /// Initial command sent, agent has not confirmed
    Starting,
    Running,
    Suspended,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Stepping and resuming commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    Into,
    Out,
    Continue,
}

impl StepKind {
    fn request(self, pid: ProcessHandle) -> Request {
        match self {
            StepKind::Over => Request::StepOver { pid },
            StepKind::Into => Request::StepInto { pid },
            StepKind::Out => Request::StepOut { pid },
            StepKind::Continue => Request::Continue { pid },
        }
    }
}

/// Read-only copy of the session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub context: Option<SuspendContext>,
    pub breakpoints: Vec<Breakpoint>,
    pub pending_evaluations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Active,
    Terminated,
}

/// Coordinator between the agent and the user
pub struct DebugSession {
    sink: Box<dyn CommandSink>,
    listener: Box<dyn DebugListener>,
    mapper: PositionMapper,
    registry: BreakpointRegistry,
    correlator: EvaluationCorrelator,
    tracker: SuspensionTracker,
    lifecycle: Lifecycle,
}

impl DebugSession {
    pub fn new(
        sink: Box<dyn CommandSink>,
        listener: Box<dyn DebugListener>,
        mapper: PositionMapper,
    ) -> Self {
        Self {
            sink,
            listener,
            mapper,
            registry: BreakpointRegistry::new(),
            correlator: EvaluationCorrelator::new(),
            tracker: SuspensionTracker::new(),
            lifecycle: Lifecycle::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.lifecycle {
            Lifecycle::Idle => SessionState::Idle,
            Lifecycle::Starting => SessionState::Starting,
            Lifecycle::Terminated => SessionState::Terminated,
            Lifecycle::Active if self.tracker.is_suspended() => SessionState::Suspended,
            Lifecycle::Active => SessionState::Running,
        }
    }

    pub fn context(&self) -> Option<&SuspendContext> {
        self.tracker.context()
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.registry.iter()
    }

    /// Swap in a rebuilt source index; cached positions are dropped
    ///
    /// Registered breakpoints keep the positions they were resolved to.
    pub fn set_resolver(&mut self, resolver: Arc<dyn ModuleResolver>) {
        tracing::debug!("Source index replaced");
        self.mapper.set_resolver(resolver);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state(),
            context: self.tracker.context().cloned(),
            breakpoints: self.registry.iter().cloned().collect(),
            pending_evaluations: self.correlator.pending(),
        }
    }

    /// Interpret the configured modules, re-send breakpoints and start the target
    #[tracing::instrument(skip(self, interpret), fields(target = %mode.describe()))]
    pub fn start(&mut self, mode: &LaunchMode, interpret: &InterpretConfig) -> Result<()> {
        let initial = mode.initial_request()?;

        self.registry.reset();
        self.tracker.reset();
        if interpret.scope == InterpretScope::SourceRoots {
            let modules: Vec<_> = self
                .mapper
                .resolver()
                .all_modules()
                .into_iter()
                .filter(|(module, _)| !interpret.exclude.contains(module))
                .collect();
            tracing::debug!(count = modules.len(), "Interpreting source roots");
            self.registry.interpret(modules);
        }

        self.send(initial)?;
        self.lifecycle = Lifecycle::Starting;
        Ok(())
    }

    /// Route one inbound event
    pub fn handle_event(&mut self, event: Event) -> Result<Flow> {
        tracing::debug!(event = event.name(), "Handling agent event");
        if self.lifecycle == Lifecycle::Terminated {
            tracing::debug!(event = event.name(), "Session terminated, ignoring event");
            return Ok(Flow::Exit);
        }

        match event {
            Event::DebuggerStarted => {
                self.lifecycle = Lifecycle::Active;
                self.listener.message("Debug process started", Severity::Info);
                self.listener.debugger_started();
            }
            Event::DebuggerStopped => {
                self.listener.message("Debug process stopped", Severity::Info);
                self.terminate();
                return Ok(Flow::Exit);
            }
            Event::InterpretModulesResponse { node, failed } => {
                if failed.is_empty() {
                    tracing::debug!(%node, "Modules interpreted");
                } else {
                    self.on_interpret_failed(&node, &failed);
                }
            }
            Event::DebugRemoteNodeResponse { node, error } => match error {
                None => {
                    self.lifecycle = Lifecycle::Active;
                    self.listener
                        .message(&format!("Attached to node '{}'", node), Severity::Info);
                }
                Some(reason) => {
                    self.listener.message(
                        &format!("Failed to debug remote node '{}'. Details: {}", node, reason),
                        Severity::Error,
                    );
                    return Err(Error::remote_node_failed(&node, &reason));
                }
            },
            Event::SetBreakpointResponse {
                module,
                line,
                error,
            } => {
                let key = BreakpointKey::new(module, line);
                match error {
                    None => {
                        if self.registry.on_set_confirmed(&key).is_none() {
                            tracing::debug!(breakpoint = %key, "Confirmation for a removed breakpoint");
                        }
                    }
                    Some(reason) => match self.registry.on_set_failed(&key, &reason) {
                        Some(bp) => self.listener.breakpoint_invalid(bp, &reason),
                        None => {
                            tracing::warn!(breakpoint = %key, %reason, "Failed to set unknown breakpoint")
                        }
                    },
                }
            }
            Event::BreakpointReached { pid, snapshots } => {
                match self.tracker.on_suspended(pid, snapshots) {
                    Decision::Stop(context) => self.signal_stop(&context),
                    Decision::Ignored(reason) => {
                        tracing::debug!(%reason, "Suspend notification ignored");
                    }
                }
            }
            Event::EvaluateResponse { result, error } => {
                let outcome: EvalOutcome = match (result, error) {
                    (_, Some(error)) => Err(EvaluationError(error)),
                    (Some(value), None) => Ok(value),
                    (None, None) => Err(EvaluationError("empty evaluation reply".to_string())),
                };
                self.correlator.on_reply(outcome);
            }
            Event::Message { text, severity } => self.listener.message(&text, severity),
            Event::Unknown { raw, reason } => {
                tracing::warn!(%reason, "Unknown message from agent");
                self.listener
                    .message(&format!("Unknown message received: {}", raw), Severity::Warning);
            }
        }

        Ok(Flow::Continue)
    }

    fn on_interpret_failed(&mut self, node: &str, modules: &[String]) {
        tracing::warn!(%node, ?modules, "Failed to interpret modules");
        let affected = self.registry.on_interpret_failed(modules);
        self.listener.message(
            &format!(
                "Failed to interpret modules on node {}: {}.\nMake sure they are compiled with \
                 debug_info option, their sources are located in same directory as .beam files, \
                 modules are available on the node.",
                node,
                modules.join(", ")
            ),
            Severity::Warning,
        );
        for bp in &affected {
            self.listener.breakpoint_invalid(bp, NOT_INTERPRETED);
        }
    }

    fn signal_stop(&mut self, context: &SuspendContext) {
        let Some(snapshot) = context.active_snapshot() else {
            return;
        };
        let position = self.mapper.for_snapshot(snapshot);
        let breakpoint = match (&snapshot.module, snapshot.line) {
            (Some(module), Some(line)) => self.registry.lookup(&BreakpointKey::new(module.clone(), line)),
            _ => None,
        };

        match breakpoint {
            Some(bp) => self.listener.breakpoint_reached(bp, context),
            None => self.listener.stopped(position.as_ref(), context),
        }
    }

    fn terminate(&mut self) {
        self.correlator.fail_all("session terminated");
        self.tracker.reset();
        self.lifecycle = Lifecycle::Terminated;
        self.listener.debugger_stopped();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.lifecycle == Lifecycle::Terminated {
            return Err(Error::SessionNotActive);
        }
        Ok(())
    }

    // === Breakpoints ===

    /// Register a breakpoint; returns it as stored
    pub fn add_breakpoint(
        &mut self,
        location: &BreakpointLocation,
        condition: Option<String>,
    ) -> Result<Breakpoint> {
        let position = self.mapper.resolve_location(location)?;
        self.add_breakpoint_at(position, condition)
    }

    /// Register a breakpoint at an already resolved position
    pub fn add_breakpoint_at(
        &mut self,
        position: SourcePosition,
        condition: Option<String>,
    ) -> Result<Breakpoint> {
        self.ensure_live()?;
        let key = position.key();
        let outcome = self.registry.add(position, condition);
        let bp = self
            .registry
            .lookup(&key)
            .ok_or_else(|| Error::Internal(format!("breakpoint {} vanished", key)))?;

        if outcome == AddOutcome::Unreachable {
            self.listener.breakpoint_invalid(bp, NOT_INTERPRETED);
        }
        Ok(bp.clone())
    }

    /// Remove a breakpoint; removing one that was never added does nothing
    pub fn remove_breakpoint(&mut self, location: &BreakpointLocation) -> Result<Option<Breakpoint>> {
        self.ensure_live()?;
        let key = match location {
            BreakpointLocation::Module { module, line } => BreakpointKey::new(module.clone(), *line),
            BreakpointLocation::File { file, line } => self.mapper.from_file(file, *line)?.key(),
        };
        Ok(self.registry.remove(&key))
    }

    // === Execution control ===

    /// Step or resume the displayed process
    pub fn step(&mut self, kind: StepKind) -> Result<()> {
        self.ensure_live()?;
        let pid = self.tracker.resume().ok_or(Error::NoSuspendedProcess)?;
        tracing::debug!(?kind, %pid, "Resuming process");
        self.send(kind.request(pid))
    }

    pub fn step_over(&mut self) -> Result<()> {
        self.step(StepKind::Over)
    }

    pub fn step_into(&mut self) -> Result<()> {
        self.step(StepKind::Into)
    }

    pub fn step_out(&mut self) -> Result<()> {
        self.step(StepKind::Out)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.step(StepKind::Continue)
    }

    /// Run to a source position
    ///
    /// The agent has no run-to-line command; this steps into once.
    pub fn run_to_position(&mut self, location: &BreakpointLocation) -> Result<()> {
        self.ensure_live()?;
        let position = self.mapper.resolve_location(location)?;
        tracing::debug!(%position, "Run to position falls back to step into");
        self.step(StepKind::Into)
    }

    /// Display another suspended process
    pub fn select_process(&mut self, pid: &ProcessHandle) -> Result<SuspendContext> {
        self.ensure_live()?;
        if !self.tracker.is_suspended() {
            return Err(Error::NoSuspendedProcess);
        }
        self.tracker
            .select(pid)
            .cloned()
            .ok_or_else(|| Error::UnknownProcess(pid.to_string()))
    }

    // === Evaluation ===

    /// Evaluate an expression in a suspended process
    ///
    /// The callback is always completed exactly once, with the agent's
    /// reply or with the error that kept the request from being sent.
    pub fn evaluate(
        &mut self,
        expression: &str,
        context: EvalContext,
        callback: EvalCallback,
    ) -> Result<()> {
        let request = match self.evaluate_request(expression, &context) {
            Ok(request) => request,
            Err(e) => {
                callback(Err(EvaluationError(e.to_string())));
                return Err(e);
            }
        };

        if let Err(e) = self.flush() {
            callback(Err(EvaluationError(e.to_string())));
            return Err(e);
        }
        self.correlator.submit(self.sink.as_ref(), request, callback)
    }

    fn evaluate_request(&self, expression: &str, context: &EvalContext) -> Result<Request> {
        self.ensure_live()?;
        let suspended = self.tracker.context().ok_or(Error::NoSuspendedProcess)?;
        let pid = context.pid.clone().unwrap_or_else(|| suspended.active.clone());
        let snapshot = suspended
            .snapshot(&pid)
            .ok_or_else(|| Error::UnknownProcess(pid.to_string()))?;

        let module = snapshot
            .stack
            .get(context.frame.unwrap_or(0))
            .map(|frame| frame.module.clone())
            .or_else(|| snapshot.module.clone());

        Ok(Request::Evaluate {
            pid,
            expression: expression.to_string(),
            module,
            frame: context.frame,
        })
    }

    /// Value of a variable in the displayed process's top frame
    pub fn binding(&self, name: &str) -> Option<&Term> {
        self.tracker
            .context()?
            .active_snapshot()?
            .bindings()
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.value)
    }

    // === Lifecycle ===

    /// Stop the debugger; the caller tears down the transport afterwards
    pub fn stop(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Terminated {
            return Ok(());
        }
        if let Err(e) = self.send(Request::Stop) {
            tracing::debug!(error = %e, "Stop could not be sent");
        }
        self.terminate();
        Ok(())
    }

    /// Send everything the breakpoint registry has queued
    pub fn flush(&mut self) -> Result<()> {
        for request in self.registry.take_commands() {
            self.sink.send(request)?;
        }
        Ok(())
    }

    fn send(&mut self, request: Request) -> Result<()> {
        self.flush()?;
        self.sink.send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::position::StaticResolver;
    use crate::node::{ProcessSnapshot, ProcessStatus, TraceElement, VariableBinding};
    use crate::testing::recorder::{RecordingListener, RecordingSink, Signal};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        session: DebugSession,
        sink: RecordingSink,
        listener: RecordingListener,
    }

    fn fixture() -> Fixture {
        let resolver = StaticResolver::new()
            .with("m", "src/m.erl")
            .with("helper", "src/helper.erl")
            .with("m_tests", "test/m_tests.erl");
        let sink = RecordingSink::new();
        let listener = RecordingListener::new();
        let session = DebugSession::new(
            Box::new(sink.clone()),
            Box::new(listener.clone()),
            PositionMapper::new(Arc::new(resolver)),
        );
        Fixture {
            session,
            sink,
            listener,
        }
    }

    fn run_mode() -> LaunchMode {
        LaunchMode::Run {
            module: "m".to_string(),
            function: "main".to_string(),
            args: vec![],
        }
    }

    fn started() -> Fixture {
        let mut f = fixture();
        f.session.start(&run_mode(), &InterpretConfig::default()).unwrap();
        f.session.handle_event(Event::DebuggerStarted).unwrap();
        f.sink.take();
        f.listener.take();
        f
    }

    fn snapshot(pid: &str, line: u32) -> ProcessSnapshot {
        ProcessSnapshot {
            pid: ProcessHandle::new(pid),
            initial_call: Some("m:main/0".to_string()),
            status: ProcessStatus::Break,
            module: Some("m".to_string()),
            line: Some(line),
            stack: vec![TraceElement {
                module: "m".to_string(),
                function: "loop".to_string(),
                arity: Some(1),
                line: Some(line),
                bindings: vec![VariableBinding {
                    name: "N".to_string(),
                    value: Term::Integer(3),
                }],
            }],
        }
    }

    fn hit(pid: &str, snapshots: Vec<ProcessSnapshot>) -> Event {
        Event::BreakpointReached {
            pid: Some(ProcessHandle::new(pid)),
            snapshots,
        }
    }

    fn location(s: &str) -> BreakpointLocation {
        BreakpointLocation::parse(s).unwrap()
    }

    #[test]
    fn test_start_sends_breakpoints_before_target() {
        let mut f = fixture();
        f.session.add_breakpoint(&location("m:10"), None).unwrap();
        assert_eq!(f.session.state(), SessionState::Idle);

        f.session.start(&run_mode(), &InterpretConfig::default()).unwrap();
        let names: Vec<_> = f.sink.take().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["interpret_modules", "set_breakpoint", "run_debugger"]);
        assert_eq!(f.session.state(), SessionState::Starting);
    }

    #[test]
    fn test_start_interprets_source_roots_minus_excluded() {
        let mut f = fixture();
        let interpret = InterpretConfig {
            scope: InterpretScope::SourceRoots,
            exclude: vec!["m_tests".to_string()],
        };
        f.session.start(&run_mode(), &interpret).unwrap();

        let sent = f.sink.take();
        assert_eq!(
            sent[0],
            Request::InterpretModules {
                files: vec![PathBuf::from("src/helper.erl"), PathBuf::from("src/m.erl")]
            }
        );
        assert_eq!(sent[1].name(), "run_debugger");
    }

    #[test]
    fn test_breakpoint_hit_vs_plain_stop() {
        let mut f = started();
        f.session.add_breakpoint(&location("m:10"), None).unwrap();

        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10)])).unwrap();
        assert_eq!(f.session.binding("N"), Some(&Term::Integer(3)));
        assert_eq!(f.session.binding("Missing"), None);
        f.session.step_over().unwrap();
        assert_eq!(f.session.binding("N"), None);
        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 11)])).unwrap();

        assert_eq!(
            f.listener.take(),
            vec![
                Signal::BreakpointReached {
                    pid: ProcessHandle::new("<0.1.0>"),
                    module: "m".to_string(),
                    line: 10,
                },
                Signal::Stopped {
                    pid: ProcessHandle::new("<0.1.0>"),
                    module: Some("m".to_string()),
                    line: Some(11),
                },
            ]
        );
    }

    #[test]
    fn test_commands_follow_queued_breakpoint_commands() {
        let mut f = started();
        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10)])).unwrap();
        f.session.add_breakpoint(&location("helper:4"), None).unwrap();
        f.session.step_over().unwrap();

        let names: Vec<_> = f.sink.take().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["interpret_modules", "set_breakpoint", "step_over"]);
    }

    #[test]
    fn test_step_needs_suspended_process() {
        let mut f = started();
        assert!(matches!(f.session.step_into(), Err(Error::NoSuspendedProcess)));

        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10)])).unwrap();
        assert_eq!(f.session.state(), SessionState::Suspended);
        f.session.resume().unwrap();
        assert_eq!(f.session.state(), SessionState::Running);
        assert_eq!(
            f.sink.take(),
            vec![Request::Continue {
                pid: ProcessHandle::new("<0.1.0>")
            }]
        );
        assert!(matches!(f.session.step_out(), Err(Error::NoSuspendedProcess)));
    }

    #[test]
    fn test_evaluate_defaults_to_active_process() {
        let mut f = started();
        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10)])).unwrap();
        assert_eq!(f.session.binding("N"), Some(&Term::Integer(3)));

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        f.session
            .evaluate(
                "N + 1",
                EvalContext::default(),
                Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
            )
            .unwrap();

        assert_eq!(
            f.sink.take(),
            vec![Request::Evaluate {
                pid: ProcessHandle::new("<0.1.0>"),
                expression: "N + 1".to_string(),
                module: Some("m".to_string()),
                frame: None,
            }]
        );

        f.session
            .handle_event(Event::EvaluateResponse {
                result: Some(Term::Integer(4)),
                error: None,
            })
            .unwrap();
        assert_eq!(*results.lock().unwrap(), vec![Ok(Term::Integer(4))]);
    }

    #[test]
    fn test_malformed_evaluation_reply_keeps_later_replies_paired() {
        let mut f = started();
        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10)])).unwrap();

        let results = Arc::new(Mutex::new(Vec::new()));
        for expression in ["a", "b"] {
            let sink = Arc::clone(&results);
            f.session
                .evaluate(
                    expression,
                    EvalContext::default(),
                    Box::new(move |outcome| sink.lock().unwrap().push((expression, outcome))),
                )
                .unwrap();
        }

        f.session
            .handle_event(Event::decode(r#"{"event":"evaluate_response","result":"oops"}"#))
            .unwrap();
        f.session
            .handle_event(Event::decode(
                r#"{"event":"evaluate_response","result":{"type":"integer","value":42}}"#,
            ))
            .unwrap();

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], ("a", Err(EvaluationError(reason)))
            if reason.starts_with("undecodable evaluation reply")));
        assert_eq!(results[1], ("b", Ok(Term::Integer(42))));
        assert_eq!(f.session.view().pending_evaluations, 0);
    }

    #[test]
    fn test_evaluate_without_suspended_process_fails_callback() {
        let mut f = started();
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);

        let err = f
            .session
            .evaluate(
                "X",
                EvalContext::default(),
                Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoSuspendedProcess));
        assert_eq!(results.lock().unwrap().len(), 1);
        assert!(f.sink.take().is_empty());
    }

    #[test]
    fn test_interpret_failure_invalidates_breakpoints() {
        let mut f = started();
        f.session.add_breakpoint(&location("m:10"), None).unwrap();
        f.session
            .handle_event(Event::InterpretModulesResponse {
                node: "n@host".to_string(),
                failed: vec!["m".to_string()],
            })
            .unwrap();

        let signals = f.listener.take();
        assert!(matches!(&signals[0], Signal::Message { severity: Severity::Warning, text }
            if text.starts_with("Failed to interpret modules on node n@host: m.")));
        assert_eq!(
            signals[1],
            Signal::BreakpointInvalid {
                module: "m".to_string(),
                line: 10,
                reason: NOT_INTERPRETED.to_string(),
            }
        );
    }

    #[test]
    fn test_set_failure_keeps_breakpoint() {
        let mut f = started();
        f.session.add_breakpoint(&location("m:10"), Some("N >".to_string())).unwrap();
        f.session
            .handle_event(Event::SetBreakpointResponse {
                module: "m".to_string(),
                line: 10,
                error: Some("syntax error before: '>'".to_string()),
            })
            .unwrap();

        assert_eq!(f.session.breakpoints().count(), 1);
        assert!(matches!(&f.listener.take()[..], [Signal::BreakpointInvalid { reason, .. }]
            if reason == "syntax error before: '>'"));
    }

    #[test]
    fn test_remote_node_failure_is_fatal() {
        let mut f = fixture();
        let attach = LaunchMode::Attach {
            node: "app@host".to_string(),
            cookie: None,
        };
        f.session.start(&attach, &InterpretConfig::default()).unwrap();

        let err = f
            .session
            .handle_event(Event::DebugRemoteNodeResponse {
                node: "app@host".to_string(),
                error: Some("nodedown".to_string()),
            })
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_message_is_reported_and_dropped() {
        let mut f = started();
        let flow = f
            .session
            .handle_event(Event::decode(r#"{"event":"mystery"}"#))
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(matches!(&f.listener.take()[..], [Signal::Message { severity: Severity::Warning, text }]
            if text.starts_with("Unknown message received:")));
    }

    #[test]
    fn test_stop_fails_pending_evaluations() {
        let mut f = started();
        f.session.handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10)])).unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        f.session
            .evaluate(
                "X",
                EvalContext::default(),
                Box::new(move |outcome| sink.lock().unwrap().push(outcome)),
            )
            .unwrap();
        f.listener.take();

        f.session.stop().unwrap();
        assert_eq!(f.sink.take().last(), Some(&Request::Stop));
        assert_eq!(
            *results.lock().unwrap(),
            vec![Err(EvaluationError("session terminated".to_string()))]
        );
        assert_eq!(f.listener.take(), vec![Signal::DebuggerStopped]);
        assert_eq!(f.session.state(), SessionState::Terminated);

        assert!(matches!(f.session.step_over(), Err(Error::SessionNotActive)));
        let position = SourcePosition {
            file: PathBuf::from("src/m.erl"),
            line: 20,
            module: "m".to_string(),
            function: None,
        };
        assert!(matches!(
            f.session.add_breakpoint_at(position, None),
            Err(Error::SessionNotActive)
        ));
        assert!(f.session.breakpoints().all(|bp| bp.position.line != 20));
        f.session.flush().unwrap();
        assert!(f.sink.take().is_empty());
        assert_eq!(f.session.handle_event(Event::DebuggerStarted).unwrap(), Flow::Exit);
    }

    #[test]
    fn test_replaced_resolver_applies_to_new_breakpoints() {
        let mut f = started();
        let old = f.session.add_breakpoint(&location("m:10"), None).unwrap();
        assert_eq!(old.position.file, PathBuf::from("src/m.erl"));

        f.session
            .set_resolver(Arc::new(StaticResolver::new().with("m", "lib/m.erl")));
        let new = f.session.add_breakpoint(&location("m:12"), None).unwrap();
        assert_eq!(new.position.file, PathBuf::from("lib/m.erl"));
        assert!(matches!(
            f.session.add_breakpoint(&location("helper:1"), None),
            Err(Error::ModuleNotFound(_))
        ));

        let kept = f.session.breakpoints().find(|bp| bp.position.line == 10).unwrap();
        assert_eq!(kept.position.file, PathBuf::from("src/m.erl"));
    }

    #[test]
    fn test_select_process() {
        let mut f = started();
        assert!(matches!(
            f.session.select_process(&ProcessHandle::new("<0.2.0>")),
            Err(Error::NoSuspendedProcess)
        ));

        f.session
            .handle_event(hit("<0.1.0>", vec![snapshot("<0.1.0>", 10), snapshot("<0.2.0>", 7)]))
            .unwrap();
        let ctx = f.session.select_process(&ProcessHandle::new("<0.2.0>")).unwrap();
        assert_eq!(ctx.active, ProcessHandle::new("<0.2.0>"));
        assert!(matches!(
            f.session.select_process(&ProcessHandle::new("<0.9.0>")),
            Err(Error::UnknownProcess(_))
        ));
        assert!(f.sink.take().is_empty());
    }
}
