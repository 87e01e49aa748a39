//! Breakpoint registry
//!
//! Owns the user's line breakpoints keyed by `(module, line)` and the set of
//! modules already interpreted on the remote side. Commands for the agent
//! are collected in an ordered outbox that the session flushes onto the
//! transport. Interpret commands are never dropped; a set that is still in
//! the outbox when its breakpoint is removed is cancelled instead of being
//! followed by a remove.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use crate::node::Request;

use super::position::{BreakpointKey, SourcePosition};

/// Reason shown for breakpoints in modules the agent could not interpret
pub const NOT_INTERPRETED: &str = "module could not be interpreted";

/// Presentation state of a breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointStatus {
    /// Sent (or about to be sent), not yet confirmed
    Pending,
    /// Confirmed by the agent
    Verified,
    /// Rejected; kept so the user can fix it
    Invalid(String),
}

impl fmt::Display for BreakpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Verified => write!(f, "verified"),
            Self::Invalid(reason) => write!(f, "invalid: {}", reason),
        }
    }
}

/// A user line breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub position: SourcePosition,
    pub condition: Option<String>,
    pub status: BreakpointStatus,
    /// Whether a set command for this breakpoint has left the outbox
    on_remote: bool,
}

impl Breakpoint {
    pub fn key(&self) -> BreakpointKey {
        self.position.key()
    }
}

/// What an add changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    ConditionChanged,
    Unchanged,
    /// Registered, but its module failed to interpret so nothing was sent
    Unreachable,
}

/// Active breakpoints and remote interpretation state
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<BreakpointKey, Breakpoint>,
    interpreted: HashSet<String>,
    failed_modules: HashSet<String>,
    outbox: Vec<Request>,
}

fn normalize_condition(condition: Option<String>) -> Option<String> {
    condition
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn is_set_for(request: &Request, key: &BreakpointKey) -> bool {
    matches!(request, Request::SetBreakpoint { module, line, .. }
        if *module == key.module && *line == key.line)
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breakpoint, interpreting its module first if needed
    pub fn add(&mut self, position: SourcePosition, condition: Option<String>) -> AddOutcome {
        let condition = normalize_condition(condition);
        let key = position.key();

        let outcome = match self.breakpoints.get(&key) {
            Some(existing) if existing.condition == condition => return AddOutcome::Unchanged,
            Some(_) => AddOutcome::ConditionChanged,
            None => AddOutcome::Added,
        };

        let on_remote = self
            .breakpoints
            .get(&key)
            .map(|bp| bp.on_remote)
            .unwrap_or(false);

        if self.failed_modules.contains(&key.module) {
            self.breakpoints.insert(
                key,
                Breakpoint {
                    position,
                    condition,
                    status: BreakpointStatus::Invalid(NOT_INTERPRETED.to_string()),
                    on_remote,
                },
            );
            return AddOutcome::Unreachable;
        }

        self.ensure_interpreted(&key.module, &position.file);
        self.breakpoints.insert(
            key.clone(),
            Breakpoint {
                position,
                condition,
                status: BreakpointStatus::Pending,
                on_remote,
            },
        );
        self.queue_set(&key);

        tracing::debug!(breakpoint = %key, ?outcome, "Breakpoint registered");
        outcome
    }

    /// Unregister a breakpoint; unknown positions are ignored
    ///
    /// Module interpretation is kept, other breakpoints may share it.
    pub fn remove(&mut self, key: &BreakpointKey) -> Option<Breakpoint> {
        let removed = self.breakpoints.remove(key)?;

        self.outbox.retain(|request| !is_set_for(request, key));
        if removed.on_remote {
            self.outbox.push(Request::RemoveBreakpoint {
                module: key.module.clone(),
                line: key.line,
            });
        }

        tracing::debug!(breakpoint = %key, "Breakpoint removed");
        Some(removed)
    }

    pub fn lookup(&self, key: &BreakpointKey) -> Option<&Breakpoint> {
        self.breakpoints.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn is_interpreted(&self, module: &str) -> bool {
        self.interpreted.contains(module)
    }

    /// Interpret a batch of modules up front
    ///
    /// Modules already interpreted or known to fail are skipped. Every
    /// registered breakpoint's module is one or the other, so no set command
    /// needs to follow.
    pub fn interpret(&mut self, modules: Vec<(String, PathBuf)>) {
        let mut files = Vec::new();
        for (module, file) in modules {
            if self.failed_modules.contains(&module) || !self.interpreted.insert(module) {
                continue;
            }
            files.push(file);
        }

        if files.is_empty() {
            return;
        }
        tracing::debug!(count = files.len(), "Interpreting modules");
        self.outbox.push(Request::InterpretModules { files });
    }

    /// The agent rejected a set command
    pub fn on_set_failed(&mut self, key: &BreakpointKey, reason: &str) -> Option<&Breakpoint> {
        let bp = self.breakpoints.get_mut(key)?;
        bp.status = BreakpointStatus::Invalid(reason.to_string());
        Some(bp)
    }

    /// The agent confirmed a set command
    pub fn on_set_confirmed(&mut self, key: &BreakpointKey) -> Option<&Breakpoint> {
        let bp = self.breakpoints.get_mut(key)?;
        bp.status = BreakpointStatus::Verified;
        Some(bp)
    }

    /// Modules the agent could not interpret; returns the breakpoints now unreachable
    pub fn on_interpret_failed(&mut self, modules: &[String]) -> Vec<Breakpoint> {
        for module in modules {
            self.interpreted.remove(module);
            self.failed_modules.insert(module.clone());
        }

        self.breakpoints
            .values_mut()
            .filter(|bp| modules.contains(&bp.position.module))
            .map(|bp| {
                bp.status = BreakpointStatus::Invalid(NOT_INTERPRETED.to_string());
                bp.clone()
            })
            .collect()
    }

    /// Forget all remote state and queue everything again for a fresh session
    pub fn reset(&mut self) {
        self.interpreted.clear();
        self.failed_modules.clear();
        self.outbox.clear();

        let keys: Vec<BreakpointKey> = self.breakpoints.keys().cloned().collect();
        for key in keys {
            if let Some(bp) = self.breakpoints.get_mut(&key) {
                bp.on_remote = false;
                bp.status = BreakpointStatus::Pending;
                let file = bp.position.file.clone();
                self.ensure_interpreted(&key.module, &file);
                self.queue_set(&key);
            }
        }
    }

    /// Hand the queued commands over for sending
    pub fn take_commands(&mut self) -> Vec<Request> {
        let commands = std::mem::take(&mut self.outbox);
        for request in &commands {
            if let Request::SetBreakpoint { module, line, .. } = request {
                if let Some(bp) = self
                    .breakpoints
                    .get_mut(&BreakpointKey::new(module.clone(), *line))
                {
                    bp.on_remote = true;
                }
            }
        }
        commands
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.outbox.is_empty()
    }

    fn ensure_interpreted(&mut self, module: &str, file: &std::path::Path) {
        if self.interpreted.insert(module.to_string()) {
            self.outbox.push(Request::InterpretModules {
                files: vec![file.to_path_buf()],
            });
        }
    }

    fn queue_set(&mut self, key: &BreakpointKey) {
        let Some(bp) = self.breakpoints.get(key) else {
            return;
        };
        let request = Request::SetBreakpoint {
            module: key.module.clone(),
            line: key.line,
            condition: bp.condition.clone(),
        };
        self.outbox.retain(|queued| !is_set_for(queued, key));
        self.outbox.push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn position(module: &str, line: u32) -> SourcePosition {
        SourcePosition {
            file: PathBuf::from(format!("src/{}.erl", module)),
            line,
            module: module.to_string(),
            function: None,
        }
    }

    fn interpret(module: &str) -> Request {
        Request::InterpretModules {
            files: vec![PathBuf::from(format!("src/{}.erl", module))],
        }
    }

    fn set(module: &str, line: u32, condition: Option<&str>) -> Request {
        Request::SetBreakpoint {
            module: module.to_string(),
            line,
            condition: condition.map(String::from),
        }
    }

    #[test]
    fn test_add_interprets_then_sets() {
        let mut registry = BreakpointRegistry::new();
        assert_eq!(registry.add(position("m", 10), None), AddOutcome::Added);

        assert_eq!(registry.take_commands(), vec![interpret("m"), set("m", 10, None)]);
        assert!(registry.is_interpreted("m"));
        assert_eq!(registry.lookup(&BreakpointKey::new("m", 10)).unwrap().status, BreakpointStatus::Pending);
    }

    #[test]
    fn test_second_breakpoint_in_module_skips_interpret() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 10), None);
        registry.take_commands();

        registry.add(position("m", 20), Some("X > 1".to_string()));
        assert_eq!(registry.take_commands(), vec![set("m", 20, Some("X > 1"))]);
    }

    #[test]
    fn test_idempotent_re_add() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 10), Some("  ".to_string()));
        registry.take_commands();

        assert_eq!(registry.add(position("m", 10), None), AddOutcome::Unchanged);
        assert!(registry.take_commands().is_empty());

        assert_eq!(
            registry.add(position("m", 10), Some("N =:= 3".to_string())),
            AddOutcome::ConditionChanged
        );
        assert_eq!(registry.take_commands(), vec![set("m", 10, Some("N =:= 3"))]);
    }

    #[test]
    fn test_add_then_remove_on_interpreted_module_sends_nothing() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 1), None);
        registry.take_commands();

        registry.add(position("m", 10), None);
        registry.remove(&BreakpointKey::new("m", 10));
        assert!(registry.take_commands().is_empty());
    }

    #[test]
    fn test_add_then_remove_keeps_interpret() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 10), None);
        registry.remove(&BreakpointKey::new("m", 10));

        assert_eq!(registry.take_commands(), vec![interpret("m")]);
        assert!(registry.is_interpreted("m"));
    }

    #[test]
    fn test_remove_after_flush_sends_remove() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 10), None);
        registry.take_commands();

        assert!(registry.remove(&BreakpointKey::new("m", 10)).is_some());
        assert_eq!(
            registry.take_commands(),
            vec![Request::RemoveBreakpoint {
                module: "m".to_string(),
                line: 10
            }]
        );
        assert!(registry.is_interpreted("m"));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = BreakpointRegistry::new();
        assert!(registry.remove(&BreakpointKey::new("m", 10)).is_none());
        assert!(!registry.has_pending_commands());
    }

    #[test]
    fn test_set_failure_marks_invalid_and_keeps_breakpoint() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 10), Some("bad(".to_string()));
        registry.take_commands();

        let key = BreakpointKey::new("m", 10);
        let bp = registry.on_set_failed(&key, "syntax error").unwrap();
        assert_eq!(bp.status, BreakpointStatus::Invalid("syntax error".to_string()));
        assert_eq!(registry.len(), 1);

        assert!(registry.on_set_failed(&BreakpointKey::new("m", 99), "x").is_none());
        assert_eq!(registry.on_set_confirmed(&key).unwrap().status, BreakpointStatus::Verified);
    }

    #[test]
    fn test_interpret_failure_makes_module_unreachable() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("m", 10), None);
        registry.add(position("other", 5), None);
        registry.take_commands();

        let affected = registry.on_interpret_failed(&["m".to_string()]);
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].key(), BreakpointKey::new("m", 10));

        assert_eq!(registry.add(position("m", 11), None), AddOutcome::Unreachable);
        assert!(registry.take_commands().is_empty());
        assert_eq!(
            registry.lookup(&BreakpointKey::new("m", 11)).unwrap().status,
            BreakpointStatus::Invalid(NOT_INTERPRETED.to_string())
        );
    }

    #[test]
    fn test_bulk_interpret_reissues_sets() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("a", 3), None);
        registry.take_commands();
        registry.on_interpret_failed(&["a".to_string()]);

        // A fresh session forgets the failure and re-sends everything
        registry.reset();
        assert_eq!(registry.take_commands(), vec![interpret("a"), set("a", 3, None)]);

        registry.interpret(vec![
            ("a".to_string(), PathBuf::from("src/a.erl")),
            ("b".to_string(), PathBuf::from("src/b.erl")),
        ]);
        assert_eq!(registry.take_commands(), vec![interpret("b")]);
    }

    #[test]
    fn test_bulk_interpret_after_reset_skips_breakpoint_modules() {
        let mut registry = BreakpointRegistry::new();
        registry.add(position("a", 3), Some("X > 1".to_string()));
        registry.take_commands();
        registry.on_interpret_failed(&["c".to_string()]);

        registry.reset();
        registry.interpret(vec![
            ("a".to_string(), PathBuf::from("src/a.erl")),
            ("b".to_string(), PathBuf::from("src/b.erl")),
            ("c".to_string(), PathBuf::from("src/c.erl")),
        ]);
        assert_eq!(
            registry.take_commands(),
            vec![
                interpret("a"),
                set("a", 3, Some("X > 1")),
                Request::InterpretModules {
                    files: vec![PathBuf::from("src/b.erl"), PathBuf::from("src/c.erl")]
                },
            ]
        );

        registry.on_interpret_failed(&["c".to_string()]);
        registry.interpret(vec![("c".to_string(), PathBuf::from("src/c.erl"))]);
        assert!(registry.take_commands().is_empty());
    }
}
