//! Test runner implementation
//!
//! Replays a scenario against a [`DebugSession`] wired to a recording sink
//! and listener. Assertions are made against structured data rather than
//! printed output.

use std::path::Path;
use std::sync::{Arc, Mutex};

use colored::Colorize;
use serde_json::Value;

use crate::common::{Error, Result};
use crate::debugger::{
    BreakpointLocation, DebugSession, EvalContext, EvalOutcome, PositionMapper, StaticResolver,
    StepKind,
};

use super::config::{TestScenario, TestStep};
use super::recorder::{RecordingListener, RecordingSink};

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Load a scenario from a YAML file
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))
}

/// Run a test scenario from a YAML file
pub fn run_scenario(path: &Path, verbose: bool) -> Result<TestResult> {
    let scenario = load_scenario(path)?;
    run(scenario, verbose)
}

/// Run an already loaded scenario
pub fn run(scenario: TestScenario, verbose: bool) -> Result<TestResult> {
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let mut harness = Harness::new(&scenario);
    harness.start(&scenario)?;

    println!("\n{}", "Steps:".cyan());
    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        if let Err(e) = harness.execute(step) {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);
            return Ok(TestResult {
                name: scenario.name.clone(),
                passed: false,
                steps_run: step_num,
                steps_total,
                error: Some(e.to_string()),
            });
        }
        println!("  {} Step {}: {}", "✓".green(), step_num, step.label().dimmed());
        if verbose {
            println!("      state: {}", harness.session.state().to_string().dimmed());
        }
    }

    println!(
        "\n{} {}\n",
        "✓".green().bold(),
        "Test Passed".green().bold()
    );

    Ok(TestResult {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
    })
}

struct Harness {
    session: DebugSession,
    sink: RecordingSink,
    listener: RecordingListener,
    evaluations: Arc<Mutex<Vec<EvalOutcome>>>,
}

impl Harness {
    fn new(scenario: &TestScenario) -> Self {
        let resolver = scenario
            .modules
            .iter()
            .fold(StaticResolver::new(), |resolver, (module, file)| {
                resolver.with(module.clone(), file.clone())
            });
        let sink = RecordingSink::new();
        let listener = RecordingListener::new();
        let session = DebugSession::new(
            Box::new(sink.clone()),
            Box::new(listener.clone()),
            PositionMapper::new(Arc::new(resolver)),
        );
        Self {
            session,
            sink,
            listener,
            evaluations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn start(&mut self, scenario: &TestScenario) -> Result<()> {
        self.session
            .start(&scenario.target.launch_mode(), &scenario.interpret)?;
        if scenario.skip_startup {
            self.sink.take();
            self.listener.take();
        }
        Ok(())
    }

    /// One dispatch turn
    fn execute(&mut self, step: &TestStep) -> Result<()> {
        self.apply(step)?;
        self.session.flush()
    }

    fn apply(&mut self, step: &TestStep) -> Result<()> {
        match step {
            TestStep::Break {
                at,
                condition,
                error,
            } => {
                let location = BreakpointLocation::parse(at);
                let result = location.and_then(|l| self.session.add_breakpoint(&l, condition.clone()));
                expect_outcome(result.map(|_| ()), error.as_deref())
            }
            TestStep::Clear { at, error } => {
                let location = BreakpointLocation::parse(at);
                let result = location.and_then(|l| self.session.remove_breakpoint(&l));
                expect_outcome(result.map(|_| ()), error.as_deref())
            }
            TestStep::Event { event } => {
                self.session.handle_event(event.clone())?;
                Ok(())
            }
            TestStep::StepOver { error } => {
                expect_outcome(self.session.step(StepKind::Over), error.as_deref())
            }
            TestStep::StepInto { error } => {
                expect_outcome(self.session.step(StepKind::Into), error.as_deref())
            }
            TestStep::StepOut { error } => {
                expect_outcome(self.session.step(StepKind::Out), error.as_deref())
            }
            TestStep::Continue { error } => {
                expect_outcome(self.session.step(StepKind::Continue), error.as_deref())
            }
            TestStep::Select { pid, error } => expect_outcome(
                self.session.select_process(pid).map(|_| ()),
                error.as_deref(),
            ),
            TestStep::Evaluate {
                expression,
                pid,
                frame,
            } => {
                let context = EvalContext {
                    pid: pid.clone(),
                    frame: *frame,
                };
                let results = Arc::clone(&self.evaluations);
                // Failures reach the callback too and are checked there
                let _ = self.session.evaluate(
                    expression,
                    context,
                    Box::new(move |outcome| {
                        if let Ok(mut results) = results.lock() {
                            results.push(outcome);
                        }
                    }),
                );
                Ok(())
            }
            TestStep::Stop => self.session.stop(),
            TestStep::Batch { steps } => {
                for step in steps {
                    self.apply(step)?;
                }
                Ok(())
            }
            TestStep::ExpectSignals { signals } => {
                let actual = self
                    .listener
                    .take()
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                expect_sequence("signals", signals, &actual)
            }
            TestStep::ExpectCommands { commands } => {
                // Commands still queued count as sent
                self.session.flush()?;
                let actual = self
                    .sink
                    .take()
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                expect_sequence("commands", commands, &actual)
            }
            TestStep::ExpectEvaluations { results } => {
                let actual: Vec<String> = match self.evaluations.lock() {
                    Ok(mut outcomes) => outcomes.drain(..).map(|o| render_outcome(&o)).collect(),
                    Err(_) => return Err(Error::Internal("evaluation log poisoned".to_string())),
                };
                if &actual != results {
                    return Err(Error::TestAssertion(format!(
                        "Expected evaluations {:?}, got {:?}",
                        results, actual
                    )));
                }
                Ok(())
            }
            TestStep::ExpectState {
                state,
                active,
                breakpoints,
            } => {
                if let Some(expected) = state {
                    let actual = self.session.state().to_string();
                    if &actual != expected {
                        return Err(Error::TestAssertion(format!(
                            "Expected state '{}', got '{}'",
                            expected, actual
                        )));
                    }
                }
                if let Some(expected) = active {
                    let actual = self.session.context().map(|c| &c.active);
                    if actual != Some(expected) {
                        return Err(Error::TestAssertion(format!(
                            "Expected active process {}, got {:?}",
                            expected, actual
                        )));
                    }
                }
                if let Some(expected) = breakpoints {
                    let actual = self.session.breakpoints().count();
                    if actual != *expected {
                        return Err(Error::TestAssertion(format!(
                            "Expected {} breakpoint(s), got {}",
                            expected, actual
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn render_outcome(outcome: &EvalOutcome) -> String {
    match outcome {
        Ok(value) => value.to_string(),
        Err(e) => format!("error: {}", e),
    }
}

fn expect_outcome(result: Result<()>, expected_error: Option<&str>) -> Result<()> {
    match (result, expected_error) {
        (Ok(()), None) => Ok(()),
        (Err(e), None) => Err(e),
        (Ok(()), Some(expected)) => Err(Error::TestAssertion(format!(
            "Expected failure containing '{}', but the command succeeded",
            expected
        ))),
        (Err(e), Some(expected)) => {
            let message = e.to_string();
            if message.contains(expected) {
                Ok(())
            } else {
                Err(Error::TestAssertion(format!(
                    "Expected failure containing '{}', got '{}'",
                    expected, message
                )))
            }
        }
    }
}

fn expect_sequence(what: &str, expected: &[Value], actual: &[Value]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(Error::TestAssertion(format!(
            "Expected {} {}, got {}: {}",
            expected.len(),
            what,
            actual.len(),
            Value::Array(actual.to_vec())
        )));
    }
    for (i, (want, got)) in expected.iter().zip(actual).enumerate() {
        if !matches_subset(want, got) {
            return Err(Error::TestAssertion(format!(
                "{} #{}: expected {}, got {}",
                what,
                i + 1,
                want,
                got
            )));
        }
    }
    Ok(())
}

/// Whether every field present in `expected` matches `actual`
pub fn matches_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(want), Value::Object(got)) => want.iter().all(|(key, value)| {
            if let (Some(field), Value::String(needle)) = (key.strip_suffix("_contains"), value) {
                return matches!(got.get(field), Some(Value::String(hay)) if hay.contains(needle.as_str()));
            }
            got.get(key)
                .map(|actual| matches_subset(value, actual))
                .unwrap_or(value.is_null())
        }),
        (Value::Array(want), Value::Array(got)) => {
            want.len() == got.len()
                && want.iter().zip(got).all(|(w, g)| matches_subset(w, g))
        }
        _ => expected == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subset_matching() {
        let actual = json!({"signal": "message", "severity": "warning", "text": "Unknown message received: x"});
        assert!(matches_subset(&json!({"signal": "message"}), &actual));
        assert!(matches_subset(&json!({"text_contains": "Unknown message"}), &actual));
        assert!(!matches_subset(&json!({"severity": "error"}), &actual));
        assert!(!matches_subset(&json!({"pid": "<0.1.0>"}), &actual));
        assert!(matches_subset(&json!({"condition": null}), &json!({"command": "set_breakpoint"})));
    }

    #[test]
    fn test_expected_failure() {
        assert!(expect_outcome(Err(Error::NoSuspendedProcess), Some("No process")).is_ok());
        assert!(expect_outcome(Ok(()), Some("No process")).is_err());
        assert!(expect_outcome(Err(Error::NoSuspendedProcess), None).is_err());
    }
}
