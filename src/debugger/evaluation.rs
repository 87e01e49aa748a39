//! Evaluation correlator
//!
//! Evaluate replies carry no request identifier. The agent answers on a
//! single ordered stream, so the oldest outstanding callback is always the
//! one a reply belongs to.

use std::collections::VecDeque;
use std::fmt;

use crate::common::Result;
use crate::node::{CommandSink, ProcessHandle, Request, Term};

/// Failure reported for a single evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationError(pub String);

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EvaluationError {}

pub type EvalOutcome = std::result::Result<Term, EvaluationError>;

/// Receives the outcome of one evaluation, on the dispatch loop
pub type EvalCallback = Box<dyn FnOnce(EvalOutcome) + Send>;

/// Where to evaluate; unset fields default to the active process and its top frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalContext {
    pub pid: Option<ProcessHandle>,
    pub frame: Option<usize>,
}

impl EvalContext {
    pub fn in_process(pid: ProcessHandle) -> Self {
        Self {
            pid: Some(pid),
            frame: None,
        }
    }

    pub fn at_frame(mut self, frame: usize) -> Self {
        self.frame = Some(frame);
        self
    }
}

struct PendingEvaluation {
    expression: String,
    callback: EvalCallback,
}

/// FIFO of outstanding evaluate requests
#[derive(Default)]
pub struct EvaluationCorrelator {
    pending: VecDeque<PendingEvaluation>,
}

impl EvaluationCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the callback and send the request
    ///
    /// If the request cannot be sent the callback is completed with the
    /// send error and the queue is left as it was.
    pub fn submit(
        &mut self,
        sink: &dyn CommandSink,
        request: Request,
        callback: EvalCallback,
    ) -> Result<()> {
        let expression = match &request {
            Request::Evaluate { expression, .. } => expression.clone(),
            other => other.name().to_string(),
        };
        self.pending.push_back(PendingEvaluation {
            expression,
            callback,
        });

        if let Err(e) = sink.send(request) {
            if let Some(entry) = self.pending.pop_back() {
                (entry.callback)(Err(EvaluationError(e.to_string())));
            }
            return Err(e);
        }

        tracing::debug!(pending = self.pending.len(), "Evaluation submitted");
        Ok(())
    }

    /// Complete the oldest outstanding evaluation
    pub fn on_reply(&mut self, outcome: EvalOutcome) {
        let Some(entry) = self.pending.pop_front() else {
            tracing::warn!(?outcome, "Evaluation reply with nothing outstanding, dropping");
            return;
        };
        tracing::debug!(expression = %entry.expression, ok = outcome.is_ok(), "Evaluation completed");
        (entry.callback)(outcome);
    }

    /// Complete every outstanding evaluation with the same error
    pub fn fail_all(&mut self, reason: &str) {
        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), %reason, "Failing outstanding evaluations");
        }
        for entry in self.pending.drain(..) {
            (entry.callback)(Err(EvaluationError(reason.to_string())));
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
