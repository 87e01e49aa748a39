//! Recording sink and listener
//!
//! Stand-ins for the transport and the presentation layer that keep
//! everything the session sends and signals, for assertions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::debugger::{Breakpoint, DebugListener, SourcePosition, SuspendContext};
use crate::node::{CommandSink, ProcessHandle, Request, Severity};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Command sink that keeps every request
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Request>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests sent since the last call
    pub fn take(&self) -> Vec<Request> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Make further sends fail as if the connection dropped
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl CommandSink for RecordingSink {
    fn send(&self, request: Request) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionTerminated("recording sink closed".to_string()));
        }
        lock(&self.sent).push(request);
        Ok(())
    }
}

/// One listener callback, in remote coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    DebuggerStarted,
    DebuggerStopped,
    Stopped {
        pid: ProcessHandle,
        module: Option<String>,
        line: Option<u32>,
    },
    BreakpointReached {
        pid: ProcessHandle,
        module: String,
        line: u32,
    },
    BreakpointInvalid {
        module: String,
        line: u32,
        reason: String,
    },
    Message {
        text: String,
        severity: Severity,
    },
}

/// Listener that keeps every signal
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    signals: Arc<Mutex<Vec<Signal>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals received since the last call
    pub fn take(&self) -> Vec<Signal> {
        std::mem::take(&mut *lock(&self.signals))
    }

    fn push(&self, signal: Signal) {
        lock(&self.signals).push(signal);
    }
}

impl DebugListener for RecordingListener {
    fn debugger_started(&mut self) {
        self.push(Signal::DebuggerStarted);
    }

    fn debugger_stopped(&mut self) {
        self.push(Signal::DebuggerStopped);
    }

    fn stopped(&mut self, _position: Option<&SourcePosition>, context: &SuspendContext) {
        let snapshot = context.active_snapshot();
        self.push(Signal::Stopped {
            pid: context.active.clone(),
            module: snapshot.and_then(|s| s.module.clone()),
            line: snapshot.and_then(|s| s.line),
        });
    }

    fn breakpoint_reached(&mut self, breakpoint: &Breakpoint, context: &SuspendContext) {
        self.push(Signal::BreakpointReached {
            pid: context.active.clone(),
            module: breakpoint.position.module.clone(),
            line: breakpoint.position.line,
        });
    }

    fn breakpoint_invalid(&mut self, breakpoint: &Breakpoint, reason: &str) {
        self.push(Signal::BreakpointInvalid {
            module: breakpoint.position.module.clone(),
            line: breakpoint.position.line,
            reason: reason.to_string(),
        });
    }

    fn message(&mut self, text: &str, severity: Severity) {
        self.push(Signal::Message {
            text: text.to_string(),
            severity,
        });
    }
}
