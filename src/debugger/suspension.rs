//! Suspension tracker
//!
//! Decides whether a suspend notification from the agent is news. The agent
//! re-announces the suspended state after every evaluate, and other
//! processes may hit breakpoints while one is being inspected, so most
//! notifications are dropped here. Only one process is displayed at a time.

use std::fmt;

use crate::node::{ProcessHandle, ProcessSnapshot};

/// How firmly the displayed process was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// Picked from a plain notification; the next process event may move it
    Soft,
    /// Picked from a process event or by the user; kept across resume
    Hard,
}

/// The suspended processes as last reported, and which one is displayed
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendContext {
    pub active: ProcessHandle,
    pub snapshots: Vec<ProcessSnapshot>,
}

impl SuspendContext {
    pub fn active_snapshot(&self) -> Option<&ProcessSnapshot> {
        self.snapshot(&self.active)
    }

    pub fn snapshot(&self, pid: &ProcessHandle) -> Option<&ProcessSnapshot> {
        self.snapshots.iter().find(|s| &s.pid == pid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuspensionState {
    Running {
        /// Process displayed before the last resume
        last: Option<(ProcessHandle, Focus)>,
    },
    Suspended {
        context: SuspendContext,
        focus: Focus,
    },
}

impl fmt::Display for SuspensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { .. } => write!(f, "running"),
            Self::Suspended { context, .. } => write!(f, "suspended in {}", context.active),
        }
    }
}

/// Why a notification produced no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoSnapshots,
    /// Plain notification while a process is already displayed
    AlreadySuspended,
    /// A process other than the displayed one broke
    OtherProcess,
    /// Same line and same number of suspended processes as displayed
    StaleDuplicate,
    /// The process to display is not among the snapshots
    MissingSnapshot,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoSnapshots => "no snapshots",
            Self::AlreadySuspended => "already suspended",
            Self::OtherProcess => "other process",
            Self::StaleDuplicate => "stale duplicate",
            Self::MissingSnapshot => "missing snapshot",
        };
        f.write_str(text)
    }
}

/// Outcome of feeding one notification to the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Ignored(IgnoreReason),
    /// Signal a stop for the now displayed process
    Stop(SuspendContext),
}

#[derive(Debug)]
pub struct SuspensionTracker {
    state: SuspensionState,
}

impl Default for SuspensionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SuspensionTracker {
    pub fn new() -> Self {
        Self {
            state: SuspensionState::Running { last: None },
        }
    }

    pub fn state(&self) -> &SuspensionState {
        &self.state
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state, SuspensionState::Suspended { .. })
    }

    pub fn context(&self) -> Option<&SuspendContext> {
        match &self.state {
            SuspensionState::Suspended { context, .. } => Some(context),
            SuspensionState::Running { .. } => None,
        }
    }

    pub fn active(&self) -> Option<&ProcessHandle> {
        self.context().map(|c| &c.active)
    }

    /// Process a suspend notification; `pid` is absent for plain notifications
    pub fn on_suspended(
        &mut self,
        pid: Option<ProcessHandle>,
        snapshots: Vec<ProcessSnapshot>,
    ) -> Decision {
        if snapshots.is_empty() {
            return Decision::Ignored(IgnoreReason::NoSnapshots);
        }

        let Some(pid) = pid else {
            return self.on_notify(snapshots);
        };

        let target = match &self.state {
            SuspensionState::Suspended { context, .. } => {
                if pid != context.active {
                    return Decision::Ignored(IgnoreReason::OtherProcess);
                }
                let displayed_line = context.active_snapshot().and_then(|s| s.line);
                let incoming_line = snapshots
                    .iter()
                    .find(|s| s.pid == pid)
                    .and_then(|s| s.line);
                if incoming_line == displayed_line && snapshots.len() == context.snapshots.len() {
                    return Decision::Ignored(IgnoreReason::StaleDuplicate);
                }
                pid
            }
            SuspensionState::Running {
                last: Some((last, Focus::Hard)),
            } if snapshots.iter().any(|s| &s.pid == last) => last.clone(),
            SuspensionState::Running { .. } => pid,
        };

        self.suspend(target, snapshots, Focus::Hard)
    }

    fn on_notify(&mut self, snapshots: Vec<ProcessSnapshot>) -> Decision {
        if self.is_suspended() {
            return Decision::Ignored(IgnoreReason::AlreadySuspended);
        }
        let pid = snapshots[0].pid.clone();
        self.suspend(pid, snapshots, Focus::Soft)
    }

    fn suspend(&mut self, active: ProcessHandle, snapshots: Vec<ProcessSnapshot>, focus: Focus) -> Decision {
        if !snapshots.iter().any(|s| s.pid == active) {
            return Decision::Ignored(IgnoreReason::MissingSnapshot);
        }
        let context = SuspendContext { active, snapshots };
        tracing::debug!(pid = %context.active, ?focus, processes = context.snapshots.len(), "Process suspended");
        self.state = SuspensionState::Suspended {
            context: context.clone(),
            focus,
        };
        Decision::Stop(context)
    }

    /// Switch the displayed process among the suspended ones
    pub fn select(&mut self, pid: &ProcessHandle) -> Option<&SuspendContext> {
        match &mut self.state {
            SuspensionState::Suspended { context, focus } => {
                context.snapshot(pid)?;
                context.active = pid.clone();
                *focus = Focus::Hard;
                Some(&*context)
            }
            SuspensionState::Running { .. } => None,
        }
    }

    /// Optimistically mark the displayed process as running
    ///
    /// Returns the process that was displayed; the next notification from
    /// the agent is authoritative.
    pub fn resume(&mut self) -> Option<ProcessHandle> {
        let previous = std::mem::replace(
            &mut self.state,
            SuspensionState::Running { last: None },
        );
        match previous {
            SuspensionState::Suspended { context, focus } => {
                let active = context.active;
                self.state = SuspensionState::Running {
                    last: Some((active.clone(), focus)),
                };
                Some(active)
            }
            running => {
                self.state = running;
                None
            }
        }
    }

    /// Forget everything, for a new session
    pub fn reset(&mut self) {
        self.state = SuspensionState::Running { last: None };
    }
}
