//! Session dispatch loop
//!
//! [`SessionRunner`] owns the [`DebugSession`] and is the only code touching
//! it. Agent events and user commands are handled one turn at a time; the
//! breakpoint outbox is flushed at the end of every turn. Callers talk to the
//! loop through a cloneable [`SessionHandle`].

use std::process::ExitStatus;

use tokio::sync::{mpsc, oneshot};

use crate::common::{Error, Result};
use crate::node::{AgentConnection, Debuggee, Event, ProcessHandle};

use super::breakpoints::Breakpoint;
use super::evaluation::{EvalCallback, EvalContext, EvalOutcome};
use super::position::BreakpointLocation;
use super::session::{DebugSession, Flow, SessionView, StepKind};
use super::suspension::SuspendContext;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Request from a front end to the dispatch loop
pub enum UserCommand {
    AddBreakpoint {
        location: BreakpointLocation,
        condition: Option<String>,
        reply: Reply<Breakpoint>,
    },
    RemoveBreakpoint {
        location: BreakpointLocation,
        reply: Reply<Option<Breakpoint>>,
    },
    Step {
        kind: StepKind,
        reply: Reply<()>,
    },
    RunToPosition {
        location: BreakpointLocation,
        reply: Reply<()>,
    },
    Select {
        pid: ProcessHandle,
        reply: Reply<SuspendContext>,
    },
    Evaluate {
        expression: String,
        context: EvalContext,
        callback: EvalCallback,
    },
    Inspect {
        reply: oneshot::Sender<SessionView>,
    },
    Stop,
}

impl UserCommand {
    fn name(&self) -> &'static str {
        match self {
            UserCommand::AddBreakpoint { .. } => "add_breakpoint",
            UserCommand::RemoveBreakpoint { .. } => "remove_breakpoint",
            UserCommand::Step { .. } => "step",
            UserCommand::RunToPosition { .. } => "run_to_position",
            UserCommand::Select { .. } => "select",
            UserCommand::Evaluate { .. } => "evaluate",
            UserCommand::Inspect { .. } => "inspect",
            UserCommand::Stop => "stop",
        }
    }
}

fn closed() -> Error {
    Error::SessionTerminated("session loop has exited".to_string())
}

/// Cloneable front-end handle onto a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<UserCommand>,
}

impl SessionHandle {
    fn post(&self, command: UserCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| closed())
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> UserCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(make(reply))?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn add_breakpoint(
        &self,
        location: BreakpointLocation,
        condition: Option<String>,
    ) -> Result<Breakpoint> {
        self.request(|reply| UserCommand::AddBreakpoint {
            location,
            condition,
            reply,
        })
        .await
    }

    pub async fn remove_breakpoint(&self, location: BreakpointLocation) -> Result<Option<Breakpoint>> {
        self.request(|reply| UserCommand::RemoveBreakpoint { location, reply })
            .await
    }

    pub async fn step(&self, kind: StepKind) -> Result<()> {
        self.request(|reply| UserCommand::Step { kind, reply }).await
    }

    pub async fn run_to_position(&self, location: BreakpointLocation) -> Result<()> {
        self.request(|reply| UserCommand::RunToPosition { location, reply })
            .await
    }

    pub async fn select(&self, pid: ProcessHandle) -> Result<SuspendContext> {
        self.request(|reply| UserCommand::Select { pid, reply }).await
    }

    /// Submit an evaluation; the callback runs on the dispatch loop
    pub fn evaluate(
        &self,
        expression: impl Into<String>,
        context: EvalContext,
        callback: EvalCallback,
    ) -> Result<()> {
        self.post(UserCommand::Evaluate {
            expression: expression.into(),
            context,
            callback,
        })
    }

    /// Evaluate and wait for the agent's reply
    pub async fn evaluate_async(
        &self,
        expression: impl Into<String>,
        context: EvalContext,
    ) -> Result<EvalOutcome> {
        let (tx, rx) = oneshot::channel();
        self.evaluate(
            expression,
            context,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )?;
        rx.await.map_err(|_| closed())
    }

    pub async fn inspect(&self) -> Result<SessionView> {
        let (reply, rx) = oneshot::channel();
        self.post(UserCommand::Inspect { reply })?;
        rx.await.map_err(|_| closed())
    }

    /// Ask the loop to stop; returns immediately
    pub fn stop(&self) -> Result<()> {
        self.post(UserCommand::Stop)
    }

    /// Whether the dispatch loop has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

enum Turn {
    Event(Option<Event>),
    Command(Option<UserCommand>),
    DebuggeeExited(std::io::Result<ExitStatus>),
}

/// Owner of the session and its transport
pub struct SessionRunner {
    session: DebugSession,
    connection: AgentConnection,
    debuggee: Option<Debuggee>,
    commands: mpsc::UnboundedReceiver<UserCommand>,
}

impl SessionRunner {
    /// The session must already be wired to the connection's sender
    pub fn new(
        session: DebugSession,
        connection: AgentConnection,
        debuggee: Option<Debuggee>,
    ) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let runner = Self {
            session,
            connection,
            debuggee,
            commands,
        };
        (runner, SessionHandle { tx })
    }

    /// Run until the debugger stops, the user stops it, or a fatal error
    pub async fn run(self) -> Result<()> {
        let SessionRunner {
            mut session,
            mut connection,
            mut debuggee,
            mut commands,
        } = self;

        let mut events = connection
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("event receiver already taken".to_string()))?;

        let result = loop {
            let turn = tokio::select! {
                event = events.recv() => Turn::Event(event),
                command = commands.recv() => Turn::Command(command),
                status = wait_for_exit(debuggee.as_mut()) => Turn::DebuggeeExited(status),
            };

            let flow = match turn {
                Turn::Event(Some(event)) => session.handle_event(event),
                Turn::Event(None) => session.handle_event(Event::DebuggerStopped),
                Turn::Command(Some(command)) => {
                    let mut flow = dispatch(&mut session, command);
                    // Drain what is already queued into the same turn
                    while matches!(flow, Ok(Flow::Continue)) {
                        let Ok(next) = commands.try_recv() else { break };
                        flow = dispatch(&mut session, next);
                    }
                    flow
                }
                Turn::Command(None) => {
                    tracing::debug!("All session handles dropped, stopping");
                    session.stop().map(|_| Flow::Exit)
                }
                Turn::DebuggeeExited(status) => {
                    tracing::info!(?status, "Debuggee exited");
                    debuggee = None;
                    session.handle_event(Event::DebuggerStopped)
                }
            };

            match flow {
                Ok(Flow::Continue) => {
                    if let Err(e) = session.flush() {
                        tracing::warn!(error = %e, "Failed to send queued breakpoint commands");
                        let _ = session.stop();
                        break Err(e);
                    }
                }
                Ok(Flow::Exit) => break Ok(()),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Fatal session error");
                    let _ = session.stop();
                    break Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error handling agent event");
                }
            }
        };

        tracing::debug!("Tearing down session");
        connection.close().await;
        if let Some(mut debuggee) = debuggee {
            debuggee.kill().await;
        }
        result
    }
}

async fn wait_for_exit(debuggee: Option<&mut Debuggee>) -> std::io::Result<ExitStatus> {
    match debuggee {
        Some(debuggee) => debuggee.wait().await,
        None => std::future::pending().await,
    }
}

fn dispatch(session: &mut DebugSession, command: UserCommand) -> Result<Flow> {
    tracing::debug!(command = command.name(), "Handling user command");
    match command {
        UserCommand::AddBreakpoint {
            location,
            condition,
            reply,
        } => {
            let _ = reply.send(session.add_breakpoint(&location, condition));
        }
        UserCommand::RemoveBreakpoint { location, reply } => {
            let _ = reply.send(session.remove_breakpoint(&location));
        }
        UserCommand::Step { kind, reply } => {
            let _ = reply.send(session.step(kind));
        }
        UserCommand::RunToPosition { location, reply } => {
            let _ = reply.send(session.run_to_position(&location));
        }
        UserCommand::Select { pid, reply } => {
            let _ = reply.send(session.select_process(&pid));
        }
        UserCommand::Evaluate {
            expression,
            context,
            callback,
        } => {
            if let Err(e) = session.evaluate(&expression, context, callback) {
                tracing::debug!(error = %e, "Evaluation not submitted");
            }
        }
        UserCommand::Inspect { reply } => {
            let _ = reply.send(session.view());
        }
        UserCommand::Stop => {
            session.stop()?;
            return Ok(Flow::Exit);
        }
    }
    Ok(Flow::Continue)
}
