//! Debugger core
//!
//! Everything between the agent connection and the front end: mapping
//! positions, tracking breakpoints, correlating evaluations, deciding which
//! suspend notifications are news, and the session that ties them together.

pub mod breakpoints;
pub mod evaluation;
pub mod listener;
pub mod position;
pub mod runner;
pub mod session;
pub mod suspension;

pub use breakpoints::{AddOutcome, Breakpoint, BreakpointRegistry, BreakpointStatus};
pub use evaluation::{EvalCallback, EvalContext, EvalOutcome, EvaluationCorrelator, EvaluationError};
pub use listener::DebugListener;
pub use position::{
    BreakpointKey, BreakpointLocation, ModuleResolver, PositionMapper, SourceIndex, SourcePosition,
    StaticResolver,
};
pub use runner::{SessionHandle, SessionRunner, UserCommand};
pub use session::{DebugSession, Flow, SessionState, SessionView, StepKind};
pub use suspension::{Decision, Focus, SuspendContext, SuspensionState, SuspensionTracker};
