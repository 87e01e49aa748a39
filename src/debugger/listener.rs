//! Signals emitted by the session to the presentation layer

use crate::node::Severity;

use super::breakpoints::Breakpoint;
use super::position::SourcePosition;
use super::suspension::SuspendContext;

/// Receiver of everything the session reports
///
/// Called on the dispatch loop; implementations must not block.
pub trait DebugListener: Send {
    fn debugger_started(&mut self);

    fn debugger_stopped(&mut self);

    /// A process stopped where no breakpoint is registered (or its source is unknown)
    fn stopped(&mut self, position: Option<&SourcePosition>, context: &SuspendContext);

    fn breakpoint_reached(&mut self, breakpoint: &Breakpoint, context: &SuspendContext);

    fn breakpoint_invalid(&mut self, breakpoint: &Breakpoint, reason: &str);

    fn message(&mut self, text: &str, severity: Severity);
}
