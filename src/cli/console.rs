//! Console presentation
//!
//! Prints session signals and inspection results on stdout.

use colored::Colorize;

use crate::debugger::{Breakpoint, BreakpointStatus, DebugListener, SourcePosition, SuspendContext};
use crate::node::{ProcessSnapshot, Severity, Term};

/// Longest value rendering printed in full
const MAX_VALUE_LEN: usize = 200;

fn truncate(value: &Term) -> String {
    let text = value.to_string();
    if text.chars().count() <= MAX_VALUE_LEN {
        return text;
    }
    let cut: String = text.chars().take(MAX_VALUE_LEN).collect();
    format!("{}...", cut)
}

/// Listener printing to the terminal
#[derive(Debug, Default)]
pub struct ConsoleListener;

impl ConsoleListener {
    pub fn new() -> Self {
        Self
    }
}

impl DebugListener for ConsoleListener {
    fn debugger_started(&mut self) {
        println!("{}", "Debugger ready. Type 'help' for commands.".dimmed());
    }

    fn debugger_stopped(&mut self) {
        println!("{}", "Debugger stopped".yellow());
    }

    fn stopped(&mut self, position: Option<&SourcePosition>, context: &SuspendContext) {
        match position {
            Some(position) => println!("{} {} at {}", "Stopped".cyan().bold(), context.active, position),
            None => println!("{} {}", "Stopped".cyan().bold(), context.active),
        }
        print_stop_location(context);
    }

    fn breakpoint_reached(&mut self, breakpoint: &Breakpoint, context: &SuspendContext) {
        println!(
            "{} {} at {}",
            "Breakpoint reached".green().bold(),
            context.active,
            breakpoint.position
        );
        if let Some(condition) = &breakpoint.condition {
            println!("  Condition: {}", condition.dimmed());
        }
        print_stop_location(context);
    }

    fn breakpoint_invalid(&mut self, breakpoint: &Breakpoint, reason: &str) {
        println!(
            "{} {}: {}",
            "Invalid breakpoint".red(),
            breakpoint.position,
            reason
        );
    }

    fn message(&mut self, text: &str, severity: Severity) {
        match severity {
            Severity::Info => println!("{}", text),
            Severity::Warning => println!("{} {}", "warning:".yellow().bold(), text),
            Severity::Error => println!("{} {}", "error:".red().bold(), text),
        }
    }
}

/// Where the displayed process is, and how many others are waiting
pub fn print_stop_location(context: &SuspendContext) {
    if let Some(snapshot) = context.active_snapshot() {
        if let (Some(module), Some(line)) = (&snapshot.module, snapshot.line) {
            println!("  Location: {}:{}", module, line);
        }
    }
    let others = context.snapshots.len().saturating_sub(1);
    if others > 0 {
        println!("  {} other process(es) suspended, see 'ps'", others);
    }
}

pub fn print_breakpoint_added(bp: &Breakpoint) {
    println!("Breakpoint set at {}", bp.position);
    if let Some(condition) = &bp.condition {
        println!("  Condition: {}", condition);
    }
    if let BreakpointStatus::Invalid(reason) = &bp.status {
        println!("  {} {}", "Invalid:".red(), reason);
    }
}

pub fn print_breakpoints(breakpoints: &[Breakpoint]) {
    if breakpoints.is_empty() {
        println!("No breakpoints set");
        return;
    }
    println!("Breakpoints:");
    for bp in breakpoints {
        let status = match &bp.status {
            BreakpointStatus::Verified => "✓".green().to_string(),
            BreakpointStatus::Pending => "?".yellow().to_string(),
            BreakpointStatus::Invalid(_) => "✗".red().to_string(),
        };
        print!("  {} {}", status, bp.position);
        if let Some(condition) = &bp.condition {
            print!(" if {}", condition);
        }
        if let BreakpointStatus::Invalid(reason) = &bp.status {
            print!(" ({})", reason);
        }
        println!();
    }
}

fn describe_process(snapshot: &ProcessSnapshot) -> String {
    let mut text = format!("{} [{:?}]", snapshot.pid, snapshot.status);
    if let Some(call) = &snapshot.initial_call {
        text.push_str(&format!(" {}", call));
    }
    if let (Some(module), Some(line)) = (&snapshot.module, snapshot.line) {
        text.push_str(&format!(" at {}:{}", module, line));
    }
    text
}

pub fn print_processes(context: &SuspendContext) {
    for snapshot in &context.snapshots {
        let marker = if snapshot.pid == context.active { "*" } else { " " };
        println!("{} {}", marker, describe_process(snapshot));
    }
}

pub fn print_backtrace(context: &SuspendContext) {
    let Some(snapshot) = context.active_snapshot() else {
        println!("No snapshot for {}", context.active);
        return;
    };
    if snapshot.stack.is_empty() {
        println!("No stack frames");
        return;
    }
    for (i, frame) in snapshot.stack.iter().enumerate() {
        let arity = frame.arity.map(|a| format!("/{}", a)).unwrap_or_default();
        match frame.line {
            Some(line) => println!("#{:<3} {}:{}{} line {}", i, frame.module, frame.function, arity, line),
            None => println!("#{:<3} {}:{}{}", i, frame.module, frame.function, arity),
        }
    }
}

pub fn print_locals(context: &SuspendContext) {
    let bindings = context
        .active_snapshot()
        .map(|s| s.bindings())
        .unwrap_or(&[]);
    if bindings.is_empty() {
        println!("No local variables");
        return;
    }
    for binding in bindings {
        println!(
            "  {} = {} {}",
            binding.name.bold(),
            truncate(&binding.value),
            format!("({})", binding.value.type_name()).dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_values_are_truncated() {
        let long = Term::String("x".repeat(500));
        let text = truncate(&long);
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), MAX_VALUE_LEN + 3);

        assert_eq!(truncate(&Term::Integer(5)), "5");
    }
}
