//! Interactive prompt
//!
//! Parses commands typed on stdin and forwards them to the session loop.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::common::{Error, Result};
use crate::debugger::{BreakpointLocation, EvalContext, SessionHandle, StepKind};
use crate::node::ProcessHandle;

use super::console;

pub const HELP: &str = "\
Commands:
  break|b <loc> [if <cond>]  add a breakpoint (module:line or file.erl:line)
  clear <loc>                remove a breakpoint
  breaks                     list breakpoints
  next|n                     step over
  step|s                     step into
  finish                     step out
  continue|c                 resume
  until <loc>                run to a position
  eval|p <expr>              evaluate in the displayed process
  ps                         list suspended processes
  select <pid>               display another suspended process
  bt                         backtrace of the displayed process
  locals                     variables of the top frame
  stop|quit                  stop the debugger";

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCommand {
    Empty,
    Help,
    Break {
        location: BreakpointLocation,
        condition: Option<String>,
    },
    Clear(BreakpointLocation),
    Breakpoints,
    Step(StepKind),
    RunTo(BreakpointLocation),
    Eval(String),
    Processes,
    Select(ProcessHandle),
    Backtrace,
    Locals,
    Stop,
}

/// Split `loc [if cond]`
pub fn parse_breakpoint(spec: &str) -> Result<(BreakpointLocation, Option<String>)> {
    let spec = spec.trim();
    let (location, condition) = match spec.split_once(" if ") {
        Some((location, condition)) => (location, Some(condition.trim().to_string())),
        None => (spec, None),
    };
    let condition = condition.filter(|c| !c.is_empty());
    Ok((BreakpointLocation::parse(location.trim())?, condition))
}

fn required<'a>(command: &str, rest: &'a str) -> Result<&'a str> {
    if rest.is_empty() {
        return Err(Error::UnknownCommand(format!("{} needs an argument", command)));
    }
    Ok(rest)
}

/// Parse one prompt line
pub fn parse(line: &str) -> Result<PromptCommand> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "" => PromptCommand::Empty,
        "help" | "h" | "?" => PromptCommand::Help,
        "break" | "b" => {
            let (location, condition) = parse_breakpoint(required(word, rest)?)?;
            PromptCommand::Break {
                location,
                condition,
            }
        }
        "clear" => PromptCommand::Clear(BreakpointLocation::parse(required(word, rest)?)?),
        "breaks" | "info" => PromptCommand::Breakpoints,
        "next" | "n" => PromptCommand::Step(StepKind::Over),
        "step" | "s" => PromptCommand::Step(StepKind::Into),
        "finish" => PromptCommand::Step(StepKind::Out),
        "continue" | "c" => PromptCommand::Step(StepKind::Continue),
        "until" => PromptCommand::RunTo(BreakpointLocation::parse(required(word, rest)?)?),
        "eval" | "p" | "print" => PromptCommand::Eval(required(word, rest)?.to_string()),
        "ps" => PromptCommand::Processes,
        "select" => PromptCommand::Select(ProcessHandle::new(required(word, rest)?)),
        "bt" | "backtrace" => PromptCommand::Backtrace,
        "locals" => PromptCommand::Locals,
        "stop" | "quit" | "q" => PromptCommand::Stop,
        other => return Err(Error::UnknownCommand(other.to_string())),
    };
    Ok(command)
}

/// Read commands from stdin until the user stops or the session ends
pub async fn run(handle: SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if handle.is_closed() {
            break;
        }
        let command = match parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        if command == PromptCommand::Stop {
            break;
        }
        if let Err(e) = execute(&handle, command).await {
            if matches!(e, Error::SessionTerminated(_)) {
                break;
            }
            eprintln!("Error: {}", e);
        }
    }

    // EOF or an explicit stop both end the session
    let _ = handle.stop();
    Ok(())
}

async fn execute(handle: &SessionHandle, command: PromptCommand) -> Result<()> {
    match command {
        PromptCommand::Empty | PromptCommand::Stop => {}
        PromptCommand::Help => println!("{}", HELP),
        PromptCommand::Break {
            location,
            condition,
        } => {
            let bp = handle.add_breakpoint(location, condition).await?;
            console::print_breakpoint_added(&bp);
        }
        PromptCommand::Clear(location) => match handle.remove_breakpoint(location.clone()).await? {
            Some(bp) => println!("Breakpoint at {} removed", bp.position),
            None => println!("No breakpoint at {}", location),
        },
        PromptCommand::Breakpoints => {
            let view = handle.inspect().await?;
            console::print_breakpoints(&view.breakpoints);
        }
        PromptCommand::Step(kind) => handle.step(kind).await?,
        PromptCommand::RunTo(location) => handle.run_to_position(location).await?,
        PromptCommand::Eval(expression) => {
            match handle.evaluate_async(expression, EvalContext::default()).await? {
                Ok(value) => println!("{}", value),
                Err(e) => println!("Evaluation failed: {}", e),
            }
        }
        PromptCommand::Processes => {
            let view = handle.inspect().await?;
            match &view.context {
                Some(context) => console::print_processes(context),
                None => println!("No process is suspended ({})", view.state),
            }
        }
        PromptCommand::Select(pid) => {
            let context = handle.select(pid).await?;
            console::print_stop_location(&context);
        }
        PromptCommand::Backtrace => {
            let view = handle.inspect().await?;
            let context = view.context.ok_or(Error::NoSuspendedProcess)?;
            console::print_backtrace(&context);
        }
        PromptCommand::Locals => {
            let view = handle.inspect().await?;
            let context = view.context.ok_or(Error::NoSuspendedProcess)?;
            console::print_locals(&context);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_breakpoint_with_condition() {
        let (location, condition) = parse_breakpoint("server:42 if N > 3").unwrap();
        assert_eq!(
            location,
            BreakpointLocation::Module {
                module: "server".to_string(),
                line: 42
            }
        );
        assert_eq!(condition.as_deref(), Some("N > 3"));

        let (_, condition) = parse_breakpoint("src/server.erl:42").unwrap();
        assert_eq!(condition, None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("").unwrap(), PromptCommand::Empty);
        assert_eq!(parse("n").unwrap(), PromptCommand::Step(StepKind::Over));
        assert_eq!(parse("finish").unwrap(), PromptCommand::Step(StepKind::Out));
        assert_eq!(parse("c").unwrap(), PromptCommand::Step(StepKind::Continue));
        assert_eq!(
            parse("p  lists:sum(L) ").unwrap(),
            PromptCommand::Eval("lists:sum(L)".to_string())
        );
        assert_eq!(
            parse("select <0.88.0>").unwrap(),
            PromptCommand::Select(ProcessHandle::new("<0.88.0>"))
        );
        assert_eq!(parse("quit").unwrap(), PromptCommand::Stop);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("frobnicate"), Err(Error::UnknownCommand(_))));
        assert!(parse("break").is_err());
        assert!(matches!(parse("clear server"), Err(Error::InvalidLocation(_))));
    }
}
