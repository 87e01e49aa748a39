//! CLI command handling
//!
//! Starts the debuggee, connects the session and hands stdin to the prompt.

mod console;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::commands::{Commands, SessionArgs};
use crate::common::{config::Config, Error, Result};
use crate::debugger::{DebugSession, PositionMapper, SessionRunner, SourceIndex};
use crate::node::{launcher, AgentListener, LaunchMode};
use crate::testing;

pub use console::ConsoleListener;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Launch {
            module,
            function,
            args,
            session,
        } => {
            let mode = LaunchMode::Run {
                module,
                function,
                args,
            };
            run_session(mode, session).await
        }

        Commands::Attach {
            node,
            cookie,
            session,
        } => run_session(LaunchMode::Attach { node, cookie }, session).await,

        Commands::Test { paths, verbose } => run_tests(&paths, verbose),
    }
}

fn load_config(args: &SessionArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config);
    Ok(config)
}

#[tracing::instrument(skip(args), fields(target = %mode.describe()))]
async fn run_session(mode: LaunchMode, args: SessionArgs) -> Result<()> {
    let config = load_config(&args)?;

    // Parse initial breakpoints before anything is started
    let initial = args
        .breakpoints
        .iter()
        .map(|spec| prompt::parse_breakpoint(spec))
        .collect::<Result<Vec<_>>>()?;

    let index = SourceIndex::scan(&config.sources.roots, config.sources.prefer_test_sources);
    if index.is_empty() {
        tracing::warn!("No Erlang sources found; pass --source-root to resolve modules");
    } else {
        tracing::debug!(modules = index.len(), "Source index built");
    }
    let mapper = PositionMapper::new(Arc::new(index));

    let agent_listener = AgentListener::bind(config.session.listen_port).await?;
    let mut debuggee = launcher::launch(&config, agent_listener.port(), &mode)?;

    println!("Waiting for the debugger agent on port {}...", agent_listener.port());
    let timeout = Duration::from_secs(config.session.accept_timeout_secs);
    let connection = tokio::select! {
        connection = agent_listener.accept(timeout) => connection?,
        status = debuggee.wait() => {
            let status = status.map(|s| s.to_string()).unwrap_or_else(|e| e.to_string());
            return Err(Error::launch_failed("debuggee exited before the agent connected", status));
        }
    };

    let mut session = DebugSession::new(
        Box::new(connection.sender()),
        Box::new(ConsoleListener::new()),
        mapper,
    );
    for (location, condition) in initial {
        match session.add_breakpoint(&location, condition) {
            Ok(bp) => console::print_breakpoint_added(&bp),
            Err(e) => eprintln!("{} {}", "Skipping breakpoint:".yellow(), e),
        }
    }
    session.start(&mode, &config.interpret)?;
    println!("Debugging {}", mode.describe());

    let (runner, handle) = SessionRunner::new(session, connection, Some(debuggee));
    let mut session_task = tokio::spawn(runner.run());
    let prompt_task = tokio::spawn(prompt::run(handle.clone()));

    let result = tokio::select! {
        result = &mut session_task => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping session");
            let _ = handle.stop();
            session_task.await
        }
    };
    prompt_task.abort();

    result.map_err(|e| Error::Internal(format!("session task failed: {}", e)))?
}

fn run_tests(paths: &[std::path::PathBuf], verbose: bool) -> Result<()> {
    let mut failed = Vec::new();
    for path in paths {
        let result = testing::run_scenario(path, verbose)?;
        if !result.passed {
            failed.push(result);
        }
    }

    if failed.is_empty() {
        println!("{} {} scenario(s) passed", "✓".green().bold(), paths.len());
        return Ok(());
    }

    for result in &failed {
        println!(
            "{} {} (step {}/{}): {}",
            "✗".red().bold(),
            result.name,
            result.steps_run,
            result.steps_total,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Err(Error::TestAssertion(format!(
        "{} of {} scenario(s) failed",
        failed.len(),
        paths.len()
    )))
}
