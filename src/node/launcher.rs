//! Debuggee launch
//!
//! The debuggee is an `erl` node started with the debugger support files on
//! its code path. Its entry module connects back to our listen port, after
//! which either a local entry point is run or a remote node is attached.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tempfile::TempDir;
use tokio::process::{Child, Command};

use crate::common::{config::Config, Error, Result};

use super::types::Request;

/// How the session gets something to debug
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run `module:function(args)` in the freshly started node
    Run {
        module: String,
        function: String,
        args: Vec<String>,
    },
    /// Debug an already running node
    Attach {
        node: String,
        cookie: Option<String>,
    },
}

impl LaunchMode {
    /// First command sent once the agent is connected
    pub fn initial_request(&self) -> Result<Request> {
        match self {
            LaunchMode::Run {
                module,
                function,
                args,
            } => Ok(Request::RunDebugger {
                module: module.clone(),
                function: function.clone(),
                args: args.clone(),
            }),
            LaunchMode::Attach { node, cookie } => {
                if node.trim().is_empty() {
                    return Err(Error::Config("remote node name is not specified".to_string()));
                }
                Ok(Request::DebugRemoteNode {
                    node: node.clone(),
                    cookie: cookie.clone(),
                })
            }
        }
    }

    /// Human-readable target description
    pub fn describe(&self) -> String {
        match self {
            LaunchMode::Run {
                module,
                function,
                args,
            } => format!("{}:{}({})", module, function, args.join(", ")),
            LaunchMode::Attach { node, .. } => format!("node {}", node),
        }
    }
}

/// Running debuggee process and the directory holding its support files
pub struct Debuggee {
    child: Child,
    /// Deleted together with the debuggee handle
    _work_dir: TempDir,
}

impl Debuggee {
    /// Wait for the debuggee to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill the debuggee
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Debuggee already gone");
        }
    }
}

/// Copy the configured support files into a fresh temporary directory
pub fn prepare_work_dir(agent_dir: &Path, files: &[String]) -> Result<TempDir> {
    let work_dir = tempfile::Builder::new()
        .prefix("erldbg_")
        .tempdir()
        .map_err(|e| Error::launch_failed("cannot create working directory", e))?;

    tracing::debug!(dir = %work_dir.path().display(), "Copying debugger support files");
    for name in files {
        let source = agent_dir.join(name);
        if !source.is_file() {
            return Err(Error::agent_file_missing(name, agent_dir));
        }
        std::fs::copy(&source, work_dir.path().join(name))
            .map_err(|e| Error::launch_failed(&format!("cannot copy {}", name), e))?;
    }

    Ok(work_dir)
}

fn has_flag(flags: &[String], names: &[&str]) -> bool {
    flags.iter().any(|f| names.contains(&f.as_str()))
}

/// Arguments for `erl`, in the order the runtime expects them
pub fn command_args(config: &Config, work_dir: &Path, port: u16, mode: &LaunchMode) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    args.push("-pa".into());
    args.push(work_dir.as_os_str().to_owned());
    for path in &config.runtime.code_paths {
        args.push("-pa".into());
        args.push(path.as_os_str().to_owned());
    }

    args.push("-run".into());
    args.push(config.agent.entry_module.clone().into());
    args.push("main".into());
    args.push(port.to_string().into());
    args.push(work_dir.as_os_str().to_owned());

    let flags = &config.runtime.extra_flags;
    args.extend(flags.iter().map(OsString::from));

    if let LaunchMode::Attach { cookie, .. } = mode {
        // Attaching needs a distributed local node
        if !has_flag(flags, &["-sname", "-name"]) {
            args.push("-sname".into());
            args.push(format!("erldbg_{}", std::process::id()).into());
        }
        if let Some(cookie) = cookie {
            if !has_flag(flags, &["-setcookie"]) {
                args.push("-setcookie".into());
                args.push(cookie.into());
            }
        }
    }

    args.push("-noshell".into());
    args.push("-s".into());
    args.push("init".into());
    args.push("stop".into());

    args
}

/// Start the debuggee node
#[tracing::instrument(skip(config), fields(target = %mode.describe()))]
pub fn launch(config: &Config, port: u16, mode: &LaunchMode) -> Result<Debuggee> {
    let erl: PathBuf = config.erl_executable()?;
    let agent_dir = config.agent_dir()?;
    let work_dir = prepare_work_dir(&agent_dir, &config.agent.files)?;

    let args = command_args(config, work_dir.path(), port, mode);
    tracing::debug!(erl = %erl.display(), ?args, "Starting debuggee");

    let child = Command::new(&erl)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::launch_failed(&format!("cannot start {}", erl.display()), e))?;

    tracing::info!(pid = ?child.id(), "Debuggee started");
    Ok(Debuggee {
        child,
        _work_dir: work_dir,
    })
}
