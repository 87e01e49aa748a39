//! Session over a real socket
//!
//! A fake agent connects to the listener the way the debuggee would and
//! speaks the framed protocol directly.

use std::sync::Arc;
use std::time::Duration;

use erldbg::common::config::InterpretConfig;
use erldbg::debugger::{
    BreakpointLocation, DebugSession, EvalContext, PositionMapper, SessionRunner, SessionState,
    StaticResolver, StepKind,
};
use erldbg::node::{codec, AgentListener, LaunchMode, ProcessHandle, Request, Term};
use erldbg::testing::recorder::{RecordingListener, Signal};
use erldbg::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

struct FakeAgent {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FakeAgent {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn expect(&mut self) -> Request {
        let json = tokio::time::timeout(Duration::from_secs(5), codec::read_message(&mut self.reader))
            .await
            .expect("timed out waiting for a request")
            .unwrap();
        serde_json::from_str(&json).unwrap()
    }

    async fn send(&mut self, json: &str) {
        codec::write_message(&mut self.writer, json).await.unwrap();
    }
}

async fn connect_session(
    mode: LaunchMode,
    listener: &RecordingListener,
    configure: impl FnOnce(&mut DebugSession),
) -> (SessionRunner, erldbg::SessionHandle, FakeAgent) {
    let agent_listener = AgentListener::bind(0).await.unwrap();
    let port = agent_listener.port();
    let accept = tokio::spawn(agent_listener.accept(Duration::from_secs(5)));
    let agent = FakeAgent::connect(port).await;
    let connection = accept.await.unwrap().unwrap();

    let resolver = StaticResolver::new()
        .with("server", "src/server.erl")
        .with("db", "src/db.erl");
    let mut session = DebugSession::new(
        Box::new(connection.sender()),
        Box::new(listener.clone()),
        PositionMapper::new(Arc::new(resolver)),
    );
    configure(&mut session);
    session.start(&mode, &InterpretConfig::default()).unwrap();

    let (runner, handle) = SessionRunner::new(session, connection, None);
    (runner, handle, agent)
}

async fn wait_for_state(handle: &erldbg::SessionHandle, state: SessionState) {
    for _ in 0..500 {
        if handle.inspect().await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("session never reached state {}", state);
}

#[tokio::test]
async fn test_launch_debug_and_detach() {
    let listener = RecordingListener::new();
    let mode = LaunchMode::Run {
        module: "server".to_string(),
        function: "start".to_string(),
        args: vec![],
    };
    let (runner, handle, mut agent) = connect_session(mode, &listener, |session| {
        session
            .add_breakpoint(&BreakpointLocation::parse("server:42").unwrap(), None)
            .unwrap();
    })
    .await;
    let task = tokio::spawn(runner.run());

    // Breakpoints are in place before the entry point runs
    assert_eq!(
        agent.expect().await,
        Request::InterpretModules {
            files: vec!["src/server.erl".into()]
        }
    );
    assert_eq!(
        agent.expect().await,
        Request::SetBreakpoint {
            module: "server".to_string(),
            line: 42,
            condition: None
        }
    );
    assert!(matches!(agent.expect().await, Request::RunDebugger { .. }));

    agent.send(r#"{"event":"debugger_started"}"#).await;
    agent
        .send(r#"{"event":"set_breakpoint_response","module":"server","line":42}"#)
        .await;
    agent
        .send(
            r#"{"event":"breakpoint_reached","pid":"<0.90.0>","snapshots":[
                {"pid":"<0.90.0>","status":"break","module":"server","line":42,
                 "stack":[{"module":"server","function":"handle_call","arity":3,"line":42,
                           "bindings":[{"name":"State","value":{"type":"atom","value":"idle"}}]}]}]}"#,
        )
        .await;
    wait_for_state(&handle, SessionState::Suspended).await;

    let view = handle.inspect().await.unwrap();
    assert_eq!(view.context.unwrap().active, ProcessHandle::new("<0.90.0>"));
    assert_eq!(view.breakpoints.len(), 1);

    // A breakpoint added while suspended goes out on its own
    handle
        .add_breakpoint(BreakpointLocation::parse("db:7").unwrap(), Some("Key =/= undefined".into()))
        .await
        .unwrap();
    assert!(matches!(agent.expect().await, Request::InterpretModules { .. }));
    assert!(matches!(
        agent.expect().await,
        Request::SetBreakpoint { line: 7, condition: Some(_), .. }
    ));

    let evaluation = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.evaluate_async("State.", EvalContext::default()).await })
    };
    assert_eq!(
        agent.expect().await,
        Request::Evaluate {
            pid: ProcessHandle::new("<0.90.0>"),
            expression: "State.".to_string(),
            module: Some("server".to_string()),
            frame: None,
        }
    );
    agent
        .send(r#"{"event":"evaluate_response","result":{"type":"atom","value":"idle"}}"#)
        .await;
    assert_eq!(
        evaluation.await.unwrap().unwrap(),
        Ok(Term::Atom("idle".to_string()))
    );

    handle.step(StepKind::Over).await.unwrap();
    assert_eq!(
        agent.expect().await,
        Request::StepOver {
            pid: ProcessHandle::new("<0.90.0>")
        }
    );
    assert!(handle.step(StepKind::Over).await.is_err());

    agent.send(r#"{"event":"debugger_stopped"}"#).await;
    task.await.unwrap().unwrap();

    let signals = listener.take();
    assert!(signals.contains(&Signal::DebuggerStarted));
    assert!(signals.contains(&Signal::BreakpointReached {
        pid: ProcessHandle::new("<0.90.0>"),
        module: "server".to_string(),
        line: 42,
    }));
    assert_eq!(signals.last(), Some(&Signal::DebuggerStopped));
}

#[tokio::test]
async fn test_remote_node_failure_ends_session() {
    let listener = RecordingListener::new();
    let mode = LaunchMode::Attach {
        node: "app@localhost".to_string(),
        cookie: None,
    };
    let (runner, handle, mut agent) = connect_session(mode, &listener, |_| {}).await;
    let task = tokio::spawn(runner.run());

    assert_eq!(
        agent.expect().await,
        Request::DebugRemoteNode {
            node: "app@localhost".to_string(),
            cookie: None
        }
    );
    agent
        .send(r#"{"event":"debug_remote_node_response","node":"app@localhost","error":"nodedown"}"#)
        .await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::RemoteNodeFailed { .. })));
    assert!(handle.is_closed());

    let signals = listener.take();
    assert!(signals.iter().any(|signal| matches!(
        signal,
        Signal::Message { text, .. } if text.contains("Failed to debug remote node 'app@localhost'. Details: nodedown")
    )));
}

#[tokio::test]
async fn test_agent_hang_up_terminates() {
    let listener = RecordingListener::new();
    let mode = LaunchMode::Run {
        module: "server".to_string(),
        function: "start".to_string(),
        args: vec![],
    };
    let (runner, handle, mut agent) = connect_session(mode, &listener, |_| {}).await;
    let task = tokio::spawn(runner.run());

    assert!(matches!(agent.expect().await, Request::RunDebugger { .. }));
    agent.writer.shutdown().await.unwrap();
    drop(agent);

    task.await.unwrap().unwrap();
    assert!(handle.inspect().await.is_err());
    assert_eq!(listener.take().last(), Some(&Signal::DebuggerStopped));
}
