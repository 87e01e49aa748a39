//! Connection to the debugger agent
//!
//! The agent inside the debuggee connects back to a local port. Once
//! accepted, the stream is split into a reader task that decodes frames into
//! [`Event`]s and a writer task that is the only code touching the write half.
//! Every outbound [`Request`], from whatever caller, goes through the writer's
//! channel, so commands are never interleaved on the wire.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};

use super::codec;
use super::types::{Event, Request};

/// Destination for outbound commands
///
/// Sending never waits for the agent; acknowledgements come back as events.
pub trait CommandSink: Send {
    fn send(&self, request: Request) -> Result<()>;
}

/// Cloneable handle onto the writer task's queue
#[derive(Debug, Clone)]
pub struct RequestSender {
    tx: mpsc::UnboundedSender<Request>,
}

impl CommandSink for RequestSender {
    fn send(&self, request: Request) -> Result<()> {
        tracing::debug!(command = request.name(), "Queueing agent command");
        self.tx
            .send(request)
            .map_err(|_| Error::SessionTerminated("agent connection closed".to_string()))
    }
}

/// Listening socket the agent connects back to
pub struct AgentListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl AgentListener {
    /// Bind on loopback; port 0 picks a free port
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| Error::ConnectionFailed(format!("cannot listen on port {}: {}", port, e)))?;
        let addr = listener.local_addr()?;
        tracing::debug!(%addr, "Listening for debugger agent");
        Ok(Self { listener, addr })
    }

    /// Port passed to the debuggee on its command line
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the agent to connect
    pub async fn accept(self, timeout: Duration) -> Result<AgentConnection> {
        let (stream, peer) = tokio::time::timeout(timeout, self.listener.accept())
            .await
            .map_err(|_| Error::Timeout(timeout.as_secs()))?
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let _ = stream.set_nodelay(true);
        tracing::info!(%peer, "Debugger agent connected");
        Ok(AgentConnection::from_stream(stream))
    }
}

/// Live connection to the agent
pub struct AgentConnection {
    sender: RequestSender,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl AgentConnection {
    /// Wrap any byte stream; used with TCP in production and in-memory pipes in tests
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (event_tx, events_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            event_tx,
            shutdown.clone(),
        ));
        let writer = tokio::spawn(write_loop(
            BufWriter::new(write_half),
            request_rx,
            shutdown.clone(),
        ));

        Self {
            sender: RequestSender { tx: request_tx },
            events_rx: Some(events_rx),
            shutdown,
            reader,
            writer,
        }
    }

    /// Handle for queueing outbound commands
    pub fn sender(&self) -> RequestSender {
        self.sender.clone()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.events_rx.take()
    }

    /// Close the connection after already-queued commands are written
    pub async fn close(mut self) {
        self.shutdown.cancel();
        let _ = (&mut self.writer).await;
        self.reader.abort();
    }
}

impl Drop for AgentConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_loop<R>(
    mut reader: BufReader<R>,
    events: mpsc::UnboundedSender<Event>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = codec::read_message(&mut reader) => frame,
        };

        match frame {
            Ok(json) => {
                tracing::trace!(frame = %json, "Agent <<<");
                let event = Event::decode(&json);
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(Error::Protocol(reason)) => {
                tracing::warn!(%reason, "Dropping malformed frame from agent");
            }
            Err(Error::FramingLost(reason)) => {
                tracing::error!(%reason, "Agent stream is unreadable, closing connection");
                let _ = events.send(Event::DebuggerStopped);
                break;
            }
            Err(e) => {
                tracing::info!(error = %e, "Agent connection closed");
                let _ = events.send(Event::DebuggerStopped);
                break;
            }
        }
    }
    shutdown.cancel();
}

async fn write_loop<W>(
    mut writer: BufWriter<W>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        // Queued commands win over shutdown so a final stop still reaches the agent
        let request = tokio::select! {
            biased;
            request = requests.recv() => request,
            _ = shutdown.cancelled() => break,
        };

        let Some(request) = request else { break };

        let json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(command = request.name(), error = %e, "Cannot encode command");
                continue;
            }
        };

        tracing::trace!(frame = %json, "Agent >>>");
        if let Err(e) = codec::write_message(&mut writer, &json).await {
            tracing::warn!(error = %e, "Failed to write to agent");
            shutdown.cancel();
            break;
        }
    }
}
