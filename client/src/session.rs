//! Server session - owns the analysis server subprocess and its transport.
//!
//! Lifecycle: `Starting → Running → Stopping → Idle`, with a terminal
//! `Crashed` reached from `Running` when the process exits unexpectedly.
//! `Idle` is represented by not holding a session at all - the orchestrator
//! keeps an `Option<ServerSession>` and dropping or stopping the handle is
//! the transition back. There is no ambient global session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

use traverse_types::{CommandRequest, CommandResult};

use crate::codec::{FrameReader, FrameWriter, ProtocolError};
use crate::protocol::{self, Notification, Request};

/// How long the server gets to answer the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between a polite shutdown and a kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Consecutive discarded frames tolerated before the session is poisoned.
const DISCARDED_FRAME_LIMIT: u32 = 3;

const WRITER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start analysis server: {0}")]
    Start(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("analysis request timed out after {0:?}")]
    Timeout(Duration),
    #[error("server session is closed")]
    Closed,
}

/// Lifecycle states checked before every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Crashed,
}

/// Everything needed to spawn (or respawn) the server process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    binary: PathBuf,
    workspace_root: PathBuf,
    env: Vec<(String, String)>,
}

impl LaunchSpec {
    #[must_use]
    pub fn new(binary: PathBuf, workspace_root: PathBuf) -> Self {
        Self {
            binary,
            workspace_root,
            env: Vec::new(),
        }
    }

    /// Add an environment variable for the server process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

type PendingMap = Arc<tokio::sync::Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type SharedState = Arc<Mutex<SessionState>>;

fn read_state(state: &SharedState) -> SessionState {
    *state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn store_state(state: &SharedState, next: SessionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Flip to `Crashed` unless a deliberate stop is already underway.
fn mark_crashed(state: &SharedState) {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    if *guard != SessionState::Stopping {
        *guard = SessionState::Crashed;
    }
}

#[derive(Debug)]
pub struct ServerSession {
    child: Option<Child>,
    launch: Option<LaunchSpec>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: u64,
    pending: PendingMap,
    state: SharedState,
    /// Flips to `true` when the reader task tears the session down; a
    /// `watch` keeps the signal observable even for requests issued after
    /// the fact, so nothing ever awaits a reply that cannot come.
    closed: watch::Receiver<bool>,
    #[allow(dead_code)]
    reader_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: tokio::task::JoinHandle<()>,
}

impl ServerSession {
    /// Spawn the server executable and complete the handshake.
    ///
    /// The process gets piped stdio as its transport; stderr is drained to
    /// the log. A process that exits before answering the handshake yields
    /// [`SessionError::Start`].
    pub async fn start(launch: LaunchSpec) -> Result<Self, SessionError> {
        let mut cmd = Command::new(launch.binary());
        cmd.current_dir(launch.workspace_root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            SessionError::Start(format!("spawning {}: {e}", launch.binary().display()))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Start("server process has no stdout".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Start("server process has no stdin".into()))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(stderr);
        }

        let workspace_root = launch.workspace_root().to_path_buf();
        Self::connect_parts(Some(child), Some(launch), stdout, stdin, &workspace_root).await
    }

    /// Attach to an already-running transport and complete the handshake.
    ///
    /// Used for in-memory transports; sessions built this way have no
    /// process to supervise and cannot be restarted.
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        workspace_root: &Path,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect_parts(None, None, reader, writer, workspace_root).await
    }

    async fn connect_parts<R, W>(
        child: Option<Child>,
        launch: Option<LaunchSpec>,
        reader: R,
        writer: W,
        workspace_root: &Path,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let state: SharedState = Arc::new(Mutex::new(SessionState::Starting));
        let pending: PendingMap = Arc::default();
        let (closed_tx, closed_rx) = watch::channel(false);

        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(write_loop(writer, writer_rx));
        let reader_handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&state),
            writer_tx.clone(),
            closed_tx,
        ));

        let mut session = Self {
            child,
            launch,
            writer_tx,
            next_id: 1,
            pending,
            state,
            closed: closed_rx,
            reader_handle,
            writer_handle,
        };

        session.handshake(workspace_root).await?;

        // Only promote a session that is still starting; a process that
        // died right after the handshake stays crashed.
        {
            let mut guard = session
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *guard == SessionState::Starting {
                *guard = SessionState::Running;
            }
        }
        if session.state() != SessionState::Running {
            return Err(SessionError::Start("server exited during startup".into()));
        }
        Ok(session)
    }

    async fn handshake(&mut self, workspace_root: &Path) -> Result<(), SessionError> {
        let params = protocol::initialize_params(workspace_root);
        let reply = self
            .request_internal("initialize", Some(params), Some(HANDSHAKE_TIMEOUT))
            .await
            .map_err(|e| SessionError::Start(format!("handshake failed: {e}")))?;

        if let Some(error) = reply.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(SessionError::Start(format!(
                "server rejected initialize: {message}"
            )));
        }

        self.notify("initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| SessionError::Start(format!("handshake failed: {e}")))?;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        read_state(&self.state)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Send one analysis command and await its matching reply.
    pub async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResult, SessionError> {
        let params = protocol::execute_command_params(request);
        let reply = self.request(protocol::EXECUTE_COMMAND, Some(params)).await?;
        decode_result(&reply)
    }

    /// Send a request and await the reply with the matching id.
    ///
    /// No deadline: analyses of large workspaces legitimately take a long
    /// time. The await resolves with [`SessionError::Closed`] if the
    /// session tears down underneath it - it never hangs past teardown.
    pub async fn request(
        &mut self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<Value, SessionError> {
        self.request_internal(method, params, None).await
    }

    /// Like [`request`](Self::request) with a caller-supplied ceiling.
    pub async fn request_with_timeout(
        &mut self,
        method: &'static str,
        params: Option<Value>,
        ceiling: Duration,
    ) -> Result<Value, SessionError> {
        self.request_internal(method, params, Some(ceiling)).await
    }

    async fn request_internal(
        &mut self,
        method: &'static str,
        params: Option<Value>,
        ceiling: Option<Duration>,
    ) -> Result<Value, SessionError> {
        match self.state() {
            SessionState::Running | SessionState::Starting => {}
            SessionState::Stopping | SessionState::Crashed => return Err(SessionError::Closed),
        }

        let id = self.next_id;
        self.next_id += 1;

        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(|e| SessionError::Protocol(e.into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(SessionError::Closed);
        }

        // Await the reply, losing to neither a teardown that already
        // happened (the watch holds its value) nor one that races in.
        let mut closed = self.closed.clone();
        let awaited = async move {
            tokio::select! {
                biased;
                done = rx => done.map_err(|_| SessionError::Closed),
                _ = closed.wait_for(|gone| *gone) => Err(SessionError::Closed),
            }
        };

        match ceiling {
            Some(limit) => match tokio::time::timeout(limit, awaited).await {
                Ok(done) => done,
                Err(_) => {
                    // Keep the id space clean so repeated timeouts don't
                    // grow the pending map.
                    self.pending.lock().await.remove(&id);
                    Err(SessionError::Timeout(limit))
                }
            },
            None => awaited.await,
        }
    }

    async fn notify(&self, method: &'static str, params: Option<Value>) -> Result<(), SessionError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| SessionError::Protocol(e.into()))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Gracefully shut the server down, killing it after a bounded grace
    /// period. Consumes the handle; the owner's `Option` going back to
    /// `None` is the `Idle` transition, so stopping twice is a no-op by
    /// construction.
    pub async fn stop(mut self) {
        // Polite LSP-style shutdown first; fall through to the kill path on
        // any failure (including a session that already crashed).
        let polite = self
            .request_internal("shutdown", None, Some(SHUTDOWN_GRACE))
            .await;
        if polite.map(|r| r.get("error").is_none()).unwrap_or(false) {
            let _ = self.notify("exit", None).await;
        }

        store_state(&self.state, SessionState::Stopping);
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!("Server did not exit within grace period, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }

    /// Stop this session and start a fresh one with the same parameters.
    ///
    /// Any request in flight fails with [`SessionError::Closed`] when the
    /// old transport tears down. Transport-attached sessions (built via
    /// [`connect`](Self::connect)) have no launch parameters to replay.
    pub async fn restart(self) -> Result<Self, SessionError> {
        let Some(launch) = self.launch.clone() else {
            return Err(SessionError::Start(
                "session has no launch parameters to replay".into(),
            ));
        };
        self.stop().await;
        Self::start(launch).await
    }
}

fn spawn_stderr_logger(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "traverse_server", "{line}");
        }
    });
}

async fn write_loop<W>(writer: W, mut rx: mpsc::Receiver<WriterCommand>)
where
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameWriter::new(writer);
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Send(frame) => {
                if let Err(e) = frames.write_frame(&frame).await {
                    tracing::warn!("Failed to write frame to server: {e}");
                    break;
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
}

/// Reads frames until the stream ends, routing replies to their waiters.
///
/// Unusable frames are logged and discarded without desynchronizing the
/// stream; a run of them beyond [`DISCARDED_FRAME_LIMIT`] poisons the
/// session instead of letting a confused server spin forever.
async fn read_loop<R>(
    reader: R,
    pending: PendingMap,
    state: SharedState,
    writer_tx: mpsc::Sender<WriterCommand>,
    closed_tx: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(reader);
    let mut discarded_run: u32 = 0;

    loop {
        match frames.read_frame().await {
            Ok(Some(frame)) => match route_frame(&frame, &pending, &writer_tx).await {
                Routed::Handled => discarded_run = 0,
                Routed::Discarded(reason) => {
                    tracing::warn!(reason, "Discarding unusable frame from server");
                    discarded_run += 1;
                    if discarded_run >= DISCARDED_FRAME_LIMIT {
                        tracing::warn!("Too many unusable frames in a row, closing session");
                        break;
                    }
                }
            },
            // The stream is still on a frame boundary after a bad body.
            Err(ProtocolError::InvalidBody(e)) => {
                tracing::warn!("Discarding frame with malformed body: {e}");
                discarded_run += 1;
                if discarded_run >= DISCARDED_FRAME_LIMIT {
                    tracing::warn!("Too many malformed frames in a row, closing session");
                    break;
                }
            }
            Ok(None) => {
                tracing::info!("Server closed its output stream");
                break;
            }
            Err(e) => {
                tracing::warn!("Server transport failed: {e}");
                break;
            }
        }
    }

    mark_crashed(&state);
    // Dropping the senders wakes every in-flight request with `Closed`;
    // the watch covers requests enqueued after this point.
    pending.lock().await.clear();
    let _ = closed_tx.send(true);
}

enum Routed {
    Handled,
    Discarded(&'static str),
}

async fn route_frame(
    frame: &Value,
    pending: &tokio::sync::Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    writer_tx: &mpsc::Sender<WriterCommand>,
) -> Routed {
    let id = frame.get("id");
    let method = frame.get("method").and_then(Value::as_str);
    let has_body = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_body) {
        (Some(id), None, true) => {
            let Some(id) = id.as_u64() else {
                return Routed::Discarded("reply id is not an integer");
            };
            match pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(frame.clone());
                    Routed::Handled
                }
                None => Routed::Discarded("reply does not match any outstanding request"),
            }
        }
        (Some(id), Some(method), _) => {
            // The server may ask for capabilities we don't implement; answer
            // so it never blocks on us.
            tracing::debug!(method, "Server request unsupported, answering method-not-found");
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            });
            let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            Routed::Handled
        }
        (None, Some(method), _) => {
            tracing::trace!(method, "Ignoring server notification");
            Routed::Handled
        }
        _ => Routed::Discarded("frame is neither a reply nor a notification"),
    }
}

fn decode_result(reply: &Value) -> Result<CommandResult, SessionError> {
    if let Some(error) = reply.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown server error");
        return Err(SessionError::Protocol(ProtocolError::ErrorReply(
            message.to_string(),
        )));
    }

    let Some(result) = reply.get("result") else {
        return Err(SessionError::Protocol(ProtocolError::UnexpectedReply(
            "reply carries neither result nor error".into(),
        )));
    };

    serde_json::from_value(result.clone()).map_err(|e| {
        SessionError::Protocol(ProtocolError::UnexpectedReply(format!(
            "unrecognized result shape: {e}"
        )))
    })
}
