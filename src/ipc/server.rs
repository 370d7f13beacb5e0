//! Unix domain socket server for IPC
//!
//! Provides request-response communication for session control and push
//! notifications of typed text to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::capture::SessionManager;
use crate::events::{EngineEvent, RenderedFrame};
use crate::text::Transcript;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted request body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    ctx: Shared,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: Instant,
    transcript: Transcript,
    /// When the running session was announced; `None` between sessions
    session_since: Option<Instant>,
    /// Frames of sessions that already stopped
    completed_frames: u64,
}

impl ServerState {
    fn apply_frame(&mut self, frame: &RenderedFrame) {
        // Frames of a stopped session may trail its stop notice
        match self.session_since {
            Some(since) if frame.captured_at >= since => {}
            _ => return,
        }
        self.status.frames_processed = self.completed_frames + frame.index;
        self.status.frame_size = Some(frame.image.dimensions());
        self.status.fingertip = frame.fingertip;
    }
}

/// Everything a client handler needs
#[derive(Clone)]
struct Shared {
    state: Arc<RwLock<ServerState>>,
    sessions: Arc<Mutex<SessionManager>>,
    events: broadcast::Sender<EngineEvent>,
}

impl Shared {
    fn new(sessions: Arc<Mutex<SessionManager>>, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ServerState {
                status: DaemonStatus::default(),
                start_time: Instant::now(),
                transcript: Transcript::new(),
                session_since: None,
                completed_frames: 0,
            })),
            sessions,
            events,
        }
    }

    /// Run a blocking session-manager call off the async workers
    async fn with_sessions<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SessionManager) -> T + Send + 'static,
    {
        let sessions = Arc::clone(&self.sessions);
        tokio::task::spawn_blocking(move || {
            let mut manager = sessions.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut manager)
        })
        .await
        .context("session task failed")
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        sessions: Arc<Mutex<SessionManager>>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            ctx: Shared::new(sessions, events),
            shutdown_tx,
        })
    }

    /// Fold an engine event into the status and transcript
    pub async fn record_event(&self, event: &EngineEvent) {
        record_event(&self.ctx, event).await;
    }

    /// Update the status from the latest rendered frame
    pub async fn record_frame(&self, frame: &RenderedFrame) {
        self.ctx.state.write().await.apply_frame(frame);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = self.ctx.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, ctx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(mut stream: UnixStream, ctx: Shared) -> Result<()> {
        loop {
            let Some(msg_buf) = read_message(&mut stream).await? else {
                debug!("client disconnected");
                return Ok(());
            };

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(Request::Subscribe) => {
                    // Subscribe before confirming so no event is missed
                    let events_rx = ctx.events.subscribe();
                    send_message(&mut stream, &Response::Subscribed).await?;
                    debug!("client subscribed to notifications");
                    return stream_notifications(&mut stream, events_rx).await;
                }
                Ok(request) => {
                    debug!(?request, "received request");
                    process_request(request, &ctx).await
                }
                Err(e) => {
                    warn!(error = %e, "malformed request");
                    Response::error("bad_request", e.to_string())
                }
            };

            send_message(&mut stream, &response).await?;
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

async fn record_event(ctx: &Shared, event: &EngineEvent) {
    let mut state = ctx.state.write().await;
    match event {
        EngineEvent::SessionStarted { .. } => {
            state.session_since = Some(Instant::now());
            state.status.frame_size = None;
            state.status.fingertip = None;
        }
        EngineEvent::SessionStopped { frames, .. } => {
            state.session_since = None;
            state.completed_frames += frames;
            state.status.frames_processed = state.completed_frames;
            state.status.fingertip = None;
        }
        EngineEvent::Frame(frame) => state.apply_frame(frame),
        EngineEvent::Text(text) => {
            debug!(token = ?text.token(), "text event");
            state.transcript.apply(text);
        }
        EngineEvent::Error(err) => state.status.last_error = Some(err.clone()),
    }
}

/// Forward engine events until the client goes away or the engine closes
async fn stream_notifications<W: AsyncWrite + Unpin>(
    stream: &mut W,
    mut events_rx: broadcast::Receiver<EngineEvent>,
) -> Result<()> {
    loop {
        match events_rx.recv().await {
            Ok(event) => {
                if let Some(notification) = Notification::from_event(&event) {
                    send_message(stream, &notification).await?;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

/// Process a request and return a response
async fn process_request(request: Request, ctx: &Shared) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => {
            let session = ctx
                .with_sessions(|m| (m.is_running(), m.current_camera()))
                .await;
            let (running, camera_index) = match session {
                Ok(session) => session,
                Err(e) => return Response::error("internal", format!("{:#}", e)),
            };

            let mut state = ctx.state.write().await;
            state.status.running = running;
            state.status.camera_index = camera_index;
            state.status.uptime_secs = state.start_time.elapsed().as_secs();
            Response::Status(state.status.clone())
        }

        Request::ListCameras => match ctx.with_sessions(|m| m.available_cameras()).await {
            Ok(indices) => Response::Cameras { indices },
            Err(e) => Response::error("internal", format!("{:#}", e)),
        },

        Request::StartSession { camera_index } => {
            match ctx.with_sessions(move |m| m.start(camera_index)).await {
                Ok(Ok(camera_index)) => {
                    info!(camera_index, "session started via IPC");
                    Response::SessionStarted { camera_index }
                }
                Ok(Err(e)) => Response::error(e.kind().to_string(), e.to_string()),
                Err(e) => Response::error("internal", format!("{:#}", e)),
            }
        }

        Request::StopSession => match ctx.with_sessions(|m| m.stop()).await {
            Ok(was_running) => Response::SessionStopped { was_running },
            Err(e) => Response::error("internal", format!("{:#}", e)),
        },

        Request::GetTranscript => {
            let state = ctx.state.read().await;
            Response::Transcript {
                text: state.transcript.text(),
            }
        }

        Request::SaveTranscript { path } => {
            let transcript = ctx.state.read().await.transcript.clone();
            if transcript.is_empty() {
                return Response::error("empty", "nothing has been typed yet");
            }
            let target = path.clone();
            let saved = tokio::task::spawn_blocking(move || transcript.save(&target))
                .await
                .context("save task failed")
                .and_then(|result| result);
            match saved {
                Ok(()) => {
                    info!(path = %path.display(), "transcript saved");
                    Response::Saved { path }
                }
                Err(e) => Response::error("io", format!("{:#}", e)),
            }
        }

        Request::ClearTranscript => {
            ctx.state.write().await.transcript.clear();
            Response::Cleared
        }

        // Handled by the connection loop
        Request::Subscribe => Response::Subscribed,
    }
}

/// Read one length-prefixed message; `None` on clean disconnect
async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    // Read message length (4-byte little-endian)
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_MESSAGE_LEN, "message too large: {} bytes", len);

    // Read message body
    let mut msg_buf = vec![0u8; len];
    stream.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(stream: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    stream.write_all(&msg_len).await?;
    stream.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::RgbImage;

    use crate::capture::ScriptedBackend;
    use crate::config::EngineConfig;
    use crate::error::ErrorKind;
    use crate::events::{ChannelSink, ErrorEvent, EventSink, TextEvent};
    use crate::keyboard::Point;

    fn context(cameras: Vec<u32>) -> Shared {
        let backend = ScriptedBackend::new(vec![None; 100_000])
            .with_cameras(cameras)
            .with_frame_interval(Duration::from_millis(2));
        let (sink, _feeds) = ChannelSink::new(64);
        let notifications = sink.notifications();
        let manager =
            SessionManager::new(EngineConfig::default(), Arc::new(backend), Arc::new(sink));
        Shared::new(Arc::new(Mutex::new(manager)), notifications)
    }

    fn frame(index: u64, fingertip: Option<Point>) -> RenderedFrame {
        RenderedFrame {
            index,
            image: Arc::new(RgbImage::new(32, 18)),
            fingertip,
            captured_at: Instant::now(),
        }
    }

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut buf = (body.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(body);
        buf
    }

    async fn status(ctx: &Shared) -> DaemonStatus {
        match process_request(Request::GetStatus, ctx).await {
            Response::Status(status) => status,
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let ctx = context(vec![0]);
        assert_eq!(process_request(Request::Ping, &ctx).await, Response::Pong);

        let status = status(&ctx).await;
        assert!(!status.running);
        assert_eq!(status.camera_index, None);
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_session_control() {
        let ctx = context(vec![0, 2]);

        let cameras = process_request(Request::ListCameras, &ctx).await;
        assert_eq!(cameras, Response::Cameras { indices: vec![0, 2] });

        let start = Request::StartSession {
            camera_index: Some(2),
        };
        let started = process_request(start, &ctx).await;
        assert_eq!(started, Response::SessionStarted { camera_index: 2 });

        let running = status(&ctx).await;
        assert!(running.running);
        assert_eq!(running.camera_index, Some(2));

        let stopped = process_request(Request::StopSession, &ctx).await;
        assert_eq!(stopped, Response::SessionStopped { was_running: true });
        let stopped = process_request(Request::StopSession, &ctx).await;
        assert_eq!(stopped, Response::SessionStopped { was_running: false });
        assert!(!status(&ctx).await.running);
    }

    #[tokio::test]
    async fn test_start_unavailable_camera() {
        let ctx = context(vec![0]);
        let start = Request::StartSession {
            camera_index: Some(1),
        };
        match process_request(start, &ctx).await {
            Response::Error { code, .. } => assert_eq!(code, "configuration"),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_update_status_and_transcript() {
        let ctx = context(vec![0]);
        record_event(&ctx, &EngineEvent::SessionStarted { camera_index: 0 }).await;
        for ch in ['h', 'i'] {
            record_event(&ctx, &EngineEvent::Text(TextEvent::Character { ch })).await;
        }
        let unplugged = ErrorEvent {
            kind: ErrorKind::FrameRead,
            message: "unplugged".into(),
            fatal: true,
        };
        record_event(&ctx, &EngineEvent::Error(unplugged)).await;

        let last_error = status(&ctx).await.last_error.map(|e| e.kind);
        assert_eq!(last_error, Some(ErrorKind::FrameRead));
        assert_eq!(
            process_request(Request::GetTranscript, &ctx).await,
            Response::Transcript { text: "hi".into() }
        );

        let stopped = EngineEvent::SessionStopped {
            camera_index: 0,
            frames: 9,
        };
        record_event(&ctx, &stopped).await;
        assert_eq!(status(&ctx).await.frames_processed, 9);

        assert_eq!(process_request(Request::ClearTranscript, &ctx).await, Response::Cleared);
        assert_eq!(
            process_request(Request::GetTranscript, &ctx).await,
            Response::Transcript { text: String::new() }
        );
    }

    #[tokio::test]
    async fn test_frames_update_status() {
        let ctx = context(vec![0]);
        let tip = Point::new(4, 5);

        // Nothing is running yet
        ctx.state.write().await.apply_frame(&frame(3, Some(tip)));
        assert_eq!(status(&ctx).await.frames_processed, 0);

        record_event(&ctx, &EngineEvent::SessionStarted { camera_index: 0 }).await;
        ctx.state.write().await.apply_frame(&frame(3, Some(tip)));
        let live = status(&ctx).await;
        assert_eq!(live.frames_processed, 3);
        assert_eq!(live.frame_size, Some((32, 18)));
        assert_eq!(live.fingertip, Some(tip));

        let stopped = EngineEvent::SessionStopped {
            camera_index: 0,
            frames: 4,
        };
        record_event(&ctx, &stopped).await;
        record_event(&ctx, &EngineEvent::SessionStarted { camera_index: 0 }).await;
        record_event(&ctx, &EngineEvent::Frame(frame(2, None))).await;
        let second = status(&ctx).await;
        assert_eq!(second.frames_processed, 6);
        assert_eq!(second.fingertip, None);
    }

    #[tokio::test]
    async fn test_save_transcript() {
        let ctx = context(vec![0]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        match process_request(Request::SaveTranscript { path: path.clone() }, &ctx).await {
            Response::Error { code, .. } => assert_eq!(code, "empty"),
            other => panic!("unexpected response {:?}", other),
        }

        record_event(&ctx, &EngineEvent::Text(TextEvent::Character { ch: 'x' })).await;
        let saved = process_request(Request::SaveTranscript { path: path.clone() }, &ctx).await;
        assert_eq!(saved, Response::Saved { path: path.clone() });
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x");
    }

    #[test]
    fn test_read_message_framing() {
        let body = br#"{"type":"ping"}"#;
        let mut mock = tokio_test::io::Builder::new()
            .read(&framed(body)[..4])
            .read(&framed(body)[4..])
            .build();

        let msg = tokio_test::block_on(read_message(&mut mock)).unwrap().unwrap();
        let request: Request = serde_json::from_slice(&msg).unwrap();
        assert_eq!(request, Request::Ping);
        assert!(tokio_test::block_on(read_message(&mut mock)).unwrap().is_none());
    }

    #[test]
    fn test_read_message_rejects_oversized() {
        let len = ((MAX_MESSAGE_LEN + 1) as u32).to_le_bytes();
        let mut mock = tokio_test::io::Builder::new().read(&len).build();
        assert!(tokio_test::block_on(read_message(&mut mock)).is_err());
    }

    #[test]
    fn test_send_message_framing() {
        let body = serde_json::to_vec(&Response::Pong).unwrap();
        let mut mock = tokio_test::io::Builder::new()
            .write(&framed(&body)[..4])
            .write(&body)
            .build();
        tokio_test::block_on(send_message(&mut mock, &Response::Pong)).unwrap();
    }

    #[tokio::test]
    async fn test_keystroke_survives_burst_of_frames() {
        let (sink, _feeds) = ChannelSink::new(64);
        let rx = sink.notifications().subscribe();

        sink.emit(EngineEvent::Text(TextEvent::Character { ch: 'k' }));
        for index in 1..=200 {
            sink.emit(EngineEvent::Frame(frame(index, None)));
        }
        drop(sink);

        let (mut client, mut server_side) = tokio::io::duplex(4096);
        let forward =
            tokio::spawn(async move { stream_notifications(&mut server_side, rx).await });

        let msg = read_message(&mut client).await.unwrap().unwrap();
        let note: Notification = serde_json::from_slice(&msg).unwrap();
        assert_eq!(
            note,
            Notification::Text {
                event: TextEvent::Character { ch: 'k' }
            }
        );

        // Frames are never pushed; the stream ends with the engine
        assert!(read_message(&mut client).await.unwrap().is_none());
        forward.await.unwrap().unwrap();
    }
}
