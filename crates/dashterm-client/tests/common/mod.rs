//! In-memory dashboard for controller tests.
//!
//! WebSockets run over `tokio::io::duplex`, so no port is bound and paused
//! time works end to end.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dashterm_client::{Dashboard, Error, Resize, Result, Surface, SurfaceError, TransportSession};
use dashterm_protocol::{CreateFmResponse, CreateTerminalResponse};
use futures_util::StreamExt as _;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub type ServerSocket = WebSocketStream<DuplexStream>;

const DUPLEX_BUFFER: usize = 1 << 16;

/// Both ends of a WebSocket connected in memory.
pub async fn socket_pair() -> (WebSocketStream<DuplexStream>, ServerSocket) {
    let (client_io, server_io) = tokio::io::duplex(DUPLEX_BUFFER);
    let (client, server) = tokio::join!(
        tokio_tungstenite::client_async("ws://dashboard.test/", client_io),
        tokio_tungstenite::accept_async(server_io),
    );
    let (client, _response) = client.expect("client handshake");
    (client, server.expect("server handshake"))
}

pub struct FakeDashboard {
    pub terminal_session: Option<String>,
    pub fm_sessions: parking_lot::Mutex<Vec<String>>,
    pub refuse_connect: bool,
    accepted: mpsc::UnboundedSender<(String, ServerSocket)>,
}

impl FakeDashboard {
    /// A dashboard that mints terminal `abc123` and file managers `fm1`, `fm2`.
    /// Every accepted WebSocket is handed to the returned receiver with its path.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, ServerSocket)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dashboard = Self {
            terminal_session: Some("abc123".to_string()),
            fm_sessions: parking_lot::Mutex::new(vec!["fm2".to_string(), "fm1".to_string()]),
            refuse_connect: false,
            accepted: tx,
        };
        (dashboard, rx)
    }
}

impl Dashboard for FakeDashboard {
    async fn create_terminal(&self, _server_id: u64) -> Result<CreateTerminalResponse> {
        match &self.terminal_session {
            Some(session_id) => Ok(CreateTerminalResponse {
                session_id: session_id.clone(),
            }),
            None => Err(Error::Api("server is offline".to_string())),
        }
    }

    async fn create_fm(&self, _server_id: u64) -> Result<CreateFmResponse> {
        let session_id = self.fm_sessions.lock().pop();
        match session_id {
            Some(session_id) => Ok(CreateFmResponse { session_id }),
            None => Err(Error::Api("no more sessions".to_string())),
        }
    }

    async fn connect(&self, path: &str) -> Result<TransportSession> {
        if self.refuse_connect {
            return Err(Error::Connection("connection refused".to_string()));
        }
        let (client, server) = socket_pair().await;
        self.accepted
            .send((path.to_string(), server))
            .map_err(|_| Error::Connection("test dropped the receiver".to_string()))?;
        Ok(TransportSession::attach(client))
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub written: Vec<u8>,
    pub fits: usize,
    pub disposals: usize,
    pub size: Option<Resize>,
    pub attached: bool,
}

/// Surface whose activity the test can inspect after handing it away.
pub struct RecordingSurface(Arc<parking_lot::Mutex<Recorder>>);

impl RecordingSurface {
    pub fn new(rows: u16, cols: u16) -> (Self, Arc<parking_lot::Mutex<Recorder>>) {
        let recorder = Arc::new(parking_lot::Mutex::new(Recorder {
            size: Some(Resize { rows, cols }),
            attached: true,
            ..Recorder::default()
        }));
        (Self(recorder.clone()), recorder)
    }
}

impl Surface for RecordingSurface {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.0.lock().written.extend_from_slice(data);
        Ok(())
    }

    fn fit(&mut self) -> std::result::Result<Option<Resize>, SurfaceError> {
        let mut recorder = self.0.lock();
        recorder.fits += 1;
        Ok(recorder.size)
    }

    fn is_attached(&self) -> bool {
        self.0.lock().attached
    }

    fn dispose(&mut self) {
        let mut recorder = self.0.lock();
        recorder.disposals += 1;
        recorder.attached = false;
    }
}

/// Next binary frame from the client, skipping control messages.
pub async fn next_binary(server: &mut ServerSocket) -> Option<Vec<u8>> {
    loop {
        match server.next().await? {
            Ok(Message::Binary(data)) => return Some(data.to_vec()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Every binary frame the client sends within `window`.
pub async fn collect_binary(server: &mut ServerSocket, window: Duration) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, next_binary(server)).await {
        frames.push(frame);
    }
    frames
}

/// Poll `check` until it holds, sleeping between attempts.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}
