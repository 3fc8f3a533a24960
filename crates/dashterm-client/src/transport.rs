//! One WebSocket per logical channel.
//!
//! The socket is driven by a spawned pump task. The owner talks to it through
//! two channels: commands in, [`TransportEvent`]s out. The transport always
//! runs in binary mode: outbound frames are binary messages and inbound text
//! messages are handed over as their raw bytes.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle and data events of one connection.
///
/// A connection yields at most one `Open` and exactly one `Closed`, which is
/// always the last event. `Error` may appear any number of times before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(Bytes),
    Error(String),
    Closed(Option<String>),
}

enum Command {
    /// A frame, optionally acknowledged once it has been flushed to the socket.
    Send(Bytes, Option<oneshot::Sender<Result<()>>>),
    Close,
}

/// Something binary frames can be pushed into.
pub trait FrameSink {
    fn send_frame(&self, frame: Bytes) -> Result<()>;
}

pub struct TransportSession {
    state: Arc<parking_lot::Mutex<SessionState>>,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportSession {
    /// Connect to `url` in the background.
    ///
    /// Returns immediately in `Connecting`. A failed handshake yields
    /// `Error` then `Closed`, without `Open`.
    pub fn open(url: url::Url, token: Option<String>) -> Self {
        let (session, state, commands, events) = Self::channels();

        tokio::spawn(async move {
            let request = match build_request(&url, token.as_deref()) {
                Ok(request) => request,
                Err(e) => {
                    fail_before_open(&state, &events, e.to_string());
                    return;
                }
            };

            tracing::debug!("connecting to {url}");
            match tokio_tungstenite::connect_async(request).await {
                Ok((ws, _response)) => run_pump(ws, state, commands, events).await,
                Err(e) => {
                    tracing::error!("websocket handshake with {url} failed: {e}");
                    fail_before_open(&state, &events, e.to_string());
                }
            }
        });

        session
    }

    /// Wrap an already established WebSocket.
    pub fn attach<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (session, state, commands, events) = Self::channels();
        tokio::spawn(run_pump(ws, state, commands, events));
        session
    }

    #[allow(clippy::type_complexity)]
    fn channels() -> (
        Self,
        Arc<parking_lot::Mutex<SessionState>>,
        mpsc::UnboundedReceiver<Command>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let state = Arc::new(parking_lot::Mutex::new(SessionState::Connecting));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            state: state.clone(),
            commands: command_tx,
            events: event_rx,
        };
        (session, state, command_rx, event_tx)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Queue one binary frame. Fails with `NotConnected` unless `Open`;
    /// nothing is buffered for later.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(Command::Send(frame, None))
            .map_err(|_| Error::NotConnected)
    }

    /// Send one binary frame and wait until it has been flushed to the socket.
    ///
    /// Frames queued earlier with [`send`](Self::send) go out first. Bulk
    /// transfers use this so at most one frame is buffered while the peer is
    /// slow to read.
    pub async fn send_flushed(&self, frame: Bytes) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(Error::NotConnected);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Send(frame, Some(ack_tx)))
            .map_err(|_| Error::NotConnected)?;
        ack_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Close the connection. Calling it again is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        let _ = self.commands.send(Command::Close);
    }

    /// Next event, or `None` once `Closed` has been consumed.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl FrameSink for TransportSession {
    fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.send(frame)
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn build_request(
    url: &url::Url,
    token: Option<&str>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Connection(e.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Connection(format!("invalid token: {e}")))?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

fn fail_before_open(
    state: &parking_lot::Mutex<SessionState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    message: String,
) {
    *state.lock() = SessionState::Closed;
    let _ = events.send(TransportEvent::Error(message.clone()));
    let _ = events.send(TransportEvent::Closed(Some(message)));
}

async fn run_pump<S>(
    ws: WebSocketStream<S>,
    state: Arc<parking_lot::Mutex<SessionState>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    let closed_during_handshake = {
        let mut state = state.lock();
        if *state == SessionState::Closed {
            true
        } else {
            *state = SessionState::Open;
            false
        }
    };
    if closed_during_handshake {
        let _ = sink.send(Message::Close(None)).await;
        let _ = events.send(TransportEvent::Closed(None));
        return;
    }
    let _ = events.send(TransportEvent::Open);

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame, ack)) => {
                    tracing::debug!("sending {} byte frame", frame.len());
                    match sink.send(Message::binary(frame)).await {
                        Ok(()) => {
                            if let Some(ack) = ack {
                                let _ = ack.send(Ok(()));
                            }
                        }
                        Err(e) => {
                            tracing::error!("websocket send failed: {e}");
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            if let Some(ack) = ack {
                                let _ = ack.send(Err(Error::Connection(e.to_string())));
                            }
                            break Some(e.to_string());
                        }
                    }
                }
                Some(Command::Close) | None => {
                    tracing::debug!("closing websocket");
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(TransportEvent::Message(data));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(Bytes::copy_from_slice(
                        text.as_str().as_bytes(),
                    )));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("remote closed websocket: {frame:?}");
                    break frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|reason| !reason.is_empty());
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("websocket receive failed: {e}");
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break Some(e.to_string());
                }
                None => break None,
            },
        }
    };

    *state.lock() = SessionState::Closed;
    let _ = sink.close().await;
    let _ = events.send(TransportEvent::Closed(reason));
}
