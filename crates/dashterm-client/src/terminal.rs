//! Remote terminal session controller.
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Completed
//!              \
//!               +-> Error
//! ```
//!
//! The controller runs as a single task. Remote bytes go to the surface
//! untouched; the only client frames are keystrokes and debounced resizes.

use std::time::Duration;

use dashterm_protocol::{encode_input, terminal_ws_path};
use tokio::sync::{broadcast, mpsc, watch};

use crate::Notice;
use crate::api::Dashboard;
use crate::resize::ResizeCoordinator;
use crate::surface::Surface;
use crate::transport::{SessionState, TransportEvent, TransportSession};

pub const COMPLETED_NOTICE: &str = "Session completed. You may close this window now.";

const NOTICE_CHANNEL_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    /// The dashboard could not create a session. Terminal, no retry.
    Error(String),
}

#[derive(Debug)]
pub enum TerminalCommand {
    /// Keystrokes for the remote pty.
    Input(Vec<u8>),
    /// The local viewport changed size. Ignored until streaming.
    WindowResized,
    /// The owner is going away; tear everything down.
    Shutdown,
}

/// Cloneable handle for driving and observing a running controller.
#[derive(Debug, Clone)]
pub struct TerminalHandle {
    commands: mpsc::UnboundedSender<TerminalCommand>,
    state: watch::Receiver<TerminalState>,
    notices: broadcast::Sender<Notice>,
}

impl TerminalHandle {
    pub fn send_input(&self, data: Vec<u8>) {
        let _ = self.commands.send(TerminalCommand::Input(data));
    }

    pub fn window_resized(&self) {
        let _ = self.commands.send(TerminalCommand::WindowResized);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(TerminalCommand::Shutdown);
    }

    #[must_use]
    pub fn state(&self) -> TerminalState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<TerminalState> {
        self.state.clone()
    }

    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

pub struct TerminalController<S: Surface> {
    surface: Option<S>,
    coordinator: ResizeCoordinator,
    commands: mpsc::UnboundedReceiver<TerminalCommand>,
    state: watch::Sender<TerminalState>,
    notices: broadcast::Sender<Notice>,
}

impl<S: Surface> TerminalController<S> {
    pub fn new(surface: S, resize_delay: Duration) -> (Self, TerminalHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TerminalState::Idle);
        let (notice_tx, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);

        let controller = Self {
            surface: Some(surface),
            coordinator: ResizeCoordinator::new(resize_delay),
            commands: command_rx,
            state: state_tx,
            notices: notice_tx.clone(),
        };
        let handle = TerminalHandle {
            commands: command_tx,
            state: state_rx,
            notices: notice_tx,
        };
        (controller, handle)
    }

    fn set_state(&self, state: TerminalState) {
        tracing::debug!("terminal state -> {state:?}");
        self.state.send_replace(state);
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    /// Mount the terminal for `server_id` and run until the session ends or
    /// the handle asks for shutdown. Returns the final state.
    pub async fn run<D: Dashboard>(mut self, dashboard: &D, server_id: u64) -> TerminalState {
        self.set_state(TerminalState::Connecting);

        let session_id = match dashboard.create_terminal(server_id).await {
            Ok(created) => created.session_id,
            Err(e) => {
                tracing::error!("failed to create terminal for server {server_id}: {e}");
                self.notify(Notice::ApiError(e.to_string()));
                self.release_surface();
                let state = TerminalState::Error(e.to_string());
                self.set_state(state.clone());
                return state;
            }
        };

        let transport = match dashboard.connect(&terminal_ws_path(&session_id)).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("failed to connect terminal {session_id}: {e}");
                self.notify(Notice::ConnectionError(e.to_string()));
                return self.complete();
            }
        };

        self.stream(transport).await
    }

    /// Drive an already created transport until it closes.
    pub async fn stream(mut self, mut transport: TransportSession) -> TerminalState {
        self.set_state(TerminalState::Connecting);

        loop {
            tokio::select! {
                event = transport.next_event() => match event {
                    Some(TransportEvent::Open) => {
                        self.set_state(TerminalState::Streaming);
                        self.coordinator.trigger();
                    }
                    Some(TransportEvent::Message(data)) => {
                        if let Some(surface) = self.surface.as_mut()
                            && let Err(e) = surface.write(&data)
                        {
                            tracing::warn!("failed to render {} bytes: {e}", data.len());
                        }
                    }
                    Some(TransportEvent::Error(e)) => {
                        tracing::error!("terminal websocket error: {e}");
                        self.notify(Notice::ConnectionError(e));
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        tracing::debug!("terminal websocket closed: {reason:?}");
                        break;
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(TerminalCommand::Input(data)) => {
                        if transport.state() == SessionState::Open {
                            let _ = transport.send(encode_input(&data));
                        }
                    }
                    Some(TerminalCommand::WindowResized) => {
                        if *self.state.borrow() == TerminalState::Streaming {
                            self.coordinator.trigger();
                        }
                    }
                    Some(TerminalCommand::Shutdown) | None => {
                        tracing::debug!("terminal unmounted");
                        transport.close();
                        break;
                    }
                },
                () = self.coordinator.elapsed(), if self.coordinator.is_pending() => {
                    match self.surface.as_mut() {
                        Some(surface) => {
                            self.coordinator.fire(surface, &transport);
                        }
                        None => self.coordinator.cancel(),
                    }
                }
            }
        }

        transport.close();
        self.complete()
    }

    fn complete(mut self) -> TerminalState {
        self.release_surface();
        self.set_state(TerminalState::Completed);
        self.notify(Notice::Completed);
        TerminalState::Completed
    }

    fn release_surface(&mut self) {
        self.coordinator.cancel();
        if let Some(mut surface) = self.surface.take() {
            surface.dispose();
        }
    }
}
