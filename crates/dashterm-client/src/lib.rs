//! Client library for dashboard remote terminals and file managers.
//!
//! Each controller owns exactly one [`TransportSession`]; the terminal and
//! file manager channels never share a socket.

pub mod api;
pub mod fm;
pub mod resize;
pub mod surface;
pub mod terminal;
pub mod transport;

pub use api::{Dashboard, HttpDashboard};
pub use dashterm_protocol::{Entry, EntryKind, Listing, Resize};
pub use fm::{FileManager, FmEvent, FmState};
pub use resize::ResizeCoordinator;
pub use surface::{LocalTerminal, Surface, SurfaceError, VirtualTerminal};
pub use terminal::{TerminalCommand, TerminalController, TerminalHandle, TerminalState};
pub use transport::{FrameSink, SessionState, TransportEvent, TransportSession};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Protocol(#[from] dashterm_protocol::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("not connected")]
    NotConnected,
    #[error("dashboard API error: {0}")]
    Api(String),
    #[error("remote error: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// User-facing notifications emitted by the controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The terminal session ended; the window may be closed.
    Completed,
    /// The WebSocket failed. Dismissable, never retried.
    ConnectionError(String),
    /// The dashboard refused to create a session.
    ApiError(String),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Completed => f.write_str(terminal::COMPLETED_NOTICE),
            Notice::ConnectionError(detail) => write!(f, "WebSocket error: {detail}"),
            Notice::ApiError(detail) => write!(f, "Dashboard API error: {detail}"),
        }
    }
}
