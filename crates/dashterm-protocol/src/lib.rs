//! Shared protocol types for dashboard terminal and file manager channels.
//!
//! Every frame travels as one binary WebSocket message. Client frames start
//! with an opcode byte; file manager payloads from the server start with a
//! four byte ASCII tag.

pub mod fm;
pub mod terminal;

pub use fm::{
    Entry, EntryKind, Listing, ServerFrame, decode_listing, decode_server_frame, encode_download,
    encode_list, encode_listing, encode_upload_header, normalize_path,
};
pub use terminal::{Resize, decode_resize, encode_input, encode_resize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed frame ({len} bytes): {reason}")]
    MalformedFrame { reason: &'static str, len: usize },
    #[error("entry name is {0} bytes, listing entries hold at most 255")]
    NameTooLong(usize),
    #[error("path is {0} bytes, too long for a listing header")]
    PathTooLong(usize),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(reason: &'static str, buf: &[u8]) -> Self {
        Error::MalformedFrame {
            reason,
            len: buf.len(),
        }
    }
}

/// Envelope wrapping every dashboard API response.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: String,
}

/// Body of `POST /api/v1/terminal`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CreateTerminalRequest {
    pub server_id: u64,
}

/// Terminal session minted by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CreateTerminalResponse {
    pub session_id: String,
}

/// File manager session minted by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CreateFmResponse {
    pub session_id: String,
}

/// WebSocket path for a terminal session.
#[must_use]
pub fn terminal_ws_path(session_id: &str) -> String {
    format!("/api/v1/ws/terminal/{session_id}")
}

/// WebSocket path for a file manager session.
#[must_use]
pub fn fm_ws_path(session_id: &str) -> String {
    format!("/api/v1/ws/file/{session_id}")
}
