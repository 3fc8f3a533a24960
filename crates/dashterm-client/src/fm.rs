//! Pseudo file manager session controller.
//!
//! Created lazily: nothing touches the network until the first [`FileManager::open`].
//! Events are pulled with [`FileManager::next_event`], which also answers the
//! protocol (initial listing, download bodies) as frames arrive.

use std::path::Path;

use bytes::Bytes;
use dashterm_protocol::{
    Listing, ServerFrame, decode_server_frame, encode_download, encode_list, encode_upload_header,
    fm_ws_path,
};
use tokio::io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

use crate::api::Dashboard;
use crate::transport::{SessionState, TransportEvent, TransportSession};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmState {
    Unopened,
    /// Session minted, WebSocket handshake in flight.
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FmEvent {
    /// The socket opened and the initial listing was requested.
    Connected,
    /// The current view was replaced; see [`FileManager::listing`].
    Listed,
    /// A payload could not be decoded. The previous view is kept.
    Malformed(String),
    DownloadStarted { size: u64 },
    DownloadProgress { received: u64, size: u64 },
    DownloadComplete { size: u64 },
    DownloadFailed(String),
    UploadComplete,
    /// `NERR` from the remote side.
    RemoteError(String),
    ConnectionError(String),
    Closed,
}

type DownloadSink = Box<dyn AsyncWrite + Unpin + Send>;

enum Transfer {
    Idle,
    /// Download requested, waiting for the `NZTD` header.
    AwaitingHeader(DownloadSink),
    Downloading {
        sink: DownloadSink,
        size: u64,
        received: u64,
    },
}

pub struct FileManager {
    server_id: u64,
    chunk_size: usize,
    state: FmState,
    transport: Option<TransportSession>,
    cwd: String,
    listing: Option<Listing>,
    transfer: Transfer,
}

impl FileManager {
    /// A file manager for `server_id`. No session exists until [`open`](Self::open).
    #[must_use]
    pub fn new(server_id: u64, chunk_size: usize) -> Self {
        Self {
            server_id,
            chunk_size: chunk_size.max(1),
            state: FmState::Unopened,
            transport: None,
            cwd: String::new(),
            listing: None,
            transfer: Transfer::Idle,
        }
    }

    /// A file manager sized by `transfer.chunk_size`.
    #[must_use]
    pub fn from_config(server_id: u64, config: &dashterm_config::Config) -> Self {
        Self::new(server_id, config.transfer.chunk_size)
    }

    #[must_use]
    pub fn state(&self) -> FmState {
        self.state
    }

    /// The remote working directory as last reported by the server.
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    #[must_use]
    pub fn listing(&self) -> Option<&Listing> {
        self.listing.as_ref()
    }

    /// Open the panel. The first call mints a session and connects; later
    /// calls reuse it unless it has closed, in which case a fresh session
    /// starts from an empty view.
    pub async fn open<D: Dashboard>(&mut self, dashboard: &D) -> Result<()> {
        if matches!(self.state, FmState::Connecting | FmState::Connected) {
            return Ok(());
        }

        self.cwd.clear();
        self.listing = None;
        self.transfer = Transfer::Idle;

        let created = match dashboard.create_fm(self.server_id).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!("failed to create file manager for server {}: {e}", self.server_id);
                self.state = FmState::Closed;
                return Err(e);
            }
        };

        match dashboard.connect(&fm_ws_path(&created.session_id)).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = FmState::Connecting;
                Ok(())
            }
            Err(e) => {
                tracing::error!("failed to connect file manager: {e}");
                self.state = FmState::Closed;
                Err(e)
            }
        }
    }

    /// Dismiss the panel and drop the session.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.transfer = Transfer::Idle;
        if self.state != FmState::Unopened {
            self.state = FmState::Closed;
        }
    }

    fn connected(&self) -> Result<&TransportSession> {
        match &self.transport {
            Some(transport)
                if self.state == FmState::Connected && transport.state() == SessionState::Open =>
            {
                Ok(transport)
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Request a listing of `path`. The view changes when it arrives.
    pub fn list(&self, path: &str) -> Result<()> {
        self.connected()?.send(encode_list(path))
    }

    /// Request a fresh listing of the current directory.
    pub fn refresh(&self) -> Result<()> {
        self.list(&self.cwd)
    }

    /// Upload a local file into the current remote directory.
    ///
    /// Sends the header, then the body in `chunk_size` frames. Each body frame
    /// is flushed to the socket before the next chunk is read, so a slow peer
    /// holds the upload back instead of the file piling up in memory. Returns
    /// the number of body bytes written, which always equals the declared size.
    pub async fn upload(&self, local: &Path) -> Result<u64> {
        let transport = self.connected()?;

        let file_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no usable file name", local.display()),
                ))
            })?;
        let file = tokio::fs::File::open(local).await?;
        let size = file.metadata().await?.len();

        transport.send(encode_upload_header(&self.cwd, file_name, size))?;
        tracing::debug!("uploading {} ({size} bytes) to {}", local.display(), self.cwd);

        let mut body = file.take(size);
        let mut buf = vec![0u8; self.chunk_size];
        let mut sent = 0u64;
        while sent < size {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} shrank during upload", local.display()),
                )));
            }
            transport
                .send_flushed(Bytes::copy_from_slice(&buf[..n]))
                .await?;
            sent += n as u64;
        }
        Ok(sent)
    }

    /// Download `remote_path` into `dest`. Progress arrives as [`FmEvent`]s.
    pub fn download<W>(&mut self, remote_path: &str, dest: W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if !matches!(self.transfer, Transfer::Idle) {
            return Err(Error::Remote("a download is already in progress".to_string()));
        }
        self.connected()?.send(encode_download(remote_path))?;
        self.transfer = Transfer::AwaitingHeader(Box::new(dest));
        Ok(())
    }

    /// Wait for the next session event. `None` when no session is open.
    pub async fn next_event(&mut self) -> Option<FmEvent> {
        loop {
            let transport = self.transport.as_mut()?;
            let event = match transport.next_event().await {
                Some(event) => event,
                None => TransportEvent::Closed(None),
            };

            match event {
                TransportEvent::Open => {
                    self.state = FmState::Connected;
                    if let Err(e) = self.list(&self.cwd) {
                        tracing::warn!("initial listing not requested: {e}");
                    }
                    return Some(FmEvent::Connected);
                }
                TransportEvent::Message(data) => {
                    if let Some(event) = self.handle_frame(data).await {
                        return Some(event);
                    }
                }
                TransportEvent::Error(e) => {
                    tracing::error!("file manager websocket error: {e}");
                    return Some(FmEvent::ConnectionError(e));
                }
                TransportEvent::Closed(reason) => {
                    tracing::debug!("file manager websocket closed: {reason:?}");
                    self.transport = None;
                    self.transfer = Transfer::Idle;
                    self.state = FmState::Closed;
                    return Some(FmEvent::Closed);
                }
            }
        }
    }

    async fn handle_frame(&mut self, data: Bytes) -> Option<FmEvent> {
        if matches!(self.transfer, Transfer::Downloading { .. }) {
            return self.write_download_body(&data).await;
        }

        let frame = match decode_server_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("dropping malformed file manager payload: {e}");
                return Some(FmEvent::Malformed(e.to_string()));
            }
        };

        match frame {
            ServerFrame::Listing(listing) => {
                tracing::debug!(
                    "listing of {} with {} entries",
                    listing.path,
                    listing.entries.len()
                );
                self.cwd = listing.path.clone();
                self.listing = Some(listing);
                Some(FmEvent::Listed)
            }
            ServerFrame::DownloadHeader { size } => {
                match std::mem::replace(&mut self.transfer, Transfer::Idle) {
                    Transfer::AwaitingHeader(sink) => {
                        self.transfer = Transfer::Downloading {
                            sink,
                            size,
                            received: 0,
                        };
                        if size == 0 {
                            return self.write_download_body(&[]).await;
                        }
                        Some(FmEvent::DownloadStarted { size })
                    }
                    other => {
                        tracing::warn!("unsolicited download header ({size} bytes)");
                        self.transfer = other;
                        None
                    }
                }
            }
            ServerFrame::UploadComplete => Some(FmEvent::UploadComplete),
            ServerFrame::Error(message) => {
                if matches!(self.transfer, Transfer::AwaitingHeader(_)) {
                    self.transfer = Transfer::Idle;
                }
                Some(FmEvent::RemoteError(message))
            }
            ServerFrame::Raw(data) => {
                tracing::debug!("ignoring {} untagged bytes", data.len());
                None
            }
        }
    }

    async fn write_download_body(&mut self, data: &[u8]) -> Option<FmEvent> {
        let Transfer::Downloading {
            sink,
            size,
            received,
        } = &mut self.transfer
        else {
            return None;
        };

        let remaining = *size - *received;
        let take = usize::try_from(remaining).map_or(data.len(), |r| r.min(data.len()));
        if take < data.len() {
            tracing::warn!("discarding {} bytes past the download size", data.len() - take);
        }

        if let Err(e) = sink.write_all(&data[..take]).await {
            tracing::error!("download write failed: {e}");
            self.transfer = Transfer::Idle;
            return Some(FmEvent::DownloadFailed(e.to_string()));
        }
        *received += take as u64;

        if *received < *size {
            return Some(FmEvent::DownloadProgress {
                received: *received,
                size: *size,
            });
        }

        let size = *size;
        let result = sink.flush().await;
        self.transfer = Transfer::Idle;
        match result {
            Ok(()) => Some(FmEvent::DownloadComplete { size }),
            Err(e) => Some(FmEvent::DownloadFailed(e.to_string())),
        }
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("server_id", &self.server_id)
            .field("state", &self.state)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}
