//! File manager channel frames.
//!
//! Client frames are opcode prefixed. Server payloads carry a four byte tag at
//! offset 0; frames without a known tag are raw download body chunks.

use bytes::{BufMut as _, Bytes, BytesMut};

use crate::{Error, Result};

pub const OP_LIST: u8 = 0;
pub const OP_DOWNLOAD: u8 = 1;
pub const OP_UPLOAD: u8 = 2;

/// Directory listing.
pub const TAG_LISTING: &[u8; 4] = b"NZFN";
/// Download header, followed by a big-endian u64 body size.
pub const TAG_DOWNLOAD: &[u8; 4] = b"NZTD";
/// Upload finished on the remote side.
pub const TAG_UPLOAD_DONE: &[u8; 4] = b"NZUP";
/// Remote error, followed by a UTF-8 message.
pub const TAG_ERROR: &[u8; 4] = b"NERR";

const TAG_LEN: usize = 4;
const PATH_LEN_SIZE: usize = 4;
const ENTRY_HEADER_SIZE: usize = 2;

/// File type code of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Codes this client does not know about are kept as-is.
    Other(u8),
}

impl From<u8> for EntryKind {
    fn from(code: u8) -> Self {
        match code {
            0 => EntryKind::File,
            1 => EntryKind::Directory,
            other => EntryKind::Other(other),
        }
    }
}

impl From<EntryKind> for u8 {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => 0,
            EntryKind::Directory => 1,
            EntryKind::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub name: String,
}

impl Entry {
    pub fn new(kind: impl Into<EntryKind>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A decoded `NZFN` payload: the remote working directory and its entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<Entry>,
}

/// Server to client file manager payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Listing(Listing),
    DownloadHeader { size: u64 },
    UploadComplete,
    Error(String),
    Raw(Bytes),
}

/// Collapse every run of two or more slashes into one.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

fn encode_path_request(op: u8, path: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + path.len());
    buf.put_u8(op);
    buf.put_slice(path.as_bytes());
    buf.freeze()
}

/// Encode `[List] || utf8(path)`.
#[must_use]
pub fn encode_list(path: &str) -> Bytes {
    encode_path_request(OP_LIST, path)
}

/// Encode `[Download] || utf8(path)`.
#[must_use]
pub fn encode_download(path: &str) -> Bytes {
    encode_path_request(OP_DOWNLOAD, &normalize_path(path))
}

/// Encode `[Upload] || be_u64(size) || utf8(path + "/" + file_name)`.
///
/// The joined path is normalized before encoding, so `"/a//b"` and `"/a/b"`
/// produce identical headers.
#[must_use]
pub fn encode_upload_header(path: &str, file_name: &str, file_size: u64) -> Bytes {
    let target = normalize_path(&format!("{path}/{file_name}"));
    let mut buf = BytesMut::with_capacity(1 + 8 + target.len());
    buf.put_u8(OP_UPLOAD);
    buf.put_u64(file_size);
    buf.put_slice(target.as_bytes());
    buf.freeze()
}

/// Decode an `NZFN` listing payload.
///
/// The entry loop must consume the buffer exactly; a trailing partial entry
/// is a malformed frame.
pub fn decode_listing(buf: &[u8]) -> Result<Listing> {
    let tag = buf
        .get(..TAG_LEN)
        .ok_or_else(|| Error::malformed("missing tag", buf))?;
    if tag != TAG_LISTING {
        return Err(Error::malformed("not a listing payload", buf));
    }

    let len_bytes = buf
        .get(TAG_LEN..TAG_LEN + PATH_LEN_SIZE)
        .ok_or_else(|| Error::malformed("truncated path length", buf))?;
    let path_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);

    let path_start = TAG_LEN + PATH_LEN_SIZE;
    let path_end = usize::try_from(path_len)
        .ok()
        .and_then(|n| path_start.checked_add(n))
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| Error::malformed("path length exceeds frame", buf))?;
    let path = String::from_utf8_lossy(&buf[path_start..path_end]).into_owned();

    let mut entries = Vec::new();
    let mut pos = path_end;
    while pos < buf.len() {
        let header = buf
            .get(pos..pos + ENTRY_HEADER_SIZE)
            .ok_or_else(|| Error::malformed("truncated entry header", buf))?;
        let (code, name_len) = (header[0], usize::from(header[1]));
        let name_start = pos + ENTRY_HEADER_SIZE;
        let name = buf
            .get(name_start..name_start + name_len)
            .ok_or_else(|| Error::malformed("entry name exceeds frame", buf))?;
        entries.push(Entry {
            kind: EntryKind::from(code),
            name: String::from_utf8_lossy(name).into_owned(),
        });
        pos = name_start + name_len;
    }

    Ok(Listing { path, entries })
}

/// Encode a listing payload, the inverse of [`decode_listing`].
pub fn encode_listing(listing: &Listing) -> Result<Bytes> {
    let path_len =
        u32::try_from(listing.path.len()).map_err(|_| Error::PathTooLong(listing.path.len()))?;
    let body: usize = listing
        .entries
        .iter()
        .map(|e| ENTRY_HEADER_SIZE + e.name.len())
        .sum();

    let mut buf = BytesMut::with_capacity(TAG_LEN + PATH_LEN_SIZE + listing.path.len() + body);
    buf.put_slice(TAG_LISTING);
    buf.put_u32(path_len);
    buf.put_slice(listing.path.as_bytes());
    for entry in &listing.entries {
        let name_len =
            u8::try_from(entry.name.len()).map_err(|_| Error::NameTooLong(entry.name.len()))?;
        buf.put_u8(entry.kind.into());
        buf.put_u8(name_len);
        buf.put_slice(entry.name.as_bytes());
    }
    Ok(buf.freeze())
}

/// Classify a server payload on the file manager channel by its tag.
pub fn decode_server_frame(buf: Bytes) -> Result<ServerFrame> {
    let Some(tag) = buf.get(..TAG_LEN) else {
        return Ok(ServerFrame::Raw(buf));
    };

    if tag == TAG_LISTING {
        decode_listing(&buf).map(ServerFrame::Listing)
    } else if tag == TAG_DOWNLOAD {
        let size = buf
            .get(TAG_LEN..TAG_LEN + 8)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| Error::malformed("truncated download size", &buf))?;
        Ok(ServerFrame::DownloadHeader { size })
    } else if tag == TAG_UPLOAD_DONE {
        Ok(ServerFrame::UploadComplete)
    } else if tag == TAG_ERROR {
        let message = String::from_utf8_lossy(&buf[TAG_LEN..]).into_owned();
        Ok(ServerFrame::Error(message))
    } else {
        Ok(ServerFrame::Raw(buf))
    }
}
