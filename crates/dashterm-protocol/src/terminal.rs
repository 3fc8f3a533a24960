//! Terminal channel frames (client to server).
//!
//! Server to client traffic on this channel is raw pty output with no framing.

use bytes::{BufMut as _, Bytes, BytesMut};

use crate::{Error, Result};

/// Opcode for keystrokes forwarded to the remote pty.
pub const OP_INPUT: u8 = 0;
/// Opcode for a pty resize request.
pub const OP_RESIZE: u8 = 1;

/// Resize payload. Field names are capitalized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resize {
    pub rows: u16,
    pub cols: u16,
}

/// Encode `[1] || {"Rows":rows,"Cols":cols}`.
#[must_use]
pub fn encode_resize(rows: u16, cols: u16) -> Bytes {
    let payload = format!("{{\"Rows\":{rows},\"Cols\":{cols}}}");
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(OP_RESIZE);
    buf.put_slice(payload.as_bytes());
    buf.freeze()
}

/// Decode a resize frame produced by [`encode_resize`].
pub fn decode_resize(buf: &[u8]) -> Result<Resize> {
    match buf.split_first() {
        Some((&OP_RESIZE, payload)) => Ok(serde_json::from_slice(payload)?),
        Some(_) => Err(Error::malformed("not a resize frame", buf)),
        None => Err(Error::malformed("empty frame", buf)),
    }
}

/// Encode `[0] || data`.
#[must_use]
pub fn encode_input(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + data.len());
    buf.put_u8(OP_INPUT);
    buf.put_slice(data);
    buf.freeze()
}
