//! Frame header and async read/write helpers shared by every listener in the
//! system (DS client port, DS SN-control port, SN client port, SN
//! replication port). Every message on the wire is this fixed 8-byte header
//! followed by exactly `payload_len` bytes (spec §4.1).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Hard cap on a single frame's payload. Matches the transport payload limit
/// from spec §6; read/stream data chunks are sized to exactly this maximum.
pub const MAX_PAYLOAD: usize = 4096;

pub struct Frame {
    pub msg_type: u32,
    pub payload: Vec<u8>,
}

/// Reads one frame, rejecting a declared `payload_len` above [`MAX_PAYLOAD`]
/// before allocating (spec §9's oversize-payload hazard).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let msg_type = reader.read_u32_le().await.map_err(eof_to_protocol)?;
    let payload_len = reader.read_u32_le().await.map_err(eof_to_protocol)? as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("payload_len {payload_len} exceeds {MAX_PAYLOAD}")));
    }
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await.map_err(eof_to_protocol)?;
    Ok(Frame { msg_type, payload })
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg_type: u32,
    payload: &[u8],
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("payload {} exceeds {MAX_PAYLOAD}", payload.len())));
    }
    let mut header = Vec::with_capacity(8);
    crate::proto::primitive::write_u32(&mut header, msg_type);
    crate::proto::primitive::write_u32(&mut header, payload.len() as u32);
    writer.write_all(&header).await.map_err(Error::from)?;
    writer.write_all(payload).await.map_err(Error::from)?;
    writer.flush().await.map_err(Error::from)?;
    Ok(())
}

/// Like [`read_frame`], but a clean end-of-stream at the frame boundary (no
/// bytes of the next frame read yet) yields `Ok(None)` instead of an error.
/// An end-of-stream after the header or payload has already started arriving
/// is still a mid-frame protocol error. Used by the write-transaction loop
/// (spec §6), where a clean disconnect between frames commits like an
/// explicit `WRITE_ETIRW` but a disconnect mid-frame must abort.
pub async fn read_frame_or_eof<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut lead_byte = [0u8; 1];
    let n = reader.read(&mut lead_byte).await.map_err(Error::from)?;
    if n == 0 {
        return Ok(None);
    }
    let mut rest = [0u8; 3];
    reader.read_exact(&mut rest).await.map_err(eof_to_protocol)?;
    let msg_type = u32::from_le_bytes([lead_byte[0], rest[0], rest[1], rest[2]]);
    let payload_len = reader.read_u32_le().await.map_err(eof_to_protocol)? as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("payload_len {payload_len} exceeds {MAX_PAYLOAD}")));
    }
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await.map_err(eof_to_protocol)?;
    Ok(Some(Frame { msg_type, payload }))
}

fn eof_to_protocol(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Protocol("connection closed mid-frame".into())
    } else {
        Error::Storage(err)
    }
}
