//! Primitive wire-codec helpers shared by every payload family.
//!
//! The protocol picked here is flat and little-endian (spec §4.1: "Payload
//! structs are fixed-layout, little-endian... a reimplementation must pick a
//! canonical encoding and hold it") rather than XDR, so unlike the teacher's
//! `parser::primitive` module there is no 4-byte alignment padding to track
//! — every helper just reads/writes its bytes back to back.

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Longest byte string (string, opaque blob) this protocol will decode
/// without a length check failing closed. Prevents a malicious or corrupt
/// declared length from driving an unbounded allocation (spec §9's
/// "oversize-payload hazard").
pub const MAX_BLOB_LEN: usize = 16 * 1024 * 1024;

pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.write_u16::<LittleEndian>(v).expect("Vec<u8> write never fails");
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.write_u32::<LittleEndian>(v).expect("Vec<u8> write never fails");
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.write_u64::<LittleEndian>(v).expect("Vec<u8> write never fails");
}

pub fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.write_i64::<LittleEndian>(v).expect("Vec<u8> write never fails");
}

pub fn write_bool(buf: &mut Vec<u8>, v: bool) {
    write_u8(buf, v as u8);
}

/// Length-prefixed (`u32`) byte blob.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

/// Length-prefixed (`u32`) UTF-8 string.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

pub fn read_u8(src: &mut impl Read) -> Result<u8> {
    src.read_u8().map_err(protocol_io)
}

pub fn read_u16(src: &mut impl Read) -> Result<u16> {
    src.read_u16::<LittleEndian>().map_err(protocol_io)
}

pub fn read_u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<LittleEndian>().map_err(protocol_io)
}

pub fn read_u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<LittleEndian>().map_err(protocol_io)
}

pub fn read_i64(src: &mut impl Read) -> Result<i64> {
    src.read_i64::<LittleEndian>().map_err(protocol_io)
}

pub fn read_bool(src: &mut impl Read) -> Result<bool> {
    match read_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Protocol(format!("invalid bool discriminant {other}"))),
    }
}

pub fn read_bytes(src: &mut impl Read) -> Result<Vec<u8>> {
    read_bytes_max(src, MAX_BLOB_LEN)
}

pub fn read_bytes_max(src: &mut impl Read, max_len: usize) -> Result<Vec<u8>> {
    let len = read_u32(src)? as usize;
    if len > max_len {
        return Err(Error::Protocol(format!("blob length {len} exceeds max {max_len}")));
    }
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf).map_err(protocol_io)?;
    Ok(buf)
}

pub fn read_string(src: &mut impl Read) -> Result<String> {
    read_string_max(src, MAX_BLOB_LEN)
}

pub fn read_string_max(src: &mut impl Read, max_len: usize) -> Result<String> {
    let bytes = read_bytes_max(src, max_len)?;
    String::from_utf8(bytes).map_err(|err| Error::Protocol(format!("invalid utf-8: {err}")))
}

fn protocol_io(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Protocol("short read".into())
    } else {
        Error::Protocol(err.to_string())
    }
}
