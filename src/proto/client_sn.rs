//! Client <-> SN payloads (spec §4.1 family 3): read/stream chunk framing,
//! the write-transaction subprotocol, undo, and checkpoint operations.

use std::io::Read;

use super::frame::MAX_PAYLOAD;
use super::primitive::{read_bool, read_bytes_max, read_string, read_u32, write_bool, write_bytes, write_string, write_u32};
use crate::error::{Error, Result};

/// `{data_len, data[MAX], is_final}` — one chunk of a `READ` stream.
#[derive(Debug, Clone)]
pub struct ReadChunk {
    pub data: Vec<u8>,
    pub is_final: bool,
}

impl ReadChunk {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_bytes(buf, &self.data);
        write_bool(buf, self.is_final);
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let data = read_bytes_max(src, MAX_PAYLOAD)?;
        let is_final = read_bool(src)?;
        Ok(Self { data, is_final })
    }
}

/// One word of a `STREAM` response; capped at 255 bytes per spec §4.3.
#[derive(Debug, Clone)]
pub struct StreamWord {
    pub word: String,
}

impl StreamWord {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.word);
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        Ok(Self { word: read_string(src)?.chars().take(255).collect() })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CheckpointOp {
    Create,
    Revert,
    View,
    List,
}

impl CheckpointOp {
    fn to_u8(self) -> u8 {
        match self {
            CheckpointOp::Create => 0,
            CheckpointOp::Revert => 1,
            CheckpointOp::View => 2,
            CheckpointOp::List => 3,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => CheckpointOp::Create,
            1 => CheckpointOp::Revert,
            2 => CheckpointOp::View,
            3 => CheckpointOp::List,
            other => return Err(Error::Protocol(format!("unknown checkpoint op {other}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub enum ClientSnRequest {
    Read { owner: String, filename: String },
    Stream { owner: String, filename: String },
    WriteStart { owner: String, filename: String, sentence_index: i64 },
    WriteData { word_index: i64, content: String },
    WriteEtirw,
    Undo { owner: String, filename: String },
    Checkpoint { op: CheckpointOp, owner: String, filename: String, tag: String },
}

impl ClientSnRequest {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            ClientSnRequest::Read { owner, filename } | ClientSnRequest::Stream { owner, filename } => {
                write_string(buf, owner);
                write_string(buf, filename);
            }
            ClientSnRequest::WriteStart { owner, filename, sentence_index } => {
                write_string(buf, owner);
                write_string(buf, filename);
                super::primitive::write_i64(buf, *sentence_index);
            }
            ClientSnRequest::WriteData { word_index, content } => {
                super::primitive::write_i64(buf, *word_index);
                write_string(buf, content);
            }
            ClientSnRequest::WriteEtirw => {}
            ClientSnRequest::Undo { owner, filename } => {
                write_string(buf, owner);
                write_string(buf, filename);
            }
            ClientSnRequest::Checkpoint { op, owner, filename, tag } => {
                buf.push(op.to_u8());
                write_string(buf, owner);
                write_string(buf, filename);
                write_string(buf, tag);
            }
        }
    }

    pub fn decode(msg_type: super::MsgType, src: &mut impl Read) -> Result<Self> {
        use super::MsgType as M;
        Ok(match msg_type {
            M::Read => ClientSnRequest::Read { owner: read_string(src)?, filename: read_string(src)? },
            M::Stream => ClientSnRequest::Stream { owner: read_string(src)?, filename: read_string(src)? },
            M::WriteStart => ClientSnRequest::WriteStart {
                owner: read_string(src)?,
                filename: read_string(src)?,
                sentence_index: super::primitive::read_i64(src)?,
            },
            M::WriteData => ClientSnRequest::WriteData {
                word_index: super::primitive::read_i64(src)?,
                content: read_string(src)?,
            },
            M::WriteEtirw => ClientSnRequest::WriteEtirw,
            M::Undo => ClientSnRequest::Undo { owner: read_string(src)?, filename: read_string(src)? },
            M::CheckpointCreate | M::CheckpointRevert | M::CheckpointView | M::CheckpointList => {
                let op = match msg_type {
                    M::CheckpointCreate => CheckpointOp::Create,
                    M::CheckpointRevert => CheckpointOp::Revert,
                    M::CheckpointView => CheckpointOp::View,
                    _ => CheckpointOp::List,
                };
                ClientSnRequest::Checkpoint {
                    op,
                    owner: read_string(src)?,
                    filename: read_string(src)?,
                    tag: read_string(src)?,
                }
            }
            other => return Err(Error::Protocol(format!("{other:?} is not a client-sn request"))),
        })
    }
}

/// Reply to a single `WRITE_DATA` subquery (spec §4.3 step 5): the
/// transaction stays open even when one subquery is rejected.
#[derive(Debug, Clone)]
pub struct WriteDataAck {
    pub accepted: bool,
    pub error: Option<String>,
}

impl WriteDataAck {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_bool(buf, self.accepted);
        match &self.error {
            Some(msg) => {
                write_bool(buf, true);
                write_string(buf, msg);
            }
            None => write_bool(buf, false),
        }
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let accepted = read_bool(src)?;
        let error = if read_bool(src)? { Some(read_string(src)?) } else { None };
        Ok(Self { accepted, error })
    }
}

/// Listing entry for `CHECKPOINT LIST`.
#[derive(Debug, Clone)]
pub struct CheckpointListing {
    pub tags: Vec<String>,
}

impl CheckpointListing {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_u32(buf, self.tags.len() as u32);
        for tag in &self.tags {
            write_string(buf, tag);
        }
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let count = read_u32(src)? as usize;
        let mut tags = Vec::with_capacity(count);
        for _ in 0..count {
            tags.push(read_string(src)?);
        }
        Ok(Self { tags })
    }
}
