//! SN <-> SN payloads (spec §4.1 family 4): the replication pipeline between
//! a primary and its backup.

use std::io::Read;

use super::primitive::{read_bool, read_bytes, read_string, write_bool, write_bytes, write_string};
use crate::error::Result;

/// `{filename, owner, file_size, bytes[...], is_backup}` — a full-file
/// replication push. Always carries the complete current content; a later
/// update subsumes an earlier one that never made it to the backup (spec
/// §4.3's replication-worker note). `is_backup` tells the receiver which
/// role to store the copy under: `true` for the steady-state primary ->
/// backup push, `false` when a backup is restoring a reconnecting primary's
/// files during recovery (spec §7).
#[derive(Debug, Clone)]
pub struct ReplicateFile {
    pub owner: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub is_backup: bool,
}

impl ReplicateFile {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.filename);
        write_string(buf, &self.owner);
        write_bytes(buf, &self.bytes);
        write_bool(buf, self.is_backup);
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let filename = read_string(src)?;
        let owner = read_string(src)?;
        let bytes = read_bytes(src)?;
        let is_backup = read_bool(src)?;
        Ok(Self { owner, filename, bytes, is_backup })
    }
}

#[derive(Debug, Clone)]
pub struct DeleteFile {
    pub owner: String,
    pub filename: String,
}

impl DeleteFile {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.filename);
        write_string(buf, &self.owner);
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let filename = read_string(src)?;
        let owner = read_string(src)?;
        Ok(Self { owner, filename })
    }
}

/// Empty acknowledgement that a `ReplicateFile`/`DeleteFile` was applied.
#[derive(Debug, Clone, Copy)]
pub struct Ack;

impl Ack {
    pub fn encode(&self, _buf: &mut Vec<u8>) {}

    pub fn decode(_src: &mut impl Read) -> Result<Self> {
        Ok(Ack)
    }
}
