//! Wire protocol (C9): frame header, message type catalog, and one payload
//! module per message family, exactly as spec §4.1 groups them.

pub mod client_ds;
pub mod client_sn;
pub mod ds_sn;
pub mod frame;
pub mod primitive;
pub mod sn_sn;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::error::{Error, Result};

/// Discriminant placed in the frame header's `msg_type` field. One variant
/// per message named in spec §4.1, grouped by family for readability.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum MsgType {
    // Client <-> DS
    Login = 1,
    View,
    Create,
    Delete,
    Info,
    ListUsers,
    AccessAdd,
    AccessRemove,
    Exec,
    FolderCreate,
    FolderView,
    FolderMove,
    FolderUpmove,
    FolderOpen,
    FolderOpenParent,
    AccessRequest,
    AccessViewRequests,
    AccessGrant,
    Redirect,
    Ok,
    Fail,

    // DS <-> SN
    Register = 100,
    RegisterAck,
    Heartbeat,
    GetInfo,
    ExecGetContent,
    SnCreate,
    SnDelete,
    SyncFromBackup,
    SyncToPrimary,
    ReReplicateAll,
    UpdateBackup,

    // Client <-> SN
    Read = 200,
    ReadChunk,
    Stream,
    StreamWord,
    StreamEnd,
    WriteStart,
    WriteOk,
    WriteLocked,
    WriteData,
    WriteDataAck,
    WriteEtirw,
    Undo,
    CheckpointCreate,
    CheckpointRevert,
    CheckpointView,
    CheckpointList,

    // SN <-> SN
    ReplicateFile = 300,
    DeleteFile,
    Ack,
}

impl MsgType {
    pub fn from_u32(v: u32) -> Result<Self> {
        FromPrimitive::from_u32(v).ok_or_else(|| Error::Protocol(format!("unknown msg_type {v}")))
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Wire representation of [`crate::error::Error`]'s kind, carried in `Fail`
/// payloads so the remote side can branch on the error family without
/// parsing free-form text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum StatusCode {
    Protocol = 0,
    Access,
    NotFound,
    Conflict,
    EditBounds,
    Storage,
    PeerUnavailable,
}

impl StatusCode {
    pub fn from_u32(v: u32) -> Result<Self> {
        FromPrimitive::from_u32(v).ok_or_else(|| Error::Protocol(format!("unknown status {v}")))
    }
}

/// `{code: u32, message: String}`, used for every `Fail` payload across all
/// four families.
#[derive(Debug, Clone)]
pub struct FailPayload {
    pub code: StatusCode,
    pub message: String,
}

impl FailPayload {
    pub fn from_error(err: &Error) -> Self {
        Self { code: err.status_code(), message: err.to_string() }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        primitive::write_u32(buf, self.code as u32);
        primitive::write_string(buf, &self.message);
    }

    pub fn decode(src: &mut impl std::io::Read) -> Result<Self> {
        let code = StatusCode::from_u32(primitive::read_u32(src)?)?;
        let message = primitive::read_string(src)?;
        Ok(Self { code, message })
    }
}

/// `{owner, filename}`, the universal file identifier on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdWire {
    pub owner: String,
    pub filename: String,
}

impl FileIdWire {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        primitive::write_string(buf, &self.owner);
        primitive::write_string(buf, &self.filename);
    }

    pub fn decode(src: &mut impl std::io::Read) -> Result<Self> {
        Ok(Self { owner: primitive::read_string(src)?, filename: primitive::read_string(src)? })
    }
}

/// Wire form of [`crate::model::FileMetadata`], carried by `Register`,
/// `GetInfo`'s reply, and `View -l`'s per-entry reply.
#[derive(Debug, Clone)]
pub struct FileMetadataWire {
    pub filename: String,
    pub owner: String,
    pub size: u64,
    pub word_count: u32,
    pub char_count: u32,
    pub atime_secs: i64,
    pub mtime_secs: i64,
    pub is_backup: bool,
}

impl FileMetadataWire {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        primitive::write_string(buf, &self.filename);
        primitive::write_string(buf, &self.owner);
        primitive::write_u64(buf, self.size);
        primitive::write_u32(buf, self.word_count);
        primitive::write_u32(buf, self.char_count);
        primitive::write_i64(buf, self.atime_secs);
        primitive::write_i64(buf, self.mtime_secs);
        primitive::write_bool(buf, self.is_backup);
    }

    pub fn decode(src: &mut impl std::io::Read) -> Result<Self> {
        Ok(Self {
            filename: primitive::read_string(src)?,
            owner: primitive::read_string(src)?,
            size: primitive::read_u64(src)?,
            word_count: primitive::read_u32(src)?,
            char_count: primitive::read_u32(src)?,
            atime_secs: primitive::read_i64(src)?,
            mtime_secs: primitive::read_i64(src)?,
            is_backup: primitive::read_bool(src)?,
        })
    }
}
