//! DS <-> SN payloads (spec §4.1 family 2): registration, heartbeat, live
//! metadata/exec-content fetch, create/delete commands, and the recovery
//! sync messages.

use std::io::Read;

use super::primitive::{
    read_bool, read_string, read_u16, read_u32, write_bool, write_string, write_u16, write_u32,
};
use super::FileMetadataWire;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub ip: String,
    pub client_port: u16,
    pub backup_port: u16,
    pub ds_command_port: u16,
    pub files: Vec<FileMetadataWire>,
}

impl RegisterRequest {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.ip);
        write_u16(buf, self.client_port);
        write_u16(buf, self.backup_port);
        write_u16(buf, self.ds_command_port);
        write_u32(buf, self.files.len() as u32);
        for file in &self.files {
            file.encode(buf);
        }
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let ip = read_string(src)?;
        let client_port = read_u16(src)?;
        let backup_port = read_u16(src)?;
        let ds_command_port = read_u16(src)?;
        let count = read_u32(src)? as usize;
        let mut files = Vec::with_capacity(count);
        for _ in 0..count {
            files.push(FileMetadataWire::decode(src)?);
        }
        Ok(Self { ip, client_port, backup_port, ds_command_port, files })
    }
}

#[derive(Debug, Clone)]
pub struct RegisterAck {
    pub assigned_id: u32,
    pub must_recover: bool,
    pub backup_of: Option<u32>,
    pub replication_target: Option<(String, u16)>,
}

impl RegisterAck {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        write_u32(buf, self.assigned_id);
        write_bool(buf, self.must_recover);
        match self.backup_of {
            Some(id) => {
                write_bool(buf, true);
                write_u32(buf, id);
            }
            None => write_bool(buf, false),
        }
        match &self.replication_target {
            Some((ip, port)) => {
                write_bool(buf, true);
                write_string(buf, ip);
                write_u16(buf, *port);
            }
            None => write_bool(buf, false),
        }
    }

    pub fn decode(src: &mut impl Read) -> Result<Self> {
        let assigned_id = read_u32(src)?;
        let must_recover = read_bool(src)?;
        let backup_of = if read_bool(src)? { Some(read_u32(src)?) } else { None };
        let replication_target =
            if read_bool(src)? { Some((read_string(src)?, read_u16(src)?)) } else { None };
        Ok(Self { assigned_id, must_recover, backup_of, replication_target })
    }
}

#[derive(Debug, Clone)]
pub enum DsSnCommand {
    /// Carries the sender's assigned ring id since heartbeats arrive on a
    /// fresh, short-lived connection with no other way to identify the peer.
    Heartbeat { sn_id: u32 },
    GetInfo { owner: String, filename: String },
    ExecGetContent { owner: String, filename: String },
    Create { owner: String, filename: String },
    Delete { owner: String, filename: String },
    /// Sent to the SN backing up a reconnecting primary, telling it to push
    /// every file it holds as backup to `target_ip:target_port` (the
    /// reconnecting primary's replication port).
    SyncFromBackup { target_ip: String, target_port: u16 },
    /// Sent to the reconnecting primary itself: a readiness notice that a
    /// `SyncFromBackup` push is inbound. Carries no data of its own.
    SyncToPrimary,
    ReReplicateAll { target_ip: String, target_port: u16 },
    UpdateBackup { target: Option<(String, u16)> },
}

impl DsSnCommand {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            DsSnCommand::Heartbeat { sn_id } => write_u32(buf, *sn_id),
            DsSnCommand::GetInfo { owner, filename }
            | DsSnCommand::ExecGetContent { owner, filename }
            | DsSnCommand::Create { owner, filename }
            | DsSnCommand::Delete { owner, filename } => {
                write_string(buf, owner);
                write_string(buf, filename);
            }
            DsSnCommand::SyncFromBackup { target_ip, target_port }
            | DsSnCommand::ReReplicateAll { target_ip, target_port } => {
                write_string(buf, target_ip);
                write_u16(buf, *target_port);
            }
            DsSnCommand::SyncToPrimary => {}
            DsSnCommand::UpdateBackup { target } => match target {
                Some((ip, port)) => {
                    write_bool(buf, true);
                    write_string(buf, ip);
                    write_u16(buf, *port);
                }
                None => write_bool(buf, false),
            },
        }
    }

    pub fn decode(msg_type: super::MsgType, src: &mut impl Read) -> Result<Self> {
        use super::MsgType as M;
        Ok(match msg_type {
            M::Heartbeat => DsSnCommand::Heartbeat { sn_id: read_u32(src)? },
            M::GetInfo => {
                DsSnCommand::GetInfo { owner: read_string(src)?, filename: read_string(src)? }
            }
            M::ExecGetContent => {
                DsSnCommand::ExecGetContent { owner: read_string(src)?, filename: read_string(src)? }
            }
            M::SnCreate => DsSnCommand::Create { owner: read_string(src)?, filename: read_string(src)? },
            M::SnDelete => DsSnCommand::Delete { owner: read_string(src)?, filename: read_string(src)? },
            M::SyncFromBackup => {
                DsSnCommand::SyncFromBackup { target_ip: read_string(src)?, target_port: read_u16(src)? }
            }
            M::SyncToPrimary => DsSnCommand::SyncToPrimary,
            M::ReReplicateAll => {
                DsSnCommand::ReReplicateAll { target_ip: read_string(src)?, target_port: read_u16(src)? }
            }
            M::UpdateBackup => {
                let target = if read_bool(src)? { Some((read_string(src)?, read_u16(src)?)) } else { None };
                DsSnCommand::UpdateBackup { target }
            }
            other => return Err(Error::Protocol(format!("{other:?} is not a ds-sn command"))),
        })
    }
}

/// Reply to `GetInfo`/`ExecGetContent`: either the requested data or the
/// SN's refusal (e.g. the file does not exist locally).
#[derive(Debug, Clone)]
pub enum DsSnReply {
    Info(FileMetadataWire),
    Content(Vec<u8>),
    Ok,
    Fail(String),
}

impl DsSnReply {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            DsSnReply::Info(meta) => meta.encode(buf),
            DsSnReply::Content(bytes) => super::primitive::write_bytes(buf, bytes),
            DsSnReply::Ok => {}
            DsSnReply::Fail(msg) => write_string(buf, msg),
        }
    }
}
