//! Client <-> DS payloads (spec §4.1 family 1): login, view, create/delete/
//! info, list-users, access add/remove/request/grant, exec, folder
//! commands, and redirect requests. Every request variant pairs with either
//! an [`Ok`] reply (wrapping a request-specific [`DsOk`]) or a `Fail`
//! carrying a [`FailPayload`](super::FailPayload).

use std::io::Read;

use super::primitive::{read_bool, read_string, read_u16, read_u32, write_bool, write_string, write_u16, write_u32};
use super::{FailPayload, FileMetadataWire};
use crate::error::{Error, Result};

/// The operation a `Redirect` request is asking the DS to locate an SN for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RedirectOp {
    Read,
    Stream,
    Write,
    Undo,
    Checkpoint,
}

impl RedirectOp {
    fn to_u8(self) -> u8 {
        match self {
            RedirectOp::Read => 0,
            RedirectOp::Stream => 1,
            RedirectOp::Write => 2,
            RedirectOp::Undo => 3,
            RedirectOp::Checkpoint => 4,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => RedirectOp::Read,
            1 => RedirectOp::Stream,
            2 => RedirectOp::Write,
            3 => RedirectOp::Undo,
            4 => RedirectOp::Checkpoint,
            other => return Err(Error::Protocol(format!("unknown redirect op {other}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub enum DsRequest {
    Login { username: String, password: String },
    View { show_all: bool, long: bool },
    Create { filename: String },
    Delete { filename: String },
    Info { filename: String },
    ListUsers,
    AccessAdd { filename: String, user: String, perms: String },
    AccessRemove { filename: String, user: String },
    Exec { filename: String },
    FolderCreate { dir: String },
    FolderView { path: Option<String> },
    FolderMove { filename: String, dir: String },
    FolderUpmove { filename: String },
    FolderOpen { dir: String, create: bool },
    FolderOpenParent,
    AccessRequest { filename: String },
    AccessViewRequests,
    AccessGrant { filename: String, user: String, perms: String },
    Redirect { op: RedirectOp, filename: String },
}

impl DsRequest {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            DsRequest::Login { username, password } => {
                write_string(buf, username);
                write_string(buf, password);
            }
            DsRequest::View { show_all, long } => {
                write_bool(buf, *show_all);
                write_bool(buf, *long);
            }
            DsRequest::Create { filename }
            | DsRequest::Delete { filename }
            | DsRequest::Info { filename }
            | DsRequest::Exec { filename }
            | DsRequest::FolderUpmove { filename }
            | DsRequest::AccessRequest { filename } => write_string(buf, filename),
            DsRequest::ListUsers | DsRequest::AccessViewRequests | DsRequest::FolderOpenParent => {}
            DsRequest::AccessAdd { filename, user, perms }
            | DsRequest::AccessGrant { filename, user, perms } => {
                write_string(buf, filename);
                write_string(buf, user);
                write_string(buf, perms);
            }
            DsRequest::AccessRemove { filename, user } => {
                write_string(buf, filename);
                write_string(buf, user);
            }
            DsRequest::FolderCreate { dir } => write_string(buf, dir),
            DsRequest::FolderView { path } => match path {
                Some(p) => {
                    write_bool(buf, true);
                    write_string(buf, p);
                }
                None => write_bool(buf, false),
            },
            DsRequest::FolderMove { filename, dir } => {
                write_string(buf, filename);
                write_string(buf, dir);
            }
            DsRequest::FolderOpen { dir, create } => {
                write_string(buf, dir);
                write_bool(buf, *create);
            }
            DsRequest::Redirect { op, filename } => {
                buf.push(op.to_u8());
                write_string(buf, filename);
            }
        }
    }

    pub fn decode(msg_type: super::MsgType, src: &mut impl Read) -> Result<Self> {
        use super::MsgType as M;
        Ok(match msg_type {
            M::Login => DsRequest::Login { username: read_string(src)?, password: read_string(src)? },
            M::View => DsRequest::View { show_all: read_bool(src)?, long: read_bool(src)? },
            M::Create => DsRequest::Create { filename: read_string(src)? },
            M::Delete => DsRequest::Delete { filename: read_string(src)? },
            M::Info => DsRequest::Info { filename: read_string(src)? },
            M::ListUsers => DsRequest::ListUsers,
            M::AccessAdd => DsRequest::AccessAdd {
                filename: read_string(src)?,
                user: read_string(src)?,
                perms: read_string(src)?,
            },
            M::AccessRemove => {
                DsRequest::AccessRemove { filename: read_string(src)?, user: read_string(src)? }
            }
            M::Exec => DsRequest::Exec { filename: read_string(src)? },
            M::FolderCreate => DsRequest::FolderCreate { dir: read_string(src)? },
            M::FolderView => {
                let path = if read_bool(src)? { Some(read_string(src)?) } else { None };
                DsRequest::FolderView { path }
            }
            M::FolderMove => {
                DsRequest::FolderMove { filename: read_string(src)?, dir: read_string(src)? }
            }
            M::FolderUpmove => DsRequest::FolderUpmove { filename: read_string(src)? },
            M::FolderOpen => DsRequest::FolderOpen { dir: read_string(src)?, create: read_bool(src)? },
            M::FolderOpenParent => DsRequest::FolderOpenParent,
            M::AccessRequest => DsRequest::AccessRequest { filename: read_string(src)? },
            M::AccessViewRequests => DsRequest::AccessViewRequests,
            M::AccessGrant => DsRequest::AccessGrant {
                filename: read_string(src)?,
                user: read_string(src)?,
                perms: read_string(src)?,
            },
            M::Redirect => {
                let mut op_byte = [0u8; 1];
                src.read_exact(&mut op_byte).map_err(|_| Error::Protocol("short read".into()))?;
                DsRequest::Redirect { op: RedirectOp::from_u8(op_byte[0])?, filename: read_string(src)? }
            }
            other => return Err(Error::Protocol(format!("{other:?} is not a client-ds request"))),
        })
    }
}

/// One row of a `VIEW` listing; `metadata` is populated only for `-l`.
#[derive(Debug, Clone)]
pub struct ViewEntry {
    pub owner: String,
    pub filename: String,
    pub metadata: Option<FileMetadataWire>,
}

/// A pending `REQACCESS` entry as returned by `VIEWREQS`.
#[derive(Debug, Clone)]
pub struct AccessRequestEntry {
    pub requester: String,
    pub owner: String,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub enum DsOk {
    LoggedIn { session_id: u64 },
    View { entries: Vec<ViewEntry> },
    Created,
    Deleted,
    Info { metadata: FileMetadataWire },
    Users { names: Vec<String> },
    AccessChanged,
    Exec { output: String },
    FolderOk,
    FolderListing { entries: Vec<String> },
    AccessRequests { requests: Vec<AccessRequestEntry> },
    Redirect { ip: String, port: u16 },
}

impl DsOk {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            DsOk::LoggedIn { session_id } => write_u32(buf, *session_id as u32),
            DsOk::View { entries } => {
                write_u32(buf, entries.len() as u32);
                for entry in entries {
                    write_string(buf, &entry.owner);
                    write_string(buf, &entry.filename);
                    match &entry.metadata {
                        Some(meta) => {
                            write_bool(buf, true);
                            meta.encode(buf);
                        }
                        None => write_bool(buf, false),
                    }
                }
            }
            DsOk::Created | DsOk::Deleted | DsOk::AccessChanged | DsOk::FolderOk => {}
            DsOk::Info { metadata } => metadata.encode(buf),
            DsOk::Users { names } => {
                write_u32(buf, names.len() as u32);
                for name in names {
                    write_string(buf, name);
                }
            }
            DsOk::Exec { output } => write_string(buf, output),
            DsOk::FolderListing { entries } => {
                write_u32(buf, entries.len() as u32);
                for entry in entries {
                    write_string(buf, entry);
                }
            }
            DsOk::AccessRequests { requests } => {
                write_u32(buf, requests.len() as u32);
                for req in requests {
                    write_string(buf, &req.requester);
                    write_string(buf, &req.owner);
                    write_string(buf, &req.filename);
                }
            }
            DsOk::Redirect { ip, port } => {
                write_string(buf, ip);
                write_u16(buf, *port);
            }
        }
    }

    /// `hint` narrows decoding to the shape the request implies; without it
    /// several variants (e.g. `Created`/`Deleted`, both empty payloads) are
    /// ambiguous on the wire.
    pub fn decode(hint: DsOkKind, src: &mut impl Read) -> Result<Self> {
        Ok(match hint {
            DsOkKind::LoggedIn => DsOk::LoggedIn { session_id: read_u32(src)? as u64 },
            DsOkKind::View => {
                let count = read_u32(src)? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let owner = read_string(src)?;
                    let filename = read_string(src)?;
                    let metadata = if read_bool(src)? { Some(FileMetadataWire::decode(src)?) } else { None };
                    entries.push(ViewEntry { owner, filename, metadata });
                }
                DsOk::View { entries }
            }
            DsOkKind::Created => DsOk::Created,
            DsOkKind::Deleted => DsOk::Deleted,
            DsOkKind::Info => DsOk::Info { metadata: FileMetadataWire::decode(src)? },
            DsOkKind::Users => {
                let count = read_u32(src)? as usize;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(read_string(src)?);
                }
                DsOk::Users { names }
            }
            DsOkKind::AccessChanged => DsOk::AccessChanged,
            DsOkKind::Exec => DsOk::Exec { output: read_string(src)? },
            DsOkKind::FolderOk => DsOk::FolderOk,
            DsOkKind::FolderListing => {
                let count = read_u32(src)? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(read_string(src)?);
                }
                DsOk::FolderListing { entries }
            }
            DsOkKind::AccessRequests => {
                let count = read_u32(src)? as usize;
                let mut requests = Vec::with_capacity(count);
                for _ in 0..count {
                    requests.push(AccessRequestEntry {
                        requester: read_string(src)?,
                        owner: read_string(src)?,
                        filename: read_string(src)?,
                    });
                }
                DsOk::AccessRequests { requests }
            }
            DsOkKind::Redirect => DsOk::Redirect { ip: read_string(src)?, port: read_u16(src)? },
        })
    }

    pub fn kind(&self) -> DsOkKind {
        match self {
            DsOk::LoggedIn { .. } => DsOkKind::LoggedIn,
            DsOk::View { .. } => DsOkKind::View,
            DsOk::Created => DsOkKind::Created,
            DsOk::Deleted => DsOkKind::Deleted,
            DsOk::Info { .. } => DsOkKind::Info,
            DsOk::Users { .. } => DsOkKind::Users,
            DsOk::AccessChanged => DsOkKind::AccessChanged,
            DsOk::Exec { .. } => DsOkKind::Exec,
            DsOk::FolderOk => DsOkKind::FolderOk,
            DsOk::FolderListing { .. } => DsOkKind::FolderListing,
            DsOk::AccessRequests { .. } => DsOkKind::AccessRequests,
            DsOk::Redirect { .. } => DsOkKind::Redirect,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DsOkKind {
    LoggedIn,
    View,
    Created,
    Deleted,
    Info,
    Users,
    AccessChanged,
    Exec,
    FolderOk,
    FolderListing,
    AccessRequests,
    Redirect,
}

impl DsRequest {
    /// The [`DsOkKind`] a successful reply to this request carries.
    pub fn expected_ok_kind(&self) -> DsOkKind {
        match self {
            DsRequest::Login { .. } => DsOkKind::LoggedIn,
            DsRequest::View { .. } => DsOkKind::View,
            DsRequest::Create { .. } => DsOkKind::Created,
            DsRequest::Delete { .. } => DsOkKind::Deleted,
            DsRequest::Info { .. } => DsOkKind::Info,
            DsRequest::ListUsers => DsOkKind::Users,
            DsRequest::AccessAdd { .. }
            | DsRequest::AccessRemove { .. }
            | DsRequest::AccessGrant { .. } => DsOkKind::AccessChanged,
            DsRequest::Exec { .. } => DsOkKind::Exec,
            DsRequest::FolderCreate { .. }
            | DsRequest::FolderMove { .. }
            | DsRequest::FolderUpmove { .. }
            | DsRequest::FolderOpen { .. }
            | DsRequest::FolderOpenParent => DsOkKind::FolderOk,
            DsRequest::FolderView { .. } => DsOkKind::FolderListing,
            DsRequest::AccessRequest { .. } => DsOkKind::AccessChanged,
            DsRequest::AccessViewRequests => DsOkKind::AccessRequests,
            DsRequest::Redirect { .. } => DsOkKind::Redirect,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DsResponse {
    Ok(DsOk),
    Fail(FailPayload),
}
