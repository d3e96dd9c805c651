//! Directory Service process wiring: client session loop, SN registration
//! and heartbeat intake, and the periodic heartbeat-timeout sweep that
//! drives ring reassignment.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

use crate::config::DsConfig;
use crate::error::{Error, Result};
use crate::proto::client_ds::{DsOk, DsRequest};
use crate::proto::ds_sn::{DsSnCommand, RegisterAck, RegisterRequest};
use crate::proto::frame::{read_frame, write_frame};
use crate::proto::{FailPayload, MsgType};

use super::commands::DsState;
use super::dsclient;
use super::ring::RecoveryState;
use super::session::Session;

pub async fn run(config: DsConfig) -> Result<()> {
    let state = Arc::new(DsState::new(config.clone()));
    state.load()?;

    let client_listener = TcpListener::bind(config.client_addr).await?;
    let sn_listener = TcpListener::bind(config.sn_addr).await?;

    let sn_task = tokio::spawn(run_sn_listener(sn_listener, state.clone()));
    let sweep_interval = (config.heartbeat_timeout / 3).max(Duration::from_secs(1));
    let heartbeat_task = tokio::spawn(run_heartbeat_monitor(state.clone(), sweep_interval));
    let client_task = run_client_listener(client_listener, state.clone());

    tokio::select! {
        res = client_task => res?,
        _ = sn_task => {},
        _ = heartbeat_task => {},
    }
    Ok(())
}

async fn run_heartbeat_monitor(state: Arc<DsState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let expired = state.ring.sweep_expired();
        if expired.is_empty() {
            continue;
        }
        for id in &expired {
            tracing::warn!(sn = id, "heartbeat timeout, marking node offline");
        }
        state.propagate_ring_change().await;
    }
}

async fn run_sn_listener(listener: TcpListener, state: Arc<DsState>) {
    loop {
        let Ok((socket, peer)) = listener.accept().await else { continue };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_sn_conn(socket, &state).await {
                tracing::warn!(%peer, %err, "sn connection failed");
            }
        });
    }
}

async fn handle_sn_conn(socket: TcpStream, state: &Arc<DsState>) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let frame = read_frame(&mut reader).await?;
    let msg_type = MsgType::from_u32(frame.msg_type)?;

    match msg_type {
        MsgType::Register => {
            let req = RegisterRequest::decode(&mut &frame.payload[..])?;
            let ack = handle_register(state, req).await;
            let mut payload = Vec::new();
            ack.encode(&mut payload);
            write_frame(&mut writer, MsgType::RegisterAck.to_u32(), &payload).await?;
        }
        MsgType::Heartbeat => {
            let cmd = DsSnCommand::decode(msg_type, &mut &frame.payload[..])?;
            let DsSnCommand::Heartbeat { sn_id } = cmd else { unreachable!() };
            state.ring.touch_heartbeat(sn_id);
        }
        other => return Err(Error::Protocol(format!("{other:?} is not an sn-ds message"))),
    }
    Ok(())
}

async fn handle_register(state: &Arc<DsState>, req: RegisterRequest) -> RegisterAck {
    let (id, must_recover) = state.ring.register(req.ip, req.client_port, req.backup_port, req.ds_command_port);
    state.ring.set_file_count(id, req.files.len() as u64);
    state.ring.set_recovery_state(id, if must_recover { RecoveryState::SyncFromBackup } else { RecoveryState::Online });

    let assignments = state.ring.recompute_assignments();
    let assignment = assignments.get(&id);
    let backup_of = assignment.and_then(|a| a.backup_of);
    let replication_target = assignment
        .and_then(|a| a.replication_target)
        .and_then(|target_id| state.ring.descriptor(target_id))
        .map(|d| (d.ip, d.backup_port));

    let state = state.clone();
    tokio::spawn(async move {
        state.propagate_ring_change().await;
        if must_recover {
            run_recovery(state, id).await;
        }
    });

    RegisterAck { assigned_id: id, must_recover, backup_of, replication_target }
}

/// Drives the recovery state machine (spec §7):
/// `SyncFromBackup -> ReReplicate? -> Online`. The node was already flagged
/// `SyncFromBackup` at registration time.
async fn run_recovery(state: Arc<DsState>, id: u32) {
    let Some(descriptor) = state.ring.descriptor(id) else { return };

    if let Err(err) = dsclient::send_command(&descriptor.ds_command_addr(), &DsSnCommand::SyncToPrimary).await {
        tracing::warn!(sn = id, %err, "recovery sync-to-primary notify failed");
    }

    if let Some(backup) = state.ring.backup_node_for(id).and_then(|backup_id| state.ring.descriptor(backup_id)) {
        let cmd = DsSnCommand::SyncFromBackup { target_ip: descriptor.ip.clone(), target_port: descriptor.backup_port };
        if let Err(err) = dsclient::send_command(&backup.ds_command_addr(), &cmd).await {
            tracing::warn!(sn = id, %err, "recovery sync-from-backup failed");
        }
    }

    state.ring.set_recovery_state(id, RecoveryState::ReReplicate);
    // If this node is itself a backup for some other primary (the ring
    // successor relationship mirrored the other way), that primary's live
    // copies must be re-shipped wholesale since this node missed every
    // update while it was offline.
    if let Some(predecessor) =
        descriptor.backup_of.and_then(|predecessor_id| state.ring.descriptor(predecessor_id))
    {
        let cmd = DsSnCommand::ReReplicateAll { target_ip: descriptor.ip.clone(), target_port: descriptor.backup_port };
        if let Err(err) = dsclient::send_command(&predecessor.ds_command_addr(), &cmd).await {
            tracing::warn!(sn = id, %err, "recovery re-replicate failed");
        }
    }

    state.ring.set_recovery_state(id, RecoveryState::Online);
    state.propagate_ring_change().await;
}

async fn run_client_listener(listener: TcpListener, state: Arc<DsState>) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client_conn(socket, state).await {
                tracing::warn!(%peer, %err, "client connection failed");
            }
        });
    }
}

async fn handle_client_conn(socket: TcpStream, state: Arc<DsState>) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let frame = read_frame(&mut reader).await?;
    let msg_type = MsgType::from_u32(frame.msg_type)?;
    let req = DsRequest::decode(msg_type, &mut &frame.payload[..])?;
    let DsRequest::Login { username, password } = req else {
        return reply_fail(&mut writer, Error::Protocol("first message must be LOGIN".into())).await;
    };

    if state.login(&username, &password).is_err() {
        return reply_fail(&mut writer, Error::Access).await;
    }
    let (session_id, session) = state.sessions.create(username).await;
    write_ok(&mut writer, DsOk::LoggedIn { session_id }).await?;

    let result = run_session(&mut reader, &mut writer, &state, &session).await;
    state.sessions.remove(session_id).await;
    result
}

async fn run_session<R, W>(reader: &mut R, writer: &mut W, state: &DsState, session: &Session) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        let frame = match read_frame(reader).await {
            Ok(frame) => frame,
            Err(_) => return Ok(()),
        };
        let msg_type = MsgType::from_u32(frame.msg_type)?;
        let req = DsRequest::decode(msg_type, &mut &frame.payload[..])?;
        match dispatch(state, session, req).await {
            Ok(ok) => write_ok(writer, ok).await?,
            Err(err) => reply_fail(writer, err).await?,
        }
    }
}

async fn dispatch(state: &DsState, session: &Session, req: DsRequest) -> Result<DsOk> {
    let user = session.username.as_str();
    match req {
        DsRequest::Login { .. } => Err(Error::Protocol("already logged in".into())),
        DsRequest::View { show_all, long } => state.view(user, show_all, long).await,
        DsRequest::Create { filename } => {
            let ok = state.create(user, &filename).await?;
            session.folders.add_file(&filename);
            Ok(ok)
        }
        DsRequest::Delete { filename } => {
            let ok = state.delete(user, &filename).await?;
            session.folders.remove_file(&filename);
            Ok(ok)
        }
        DsRequest::Info { filename } => state.info(user, &filename).await,
        DsRequest::ListUsers => Ok(state.list_users()),
        DsRequest::AccessAdd { filename, user: grantee, perms } => state.access_add(user, &filename, &grantee, &perms),
        DsRequest::AccessRemove { filename, user: grantee } => state.access_remove(user, &filename, &grantee),
        DsRequest::Exec { filename } => state.exec(user, &filename).await,
        DsRequest::FolderCreate { dir } => {
            session.folders.create_dir(&dir);
            Ok(DsOk::FolderOk)
        }
        DsRequest::FolderView { path } => {
            let (dirs, files) = session.folders.view(path.as_deref()).ok_or(Error::NotFound)?;
            let mut entries = dirs;
            entries.extend(files);
            Ok(DsOk::FolderListing { entries })
        }
        DsRequest::FolderMove { filename, dir } => {
            if session.folders.move_file(&filename, &dir) { Ok(DsOk::FolderOk) } else { Err(Error::NotFound) }
        }
        DsRequest::FolderUpmove { filename } => {
            if session.folders.upmove_file(&filename) { Ok(DsOk::FolderOk) } else { Err(Error::NotFound) }
        }
        DsRequest::FolderOpen { dir, create } => {
            if session.folders.open(&dir, create) { Ok(DsOk::FolderOk) } else { Err(Error::NotFound) }
        }
        DsRequest::FolderOpenParent => {
            if session.folders.open_parent() { Ok(DsOk::FolderOk) } else { Err(Error::NotFound) }
        }
        DsRequest::AccessRequest { filename } => state.access_request(user, &filename),
        DsRequest::AccessViewRequests => Ok(state.access_view_requests(user)),
        DsRequest::AccessGrant { filename, user: requester, perms } => {
            state.access_grant(user, &requester, &filename, &perms)
        }
        DsRequest::Redirect { op, filename } => state.redirect(user, op, &filename).await,
    }
}

async fn write_ok<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, ok: DsOk) -> Result<()> {
    let msg_type = ok_msg_type(&ok);
    let mut payload = Vec::new();
    ok.encode(&mut payload);
    write_frame(writer, msg_type.to_u32(), &payload).await
}

fn ok_msg_type(ok: &DsOk) -> MsgType {
    use crate::proto::client_ds::DsOkKind;
    match ok.kind() {
        DsOkKind::LoggedIn => MsgType::Login,
        DsOkKind::View => MsgType::View,
        DsOkKind::Created => MsgType::Create,
        DsOkKind::Deleted => MsgType::Delete,
        DsOkKind::Info => MsgType::Info,
        DsOkKind::Users => MsgType::ListUsers,
        DsOkKind::AccessChanged => MsgType::AccessAdd,
        DsOkKind::Exec => MsgType::Exec,
        DsOkKind::FolderOk => MsgType::FolderCreate,
        DsOkKind::FolderListing => MsgType::FolderView,
        DsOkKind::AccessRequests => MsgType::AccessViewRequests,
        DsOkKind::Redirect => MsgType::Redirect,
    }
}

async fn reply_fail<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, err: Error) -> Result<()> {
    let mut payload = Vec::new();
    FailPayload::from_error(&err).encode(&mut payload);
    write_frame(writer, MsgType::Fail.to_u32(), &payload).await
}
