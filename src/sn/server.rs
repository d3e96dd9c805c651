//! Storage Node process wiring (spec §4.3 Startup): on connect to the DS,
//! register the local file list, then run the five concurrent tasks —
//! replication listener, heartbeat emitter, DS command handler, replication
//! worker, client-facing listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use crate::config::SnConfig;
use crate::error::{Error, Result};
use crate::proto::client_sn::{CheckpointOp, ClientSnRequest, WriteDataAck};
use crate::proto::ds_sn::{DsSnCommand, DsSnReply, RegisterRequest};
use crate::proto::frame::{read_frame, read_frame_or_eof, write_frame};
use crate::proto::{FailPayload, MsgType};

use super::engine::{SnEngine, WriteTransaction};
use super::replication::{self, ReplicationTarget};

pub async fn run(config: SnConfig) -> Result<()> {
    let (tx, rx) = replication::channel(256);
    let engine = Arc::new(init_engine(&config, tx).await?);

    let (register_ack, client_listener, backup_listener) = register_and_bind(&config, &engine).await?;

    let target: ReplicationTarget = Arc::new(RwLock::new(
        register_ack.replication_target.as_ref().and_then(|(ip, port)| format!("{ip}:{port}").parse().ok()),
    ));

    let worker = tokio::spawn(replication::run_worker(rx, target.clone(), engine.layout.files_dir()));
    let listener_task = tokio::spawn(replication::run_listener(
        backup_listener,
        engine.layout.files_dir(),
        engine.metadata.clone(),
    ));

    let heartbeat =
        tokio::spawn(run_heartbeat_emitter(config.ds_addr, register_ack.assigned_id, config.heartbeat_interval));
    let ds_handler = tokio::spawn(run_ds_command_listener(config.clone(), engine.clone(), target.clone()));
    let client_task = run_client_listener(client_listener, engine.clone());

    tokio::select! {
        res = client_task => res?,
        _ = worker => {},
        _ = listener_task => {},
        _ = heartbeat => {},
        _ = ds_handler => {},
    }
    Ok(())
}

async fn init_engine(config: &SnConfig, replication_tx: replication::ReplicationSender) -> Result<SnEngine> {
    let engine = SnEngine::new(config.data_dir.clone(), replication_tx);
    engine.layout.ensure_dirs().await?;
    engine.load_metadata_snapshot()?;
    Ok(engine)
}

async fn register_and_bind(
    config: &SnConfig,
    engine: &SnEngine,
) -> Result<(crate::proto::ds_sn::RegisterAck, TcpListener, TcpListener)> {
    let client_listener = TcpListener::bind(config.client_addr).await?;
    let backup_listener = TcpListener::bind(config.backup_addr).await?;

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(engine.layout.files_dir()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if let Some(meta) = engine.metadata.get(&filename) {
            files.push(meta.to_wire(&filename, ""));
        }
    }

    let req = RegisterRequest {
        ip: config.client_addr.ip().to_string(),
        client_port: config.client_addr.port(),
        backup_port: config.backup_addr.port(),
        ds_command_port: config.ds_command_addr.port(),
        files,
    };

    let mut stream = TcpStream::connect(config.ds_addr).await.map_err(|_| Error::PeerUnavailable)?;
    let mut payload = Vec::new();
    req.encode(&mut payload);
    write_frame(&mut stream, MsgType::Register.to_u32(), &payload).await?;
    let frame = read_frame(&mut stream).await?;
    let ack = crate::proto::ds_sn::RegisterAck::decode(&mut &frame.payload[..])?;

    if ack.must_recover {
        tracing::info!(assigned_id = ack.assigned_id, "DS flagged this node for recovery on rejoin");
    }

    Ok((ack, client_listener, backup_listener))
}

async fn run_heartbeat_emitter(ds_addr: std::net::SocketAddr, assigned_id: u32, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Ok(mut stream) = TcpStream::connect(ds_addr).await {
            let mut payload = Vec::new();
            crate::proto::primitive::write_u32(&mut payload, assigned_id);
            let _ = write_frame(&mut stream, MsgType::Heartbeat.to_u32(), &payload).await;
        } else {
            tracing::warn!("heartbeat send failed, DS unreachable");
        }
    }
}

async fn run_ds_command_listener(config: SnConfig, engine: Arc<SnEngine>, target: ReplicationTarget) {
    // The DS pushes commands over a connection it opens to us; distinct
    // from the client and replication ports since the DS is neither a
    // client nor a ring peer.
    let Ok(listener) = TcpListener::bind(config.ds_command_addr).await else {
        tracing::error!(addr = %config.ds_command_addr, "failed to bind DS command port");
        return;
    };
    loop {
        let Ok((socket, peer)) = listener.accept().await else { continue };
        let engine = engine.clone();
        let target = target.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_ds_command(socket, &engine, &target).await {
                tracing::warn!(%peer, %err, "ds command connection failed");
            }
        });
    }
}

async fn handle_ds_command(socket: TcpStream, engine: &SnEngine, target: &ReplicationTarget) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let frame = read_frame(&mut reader).await?;
    let msg_type = MsgType::from_u32(frame.msg_type)?;
    let cmd = DsSnCommand::decode(msg_type, &mut &frame.payload[..])?;

    let reply = match cmd {
        DsSnCommand::Heartbeat { .. } => DsSnReply::Ok,
        DsSnCommand::GetInfo { filename, .. } => match engine.metadata.get(&filename) {
            Some(meta) => DsSnReply::Info(meta.to_wire(&filename, "")),
            None => DsSnReply::Fail("not found".into()),
        },
        DsSnCommand::ExecGetContent { filename, .. } => {
            match tokio::fs::read(engine.layout.file_path(&filename)).await {
                Ok(bytes) => DsSnReply::Content(bytes),
                Err(_) => DsSnReply::Fail("not found".into()),
            }
        }
        DsSnCommand::Create { owner, filename } => match engine.create(&owner, &filename).await {
            Ok(()) => DsSnReply::Ok,
            Err(err) => DsSnReply::Fail(err.to_string()),
        },
        DsSnCommand::Delete { owner, filename } => match engine.delete(&owner, &filename).await {
            Ok(()) => DsSnReply::Ok,
            Err(err) => DsSnReply::Fail(err.to_string()),
        },
        DsSnCommand::SyncToPrimary => DsSnReply::Ok,
        DsSnCommand::SyncFromBackup { target_ip, target_port } => {
            match format!("{target_ip}:{target_port}").parse() {
                Ok(addr) => {
                    match replication::push_matching(&engine.layout.files_dir(), &engine.metadata, addr, true, false)
                        .await
                    {
                        Ok(()) => DsSnReply::Ok,
                        Err(err) => DsSnReply::Fail(err.to_string()),
                    }
                }
                Err(_) => DsSnReply::Fail("bad sync-from-backup target address".into()),
            }
        }
        DsSnCommand::ReReplicateAll { target_ip, target_port } => {
            match format!("{target_ip}:{target_port}").parse() {
                Ok(addr) => {
                    match replication::push_matching(&engine.layout.files_dir(), &engine.metadata, addr, false, true)
                        .await
                    {
                        Ok(()) => DsSnReply::Ok,
                        Err(err) => DsSnReply::Fail(err.to_string()),
                    }
                }
                Err(_) => DsSnReply::Fail("bad re-replicate target address".into()),
            }
        }
        DsSnCommand::UpdateBackup { target: new_target } => {
            let parsed = new_target.and_then(|(ip, port)| format!("{ip}:{port}").parse().ok());
            *target.write().await = parsed;
            DsSnReply::Ok
        }
    };

    let mut payload = Vec::new();
    reply.encode(&mut payload);
    let reply_msg_type = match reply {
        DsSnReply::Info(_) => MsgType::GetInfo,
        DsSnReply::Content(_) => MsgType::ExecGetContent,
        DsSnReply::Ok => MsgType::Ok,
        DsSnReply::Fail(_) => MsgType::Fail,
    };
    write_frame(&mut writer, reply_msg_type.to_u32(), &payload).await?;
    writer.flush().await.map_err(Error::from)?;
    Ok(())
}

async fn run_client_listener(listener: TcpListener, engine: Arc<SnEngine>) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client_conn(socket, &engine).await {
                tracing::warn!(%peer, %err, "client connection failed");
            }
        });
    }
}

async fn handle_client_conn(socket: TcpStream, engine: &SnEngine) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let frame = read_frame(&mut reader).await?;
    let msg_type = MsgType::from_u32(frame.msg_type)?;
    let req = ClientSnRequest::decode(msg_type, &mut &frame.payload[..])?;

    match req {
        ClientSnRequest::Read { filename, .. } => {
            if let Err(err) = engine.read_into(&filename, &mut writer).await {
                reply_fail(&mut writer, err).await?;
            }
        }
        ClientSnRequest::Stream { filename, .. } => {
            if let Err(err) = engine.stream_into(&filename, &mut writer).await {
                reply_fail(&mut writer, err).await?;
            }
        }
        ClientSnRequest::Undo { owner, filename } => match engine.undo(&owner, &filename).await {
            Ok(()) => write_frame(&mut writer, MsgType::Ok.to_u32(), &[]).await?,
            Err(err) => reply_fail(&mut writer, err).await?,
        },
        ClientSnRequest::Checkpoint { op, owner, filename, tag } => match op {
            CheckpointOp::Create => match engine.checkpoint_create(&filename, &tag).await {
                Ok(()) => write_frame(&mut writer, MsgType::Ok.to_u32(), &[]).await?,
                Err(err) => reply_fail(&mut writer, err).await?,
            },
            CheckpointOp::Revert => match engine.checkpoint_revert(&owner, &filename, &tag).await {
                Ok(()) => write_frame(&mut writer, MsgType::Ok.to_u32(), &[]).await?,
                Err(err) => reply_fail(&mut writer, err).await?,
            },
            CheckpointOp::View => {
                if let Err(err) = engine.checkpoint_view_into(&filename, &tag, &mut writer).await {
                    reply_fail(&mut writer, err).await?;
                }
            }
            CheckpointOp::List => match engine.checkpoint_list(&filename).await {
                Ok(tags) => {
                    let mut payload = Vec::new();
                    crate::proto::client_sn::CheckpointListing { tags }.encode(&mut payload);
                    write_frame(&mut writer, MsgType::CheckpointList.to_u32(), &payload).await?;
                }
                Err(err) => reply_fail(&mut writer, err).await?,
            },
        },
        ClientSnRequest::WriteStart { owner, filename, sentence_index } => {
            run_write_transaction(&mut reader, &mut writer, engine, &owner, &filename, sentence_index).await?;
        }
        ClientSnRequest::WriteData { .. } | ClientSnRequest::WriteEtirw => {
            return Err(Error::Protocol("write subquery received outside a transaction".into()));
        }
    }

    writer.flush().await.map_err(Error::from)?;
    Ok(())
}

async fn run_write_transaction<R, W>(
    reader: &mut R,
    writer: &mut W,
    engine: &SnEngine,
    owner: &str,
    filename: &str,
    sentence_index: i64,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let (mut txn, _sentence_guard) = match WriteTransaction::begin(engine, owner, filename, sentence_index).await {
        Ok(pair) => pair,
        Err(err) => return reply_fail(writer, err).await,
    };
    write_frame(writer, MsgType::WriteOk.to_u32(), &[]).await?;

    loop {
        let frame = match read_frame_or_eof(reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                // Clean disconnect between frames: spec §6 treats this the
                // same as an explicit WRITE_ETIRW.
                txn.commit().await?;
                return Ok(());
            }
            Err(err) => {
                txn.abort();
                return Err(err);
            }
        };
        let msg_type = MsgType::from_u32(frame.msg_type)?;
        match msg_type {
            MsgType::WriteData => {
                let req = ClientSnRequest::decode(msg_type, &mut &frame.payload[..])?;
                let ClientSnRequest::WriteData { word_index, content } = req else { unreachable!() };
                let ack = match txn.apply_write_data(word_index, &content) {
                    Ok(()) => WriteDataAck { accepted: true, error: None },
                    Err(err) => WriteDataAck { accepted: false, error: Some(err.to_string()) },
                };
                let mut payload = Vec::new();
                ack.encode(&mut payload);
                write_frame(writer, MsgType::WriteDataAck.to_u32(), &payload).await?;
            }
            MsgType::WriteEtirw => {
                txn.commit().await?;
                write_frame(writer, MsgType::Ok.to_u32(), &[]).await?;
                return Ok(());
            }
            other => {
                txn.abort();
                return Err(Error::Protocol(format!("unexpected {other:?} mid write transaction")));
            }
        }
    }
}

async fn reply_fail<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, err: Error) -> Result<()> {
    let mut payload = Vec::new();
    FailPayload::from_error(&err).encode(&mut payload);
    write_frame(writer, MsgType::Fail.to_u32(), &payload).await
}
