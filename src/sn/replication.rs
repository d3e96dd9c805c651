//! Replication queue, worker, and listener (spec §4.3's replication worker/
//! listener, §4.9's queue). The queue is `async_channel::bounded`, the
//! teacher's declared but unused dependency: closing the sender wakes the
//! blocked consumer with a clean end-of-stream, which is exactly the
//! "shutdown broadcasts and the consumer drains and exits" behaviour spec
//! §4.9 asks for, without hand-rolling a condvar.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{counts_from_content, FileMetadata};
use crate::proto::frame::{read_frame, write_frame};
use crate::proto::sn_sn::{Ack, DeleteFile, ReplicateFile};
use crate::proto::MsgType;

use super::metadata::MetadataStore;

#[derive(Debug, Clone)]
pub enum ReplicationEvent {
    Update { owner: String, filename: String },
    Delete { owner: String, filename: String },
}

pub type ReplicationSender = async_channel::Sender<ReplicationEvent>;
pub type ReplicationReceiver = async_channel::Receiver<ReplicationEvent>;

pub fn channel(capacity: usize) -> (ReplicationSender, ReplicationReceiver) {
    async_channel::bounded(capacity)
}

/// The SN's current replication target, updated by `UPDATE_BACKUP` DS
/// commands as ring membership changes.
pub type ReplicationTarget = Arc<RwLock<Option<SocketAddr>>>;

/// Consumes replication events and ships them to the current target.
/// Failures (target offline, connection refused) are logged and dropped:
/// the next `Update` for the same file carries the full content again, so
/// an earlier loss is subsumed rather than retried (spec §4.3).
pub async fn run_worker(rx: ReplicationReceiver, target: ReplicationTarget, files_dir: PathBuf) {
    while let Ok(event) = rx.recv().await {
        let Some(addr) = *target.read().await else {
            tracing::warn!(?event, "no replication target, dropping event");
            continue;
        };
        if let Err(err) = ship(addr, &files_dir, &event).await {
            tracing::warn!(?event, %err, "replication delivery failed");
        }
    }
    tracing::info!("replication worker exiting, queue closed");
}

async fn ship(addr: SocketAddr, files_dir: &PathBuf, event: &ReplicationEvent) -> crate::error::Result<()> {
    let mut stream = TcpStream::connect(addr).await.map_err(|_| crate::error::Error::PeerUnavailable)?;
    match event {
        ReplicationEvent::Update { owner, filename } => {
            let bytes = tokio::fs::read(files_dir.join(filename)).await.unwrap_or_default();
            let mut payload = Vec::new();
            ReplicateFile { owner: owner.clone(), filename: filename.clone(), bytes, is_backup: true }
                .encode(&mut payload);
            write_frame(&mut stream, MsgType::ReplicateFile.to_u32(), &payload).await.map_err(as_replication_err)?;
        }
        ReplicationEvent::Delete { owner, filename } => {
            let mut payload = Vec::new();
            DeleteFile { owner: owner.clone(), filename: filename.clone() }.encode(&mut payload);
            write_frame(&mut stream, MsgType::DeleteFile.to_u32(), &payload).await.map_err(as_replication_err)?;
        }
    }
    let frame = read_frame(&mut stream).await.map_err(as_replication_err)?;
    let _ack = Ack::decode(&mut &frame.payload[..])?;
    Ok(())
}

/// I/O failure while talking to a replication peer is distinguished from
/// generic storage I/O so callers can tell "the file failed to replicate"
/// from "the disk failed"; never surfaced to a client.
fn as_replication_err(err: Error) -> Error {
    match err {
        Error::Storage(io) => Error::Replication(io),
        other => other,
    }
}

/// Pushes every file whose local `is_backup` flag matches `from_backup_role`
/// to `target`, stamping each pushed copy with `mark_as_backup` on arrival.
/// Used by the recovery protocol (spec §7): a backup resyncing a
/// reconnecting primary passes `(true, false)`; a primary re-replicating to
/// a fresh backup passes `(false, true)`. Best-effort per file: one failed
/// transfer is logged and does not abort the rest of the push.
pub async fn push_matching(
    files_dir: &PathBuf,
    metadata: &MetadataStore,
    target: SocketAddr,
    from_backup_role: bool,
    mark_as_backup: bool,
) -> Result<()> {
    for (filename, meta) in metadata.entries() {
        if meta.is_backup != from_backup_role {
            continue;
        }
        let bytes = tokio::fs::read(files_dir.join(&filename)).await.unwrap_or_default();
        let mut payload = Vec::new();
        ReplicateFile { owner: String::new(), filename: filename.clone(), bytes, is_backup: mark_as_backup }
            .encode(&mut payload);

        let Ok(mut stream) = TcpStream::connect(target).await else {
            tracing::warn!(filename, "recovery push target unreachable, aborting push");
            return Err(Error::PeerUnavailable);
        };
        if let Err(err) = write_frame(&mut stream, MsgType::ReplicateFile.to_u32(), &payload).await.map_err(as_replication_err) {
            tracing::warn!(filename, %err, "recovery push failed mid-transfer");
            continue;
        }
        if let Err(err) = read_frame(&mut stream).await.map_err(as_replication_err) {
            tracing::warn!(filename, %err, "recovery push ack failed");
        }
    }
    Ok(())
}

/// Accepts inbound `REPLICATE_FILE`/`DELETE_FILE` pushes from this node's
/// ring predecessor. The receiver is that file's backup: writes land under
/// the sender's filename with `is_backup=true`.
pub async fn run_listener(
    listener: TcpListener,
    files_dir: PathBuf,
    metadata: Arc<MetadataStore>,
) -> std::io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let files_dir = files_dir.clone();
        let metadata = metadata.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_replication_conn(socket, &files_dir, &metadata).await {
                tracing::warn!(%peer, %err, "replication connection failed");
            }
        });
    }
}

async fn handle_replication_conn(
    socket: TcpStream,
    files_dir: &PathBuf,
    metadata: &MetadataStore,
) -> crate::error::Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let frame = read_frame(&mut reader).await?;
    let msg_type = MsgType::from_u32(frame.msg_type)?;
    match msg_type {
        MsgType::ReplicateFile => {
            let req = ReplicateFile::decode(&mut &frame.payload[..])?;
            tokio::fs::write(files_dir.join(&req.filename), &req.bytes).await?;
            let content = String::from_utf8_lossy(&req.bytes);
            let (size, word_count, char_count) = counts_from_content(&content);
            metadata.insert(
                req.filename.clone(),
                FileMetadata {
                    size,
                    word_count,
                    char_count,
                    atime: std::time::SystemTime::now(),
                    mtime: std::time::SystemTime::now(),
                    is_backup: req.is_backup,
                },
            );
        }
        MsgType::DeleteFile => {
            let req = DeleteFile::decode(&mut &frame.payload[..])?;
            let _ = tokio::fs::remove_file(files_dir.join(&req.filename)).await;
            metadata.remove(&req.filename);
        }
        other => return Err(crate::error::Error::Protocol(format!("unexpected {other:?} on replication port"))),
    }

    let mut ack_payload = Vec::new();
    Ack.encode(&mut ack_payload);
    write_frame(&mut writer, MsgType::Ack.to_u32(), &ack_payload).await?;
    writer.flush().await.map_err(crate::error::Error::from)?;
    Ok(())
}
