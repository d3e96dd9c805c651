//! Thin client for the DS -> SN command channel (spec §4.1 DS<->SN family):
//! opens a connection to an SN's DS-command port, sends one
//! [`DsSnCommand`], and reads back one [`DsSnReply`].

use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::proto::ds_sn::{DsSnCommand, DsSnReply};
use crate::proto::frame::{read_frame, write_frame};
use crate::proto::MsgType;

pub async fn send_command(addr: &str, cmd: &DsSnCommand) -> Result<DsSnReply> {
    let mut stream = TcpStream::connect(addr).await.map_err(|_| Error::PeerUnavailable)?;
    let msg_type = command_msg_type(cmd);
    let mut payload = Vec::new();
    cmd.encode(&mut payload);
    write_frame(&mut stream, msg_type.to_u32(), &payload).await?;

    let frame = read_frame(&mut stream).await?;
    let reply_type = MsgType::from_u32(frame.msg_type)?;
    Ok(match reply_type {
        MsgType::GetInfo => DsSnReply::Info(crate::proto::FileMetadataWire::decode(&mut &frame.payload[..])?),
        MsgType::ExecGetContent => {
            DsSnReply::Content(crate::proto::primitive::read_bytes(&mut &frame.payload[..])?)
        }
        MsgType::Ok => DsSnReply::Ok,
        MsgType::Fail => DsSnReply::Fail(crate::proto::primitive::read_string(&mut &frame.payload[..])?),
        other => return Err(Error::Protocol(format!("unexpected ds-sn reply {other:?}"))),
    })
}

fn command_msg_type(cmd: &DsSnCommand) -> MsgType {
    match cmd {
        DsSnCommand::Heartbeat { .. } => MsgType::Heartbeat,
        DsSnCommand::GetInfo { .. } => MsgType::GetInfo,
        DsSnCommand::ExecGetContent { .. } => MsgType::ExecGetContent,
        DsSnCommand::Create { .. } => MsgType::SnCreate,
        DsSnCommand::Delete { .. } => MsgType::SnDelete,
        DsSnCommand::SyncFromBackup { .. } => MsgType::SyncFromBackup,
        DsSnCommand::SyncToPrimary => MsgType::SyncToPrimary,
        DsSnCommand::ReReplicateAll { .. } => MsgType::ReReplicateAll,
        DsSnCommand::UpdateBackup { .. } => MsgType::UpdateBackup,
    }
}
