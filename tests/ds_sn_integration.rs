//! End-to-end across a real storage node process and a `DsState` instance
//! talking to it over actual TCP sockets: create, redirect, a client write
//! session against the storage node directly, info, read, and delete.
//!
//! The directory service's own registration listener isn't started here;
//! instead a small stand-in speaks just enough of the register handshake
//! for the storage node's startup to complete, and the test's `DsState`
//! registers the node into its ring directly. This keeps the test scoped to
//! the create/redirect/write/delete path without a second real DS process.

use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

use scriptum::config::{DsConfig, SnConfig};
use scriptum::ds::commands::DsState;
use scriptum::proto::client_ds::RedirectOp;
use scriptum::proto::client_sn::{ClientSnRequest, ReadChunk, WriteDataAck};
use scriptum::proto::ds_sn::RegisterAck;
use scriptum::proto::frame::{read_frame, write_frame};
use scriptum::proto::MsgType;

const DS_ADDR: &str = "127.0.0.1:58410";
const CLIENT_ADDR: &str = "127.0.0.1:58411";
const BACKUP_ADDR: &str = "127.0.0.1:58412";
const DS_COMMAND_ADDR: &str = "127.0.0.1:58413";

/// Accepts exactly one `Register` and replies with a fixed ack; enough to
/// unblock a storage node's startup handshake without a full directory
/// service.
async fn run_stub_ds_peer(listener: TcpListener) {
    let (socket, _) = listener.accept().await.unwrap();
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let frame = read_frame(&mut reader).await.unwrap();
    assert_eq!(MsgType::from_u32(frame.msg_type).unwrap(), MsgType::Register);

    let ack = RegisterAck { assigned_id: 1, must_recover: false, backup_of: None, replication_target: None };
    let mut payload = Vec::new();
    ack.encode(&mut payload);
    write_frame(&mut writer, MsgType::RegisterAck.to_u32(), &payload).await.unwrap();
    writer.flush().await.unwrap();
}

async fn wait_until_listening(addr: &str) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {addr} after 2s");
}

#[tokio::test]
async fn create_write_read_delete_round_trip_over_real_sockets() {
    let stub_listener = TcpListener::bind(DS_ADDR).await.unwrap();
    tokio::spawn(run_stub_ds_peer(stub_listener));

    let sn_dir = TempDir::new().unwrap();
    let sn_config = SnConfig {
        client_addr: CLIENT_ADDR.parse().unwrap(),
        backup_addr: BACKUP_ADDR.parse().unwrap(),
        ds_addr: DS_ADDR.parse().unwrap(),
        ds_command_addr: DS_COMMAND_ADDR.parse().unwrap(),
        data_dir: sn_dir.path().to_path_buf(),
        heartbeat_interval: Duration::from_secs(3600),
    };
    tokio::spawn(scriptum::sn::server::run(sn_config));
    wait_until_listening(DS_COMMAND_ADDR).await;
    wait_until_listening(CLIENT_ADDR).await;

    let ds_dir = TempDir::new().unwrap();
    let ds_config = DsConfig {
        client_addr: "127.0.0.1:58420".parse().unwrap(),
        sn_addr: DS_ADDR.parse().unwrap(),
        data_dir: ds_dir.path().to_path_buf(),
        heartbeat_timeout: Duration::from_secs(30),
        enable_exec: false,
    };
    let state = DsState::new(ds_config);
    state.load().unwrap();
    let (_sn_id, _) = state.ring.register("127.0.0.1".to_string(), 58411, 58412, 58413);

    state.create("alice", "notes.txt").await.unwrap();

    let redirect = state.redirect("alice", RedirectOp::Write, "notes.txt").await.unwrap();
    let scriptum::proto::client_ds::DsOk::Redirect { ip, port } = redirect else { panic!("expected redirect") };
    assert_eq!(ip, "127.0.0.1");
    assert_eq!(port, 58411);

    run_write_session(&format!("{ip}:{port}"), "alice", "notes.txt", "Hello world.").await;

    let info = state.info("alice", "notes.txt").await.unwrap();
    let scriptum::proto::client_ds::DsOk::Info { metadata } = info else { panic!("expected info") };
    assert_eq!(metadata.word_count, 3);
    assert!(!metadata.is_backup);

    let content = read_file_content(&format!("{ip}:{port}"), "alice", "notes.txt").await;
    assert_eq!(content, b"Hello world.");

    state.delete("alice", "notes.txt").await.unwrap();
    assert!(state.info("alice", "notes.txt").await.is_err());
}

async fn run_write_session(addr: &str, owner: &str, filename: &str, sentence: &str) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut payload = Vec::new();
    ClientSnRequest::WriteStart { owner: owner.to_string(), filename: filename.to_string(), sentence_index: 0 }
        .encode(&mut payload);
    write_frame(&mut stream, MsgType::WriteStart.to_u32(), &payload).await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    assert_eq!(MsgType::from_u32(frame.msg_type).unwrap(), MsgType::WriteOk);

    let mut payload = Vec::new();
    ClientSnRequest::WriteData { word_index: 0, content: sentence.to_string() }.encode(&mut payload);
    write_frame(&mut stream, MsgType::WriteData.to_u32(), &payload).await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    assert_eq!(MsgType::from_u32(frame.msg_type).unwrap(), MsgType::WriteDataAck);
    let ack = WriteDataAck::decode(&mut &frame.payload[..]).unwrap();
    assert!(ack.accepted);

    let mut payload = Vec::new();
    ClientSnRequest::WriteEtirw.encode(&mut payload);
    write_frame(&mut stream, MsgType::WriteEtirw.to_u32(), &payload).await.unwrap();
    let frame = read_frame(&mut stream).await.unwrap();
    assert_eq!(MsgType::from_u32(frame.msg_type).unwrap(), MsgType::Ok);
}

async fn read_file_content(addr: &str, owner: &str, filename: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut payload = Vec::new();
    ClientSnRequest::Read { owner: owner.to_string(), filename: filename.to_string() }.encode(&mut payload);
    write_frame(&mut stream, MsgType::Read.to_u32(), &payload).await.unwrap();

    let mut out = Vec::new();
    loop {
        let frame = read_frame(&mut stream).await.unwrap();
        assert_eq!(MsgType::from_u32(frame.msg_type).unwrap(), MsgType::ReadChunk);
        let chunk = ReadChunk::decode(&mut &frame.payload[..]).unwrap();
        out.extend_from_slice(&chunk.data);
        if chunk.is_final {
            break;
        }
    }
    out
}
