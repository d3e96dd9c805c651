//! Exercises the storage-node engine directly (no network): create, a
//! two-sentence write session, checkpoint/revert, undo, and the
//! non-blocking sentence-lock conflict.

use scriptum::proto::client_sn::ReadChunk;
use scriptum::proto::frame::read_frame;
use scriptum::sn::engine::{SnEngine, WriteTransaction};
use scriptum::sn::replication;
use tempfile::TempDir;

async fn new_engine(dir: &TempDir) -> SnEngine {
    let (tx, _rx) = replication::channel(16);
    let engine = SnEngine::new(dir.path().to_path_buf(), tx);
    engine.layout.ensure_dirs().await.unwrap();
    engine
}

#[tokio::test]
async fn write_session_appends_two_sentences() {
    let dir = TempDir::new().unwrap();
    let engine = new_engine(&dir).await;

    engine.create("alice", "notes.txt").await.unwrap();

    let (mut txn, _guard) = WriteTransaction::begin(&engine, "alice", "notes.txt", 0).await.unwrap();
    txn.apply_write_data(0, "Hello world.").unwrap();
    txn.commit().await.unwrap();

    let (mut txn, _guard) = WriteTransaction::begin(&engine, "alice", "notes.txt", 1).await.unwrap();
    txn.apply_write_data(0, "Second sentence.").unwrap();
    txn.commit().await.unwrap();

    // Appending a brand new sentence splices in `join_words`' output
    // directly, with no separator inserted between it and the prior one.
    let content = tokio::fs::read_to_string(engine.layout.file_path("notes.txt")).await.unwrap();
    assert_eq!(content, "Hello world.Second sentence.");

    let meta = engine.metadata.get("notes.txt").unwrap();
    assert_eq!(meta.word_count, 6);
}

#[tokio::test]
async fn read_into_streams_full_content_as_one_final_chunk() {
    let dir = TempDir::new().unwrap();
    let engine = new_engine(&dir).await;
    engine.create("alice", "notes.txt").await.unwrap();

    let (mut txn, _guard) = WriteTransaction::begin(&engine, "alice", "notes.txt", 0).await.unwrap();
    txn.apply_write_data(0, "One sentence here.").unwrap();
    txn.commit().await.unwrap();

    let (mut client_side, mut server_side) = tokio::io::duplex(65536);
    let (read_res, frame_res) =
        tokio::join!(engine.read_into("notes.txt", &mut server_side), read_frame(&mut client_side));
    read_res.unwrap();
    let frame = frame_res.unwrap();
    let chunk = ReadChunk::decode(&mut &frame.payload[..]).unwrap();
    assert!(chunk.is_final);
    assert_eq!(chunk.data, b"One sentence here.");
}

#[tokio::test]
async fn checkpoint_revert_restores_snapshot_and_undo_reverses_it() {
    let dir = TempDir::new().unwrap();
    let engine = new_engine(&dir).await;
    engine.create("alice", "notes.txt").await.unwrap();

    let (mut txn, _guard) = WriteTransaction::begin(&engine, "alice", "notes.txt", 0).await.unwrap();
    txn.apply_write_data(0, "Version one.").unwrap();
    txn.commit().await.unwrap();

    engine.checkpoint_create("notes.txt", "v1").await.unwrap();

    let (mut txn, _guard) = WriteTransaction::begin(&engine, "alice", "notes.txt", 1).await.unwrap();
    txn.apply_write_data(0, "Version two.").unwrap();
    txn.commit().await.unwrap();
    let edited = tokio::fs::read_to_string(engine.layout.file_path("notes.txt")).await.unwrap();
    assert_eq!(edited, "Version one.Version two.");

    engine.checkpoint_revert("alice", "notes.txt", "v1").await.unwrap();
    let reverted = tokio::fs::read_to_string(engine.layout.file_path("notes.txt")).await.unwrap();
    assert_eq!(reverted, "Version one.");

    // The revert copied the pre-revert content into the undo slot, so one
    // undo call brings the edited version back.
    engine.undo("alice", "notes.txt").await.unwrap();
    let undone = tokio::fs::read_to_string(engine.layout.file_path("notes.txt")).await.unwrap();
    assert_eq!(undone, edited);
}

#[tokio::test]
async fn concurrent_edits_to_the_same_sentence_conflict() {
    let dir = TempDir::new().unwrap();
    let engine = new_engine(&dir).await;
    engine.create("alice", "notes.txt").await.unwrap();

    let (_txn, _guard) = WriteTransaction::begin(&engine, "alice", "notes.txt", 0).await.unwrap();
    let second = WriteTransaction::begin(&engine, "alice", "notes.txt", 0).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn concurrent_writes_to_disjoint_sentences_preserve_inter_sentence_whitespace() {
    // Scenario 3: pre-populate "A. B. C.", then two clients concurrently
    // edit the first and last sentence while leaving the middle one alone.
    // Each sentence after the first carries its own leading space as part
    // of its text; a naive tokenise-then-rejoin must not drop it.
    let dir = TempDir::new().unwrap();
    let engine = new_engine(&dir).await;
    engine.create("alice", "doc.txt").await.unwrap();
    tokio::fs::write(engine.layout.file_path("doc.txt"), "A. B. C.").await.unwrap();

    let (mut txn_x, _guard_x) = WriteTransaction::begin(&engine, "alice", "doc.txt", 0).await.unwrap();
    txn_x.apply_write_data(1, "very").unwrap();

    let (mut txn_y, _guard_y) = WriteTransaction::begin(&engine, "alice", "doc.txt", 2).await.unwrap();
    txn_y.apply_write_data(1, "big").unwrap();

    txn_x.commit().await.unwrap();
    txn_y.commit().await.unwrap();

    let content = tokio::fs::read_to_string(engine.layout.file_path("doc.txt")).await.unwrap();
    assert_eq!(content, "A very. B. C big.");
}

#[tokio::test]
async fn write_past_end_of_empty_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = new_engine(&dir).await;
    engine.create("alice", "notes.txt").await.unwrap();

    let result = WriteTransaction::begin(&engine, "alice", "notes.txt", 1).await;
    assert!(result.is_err());
}
