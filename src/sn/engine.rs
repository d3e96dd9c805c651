//! Core Storage Node file operations (spec §4.3): create, delete, read,
//! stream, undo, checkpoint, and the write-transaction subprotocol. Wire
//! framing lives in [`super::server`]; this module owns locking, disk
//! layout, and metadata bookkeeping.

use std::path::PathBuf;
use std::time::SystemTime;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::model::{counts_from_content, FileMetadata};
use crate::proto::client_sn::ReadChunk;
use crate::proto::frame::{write_frame, MAX_PAYLOAD};
use crate::proto::MsgType;
use crate::textmodel::{ends_with_delimiter, insert_words, join_words, leading_whitespace, split_sentences, split_words};

use super::buffer_pool::BufferPool;
use super::lock_table::LockTable;
use super::metadata::MetadataStore;
use super::replication::{ReplicationEvent, ReplicationSender};

/// On-disk layout rooted at `data_dir`, exactly per spec §4.3's "On-disk
/// layout" paragraph.
#[derive(Debug, Clone)]
pub struct Layout {
    pub data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn undo_dir(&self) -> PathBuf {
        self.data_dir.join("undo")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn swap_dir(&self) -> PathBuf {
        self.data_dir.join("swap")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.snapshot")
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.files_dir().join(filename)
    }

    pub fn undo_path(&self, filename: &str) -> PathBuf {
        self.undo_dir().join(filename)
    }

    pub fn checkpoint_path(&self, filename: &str, tag: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("{filename}_{tag}"))
    }

    pub fn swap_path(&self, filename: &str, sentence_index: i64) -> PathBuf {
        self.swap_dir().join(format!("{filename}_swap_{sentence_index}"))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.files_dir(), self.undo_dir(), self.checkpoints_dir(), self.swap_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

pub struct SnEngine {
    pub layout: Layout,
    pub metadata: std::sync::Arc<MetadataStore>,
    pub locks: LockTable,
    pub buffer_pool: std::sync::Arc<BufferPool>,
    pub replication_tx: ReplicationSender,
}

impl SnEngine {
    pub fn new(data_dir: PathBuf, replication_tx: ReplicationSender) -> Self {
        Self {
            layout: Layout::new(data_dir),
            metadata: std::sync::Arc::new(MetadataStore::new()),
            locks: LockTable::new(),
            buffer_pool: BufferPool::new(64),
            replication_tx,
        }
    }

    fn enqueue_update(&self, owner: &str, filename: &str) {
        let event = ReplicationEvent::Update { owner: owner.to_string(), filename: filename.to_string() };
        if self.replication_tx.try_send(event).is_err() {
            tracing::warn!(filename, "replication queue full, update dropped");
        }
    }

    fn enqueue_delete(&self, owner: &str, filename: &str) {
        let event = ReplicationEvent::Delete { owner: owner.to_string(), filename: filename.to_string() };
        if self.replication_tx.try_send(event).is_err() {
            tracing::warn!(filename, "replication queue full, delete dropped");
        }
    }

    /// Spec §4.3 Create: truncating open, zeroed metadata, immediate
    /// replicate enqueue so the drift window after a bare `CREATE` is
    /// bounded even before any content is written.
    pub async fn create(&self, owner: &str, filename: &str) -> Result<()> {
        tokio::fs::write(self.layout.file_path(filename), b"").await?;
        self.metadata.insert(filename.to_string(), FileMetadata::empty());
        self.enqueue_update(owner, filename);
        Ok(())
    }

    pub async fn delete(&self, owner: &str, filename: &str) -> Result<()> {
        let entry = self.locks.entry(filename).await;
        let _write_guard = entry.file_lock.write().await;

        if swap_exists_for(&self.layout, filename).await? {
            return Err(Error::Conflict("write in progress".into()));
        }

        let _ = tokio::fs::remove_file(self.layout.file_path(filename)).await;
        let _ = tokio::fs::remove_file(self.layout.undo_path(filename)).await;
        remove_checkpoints_for(&self.layout, filename).await?;
        self.metadata.remove(filename);
        self.enqueue_delete(owner, filename);
        Ok(())
    }

    pub async fn read_into<W: AsyncWrite + Unpin>(&self, filename: &str, writer: &mut W) -> Result<()> {
        let entry = self.locks.entry(filename).await;
        let _read_guard = entry.file_lock.read().await;

        if let Some(mut meta) = self.metadata.get(filename) {
            meta.atime = SystemTime::now();
            self.metadata.insert(filename.to_string(), meta);
        }

        let content = tokio::fs::read(self.layout.file_path(filename)).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound { Error::NotFound } else { Error::Storage(err) }
        })?;
        stream_chunks(writer, &content, self.buffer_pool.as_ref()).await
    }

    /// Streams one word per message, capped at 255 bytes, followed by a
    /// stream-end sentinel. Delimiters are individual words, matching the
    /// tokenisation used by the write-transaction protocol.
    pub async fn stream_into<W: AsyncWrite + Unpin>(&self, filename: &str, writer: &mut W) -> Result<()> {
        let entry = self.locks.entry(filename).await;
        let _read_guard = entry.file_lock.read().await;

        let content = tokio::fs::read_to_string(self.layout.file_path(filename)).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound { Error::NotFound } else { Error::Storage(err) }
        })?;

        for sentence in split_sentences(&content) {
            for word in split_words(&sentence) {
                let truncated: String = word.chars().take(255).collect();
                let mut payload = Vec::new();
                crate::proto::client_sn::StreamWord { word: truncated }.encode(&mut payload);
                write_frame(writer, MsgType::StreamWord.to_u32(), &payload).await?;
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        }
        write_frame(writer, MsgType::StreamEnd.to_u32(), &[]).await
    }

    /// Three-rename atomic swap: current -> temp, undo -> current, temp ->
    /// undo (spec §4.3 Undo).
    pub async fn undo(&self, owner: &str, filename: &str) -> Result<()> {
        let entry = self.locks.entry(filename).await;
        let _write_guard = entry.file_lock.write().await;

        let undo_path = self.layout.undo_path(filename);
        if tokio::fs::metadata(&undo_path).await.is_err() {
            return Err(Error::Conflict("no undo pre-image".into()));
        }

        let current_path = self.layout.file_path(filename);
        let temp_path = self.layout.swap_dir().join(format!("{filename}_undo_tmp"));
        tokio::fs::rename(&current_path, &temp_path).await?;
        tokio::fs::rename(&undo_path, &current_path).await?;
        tokio::fs::rename(&temp_path, &undo_path).await?;

        self.recompute_and_persist(filename).await?;
        self.enqueue_update(owner, filename);
        Ok(())
    }

    pub async fn checkpoint_create(&self, filename: &str, tag: &str) -> Result<()> {
        let entry = self.locks.entry(filename).await;
        let _read_guard = entry.file_lock.read().await;

        let checkpoint_path = self.layout.checkpoint_path(filename, tag);
        if tokio::fs::metadata(&checkpoint_path).await.is_ok() {
            return Err(Error::Conflict(format!("checkpoint {tag} already exists")));
        }
        tokio::fs::copy(self.layout.file_path(filename), &checkpoint_path).await?;
        Ok(())
    }

    pub async fn checkpoint_revert(&self, owner: &str, filename: &str, tag: &str) -> Result<()> {
        let entry = self.locks.entry(filename).await;
        let _write_guard = entry.file_lock.write().await;

        let checkpoint_path = self.layout.checkpoint_path(filename, tag);
        if tokio::fs::metadata(&checkpoint_path).await.is_err() {
            return Err(Error::NotFound);
        }
        tokio::fs::copy(self.layout.file_path(filename), self.layout.undo_path(filename)).await?;
        tokio::fs::copy(&checkpoint_path, self.layout.file_path(filename)).await?;

        self.recompute_and_persist(filename).await?;
        self.enqueue_update(owner, filename);
        Ok(())
    }

    pub async fn checkpoint_view_into<W: AsyncWrite + Unpin>(
        &self,
        filename: &str,
        tag: &str,
        writer: &mut W,
    ) -> Result<()> {
        let checkpoint_path = self.layout.checkpoint_path(filename, tag);
        let content = tokio::fs::read(&checkpoint_path)
            .await
            .map_err(|err| if err.kind() == std::io::ErrorKind::NotFound { Error::NotFound } else { Error::Storage(err) })?;
        stream_chunks(writer, &content, self.buffer_pool.as_ref()).await
    }

    pub async fn checkpoint_list(&self, filename: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let prefix = format!("{filename}_");
        let mut entries = tokio::fs::read_dir(self.layout.checkpoints_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(tag) = name.strip_prefix(&prefix) {
                out.push(tag.to_string());
            }
        }
        Ok(out)
    }

    async fn recompute_and_persist(&self, filename: &str) -> Result<()> {
        let content = tokio::fs::read_to_string(self.layout.file_path(filename)).await?;
        let (size, word_count, char_count) = counts_from_content(&content);
        let mut meta = self.metadata.get(filename).unwrap_or_else(FileMetadata::empty);
        meta.size = size;
        meta.word_count = word_count;
        meta.char_count = char_count;
        meta.mtime = SystemTime::now();
        self.metadata.insert(filename.to_string(), meta);
        Ok(())
    }

    pub fn persist_metadata_snapshot(&self) -> Result<()> {
        self.metadata.save(&self.layout.metadata_path())
    }

    pub fn load_metadata_snapshot(&self) -> Result<()> {
        self.metadata.load(&self.layout.metadata_path())
    }
}

async fn swap_exists_for(layout: &Layout, filename: &str) -> Result<bool> {
    let prefix = format!("{filename}_swap_");
    let mut entries = tokio::fs::read_dir(layout.swap_dir()).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn remove_checkpoints_for(layout: &Layout, filename: &str) -> Result<()> {
    let prefix = format!("{filename}_");
    let mut entries = tokio::fs::read_dir(layout.checkpoints_dir()).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
    Ok(())
}

async fn stream_chunks<W: AsyncWrite + Unpin>(
    writer: &mut W,
    content: &[u8],
    pool: &BufferPool,
) -> Result<()> {
    let mut offset = 0;
    loop {
        let mut buf = pool.take();
        let end = (offset + MAX_PAYLOAD).min(content.len());
        let chunk_len = end - offset;
        buf.truncate(chunk_len);
        buf.copy_from_slice(&content[offset..end]);
        let is_final = end == content.len();

        let mut payload = Vec::new();
        ReadChunk { data: buf.clone(), is_final }.encode(&mut payload);
        write_frame(writer, MsgType::ReadChunk.to_u32(), &payload).await?;
        pool.give_back(buf);

        offset = end;
        if is_final {
            break;
        }
    }
    writer.flush().await.map_err(Error::from)?;
    Ok(())
}

/// State of an in-flight write transaction (spec §4.3 steps 1-9).
pub struct WriteTransaction<'a> {
    engine: &'a SnEngine,
    owner: String,
    filename: String,
    sentence_index: i64,
    words: Vec<String>,
    leading_whitespace: String,
    committed: bool,
}

impl<'a> WriteTransaction<'a> {
    /// Steps 1-3: acquire the sentence lock non-blockingly, swap+undo copy,
    /// tokenise and validate the target index.
    pub async fn begin(
        engine: &'a SnEngine,
        owner: &str,
        filename: &str,
        sentence_index: i64,
    ) -> Result<(Self, tokio::sync::OwnedMutexGuard<()>)> {
        if sentence_index < 0 {
            return Err(Error::EditBounds("negative sentence index".into()));
        }
        let entry = engine.locks.entry(filename).await;
        let sentence_lock = entry.sentence_lock(sentence_index as usize).await;
        let guard = sentence_lock.try_lock_owned().map_err(|_| Error::Conflict("LOCKED".into()))?;

        let current_path = engine.layout.file_path(filename);
        let swap_path = engine.layout.swap_path(filename, sentence_index);
        let undo_path = engine.layout.undo_path(filename);

        if let Err(err) = tokio::fs::copy(&current_path, &swap_path).await {
            return Err(Error::Storage(err));
        }
        if let Err(err) = tokio::fs::copy(&swap_path, &undo_path).await {
            let _ = tokio::fs::remove_file(&swap_path).await;
            return Err(Error::Storage(err));
        }

        let swap_content = tokio::fs::read_to_string(&swap_path).await?;
        let sentences = split_sentences(&swap_content);
        let num_sentences = sentences.len() as i64;

        let leading = if sentence_index < num_sentences {
            leading_whitespace(&sentences[sentence_index as usize]).to_string()
        } else {
            String::new()
        };
        let words = if sentence_index < num_sentences {
            split_words(&sentences[sentence_index as usize])
        } else if sentence_index == num_sentences {
            let appendable = sentences.is_empty() || ends_with_delimiter(sentences.last().unwrap());
            if !appendable {
                let _ = tokio::fs::remove_file(&swap_path).await;
                return Err(Error::EditBounds("last sentence is not terminated".into()));
            }
            Vec::new()
        } else {
            let _ = tokio::fs::remove_file(&swap_path).await;
            return Err(Error::EditBounds("sentence index beyond end of file".into()));
        };

        Ok((
            Self {
                engine,
                owner: owner.to_string(),
                filename: filename.to_string(),
                sentence_index,
                words,
                leading_whitespace: leading,
                committed: false,
            },
            guard,
        ))
    }

    /// Step 5: validates `word_index`, tokenises `content`, and splices it
    /// in. Returns `Err` for the *subquery* without aborting the whole
    /// transaction; the caller reports that to the client and keeps going.
    pub fn apply_write_data(&mut self, word_index: i64, content: &str) -> Result<()> {
        if word_index < 0 || word_index as usize > self.words.len() {
            return Err(Error::EditBounds(format!("word index {word_index} out of range")));
        }
        insert_words(&mut self.words, word_index as usize, split_words(content));
        Ok(())
    }

    pub fn abort(self) {}

    /// Steps 6-8: rejoin words behind the sentence's original leading
    /// whitespace (captured in [`begin`](Self::begin), since `split_words`/
    /// `join_words` never carry it), re-read and re-tokenise the live file
    /// under the write lock, splice the edited sentence back in, write the
    /// merged content atomically, recompute counts, persist, enqueue
    /// replicate, and drop the swap file.
    pub async fn commit(mut self) -> Result<()> {
        let merged_sentence = format!("{}{}", self.leading_whitespace, join_words(&self.words));
        let swap_path = self.engine.layout.swap_path(&self.filename, self.sentence_index);

        let entry = self.engine.locks.entry(&self.filename).await;
        let _write_guard = entry.file_lock.write().await;

        let current_path = self.engine.layout.file_path(&self.filename);
        let live_content = tokio::fs::read_to_string(&current_path).await.unwrap_or_default();
        let mut sentences = split_sentences(&live_content);
        if self.sentence_index as usize >= sentences.len() {
            sentences.resize(self.sentence_index as usize + 1, String::new());
        }
        sentences[self.sentence_index as usize] = merged_sentence;

        let new_content = crate::textmodel::join_sentences(&sentences);
        tokio::fs::write(&current_path, &new_content).await?;
        let _ = tokio::fs::remove_file(&swap_path).await;

        let (size, word_count, char_count) = counts_from_content(&new_content);
        let mut meta = self.engine.metadata.get(&self.filename).unwrap_or_else(FileMetadata::empty);
        meta.size = size;
        meta.word_count = word_count;
        meta.char_count = char_count;
        meta.mtime = SystemTime::now();
        self.engine.metadata.insert(self.filename.clone(), meta);

        self.committed = true;
        self.engine.enqueue_update(&self.owner, &self.filename);
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    /// Step 9: a transaction dropped without an explicit commit (client
    /// disconnect mid-edit, or an explicit [`WriteTransaction::abort`])
    /// leaves no trace — the swap file is best-effort removed here since
    /// cleanup must not depend on async drop.
    fn drop(&mut self) {
        if !self.committed {
            let swap_path = self.engine.layout.swap_path(&self.filename, self.sentence_index);
            let _ = std::fs::remove_file(swap_path);
        }
    }
}
