//! src/services/relay_service.rs
//!
//! RelayService — the relay's message store: SQLite for the metadata index
//! and the append-only message log, `BlobStore` for payload bytes. Uploads
//! are announced with a claimed SHA-256, fed in chunks, and verified
//! against that claim at EOF. Stalled uploads are evicted by the periodic
//! sweep in `reaper.rs`.

use crate::models::message::{Message, UploadState};
use crate::services::blob_store::{BlobError, BlobStore};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("message `{0}` is closed")]
    Closed(String),
    #[error("an upload for `{0}` is already in progress")]
    Duplicate(String),
    #[error("message `{0}` is still uploading")]
    StillUploading(String),
    #[error("the hash provided does not match the actual hash (claimed {claimed}, got {actual})")]
    HashMismatch { claimed: String, actual: String },
    #[error("message hash must be 64 lowercase hex characters")]
    InvalidHash,
    #[error("author must not be empty")]
    EmptyAuthor,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<BlobError> for RelayError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(hash) => RelayError::NotFound(hash),
            BlobError::AlreadySealed(hash) => RelayError::Closed(hash),
            BlobError::AlreadyExists(hash) | BlobError::UploadInProgress(hash) => {
                RelayError::Duplicate(hash)
            }
            BlobError::Io(err) => RelayError::Io(err),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Outcome of a `push_content` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk appended; the upload stays open.
    Accepted,
    /// Final chunk received and the payload digest matched the claim.
    Sealed,
}

/// Apply the embedded schema. Any failure here is fatal to startup: an
/// unreadable index is unrecoverable corruption, not a per-request error.
pub async fn apply_schema(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let sql = include_str!("../../migrations/0001_init.sql");
    for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// RelayService provides the core message-store operations:
/// - Announce a message (index entry + log entry + empty blob)
/// - Push content chunks, sealing and verifying on EOF
/// - List recent complete messages (windowed, timestamp-filtered)
/// - Fetch payload bytes for a complete message
/// - Sweep stalled uploads past their timeout
///
/// Cloning is cheap; handlers and the reaper share one instance.
#[derive(Clone)]
pub struct RelayService {
    /// Shared SQLite pool holding the message index and the message log.
    pub db: Arc<SqlitePool>,

    /// Payload storage.
    pub blobs: BlobStore,

    /// How long an uploading entry may sit idle before the sweep evicts it.
    upload_timeout_ms: i64,

    /// Highest timestamp issued so far, so announce timestamps never go
    /// backward even if the wall clock does.
    last_timestamp: Arc<AtomicI64>,
}

impl RelayService {
    pub fn new(db: Arc<SqlitePool>, blobs: BlobStore, upload_timeout: Duration) -> Self {
        Self {
            db,
            blobs,
            upload_timeout_ms: upload_timeout.as_millis() as i64,
            last_timestamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Current time in ms since epoch, clamped to be non-decreasing.
    fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let prev = self.last_timestamp.fetch_max(wall, Ordering::Relaxed);
        prev.max(wall)
    }

    /// A message hash is exactly 64 lowercase hex characters. Anything else
    /// is rejected before it can reach the filesystem.
    fn ensure_hash_safe(hash: &str) -> RelayResult<()> {
        if hash.len() == 64
            && hash
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            Ok(())
        } else {
            Err(RelayError::InvalidHash)
        }
    }

    /// Fetch an index entry, if present.
    pub async fn get(&self, hash: &str) -> RelayResult<Option<Message>> {
        let entry = sqlx::query_as::<_, Message>(
            "SELECT hash, author, kind, filename, timestamp, state
             FROM messages WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(&*self.db)
        .await?;
        Ok(entry)
    }

    /// Point-in-time view of the whole index, oldest first. Used by the
    /// sweep to pick eviction candidates.
    pub async fn snapshot(&self) -> RelayResult<Vec<Message>> {
        let entries = sqlx::query_as::<_, Message>(
            "SELECT hash, author, kind, filename, timestamp, state
             FROM messages ORDER BY timestamp ASC, hash ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(entries)
    }

    /// Announce a message: the caller claims the digest of a payload it is
    /// about to upload.
    ///
    /// If the hash already has a complete entry this is the dedup path: the
    /// log gets another entry pointing at the existing payload and no new
    /// upload session opens. An in-flight upload for the same hash is
    /// rejected; it must finish or time out first.
    pub async fn announce(
        &self,
        author: &str,
        kind: &str,
        filename: &str,
        hash: &str,
    ) -> RelayResult<()> {
        Self::ensure_hash_safe(hash)?;
        if author.is_empty() {
            return Err(RelayError::EmptyAuthor);
        }

        match self.get(hash).await? {
            Some(entry) if entry.state == UploadState::Complete => {
                sqlx::query("INSERT INTO message_log (hash) VALUES (?)")
                    .bind(hash)
                    .execute(&*self.db)
                    .await?;
                info!("deduplicated announce for {}", hash);
                return Ok(());
            }
            Some(_) => return Err(RelayError::Duplicate(hash.to_string())),
            None => {}
        }

        match self.blobs.create(hash).await {
            Ok(()) => {}
            Err(BlobError::AlreadyExists(_)) => {
                // A sealed blob without an index row is an orphan from an
                // earlier crash. Replace it so the digest gets re-verified.
                self.blobs.delete(hash).await?;
                self.blobs.create(hash).await?;
            }
            Err(err) => return Err(err.into()),
        }

        let timestamp = self.now_ms();
        let insert = async {
            let mut tx = self.db.begin().await?;
            sqlx::query(
                "INSERT INTO messages (hash, author, kind, filename, timestamp, state)
                 VALUES (?, ?, ?, ?, ?, 'uploading')",
            )
            .bind(hash)
            .bind(author)
            .bind(kind)
            .bind(filename)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
            sqlx::query("INSERT INTO message_log (hash) VALUES (?)")
                .bind(hash)
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        }
        .await;

        match insert {
            Ok(()) => {
                debug!("announced message {} from {}", hash, author);
                Ok(())
            }
            Err(err) => {
                // No partial visible state: drop the blob we just opened.
                let _ = self.blobs.delete(hash).await;
                if is_unique_violation(&err) {
                    Err(RelayError::Duplicate(hash.to_string()))
                } else {
                    Err(RelayError::Sqlx(err))
                }
            }
        }
    }

    /// Append a decoded chunk to an announced upload. With `eof` set, seal
    /// the blob and verify its digest against the claimed hash.
    ///
    /// On mismatch the index entry and blob are removed; the log entry is
    /// left for the next sweep to prune, which is fine because readers
    /// filter on completeness.
    pub async fn push_chunk(&self, hash: &str, bytes: &[u8], eof: bool) -> RelayResult<ChunkOutcome> {
        Self::ensure_hash_safe(hash)?;

        let entry = self
            .get(hash)
            .await?
            .ok_or_else(|| RelayError::NotFound(hash.to_string()))?;
        if entry.state == UploadState::Complete {
            return Err(RelayError::Closed(hash.to_string()));
        }

        self.blobs.append(hash, bytes).await?;
        if !eof {
            return Ok(ChunkOutcome::Accepted);
        }

        let digest = self.blobs.seal(hash).await?;
        if digest == hash {
            let result = sqlx::query(
                "UPDATE messages SET state = 'complete' WHERE hash = ? AND state = 'uploading'",
            )
            .bind(hash)
            .execute(&*self.db)
            .await?;
            if result.rows_affected() == 0 {
                // Evicted while sealing; the payload has no owner anymore.
                let _ = self.blobs.delete(hash).await;
                return Err(RelayError::NotFound(hash.to_string()));
            }
            info!("message {} complete", hash);
            Ok(ChunkOutcome::Sealed)
        } else {
            // Blob first, index row second: while the row is still present
            // a re-announce for this hash is rejected as a duplicate, so it
            // can never open a fresh session only to have this cleanup
            // destroy it.
            self.blobs.delete(hash).await?;
            sqlx::query("DELETE FROM messages WHERE hash = ?")
                .bind(hash)
                .execute(&*self.db)
                .await?;
            warn!("discarded message {}: payload hashed to {}", hash, digest);
            Err(RelayError::HashMismatch {
                claimed: hash.to_string(),
                actual: digest,
            })
        }
    }

    /// The last `count` log entries in insertion order, narrowed to
    /// complete messages newer than `after`. A deduplicated message shows
    /// up once per announce.
    pub async fn list_since(&self, count: u32, after: i64) -> RelayResult<Vec<Message>> {
        let entries = sqlx::query_as::<_, Message>(
            "SELECT m.hash, m.author, m.kind, m.filename, m.timestamp, m.state
             FROM (SELECT seq, hash FROM message_log ORDER BY seq DESC LIMIT ?) AS l
             JOIN messages AS m ON m.hash = l.hash
             WHERE m.state = 'complete' AND m.timestamp > ?
             ORDER BY l.seq ASC",
        )
        .bind(count as i64)
        .bind(after)
        .fetch_all(&*self.db)
        .await?;
        Ok(entries)
    }

    /// Metadata plus an opened payload file for a complete message.
    pub async fn fetch(&self, hash: &str) -> RelayResult<(Message, File)> {
        Self::ensure_hash_safe(hash)?;

        let entry = self
            .get(hash)
            .await?
            .ok_or_else(|| RelayError::NotFound(hash.to_string()))?;
        if entry.state == UploadState::Uploading {
            return Err(RelayError::StillUploading(hash.to_string()));
        }

        let file = self.blobs.read(hash).await?;
        Ok((entry, file))
    }

    /// One sweep pass: evict uploading entries older than the timeout,
    /// then prune log entries whose hash no longer has an index row (this
    /// also clears rows left dangling by hash-mismatch failures).
    ///
    /// Index deletes and log pruning commit in one transaction so the two
    /// structures move together. Blob removal follows the commit; a crash
    /// in between leaves an orphan blob that announce replaces on reuse.
    ///
    /// Returns the number of evicted entries.
    pub async fn sweep_stale(&self) -> RelayResult<usize> {
        let cutoff = self.now_ms() - self.upload_timeout_ms;
        let candidates: Vec<String> = self
            .snapshot()
            .await?
            .into_iter()
            .filter(|m| m.state == UploadState::Uploading && m.timestamp < cutoff)
            .map(|m| m.hash)
            .collect();

        self.evict_candidates(&candidates).await
    }

    /// Evict the given hashes, skipping any that completed between the
    /// snapshot and this transaction: the guarded DELETE affects no row for
    /// those, and only hashes whose row was actually removed lose their
    /// blob. A completed entry keeps its payload no matter how stale the
    /// snapshot that nominated it.
    async fn evict_candidates(&self, candidates: &[String]) -> RelayResult<usize> {
        let mut tx = self.db.begin().await?;
        let mut evicted = Vec::new();
        for hash in candidates {
            let result = sqlx::query("DELETE FROM messages WHERE hash = ? AND state = 'uploading'")
                .bind(hash)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                evicted.push(hash.clone());
            }
        }
        let pruned = sqlx::query("DELETE FROM message_log WHERE hash NOT IN (SELECT hash FROM messages)")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for hash in &evicted {
            if let Err(err) = self.blobs.delete(hash).await {
                warn!("failed to remove blob for evicted message {}: {}", hash, err);
            }
        }

        if !evicted.is_empty() || pruned.rows_affected() > 0 {
            info!(
                evicted = evicted.len(),
                pruned_log_entries = pruned.rows_affected(),
                "sweep pass finished"
            );
        }
        Ok(evicted.len())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::io::AsyncReadExt;

    fn digest_of(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    async fn service() -> (RelayService, tempfile::TempDir) {
        // One connection so the in-memory database is shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory db");
        apply_schema(&pool).await.expect("apply schema");

        let dir = tempfile::tempdir().expect("create tempdir");
        let relay = RelayService::new(
            Arc::new(pool),
            BlobStore::new(dir.path()),
            Duration::from_secs(240),
        );
        (relay, dir)
    }

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.expect("read payload");
        buf
    }

    async fn backdate(relay: &RelayService, hash: &str, by_ms: i64) {
        sqlx::query("UPDATE messages SET timestamp = timestamp - ? WHERE hash = ?")
            .bind(by_ms)
            .bind(hash)
            .execute(&*relay.db)
            .await
            .expect("backdate entry");
    }

    async fn log_len(relay: &RelayService) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM message_log")
            .fetch_one(&*relay.db)
            .await
            .expect("count log entries")
    }

    #[tokio::test]
    async fn announce_push_fetch_roundtrip() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"hi");

        relay
            .announce("a", "text", "x.txt", &hash)
            .await
            .expect("announce");
        let outcome = relay.push_chunk(&hash, b"hi", true).await.expect("push");
        assert_eq!(outcome, ChunkOutcome::Sealed);

        let (meta, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(meta.author, "a");
        assert_eq!(meta.kind, "text");
        assert_eq!(meta.filename, "x.txt");
        assert_eq!(read_all(file).await, b"hi");

        let listed = relay.list_since(10, 0).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hash, hash);
    }

    #[tokio::test]
    async fn single_byte_chunks_verify() {
        let (relay, _dir) = service().await;
        let payload = b"chunked payload";
        let hash = digest_of(payload);

        relay
            .announce("a", "file", "p.bin", &hash)
            .await
            .expect("announce");
        for (i, byte) in payload.iter().enumerate() {
            let eof = i == payload.len() - 1;
            let outcome = relay
                .push_chunk(&hash, &[*byte], eof)
                .await
                .expect("push byte");
            assert_eq!(
                outcome,
                if eof { ChunkOutcome::Sealed } else { ChunkOutcome::Accepted }
            );
        }

        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, payload);
    }

    #[tokio::test]
    async fn hash_mismatch_discards_everything() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"expected");

        relay
            .announce("a", "text", "x.txt", &hash)
            .await
            .expect("announce");
        let err = relay
            .push_chunk(&hash, b"something else", true)
            .await
            .expect_err("mismatch must fail");
        assert!(matches!(err, RelayError::HashMismatch { .. }));

        assert!(relay.get(&hash).await.expect("get").is_none());
        assert!(matches!(
            relay.fetch(&hash).await,
            Err(RelayError::NotFound(_))
        ));

        // The dangling log entry survives until a sweep pass prunes it.
        assert_eq!(log_len(&relay).await, 1);
        relay.sweep_stale().await.expect("sweep");
        assert_eq!(log_len(&relay).await, 0);
    }

    #[tokio::test]
    async fn dedup_announce_reuses_payload() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"shared");

        relay
            .announce("a", "text", "one.txt", &hash)
            .await
            .expect("first announce");
        relay.push_chunk(&hash, b"shared", true).await.expect("push");

        // Second announce for the same content: no new session, one more
        // log entry pointing at the same payload.
        relay
            .announce("b", "text", "two.txt", &hash)
            .await
            .expect("dedup announce");

        let listed = relay.list_since(10, 0).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].hash, hash);
        assert_eq!(listed[1].hash, hash);

        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, b"shared");
    }

    #[tokio::test]
    async fn second_announce_while_uploading_is_rejected() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"in flight");

        relay
            .announce("a", "text", "x.txt", &hash)
            .await
            .expect("announce");
        assert!(matches!(
            relay.announce("b", "text", "y.txt", &hash).await,
            Err(RelayError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn listing_excludes_uploading_entries() {
        let (relay, _dir) = service().await;
        let done = digest_of(b"done");
        let pending = digest_of(b"pending");

        relay.announce("a", "text", "d.txt", &done).await.expect("announce");
        relay.push_chunk(&done, b"done", true).await.expect("push");
        relay
            .announce("a", "text", "p.txt", &pending)
            .await
            .expect("announce pending");

        let listed = relay.list_since(10, 0).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hash, done);
    }

    #[tokio::test]
    async fn listing_respects_window_and_after() {
        let (relay, _dir) = service().await;
        let first = digest_of(b"first");
        let second = digest_of(b"second");

        relay.announce("a", "text", "1.txt", &first).await.expect("announce");
        relay.push_chunk(&first, b"first", true).await.expect("push");
        relay.announce("a", "text", "2.txt", &second).await.expect("announce");
        relay.push_chunk(&second, b"second", true).await.expect("push");

        // Window of one keeps only the newest log entry.
        let windowed = relay.list_since(1, 0).await.expect("list");
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].hash, second);

        // An `after` beyond every timestamp filters everything out.
        let future = Utc::now().timestamp_millis() + 3_600_000;
        assert!(relay.list_since(10, future).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn fetch_during_upload_is_refused() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"later");

        relay.announce("a", "text", "l.txt", &hash).await.expect("announce");
        relay.push_chunk(&hash, b"lat", false).await.expect("push");

        assert!(matches!(
            relay.fetch(&hash).await,
            Err(RelayError::StillUploading(_))
        ));
    }

    #[tokio::test]
    async fn push_is_guarded_by_index_state() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"guarded");

        assert!(matches!(
            relay.push_chunk(&hash, b"x", false).await,
            Err(RelayError::NotFound(_))
        ));

        relay.announce("a", "text", "g.txt", &hash).await.expect("announce");
        relay.push_chunk(&hash, b"guarded", true).await.expect("push");

        assert!(matches!(
            relay.push_chunk(&hash, b"more", false).await,
            Err(RelayError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn announce_validates_inputs() {
        let (relay, _dir) = service().await;

        assert!(matches!(
            relay.announce("a", "text", "x.txt", "not-a-hash").await,
            Err(RelayError::InvalidHash)
        ));
        assert!(matches!(
            relay
                .announce("a", "text", "x.txt", &digest_of(b"ok").to_uppercase())
                .await,
            Err(RelayError::InvalidHash)
        ));
        assert!(matches!(
            relay.announce("", "text", "x.txt", &digest_of(b"ok")).await,
            Err(RelayError::EmptyAuthor)
        ));
    }

    #[tokio::test]
    async fn sweep_evicts_stalled_uploads() {
        let (relay, _dir) = service().await;
        let stale = digest_of(b"stale");

        relay.announce("a", "text", "s.txt", &stale).await.expect("announce");
        relay.push_chunk(&stale, b"sta", false).await.expect("push");
        backdate(&relay, &stale, 10 * 60 * 1000).await;

        let evicted = relay.sweep_stale().await.expect("sweep");
        assert_eq!(evicted, 1);

        assert!(relay.get(&stale).await.expect("get").is_none());
        assert!(matches!(
            relay.fetch(&stale).await,
            Err(RelayError::NotFound(_))
        ));
        assert!(relay.list_since(10, 0).await.expect("list").is_empty());
        assert_eq!(log_len(&relay).await, 0);

        // The hash is announceable again after eviction.
        relay.announce("a", "text", "s.txt", &stale).await.expect("re-announce");
    }

    #[tokio::test]
    async fn sweep_never_evicts_complete_messages() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"keeper");

        relay.announce("a", "text", "k.txt", &hash).await.expect("announce");
        relay.push_chunk(&hash, b"keeper", true).await.expect("push");
        backdate(&relay, &hash, 365 * 24 * 60 * 60 * 1000).await;

        let evicted = relay.sweep_stale().await.expect("sweep");
        assert_eq!(evicted, 0);

        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, b"keeper");
        assert_eq!(log_len(&relay).await, 1);
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_uploads() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"fresh");

        relay.announce("a", "text", "f.txt", &hash).await.expect("announce");
        relay.push_chunk(&hash, b"fre", false).await.expect("push");

        let evicted = relay.sweep_stale().await.expect("sweep");
        assert_eq!(evicted, 0);

        // The session is still usable afterwards.
        relay.push_chunk(&hash, b"sh", true).await.expect("finish");
        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, b"fresh");
    }

    #[tokio::test]
    async fn eviction_skips_entries_completed_after_snapshot() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"raced");

        relay.announce("a", "text", "r.txt", &hash).await.expect("announce");
        relay.push_chunk(&hash, b"ra", false).await.expect("push");
        backdate(&relay, &hash, 10 * 60 * 1000).await;

        // A sweep snapshot taken here would nominate the entry as stale.
        // The upload finishes before the eviction transaction runs.
        relay.push_chunk(&hash, b"ced", true).await.expect("finish");

        let evicted = relay
            .evict_candidates(&[hash.clone()])
            .await
            .expect("evict");
        assert_eq!(evicted, 0);

        // The completed entry keeps both its index row and its payload.
        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, b"raced");
        assert_eq!(log_len(&relay).await, 1);
    }

    #[tokio::test]
    async fn reannounce_after_mismatch_uploads_cleanly() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"take two");

        relay.announce("a", "text", "t.txt", &hash).await.expect("announce");
        let err = relay
            .push_chunk(&hash, b"wrong bytes", true)
            .await
            .expect_err("mismatch must fail");
        assert!(matches!(err, RelayError::HashMismatch { .. }));

        // The hash is immediately reusable and the retry's session is not
        // disturbed by the failed one's cleanup.
        relay.announce("a", "text", "t.txt", &hash).await.expect("re-announce");
        relay.push_chunk(&hash, b"take ", false).await.expect("push");
        relay.push_chunk(&hash, b"two", true).await.expect("finish");

        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, b"take two");
    }

    #[tokio::test]
    async fn announce_replaces_orphan_sealed_blob() {
        let (relay, _dir) = service().await;
        let hash = digest_of(b"recovered");

        // A sealed blob with no index row, as left by a crash between blob
        // seal and index commit. Its bytes do not even match its name.
        relay.blobs.create(&hash).await.expect("create orphan");
        relay.blobs.append(&hash, b"leftover junk").await.expect("fill orphan");
        relay.blobs.seal(&hash).await.expect("seal orphan");

        relay.announce("a", "text", "o.txt", &hash).await.expect("announce");
        relay
            .push_chunk(&hash, b"recovered", true)
            .await
            .expect("upload replacement");

        // The payload comes from the new verified upload, not the orphan.
        let (_, file) = relay.fetch(&hash).await.expect("fetch");
        assert_eq!(read_all(file).await, b"recovered");
    }
}
