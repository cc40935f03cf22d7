//! src/services/blob_store.rs
//!
//! BlobStore — raw message payloads on local disk, addressed by the
//! lowercase hex SHA-256 of their content. Unsealed blobs accumulate in a
//! temp file while chunks arrive; sealing fsyncs and atomically renames the
//! file beneath `base_path/{shard}/{shard}/{hash}`. Metadata lives
//! elsewhere (SQLite); this file only deals in bytes.

use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("no blob open or sealed for `{0}`")]
    NotFound(String),
    #[error("blob `{0}` is already sealed")]
    AlreadySealed(String),
    #[error("a sealed blob for `{0}` already exists")]
    AlreadyExists(String),
    #[error("an upload for `{0}` is already in progress")]
    UploadInProgress(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// An unsealed blob: the temp file receiving chunks plus the running
/// digest over everything written so far.
struct OpenBlob {
    file: File,
    hasher: Sha256,
    tmp_path: PathBuf,
}

/// Disk-backed content-addressed payload store.
///
/// One blob may be open per hash at a time; sealed blobs are immutable and
/// only ever removed by [`BlobStore::delete`].
#[derive(Clone)]
pub struct BlobStore {
    /// Root directory for payload files.
    pub base_path: PathBuf,

    /// Blobs currently receiving chunks, keyed by claimed hash. The single
    /// lock is held across appends; chunk writes are small.
    open: Arc<Mutex<HashMap<String, OpenBlob>>>,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Two-level shard identifiers for a hash.
    ///
    /// The hash is already uniformly distributed, so the leading hex bytes
    /// serve directly. Reduces file count per directory.
    fn shards(hash: &str) -> (&str, &str) {
        (&hash[0..2], &hash[2..4])
    }

    /// Final path of a sealed blob: `base_path/{shard}/{shard}/{hash}`.
    fn sealed_path(&self, hash: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(hash);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(hash);
        path
    }

    /// Temp path of an unsealed blob. Deterministic so stale temp files can
    /// be removed knowing only the hash.
    fn tmp_path(&self, hash: &str) -> PathBuf {
        self.base_path.join(format!(".upload-{}", hash))
    }

    /// Open an empty blob for `hash`.
    ///
    /// Fails with `AlreadyExists` if a sealed blob for this hash is on disk
    /// (dedup short-circuit: the caller reuses the existing payload) and
    /// with `UploadInProgress` if another session holds the hash open.
    pub async fn create(&self, hash: &str) -> BlobResult<()> {
        if fs::try_exists(self.sealed_path(hash)).await? {
            return Err(BlobError::AlreadyExists(hash.to_string()));
        }

        let mut open = self.open.lock().await;
        if open.contains_key(hash) {
            return Err(BlobError::UploadInProgress(hash.to_string()));
        }

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.tmp_path(hash);
        let file = File::create(&tmp_path).await?;
        open.insert(
            hash.to_string(),
            OpenBlob {
                file,
                hasher: Sha256::new(),
                tmp_path,
            },
        );
        debug!("opened blob {}", hash);
        Ok(())
    }

    /// Append a chunk to the unsealed blob for `hash`, feeding the running
    /// digest as a side effect.
    pub async fn append(&self, hash: &str, bytes: &[u8]) -> BlobResult<()> {
        {
            let mut open = self.open.lock().await;
            if let Some(blob) = open.get_mut(hash) {
                blob.hasher.update(bytes);
                blob.file.write_all(bytes).await?;
                return Ok(());
            }
        }

        if fs::try_exists(self.sealed_path(hash)).await? {
            Err(BlobError::AlreadySealed(hash.to_string()))
        } else {
            Err(BlobError::NotFound(hash.to_string()))
        }
    }

    /// Seal the unsealed blob for `hash` and return the digest of its full
    /// accumulated bytes.
    ///
    /// Flushes, fsyncs, and atomically renames the temp file into its
    /// sharded final location. Does not compare the digest to `hash` and
    /// does not delete on mismatch; that decision belongs to the caller.
    pub async fn seal(&self, hash: &str) -> BlobResult<String> {
        let blob = {
            let mut open = self.open.lock().await;
            open.remove(hash)
                .ok_or_else(|| BlobError::NotFound(hash.to_string()))?
        };

        let OpenBlob {
            mut file,
            hasher,
            tmp_path,
        } = blob;

        if let Err(err) = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await
        {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        drop(file);

        let sealed = self.sealed_path(hash);
        let parent = sealed.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        if let Err(err) = fs::create_dir_all(&parent).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &sealed).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        let digest = hex::encode(hasher.finalize());
        debug!("sealed blob {} (digest {})", hash, digest);
        Ok(digest)
    }

    /// Open a sealed blob for reading.
    ///
    /// Unsealed blobs are invisible here: a reader never sees partial data.
    pub async fn read(&self, hash: &str) -> BlobResult<File> {
        File::open(self.sealed_path(hash)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(hash.to_string())
            } else {
                BlobError::Io(err)
            }
        })
    }

    /// Remove every trace of `hash`: open handle, temp file, sealed file.
    /// Idempotent; missing pieces are not errors.
    pub async fn delete(&self, hash: &str) -> BlobResult<()> {
        {
            let mut open = self.open.lock().await;
            open.remove(hash);
        }

        for path in [self.tmp_path(hash), self.sealed_path(hash)] {
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed blob file {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(BlobError::Io(err)),
            }
        }

        let sealed = self.sealed_path(hash);
        if let Some(parent) = sealed.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }

        Ok(())
    }

    /// Recursively remove empty shard directories up to the store root.
    ///
    /// Stops on non-empty or missing directories and on unexpected I/O
    /// errors.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}
