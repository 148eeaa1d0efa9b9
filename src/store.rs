//! Storage of uploaded media.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::name;
use crate::{KnownSize, RangeBody};

/// A flat collection of named resources.
///
/// Names given to any method are untrusted: implementations must refuse names
/// that escape their storage root, and report them as absent.
pub trait FileStore: Send + Sync + 'static {
    /// Readable, seekable handle returned by [`FileStore::open`].
    type Body: RangeBody + Send + Unpin + 'static;

    /// Names of all stored resources, in ascending order.
    fn list(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Stores `stream` under `name`, replacing any previous resource. Returns
    /// the number of bytes written.
    fn save<S>(&self, name: &str, stream: S) -> impl Future<Output = Result<u64, StoreError>> + Send
    where
        S: Stream<Item = io::Result<Bytes>> + Send;

    /// Removes `name`. Returns whether anything was removed.
    fn delete(&self, name: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Current size of `name`, or `None` if it does not exist.
    fn size(&self, name: &str) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;

    fn exists(&self, name: &str) -> impl Future<Output = Result<bool, StoreError>> + Send {
        async move { Ok(self.size(name).await?.is_some()) }
    }

    /// Opens `name` for reading, or `None` if it does not exist.
    fn open(&self, name: &str) -> impl Future<Output = Result<Option<Self::Body>, StoreError>> + Send;
}

/// [`FileStore`] over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Uses `root` as the store directory, creating it if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| StoreError::io(&root, e))?;
        Ok(DiskStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name` inside the root, `None` if the name is unsafe.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let path = name::resolve(&self.root, name);
        if path.is_none() {
            debug!("refusing unsafe name {:?}", name);
        }
        path
    }

    /// Metadata of a regular file at `path`, `None` if absent or not a file.
    async fn file_metadata(path: &Path) -> Result<Option<std::fs::Metadata>, StoreError> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta)),
            Ok(_) => Ok(None),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

impl FileStore for DiskStore {
    type Body = KnownSize<File>;

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| StoreError::io(&self.root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(&self.root, e))? {
            let file_type = entry.file_type().await.map_err(|e| StoreError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if is_partial(&name) => continue,
                Ok(name) => names.push(name),
                Err(raw) => debug!("skipping non utf-8 file name {:?}", raw),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn save<S>(&self, name: &str, stream: S) -> Result<u64, StoreError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let path = self.resolve(name).ok_or_else(|| StoreError::InvalidName(name.to_string()))?;
        let part = partial_path(&path);

        let mut file = File::create(&part).await.map_err(|e| StoreError::io(&part, e))?;
        let result = write_stream(&mut file, stream, &part).await;
        drop(file);

        // the stored resource is only replaced once the whole upload arrived
        let result = match result {
            Ok(written) => fs::rename(&part, &path)
                .await
                .map(|()| written)
                .map_err(|e| StoreError::io(&path, e)),
            Err(e) => Err(e),
        };

        match result {
            Ok(written) => {
                info!("stored {} ({} bytes)", path.display(), written);
                Ok(written)
            }
            Err(e) => {
                warn!("discarding partial upload {}: {}", part.display(), e);
                if let Err(remove) = fs::remove_file(&part).await {
                    warn!("could not remove {}: {}", part.display(), remove);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let Some(path) = self.resolve(name) else {
            return Ok(false);
        };
        if Self::file_metadata(&path).await?.is_none() {
            return Ok(false);
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("deleted {}", path.display());
                Ok(true)
            }
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn size(&self, name: &str) -> Result<Option<u64>, StoreError> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        Ok(Self::file_metadata(&path).await?.map(|meta| meta.len()))
    }

    async fn open(&self, name: &str) -> Result<Option<KnownSize<File>>, StoreError> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let is_file = file.metadata().await.map_err(|e| StoreError::io(&path, e))?.is_file();
        if !is_file {
            return Ok(None);
        }

        KnownSize::file(file).await.map(Some).map_err(|e| StoreError::io(&path, e))
    }
}

async fn write_stream<S>(file: &mut File, stream: S, path: &Path) -> Result<u64, StoreError>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    pin_mut!(stream);

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(StoreError::Upload)?;
        file.write_all(&chunk).await.map_err(|e| StoreError::io(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| StoreError::io(path, e))?;

    Ok(written)
}

const PARTIAL_SUFFIX: &str = ".part";

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Hidden sibling of `path` that an upload is written to before it replaces
/// `path`. Unique per upload.
fn partial_path(path: &Path) -> PathBuf {
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{}.{}-{}{}", file_name, std::process::id(), seq, PARTIAL_SUFFIX))
}

fn is_partial(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

// ENOTDIR shows up when a path segment is a regular file
fn is_missing(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}
