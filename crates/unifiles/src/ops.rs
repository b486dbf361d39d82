//! The backend contract.
//!
//! [`FilesApi`] is what every storage substrate implements; [`FileHandle`]
//! is the random-access capability returned by [`FilesApi::open`].
//! Paths arriving here are already normalized.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{
    AbortSignal, BackendKind, Capabilities, CopyOptions, FileInfo, ListOptions, ReadOptions,
    WriteOptions,
};

/// Lazy, finite, non-restartable sequence of byte chunks.
pub type ByteStream<'a> = BoxStream<'a, VfsResult<Bytes>>;

/// Lazy, finite, non-restartable sequence of entries.
pub type EntryStream<'a> = BoxStream<'a, VfsResult<FileInfo>>;

/// Core files operations.
///
/// Absence is never an error: `stats` returns `None`, `list` yields nothing
/// and `remove` returns `false`.
#[async_trait]
pub trait FilesApi: Send + Sync {
    /// Which substrate this is.
    fn kind(&self) -> BackendKind;

    /// Optional operations implemented natively. Defaults to none.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Direct children of `path`, or every descendant when
    /// `options.recursive` is set. Each path is yielded exactly once.
    fn list(&self, path: &VfsPath, options: ListOptions) -> EntryStream<'_>;

    /// Metadata for `path`, `None` if nothing exists there.
    async fn stats(&self, path: &VfsPath) -> VfsResult<Option<FileInfo>>;

    /// Remove `path` and everything below it. Returns `true` iff something
    /// existed and was removed.
    async fn remove(&self, path: &VfsPath) -> VfsResult<bool>;

    /// Open a handle for random access. The file itself is created by the
    /// first successful write.
    async fn open(&self, path: &VfsPath) -> VfsResult<Box<dyn FileHandle>>;

    /// Create an explicit directory (and any missing ancestors).
    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::Unsupported("mkdir"))
    }

    /// Copy `from` to `to`. Returns `false` if `from` does not exist.
    async fn copy(&self, from: &VfsPath, to: &VfsPath, options: CopyOptions) -> VfsResult<bool> {
        let _ = (from, to, options);
        Err(VfsError::Unsupported("copy"))
    }

    /// Move `from` to `to`. Returns `false` if `from` does not exist.
    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<bool> {
        let _ = (from, to);
        Err(VfsError::Unsupported("rename"))
    }
}

/// Random-access handle on one path.
///
/// A handle is owned by whoever opened it. `close` is idempotent and must be
/// called on every code path; it releases file descriptors and in-flight
/// upload state.
#[async_trait]
pub trait FileHandle: Send + Sync {
    fn path(&self) -> &VfsPath;

    /// Current byte length, refreshed after every write.
    fn size(&self) -> u64;

    /// Chunks covering `[start, min(end, size))`. Empty if the range is
    /// degenerate or the file no longer exists.
    fn read_stream(&self, options: ReadOptions) -> ByteStream<'_>;

    /// Replace everything from `options.start` onward with `data`.
    /// Returns the number of bytes taken from `data`.
    async fn write_from(&mut self, data: ByteStream<'_>, options: WriteOptions) -> VfsResult<u64>;

    /// Write `data` at the current end of the file.
    async fn append(&mut self, data: ByteStream<'_>, signal: Option<AbortSignal>) -> VfsResult<u64> {
        let options = WriteOptions {
            start: self.size(),
            signal,
        };
        self.write_from(data, options).await
    }

    /// Positional read into `buf`. Returns the number of bytes read, 0 at
    /// or past the end; never reads past `size`.
    async fn read(&mut self, buf: &mut [u8], position: u64) -> VfsResult<usize>;

    async fn chmod(&mut self, mode: u32) -> VfsResult<()> {
        let _ = mode;
        Err(VfsError::Unsupported("chmod"))
    }

    async fn chown(&mut self, uid: u32, gid: u32) -> VfsResult<()> {
        let _ = (uid, gid);
        Err(VfsError::Unsupported("chown"))
    }

    async fn close(&mut self) -> VfsResult<()>;
}

impl std::fmt::Debug for dyn FileHandle + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", self.path())
            .field("size", &self.size())
            .finish()
    }
}

/// Box an entry stream, pinning down its item type.
pub(crate) fn entry_stream<'a, S>(entries: S) -> EntryStream<'a>
where
    S: Stream<Item = VfsResult<FileInfo>> + Send + 'a,
{
    Box::pin(entries)
}

/// Box a byte stream, pinning down its item type.
pub(crate) fn byte_stream<'a, S>(chunks: S) -> ByteStream<'a>
where
    S: Stream<Item = VfsResult<Bytes>> + Send + 'a,
{
    Box::pin(chunks)
}

/// Reject moves that nest `from` inside itself or replace one of its
/// ancestors.
pub(crate) fn check_move(from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
    if from.is_ancestor_of(to) {
        return Err(VfsError::invalid_path(format!("cannot move {from} into {to}")));
    }
    if to.is_ancestor_of(from) {
        return Err(VfsError::invalid_path(format!("cannot move {from} onto its ancestor {to}")));
    }
    Ok(())
}

/// A stream yielding `data` as a single chunk.
pub fn once_bytes(data: impl Into<Bytes>) -> ByteStream<'static> {
    let data = data.into();
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a byte stream into one buffer.
pub async fn collect_bytes(mut data: ByteStream<'_>) -> VfsResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = data.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Drain an entry stream into a vector.
pub async fn collect_entries(mut entries: EntryStream<'_>) -> VfsResult<Vec<FileInfo>> {
    let mut out = Vec::new();
    while let Some(entry) = entries.next().await {
        out.push(entry?);
    }
    Ok(out)
}
