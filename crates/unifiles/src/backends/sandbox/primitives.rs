//! Handle primitives of a sandboxed directory tree.
//!
//! These mirror what a browser exposes for origin-private or user-picked
//! directories: handles are looked up one path segment at a time, files
//! are read through immutable snapshots and written through a writable
//! sink that only becomes visible when closed.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::VfsResult;

/// Access level asked of the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    Read,
    ReadWrite,
}

/// Answer to a permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// The user has not decided yet; a request will ask.
    Prompt,
}

/// A child of a directory.
#[derive(Clone)]
pub enum SandboxEntry {
    File(Arc<dyn SandboxFile>),
    Directory(Arc<dyn SandboxDir>),
}

impl std::fmt::Debug for SandboxEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxEntry::File(file) => f.debug_tuple("File").field(&file.name()).finish(),
            SandboxEntry::Directory(dir) => f.debug_tuple("Directory").field(&dir.name()).finish(),
        }
    }
}

/// Immutable view of a file's content at one point in time.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub data: Bytes,
    pub last_modified: SystemTime,
}

/// Directory handle.
///
/// Lookups fail with `NotFound` when the child is missing and `create` is
/// false, with `NotADirectory` when `get_directory` hits a file, and with
/// `IsADirectory` when `get_file` hits a directory.
#[async_trait]
pub trait SandboxDir: Send + Sync {
    fn name(&self) -> &str;

    async fn get_directory(&self, name: &str, create: bool) -> VfsResult<Arc<dyn SandboxDir>>;

    async fn get_file(&self, name: &str, create: bool) -> VfsResult<Arc<dyn SandboxFile>>;

    /// Children in name order.
    async fn entries(&self) -> VfsResult<Vec<(String, SandboxEntry)>>;

    /// Removing a non-empty directory requires `recursive`.
    async fn remove_entry(&self, name: &str, recursive: bool) -> VfsResult<()>;

    async fn query_permission(&self, mode: PermissionMode) -> VfsResult<PermissionState> {
        let _ = mode;
        Ok(PermissionState::Granted)
    }

    async fn request_permission(&self, mode: PermissionMode) -> VfsResult<PermissionState> {
        self.query_permission(mode).await
    }
}

/// File handle.
#[async_trait]
pub trait SandboxFile: Send + Sync {
    fn name(&self) -> &str;

    /// Current content.
    async fn snapshot(&self) -> VfsResult<FileSnapshot>;

    /// Open a writable sink. With `keep_existing` the sink starts from the
    /// current content, otherwise from an empty file.
    async fn create_writable(&self, keep_existing: bool) -> VfsResult<Box<dyn SandboxWriter>>;
}

/// Writable sink. Nothing is visible to readers until `close`.
#[async_trait]
pub trait SandboxWriter: Send {
    async fn seek(&mut self, position: u64) -> VfsResult<()>;

    /// Write at the cursor and advance it.
    async fn write(&mut self, data: Bytes) -> VfsResult<()>;

    /// Resize to `size`, zero-filling when growing.
    async fn truncate(&mut self, size: u64) -> VfsResult<()>;

    /// Commit.
    async fn close(self: Box<Self>) -> VfsResult<()>;

    /// Discard everything written through this sink.
    async fn abort(self: Box<Self>) -> VfsResult<()>;
}
