//! Sandboxed-directory-handle backend.
//!
//! Walks a tree of [`SandboxDir`] handles one segment at a time. Reads go
//! through file snapshots, writes through a writable sink that commits on
//! close. Directory handles carry no timestamps, so directories always
//! report the epoch.

mod memory;
mod primitives;

pub use memory::{MemorySandbox, MemorySandboxFile, MemorySandboxWriter};
pub use primitives::{
    FileSnapshot, PermissionMode, PermissionState, SandboxDir, SandboxEntry, SandboxFile,
    SandboxWriter,
};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::ops::{byte_stream, entry_stream, ByteStream, EntryStream, FileHandle, FilesApi};
use crate::path::VfsPath;
use crate::types::{
    check_signal, BackendKind, Capabilities, FileInfo, ListOptions, ReadOptions, WriteOptions,
};

const READ_CHUNK: usize = 64 * 1024;

/// Look up a child, `None` when it is missing.
async fn child(dir: &dyn SandboxDir, name: &str) -> VfsResult<Option<SandboxEntry>> {
    match dir.get_file(name, false).await {
        Ok(file) => return Ok(Some(SandboxEntry::File(file))),
        Err(VfsError::IsADirectory(_)) => {}
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    }
    match dir.get_directory(name, false).await {
        Ok(dir) => Ok(Some(SandboxEntry::Directory(dir))),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Walk `segments` from `root`. Without `create`, a missing or non-directory
/// segment yields `None`; with it, missing directories are created and a
/// file in the way is `NotADirectory`.
async fn walk<'a>(
    root: &Arc<dyn SandboxDir>,
    segments: impl Iterator<Item = &'a str>,
    create: bool,
) -> VfsResult<Option<Arc<dyn SandboxDir>>> {
    let mut current = Arc::clone(root);
    let mut walked = VfsPath::root();
    for segment in segments {
        walked = walked.join(segment);
        current = match current.get_directory(segment, create).await {
            Ok(next) => next,
            Err(VfsError::NotADirectory(_)) if create => {
                return Err(VfsError::not_a_directory(walked.as_str()));
            }
            Err(VfsError::NotADirectory(_)) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
    }
    Ok(Some(current))
}

async fn lookup(root: &Arc<dyn SandboxDir>, path: &VfsPath) -> VfsResult<Option<SandboxEntry>> {
    if path.is_root() {
        return Ok(Some(SandboxEntry::Directory(Arc::clone(root))));
    }
    let Some(parent) = walk(root, path.parent().segments(), false).await? else {
        return Ok(None);
    };
    child(parent.as_ref(), path.file_name()).await
}

async fn entry_info(path: VfsPath, entry: &SandboxEntry) -> VfsResult<FileInfo> {
    match entry {
        SandboxEntry::File(file) => {
            let snapshot = file.snapshot().await?;
            Ok(FileInfo::file(path, snapshot.data.len() as u64, snapshot.last_modified))
        }
        SandboxEntry::Directory(_) => Ok(FileInfo::implicit_directory(path)),
    }
}

/// Backend over a sandboxed directory tree.
#[derive(Clone)]
pub struct SandboxBackend {
    root: Arc<dyn SandboxDir>,
}

impl std::fmt::Debug for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxBackend")
            .field("root", &self.root.name())
            .finish()
    }
}

impl SandboxBackend {
    pub fn new(root: Arc<dyn SandboxDir>) -> Self {
        Self { root }
    }

    /// Like [`new`](Self::new), but first makes sure `mode` access is
    /// granted, asking once if the answer is still open.
    pub async fn with_permission(root: Arc<dyn SandboxDir>, mode: PermissionMode) -> VfsResult<Self> {
        let mut state = root.query_permission(mode).await?;
        if state == PermissionState::Prompt {
            state = root.request_permission(mode).await?;
        }
        if state != PermissionState::Granted {
            return Err(VfsError::PermissionDenied(format!(
                "{mode:?} access to sandbox root refused"
            )));
        }
        Ok(Self::new(root))
    }
}

#[async_trait]
impl FilesApi for SandboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sandbox
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mkdir: true,
            ..Capabilities::default()
        }
    }

    fn list(&self, path: &VfsPath, options: ListOptions) -> EntryStream<'_> {
        let path = path.clone();
        entry_stream(try_stream! {
            if let Some(SandboxEntry::Directory(start)) = lookup(&self.root, &path).await? {
                let mut pending = vec![(path, start)];
                while let Some((dir_path, dir)) = pending.pop() {
                    for (name, entry) in dir.entries().await? {
                        check_signal(options.signal.as_ref())?;
                        let child_path = dir_path.join(&name);
                        let info = entry_info(child_path.clone(), &entry).await?;
                        if let SandboxEntry::Directory(sub) = entry {
                            if options.recursive {
                                pending.push((child_path, sub));
                            }
                        }
                        yield info;
                    }
                }
            }
        })
    }

    async fn stats(&self, path: &VfsPath) -> VfsResult<Option<FileInfo>> {
        match lookup(&self.root, path).await? {
            Some(entry) => Ok(Some(entry_info(path.clone(), &entry).await?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, path: &VfsPath) -> VfsResult<bool> {
        if path.is_root() {
            let entries = self.root.entries().await?;
            for (name, _) in &entries {
                self.root.remove_entry(name, true).await?;
            }
            return Ok(!entries.is_empty());
        }
        let Some(parent) = walk(&self.root, path.parent().segments(), false).await? else {
            return Ok(false);
        };
        match parent.remove_entry(path.file_name(), true).await {
            Ok(()) => {
                tracing::debug!(path = %path, "sandbox remove");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn open(&self, path: &VfsPath) -> VfsResult<Box<dyn FileHandle>> {
        if path.is_root() {
            return Err(VfsError::is_a_directory(path.as_str()));
        }
        // A file anywhere along the parent chain makes the path unusable.
        let mut walked = VfsPath::root();
        let mut current = Arc::clone(&self.root);
        for segment in path.parent().segments() {
            walked = walked.join(segment);
            match child(current.as_ref(), segment).await? {
                Some(SandboxEntry::Directory(next)) => current = next,
                Some(SandboxEntry::File(_)) => {
                    return Err(VfsError::not_a_directory(walked.as_str()));
                }
                None => {
                    return Ok(Box::new(SandboxHandle::new(Arc::clone(&self.root), path.clone(), 0)));
                }
            }
        }
        let size = match child(current.as_ref(), path.file_name()).await? {
            Some(SandboxEntry::File(file)) => file.snapshot().await?.data.len() as u64,
            Some(SandboxEntry::Directory(_)) => return Err(VfsError::is_a_directory(path.as_str())),
            None => 0,
        };
        Ok(Box::new(SandboxHandle::new(Arc::clone(&self.root), path.clone(), size)))
    }

    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        if path.is_root() {
            return Ok(());
        }
        let parent = walk(&self.root, path.parent().segments(), true)
            .await?
            .ok_or_else(|| VfsError::not_found(path.parent().as_str()))?;
        match parent.get_directory(path.file_name(), true).await {
            Ok(_) => Ok(()),
            Err(VfsError::NotADirectory(_)) => Err(VfsError::already_exists(path.as_str())),
            Err(e) => Err(e),
        }
    }
}

/// Handle on one path of a [`SandboxBackend`].
pub struct SandboxHandle {
    root: Arc<dyn SandboxDir>,
    path: VfsPath,
    size: u64,
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

impl SandboxHandle {
    fn new(root: Arc<dyn SandboxDir>, path: VfsPath, size: u64) -> Self {
        Self { root, path, size }
    }

    /// Current content, `None` once the file is gone.
    async fn snapshot(&self) -> VfsResult<Option<FileSnapshot>> {
        match lookup(&self.root, &self.path).await? {
            Some(SandboxEntry::File(file)) => Ok(Some(file.snapshot().await?)),
            _ => Ok(None),
        }
    }

    /// The file, created along with its parents if needed.
    async fn file_for_write(&self) -> VfsResult<Arc<dyn SandboxFile>> {
        let parent = walk(&self.root, self.path.parent().segments(), true)
            .await?
            .ok_or_else(|| VfsError::not_found(self.path.parent().as_str()))?;
        parent.get_file(self.path.file_name(), true).await
    }
}

#[async_trait]
impl FileHandle for SandboxHandle {
    fn path(&self) -> &VfsPath {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_stream(&self, options: ReadOptions) -> ByteStream<'_> {
        byte_stream(try_stream! {
            if let Some(snapshot) = self.snapshot().await? {
                let limit = self.size.min(snapshot.data.len() as u64);
                if let Some((start, end)) = options.clamp(limit) {
                    let mut offset = start as usize;
                    while offset < end as usize {
                        check_signal(options.signal.as_ref())?;
                        let next = (offset + READ_CHUNK).min(end as usize);
                        yield snapshot.data.slice(offset..next);
                        offset = next;
                    }
                }
            }
        })
    }

    async fn write_from(&mut self, mut data: ByteStream<'_>, options: WriteOptions) -> VfsResult<u64> {
        let file = self.file_for_write().await?;
        let mut writer = file.create_writable(true).await?;

        let mut written = 0u64;
        let result: VfsResult<()> = async {
            writer.truncate(options.start).await?;
            writer.seek(options.start).await?;
            while let Some(chunk) = data.next().await {
                check_signal(options.signal.as_ref())?;
                let chunk = chunk?;
                written += chunk.len() as u64;
                writer.write(chunk).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => writer.close().await?,
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(path = %self.path, error = %abort_err, "failed to abort sandbox write");
                }
                return Err(e);
            }
        }
        self.size = options.start + written;
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8], position: u64) -> VfsResult<usize> {
        let Some(snapshot) = self.snapshot().await? else {
            return Ok(0);
        };
        let limit = self.size.min(snapshot.data.len() as u64);
        if position >= limit {
            return Ok(0);
        }
        let start = position as usize;
        let count = buf.len().min(limit as usize - start);
        buf[..count].copy_from_slice(&snapshot.data[start..start + count]);
        Ok(count)
    }

    async fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}
