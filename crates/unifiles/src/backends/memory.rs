//! In-memory backend.
//!
//! Used for scratch space and testing. All data is ephemeral and private to
//! one backend instance.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::listing::DirectoryLister;
use crate::ops::{
    byte_stream, check_move, entry_stream, ByteStream, EntryStream, FileHandle, FilesApi,
};
use crate::path::VfsPath;
use crate::types::{
    check_signal, BackendKind, Capabilities, CopyOptions, FileInfo, ListOptions, ReadOptions,
    WriteOptions,
};

/// Chunk size for read streams.
const READ_CHUNK: usize = 64 * 1024;

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Bytes, last_modified: SystemTime },
    Directory { last_modified: SystemTime },
}

impl Entry {
    fn info(&self, path: &VfsPath) -> FileInfo {
        match self {
            Entry::File {
                data,
                last_modified,
            } => FileInfo::file(path.clone(), data.len() as u64, *last_modified),
            Entry::Directory { last_modified } => FileInfo::directory(path.clone(), *last_modified),
        }
    }
}

type Store = Arc<RwLock<BTreeMap<VfsPath, Entry>>>;

/// Entries at or below `path`, in key order.
fn range_below(entries: &BTreeMap<VfsPath, Entry>, path: &VfsPath) -> BTreeMap<VfsPath, Entry> {
    let prefix = path.child_prefix();
    let mut out: BTreeMap<VfsPath, Entry> = entries
        .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
        .take_while(|(key, _)| key.as_str().starts_with(prefix.as_str()))
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect();
    if let Some(own) = entries.get(path) {
        out.insert(path.clone(), own.clone());
    }
    out
}

fn has_descendant(entries: &BTreeMap<VfsPath, Entry>, path: &VfsPath) -> bool {
    let prefix = path.child_prefix();
    entries
        .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
        .next()
        .is_some_and(|(key, _)| key.as_str().starts_with(prefix.as_str()))
}

/// First ancestor of `path` that is stored as a file, if any.
fn file_ancestor(entries: &BTreeMap<VfsPath, Entry>, path: &VfsPath) -> Option<VfsPath> {
    let mut current = path.parent();
    while !current.is_root() {
        if let Some(Entry::File { .. }) = entries.get(&current) {
            return Some(current);
        }
        current = current.parent();
    }
    None
}

/// Refuse to place a file where a directory is, a directory where a file
/// is, or anything below a file.
fn check_target(
    entries: &BTreeMap<VfsPath, Entry>,
    to: &VfsPath,
    source_is_file: bool,
) -> VfsResult<()> {
    if let Some(file) = file_ancestor(entries, to) {
        return Err(VfsError::not_a_directory(file.as_str()));
    }
    let target_is_file = matches!(entries.get(to), Some(Entry::File { .. }));
    let target_is_dir = matches!(entries.get(to), Some(Entry::Directory { .. }))
        || has_descendant(entries, to);
    if source_is_file && target_is_dir {
        return Err(VfsError::is_a_directory(to.as_str()));
    }
    if !source_is_file && target_is_file {
        return Err(VfsError::not_a_directory(to.as_str()));
    }
    Ok(())
}

/// In-memory backend.
///
/// Files and explicit directory markers live in one ordered map keyed by
/// full path; every other directory is implied by the keys below it.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Store,
}

impl MemoryBackend {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries (files plus explicit directory markers).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl FilesApi for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn list(&self, path: &VfsPath, options: ListOptions) -> EntryStream<'_> {
        let path = path.clone();
        entry_stream(try_stream! {
            let snapshot = {
                let entries = self.entries.read();
                range_below(&entries, &path)
            };
            let mut lister = DirectoryLister::new(&path, options.recursive);
            for (key, entry) in snapshot.iter() {
                check_signal(options.signal.as_ref())?;
                let found = lister.accept(entry.info(key), |dir| {
                    snapshot.get(dir).map(|marker| marker.info(dir))
                });
                for info in found {
                    yield info;
                }
            }
        })
    }

    async fn stats(&self, path: &VfsPath) -> VfsResult<Option<FileInfo>> {
        if path.is_root() {
            return Ok(Some(FileInfo::implicit_directory(VfsPath::root())));
        }
        let entries = self.entries.read();
        if let Some(entry) = entries.get(path) {
            return Ok(Some(entry.info(path)));
        }
        if has_descendant(&entries, path) {
            return Ok(Some(FileInfo::implicit_directory(path.clone())));
        }
        Ok(None)
    }

    async fn remove(&self, path: &VfsPath) -> VfsResult<bool> {
        let mut entries = self.entries.write();
        if path.is_root() {
            let existed = !entries.is_empty();
            entries.clear();
            return Ok(existed);
        }

        let mut removed = entries.remove(path).is_some();
        let prefix = path.child_prefix();
        let before = entries.len();
        entries.retain(|key, _| !key.as_str().starts_with(prefix.as_str()));
        removed |= entries.len() != before;

        tracing::debug!(path = %path, removed, "memory remove");
        Ok(removed)
    }

    async fn open(&self, path: &VfsPath) -> VfsResult<Box<dyn FileHandle>> {
        if path.is_root() {
            return Err(VfsError::is_a_directory(path.as_str()));
        }
        let entries = self.entries.read();
        let size = match entries.get(path) {
            Some(Entry::File { data, .. }) => data.len() as u64,
            Some(Entry::Directory { .. }) => return Err(VfsError::is_a_directory(path.as_str())),
            None if has_descendant(&entries, path) => {
                return Err(VfsError::is_a_directory(path.as_str()));
            }
            None => 0,
        };
        if let Some(file) = file_ancestor(&entries, path) {
            return Err(VfsError::not_a_directory(file.as_str()));
        }

        Ok(Box::new(MemoryHandle {
            entries: Arc::clone(&self.entries),
            path: path.clone(),
            size,
        }))
    }

    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        if path.is_root() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        if let Some(file) = file_ancestor(&entries, path) {
            return Err(VfsError::not_a_directory(file.as_str()));
        }
        match entries.get(path) {
            Some(Entry::File { .. }) => Err(VfsError::already_exists(path.as_str())),
            Some(Entry::Directory { .. }) => Ok(()),
            None => {
                entries.insert(
                    path.clone(),
                    Entry::Directory {
                        last_modified: SystemTime::now(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn copy(&self, from: &VfsPath, to: &VfsPath, options: CopyOptions) -> VfsResult<bool> {
        if from == to {
            return Ok(self.stats(from).await?.is_some());
        }
        if from.is_ancestor_of(to) {
            return Err(VfsError::invalid_path(format!("cannot copy {from} into {to}")));
        }

        let mut entries = self.entries.write();
        let now = SystemTime::now();
        match entries.get(from).cloned() {
            Some(Entry::File { data, .. }) => {
                check_target(&entries, to, true)?;
                entries.insert(
                    to.clone(),
                    Entry::File {
                        data,
                        last_modified: now,
                    },
                );
                return Ok(true);
            }
            Some(Entry::Directory { .. }) => {}
            None if has_descendant(&entries, from) => {}
            None => return Ok(false),
        }

        check_target(&entries, to, false)?;
        entries.insert(to.clone(), Entry::Directory { last_modified: now });
        if options.recursive {
            let below = range_below(&entries, from);
            for (key, entry) in below {
                if let Some(target) = key.rebase(from, to) {
                    entries.insert(target, entry);
                }
            }
        }
        Ok(true)
    }

    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<bool> {
        if from == to {
            return Ok(self.stats(from).await?.is_some());
        }
        check_move(from, to)?;

        let mut entries = self.entries.write();
        let below = range_below(&entries, from);
        if below.is_empty() {
            return Ok(false);
        }
        let source_is_file = matches!(entries.get(from), Some(Entry::File { .. }));
        check_target(&entries, to, source_is_file)?;
        let prefix = from.child_prefix();
        entries.remove(from);
        entries.retain(|key, _| !key.as_str().starts_with(prefix.as_str()));
        for (key, entry) in below {
            if let Some(target) = key.rebase(from, to) {
                entries.insert(target, entry);
            }
        }
        Ok(true)
    }
}

/// Handle on one path of a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryHandle {
    entries: Store,
    path: VfsPath,
    size: u64,
}

impl MemoryHandle {
    fn current_data(&self) -> Option<Bytes> {
        match self.entries.read().get(&self.path) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl FileHandle for MemoryHandle {
    fn path(&self) -> &VfsPath {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_stream(&self, options: ReadOptions) -> ByteStream<'_> {
        byte_stream(try_stream! {
            if let Some(data) = self.current_data() {
                let limit = self.size.min(data.len() as u64);
                if let Some((start, end)) = options.clamp(limit) {
                    let mut offset = start as usize;
                    let end = end as usize;
                    while offset < end {
                        check_signal(options.signal.as_ref())?;
                        let next = (offset + READ_CHUNK).min(end);
                        yield data.slice(offset..next);
                        offset = next;
                    }
                }
            }
        })
    }

    async fn write_from(&mut self, mut data: ByteStream<'_>, options: WriteOptions) -> VfsResult<u64> {
        let mut incoming = BytesMut::new();
        while let Some(chunk) = data.next().await {
            check_signal(options.signal.as_ref())?;
            incoming.extend_from_slice(&chunk?);
        }
        let written = incoming.len() as u64;
        let start = options.start as usize;

        let mut entries = self.entries.write();
        let existing = match entries.get(&self.path) {
            Some(Entry::File { data, .. }) => data.clone(),
            Some(Entry::Directory { .. }) => {
                return Err(VfsError::is_a_directory(self.path.as_str()));
            }
            None => Bytes::new(),
        };

        let mut content = BytesMut::with_capacity(start + incoming.len());
        content.extend_from_slice(&existing[..start.min(existing.len())]);
        content.resize(start, 0);
        content.extend_from_slice(&incoming);

        self.size = content.len() as u64;
        entries.insert(
            self.path.clone(),
            Entry::File {
                data: content.freeze(),
                last_modified: SystemTime::now(),
            },
        );
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8], position: u64) -> VfsResult<usize> {
        let Some(data) = self.current_data() else {
            return Ok(0);
        };
        let limit = self.size.min(data.len() as u64);
        if position >= limit {
            return Ok(0);
        }
        let start = position as usize;
        let count = buf.len().min(limit as usize - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    async fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}
