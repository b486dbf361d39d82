//! Local filesystem backend.
//!
//! Virtual paths map onto real paths under a root directory. Normalized
//! virtual paths carry no `..`; symlinks are followed only while they stay
//! under the root, and anything that would leave it fails with
//! [`VfsError::PathEscapesRoot`].

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{VfsError, VfsResult};
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

/// Errors that mean "nothing there" when probing a path.
fn is_absent(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

/// Fail if the existing part of `full` resolves outside `root`.
///
/// Walks up to the deepest ancestor that exists, so paths about to be
/// created are checked against the directory they will land in. A dangling
/// symlink counts as escaping.
async fn confine(root: &Path, full: &Path) -> VfsResult<()> {
    let root = fs::canonicalize(root)
        .await
        .unwrap_or_else(|_| root.to_path_buf());
    let mut current = full;
    loop {
        match fs::canonicalize(current).await {
            Ok(real) if real.starts_with(&root) => return Ok(()),
            Ok(_) => return Err(VfsError::path_escapes_root(full.display().to_string())),
            Err(e) if is_absent(&e) => {
                if fs::symlink_metadata(current).await.is_ok() {
                    return Err(VfsError::path_escapes_root(full.display().to_string()));
                }
                match current.parent() {
                    Some(parent) if parent.starts_with(&root) => current = parent,
                    _ => return Ok(()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/data`, then `/docs/a.txt` is `/srv/data/docs/a.txt`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory.
    ///
    /// The root is canonicalized when it already exists so symlinked roots
    /// (e.g. macOS `/tmp` -> `/private/tmp`) behave.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Real path for a virtual path, without touching the filesystem.
    pub fn resolve(&self, path: &VfsPath) -> PathBuf {
        path.segments()
            .fold(self.root.clone(), |full, segment| full.join(segment))
    }

    /// Real path for a virtual path whose symlinks, if any, stay under the
    /// root.
    pub async fn resolve_confined(&self, path: &VfsPath) -> VfsResult<PathBuf> {
        let full = self.resolve(path);
        confine(&self.root, &full).await?;
        Ok(full)
    }

    /// Real path for an entry that is acted on without following it, such
    /// as a symlink being removed or moved. Only its parent is confined.
    async fn resolve_entry(&self, path: &VfsPath) -> VfsResult<PathBuf> {
        self.resolve_confined(&path.parent()).await?;
        Ok(self.resolve(path))
    }

    fn metadata_to_info(path: VfsPath, meta: &std::fs::Metadata) -> FileInfo {
        let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if meta.is_dir() {
            FileInfo::directory(path, mtime)
        } else {
            FileInfo::file(path, meta.len(), mtime)
        }
    }

    async fn copy_tree(&self, from: PathBuf, to: PathBuf) -> VfsResult<()> {
        let mut pending = vec![(from, to)];
        while let Some((src, dst)) = pending.pop() {
            fs::create_dir_all(&dst).await?;
            let mut reader = fs::read_dir(&src).await?;
            while let Some(entry) = reader.next_entry().await? {
                let target = dst.join(entry.file_name());
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    if file_type.is_symlink() {
                        confine(&self.root, &entry.path()).await?;
                    }
                    fs::copy(entry.path(), &target).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FilesApi for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn list(&self, path: &VfsPath, options: ListOptions) -> EntryStream<'_> {
        let path = path.clone();
        entry_stream(try_stream! {
            // Worklist instead of recursion keeps deep trees off the stack.
            let mut pending = vec![path];
            while let Some(dir) = pending.pop() {
                let full = self.resolve_confined(&dir).await?;
                let mut reader = match fs::read_dir(full).await {
                    Err(e) if is_absent(&e) => continue,
                    other => other?,
                };
                while let Some(entry) = reader.next_entry().await? {
                    check_signal(options.signal.as_ref())?;
                    let name = match entry.file_name().into_string() {
                        Ok(name) => name,
                        Err(raw) => {
                            tracing::warn!(dir = %dir, name = ?raw, "skipping entry with non-UTF-8 name");
                            continue;
                        }
                    };
                    let child = dir.join(name);
                    let meta = match entry.metadata().await {
                        // Removed between readdir and stat.
                        Err(e) if is_absent(&e) => continue,
                        other => other?,
                    };
                    let info = Self::metadata_to_info(child.clone(), &meta);
                    if options.recursive && info.is_dir() {
                        pending.push(child);
                    }
                    yield info;
                }
            }
        })
    }

    async fn stats(&self, path: &VfsPath) -> VfsResult<Option<FileInfo>> {
        if path.is_root() {
            return Ok(Some(FileInfo::implicit_directory(VfsPath::root())));
        }
        match fs::metadata(self.resolve_confined(path).await?).await {
            Ok(meta) => Ok(Some(Self::metadata_to_info(path.clone(), &meta))),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, path: &VfsPath) -> VfsResult<bool> {
        let full = self.resolve_entry(path).await?;
        if path.is_root() {
            let mut removed = false;
            let mut reader = fs::read_dir(&full).await?;
            while let Some(entry) = reader.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    fs::remove_dir_all(entry.path()).await?;
                } else {
                    fs::remove_file(entry.path()).await?;
                }
                removed = true;
            }
            return Ok(removed);
        }

        let meta = match fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if is_absent(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&full).await?;
        } else {
            fs::remove_file(&full).await?;
        }
        tracing::debug!(path = %path, "local remove");
        Ok(true)
    }

    async fn open(&self, path: &VfsPath) -> VfsResult<Box<dyn FileHandle>> {
        let full = self.resolve_confined(path).await?;
        let (file, size) = match fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => return Err(VfsError::is_a_directory(path.as_str())),
            Ok(meta) => (Some(fs::File::open(&full).await?), meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (None, 0),
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                return Err(VfsError::not_a_directory(path.as_str()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Box::new(LocalHandle {
            path: path.clone(),
            root: self.root.clone(),
            full,
            file,
            writable: false,
            size,
        }))
    }

    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        let full = self.resolve_confined(path).await?;
        match fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(VfsError::already_exists(path.as_str())),
            Err(_) => {}
        }
        fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn copy(&self, from: &VfsPath, to: &VfsPath, options: CopyOptions) -> VfsResult<bool> {
        if from.is_ancestor_of(to) {
            return Err(VfsError::invalid_path(format!("cannot copy {from} into {to}")));
        }
        let Some(info) = self.stats(from).await? else {
            return Ok(false);
        };
        if from == to {
            return Ok(true);
        }

        let src = self.resolve_confined(from).await?;
        let dst = self.resolve_confined(to).await?;
        if info.is_file() {
            if let Some(existing) = self.stats(to).await? {
                if existing.is_dir() {
                    return Err(VfsError::is_a_directory(to.as_str()));
                }
            }
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&src, &dst).await?;
        } else if options.recursive {
            self.copy_tree(src, dst).await?;
        } else {
            fs::create_dir_all(&dst).await?;
        }
        Ok(true)
    }

    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<bool> {
        check_move(from, to)?;
        if self.stats(from).await?.is_none() {
            return Ok(false);
        }

        let src = self.resolve_entry(from).await?;
        let dst = self.resolve_entry(to).await?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(src, &dst).await?;
        Ok(true)
    }
}

/// Handle on one real file.
///
/// The descriptor is opened read-only when the file exists and upgraded to
/// read-write on the first write.
#[derive(Debug)]
pub struct LocalHandle {
    path: VfsPath,
    root: PathBuf,
    full: PathBuf,
    file: Option<fs::File>,
    writable: bool,
    size: u64,
}

impl LocalHandle {
    async fn writable_file(&mut self) -> VfsResult<&mut fs::File> {
        if !self.writable || self.file.is_none() {
            // Links may have changed since open.
            confine(&self.root, &self.full).await?;
            if let Some(parent) = self.full.parent() {
                fs::create_dir_all(parent).await?;
            }
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.full)
                .await?;
            self.file = Some(file);
            self.writable = true;
        }
        self.file
            .as_mut()
            .ok_or_else(|| VfsError::other("file descriptor missing after open"))
    }
}

#[async_trait]
impl FileHandle for LocalHandle {
    fn path(&self) -> &VfsPath {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_stream(&self, options: ReadOptions) -> ByteStream<'_> {
        let full = self.full.clone();
        let size = self.size;
        byte_stream(try_stream! {
            if let Some((start, end)) = options.clamp(size) {
                let mut file = match fs::File::open(&full).await {
                    Err(e) if is_absent(&e) => None,
                    other => Some(other?),
                };
                if let Some(file) = file.as_mut() {
                    file.seek(SeekFrom::Start(start)).await?;
                    let mut remaining = end - start;
                    while remaining > 0 {
                        check_signal(options.signal.as_ref())?;
                        let mut chunk = vec![0u8; (remaining as usize).min(READ_CHUNK)];
                        let n = file.read(&mut chunk).await?;
                        if n == 0 {
                            break;
                        }
                        chunk.truncate(n);
                        remaining -= n as u64;
                        yield bytes::Bytes::from(chunk);
                    }
                }
            }
        })
    }

    async fn write_from(&mut self, mut data: ByteStream<'_>, options: WriteOptions) -> VfsResult<u64> {
        let start = options.start;
        let file = self.writable_file().await?;

        // Truncates at `start`, or zero-extends up to it.
        file.set_len(start).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            check_signal(options.signal.as_ref())?;
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        self.size = start + written;
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8], position: u64) -> VfsResult<usize> {
        if position >= self.size {
            return Ok(0);
        }
        let want = buf.len().min((self.size - position) as usize);
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        file.seek(SeekFrom::Start(position)).await?;
        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buf[filled..want]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    #[cfg(unix)]
    async fn chmod(&mut self, mode: u32) -> VfsResult<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(&self.full, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    #[cfg(unix)]
    async fn chown(&mut self, uid: u32, gid: u32) -> VfsResult<()> {
        let full = self.full.clone();
        tokio::task::spawn_blocking(move || std::os::unix::fs::chown(full, Some(uid), Some(gid)))
            .await
            .map_err(|e| VfsError::other(format!("chown task failed: {e}")))??;
        Ok(())
    }

    async fn close(&mut self) -> VfsResult<()> {
        if let Some(mut file) = self.file.take() {
            if self.writable {
                file.flush().await?;
            }
        }
        self.writable = false;
        Ok(())
    }
}
