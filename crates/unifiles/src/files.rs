//! Backend-agnostic convenience wrapper.
//!
//! [`Files`] accepts raw strings, [`VfsPath`]s or [`FileInfo`]s anywhere a
//! path is expected, adds whole-file reads and writes, and fills in
//! `mkdir`/`copy`/`rename` from the required primitives when the backend
//! has no native version.

use async_stream::try_stream;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tracing::instrument;

use crate::error::{VfsError, VfsResult};
use crate::ops::{
    byte_stream, check_move, collect_bytes, collect_entries, once_bytes, ByteStream, EntryStream,
    FileHandle, FilesApi,
};
use crate::path::{PathLike, VfsPath};
use crate::types::{
    AbortSignal, BackendKind, Capabilities, CopyOptions, FileInfo, ListOptions, ReadOptions,
    WriteOptions,
};

/// Placeholder written by the `mkdir` fallback.
pub const KEEP_FILE: &str = ".keep";

/// Files API over any backend.
#[derive(Clone)]
pub struct Files {
    backend: Arc<dyn FilesApi>,
}

impl std::fmt::Debug for Files {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Files")
            .field("kind", &self.backend.kind())
            .field("capabilities", &self.backend.capabilities())
            .finish()
    }
}

/// Close `handle` no matter how `result` turned out. The operation's own
/// error wins over a close error.
async fn finish<T>(mut handle: Box<dyn FileHandle>, result: VfsResult<T>) -> VfsResult<T> {
    let closed = handle.close().await;
    let value = result?;
    closed?;
    Ok(value)
}

/// Open errors that mean there is no file to read.
fn nothing_to_read(err: &VfsError) -> bool {
    match err {
        VfsError::NotADirectory(_) => true,
        VfsError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
        ),
        other => other.is_not_found(),
    }
}

impl Files {
    pub fn new(backend: impl FilesApi + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_arc(backend: Arc<dyn FilesApi>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn FilesApi> {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn list(&self, path: impl PathLike, options: ListOptions) -> EntryStream<'_> {
        self.backend.list(&path.to_vfs_path(), options)
    }

    pub async fn stats(&self, path: impl PathLike) -> VfsResult<Option<FileInfo>> {
        self.backend.stats(&path.to_vfs_path()).await
    }

    pub async fn exists(&self, path: impl PathLike) -> VfsResult<bool> {
        Ok(self.stats(path).await?.is_some())
    }

    pub async fn remove(&self, path: impl PathLike) -> VfsResult<bool> {
        self.backend.remove(&path.to_vfs_path()).await
    }

    pub async fn open(&self, path: impl PathLike) -> VfsResult<Box<dyn FileHandle>> {
        self.backend.open(&path.to_vfs_path()).await
    }

    /// Stream a file's content. A missing file, or a path below a file,
    /// yields nothing.
    pub fn read(&self, path: impl PathLike, options: ReadOptions) -> ByteStream<'_> {
        let path = path.to_vfs_path();
        byte_stream(try_stream! {
            let opened = match self.backend.open(&path).await {
                Err(e) if nothing_to_read(&e) => None,
                other => Some(other?),
            };
            let Some(mut handle) = opened else {
                return;
            };
            let mut failure = None;
            {
                let mut chunks = handle.read_stream(options);
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(chunk) => yield chunk,
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            handle.close().await?;
            if let Some(e) = failure {
                Err::<(), _>(e)?;
            }
        })
    }

    /// Whole content of a file; empty if it does not exist.
    pub async fn read_file(&self, path: impl PathLike) -> VfsResult<Bytes> {
        collect_bytes(self.read(path, ReadOptions::default())).await
    }

    pub async fn read_to_string(&self, path: impl PathLike) -> VfsResult<String> {
        let path = path.to_vfs_path();
        let data = self.read_file(&path).await?;
        String::from_utf8(data.to_vec()).map_err(|e| VfsError::other(format!("{path}: {e}")))
    }

    /// Replace a file's content. Returns the number of bytes written.
    pub async fn write(&self, path: impl PathLike, data: impl Into<Bytes>) -> VfsResult<u64> {
        self.write_stream(path, once_bytes(data), WriteOptions::default())
            .await
    }

    pub async fn write_stream(
        &self,
        path: impl PathLike,
        data: ByteStream<'_>,
        options: WriteOptions,
    ) -> VfsResult<u64> {
        let mut handle = self.open(path).await?;
        let result = handle.write_from(data, options).await;
        finish(handle, result).await
    }

    pub async fn append(
        &self,
        path: impl PathLike,
        data: ByteStream<'_>,
        signal: Option<AbortSignal>,
    ) -> VfsResult<u64> {
        let mut handle = self.open(path).await?;
        let result = handle.append(data, signal).await;
        finish(handle, result).await
    }

    /// Create a directory. Without native support an empty `.keep` file
    /// makes it exist implicitly.
    #[instrument(level = "debug", skip_all, fields(path))]
    pub async fn mkdir(&self, path: impl PathLike) -> VfsResult<()> {
        let path = path.to_vfs_path();
        tracing::Span::current().record("path", path.as_str());
        if self.capabilities().mkdir {
            return self.backend.mkdir(&path).await;
        }
        match self.backend.stats(&path).await? {
            Some(info) if info.is_dir() => Ok(()),
            Some(_) => Err(VfsError::already_exists(path.as_str())),
            None => {
                self.write(path.join(KEEP_FILE), Bytes::new()).await?;
                Ok(())
            }
        }
    }

    /// Copy a file, or a directory when `options.recursive` is set.
    /// Returns `false` if `from` does not exist.
    #[instrument(level = "debug", skip_all, fields(from, to, recursive = options.recursive))]
    pub async fn copy(
        &self,
        from: impl PathLike,
        to: impl PathLike,
        options: CopyOptions,
    ) -> VfsResult<bool> {
        let (from, to) = (from.to_vfs_path(), to.to_vfs_path());
        let span = tracing::Span::current();
        span.record("from", from.as_str());
        span.record("to", to.as_str());
        if from.is_ancestor_of(&to) {
            return Err(VfsError::invalid_path(format!("cannot copy {from} into {to}")));
        }
        if self.capabilities().copy {
            return self.backend.copy(&from, &to, options).await;
        }
        self.copy_fallback(&from, &to, options).await
    }

    /// Move a file or directory. Returns `false` if `from` does not exist.
    /// Moving onto an ancestor of `from` is rejected.
    #[instrument(level = "debug", skip_all, fields(from, to))]
    pub async fn rename(&self, from: impl PathLike, to: impl PathLike) -> VfsResult<bool> {
        let (from, to) = (from.to_vfs_path(), to.to_vfs_path());
        let span = tracing::Span::current();
        span.record("from", from.as_str());
        span.record("to", to.as_str());
        check_move(&from, &to)?;
        if self.capabilities().rename {
            return self.backend.rename(&from, &to).await;
        }
        if from == to {
            return self.exists(&from).await;
        }
        if !self
            .copy_fallback(&from, &to, CopyOptions { recursive: true })
            .await?
        {
            return Ok(false);
        }
        self.backend.remove(&from).await?;
        Ok(true)
    }

    async fn copy_fallback(
        &self,
        from: &VfsPath,
        to: &VfsPath,
        options: CopyOptions,
    ) -> VfsResult<bool> {
        let Some(info) = self.backend.stats(from).await? else {
            return Ok(false);
        };
        if from == to {
            return Ok(true);
        }
        if info.is_file() {
            self.copy_file(from, to).await?;
            return Ok(true);
        }

        self.mkdir(to).await?;
        if options.recursive {
            // Snapshot first so new entries under `to` are never revisited.
            let entries =
                collect_entries(self.backend.list(from, ListOptions::recursive())).await?;
            for entry in entries {
                let Some(target) = entry.path.rebase(from, to) else {
                    continue;
                };
                if entry.is_dir() {
                    self.mkdir(&target).await?;
                } else {
                    self.copy_file(&entry.path, &target).await?;
                }
            }
        }
        tracing::debug!(%from, %to, "copied directory without native support");
        Ok(true)
    }

    async fn copy_file(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<u64> {
        let source = self.backend.open(from).await?;
        let mut target = match self.backend.open(to).await {
            Ok(target) => target,
            Err(e) => return finish(source, Err(e)).await,
        };
        let result = target
            .write_from(source.read_stream(ReadOptions::default()), WriteOptions::default())
            .await;
        let result = finish(target, result).await;
        finish(source, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryBackend, MemorySandbox, SandboxBackend};

    fn sandbox_files() -> Files {
        Files::new(SandboxBackend::new(Arc::new(MemorySandbox::new())))
    }

    /// A memory backend with every optional operation hidden.
    struct Minimal(MemoryBackend);

    #[async_trait::async_trait]
    impl FilesApi for Minimal {
        fn kind(&self) -> BackendKind {
            self.0.kind()
        }

        fn list(&self, path: &VfsPath, options: ListOptions) -> EntryStream<'_> {
            self.0.list(path, options)
        }

        async fn stats(&self, path: &VfsPath) -> VfsResult<Option<FileInfo>> {
            self.0.stats(path).await
        }

        async fn remove(&self, path: &VfsPath) -> VfsResult<bool> {
            self.0.remove(path).await
        }

        async fn open(&self, path: &VfsPath) -> VfsResult<Box<dyn FileHandle>> {
            self.0.open(path).await
        }
    }

    #[tokio::test]
    async fn test_mkdir_fallback_writes_keep_file() {
        let files = Files::new(Minimal(MemoryBackend::new()));
        assert!(!files.capabilities().mkdir);

        files.mkdir("/made").await.unwrap();
        assert!(files.stats("/made").await.unwrap().unwrap().is_dir());
        assert!(files.exists("/made/.keep").await.unwrap());

        files.write("/file", "x").await.unwrap();
        let err = files.mkdir("/file").await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_copy_fallback_recursive() {
        let files = sandbox_files();
        files.write("/src/a.txt", "a").await.unwrap();
        files.write("/src/nested/b.txt", "b").await.unwrap();

        assert!(
            files
                .copy("/src", "/dst", CopyOptions { recursive: true })
                .await
                .unwrap()
        );
        assert_eq!(files.read_to_string("/dst/a.txt").await.unwrap(), "a");
        assert_eq!(files.read_to_string("/dst/nested/b.txt").await.unwrap(), "b");
        assert_eq!(files.read_to_string("/src/a.txt").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_copy_fallback_non_recursive_directory() {
        let files = sandbox_files();
        files.write("/src/a.txt", "a").await.unwrap();

        assert!(files.copy("/src", "/dst", CopyOptions::default()).await.unwrap());
        assert!(files.stats("/dst").await.unwrap().unwrap().is_dir());
        assert!(!files.exists("/dst/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_move_fallback() {
        let files = sandbox_files();
        files.write("/old/f.txt", "data").await.unwrap();

        assert!(files.rename("/old", "/new").await.unwrap());
        assert!(!files.exists("/old").await.unwrap());
        assert_eq!(files.read_to_string("/new/f.txt").await.unwrap(), "data");
        assert!(!files.rename("/old", "/elsewhere").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_into_own_subtree_rejected() {
        let files = Files::new(MemoryBackend::new());
        files.write("/d/f", "x").await.unwrap();
        let err = files
            .copy("/d", "/d/inner", CopyOptions { recursive: true })
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_read_accepts_file_info() {
        let files = Files::new(MemoryBackend::new());
        files.write("/notes/today.md", "# today").await.unwrap();

        let entries = collect_entries(files.list("/notes", ListOptions::default()))
            .await
            .unwrap();
        let text = files.read_to_string(&entries[0]).await.unwrap();
        assert_eq!(text, "# today");
    }

    #[tokio::test]
    async fn test_append_via_wrapper() {
        let files = Files::new(MemoryBackend::new());
        files.append("/log", once_bytes("a"), None).await.unwrap();
        files.append("/log", once_bytes("bc"), None).await.unwrap();
        assert_eq!(files.read_to_string("/log").await.unwrap(), "abc");
    }
}
