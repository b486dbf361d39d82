//! Object-store backend.
//!
//! Maps paths onto keys of a flat, S3-style key space: `/a/b.txt` becomes
//! `{prefix}a/b.txt`. Directories exist only as `key/` markers written by
//! `mkdir`, or implicitly through the keys below them. Writes go through
//! multipart uploads so no more than one part is ever held in memory.

mod client;
mod handle;
mod memory_client;

pub use client::{
    BodyStream, ClientError, ClientResult, CompletedPart, ListPage, ObjectClient, ObjectMeta,
};
pub use handle::ObjectStoreHandle;
pub use memory_client::{ClientCounters, MemoryObjectClient};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::listing::DirectoryLister;
use crate::ops::{check_move, entry_stream, EntryStream, FileHandle, FilesApi};
use crate::path::VfsPath;
use crate::types::{
    check_signal, BackendKind, Capabilities, CopyOptions, FileInfo, ListOptions,
};

/// Default multipart part size, the S3 minimum.
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Tuning for [`ObjectStoreBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreOptions {
    /// Key prefix all paths live under, e.g. `tenant-a/`. Empty for the
    /// whole bucket.
    pub prefix: String,
    /// Bytes per multipart part.
    pub part_size: usize,
}

impl Default for ObjectStoreOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl ObjectStoreOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }
}

/// Backend over an [`ObjectClient`].
#[derive(Clone)]
pub struct ObjectStoreBackend {
    client: Arc<dyn ObjectClient>,
    prefix: String,
    part_size: usize,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("prefix", &self.prefix)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreBackend {
    pub fn new(client: Arc<dyn ObjectClient>, options: ObjectStoreOptions) -> Self {
        let trimmed = options.prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self {
            client,
            prefix,
            part_size: options.part_size.max(1),
        }
    }

    pub fn client(&self) -> &Arc<dyn ObjectClient> {
        &self.client
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Object key for `path`. The root maps to the bare prefix.
    pub fn key_for(&self, path: &VfsPath) -> String {
        format!("{}{}", self.prefix, path.as_str().trim_start_matches('/'))
    }

    /// Key prefix shared by everything below `path`.
    fn dir_prefix(&self, path: &VfsPath) -> String {
        if path.is_root() {
            self.prefix.clone()
        } else {
            format!("{}/", self.key_for(path))
        }
    }

    fn path_for(&self, key: &str) -> Option<VfsPath> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        let rest = rest.trim_end_matches('/');
        (!rest.is_empty()).then(|| VfsPath::new(rest))
    }

    fn object_info(&self, meta: ObjectMeta) -> Option<FileInfo> {
        let path = self.path_for(&meta.key)?;
        if meta.key.ends_with('/') {
            Some(FileInfo::directory(path, meta.last_modified))
        } else {
            Some(FileInfo::file(path, meta.size, meta.last_modified).with_mime_type(meta.content_type))
        }
    }

    async fn head(&self, key: &str) -> VfsResult<Option<ObjectMeta>> {
        match self.client.head_object(key).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every key starting with `prefix`, across all pages.
    async fn keys_below(&self, prefix: &str) -> VfsResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let page = self.client.list_objects(prefix, None, token).await?;
            keys.extend(page.objects.into_iter().map(|meta| meta.key));
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(keys),
            }
        }
    }

    fn mkdir_marker(&self, path: &VfsPath) -> String {
        format!("{}/", self.key_for(path))
    }
}

#[async_trait]
impl FilesApi for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn list(&self, path: &VfsPath, options: ListOptions) -> EntryStream<'_> {
        let path = path.clone();
        entry_stream(try_stream! {
            let prefix = self.dir_prefix(&path);
            // A shallow listing lets the service roll subdirectories up
            // instead of paging through everything below them.
            let delimiter = (!options.recursive).then_some("/");
            let mut lister = DirectoryLister::new(&path, options.recursive);
            let mut token = None;
            loop {
                check_signal(options.signal.as_ref())?;
                let page = self
                    .client
                    .list_objects(&prefix, delimiter, token.take())
                    .await
                    .map_err(VfsError::from)?;
                let mut entries: Vec<FileInfo> = page
                    .objects
                    .into_iter()
                    .filter(|meta| meta.key != prefix)
                    .filter_map(|meta| self.object_info(meta))
                    .collect();
                for common in page.common_prefixes {
                    let Some(dir) = self.path_for(&common) else {
                        continue;
                    };
                    // The rolled-up prefix is also the marker key.
                    let info = match self.head(&common).await? {
                        Some(marker) => FileInfo::directory(dir, marker.last_modified),
                        None => FileInfo::implicit_directory(dir),
                    };
                    entries.push(info);
                }
                // Markers sort before their contents, so a directory with a
                // marker is already seen by the time its children arrive.
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                for info in entries {
                    for found in lister.accept(info, |_| None) {
                        yield found;
                    }
                }
                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        })
    }

    async fn stats(&self, path: &VfsPath) -> VfsResult<Option<FileInfo>> {
        if path.is_root() {
            return Ok(Some(FileInfo::implicit_directory(VfsPath::root())));
        }
        let key = self.key_for(path);
        if let Some(meta) = self.head(&key).await? {
            return Ok(Some(
                FileInfo::file(path.clone(), meta.size, meta.last_modified)
                    .with_mime_type(meta.content_type),
            ));
        }
        let marker = self.mkdir_marker(path);
        if let Some(meta) = self.head(&marker).await? {
            return Ok(Some(FileInfo::directory(path.clone(), meta.last_modified)));
        }
        let page = self.client.list_objects(&marker, None, None).await?;
        if !page.objects.is_empty() {
            return Ok(Some(FileInfo::implicit_directory(path.clone())));
        }
        Ok(None)
    }

    async fn remove(&self, path: &VfsPath) -> VfsResult<bool> {
        let mut removed = false;
        if !path.is_root() {
            let key = self.key_for(path);
            if self.head(&key).await?.is_some() {
                self.client.delete_object(&key).await?;
                removed = true;
            }
        }
        // Collect first; deleting while paging would shift the pages.
        let keys = self.keys_below(&self.dir_prefix(path)).await?;
        for key in &keys {
            self.client.delete_object(key).await?;
        }
        removed |= !keys.is_empty();
        tracing::debug!(path = %path, removed, "object store remove");
        Ok(removed)
    }

    async fn open(&self, path: &VfsPath) -> VfsResult<Box<dyn FileHandle>> {
        let size = match self.stats(path).await? {
            Some(info) if info.is_dir() => return Err(VfsError::is_a_directory(path.as_str())),
            Some(info) => info.size,
            None => 0,
        };
        Ok(Box::new(ObjectStoreHandle::new(
            Arc::clone(&self.client),
            self.key_for(path),
            path.clone(),
            size,
            self.part_size,
        )))
    }

    async fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        if path.is_root() {
            return Ok(());
        }
        if self.head(&self.key_for(path)).await?.is_some() {
            return Err(VfsError::already_exists(path.as_str()));
        }
        self.client
            .put_object(&self.mkdir_marker(path), Bytes::new(), None)
            .await?;
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
        if info.is_file() {
            if self.stats(to).await?.is_some_and(|target| target.is_dir()) {
                return Err(VfsError::is_a_directory(to.as_str()));
            }
            self.client
                .copy_object(&self.key_for(from), &self.key_for(to))
                .await?;
            return Ok(true);
        }

        self.mkdir(to).await?;
        if options.recursive {
            let source_prefix = self.dir_prefix(from);
            let target_prefix = self.dir_prefix(to);
            for key in self.keys_below(&source_prefix).await? {
                let target = format!("{target_prefix}{}", &key[source_prefix.len()..]);
                self.client.copy_object(&key, &target).await?;
            }
        }
        Ok(true)
    }

    async fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<bool> {
        check_move(from, to)?;
        if from == to {
            return Ok(self.stats(from).await?.is_some());
        }
        if !self.copy(from, to, CopyOptions { recursive: true }).await? {
            return Ok(false);
        }
        self.remove(from).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::collect_entries;

    fn backend(prefix: &str) -> (Arc<MemoryObjectClient>, ObjectStoreBackend) {
        let client = Arc::new(MemoryObjectClient::new().with_page_size(2));
        let fs = ObjectStoreBackend::new(
            client.clone(),
            ObjectStoreOptions::default().with_prefix(prefix),
        );
        (client, fs)
    }

    #[test]
    fn test_key_mapping() {
        let (_, fs) = backend("/tenant/");
        assert_eq!(fs.key_for(&VfsPath::new("/a/b.txt")), "tenant/a/b.txt");
        assert_eq!(fs.key_for(&VfsPath::root()), "tenant/");
        assert_eq!(fs.path_for("tenant/a/"), Some(VfsPath::new("/a")));
        assert_eq!(fs.path_for("other/a"), None);
    }

    #[tokio::test]
    async fn test_list_across_pages_with_markers() {
        let (client, fs) = backend("");
        client.insert("docs/", Bytes::new(), None);
        client.insert("docs/a.md", &b"a"[..], Some("text/markdown"));
        client.insert("docs/b.md", &b"b"[..], None);
        client.insert("docs/deep/c.md", &b"c"[..], None);
        client.insert("top.txt", &b"t"[..], None);

        let root = collect_entries(fs.list(&VfsPath::root(), ListOptions::default()))
            .await
            .unwrap();
        let names: Vec<_> = root.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(names, vec!["/docs", "/top.txt"]);
        assert_ne!(root[0].last_modified, std::time::SystemTime::UNIX_EPOCH);

        let docs = collect_entries(fs.list(&VfsPath::new("/docs"), ListOptions::default()))
            .await
            .unwrap();
        let names: Vec<_> = docs.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(names, vec!["/docs/a.md", "/docs/b.md", "/docs/deep"]);
        assert_eq!(docs[0].mime_type.as_deref(), Some("text/markdown"));
        assert!(docs[2].is_dir());
    }

    #[tokio::test]
    async fn test_stats_kinds() {
        let (client, fs) = backend("p");
        client.insert("p/file", &b"xyz"[..], None);
        client.insert("p/implicit/child", &b""[..], None);
        fs.mkdir(&VfsPath::new("/explicit")).await.unwrap();

        let file = fs.stats(&VfsPath::new("/file")).await.unwrap().unwrap();
        assert!(file.is_file());
        assert_eq!(file.size, 3);

        let explicit = fs.stats(&VfsPath::new("/explicit")).await.unwrap().unwrap();
        assert!(explicit.is_dir());
        assert_ne!(explicit.last_modified, std::time::SystemTime::UNIX_EPOCH);

        let implicit = fs.stats(&VfsPath::new("/implicit")).await.unwrap().unwrap();
        assert!(implicit.is_dir());
        assert_eq!(implicit.last_modified, std::time::SystemTime::UNIX_EPOCH);

        assert!(fs.stats(&VfsPath::new("/missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_directory_removes_everything_below() {
        let (client, fs) = backend("");
        for key in ["d/", "d/a", "d/b", "d/c/e", "dx"] {
            client.insert(key, Bytes::new(), None);
        }
        assert!(fs.remove(&VfsPath::new("/d")).await.unwrap());
        assert_eq!(client.keys(), vec!["dx".to_string()]);
        assert!(!fs.remove(&VfsPath::new("/d")).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let (client, fs) = backend("");
        client.insert("src/a", &b"1"[..], None);
        client.insert("src/n/b", &b"2"[..], None);

        assert!(fs.rename(&VfsPath::new("/src"), &VfsPath::new("/dst")).await.unwrap());
        assert!(client.object("dst/a").is_some());
        assert!(client.object("dst/n/b").is_some());
        assert!(fs.stats(&VfsPath::new("/src")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shallow_list_rolls_up_subtrees() {
        let (client, fs) = backend("");
        for i in 0..10 {
            client.insert(format!("big/{i}"), &b"x"[..], None);
        }
        client.insert("top", &b"t"[..], None);
        client.reset_counters();

        let root = collect_entries(fs.list(&VfsPath::root(), ListOptions::default()))
            .await
            .unwrap();
        let names: Vec<_> = root.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(names, vec!["/big", "/top"]);
        assert!(root[0].is_dir());
        // One page despite a page size of two and eleven keys.
        assert_eq!(client.counters().list_objects, 1);

        let all = collect_entries(fs.list(&VfsPath::root(), ListOptions::recursive()))
            .await
            .unwrap();
        assert_eq!(all.len(), 12);
    }

    #[tokio::test]
    async fn test_copy_file_onto_directory_rejected() {
        let (client, fs) = backend("");
        client.insert("dir/child", &b"c"[..], None);
        client.insert("file", &b"f"[..], None);

        let err = fs
            .copy(&VfsPath::new("/file"), &VfsPath::new("/dir"), CopyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::IsADirectory(_)));
        let err = fs
            .rename(&VfsPath::new("/file"), &VfsPath::new("/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::IsADirectory(_)));
        assert_eq!(client.keys(), vec!["dir/child".to_string(), "file".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_onto_ancestor_rejected() {
        let (client, fs) = backend("");
        client.insert("a/b/b/x", &b"x"[..], None);

        let err = fs
            .rename(&VfsPath::new("/a/b"), &VfsPath::new("/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));
        assert_eq!(client.object("a/b/b/x").unwrap(), &b"x"[..]);
    }
}
