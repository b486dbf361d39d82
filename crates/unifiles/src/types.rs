//! Core types shared by every backend.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

use crate::error::{VfsError, VfsResult};
use crate::path::{PathLike, VfsPath};

/// Cooperative cancellation signal accepted by long-running streams.
pub type AbortSignal = CancellationToken;

/// Fail with [`VfsError::Aborted`] if the signal has fired.
pub(crate) fn check_signal(signal: Option<&AbortSignal>) -> VfsResult<()> {
    match signal {
        Some(token) if token.is_cancelled() => Err(VfsError::Aborted),
        _ => Ok(()),
    }
}

/// Entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory, explicit or implicit.
    Directory,
}

impl FileKind {
    pub fn is_file(&self) -> bool {
        matches!(self, FileKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileKind::Directory)
    }
}

/// Metadata for one entry, returned uniformly by `list` and `stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub kind: FileKind,
    /// Last path segment.
    pub name: String,
    pub path: VfsPath,
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    /// `UNIX_EPOCH` for the root and for implicit directories.
    pub last_modified: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileInfo {
    /// Metadata for a file.
    pub fn file(path: VfsPath, size: u64, last_modified: SystemTime) -> Self {
        Self {
            kind: FileKind::File,
            name: path.file_name().to_string(),
            path,
            size,
            last_modified,
            mime_type: None,
        }
    }

    /// Metadata for a directory with a known modification time.
    pub fn directory(path: VfsPath, last_modified: SystemTime) -> Self {
        Self {
            kind: FileKind::Directory,
            name: path.file_name().to_string(),
            path,
            size: 0,
            last_modified,
            mime_type: None,
        }
    }

    /// Metadata for a directory that exists only because something below it
    /// does.
    pub fn implicit_directory(path: VfsPath) -> Self {
        Self::directory(path, SystemTime::UNIX_EPOCH)
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

impl PathLike for FileInfo {
    fn to_vfs_path(&self) -> VfsPath {
        self.path.clone()
    }
}

/// Options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Yield every descendant instead of direct children only.
    pub recursive: bool,
    pub signal: Option<AbortSignal>,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Byte range and cancellation for reads. `end` is exclusive and clamped to
/// the file size.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub start: u64,
    pub end: Option<u64>,
    pub signal: Option<AbortSignal>,
}

impl ReadOptions {
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
            signal: None,
        }
    }

    pub fn from(start: u64) -> Self {
        Self {
            start,
            end: None,
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Clamp to `[start, min(end, size))`; `None` when nothing is left.
    pub fn clamp(&self, size: u64) -> Option<(u64, u64)> {
        let end = self.end.map_or(size, |end| end.min(size));
        (self.start < end).then_some((self.start, end))
    }
}

/// Where a write starts. Content before `start` is kept, content at and
/// after `start` is replaced, and any gap past the current size is
/// zero-filled.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub start: u64,
    pub signal: Option<AbortSignal>,
}

impl WriteOptions {
    pub fn at(start: u64) -> Self {
        Self {
            start,
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Options for `copy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Copy directory contents as well as the directory itself.
    pub recursive: bool,
}

/// The closed set of storage substrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    Local,
    Sandbox,
    ObjectStore,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Local => "local",
            BackendKind::Sandbox => "sandbox",
            BackendKind::ObjectStore => "object_store",
        }
    }
}

/// Optional operations a backend implements natively. Anything left
/// `false` is synthesized by [`crate::Files`] from the required primitives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub mkdir: bool,
    pub copy: bool,
    pub rename: bool,
}

impl Capabilities {
    /// Every optional operation is native.
    pub fn all() -> Self {
        Self {
            mkdir: true,
            copy: true,
            rename: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_clamp() {
        assert_eq!(ReadOptions::range(90, 200).clamp(100), Some((90, 100)));
        assert_eq!(ReadOptions::from(200).clamp(100), None);
        assert_eq!(ReadOptions::range(5, 5).clamp(100), None);
        assert_eq!(ReadOptions::default().clamp(0), None);
        assert_eq!(ReadOptions::default().clamp(3), Some((0, 3)));
    }

    #[test]
    fn test_file_info_constructors() {
        let file = FileInfo::file(VfsPath::new("/a/b.txt"), 12, SystemTime::now());
        assert!(file.is_file());
        assert_eq!(file.name, "b.txt");

        let dir = FileInfo::implicit_directory(VfsPath::new("/a"));
        assert!(dir.is_dir());
        assert_eq!(dir.size, 0);
        assert_eq!(dir.last_modified, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_signal_check() {
        let token = AbortSignal::new();
        assert!(check_signal(Some(&token)).is_ok());
        token.cancel();
        assert!(check_signal(Some(&token)).unwrap_err().is_aborted());
        assert!(check_signal(None).is_ok());
    }
}
