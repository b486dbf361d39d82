//! Virtual directories over flat key spaces.
//!
//! The memory and object-store backends keep entries keyed by full path.
//! Directories that have no marker of their own are inferred from the keys
//! below them. [`DirectoryLister`] turns a prefix-ordered run of stored
//! entries into the children (or descendants) of one directory, yielding
//! every resulting path exactly once.

use std::collections::HashSet;

use crate::path::VfsPath;
use crate::types::FileInfo;

/// Folds stored entries into a listing of one directory.
#[derive(Debug)]
pub(crate) struct DirectoryLister {
    dir: VfsPath,
    prefix: String,
    recursive: bool,
    seen: HashSet<String>,
}

impl DirectoryLister {
    pub(crate) fn new(dir: &VfsPath, recursive: bool) -> Self {
        Self {
            dir: dir.clone(),
            prefix: dir.child_prefix(),
            recursive,
            seen: HashSet::new(),
        }
    }

    /// Feed one stored entry and get back what it contributes to the listing.
    ///
    /// `explicit` looks up a stored directory marker so that an intermediate
    /// directory keeps its real timestamp when it has one; when it returns
    /// `None` the directory is reported as implicit.
    pub(crate) fn accept<F>(&mut self, stored: FileInfo, explicit: F) -> Vec<FileInfo>
    where
        F: Fn(&VfsPath) -> Option<FileInfo>,
    {
        let mut out = Vec::new();
        let suffix = match stored.path.as_str().strip_prefix(self.prefix.as_str()) {
            Some(suffix) if !suffix.is_empty() => suffix.to_string(),
            // Outside the directory, or the directory's own marker.
            _ => return out,
        };

        match suffix.find('/') {
            None => self.emit(stored, &mut out),
            Some(idx) if !self.recursive => {
                let intermediate = self.dir.join(&suffix[..idx]);
                let info = explicit(&intermediate)
                    .unwrap_or_else(|| FileInfo::implicit_directory(intermediate));
                self.emit(info, &mut out);
            }
            Some(_) => {
                let mut current = self.dir.clone();
                let segments: Vec<&str> = suffix.split('/').collect();
                for segment in &segments[..segments.len() - 1] {
                    current = current.join(segment);
                    if self.seen.contains(current.as_str()) {
                        continue;
                    }
                    let info = explicit(&current)
                        .unwrap_or_else(|| FileInfo::implicit_directory(current.clone()));
                    self.emit(info, &mut out);
                }
                self.emit(stored, &mut out);
            }
        }
        out
    }

    fn emit(&mut self, info: FileInfo, out: &mut Vec<FileInfo>) {
        if self.seen.insert(info.path.as_str().to_string()) {
            out.push(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn file(path: &str) -> FileInfo {
        FileInfo::file(VfsPath::new(path), 1, SystemTime::now())
    }

    fn names(infos: &[FileInfo]) -> Vec<&str> {
        infos.iter().map(|i| i.path.as_str()).collect()
    }

    #[test]
    fn test_direct_children_only() {
        let mut lister = DirectoryLister::new(&VfsPath::new("/d"), false);
        let mut out = Vec::new();
        for p in ["/d/sub/a.txt", "/d/sub/b.txt", "/d/x.txt", "/d/y.txt", "/other/z"] {
            out.extend(lister.accept(file(p), |_| None));
        }
        assert_eq!(names(&out), vec!["/d/sub", "/d/x.txt", "/d/y.txt"]);
        assert!(out[0].is_dir());
        assert_eq!(out[0].last_modified, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn test_recursive_yields_intermediates_once() {
        let mut lister = DirectoryLister::new(&VfsPath::root(), true);
        let mut out = Vec::new();
        for p in ["/a/b/c.txt", "/a/b/d.txt", "/a/e.txt"] {
            out.extend(lister.accept(file(p), |_| None));
        }
        assert_eq!(
            names(&out),
            vec!["/a", "/a/b", "/a/b/c.txt", "/a/b/d.txt", "/a/e.txt"]
        );
    }

    #[test]
    fn test_explicit_marker_keeps_timestamp() {
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        let marker = FileInfo::directory(VfsPath::new("/d/sub"), stamp);
        let mut lister = DirectoryLister::new(&VfsPath::new("/d"), false);
        let out = lister.accept(file("/d/sub/z.txt"), |p| {
            (p == &marker.path).then(|| marker.clone())
        });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].last_modified, stamp);

        // The marker itself arriving later is not yielded a second time.
        assert!(lister.accept(marker.clone(), |_| None).is_empty());
    }

    #[test]
    fn test_skips_own_marker() {
        let mut lister = DirectoryLister::new(&VfsPath::new("/d"), true);
        let own = FileInfo::directory(VfsPath::new("/d"), SystemTime::now());
        assert!(lister.accept(own, |_| None).is_empty());
    }
}
