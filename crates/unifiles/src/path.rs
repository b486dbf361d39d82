//! Virtual paths.
//!
//! Every path handed to a backend is absolute, `/`-rooted, free of empty and
//! `.` segments and has no trailing slash (except the root itself). `..` is
//! resolved lexically and never climbs above `/`. Segments are opaque:
//! no case folding, no reserved names.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;

/// A normalized virtual path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VfsPath(String);

impl VfsPath {
    /// Normalize any string into a virtual path.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_path(raw.as_ref()))
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Append one or more segments (which may themselves contain `/`).
    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        Self(join_path(&[self.as_str(), segment.as_ref()]))
    }

    /// Parent directory; the root is its own parent.
    pub fn parent(&self) -> Self {
        Self(dirname(&self.0))
    }

    /// Last segment, or the empty string for the root.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Extension of the last segment including the dot, or `""`.
    pub fn extension(&self) -> &str {
        extname_of(self.file_name())
    }

    /// Prefix shared by every descendant: `path + "/"`, or `/` for root.
    pub fn child_prefix(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Path segments, root yields nothing.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// True if `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &VfsPath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.child_prefix())
    }

    /// Path of `self` relative to `base`, without a leading slash.
    ///
    /// Returns `Some("")` when both are equal and `None` when `self` is not
    /// inside `base`.
    pub fn relative_to(&self, base: &VfsPath) -> Option<&str> {
        if self == base {
            return Some("");
        }
        self.0.strip_prefix(&base.child_prefix())
    }

    /// Re-root `self` from `from` to `to`, e.g. `/a/x/y` from `/a` to `/b`
    /// gives `/b/x/y`.
    pub fn rebase(&self, from: &VfsPath, to: &VfsPath) -> Option<VfsPath> {
        self.relative_to(from).map(|rel| to.join(rel))
    }
}

impl Default for VfsPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VfsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for VfsPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VfsPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for VfsPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for VfsPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for VfsPath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Serialize for VfsPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VfsPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

/// Anything that names a path: a raw string, a [`VfsPath`], or a reference
/// object such as [`crate::FileInfo`] carrying one.
pub trait PathLike {
    fn to_vfs_path(&self) -> VfsPath;
}

impl PathLike for str {
    fn to_vfs_path(&self) -> VfsPath {
        VfsPath::new(self)
    }
}

impl PathLike for String {
    fn to_vfs_path(&self) -> VfsPath {
        VfsPath::new(self)
    }
}

impl PathLike for VfsPath {
    fn to_vfs_path(&self) -> VfsPath {
        self.clone()
    }
}

impl<T: PathLike + ?Sized> PathLike for &T {
    fn to_vfs_path(&self) -> VfsPath {
        (**self).to_vfs_path()
    }
}

/// Normalize a raw path string.
pub fn normalize_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(raw.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Join segments with `/` and normalize the result.
pub fn join_path(segments: &[&str]) -> String {
    normalize_path(&segments.join("/"))
}

/// Parent of a path. Top-level paths and the root give `/`.
pub fn dirname(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Last segment of a path, with `suffix` stripped when it matches and is
/// not the whole name.
pub fn basename(path: &str, suffix: Option<&str>) -> String {
    let normalized = normalize_path(path);
    let name = match normalized.rfind('/') {
        Some(idx) => &normalized[idx + 1..],
        None => normalized.as_str(),
    };
    match suffix {
        Some(suffix) if !suffix.is_empty() && name.len() > suffix.len() => {
            name.strip_suffix(suffix).unwrap_or(name).to_string()
        }
        _ => name.to_string(),
    }
}

/// Extension of the last segment including the leading dot, or `""`.
/// Dotfiles such as `.bashrc` have no extension.
pub fn extname(path: &str) -> String {
    extname_of(&basename(path, None)).to_string()
}

fn extname_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("//a///b/"), "/a/b");
        assert_eq!(normalize_path("/a/./b/."), "/a/b");
        assert_eq!(normalize_path("/a/b/../c"), "/a/c");
        assert_eq!(normalize_path("/../../x"), "/x");
    }

    #[test]
    fn test_case_is_preserved() {
        assert_ne!(VfsPath::new("/A"), VfsPath::new("/a"));
        assert_eq!(VfsPath::new("/CON/aux"), "/CON/aux");
    }

    #[test]
    fn test_join() {
        assert_eq!(join_path(&["/a", "b", "c.txt"]), "/a/b/c.txt");
        assert_eq!(join_path(&["/", "/x/"]), "/x");
        assert_eq!(VfsPath::root().join("d/e"), "/d/e");
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("/top"), "/");
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(VfsPath::new("/a/b").parent(), "/a");
    }

    #[test]
    fn test_basename_and_extname() {
        assert_eq!(basename("/a/b/file.txt", None), "file.txt");
        assert_eq!(basename("/a/b/file.txt", Some(".txt")), "file");
        assert_eq!(basename("/a/.txt", Some(".txt")), ".txt");
        assert_eq!(basename("/", None), "");
        assert_eq!(extname("/a/b/file.tar.gz"), ".gz");
        assert_eq!(extname("/a/.bashrc"), "");
        assert_eq!(extname("/a/noext"), "");
        assert_eq!(VfsPath::new("/x/y.md").extension(), ".md");
    }

    #[test]
    fn test_relationships() {
        let a = VfsPath::new("/a");
        let nested = VfsPath::new("/a/b/c");
        assert!(a.is_ancestor_of(&nested));
        assert!(!a.is_ancestor_of(&VfsPath::new("/ab")));
        assert!(VfsPath::root().is_ancestor_of(&a));
        assert_eq!(nested.relative_to(&a), Some("b/c"));
        assert_eq!(a.relative_to(&a), Some(""));
        assert_eq!(nested.rebase(&a, &VfsPath::new("/z")), Some(VfsPath::new("/z/b/c")));
        assert_eq!(VfsPath::root().child_prefix(), "/");
        assert_eq!(a.child_prefix(), "/a/");
    }

    #[test]
    fn test_serde_normalizes() {
        let path: VfsPath = serde_json::from_str("\"a//b/./c/\"").unwrap();
        assert_eq!(path, "/a/b/c");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"/a/b/c\"");
    }
}
