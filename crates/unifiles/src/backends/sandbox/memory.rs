//! In-process sandbox tree, standing in for origin-private storage.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use super::primitives::{
    FileSnapshot, PermissionMode, PermissionState, SandboxDir, SandboxEntry, SandboxFile,
    SandboxWriter,
};
use crate::error::{VfsError, VfsResult};

#[derive(Debug, Default)]
struct DirNode {
    children: RwLock<BTreeMap<String, Node>>,
}

#[derive(Debug, Clone)]
enum Node {
    File(Arc<RwLock<FileSnapshot>>),
    Dir(Arc<DirNode>),
}

/// Directory of an in-memory sandbox tree.
///
/// Cloning yields another handle on the same directory.
#[derive(Debug, Clone)]
pub struct MemorySandbox {
    name: String,
    node: Arc<DirNode>,
    permission: Arc<Mutex<PermissionState>>,
}

impl Default for MemorySandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySandbox {
    /// An empty tree with permission already granted.
    pub fn new() -> Self {
        Self::with_permission(PermissionState::Granted)
    }

    /// An empty tree whose root answers permission queries with `state`.
    /// A `Prompt` is granted by the first request.
    pub fn with_permission(state: PermissionState) -> Self {
        Self {
            name: String::new(),
            node: Arc::new(DirNode::default()),
            permission: Arc::new(Mutex::new(state)),
        }
    }

    fn child_dir(&self, name: &str, node: Arc<DirNode>) -> Arc<dyn SandboxDir> {
        Arc::new(MemorySandbox {
            name: name.to_string(),
            node,
            permission: Arc::clone(&self.permission),
        })
    }

    fn entry(&self, name: &str, node: &Node) -> SandboxEntry {
        match node {
            Node::File(content) => SandboxEntry::File(Arc::new(MemorySandboxFile {
                name: name.to_string(),
                content: Arc::clone(content),
            })),
            Node::Dir(dir) => SandboxEntry::Directory(self.child_dir(name, Arc::clone(dir))),
        }
    }
}

fn check_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VfsError::invalid_path(name));
    }
    Ok(())
}

#[async_trait]
impl SandboxDir for MemorySandbox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory(&self, name: &str, create: bool) -> VfsResult<Arc<dyn SandboxDir>> {
        check_name(name)?;
        let mut children = self.node.children.write();
        match children.get(name) {
            Some(Node::Dir(dir)) => Ok(self.child_dir(name, Arc::clone(dir))),
            Some(Node::File(_)) => Err(VfsError::not_a_directory(name)),
            None if create => {
                let dir = Arc::new(DirNode::default());
                children.insert(name.to_string(), Node::Dir(Arc::clone(&dir)));
                Ok(self.child_dir(name, dir))
            }
            None => Err(VfsError::not_found(name)),
        }
    }

    async fn get_file(&self, name: &str, create: bool) -> VfsResult<Arc<dyn SandboxFile>> {
        check_name(name)?;
        let mut children = self.node.children.write();
        let content = match children.get(name) {
            Some(Node::File(content)) => Arc::clone(content),
            Some(Node::Dir(_)) => return Err(VfsError::is_a_directory(name)),
            None if create => {
                let content = Arc::new(RwLock::new(FileSnapshot {
                    data: Bytes::new(),
                    last_modified: SystemTime::now(),
                }));
                children.insert(name.to_string(), Node::File(Arc::clone(&content)));
                content
            }
            None => return Err(VfsError::not_found(name)),
        };
        Ok(Arc::new(MemorySandboxFile {
            name: name.to_string(),
            content,
        }))
    }

    async fn entries(&self) -> VfsResult<Vec<(String, SandboxEntry)>> {
        let children = self.node.children.read();
        Ok(children
            .iter()
            .map(|(name, node)| (name.clone(), self.entry(name, node)))
            .collect())
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> VfsResult<()> {
        let mut children = self.node.children.write();
        match children.get(name) {
            None => Err(VfsError::not_found(name)),
            Some(Node::Dir(dir)) if !recursive && !dir.children.read().is_empty() => {
                Err(VfsError::other(format!("directory not empty: {name}")))
            }
            Some(_) => {
                children.remove(name);
                Ok(())
            }
        }
    }

    async fn query_permission(&self, mode: PermissionMode) -> VfsResult<PermissionState> {
        let _ = mode;
        Ok(*self.permission.lock())
    }

    async fn request_permission(&self, mode: PermissionMode) -> VfsResult<PermissionState> {
        let _ = mode;
        let mut state = self.permission.lock();
        if *state == PermissionState::Prompt {
            *state = PermissionState::Granted;
        }
        Ok(*state)
    }
}

/// File of an in-memory sandbox tree.
#[derive(Debug, Clone)]
pub struct MemorySandboxFile {
    name: String,
    content: Arc<RwLock<FileSnapshot>>,
}

#[async_trait]
impl SandboxFile for MemorySandboxFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn snapshot(&self) -> VfsResult<FileSnapshot> {
        Ok(self.content.read().clone())
    }

    async fn create_writable(&self, keep_existing: bool) -> VfsResult<Box<dyn SandboxWriter>> {
        let mut buffer = BytesMut::new();
        if keep_existing {
            buffer.extend_from_slice(&self.content.read().data);
        }
        Ok(Box::new(MemorySandboxWriter {
            target: Arc::clone(&self.content),
            buffer,
            position: 0,
        }))
    }
}

/// Writable sink over a swap buffer, swapped in on close.
#[derive(Debug)]
pub struct MemorySandboxWriter {
    target: Arc<RwLock<FileSnapshot>>,
    buffer: BytesMut,
    position: u64,
}

#[async_trait]
impl SandboxWriter for MemorySandboxWriter {
    async fn seek(&mut self, position: u64) -> VfsResult<()> {
        self.position = position;
        Ok(())
    }

    async fn write(&mut self, data: Bytes) -> VfsResult<()> {
        let start = self.position as usize;
        let end = start + data.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(&data);
        self.position = end as u64;
        Ok(())
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.buffer.resize(size as usize, 0);
        self.position = self.position.min(size);
        Ok(())
    }

    async fn close(self: Box<Self>) -> VfsResult<()> {
        let MemorySandboxWriter { target, buffer, .. } = *self;
        *target.write() = FileSnapshot {
            data: buffer.freeze(),
            last_modified: SystemTime::now(),
        };
        Ok(())
    }

    async fn abort(self: Box<Self>) -> VfsResult<()> {
        Ok(())
    }
}
