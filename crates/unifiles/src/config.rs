//! TOML configuration.
//!
//! ```toml
//! [backend]
//! kind = "local"
//! root = "/srv/data"
//!
//! [object_store]
//! prefix = "tenant-a"
//! part_size = 5242880
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backends::{
    LocalBackend, MemoryBackend, MemorySandbox, ObjectClient, ObjectStoreBackend,
    ObjectStoreOptions, SandboxBackend,
};
use crate::error::{VfsError, VfsResult};
use crate::files::Files;
use crate::types::BackendKind;

/// Which backend to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Root directory, local backend only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            root: None,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifilesConfig {
    pub backend: BackendConfig,
    pub object_store: ObjectStoreOptions,
}

impl UnifilesConfig {
    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        toml::from_str(text).map_err(|e| VfsError::other(format!("invalid config: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| VfsError::other(format!("invalid config {}: {e}", path.display())))
    }

    pub fn to_toml_string(&self) -> VfsResult<String> {
        toml::to_string(self).map_err(|e| VfsError::other(format!("cannot encode config: {e}")))
    }

    /// Build a self-contained backend. The object store needs a client, see
    /// [`build_with_client`](Self::build_with_client).
    pub fn build(&self) -> VfsResult<Files> {
        match self.backend.kind {
            BackendKind::Memory => Ok(Files::new(MemoryBackend::new())),
            BackendKind::Local => {
                let root = self.backend.root.as_ref().ok_or_else(|| {
                    VfsError::invalid_path("backend.root is required for the local backend")
                })?;
                std::fs::create_dir_all(root)?;
                Ok(Files::new(LocalBackend::new(root)))
            }
            BackendKind::Sandbox => Ok(Files::new(SandboxBackend::new(Arc::new(
                MemorySandbox::new(),
            )))),
            BackendKind::ObjectStore => Err(VfsError::other(
                "the object_store backend needs an object client",
            )),
        }
    }

    /// Like [`build`](Self::build), with `client` backing the object store.
    pub fn build_with_client(&self, client: Arc<dyn ObjectClient>) -> VfsResult<Files> {
        match self.backend.kind {
            BackendKind::ObjectStore => {
                tracing::debug!(
                    prefix = %self.object_store.prefix,
                    part_size = self.object_store.part_size,
                    "building object store backend"
                );
                Ok(Files::new(ObjectStoreBackend::new(
                    client,
                    self.object_store.clone(),
                )))
            }
            _ => self.build(),
        }
    }
}
