//! Storage backends.
//!
//! Each backend implements [`FilesApi`](crate::FilesApi) over its own
//! substrate.

mod local;
mod memory;
pub mod object_store;
pub mod sandbox;

pub use local::{LocalBackend, LocalHandle};
pub use memory::{MemoryBackend, MemoryHandle};
pub use object_store::{
    MemoryObjectClient, ObjectClient, ObjectStoreBackend, ObjectStoreOptions, DEFAULT_PART_SIZE,
};
pub use sandbox::{MemorySandbox, SandboxBackend, SandboxDir};
