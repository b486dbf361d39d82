//! # unifiles
//!
//! One files API over several storage substrates: an in-memory map, the
//! local filesystem, sandboxed directory handles and S3-style object
//! storage.
//!
//! - [`FilesApi`] - the backend contract: list, stats, remove, open, plus
//!   optional native mkdir/copy/rename advertised through [`Capabilities`]
//! - [`FileHandle`] - random-access read, write-from-offset and append
//! - [`Files`] - wrapper adding whole-file reads and writes and falling
//!   back to the primitives for whatever a backend lacks
//!
//! ## Design Decisions
//!
//! - **Absence is not an error**: `stats` returns `None`, listings and
//!   reads of missing paths are empty, `remove`/`copy`/`rename` return
//!   `false`.
//! - **Virtual directories**: flat key spaces infer directories from the
//!   keys below them; explicit markers keep their own timestamp, implicit
//!   directories report `UNIX_EPOCH`.
//! - **Bounded object-store writes**: writes stream through multipart
//!   uploads holding at most one part in memory, and preserved prefixes
//!   are copied server-side.
//!
//! ```no_run
//! # async fn demo() -> unifiles::VfsResult<()> {
//! use unifiles::{Files, MemoryBackend};
//!
//! let files = Files::new(MemoryBackend::new());
//! files.write("/notes/today.md", "# today").await?;
//! assert!(files.exists("/notes").await?);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
mod error;
mod files;
mod listing;
mod ops;
pub mod path;
mod types;

pub use backends::{
    LocalBackend, MemoryBackend, MemoryObjectClient, MemorySandbox, ObjectClient,
    ObjectStoreBackend, ObjectStoreOptions, SandboxBackend,
};
pub use config::{BackendConfig, UnifilesConfig};
pub use error::{VfsError, VfsResult};
pub use files::{Files, KEEP_FILE};
pub use ops::{
    collect_bytes, collect_entries, once_bytes, ByteStream, EntryStream, FileHandle, FilesApi,
};
pub use path::{PathLike, VfsPath};
pub use types::{
    AbortSignal, BackendKind, Capabilities, CopyOptions, FileInfo, FileKind, ListOptions,
    ReadOptions, WriteOptions,
};
