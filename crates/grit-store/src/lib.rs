//! Content-addressed object storage for grit.
//!
//! This crate implements the object model and the loose half of a git-style
//! object database. Every object is immutable and identified by the SHA-1
//! of its canonical encoding (`"<type> <size>\0"` header plus payload).
//!
//! # Object Types
//!
//! - [`Blob`] -- raw content
//! - [`Tree`] -- sorted directory listing mapping names to object references
//! - [`Commit`] -- tree + parents + identities + message
//! - [`Tag`] -- annotated tag pointing at another object
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and staging
//! - [`LooseStore`] -- one zlib-compressed file per object under a sharded
//!   directory layout
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written; content-addressing guarantees it.
//! 2. Write-then-link: write the object bytes, verify the hash, then expose
//!    the id. Loose files are published by atomic rename.
//! 3. Concurrent reads are always safe. Concurrent writes of distinct
//!    content are safe; identical content is idempotent.
//! 4. A store must reject any object whose claimed id does not match the
//!    recomputed hash of its bytes.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod loose;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use loose::LooseStore;
pub use memory::InMemoryObjectStore;
pub use object::{
    Blob, Commit, EntryMode, GitObject, ObjectKind, StoredObject, Tag, Tree, TreeEntry,
};
pub use traits::ObjectStore;
