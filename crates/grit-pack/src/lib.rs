//! Pack file format and layered object database for grit.
//!
//! The pack container is byte-for-byte git pack v2: `"PACK"` magic, version,
//! object count, entries (zlib payloads, optionally delta-compressed against
//! a base named by relative offset or by id), and a trailing SHA-1 over
//! every preceding byte.
//!
//! # Architecture
//!
//! - **PackWriter** — builds packs, selecting delta bases from a sliding
//!   window of recently added objects
//! - **PackReader** — random-access reads using a [`PackIndex`], resolving
//!   bounded delta chains
//! - **PackParser** — incremental decode of a network-fed pack stream with
//!   a running checksum
//! - **PackIndex** — fan-out table + sorted ids for O(log n) lookups
//! - **ObjectDatabase** — loose storage layered under a
//!   most-recently-added-first pack list, with `pack_and_prune`

pub mod delta;
pub mod entry;
pub mod error;
pub mod index;
pub mod odb;
pub mod parser;
pub mod reader;
pub mod writer;

pub use delta::{apply_delta, encode_delta};
pub use entry::EntryType;
pub use error::{PackError, PackResult};
pub use index::PackIndex;
pub use odb::{ObjectDatabase, PackSummary};
pub use parser::{PackParser, ParsedPack};
pub use reader::PackReader;
pub use writer::PackWriter;
