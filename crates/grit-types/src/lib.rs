//! Core types shared across the grit object database and wire protocol.
//!
//! - [`ObjectId`] — fixed-width SHA-1 content address
//! - [`PersonIdent`] — author/committer identity with timestamp
//! - [`Config`] / [`CoreSettings`] — key/value configuration boundary

pub mod config;
pub mod error;
pub mod ident;
pub mod object_id;

pub use config::{Config, CoreSettings, MapConfig};
pub use error::TypeError;
pub use ident::PersonIdent;
pub use object_id::{ObjectId, OBJECT_ID_LEN};
