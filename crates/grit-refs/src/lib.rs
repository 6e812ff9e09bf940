//! Reference management: named pointers to objects.
//!
//! A ref is a mutable name (`refs/heads/main`, `refs/tags/v1.0.0`) pointing
//! at an [`ObjectId`]. Updates use compare-and-swap semantics: the caller
//! states the value it believes the ref currently has, and the update is
//! rejected with [`RefError::StaleRef`] if the stored value differs. This
//! makes concurrent pushes to the same ref resolve to exactly one winner.
//!
//! [`ObjectId`]: grit_types::ObjectId

pub mod error;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, RefResult};
pub use memory::InMemoryRefStore;
pub use names::validate_ref_name;
pub use traits::RefStore;
pub use types::{Ref, RefUpdate};
