//! Commit graph traversal for grit.
//!
//! [`RevWalk`] iterates commits reachable from a set of starting points,
//! children before parents, newest commit time first among commits whose
//! children have all been emitted. Starting points marked uninteresting
//! prune their entire ancestry from the walk, which is what fetch and push
//! negotiation use to compute "what the other side is missing".

pub mod error;
pub mod walker;

pub use error::{WalkError, WalkResult};
pub use walker::RevWalk;
