use grit_types::ObjectId;

use crate::error::RefResult;
use crate::types::{Ref, RefUpdate};

/// Store of named refs with compare-and-swap updates.
///
/// Implementations must make [`apply`] atomic per ref: two racing updates
/// carrying the same expected old value resolve such that exactly one wins
/// and the other observes `StaleRef`. Locking is scoped to one repository's
/// ref namespace; unrelated repositories never contend.
///
/// [`apply`]: RefStore::apply
pub trait RefStore: Send + Sync {
    /// Read a ref's current target. `Ok(None)` if absent.
    fn read(&self, name: &str) -> RefResult<Option<ObjectId>>;

    /// List all refs whose name starts with `prefix`, sorted by name.
    fn list(&self, prefix: &str) -> RefResult<Vec<Ref>>;

    /// Apply one compare-and-swap update.
    ///
    /// Fails with `StaleRef` when the stored value does not match
    /// `update.expected_old`, and with `InvalidName` for malformed names.
    fn apply(&self, update: &RefUpdate) -> RefResult<()>;
}
