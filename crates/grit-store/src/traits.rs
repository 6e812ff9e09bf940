use grit_types::ObjectId;

use crate::error::StoreResult;
use crate::object::StoredObject;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. Content-addressing guarantees this:
///   the same bytes always produce the same id.
/// - A store must never return an object whose recomputed hash disagrees
///   with the id it was looked up under.
/// - Writes are idempotent: inserting identical content twice yields the
///   same id and the second write is a no-op.
/// - Concurrent reads are always safe (objects are immutable).
/// - All I/O errors are propagated, never silently ignored.
pub trait ObjectStore: Send + Sync {
    /// Read an object by its content-addressed id.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    /// Returns `Err` on I/O failure or data corruption.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its content-addressed id.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    /// Check whether an object exists without inflating it.
    fn contains(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Delete an object by id. Returns `true` if the object existed.
    ///
    /// Intended for pruning after packing only. Deleting referenced objects
    /// can corrupt the repository.
    fn delete(&self, id: &ObjectId) -> StoreResult<bool>;
}
