//! Loose object storage: one zlib-compressed file per object.
//!
//! Objects live under `objects/<first 2 hex>/<remaining 38 hex>`. Files are
//! written to a temporary name and published by atomic rename, so readers
//! never observe a partially written object. Reads re-hash the inflated
//! bytes and reject anything that does not match the id it was looked up
//! under.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::debug;

use grit_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::traits::ObjectStore;

/// Filesystem-backed loose object store.
#[derive(Debug)]
pub struct LooseStore {
    root: PathBuf,
}

impl LooseStore {
    /// Open (creating if necessary) a loose store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory this store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// All object ids currently present, by scanning the shard directories.
    pub fn all_ids(&self) -> StoreResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name();
            let Some(prefix) = prefix.to_str() else {
                continue;
            };
            if prefix.len() != 2 {
                continue;
            }
            for entry in std::fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Ok(id) = ObjectId::from_hex(&format!("{prefix}{name}")) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ObjectStore for LooseStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        let path = self.path_for(id);
        let compressed = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut inflated = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| StoreError::CorruptObject {
                id: *id,
                reason: format!("inflate failed: {e}"),
            })?;

        // Corruption must never be masked: the inflated bytes must hash back
        // to the id they were looked up under.
        if ObjectId::hash_of(&inflated) != *id {
            return Err(StoreError::CorruptObject {
                id: *id,
                reason: "hash mismatch".to_string(),
            });
        }

        let obj = parse_loose(&inflated, id)?;
        Ok(Some(obj))
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if id.is_null() {
            return Err(StoreError::NullObjectId);
        }
        let path = self.path_for(&id);
        if path.exists() {
            // Idempotent: identical content is already durable.
            return Ok(id);
        }

        let shard = path.parent().expect("loose path has a shard directory");
        std::fs::create_dir_all(shard)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&object.header())?;
        encoder.write_all(&object.data)?;
        let compressed = encoder.finish()?;

        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.as_file().write_all(&compressed)?;
        tmp.as_file().sync_all()?;
        match tmp.persist(&path) {
            Ok(_) => {}
            // A concurrent writer of the same content won the rename race;
            // the durable state is identical either way.
            Err(e) if path.exists() => drop(e),
            Err(e) => return Err(e.error.into()),
        }

        debug!(id = %id.short_hex(), kind = %object.kind, size = object.size(), "wrote loose object");
        Ok(id)
    }

    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.path_for(id).exists())
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse `"<type> <size>\0"` framing from inflated loose bytes.
fn parse_loose(inflated: &[u8], id: &ObjectId) -> StoreResult<StoredObject> {
    let nul = inflated
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StoreError::CorruptObject {
            id: *id,
            reason: "missing header terminator".to_string(),
        })?;
    let header = std::str::from_utf8(&inflated[..nul]).map_err(|_| StoreError::CorruptObject {
        id: *id,
        reason: "non-utf8 header".to_string(),
    })?;
    let (kind_str, size_str) = header.split_once(' ').ok_or_else(|| StoreError::CorruptObject {
        id: *id,
        reason: "malformed header".to_string(),
    })?;
    let kind = ObjectKind::from_str_name(kind_str).ok_or_else(|| StoreError::CorruptObject {
        id: *id,
        reason: format!("unknown type {kind_str}"),
    })?;
    let size: usize = size_str.parse().map_err(|_| StoreError::CorruptObject {
        id: *id,
        reason: "non-numeric size".to_string(),
    })?;

    let data = &inflated[nul + 1..];
    if data.len() != size {
        return Err(StoreError::CorruptObject {
            id: *id,
            reason: format!("declared size {size}, payload {}", data.len()),
        });
    }
    Ok(StoredObject::new(kind, data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Blob;

    fn store() -> (tempfile::TempDir, LooseStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path().join("objects")).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_read_roundtrip() {
        let (_dir, store) = store();
        let obj = Blob::new(b"loose roundtrip".to_vec()).to_stored_object();
        let id = store.write(&obj).unwrap();

        let read = store.read(&id).unwrap().unwrap();
        assert_eq!(read, obj);
    }

    #[test]
    fn sharded_path_layout() {
        let (_dir, store) = store();
        let obj = Blob::new(b"shard me".to_vec()).to_stored_object();
        let id = store.write(&obj).unwrap();

        let hex = id.to_hex();
        let expected = store.root().join(&hex[..2]).join(&hex[2..]);
        assert!(expected.exists());
    }

    #[test]
    fn read_missing_returns_none() {
        let (_dir, store) = store();
        assert!(store.read(&ObjectId::hash_of(b"absent")).unwrap().is_none());
    }

    #[test]
    fn write_is_idempotent() {
        let (_dir, store) = store();
        let obj = Blob::new(b"twice".to_vec()).to_stored_object();
        let id1 = store.write(&obj).unwrap();
        let id2 = store.write(&obj).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn contains_does_not_inflate() {
        let (_dir, store) = store();
        let obj = Blob::new(b"exists".to_vec()).to_stored_object();
        let id = store.write(&obj).unwrap();
        assert!(store.contains(&id).unwrap());
        assert!(!store.contains(&ObjectId::hash_of(b"no")).unwrap());
    }

    #[test]
    fn delete_removes_file() {
        let (_dir, store) = store();
        let obj = Blob::new(b"doomed".to_vec()).to_stored_object();
        let id = store.write(&obj).unwrap();
        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.read(&id).unwrap().is_none());
    }

    #[test]
    fn corrupted_file_surfaces_corrupt_object() {
        let (_dir, store) = store();
        let obj = Blob::new(b"about to be corrupted".to_vec()).to_stored_object();
        let id = store.write(&obj).unwrap();

        // Flip a byte in the stored file.
        let hex = id.to_hex();
        let path = store.root().join(&hex[..2]).join(&hex[2..]);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = store.read(&id).unwrap_err();
        assert!(matches!(err, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn all_ids_lists_written_objects() {
        let (_dir, store) = store();
        let a = store.write(&Blob::new(b"a".to_vec()).to_stored_object()).unwrap();
        let b = store.write(&Blob::new(b"b".to_vec()).to_stored_object()).unwrap();
        let ids = store.all_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a) && ids.contains(&b));
    }
}
