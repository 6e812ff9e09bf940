//! Layered object database: loose storage under a list of packs.
//!
//! Reads try loose storage first, then packs most-recently-added first.
//! `pack_and_prune` migrates a chosen set of loose objects into a new pack:
//! the pack and its index are published by atomic rename before any loose
//! copy is deleted, so every object stays readable throughout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use grit_store::{LooseStore, ObjectStore, StoreError, StoreResult, StoredObject};
use grit_types::{CoreSettings, ObjectId, OBJECT_ID_LEN};

use crate::error::{PackError, PackResult};
use crate::reader::PackReader;
use crate::writer::PackWriter;

/// Result of a `pack_and_prune` run.
#[derive(Debug)]
pub struct PackSummary {
    pub pack_path: PathBuf,
    pub object_count: usize,
    pub checksum: [u8; OBJECT_ID_LEN],
}

/// Combined loose + packed object storage rooted at an `objects/` directory.
pub struct ObjectDatabase {
    loose: LooseStore,
    pack_dir: PathBuf,
    packs: RwLock<Vec<Arc<PackReader>>>,
    settings: CoreSettings,
}

impl ObjectDatabase {
    /// Open (creating if necessary) the database under `objects_dir`,
    /// loading every `.pack` file found in `objects_dir/pack/`.
    pub fn open(objects_dir: impl Into<PathBuf>, settings: CoreSettings) -> PackResult<Self> {
        let objects_dir = objects_dir.into();
        let loose = LooseStore::open(&objects_dir)?;
        let pack_dir = objects_dir.join("pack");
        std::fs::create_dir_all(&pack_dir)?;

        let mut packs = Vec::new();
        for entry in std::fs::read_dir(&pack_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("pack") {
                packs.push(Arc::new(PackReader::open(&path, settings.delta_chain_limit)?));
            }
        }
        debug!(packs = packs.len(), dir = %objects_dir.display(), "object database opened");

        Ok(Self {
            loose,
            pack_dir,
            packs: RwLock::new(packs),
            settings,
        })
    }

    /// The loose store backing this database.
    pub fn loose(&self) -> &LooseStore {
        &self.loose
    }

    pub fn settings(&self) -> CoreSettings {
        self.settings
    }

    /// Number of packs currently mounted.
    pub fn pack_count(&self) -> usize {
        self.packs.read().expect("lock poisoned").len()
    }

    /// Every id reachable from this database: loose plus all packs.
    pub fn all_ids(&self) -> StoreResult<Vec<ObjectId>> {
        let mut ids = self.loose.all_ids()?;
        for pack in self.packs.read().expect("lock poisoned").iter() {
            ids.extend_from_slice(pack.object_ids());
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn read_from_packs(&self, id: &ObjectId) -> PackResult<Option<StoredObject>> {
        let packs = self.packs.read().expect("lock poisoned");
        for pack in packs.iter().rev() {
            if let Some(obj) = pack.read_object(id)? {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    /// Migrate exactly `ids` from loose storage into a new pack and delete
    /// those loose copies. Every id must be present loose; a missing one
    /// fails the run before anything is written. Returns `None` when `ids`
    /// is empty.
    pub fn pack_and_prune(&self, ids: &[ObjectId]) -> PackResult<Option<PackSummary>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(None);
        }

        let mut writer = PackWriter::new(self.settings);
        for id in &ids {
            let obj = self
                .loose
                .read(id)?
                .ok_or(StoreError::NotFound(*id))?;
            writer.add_stored_object(&obj);
        }
        let (pack, index) = writer.finish()?;
        let checksum = index.pack_checksum;

        let stem = format!("pack-{}", hex::encode(checksum));
        let pack_path = self.pack_dir.join(format!("{stem}.pack"));
        let idx_path = self.pack_dir.join(format!("{stem}.idx"));

        // The index must be durable before the pack becomes discoverable.
        persist(&idx_path, &index.to_bytes(), &self.pack_dir)?;
        persist(&pack_path, &pack, &self.pack_dir)?;

        let reader = Arc::new(PackReader::from_bytes(
            pack,
            index,
            self.settings.delta_chain_limit,
        )?);
        self.packs.write().expect("lock poisoned").push(reader);

        // Only after publication are the loose copies redundant.
        for id in &ids {
            self.loose.delete(id)?;
        }

        info!(
            objects = ids.len(),
            pack = %pack_path.display(),
            "packed and pruned loose objects"
        );
        Ok(Some(PackSummary {
            pack_path,
            object_count: ids.len(),
            checksum,
        }))
    }

    /// Convenience: pack everything currently loose.
    pub fn pack_all_loose(&self) -> PackResult<Option<PackSummary>> {
        let ids = self.loose.all_ids()?;
        self.pack_and_prune(&ids)
    }
}

/// An I/O failure while reading a pack is transient, not corruption; only
/// integrity failures report as `CorruptObject`.
fn pack_read_error(id: &ObjectId, err: PackError) -> StoreError {
    match err {
        PackError::Io(io) => StoreError::Io(io),
        PackError::Store(inner) => inner,
        other => StoreError::CorruptObject {
            id: *id,
            reason: other.to_string(),
        },
    }
}

fn persist(path: &Path, bytes: &[u8], dir: &Path) -> PackResult<()> {
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.as_file().write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl ObjectStore for ObjectDatabase {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        if let Some(obj) = self.loose.read(id)? {
            return Ok(Some(obj));
        }
        self.read_from_packs(id).map_err(|e| pack_read_error(id, e))
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        self.loose.write(object)
    }

    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        if self.loose.contains(id)? {
            return Ok(true);
        }
        let packs = self.packs.read().expect("lock poisoned");
        Ok(packs.iter().any(|p| p.contains(id)))
    }

    fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        // Packed objects are only removed by repacking.
        self.loose.delete(id)
    }
}

impl std::fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("pack_dir", &self.pack_dir)
            .field("packs", &self.pack_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grit_store::Blob;

    fn odb() -> (tempfile::TempDir, ObjectDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = ObjectDatabase::open(dir.path().join("objects"), CoreSettings::default()).unwrap();
        (dir, db)
    }

    fn blob(content: &[u8]) -> StoredObject {
        Blob::new(content.to_vec()).to_stored_object()
    }

    #[test]
    fn write_goes_loose_and_reads_back() {
        let (_dir, db) = odb();
        let id = db.write(&blob(b"loose first")).unwrap();
        assert!(db.contains(&id).unwrap());
        assert_eq!(db.read(&id).unwrap().unwrap().data, b"loose first");
    }

    #[test]
    fn pack_and_prune_keeps_objects_readable() {
        let (_dir, db) = odb();
        let ids: Vec<_> = (0..10u8)
            .map(|i| db.write(&blob(&[i; 100])).unwrap())
            .collect();

        let summary = db.pack_and_prune(&ids).unwrap().unwrap();
        assert_eq!(summary.object_count, 10);
        assert!(summary.pack_path.exists());

        // Loose copies are gone but every object still reads.
        assert!(db.loose().all_ids().unwrap().is_empty());
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(db.read(id).unwrap().unwrap().data, vec![i as u8; 100]);
            assert!(db.contains(id).unwrap());
        }
    }

    #[test]
    fn pack_and_prune_with_no_loose_objects_is_noop() {
        let (_dir, db) = odb();
        assert!(db.pack_all_loose().unwrap().is_none());
        assert!(db.pack_and_prune(&[]).unwrap().is_none());
        assert_eq!(db.pack_count(), 0);
    }

    #[test]
    fn pack_io_failures_do_not_report_as_corruption() {
        let id = ObjectId::hash_of(b"any");
        let io = PackError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert!(matches!(pack_read_error(&id, io), StoreError::Io(_)));

        let mismatch = pack_read_error(&id, PackError::ChecksumMismatch);
        assert!(matches!(mismatch, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn pack_and_prune_takes_only_the_requested_ids() {
        let (_dir, db) = odb();
        let packed_a = db.write(&blob(b"goes into the pack")).unwrap();
        let packed_b = db.write(&blob(b"also packed")).unwrap();
        let kept = db.write(&blob(b"stays loose")).unwrap();

        let summary = db.pack_and_prune(&[packed_a, packed_b]).unwrap().unwrap();
        assert_eq!(summary.object_count, 2);

        let loose = db.loose().all_ids().unwrap();
        assert_eq!(loose, vec![kept]);
        for id in [packed_a, packed_b, kept] {
            assert!(db.contains(&id).unwrap());
        }
    }

    #[test]
    fn pack_and_prune_rejects_an_absent_id() {
        let (_dir, db) = odb();
        let present = db.write(&blob(b"present")).unwrap();
        let absent = ObjectId::hash_of(b"never written");

        let err = db.pack_and_prune(&[present, absent]).unwrap_err();
        assert!(matches!(
            err,
            PackError::Store(StoreError::NotFound(id)) if id == absent
        ));

        // Nothing was published or pruned.
        assert_eq!(db.pack_count(), 0);
        assert!(db.loose().contains(&present).unwrap());
    }

    #[test]
    fn reopened_database_discovers_packs() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");

        let id = {
            let db = ObjectDatabase::open(&objects, CoreSettings::default()).unwrap();
            let id = db.write(&blob(b"survives reopen")).unwrap();
            db.pack_all_loose().unwrap().unwrap();
            id
        };

        let db = ObjectDatabase::open(&objects, CoreSettings::default()).unwrap();
        assert_eq!(db.pack_count(), 1);
        assert_eq!(db.read(&id).unwrap().unwrap().data, b"survives reopen");
    }

    #[test]
    fn repeated_packing_accumulates_packs() {
        let (_dir, db) = odb();
        let a = db.write(&blob(b"first wave")).unwrap();
        db.pack_all_loose().unwrap().unwrap();
        let b = db.write(&blob(b"second wave")).unwrap();
        db.pack_all_loose().unwrap().unwrap();

        assert_eq!(db.pack_count(), 2);
        assert!(db.contains(&a).unwrap());
        assert!(db.contains(&b).unwrap());
    }

    #[test]
    fn missing_object_reads_none_everywhere() {
        let (_dir, db) = odb();
        db.write(&blob(b"present")).unwrap();
        db.pack_all_loose().unwrap();
        let absent = ObjectId::hash_of(b"never stored");
        assert!(db.read(&absent).unwrap().is_none());
        assert!(!db.contains(&absent).unwrap());
    }

    #[test]
    fn all_ids_spans_loose_and_packed() {
        let (_dir, db) = odb();
        let packed = db.write(&blob(b"packed one")).unwrap();
        db.pack_all_loose().unwrap();
        let loose = db.write(&blob(b"still loose")).unwrap();

        let ids = db.all_ids().unwrap();
        assert!(ids.contains(&packed));
        assert!(ids.contains(&loose));
    }
}
