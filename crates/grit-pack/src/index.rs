use std::ops::Range;

use grit_types::{ObjectId, OBJECT_ID_LEN};

use crate::error::{PackError, PackResult};

const INDEX_MAGIC: &[u8; 4] = b"GIDX";
const INDEX_VERSION: u32 = 1;

/// Pack index for O(log n) hash-to-offset lookups.
///
/// The format is local-only (never exchanged), layered like git's index v2:
/// - Fan-out table: 256 entries counting objects with first byte <= index
/// - Sorted ObjectId array
/// - CRC32 array (parallel, covering each entry's pack bytes)
/// - Offset array (parallel)
/// - Checksum of the paired pack, to detect pairing mismatches
#[derive(Clone, Debug)]
pub struct PackIndex {
    pub fan_out: [u32; 256],
    pub object_ids: Vec<ObjectId>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
    pub pack_checksum: [u8; OBJECT_ID_LEN],
}

impl PackIndex {
    /// Build an index from (id, crc32, offset) entries and a pack checksum.
    pub fn build(
        mut entries: Vec<(ObjectId, u32, u64)>,
        pack_checksum: [u8; OBJECT_ID_LEN],
    ) -> Self {
        entries.sort_unstable_by_key(|entry| entry.0);

        // Count per leading byte, then prefix-sum into cumulative form.
        let mut fan_out = [0u32; 256];
        for (id, _, _) in &entries {
            fan_out[id.as_bytes()[0] as usize] += 1;
        }
        let mut running = 0u32;
        for slot in fan_out.iter_mut() {
            running += *slot;
            *slot = running;
        }

        let mut object_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());
        for (id, crc, offset) in entries {
            object_ids.push(id);
            crc32s.push(crc);
            offsets.push(offset);
        }

        Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        }
    }

    /// Slot range holding every id that starts with `first_byte`.
    fn bucket(&self, first_byte: u8) -> Range<usize> {
        let start = match first_byte {
            0 => 0,
            b => self.fan_out[b as usize - 1] as usize,
        };
        start..self.fan_out[first_byte as usize] as usize
    }

    /// Look up an object's (offset, crc32) by id.
    pub fn lookup(&self, id: &ObjectId) -> Option<(u64, u32)> {
        let bucket = self.bucket(id.as_bytes()[0]);
        let start = bucket.start;
        let slot = start + self.object_ids[bucket].binary_search(id).ok()?;
        Some((self.offsets[slot], self.crc32s[slot]))
    }

    pub fn object_count(&self) -> usize {
        self.object_ids.len()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.lookup(id).is_some()
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.object_ids.len();
        let total = 8 + 256 * 4 + n * (OBJECT_ID_LEN + 4 + 8) + OBJECT_ID_LEN;
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        buf.extend(self.fan_out.iter().flat_map(|count| count.to_be_bytes()));
        buf.extend(self.object_ids.iter().flat_map(|id| *id.as_bytes()));
        buf.extend(self.crc32s.iter().flat_map(|crc| crc.to_be_bytes()));
        buf.extend(self.offsets.iter().flat_map(|offset| offset.to_be_bytes()));
        buf.extend_from_slice(&self.pack_checksum);
        buf
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        let mut scan = Scanner { rest: data };

        let magic = scan.take(4)?;
        if magic != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(INDEX_MAGIC).into(),
                actual: String::from_utf8_lossy(magic).into(),
            });
        }
        let version = scan.be_u32()?;
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut fan_out = [0u32; 256];
        for slot in fan_out.iter_mut() {
            *slot = scan.be_u32()?;
        }

        let count = fan_out[255] as usize;
        let mut object_ids = Vec::with_capacity(count);
        for _ in 0..count {
            object_ids.push(ObjectId::from_hash(scan.hash()?));
        }
        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(scan.be_u32()?);
        }
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(scan.be_u64()?);
        }
        let pack_checksum = scan.hash()?;

        Ok(Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        })
    }
}

/// Bounds-checked cursor over serialized index bytes.
struct Scanner<'a> {
    rest: &'a [u8],
}

impl<'a> Scanner<'a> {
    fn take(&mut self, n: usize) -> PackResult<&'a [u8]> {
        if self.rest.len() < n {
            return Err(PackError::IndexCorrupted(format!(
                "needed {n} more bytes, {} remain",
                self.rest.len()
            )));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn be_u32(&mut self) -> PackResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn be_u64(&mut self) -> PackResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn hash(&mut self) -> PackResult<[u8; OBJECT_ID_LEN]> {
        let mut out = [0u8; OBJECT_ID_LEN];
        out.copy_from_slice(self.take(OBJECT_ID_LEN)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ids(n: usize) -> Vec<ObjectId> {
        (0..n)
            .map(|i| {
                let mut hash = [0u8; OBJECT_ID_LEN];
                hash[0] = (i % 256) as u8;
                hash[1] = (i / 256) as u8;
                ObjectId::from_hash(hash)
            })
            .collect()
    }

    #[test]
    fn build_empty_index() {
        let idx = PackIndex::build(vec![], [0u8; OBJECT_ID_LEN]);
        assert_eq!(idx.object_count(), 0);
        assert!(idx.fan_out.iter().all(|&c| c == 0));
    }

    #[test]
    fn build_and_lookup_single() {
        let id = ObjectId::hash_of(b"hello world test data");
        let idx = PackIndex::build(vec![(id, 42u32, 100u64)], [0u8; OBJECT_ID_LEN]);
        assert_eq!(idx.object_count(), 1);
        let (offset, crc) = idx.lookup(&id).unwrap();
        assert_eq!(offset, 100);
        assert_eq!(crc, 42);
    }

    #[test]
    fn lookup_missing_returns_none() {
        let id = ObjectId::hash_of(b"present");
        let idx = PackIndex::build(vec![(id, 1, 10)], [0u8; OBJECT_ID_LEN]);
        assert!(idx.lookup(&ObjectId::hash_of(b"missing")).is_none());
    }

    #[test]
    fn build_and_lookup_many() {
        let ids = make_ids(600);
        let entries: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32, (i * 100) as u64))
            .collect();
        let idx = PackIndex::build(entries, [0u8; OBJECT_ID_LEN]);
        assert_eq!(idx.object_count(), 600);

        for (i, id) in ids.iter().enumerate() {
            let (offset, crc) = idx.lookup(id).unwrap();
            assert_eq!(offset, (i * 100) as u64);
            assert_eq!(crc, i as u32);
        }
    }

    #[test]
    fn fan_out_is_cumulative() {
        let ids = make_ids(300);
        let entries: Vec<_> = ids.iter().map(|id| (*id, 0u32, 0u64)).collect();
        let idx = PackIndex::build(entries, [0u8; OBJECT_ID_LEN]);

        // 256 ids with first byte 0..=255, then 44 wrapping back to 0..=43.
        assert_eq!(idx.fan_out[0], 2);
        assert_eq!(idx.fan_out[43], 88);
        assert_eq!(idx.fan_out[44], 89);
        assert_eq!(idx.fan_out[255], 300);
    }

    #[test]
    fn serialization_roundtrip() {
        let ids = make_ids(5);
        let entries: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, (i * 7) as u32, (i * 50) as u64))
            .collect();
        let checksum = [0xAB; OBJECT_ID_LEN];
        let idx = PackIndex::build(entries, checksum);

        let bytes = idx.to_bytes();
        let idx2 = PackIndex::from_bytes(&bytes).unwrap();

        assert_eq!(idx2.object_count(), idx.object_count());
        assert_eq!(idx2.pack_checksum, checksum);
        for id in &ids {
            assert_eq!(idx.lookup(id), idx2.lookup(id));
        }
    }

    #[test]
    fn from_bytes_bad_magic() {
        let err = PackIndex::from_bytes(b"BADMxxxxxxxx").unwrap_err();
        assert!(matches!(err, PackError::InvalidMagic { .. }));
    }

    #[test]
    fn from_bytes_bad_version() {
        let mut data = Vec::new();
        data.extend_from_slice(INDEX_MAGIC);
        data.extend_from_slice(&99u32.to_be_bytes());
        let err = PackIndex::from_bytes(&data).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedVersion(99)));
    }

    #[test]
    fn from_bytes_truncated() {
        let err = PackIndex::from_bytes(b"GIDX").unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupted(_)));
    }

    #[test]
    fn from_bytes_truncated_body() {
        let idx = PackIndex::build(
            vec![(ObjectId::hash_of(b"x"), 0, 0)],
            [0u8; OBJECT_ID_LEN],
        );
        let bytes = idx.to_bytes();
        let err = PackIndex::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupted(_)));
    }
}
