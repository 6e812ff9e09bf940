//! Random-access pack reading via a pack index.

use std::io::Read;
use std::path::Path;

use flate2::bufread::ZlibDecoder;
use sha1::{Digest, Sha1};

use grit_store::StoredObject;
use grit_types::{ObjectId, OBJECT_ID_LEN};

use crate::delta::apply_delta;
use crate::entry::{
    decode_entry_header, decode_ofs_offset, EntryType, PACK_HEADER_LEN, PACK_MAGIC, PACK_VERSION,
};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;

/// Reads objects from a pack using an index for random access.
///
/// The whole-file trailing checksum is verified before any contained object
/// is trusted; a mismatch rejects the pack wholesale. Delta chains are
/// resolved iteratively and bounded by `max_delta_depth`.
#[derive(Debug)]
pub struct PackReader {
    data: Vec<u8>,
    index: PackIndex,
    max_delta_depth: usize,
}

impl PackReader {
    /// Open from raw bytes, verifying framing and the trailing checksum.
    pub fn from_bytes(
        data: Vec<u8>,
        index: PackIndex,
        max_delta_depth: usize,
    ) -> PackResult<Self> {
        if data.len() < PACK_HEADER_LEN + OBJECT_ID_LEN {
            return Err(PackError::CorruptPack("pack data too short".into()));
        }
        if &data[0..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(PACK_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let declared = u32::from_be_bytes(data[8..12].try_into().expect("4 bytes")) as usize;
        if declared != index.object_count() {
            return Err(PackError::CorruptPack(format!(
                "pack declares {declared} objects, index holds {}",
                index.object_count()
            )));
        }

        let body_len = data.len() - OBJECT_ID_LEN;
        let mut hasher = Sha1::new();
        hasher.update(&data[..body_len]);
        let actual: [u8; OBJECT_ID_LEN] = hasher.finalize().into();
        if actual != data[body_len..] {
            return Err(PackError::ChecksumMismatch);
        }
        if actual != index.pack_checksum {
            return Err(PackError::IndexPairMismatch);
        }

        Ok(Self {
            data,
            index,
            max_delta_depth,
        })
    }

    /// Open a `.pack` file and its sibling `.idx`.
    pub fn open(pack_path: &Path, max_delta_depth: usize) -> PackResult<Self> {
        let data = std::fs::read(pack_path)?;
        let index_data = std::fs::read(pack_path.with_extension("idx"))?;
        let index = PackIndex::from_bytes(&index_data)?;
        Self::from_bytes(data, index, max_delta_depth)
    }

    /// Read an object by id, resolving any delta chain.
    pub fn read_object(&self, id: &ObjectId) -> PackResult<Option<StoredObject>> {
        let (offset, expected_crc) = match self.index.lookup(id) {
            Some(found) => found,
            None => return Ok(None),
        };
        let obj = self.resolve_at(offset, Some(expected_crc))?;
        // The index only names an offset; the content must hash back to
        // the id it was requested under.
        let actual = obj.compute_id();
        if actual != *id {
            return Err(PackError::ObjectMismatch {
                expected: *id,
                actual,
            });
        }
        Ok(Some(obj))
    }

    /// Existence check via the index only; no inflation.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    pub fn object_ids(&self) -> &[ObjectId] {
        &self.index.object_ids
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// The pack's trailing checksum.
    pub fn checksum(&self) -> [u8; OBJECT_ID_LEN] {
        self.index.pack_checksum
    }

    /// Walk the (possibly delta-compressed) entry at `offset` down to its
    /// full base, then apply the collected deltas innermost-first.
    fn resolve_at(&self, start: u64, expected_crc: Option<u32>) -> PackResult<StoredObject> {
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut offset = start;

        let (kind, base_data) = loop {
            // Only the requested entry carries an index CRC expectation.
            let crc = if offset == start { expected_crc } else { None };
            let entry_start = offset as usize;
            if entry_start >= self.data.len() - OBJECT_ID_LEN {
                return Err(PackError::CorruptEntry {
                    offset,
                    reason: "offset beyond pack body".into(),
                });
            }
            let (entry_type, size, header_len) =
                decode_entry_header(&self.data[entry_start..], offset)?;
            let mut pos = entry_start + header_len;

            match entry_type {
                EntryType::OfsDelta => {
                    let (rel, consumed) = decode_ofs_offset(&self.data[pos..], offset)?;
                    pos += consumed;
                    if rel == 0 || rel > offset {
                        return Err(PackError::CorruptEntry {
                            offset,
                            reason: "ofs base outside pack".into(),
                        });
                    }
                    let (payload, compressed_len) = self.inflate_at(pos, size, offset)?;
                    self.check_crc(entry_start, pos + compressed_len, offset, crc)?;
                    self.push_delta(&mut deltas, payload)?;
                    offset -= rel;
                }
                EntryType::RefDelta => {
                    if pos + OBJECT_ID_LEN > self.data.len() {
                        return Err(PackError::CorruptEntry {
                            offset,
                            reason: "truncated ref-delta base id".into(),
                        });
                    }
                    let mut hash = [0u8; OBJECT_ID_LEN];
                    hash.copy_from_slice(&self.data[pos..pos + OBJECT_ID_LEN]);
                    let base_id = ObjectId::from_hash(hash);
                    pos += OBJECT_ID_LEN;

                    let (payload, compressed_len) = self.inflate_at(pos, size, offset)?;
                    self.check_crc(entry_start, pos + compressed_len, offset, crc)?;
                    self.push_delta(&mut deltas, payload)?;

                    // A stored pack must be self-contained; thin packs are
                    // completed before they are ever indexed.
                    offset = match self.index.lookup(&base_id) {
                        Some((base_offset, _)) => base_offset,
                        None => return Err(PackError::DeltaBaseNotFound(base_id)),
                    };
                }
                full => {
                    let kind = full.kind().expect("non-delta entry has a kind");
                    let (payload, compressed_len) = self.inflate_at(pos, size, offset)?;
                    self.check_crc(entry_start, pos + compressed_len, offset, crc)?;
                    break (kind, payload);
                }
            }
        };

        let mut data = base_data;
        for delta in deltas.iter().rev() {
            data = apply_delta(&data, delta)?;
        }
        Ok(StoredObject::new(kind, data))
    }

    fn push_delta(&self, deltas: &mut Vec<Vec<u8>>, payload: Vec<u8>) -> PackResult<()> {
        deltas.push(payload);
        if deltas.len() > self.max_delta_depth {
            return Err(PackError::DeltaChainTooDeep {
                depth: deltas.len(),
                limit: self.max_delta_depth,
            });
        }
        Ok(())
    }

    /// Inflate one zlib stream starting at `pos`. Returns the payload and
    /// the number of compressed bytes consumed.
    fn inflate_at(&self, pos: usize, declared: u64, offset: u64) -> PackResult<(Vec<u8>, usize)> {
        let body_len = self.data.len() - OBJECT_ID_LEN;
        if pos > body_len {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "entry runs past pack body".into(),
            });
        }
        let slice = &self.data[pos..body_len];
        let mut decoder = ZlibDecoder::new(slice);
        let mut payload = Vec::with_capacity(declared as usize);
        decoder
            .read_to_end(&mut payload)
            .map_err(|e| PackError::CorruptEntry {
                offset,
                reason: format!("inflate failed: {e}"),
            })?;
        if payload.len() as u64 != declared {
            return Err(PackError::CorruptEntry {
                offset,
                reason: format!("declared size {declared}, inflated {}", payload.len()),
            });
        }
        Ok((payload, decoder.total_in() as usize))
    }

    fn check_crc(
        &self,
        entry_start: usize,
        entry_end: usize,
        offset: u64,
        expected: Option<u32>,
    ) -> PackResult<()> {
        if let Some(expected) = expected {
            let actual = crc32fast::hash(&self.data[entry_start..entry_end]);
            if actual != expected {
                return Err(PackError::CrcMismatch { offset });
            }
        }
        Ok(())
    }
}
