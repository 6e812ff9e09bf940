//! Streaming pack ingestion.
//!
//! A pack arriving over the wire is decoded incrementally: a running SHA-1
//! covers every byte as it is consumed, entries are buffered in memory, and
//! nothing reaches the destination store until the trailing checksum has
//! been verified. A corrupt stream therefore rejects the whole pack without
//! leaving partial objects behind.

use std::collections::HashMap;
use std::io::Read;

use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};
use tracing::debug;

use grit_store::{ObjectKind, ObjectStore, StoredObject};
use grit_types::{ObjectId, OBJECT_ID_LEN};

use crate::delta::apply_delta;
use crate::entry::{EntryType, PACK_MAGIC, PACK_VERSION};
use crate::error::{PackError, PackResult};

/// Outcome of a successful pack ingestion.
#[derive(Debug)]
pub struct ParsedPack {
    /// Ids of every object the pack carried, in entry order.
    pub ids: Vec<ObjectId>,
    /// The pack's trailing checksum.
    pub checksum: [u8; OBJECT_ID_LEN],
}

/// Incremental pack decoder.
///
/// `bases` supplies ref-delta bases the pack itself does not carry (thin
/// packs); resolved objects are written to `sink` only after the checksum
/// passes.
pub struct PackParser {
    max_delta_depth: usize,
}

enum RawEntry {
    Full {
        kind: ObjectKind,
        data: Vec<u8>,
    },
    Ofs {
        base_offset: u64,
        delta: Vec<u8>,
    },
    Ref {
        base_id: ObjectId,
        delta: Vec<u8>,
    },
}

impl PackParser {
    pub fn new(max_delta_depth: usize) -> Self {
        Self { max_delta_depth }
    }

    /// Decode a pack from `input`, resolve its delta chains, and write every
    /// object into `sink`.
    pub fn parse(
        &self,
        input: impl Read,
        bases: &dyn ObjectStore,
        sink: &dyn ObjectStore,
    ) -> PackResult<ParsedPack> {
        let mut stream = Stream::new(input);

        let magic = stream.take_exact::<4>()?;
        if &magic != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(PACK_MAGIC).into(),
                actual: String::from_utf8_lossy(&magic).into(),
            });
        }
        let version = u32::from_be_bytes(stream.take_exact::<4>()?);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(stream.take_exact::<4>()?) as usize;

        let mut entries: Vec<(u64, RawEntry)> = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = stream.consumed();
            let (entry_type, size) = stream.read_entry_header(offset)?;
            let entry = match entry_type {
                EntryType::OfsDelta => {
                    let rel = stream.read_ofs_offset(offset)?;
                    if rel == 0 || rel > offset {
                        return Err(PackError::CorruptEntry {
                            offset,
                            reason: "ofs base outside pack".into(),
                        });
                    }
                    let delta = stream.inflate(size, offset)?;
                    RawEntry::Ofs {
                        base_offset: offset - rel,
                        delta,
                    }
                }
                EntryType::RefDelta => {
                    let hash = stream.take_exact::<OBJECT_ID_LEN>()?;
                    let delta = stream.inflate(size, offset)?;
                    RawEntry::Ref {
                        base_id: ObjectId::from_hash(hash),
                        delta,
                    }
                }
                full => {
                    let kind = full.kind().expect("non-delta entry has a kind");
                    let data = stream.inflate(size, offset)?;
                    RawEntry::Full { kind, data }
                }
            };
            entries.push((offset, entry));
        }

        // The trailer is the hash of everything before it; verify before any
        // object is trusted or stored.
        let computed: [u8; OBJECT_ID_LEN] = stream.hasher.clone().finalize().into();
        let trailer = stream.take_trailer()?;
        if computed != trailer {
            return Err(PackError::ChecksumMismatch);
        }

        let resolved = self.resolve(entries, bases)?;
        let mut ids = Vec::with_capacity(resolved.len());
        for obj in &resolved {
            ids.push(sink.write(obj)?);
        }
        debug!(
            objects = ids.len(),
            checksum = %hex::encode(&trailer[..4]),
            "pack ingested"
        );
        Ok(ParsedPack {
            ids,
            checksum: trailer,
        })
    }

    /// Resolve delta chains over the buffered entries.
    ///
    /// Repeated passes handle bases that appear after their dependants;
    /// a pass with no progress means a base is genuinely absent.
    fn resolve(
        &self,
        entries: Vec<(u64, RawEntry)>,
        bases: &dyn ObjectStore,
    ) -> PackResult<Vec<StoredObject>> {
        let offset_to_slot: HashMap<u64, usize> =
            entries.iter().enumerate().map(|(i, (o, _))| (*o, i)).collect();

        // (object, chain depth) per slot once resolved.
        let mut resolved: Vec<Option<(StoredObject, usize)>> = Vec::new();
        resolved.resize_with(entries.len(), || None);
        let mut by_id: HashMap<ObjectId, usize> = HashMap::new();

        let mut remaining = entries.len();
        while remaining > 0 {
            let mut progressed = false;
            for (slot, (offset, entry)) in entries.iter().enumerate() {
                if resolved[slot].is_some() {
                    continue;
                }
                let outcome = match entry {
                    RawEntry::Full { kind, data } => {
                        Some((StoredObject::new(*kind, data.clone()), 0))
                    }
                    RawEntry::Ofs { base_offset, delta } => {
                        let base_slot = *offset_to_slot.get(base_offset).ok_or_else(|| {
                            PackError::CorruptEntry {
                                offset: *offset,
                                reason: "ofs base is not an entry boundary".into(),
                            }
                        })?;
                        resolved[base_slot].as_ref().map(|(base, depth)| {
                            apply_delta(&base.data, delta)
                                .map(|data| (StoredObject::new(base.kind, data), depth + 1))
                        })
                        .transpose()?
                    }
                    RawEntry::Ref { base_id, delta } => {
                        if let Some(&base_slot) = by_id.get(base_id) {
                            let (base, depth) =
                                resolved[base_slot].as_ref().expect("indexed slots are resolved");
                            let data = apply_delta(&base.data, delta)?;
                            Some((StoredObject::new(base.kind, data), depth + 1))
                        } else if let Some(base) = bases.read(base_id)? {
                            // Thin pack: the base lives outside the stream.
                            let data = apply_delta(&base.data, delta)?;
                            Some((StoredObject::new(base.kind, data), 1))
                        } else {
                            None
                        }
                    }
                };
                if let Some((obj, depth)) = outcome {
                    if depth > self.max_delta_depth {
                        return Err(PackError::DeltaChainTooDeep {
                            depth,
                            limit: self.max_delta_depth,
                        });
                    }
                    by_id.insert(obj.compute_id(), slot);
                    resolved[slot] = Some((obj, depth));
                    remaining -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                let missing = entries.iter().enumerate().find_map(|(slot, (_, e))| {
                    if resolved[slot].is_none() {
                        if let RawEntry::Ref { base_id, .. } = e {
                            return Some(*base_id);
                        }
                    }
                    None
                });
                return match missing {
                    Some(id) => Err(PackError::DeltaBaseNotFound(id)),
                    None => Err(PackError::CorruptPack("unresolvable delta cycle".into())),
                };
            }
        }

        Ok(resolved
            .into_iter()
            .map(|slot| slot.expect("all slots resolved").0)
            .collect())
    }
}

/// Buffered reader over the raw stream that hashes bytes as they are
/// consumed and lends unconsumed lookahead back to the zlib decoder.
struct Stream<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    consumed: u64,
    hasher: Sha1,
    eof: bool,
}

const READ_CHUNK: usize = 8192;

impl<R: Read> Stream<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            consumed: 0,
            hasher: Sha1::new(),
            eof: false,
        }
    }

    fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Ensure at least one unconsumed byte is buffered.
    fn fill(&mut self) -> PackResult<()> {
        if self.pos < self.buf.len() || self.eof {
            return Ok(());
        }
        self.buf.clear();
        self.pos = 0;
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn take_byte(&mut self) -> PackResult<u8> {
        self.fill()?;
        if self.pos >= self.buf.len() {
            return Err(PackError::CorruptPack("unexpected end of stream".into()));
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        self.consumed += 1;
        self.hasher.update([byte]);
        Ok(byte)
    }

    fn take_exact<const N: usize>(&mut self) -> PackResult<[u8; N]> {
        let mut out = [0u8; N];
        for slot in &mut out {
            *slot = self.take_byte()?;
        }
        Ok(out)
    }

    /// The 20 trailer bytes are not part of the hashed body.
    fn take_trailer(&mut self) -> PackResult<[u8; OBJECT_ID_LEN]> {
        let mut out = [0u8; OBJECT_ID_LEN];
        for slot in &mut out {
            self.fill()?;
            if self.pos >= self.buf.len() {
                return Err(PackError::CorruptPack("truncated trailer".into()));
            }
            *slot = self.buf[self.pos];
            self.pos += 1;
            self.consumed += 1;
        }
        Ok(out)
    }

    fn read_entry_header(&mut self, offset: u64) -> PackResult<(EntryType, u64)> {
        let corrupt = |reason: &str| PackError::CorruptEntry {
            offset,
            reason: reason.to_string(),
        };
        let mut byte = self.take_byte()?;
        let entry_type = EntryType::from_code((byte >> 4) & 0x07)
            .ok_or_else(|| corrupt(&format!("unknown type code {}", (byte >> 4) & 0x07)))?;
        let mut size = (byte & 0x0F) as u64;
        let mut shift = 4;
        while byte & 0x80 != 0 {
            byte = self.take_byte()?;
            if shift >= 64 {
                return Err(corrupt("size varint overflow"));
            }
            size |= ((byte & 0x7F) as u64) << shift;
            shift += 7;
        }
        Ok((entry_type, size))
    }

    fn read_ofs_offset(&mut self, offset: u64) -> PackResult<u64> {
        let mut byte = self.take_byte()?;
        let mut value = (byte & 0x7F) as u64;
        let mut taken = 1;
        while byte & 0x80 != 0 {
            if taken >= 10 {
                return Err(PackError::CorruptEntry {
                    offset,
                    reason: "ofs base overflow".into(),
                });
            }
            byte = self.take_byte()?;
            value = ((value + 1) << 7) | (byte & 0x7F) as u64;
            taken += 1;
        }
        Ok(value)
    }

    /// Inflate exactly one zlib stream, consuming only its compressed bytes.
    fn inflate(&mut self, declared: u64, offset: u64) -> PackResult<Vec<u8>> {
        let corrupt = |reason: String| PackError::CorruptEntry { offset, reason };
        let mut decomp = Decompress::new(true);
        let mut out = Vec::with_capacity(declared as usize);

        loop {
            self.fill()?;
            let available = &self.buf[self.pos..];
            if available.is_empty() {
                return Err(corrupt("unexpected end of zlib stream".into()));
            }
            // decompress_vec only writes into spare capacity.
            if out.len() == out.capacity() {
                out.reserve(READ_CHUNK);
            }
            let before = decomp.total_in();
            let status = decomp
                .decompress_vec(available, &mut out, FlushDecompress::None)
                .map_err(|e| corrupt(format!("inflate failed: {e}")))?;
            let used = (decomp.total_in() - before) as usize;
            self.hasher.update(&available[..used]);
            self.pos += used;
            self.consumed += used as u64;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {}
            }
        }

        if out.len() as u64 != declared {
            return Err(corrupt(format!(
                "declared size {declared}, inflated {}",
                out.len()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PackWriter;
    use grit_store::{Blob, InMemoryObjectStore};
    use grit_types::CoreSettings;

    fn build_pack(blobs: &[Vec<u8>]) -> (Vec<u8>, Vec<ObjectId>) {
        let mut writer = PackWriter::new(CoreSettings::default());
        let mut ids = Vec::new();
        for data in blobs {
            let obj = Blob::new(data.clone()).to_stored_object();
            ids.push(obj.compute_id());
            writer.add_stored_object(&obj);
        }
        let (pack, _) = writer.finish().unwrap();
        (pack, ids)
    }

    #[test]
    fn ingests_full_and_deltified_entries() {
        let base: Vec<u8> = (0..3000u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut variant = base.clone();
        variant.extend_from_slice(b"changed");
        let (pack, ids) = build_pack(&[base.clone(), variant.clone(), b"small".to_vec()]);

        let bases = InMemoryObjectStore::new();
        let sink = InMemoryObjectStore::new();
        let parsed = PackParser::new(50)
            .parse(pack.as_slice(), &bases, &sink)
            .unwrap();

        assert_eq!(parsed.ids, ids);
        assert_eq!(sink.read(&ids[0]).unwrap().unwrap().data, base);
        assert_eq!(sink.read(&ids[1]).unwrap().unwrap().data, variant);
    }

    #[test]
    fn corrupt_stream_stores_nothing() {
        let (mut pack, _) = build_pack(&[b"victim of corruption".to_vec()]);
        let mid = pack.len() / 2;
        pack[mid] ^= 0x40;

        let bases = InMemoryObjectStore::new();
        let sink = InMemoryObjectStore::new();
        let err = PackParser::new(50)
            .parse(pack.as_slice(), &bases, &sink)
            .unwrap_err();

        // Either the zlib stream breaks or the trailer disagrees; both
        // reject before anything is written.
        assert!(matches!(
            err,
            PackError::ChecksumMismatch | PackError::CorruptEntry { .. } | PackError::CorruptPack(_)
        ));
        assert!(sink.all_ids().is_empty());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let (pack, _) = build_pack(&[b"cut short".to_vec()]);
        let truncated = &pack[..pack.len() - 10];

        let bases = InMemoryObjectStore::new();
        let sink = InMemoryObjectStore::new();
        let err = PackParser::new(50).parse(truncated, &bases, &sink).unwrap_err();
        assert!(matches!(err, PackError::CorruptPack(_)));
        assert!(sink.all_ids().is_empty());
    }

    #[test]
    fn thin_pack_resolves_against_base_store() {
        let base_blob = {
            let data: Vec<u8> = (0..3000u32).flat_map(|i| i.to_le_bytes()).collect();
            Blob::new(data).to_stored_object()
        };
        let mut variant = base_blob.data.clone();
        variant.extend_from_slice(b"thin tail");
        let variant_obj = Blob::new(variant.clone()).to_stored_object();

        let mut writer = PackWriter::new(CoreSettings::default());
        writer.add_thin_base(&base_blob);
        writer.add_stored_object(&variant_obj);
        let (pack, _) = writer.finish().unwrap();

        let bases = InMemoryObjectStore::new();
        bases.write(&base_blob).unwrap();
        let sink = InMemoryObjectStore::new();
        let parsed = PackParser::new(50)
            .parse(pack.as_slice(), &bases, &sink)
            .unwrap();

        assert_eq!(parsed.ids, vec![variant_obj.compute_id()]);
        assert_eq!(sink.read(&parsed.ids[0]).unwrap().unwrap().data, variant);
    }

    #[test]
    fn thin_pack_with_missing_base_fails() {
        let base_blob = {
            let data: Vec<u8> = (0..3000u32).flat_map(|i| i.to_le_bytes()).collect();
            Blob::new(data).to_stored_object()
        };
        let mut variant = base_blob.data.clone();
        variant.extend_from_slice(b"orphan");

        let mut writer = PackWriter::new(CoreSettings::default());
        writer.add_thin_base(&base_blob);
        writer.add_stored_object(&Blob::new(variant).to_stored_object());
        let (pack, _) = writer.finish().unwrap();

        let bases = InMemoryObjectStore::new();
        let sink = InMemoryObjectStore::new();
        let err = PackParser::new(50)
            .parse(pack.as_slice(), &bases, &sink)
            .unwrap_err();
        assert_eq!(
            match err {
                PackError::DeltaBaseNotFound(id) => id,
                other => panic!("unexpected error: {other}"),
            },
            base_blob.compute_id()
        );
    }

    #[test]
    fn bad_magic_rejected_before_reading_entries() {
        let bases = InMemoryObjectStore::new();
        let sink = InMemoryObjectStore::new();
        let err = PackParser::new(50)
            .parse(&b"JUNKxxxxxxxx"[..], &bases, &sink)
            .unwrap_err();
        assert!(matches!(err, PackError::InvalidMagic { .. }));
    }
}
