//! Pack writer: builds a git-format pack from a set of objects.
//!
//! Base selection is a sliding window over recently added objects of the
//! same kind and similar size. A delta is kept only when it is smaller than
//! the full payload. In-pack bases are referenced by relative offset
//! (ofs-delta); registered thin bases, which the receiver is expected to
//! already have, are referenced by id (ref-delta).

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use tracing::debug;

use grit_store::{ObjectKind, StoredObject};
use grit_types::{CoreSettings, ObjectId, OBJECT_ID_LEN};

use crate::delta::encode_delta;
use crate::entry::{
    encode_entry_header, encode_ofs_offset, EntryType, PACK_MAGIC, PACK_VERSION,
};
use crate::error::PackResult;
use crate::index::PackIndex;

struct Pending {
    id: ObjectId,
    kind: ObjectKind,
    data: Vec<u8>,
}

struct Written {
    id: ObjectId,
    kind: ObjectKind,
    data: Vec<u8>,
    offset: u64,
    depth: usize,
}

enum Base<'a> {
    InPack(&'a Written, Vec<u8>),
    Thin(ObjectId, Vec<u8>),
}

/// Builds a pack file from a collection of objects.
pub struct PackWriter {
    entries: Vec<Pending>,
    thin_bases: Vec<Pending>,
    settings: CoreSettings,
}

impl PackWriter {
    pub fn new(settings: CoreSettings) -> Self {
        Self {
            entries: Vec::new(),
            thin_bases: Vec::new(),
            settings,
        }
    }

    /// Queue an object for the pack.
    pub fn add_object(&mut self, id: ObjectId, kind: ObjectKind, data: Vec<u8>) {
        self.entries.push(Pending { id, kind, data });
    }

    /// Queue a stored object directly.
    pub fn add_stored_object(&mut self, obj: &StoredObject) {
        self.entries.push(Pending {
            id: obj.compute_id(),
            kind: obj.kind,
            data: obj.data.clone(),
        });
    }

    /// Register an object the receiver already has, usable as a ref-delta
    /// base without being written into the pack (thin pack).
    pub fn add_thin_base(&mut self, obj: &StoredObject) {
        self.thin_bases.push(Pending {
            id: obj.compute_id(),
            kind: obj.kind,
            data: obj.data.clone(),
        });
    }

    /// Number of objects queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no objects are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the pack and its index in memory.
    pub fn finish(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let Self {
            entries,
            thin_bases,
            settings,
        } = self;

        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_MAGIC);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());

        let mut written: Vec<Written> = Vec::with_capacity(entries.len());
        let mut index_entries = Vec::with_capacity(entries.len());

        for pending in entries {
            let offset = pack.len() as u64;
            let base = select_base(&written, &thin_bases, settings, &pending);

            let depth = match &base {
                Some(Base::InPack(info, _)) => info.depth + 1,
                Some(Base::Thin(..)) => 1,
                None => 0,
            };

            match base {
                Some(Base::InPack(info, delta)) => {
                    encode_entry_header(&mut pack, EntryType::OfsDelta, delta.len() as u64);
                    encode_ofs_offset(&mut pack, offset - info.offset);
                    pack.extend_from_slice(&deflate(&delta)?);
                }
                Some(Base::Thin(base_id, delta)) => {
                    encode_entry_header(&mut pack, EntryType::RefDelta, delta.len() as u64);
                    pack.extend_from_slice(base_id.as_bytes());
                    pack.extend_from_slice(&deflate(&delta)?);
                }
                None => {
                    encode_entry_header(
                        &mut pack,
                        EntryType::from_kind(pending.kind),
                        pending.data.len() as u64,
                    );
                    pack.extend_from_slice(&deflate(&pending.data)?);
                }
            }

            let crc = crc32fast::hash(&pack[offset as usize..]);
            index_entries.push((pending.id, crc, offset));
            written.push(Written {
                id: pending.id,
                kind: pending.kind,
                data: pending.data,
                offset,
                depth,
            });
        }

        let mut hasher = Sha1::new();
        hasher.update(&pack);
        let checksum: [u8; OBJECT_ID_LEN] = hasher.finalize().into();
        pack.extend_from_slice(&checksum);

        debug!(
            objects = written.len(),
            bytes = pack.len(),
            checksum = %hex::encode(&checksum[..4]),
            "pack built"
        );
        Ok((pack, PackIndex::build(index_entries, checksum)))
    }
}

/// Pick the best delta base for `pending` from the sliding window of
/// recently written objects plus registered thin bases.
fn select_base<'a>(
    written: &'a [Written],
    thin_bases: &'a [Pending],
    settings: CoreSettings,
    pending: &Pending,
) -> Option<Base<'a>> {
    let mut best: Option<(usize, Base<'a>)> = None;
    let mut consider = |candidate: Base<'a>, delta_len: usize| {
        if delta_len < pending.data.len()
            && best.as_ref().map(|(len, _)| delta_len < *len).unwrap_or(true)
        {
            best = Some((delta_len, candidate));
        }
    };

    let window_start = written.len().saturating_sub(settings.delta_window);
    for info in written[window_start..].iter().rev() {
        if !similar(info.kind, info.data.len(), pending)
            || info.depth + 1 > settings.delta_chain_limit
        {
            continue;
        }
        let delta = encode_delta(&info.data, &pending.data);
        let len = delta.len();
        consider(Base::InPack(info, delta), len);
    }
    for base in thin_bases {
        if !similar(base.kind, base.data.len(), pending) {
            continue;
        }
        let delta = encode_delta(&base.data, &pending.data);
        let len = delta.len();
        consider(Base::Thin(base.id, delta), len);
    }
    best.map(|(_, base)| base)
}

fn similar(kind: ObjectKind, base_len: usize, pending: &Pending) -> bool {
    kind == pending.kind
        && base_len >= pending.data.len() / 2
        && base_len <= pending.data.len().saturating_mul(2)
}

fn deflate(data: &[u8]) -> PackResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
