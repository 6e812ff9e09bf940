//! Pack entry headers: type/size varints and delta base offsets.
//!
//! Encodings here must match independent implementations bit-exactly.

use grit_store::ObjectKind;

use crate::error::{PackError, PackResult};

pub const PACK_MAGIC: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
/// Header: magic + version + object count.
pub const PACK_HEADER_LEN: usize = 12;

/// On-wire entry type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta against a base located `offset` bytes before this entry.
    OfsDelta,
    /// Delta against a base named by its 20-byte id.
    RefDelta,
}

impl EntryType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OfsDelta => 6,
            Self::RefDelta => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            6 => Some(Self::OfsDelta),
            7 => Some(Self::RefDelta),
            _ => None,
        }
    }

    pub fn from_kind(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Commit => Self::Commit,
            ObjectKind::Tree => Self::Tree,
            ObjectKind::Blob => Self::Blob,
            ObjectKind::Tag => Self::Tag,
        }
    }

    /// The object kind for non-delta entries, `None` for deltas.
    pub fn kind(&self) -> Option<ObjectKind> {
        match self {
            Self::Commit => Some(ObjectKind::Commit),
            Self::Tree => Some(ObjectKind::Tree),
            Self::Blob => Some(ObjectKind::Blob),
            Self::Tag => Some(ObjectKind::Tag),
            Self::OfsDelta | Self::RefDelta => None,
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::OfsDelta | Self::RefDelta)
    }
}

/// Encode an entry's type/size header.
///
/// Byte 0 carries the type in bits 4-6 and the low 4 size bits; further
/// bytes carry 7 size bits each, MSB signalling continuation.
pub fn encode_entry_header(buf: &mut Vec<u8>, entry_type: EntryType, mut size: u64) {
    let mut byte = (entry_type.code() << 4) | (size & 0x0F) as u8;
    size >>= 4;
    while size > 0 {
        buf.push(byte | 0x80);
        byte = (size & 0x7F) as u8;
        size >>= 7;
    }
    buf.push(byte);
}

/// Decode an entry header. Returns (type, inflated size, bytes consumed).
pub fn decode_entry_header(data: &[u8], offset: u64) -> PackResult<(EntryType, u64, usize)> {
    let corrupt = |reason: &str| PackError::CorruptEntry {
        offset,
        reason: reason.to_string(),
    };

    let mut byte = *data.first().ok_or_else(|| corrupt("truncated header"))?;
    let entry_type = EntryType::from_code((byte >> 4) & 0x07)
        .ok_or_else(|| corrupt(&format!("unknown type code {}", (byte >> 4) & 0x07)))?;
    let mut size = (byte & 0x0F) as u64;
    let mut shift = 4;
    let mut consumed = 1;

    while byte & 0x80 != 0 {
        byte = *data
            .get(consumed)
            .ok_or_else(|| corrupt("truncated header"))?;
        if shift >= 64 {
            return Err(corrupt("size varint overflow"));
        }
        size |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        consumed += 1;
    }
    Ok((entry_type, size, consumed))
}

/// Encode an ofs-delta base offset (big-endian base-128 with +1 bias on
/// every continuation byte).
pub fn encode_ofs_offset(buf: &mut Vec<u8>, mut offset: u64) {
    let mut scratch = [0u8; 10];
    let mut pos = scratch.len() - 1;
    scratch[pos] = (offset & 0x7F) as u8;
    offset >>= 7;
    while offset > 0 {
        offset -= 1;
        pos -= 1;
        scratch[pos] = 0x80 | (offset & 0x7F) as u8;
        offset >>= 7;
    }
    buf.extend_from_slice(&scratch[pos..]);
}

/// Decode an ofs-delta base offset. Returns (offset, bytes consumed).
pub fn decode_ofs_offset(data: &[u8], entry_offset: u64) -> PackResult<(u64, usize)> {
    let corrupt = |reason: &str| PackError::CorruptEntry {
        offset: entry_offset,
        reason: reason.to_string(),
    };

    let mut byte = *data.first().ok_or_else(|| corrupt("truncated ofs base"))?;
    let mut value = (byte & 0x7F) as u64;
    let mut consumed = 1;
    while byte & 0x80 != 0 {
        byte = *data
            .get(consumed)
            .ok_or_else(|| corrupt("truncated ofs base"))?;
        if consumed >= 10 {
            return Err(corrupt("ofs base overflow"));
        }
        value = ((value + 1) << 7) | (byte & 0x7F) as u64;
        consumed += 1;
    }
    Ok((value, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_roundtrip(entry_type: EntryType, size: u64) {
        let mut buf = Vec::new();
        encode_entry_header(&mut buf, entry_type, size);
        let (t, s, consumed) = decode_entry_header(&buf, 0).unwrap();
        assert_eq!(t, entry_type);
        assert_eq!(s, size);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn entry_header_boundary_sizes() {
        for size in [0, 1, 15, 16, 127, 128, 1 << 20, u64::MAX >> 1] {
            header_roundtrip(EntryType::Blob, size);
            header_roundtrip(EntryType::OfsDelta, size);
        }
    }

    #[test]
    fn small_blob_header_is_one_byte() {
        let mut buf = Vec::new();
        encode_entry_header(&mut buf, EntryType::Blob, 11);
        assert_eq!(buf, vec![0x3B]); // type 3 << 4 | 11
    }

    #[test]
    fn decode_truncated_header() {
        let err = decode_entry_header(&[0x80 | 0x3B], 5).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { offset: 5, .. }));
    }

    #[test]
    fn decode_unknown_type_code() {
        // Type code 5 is unassigned.
        let err = decode_entry_header(&[5 << 4], 0).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { .. }));
    }

    fn ofs_roundtrip(offset: u64) {
        let mut buf = Vec::new();
        encode_ofs_offset(&mut buf, offset);
        let (v, consumed) = decode_ofs_offset(&buf, 0).unwrap();
        assert_eq!(v, offset);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn ofs_offset_boundary_values() {
        for offset in [0, 1, 127, 128, 129, 16383, 16384, 1 << 24, 1 << 40] {
            ofs_roundtrip(offset);
        }
    }

    #[test]
    fn ofs_128_uses_bias_encoding() {
        let mut buf = Vec::new();
        encode_ofs_offset(&mut buf, 128);
        assert_eq!(buf, vec![0x80, 0x00]);
    }

    #[test]
    fn type_codes_match_wire_values() {
        assert_eq!(EntryType::Commit.code(), 1);
        assert_eq!(EntryType::Tree.code(), 2);
        assert_eq!(EntryType::Blob.code(), 3);
        assert_eq!(EntryType::Tag.code(), 4);
        assert_eq!(EntryType::OfsDelta.code(), 6);
        assert_eq!(EntryType::RefDelta.code(), 7);
        assert_eq!(EntryType::from_code(5), None);
    }
}
