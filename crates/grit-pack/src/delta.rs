//! Delta instruction streams: apply and encode.
//!
//! A delta is a header (base size, result size, both as 7-bit little-endian
//! varints) followed by opcodes. Copy opcodes (bit 7 set) name a byte range
//! of the base; insert opcodes (1-127) carry literal bytes. Opcode 0 is
//! reserved and treated as corrupt.

use std::collections::HashMap;

use crate::error::{PackError, PackResult};

/// Block size used by the encoder's base fingerprint table.
const BLOCK: usize = 16;
/// Largest copy length one opcode can express with 3 size bytes.
const MAX_COPY: usize = 0xFF_FFFF;
/// Largest literal run one insert opcode can carry.
const MAX_INSERT: usize = 0x7F;

fn corrupt(reason: &str) -> PackError {
    PackError::CorruptDelta(reason.to_string())
}

fn read_varint(data: &[u8], pos: &mut usize) -> PackResult<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data.get(*pos).ok_or_else(|| corrupt("truncated varint"))?;
        *pos += 1;
        if shift >= 64 {
            return Err(corrupt("varint overflow"));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            return;
        }
    }
}

/// Reconstruct a full object from `base` and a delta instruction stream.
///
/// Fails with `CorruptDelta` if a copy references bytes outside the base,
/// if the declared base size disagrees with `base`, or if the reconstructed
/// length disagrees with the declared result size.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> PackResult<Vec<u8>> {
    let mut pos = 0;
    let base_size = read_varint(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(corrupt(&format!(
            "declared base size {base_size}, actual {}",
            base.len()
        )));
    }
    let result_size = read_varint(delta, &mut pos)?;
    let mut result = Vec::with_capacity(result_size as usize);

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy: bits 0-3 select offset bytes, bits 4-6 size bytes.
            let mut offset: usize = 0;
            for bit in 0..4 {
                if cmd & (1 << bit) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| corrupt("truncated copy"))?;
                    pos += 1;
                    offset |= (byte as usize) << (8 * bit);
                }
            }
            let mut size: usize = 0;
            for bit in 0..3 {
                if cmd & (0x10 << bit) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| corrupt("truncated copy"))?;
                    pos += 1;
                    size |= (byte as usize) << (8 * bit);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .ok_or_else(|| corrupt("copy range overflow"))?;
            if end > base.len() {
                return Err(corrupt(&format!(
                    "copy {offset}+{size} outside base of {}",
                    base.len()
                )));
            }
            result.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            // Insert: cmd literal bytes follow.
            let len = cmd as usize;
            let end = pos + len;
            if end > delta.len() {
                return Err(corrupt("truncated insert"));
            }
            result.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            return Err(corrupt("reserved opcode 0"));
        }
    }

    if result.len() as u64 != result_size {
        return Err(corrupt(&format!(
            "declared result size {result_size}, reconstructed {}",
            result.len()
        )));
    }
    Ok(result)
}

/// Encode a delta transforming `base` into `target`.
///
/// Greedy block matching: the base is fingerprinted in fixed-size blocks
/// and matches are extended forward as far as they run. The output is a
/// valid delta for any input; callers decide whether it is small enough to
/// be worth keeping.
pub fn encode_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut delta = Vec::new();
    write_varint(&mut delta, base.len() as u64);
    write_varint(&mut delta, target.len() as u64);

    // First occurrence wins; later duplicate blocks are shadowed.
    let mut blocks: HashMap<&[u8], usize> = HashMap::new();
    if base.len() >= BLOCK {
        for start in (0..=base.len() - BLOCK).step_by(BLOCK) {
            blocks.entry(&base[start..start + BLOCK]).or_insert(start);
        }
    }

    let mut literal_start = 0;
    let mut pos = 0;
    while pos + BLOCK <= target.len() {
        if let Some(&base_start) = blocks.get(&target[pos..pos + BLOCK]) {
            // Extend the match beyond the block while bytes keep agreeing.
            let mut len = BLOCK;
            while base_start + len < base.len()
                && pos + len < target.len()
                && base[base_start + len] == target[pos + len]
            {
                len += 1;
            }
            emit_insert(&mut delta, &target[literal_start..pos]);
            emit_copy(&mut delta, base_start, len);
            pos += len;
            literal_start = pos;
        } else {
            pos += 1;
        }
    }
    emit_insert(&mut delta, &target[literal_start..]);
    delta
}

fn emit_insert(delta: &mut Vec<u8>, mut literal: &[u8]) {
    while !literal.is_empty() {
        let take = literal.len().min(MAX_INSERT);
        delta.push(take as u8);
        delta.extend_from_slice(&literal[..take]);
        literal = &literal[take..];
    }
}

fn emit_copy(delta: &mut Vec<u8>, mut offset: usize, mut len: usize) {
    while len > 0 {
        let take = len.min(MAX_COPY);
        let mut cmd: u8 = 0x80;
        let mut args = Vec::with_capacity(7);
        for bit in 0..4 {
            let byte = ((offset >> (8 * bit)) & 0xFF) as u8;
            if byte != 0 {
                cmd |= 1 << bit;
                args.push(byte);
            }
        }
        for bit in 0..3 {
            let byte = ((take >> (8 * bit)) & 0xFF) as u8;
            if byte != 0 {
                cmd |= 0x10 << bit;
                args.push(byte);
            }
        }
        delta.push(cmd);
        delta.extend_from_slice(&args);
        offset += take;
        len -= take;
    }
}
