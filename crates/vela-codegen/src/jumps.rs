//! Jump resolution and shortening.
//!
//! Branches are emitted in long form carrying a 2-byte label index. Pass 1
//! rewrites every index into a signed 32-bit displacement relative to the
//! instruction start and collects the branches whose displacement fits in
//! a signed byte. Pass 2 adjusts all remaining offsets for the bytes about
//! to disappear, rewrites the candidates to their 2-byte short forms and
//! compacts the stream. Shortening runs once; displacements that fit only
//! after the first round stay long.

use tracing::{debug, trace};

use vela_vm::{decode_at, Opcode};

use crate::error::CodegenError;
use crate::Codegen;

/// Bytes saved by rewriting one long-form branch to its short form.
const LONG_TO_SHORT_REMOVE_COUNT: usize = 3;

impl<'a> Codegen<'a> {
    /// Pass 1: resolve label placeholders into relative offsets, then hand
    /// the short-fitting branches to the shortener. Function ranges are
    /// kept consistent with the bytes that will be removed.
    pub(crate) fn write_jumps(&mut self, mut b: Vec<u8>) -> Result<Vec<u8>, CodegenError> {
        let mut offsets: Vec<usize> = Vec::new();
        let mut ip = 0usize;
        while ip < b.len() {
            let (op, size) = decode_at(&b, ip)?;
            let next_ip = ip + size;
            if op.has_long_offset() {
                let arg: [u8; 2] = [b[next_ip - 4], b[next_ip - 3]];
                let index = u16::from_le_bytes(arg) as usize;
                if index >= self.labels.len() {
                    return Err(CodegenError::BadLabelIndex {
                        index,
                        max: self.labels.len(),
                    });
                }
                let target = self.labels[index];
                if target < 0 {
                    return Err(CodegenError::UnresolvedLabel(index));
                }
                let offset = i64::from(target) - ip as i64;
                if offset > i32::MAX as i64 || offset < i32::MIN as i64 {
                    return Err(CodegenError::OffsetOverflow { ip, offset });
                }
                if op != Opcode::PushA && (-128..=127).contains(&offset) {
                    offsets.push(ip);
                }
                b[next_ip - 4..next_ip].copy_from_slice(&(offset as i32).to_le_bytes());
            }
            ip = next_ip;
        }

        debug!(candidates = offsets.len(), "shortening jumps");

        // Candidate indices are sorted in increasing order; shift each
        // function range by the removals that land before or inside it.
        for f in self.arena.iter_mut().filter(|f| f.emitted) {
            for &ind in &offsets {
                if ind > f.rng.end as usize {
                    break;
                } else if ind < f.rng.start as usize {
                    f.rng.start -= LONG_TO_SHORT_REMOVE_COUNT as u32;
                    f.rng.end -= LONG_TO_SHORT_REMOVE_COUNT as u32;
                } else {
                    f.rng.end -= LONG_TO_SHORT_REMOVE_COUNT as u32;
                }
            }
        }

        Ok(shorten_jumps(b, &offsets)?)
    }
}

/// Pass 2: replace the long branches at `offsets` with short forms,
/// removing three bytes each. Offsets of every other branch are corrected
/// first, by the number of removals crossed on the way to their targets.
fn shorten_jumps(mut b: Vec<u8>, offsets: &[usize]) -> Result<Vec<u8>, CodegenError> {
    if offsets.is_empty() {
        return Ok(b);
    }

    // 1. Alter existing jump offsets.
    let mut ip = 0usize;
    while ip < b.len() {
        let (op, size) = decode_at(&b, ip)?;
        let next_ip = ip + size;
        if op.has_short_offset() {
            let offset = i64::from(b[next_ip - 1] as i8);
            let corrected = offset + offset_correction(ip as i64, ip as i64 + offset, offsets);
            b[next_ip - 1] = corrected as i8 as u8;
        } else if op.has_long_offset() {
            let raw: [u8; 4] = b[next_ip - 4..next_ip].try_into().expect("4-byte operand");
            let offset = i64::from(i32::from_le_bytes(raw));
            let corrected = offset + offset_correction(ip as i64, ip as i64 + offset, offsets);
            b[next_ip - 4..next_ip].copy_from_slice(&(corrected as i32).to_le_bytes());
        }
        ip = next_ip;
    }

    // 2. Convert instructions and compact the stream.
    let mut copy_offset = 0usize;
    let l = offsets.len();
    b[offsets[0]] = short_form_byte(b[offsets[0]]);
    for i in 0..l {
        let start = offsets[i] + 2;
        let end = if i != l - 1 {
            b[offsets[i + 1]] = short_form_byte(b[offsets[i + 1]]);
            offsets[i + 1] + 2
        } else {
            b.len()
        };
        trace!(at = offsets[i], "removing long operand bytes");
        b.copy_within(start + 3..end, start - copy_offset);
        copy_offset += LONG_TO_SHORT_REMOVE_COUNT;
    }
    b.truncate(b.len() - copy_offset);
    Ok(b)
}

fn short_form_byte(op: u8) -> u8 {
    let op = Opcode::from_u8(op).expect("candidate opcode is valid");
    op.to_short_form() as u8
}

/// How much a branch's displacement changes once the candidates between it
/// and its target are shortened. Forward branches shrink, backward ones
/// grow; a candidate at the branch's own address does not count.
fn offset_correction(ip: i64, target: i64, offsets: &[usize]) -> i64 {
    let mut cnt = 0i64;
    let first = offsets.partition_point(|&o| (o as i64) < ip && (o as i64) < target);
    for &o in &offsets[first..] {
        let ind = o as i64;
        if !(ind < target || ind <= ip) {
            break;
        }
        if (ip <= ind && ind < target) || (ind != ip && target <= ind && ind <= ip) {
            cnt += LONG_TO_SHORT_REMOVE_COUNT as i64;
        }
    }
    if ip < target {
        -cnt
    } else {
        cnt
    }
}
