//! Element-wise byte conversion between primitive kinds, used when a
//! rescheme changes a field's kind or when a field is overridden in place.

use crate::types::value_codec::{self, CastMode};
use crate::types::TypeCode;

/// How a field's bytes made it across a kind change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Every surviving element was converted value-wise.
    Converted,
    /// Opaque kinds: bytes copied verbatim (truncated / zero-padded).
    RawCopied,
    /// No sane conversion existed; bytes were raw-copied as a fallback.
    Unsafe,
}

fn raw_copy(src: &[u8], dst: &mut [u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    for b in dst[n..].iter_mut() {
        *b = 0;
    }
}

/// Migrates one field's bytes. `src_elem` / `dst_elem` come from the field
/// headers (0 for whole-field kinds). Reference fields never pass through
/// here; the rescheme engine handles them by id.
pub fn migrate_field(
    src: &[u8],
    src_code: TypeCode,
    src_elem: usize,
    dst: &mut [u8],
    dst_code: TypeCode,
    dst_elem: usize,
) -> MigrationOutcome {
    if src_code == dst_code {
        raw_copy(src, dst);
        return MigrationOutcome::Converted;
    }
    if src_code.is_opaque() || dst_code.is_opaque() {
        raw_copy(src, dst);
        return MigrationOutcome::RawCopied;
    }
    if src_elem == 0 || dst_elem == 0 {
        raw_copy(src, dst);
        return MigrationOutcome::Unsafe;
    }
    // Misaligned payloads cannot be treated as element sequences.
    if src.len() % src_elem != 0 || dst.len() % dst_elem != 0 {
        raw_copy(src, dst);
        return MigrationOutcome::Unsafe;
    }
    if !value_codec::can_cast(src_code, dst_code, CastMode::Explicit) {
        raw_copy(src, dst);
        return MigrationOutcome::Unsafe;
    }

    let count = (src.len() / src_elem).min(dst.len() / dst_elem);
    for i in 0..count {
        let from = &src[i * src_elem..(i + 1) * src_elem];
        let to = &mut dst[i * dst_elem..(i + 1) * dst_elem];
        if value_codec::convert_element(from, src_code, to, dst_code, CastMode::Explicit).is_err() {
            raw_copy(src, dst);
            return MigrationOutcome::Unsafe;
        }
    }
    for b in dst[count * dst_elem..].iter_mut() {
        *b = 0;
    }
    MigrationOutcome::Converted
}
