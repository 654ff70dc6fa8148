//! Bit-exact accessors for the container buffer prefix.
//!
//! A container is one contiguous buffer:
//!
//! ```text
//! [ContainerHeader][FieldHeader x N][container name UTF-16][field names UTF-16][data]
//! ```
//!
//! All integers are little-endian. Offsets inside field headers are absolute
//! buffer offsets, so a decoded [`FieldDesc`] can address names and data
//! without re-deriving segment starts.

use std::cmp::Ordering;

use crate::error::{StoreError, StoreResult};
use crate::types::{TypeCode, TypeTag};

/// Fixed container header:
/// `length: u32 | data_offset: u32 | field_count: u16 | name_len: u16 | reserved: [u8; 4]`.
pub const CONTAINER_HEADER_SIZE: usize = 16;

/// Packed per-field header:
/// `name_hash: u32 | name_offset: u32 | data_offset: u32 | length: u32 |
///  name_len: u16 | elem_size: u16 | tag: u8 | reserved: [u8; 3]`.
pub const FIELD_HEADER_SIZE: usize = 24;

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

fn write_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn total_length(buf: &[u8]) -> usize {
    read_u32(buf, 0) as usize
}

pub fn data_offset(buf: &[u8]) -> usize {
    read_u32(buf, 4) as usize
}

pub fn field_count(buf: &[u8]) -> usize {
    read_u16(buf, 8) as usize
}

pub fn container_name_len(buf: &[u8]) -> usize {
    read_u16(buf, 10) as usize
}

pub fn set_total_length(buf: &mut [u8], v: usize) {
    write_u32(buf, 0, v as u32);
}

pub fn set_data_offset(buf: &mut [u8], v: usize) {
    write_u32(buf, 4, v as u32);
}

pub fn set_field_count(buf: &mut [u8], v: usize) {
    write_u16(buf, 8, v as u16);
}

pub fn set_container_name_len(buf: &mut [u8], v: usize) {
    write_u16(buf, 10, v as u16);
}

/// Byte offset where the name segment begins (right after the field table).
pub fn names_start(buf: &[u8]) -> usize {
    CONTAINER_HEADER_SIZE + field_count(buf) * FIELD_HEADER_SIZE
}

/// Decoded field header. Offsets are absolute buffer offsets; `name_len` is
/// in UTF-16 code units, `length` in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    pub name_hash: u32,
    pub name_offset: usize,
    pub name_len: usize,
    pub tag: TypeTag,
    pub elem_size: usize,
    pub data_offset: usize,
    pub length: usize,
}

impl FieldDesc {
    pub fn code(&self) -> TypeCode {
        self.tag.code()
    }

    pub fn is_array(&self) -> bool {
        self.tag.is_array()
    }

    pub fn is_ref(&self) -> bool {
        self.code() == TypeCode::Ref
    }

    /// Number of elements for array-shaped fields (0 when `elem_size` is 0).
    pub fn element_count(&self) -> usize {
        if self.elem_size == 0 {
            0
        } else {
            self.length / self.elem_size
        }
    }
}

fn field_at(i: usize) -> usize {
    CONTAINER_HEADER_SIZE + i * FIELD_HEADER_SIZE
}

pub fn read_field(buf: &[u8], i: usize) -> StoreResult<FieldDesc> {
    let n = field_count(buf);
    if i >= n {
        return Err(StoreError::IndexOutOfRange { index: i, len: n });
    }
    let at = field_at(i);
    let tag = TypeTag::from_raw(buf[at + 20])
        .ok_or_else(|| StoreError::BadFormat(format!("invalid type tag {:#x}", buf[at + 20])))?;
    Ok(FieldDesc {
        name_hash: read_u32(buf, at),
        name_offset: read_u32(buf, at + 4) as usize,
        data_offset: read_u32(buf, at + 8) as usize,
        length: read_u32(buf, at + 12) as usize,
        name_len: read_u16(buf, at + 16) as usize,
        elem_size: read_u16(buf, at + 18) as usize,
        tag,
    })
}

pub fn write_field(buf: &mut [u8], i: usize, desc: &FieldDesc) {
    let at = field_at(i);
    write_u32(buf, at, desc.name_hash);
    write_u32(buf, at + 4, desc.name_offset as u32);
    write_u32(buf, at + 8, desc.data_offset as u32);
    write_u32(buf, at + 12, desc.length as u32);
    write_u16(buf, at + 16, desc.name_len as u16);
    write_u16(buf, at + 18, desc.elem_size as u16);
    buf[at + 20] = desc.tag.raw();
    buf[at + 21..at + 24].fill(0);
}

/// UTF-16LE code units of a field's name, straight off the buffer.
pub fn field_name_units<'b>(buf: &'b [u8], desc: &FieldDesc) -> impl Iterator<Item = u16> + 'b {
    let start = desc.name_offset;
    let end = start + desc.name_len * 2;
    buf[start..end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
}

pub fn field_name(buf: &[u8], desc: &FieldDesc) -> String {
    let units: Vec<u16> = field_name_units(buf, desc).collect();
    String::from_utf16_lossy(&units)
}

/// The container's own name (leads the name segment).
pub fn container_name(buf: &[u8]) -> String {
    let start = names_start(buf);
    let len = container_name_len(buf);
    let units: Vec<u16> = buf[start..start + len * 2]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// FNV-1a over UTF-16 code units (low byte then high byte). The hash lives
/// in the buffer, so it must stay independent of any process-seeded hasher.
pub fn name_hash(units: impl Iterator<Item = u16>) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for unit in units {
        for byte in unit.to_le_bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
    }
    hash
}

pub fn hash_str(name: &str) -> u32 {
    name_hash(name.encode_utf16())
}

/// Ordinal comparison of a stored field name against a lookup key.
fn cmp_name(buf: &[u8], desc: &FieldDesc, key: &[u16]) -> Ordering {
    let mut stored = field_name_units(buf, desc);
    let mut wanted = key.iter().copied();
    loop {
        match (stored.next(), wanted.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

/// Binary search over the sorted field table. The stored hash is compared
/// first as a cheap inequality filter on the exact-match probe.
pub fn find_field(buf: &[u8], name: &str) -> StoreResult<Option<usize>> {
    let key: Vec<u16> = name.encode_utf16().collect();
    let hash = name_hash(key.iter().copied());
    let mut lo = 0usize;
    let mut hi = field_count(buf);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let desc = read_field(buf, mid)?;
        match cmp_name(buf, &desc, &key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => {
                if desc.name_hash != hash {
                    return Err(StoreError::BadFormat(format!(
                        "stored hash {:#x} does not match name {name:?}",
                        desc.name_hash
                    )));
                }
                return Ok(Some(mid));
            }
        }
    }
    Ok(None)
}

/// Structural validation used on foreign bytes (binary parse) and in debug
/// assertions: header totals, field bounds, table sortedness.
pub fn validate(buf: &[u8]) -> StoreResult<()> {
    let fail = |msg: String| Err(StoreError::BadFormat(msg));
    if buf.len() < CONTAINER_HEADER_SIZE {
        return fail(format!("buffer of {} bytes has no header", buf.len()));
    }
    if total_length(buf) != buf.len() {
        return fail(format!(
            "header length {} != buffer length {}",
            total_length(buf),
            buf.len()
        ));
    }
    let n = field_count(buf);
    let names = names_start(buf);
    let data = data_offset(buf);
    if names > buf.len() || data > buf.len() || names > data {
        return fail(format!(
            "segment bounds out of order: names {names}, data {data}, total {}",
            buf.len()
        ));
    }
    let mut names_bytes = container_name_len(buf) * 2;
    let mut data_bytes = 0usize;
    let mut prev: Option<FieldDesc> = None;
    for i in 0..n {
        let desc = read_field(buf, i)?;
        if desc.name_offset < names || desc.name_offset + desc.name_len * 2 > data {
            return fail(format!("field {i} name escapes the name segment"));
        }
        if desc.data_offset < data || desc.data_offset + desc.length > buf.len() {
            return fail(format!("field {i} data escapes the data segment"));
        }
        if desc.elem_size > 0 && desc.length % desc.elem_size != 0 {
            return fail(format!(
                "field {i} length {} not a multiple of element size {}",
                desc.length, desc.elem_size
            ));
        }
        if desc.is_ref() && desc.length % 8 != 0 {
            return fail(format!("ref field {i} length {} not id-aligned", desc.length));
        }
        if let Some(p) = prev {
            let key: Vec<u16> = field_name_units(buf, &desc).collect();
            if cmp_name(buf, &p, &key) != Ordering::Less {
                return fail(format!("field table unsorted at index {i}"));
            }
        }
        names_bytes += desc.name_len * 2;
        data_bytes += desc.length;
        prev = Some(desc);
    }
    if names + names_bytes != data {
        return fail(format!(
            "name segment is {names_bytes} bytes but data starts at {data} (names at {names})"
        ));
    }
    if data + data_bytes != buf.len() {
        return fail(format!(
            "data segment is {data_bytes} bytes but buffer holds {}",
            buf.len() - data
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        // Pinned: the hash is a wire value.
        assert_eq!(hash_str(""), 0x811c_9dc5);
        assert_eq!(hash_str("a"), name_hash("a".encode_utf16()));
        assert_ne!(hash_str("Health"), hash_str("health"));
    }

    #[test]
    fn header_round_trip() {
        let mut buf = vec![0u8; CONTAINER_HEADER_SIZE];
        set_total_length(&mut buf, 1234);
        set_data_offset(&mut buf, 99);
        set_field_count(&mut buf, 3);
        set_container_name_len(&mut buf, 5);
        assert_eq!(total_length(&buf), 1234);
        assert_eq!(data_offset(&buf), 99);
        assert_eq!(field_count(&buf), 3);
        assert_eq!(container_name_len(&buf), 5);
    }

    #[test]
    fn field_desc_round_trip() {
        let mut buf = vec![0u8; CONTAINER_HEADER_SIZE + FIELD_HEADER_SIZE];
        set_field_count(&mut buf, 1);
        let desc = FieldDesc {
            name_hash: hash_str("x"),
            name_offset: 40,
            name_len: 1,
            tag: TypeTag::array(TypeCode::Float32),
            elem_size: 4,
            data_offset: 42,
            length: 16,
        };
        write_field(&mut buf, 0, &desc);
        assert_eq!(read_field(&buf, 0).unwrap(), desc);
        assert!(read_field(&buf, 1).is_err());
    }
}
