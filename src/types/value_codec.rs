//! Single-element codec: every primitive kind read from / written to
//! little-endian bytes, plus the closed conversion table between kinds.

use crate::error::{StoreError, StoreResult};
use crate::types::type_code::TypeCode;

/// How far a conversion between two primitive kinds is allowed to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMode {
    /// Source kind must equal the destination kind.
    Strict,
    /// Lossless widening only (see [`TypeCode::implicitly_converts_to`]).
    Implicit,
    /// Additionally allows narrowing (wrap), float to int (truncate toward
    /// zero), int to Bool (non-zero becomes 1), Bool to numeric, and the
    /// Char16 pairings of matching width.
    Explicit,
}

/// One decoded element. Integral kinds (including Char16 and Bool widths)
/// normalize into `Int`; floats into `Float`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Element {
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl Element {
    pub fn is_nan(self) -> bool {
        matches!(self, Element::Float(f) if f.is_nan())
    }

    pub fn is_finite(self) -> bool {
        match self {
            Element::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

fn opaque_error(code: TypeCode) -> StoreError {
    StoreError::type_mismatch(code, code, "kind has no element representation")
}

/// Decodes one element of `code` from exactly `code.element_size()` bytes.
pub fn read_element(bytes: &[u8], code: TypeCode) -> StoreResult<Element> {
    let size = code.element_size();
    if size == 0 || code == TypeCode::Ref {
        return Err(opaque_error(code));
    }
    if bytes.len() < size {
        return Err(StoreError::IndexOutOfRange {
            index: size,
            len: bytes.len(),
        });
    }
    let e = match code {
        TypeCode::Bool => Element::Bool(bytes[0] != 0),
        TypeCode::Int8 => Element::Int(bytes[0] as i8 as i128),
        TypeCode::UInt8 => Element::Int(bytes[0] as i128),
        TypeCode::Char16 | TypeCode::UInt16 => {
            Element::Int(u16::from_le_bytes([bytes[0], bytes[1]]) as i128)
        }
        TypeCode::Int16 => Element::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i128),
        TypeCode::Int32 => {
            Element::Int(i32::from_le_bytes(bytes[..4].try_into().unwrap()) as i128)
        }
        TypeCode::UInt32 => {
            Element::Int(u32::from_le_bytes(bytes[..4].try_into().unwrap()) as i128)
        }
        TypeCode::Int64 => {
            Element::Int(i64::from_le_bytes(bytes[..8].try_into().unwrap()) as i128)
        }
        TypeCode::UInt64 => {
            Element::Int(u64::from_le_bytes(bytes[..8].try_into().unwrap()) as i128)
        }
        TypeCode::Float32 => {
            Element::Float(f32::from_le_bytes(bytes[..4].try_into().unwrap()) as f64)
        }
        TypeCode::Float64 => Element::Float(f64::from_le_bytes(bytes[..8].try_into().unwrap())),
        TypeCode::Unknown | TypeCode::Blob | TypeCode::Ref => unreachable!(),
    };
    Ok(e)
}

/// Encodes `elem` as one element of `code`, wrapping or truncating as the
/// target width demands. Mode legality is the caller's concern; this is the
/// raw store step.
pub fn write_element(bytes: &mut [u8], code: TypeCode, elem: Element) -> StoreResult<()> {
    let size = code.element_size();
    if size == 0 || code == TypeCode::Ref {
        return Err(opaque_error(code));
    }
    if bytes.len() < size {
        return Err(StoreError::IndexOutOfRange {
            index: size,
            len: bytes.len(),
        });
    }
    let int_of = |e: Element| -> i128 {
        match e {
            Element::Bool(b) => b as i128,
            Element::Int(v) => v,
            // Truncation toward zero; out-of-range saturates at the i128
            // bounds before the width wrap below.
            Element::Float(f) => {
                let t = f.trunc();
                if t >= i128::MAX as f64 {
                    i128::MAX
                } else if t <= i128::MIN as f64 {
                    i128::MIN
                } else {
                    t as i128
                }
            }
        }
    };
    let float_of = |e: Element| -> f64 {
        match e {
            Element::Bool(b) => b as u8 as f64,
            Element::Int(v) => v as f64,
            Element::Float(f) => f,
        }
    };
    match code {
        TypeCode::Bool => {
            let set = match elem {
                Element::Bool(b) => b,
                Element::Int(v) => v != 0,
                Element::Float(f) => f != 0.0,
            };
            bytes[0] = set as u8;
        }
        TypeCode::Int8 => bytes[0] = int_of(elem) as i8 as u8,
        TypeCode::UInt8 => bytes[0] = int_of(elem) as u8,
        TypeCode::Char16 | TypeCode::UInt16 => {
            bytes[..2].copy_from_slice(&(int_of(elem) as u16).to_le_bytes())
        }
        TypeCode::Int16 => bytes[..2].copy_from_slice(&(int_of(elem) as i16).to_le_bytes()),
        TypeCode::Int32 => bytes[..4].copy_from_slice(&(int_of(elem) as i32).to_le_bytes()),
        TypeCode::UInt32 => bytes[..4].copy_from_slice(&(int_of(elem) as u32).to_le_bytes()),
        TypeCode::Int64 => bytes[..8].copy_from_slice(&(int_of(elem) as i64).to_le_bytes()),
        TypeCode::UInt64 => bytes[..8].copy_from_slice(&(int_of(elem) as u64).to_le_bytes()),
        TypeCode::Float32 => bytes[..4].copy_from_slice(&(float_of(elem) as f32).to_le_bytes()),
        TypeCode::Float64 => bytes[..8].copy_from_slice(&float_of(elem).to_le_bytes()),
        TypeCode::Unknown | TypeCode::Blob | TypeCode::Ref => unreachable!(),
    }
    Ok(())
}

/// Whether one element of `src` may be stored into `dst` under `mode`.
pub fn can_cast(src: TypeCode, dst: TypeCode, mode: CastMode) -> bool {
    use TypeCode::*;
    match mode {
        CastMode::Strict => src == dst,
        CastMode::Implicit => src.implicitly_converts_to(dst),
        CastMode::Explicit => {
            if src.implicitly_converts_to(dst) {
                return true;
            }
            let plain_int = |c: TypeCode| c.is_integral() && c != Char16;
            match (src, dst) {
                (s, d) if plain_int(s) && plain_int(d) => true,
                (s, d) if s.is_float() && d.is_float() => true,
                (s, d) if s.is_float() && plain_int(d) => true,
                (s, d) if plain_int(s) && d.is_float() => true,
                (s, Bool) if plain_int(s) => true,
                (Bool, d) if d.is_numeric() => true,
                (Char16, Int16) | (Char16, UInt16) | (Int16, Char16) | (UInt16, Char16) => true,
                (Char16, Float32) | (Char16, Float64) | (Float32, Char16) | (Float64, Char16) => {
                    true
                }
                _ => false,
            }
        }
    }
}

/// Converts one element from `src_code` bytes into `dst_code` bytes.
///
/// Same-kind conversion is a plain byte copy. Opaque kinds (`Unknown`,
/// `Blob`) and `Ref` never pass through here except as same-kind copies.
pub fn convert_element(
    src: &[u8],
    src_code: TypeCode,
    dst: &mut [u8],
    dst_code: TypeCode,
    mode: CastMode,
) -> StoreResult<()> {
    if !can_cast(src_code, dst_code, mode) {
        return Err(StoreError::type_mismatch(
            dst_code,
            src_code,
            format!("no {mode:?} conversion"),
        ));
    }
    if src_code == dst_code {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        for b in dst[n..].iter_mut() {
            *b = 0;
        }
        return Ok(());
    }
    let elem = read_element(src, src_code)?;
    write_element(dst, dst_code, elem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(src: &[u8], s: TypeCode, d: TypeCode, mode: CastMode) -> StoreResult<Vec<u8>> {
        let mut out = vec![0u8; d.element_size()];
        convert_element(src, s, &mut out, d, mode)?;
        Ok(out)
    }

    #[test]
    fn widening_preserves_values() {
        let out = convert(&(-7i8).to_le_bytes(), TypeCode::Int8, TypeCode::Int64, CastMode::Implicit)
            .unwrap();
        assert_eq!(i64::from_le_bytes(out.try_into().unwrap()), -7);

        let out = convert(
            &300u16.to_le_bytes(),
            TypeCode::UInt16,
            TypeCode::Float64,
            CastMode::Implicit,
        )
        .unwrap();
        assert_eq!(f64::from_le_bytes(out.try_into().unwrap()), 300.0);
    }

    #[test]
    fn implicit_rejects_narrowing() {
        let err = convert(
            &1000i32.to_le_bytes(),
            TypeCode::Int32,
            TypeCode::Int8,
            CastMode::Implicit,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[test]
    fn explicit_wraps_and_truncates() {
        // 0x1_02 wraps to 0x02 in eight bits.
        let out = convert(
            &258i32.to_le_bytes(),
            TypeCode::Int32,
            TypeCode::UInt8,
            CastMode::Explicit,
        )
        .unwrap();
        assert_eq!(out[0], 2);

        // Float truncates toward zero.
        let out = convert(
            &(-3.9f64).to_le_bytes(),
            TypeCode::Float64,
            TypeCode::Int32,
            CastMode::Explicit,
        )
        .unwrap();
        assert_eq!(i32::from_le_bytes(out.try_into().unwrap()), -3);
    }

    #[test]
    fn bool_conversions() {
        let out = convert(
            &42i64.to_le_bytes(),
            TypeCode::Int64,
            TypeCode::Bool,
            CastMode::Explicit,
        )
        .unwrap();
        assert_eq!(out[0], 1);

        let out = convert(&[1], TypeCode::Bool, TypeCode::Int32, CastMode::Explicit).unwrap();
        assert_eq!(i32::from_le_bytes(out.try_into().unwrap()), 1);

        // Bool only implicitly converts to itself.
        assert!(!can_cast(TypeCode::Bool, TypeCode::Int32, CastMode::Implicit));
    }

    #[test]
    fn char16_pairings() {
        assert!(can_cast(TypeCode::Char16, TypeCode::UInt16, CastMode::Explicit));
        assert!(can_cast(TypeCode::UInt16, TypeCode::Char16, CastMode::Explicit));
        assert!(can_cast(TypeCode::Float32, TypeCode::Char16, CastMode::Explicit));
        assert!(!can_cast(TypeCode::Int32, TypeCode::Char16, CastMode::Explicit));
        assert!(can_cast(TypeCode::Char16, TypeCode::Int64, CastMode::Implicit));
    }

    #[test]
    fn opaque_kinds_never_convert() {
        assert!(!can_cast(TypeCode::Blob, TypeCode::Int32, CastMode::Explicit));
        assert!(!can_cast(TypeCode::Int32, TypeCode::Blob, CastMode::Explicit));
        assert!(!can_cast(TypeCode::Ref, TypeCode::Int64, CastMode::Explicit));
        // Identity is still a raw copy.
        let out = convert(&[1, 2, 3], TypeCode::Blob, TypeCode::Blob, CastMode::Strict);
        assert!(out.is_ok());
    }

    #[test]
    fn every_widening_pair_round_trips() {
        // 42 is representable in every primitive kind, so a widened value
        // must always read back as 42.
        for src in TypeCode::ALL {
            if !src.is_numeric() && src != TypeCode::Char16 {
                continue;
            }
            let mut encoded = vec![0u8; src.element_size()];
            write_element(&mut encoded, src, Element::Int(42)).unwrap();
            for dst in TypeCode::ALL {
                if !src.implicitly_converts_to(dst) || dst == src {
                    continue;
                }
                let mut widened = vec![0u8; dst.element_size()];
                convert_element(&encoded, src, &mut widened, dst, CastMode::Implicit)
                    .unwrap_or_else(|e| panic!("{src} -> {dst}: {e}"));
                match read_element(&widened, dst).unwrap() {
                    Element::Int(v) => assert_eq!(v, 42, "{src} -> {dst}"),
                    Element::Float(v) => assert_eq!(v, 42.0, "{src} -> {dst}"),
                    Element::Bool(_) => panic!("{src} -> {dst} gave a bool"),
                }
            }
        }
    }

    #[test]
    fn element_predicates() {
        assert!(Element::Float(f64::NAN).is_nan());
        assert!(!Element::Float(1.0).is_nan());
        assert!(!Element::Float(f64::INFINITY).is_finite());
        assert!(Element::Int(7).is_finite());
    }
}
