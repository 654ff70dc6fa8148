use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive kinds a field can hold. Fits in the low 5 bits of a field's
/// packed type byte; the discriminants are part of the wire format and must
/// not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeCode {
    Unknown = 0,
    Bool = 1,
    Int8 = 2,
    UInt8 = 3,
    Char16 = 4,
    Int16 = 5,
    UInt16 = 6,
    Int32 = 7,
    UInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    Float32 = 11,
    Float64 = 12,
    Blob = 13,
    Ref = 14,
}

impl TypeCode {
    pub const ALL: [TypeCode; 15] = [
        TypeCode::Unknown,
        TypeCode::Bool,
        TypeCode::Int8,
        TypeCode::UInt8,
        TypeCode::Char16,
        TypeCode::Int16,
        TypeCode::UInt16,
        TypeCode::Int32,
        TypeCode::UInt32,
        TypeCode::Int64,
        TypeCode::UInt64,
        TypeCode::Float32,
        TypeCode::Float64,
        TypeCode::Blob,
        TypeCode::Ref,
    ];

    pub fn from_u8(raw: u8) -> Option<TypeCode> {
        TypeCode::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Unknown => "UNKNOWN",
            TypeCode::Bool => "BOOL",
            TypeCode::Int8 => "INT8",
            TypeCode::UInt8 => "UINT8",
            TypeCode::Char16 => "CHAR16",
            TypeCode::Int16 => "INT16",
            TypeCode::UInt16 => "UINT16",
            TypeCode::Int32 => "INT32",
            TypeCode::UInt32 => "UINT32",
            TypeCode::Int64 => "INT64",
            TypeCode::UInt64 => "UINT64",
            TypeCode::Float32 => "FLOAT32",
            TypeCode::Float64 => "FLOAT64",
            TypeCode::Blob => "BLOB",
            TypeCode::Ref => "REF",
        }
    }

    /// Size of one element in bytes. `Unknown` and `Blob` have no intrinsic
    /// element size (the field header carries it); they report 0.
    pub fn element_size(self) -> usize {
        match self {
            TypeCode::Unknown | TypeCode::Blob => 0,
            TypeCode::Bool | TypeCode::Int8 | TypeCode::UInt8 => 1,
            TypeCode::Char16 | TypeCode::Int16 | TypeCode::UInt16 => 2,
            TypeCode::Int32 | TypeCode::UInt32 | TypeCode::Float32 => 4,
            TypeCode::Int64 | TypeCode::UInt64 | TypeCode::Float64 | TypeCode::Ref => 8,
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            TypeCode::Int8
                | TypeCode::UInt8
                | TypeCode::Char16
                | TypeCode::Int16
                | TypeCode::UInt16
                | TypeCode::Int32
                | TypeCode::UInt32
                | TypeCode::Int64
                | TypeCode::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeCode::Float32 | TypeCode::Float64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            TypeCode::Int8
                | TypeCode::Int16
                | TypeCode::Int32
                | TypeCode::Int64
                | TypeCode::Float32
                | TypeCode::Float64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integral() || self.is_float()
    }

    /// Kinds whose bytes are opaque to the converter.
    pub fn is_opaque(self) -> bool {
        matches!(self, TypeCode::Unknown | TypeCode::Blob)
    }

    /// The lossless widening matrix. Identity always holds; everything else
    /// listed here preserves the numeric value exactly enough to round-trip
    /// in the widened representation.
    pub fn implicitly_converts_to(self, dst: TypeCode) -> bool {
        use TypeCode::*;
        if self == dst {
            return true;
        }
        match self {
            Int8 => matches!(dst, Int16 | Int32 | Int64 | Float32 | Float64),
            UInt8 => matches!(
                dst,
                Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64 | Float32 | Float64
            ),
            Int16 => matches!(dst, Int32 | Int64 | Float32 | Float64),
            UInt16 => matches!(dst, Int32 | UInt32 | Int64 | UInt64 | Float32 | Float64),
            Int32 => matches!(dst, Int64 | Float32 | Float64),
            UInt32 => matches!(dst, Int64 | UInt64 | Float32 | Float64),
            Int64 | UInt64 => matches!(dst, Float32 | Float64),
            Float32 => matches!(dst, Float64),
            Char16 => matches!(dst, Int32 | UInt32 | Int64 | UInt64 | Float32 | Float64),
            _ => false,
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Packed type byte stored in a field header: bits 0..5 carry the kind,
/// bit 7 the IsArray flag, bits 5..7 are reserved and kept zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(u8);

const KIND_MASK: u8 = 0x1f;
const ARRAY_BIT: u8 = 0x80;

impl TypeTag {
    pub fn new(code: TypeCode, is_array: bool) -> TypeTag {
        let mut raw = code as u8;
        if is_array {
            raw |= ARRAY_BIT;
        }
        TypeTag(raw)
    }

    pub fn scalar(code: TypeCode) -> TypeTag {
        TypeTag::new(code, false)
    }

    pub fn array(code: TypeCode) -> TypeTag {
        TypeTag::new(code, true)
    }

    pub fn from_raw(raw: u8) -> Option<TypeTag> {
        TypeCode::from_u8(raw & KIND_MASK)?;
        Some(TypeTag(raw))
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn code(self) -> TypeCode {
        // from_raw validated the kind bits.
        TypeCode::from_u8(self.0 & KIND_MASK).unwrap_or(TypeCode::Unknown)
    }

    pub fn is_array(self) -> bool {
        self.0 & ARRAY_BIT != 0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array() {
            write!(f, "{}[]", self.code())
        } else {
            write!(f, "{}", self.code())
        }
    }
}
