//! Immutable container blueprints.
//!
//! A [`ContainerLayout`] is the header + field-table + name-segment prefix of
//! a container with no data segment attached. Materializing a container
//! copies the blob into a pooled buffer of the layout's stride and zero-fills
//! the data segment, then applies any builder-recorded defaults.

use std::sync::Arc;

use crate::container::header::{self, FieldDesc, CONTAINER_HEADER_SIZE, FIELD_HEADER_SIZE};
use crate::error::{StoreError, StoreResult};
use crate::types::{Primitive, TypeCode, TypeTag};

/// Immutable header blob used as a template for containers of one shape.
#[derive(Debug, Clone)]
pub struct ContainerLayout {
    blob: Vec<u8>,
    stride: usize,
    defaults: Vec<(usize, Vec<u8>)>,
}

impl PartialEq for ContainerLayout {
    fn eq(&self, other: &Self) -> bool {
        self.blob == other.blob
    }
}

impl Eq for ContainerLayout {}

impl ContainerLayout {
    /// Layout with no fields and the given container name.
    pub fn empty(name: &str) -> Arc<ContainerLayout> {
        // Building an empty field list cannot fail.
        Arc::new(build_from_specs(name, Vec::new()).expect("empty layout"))
    }

    /// Recovers a layout from a full container buffer (used when adopting
    /// foreign bytes: binary parse, pooling of rescheme-d containers).
    pub fn from_container_bytes(buf: &[u8]) -> StoreResult<ContainerLayout> {
        header::validate(buf)?;
        Ok(ContainerLayout {
            blob: buf[..header::data_offset(buf)].to_vec(),
            stride: buf.len(),
            defaults: Vec::new(),
        })
    }

    /// Total byte length of a container of this shape.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Header+names prefix; `blob().len()` equals the data offset.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn field_count(&self) -> usize {
        header::field_count(&self.blob)
    }

    pub fn name(&self) -> String {
        header::container_name(&self.blob)
    }

    pub fn find_field(&self, name: &str) -> StoreResult<Option<usize>> {
        header::find_field(&self.blob, name)
    }

    pub fn descriptor(&self, index: usize) -> StoreResult<FieldDesc> {
        header::read_field(&self.blob, index)
    }

    pub fn field_name(&self, index: usize) -> StoreResult<String> {
        let desc = self.descriptor(index)?;
        Ok(header::field_name(&self.blob, &desc))
    }

    /// Copies the blob into `buf` (which must be exactly `stride` long with a
    /// zeroed data segment) and applies defaults.
    pub(crate) fn materialize_into(&self, buf: &mut [u8]) -> StoreResult<()> {
        if buf.len() != self.stride {
            return Err(StoreError::PoolViolation {
                stride: self.stride,
                got: buf.len(),
            });
        }
        buf[..self.blob.len()].copy_from_slice(&self.blob);
        for (index, bytes) in &self.defaults {
            let desc = self.descriptor(*index)?;
            let n = bytes.len().min(desc.length);
            buf[desc.data_offset..desc.data_offset + n].copy_from_slice(&bytes[..n]);
        }
        Ok(())
    }
}

/// One planned field. Crate-internal currency between the builder and the
/// rescheme planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldSpec {
    pub name: String,
    pub tag: TypeTag,
    pub elem_size: usize,
    pub length: usize,
    pub default: Option<Vec<u8>>,
}

impl FieldSpec {
    fn check(&self) -> StoreResult<()> {
        let bad = |msg: String| Err(StoreError::BadFormat(msg));
        if self.name.is_empty() {
            return bad("field name must not be empty".into());
        }
        let name_units = self.name.encode_utf16().count();
        if name_units > u16::MAX as usize {
            return bad(format!("field name {:?} too long", self.name));
        }
        if self.elem_size > u16::MAX as usize {
            return bad(format!("element size {} too large", self.elem_size));
        }
        if self.length > u32::MAX as usize {
            return bad(format!("field length {} too large", self.length));
        }
        if self.elem_size > 0 && self.length % self.elem_size != 0 {
            return bad(format!(
                "length {} not a multiple of element size {}",
                self.length, self.elem_size
            ));
        }
        if self.tag.code() == TypeCode::Ref && self.length % 8 != 0 {
            return bad(format!("ref field length {} not id-aligned", self.length));
        }
        Ok(())
    }
}

/// Builds the blob for a sorted, deduplicated (last wins) field list.
pub(crate) fn build_from_specs(
    container_name: &str,
    mut specs: Vec<FieldSpec>,
) -> StoreResult<ContainerLayout> {
    // Last spec for a name wins, then sort by UTF-16 ordinal.
    let mut deduped: Vec<FieldSpec> = Vec::with_capacity(specs.len());
    while let Some(spec) = specs.pop() {
        if !deduped.iter().any(|kept| kept.name == spec.name) {
            deduped.push(spec);
        }
    }
    deduped.sort_by(|a, b| {
        let left: Vec<u16> = a.name.encode_utf16().collect();
        let right: Vec<u16> = b.name.encode_utf16().collect();
        left.cmp(&right)
    });
    for spec in &deduped {
        spec.check()?;
    }

    let cname_units: Vec<u16> = container_name.encode_utf16().collect();
    if cname_units.len() > u16::MAX as usize {
        return Err(StoreError::BadFormat("container name too long".into()));
    }
    let count = deduped.len();
    if count > u16::MAX as usize {
        return Err(StoreError::BadFormat(format!("{count} fields exceed the table limit")));
    }

    let names_start = CONTAINER_HEADER_SIZE + count * FIELD_HEADER_SIZE;
    let names_bytes: usize = 2 * cname_units.len()
        + deduped
            .iter()
            .map(|s| 2 * s.name.encode_utf16().count())
            .sum::<usize>();
    let data_offset = names_start + names_bytes;
    let data_bytes: usize = deduped.iter().map(|s| s.length).sum();
    let stride = data_offset + data_bytes;
    if stride > u32::MAX as usize {
        return Err(StoreError::BadFormat(format!("container of {stride} bytes too large")));
    }

    let mut blob = vec![0u8; data_offset];
    header::set_total_length(&mut blob, stride);
    header::set_data_offset(&mut blob, data_offset);
    header::set_field_count(&mut blob, count);
    header::set_container_name_len(&mut blob, cname_units.len());

    let mut name_at = names_start;
    for unit in &cname_units {
        blob[name_at..name_at + 2].copy_from_slice(&unit.to_le_bytes());
        name_at += 2;
    }

    let mut data_at = data_offset;
    let mut defaults = Vec::new();
    for (i, spec) in deduped.iter().enumerate() {
        let units: Vec<u16> = spec.name.encode_utf16().collect();
        let desc = FieldDesc {
            name_hash: header::name_hash(units.iter().copied()),
            name_offset: name_at,
            name_len: units.len(),
            tag: spec.tag,
            elem_size: spec.elem_size,
            data_offset: data_at,
            length: spec.length,
        };
        header::write_field(&mut blob, i, &desc);
        for unit in &units {
            blob[name_at..name_at + 2].copy_from_slice(&unit.to_le_bytes());
            name_at += 2;
        }
        data_at += spec.length;
        if let Some(bytes) = &spec.default {
            defaults.push((i, bytes.clone()));
        }
    }
    debug_assert_eq!(name_at, data_offset);
    debug_assert_eq!(data_at, stride);

    Ok(ContainerLayout {
        blob,
        stride,
        defaults,
    })
}

/// Extracts the field list back out of a layout (rescheme planning).
pub(crate) fn specs_of(layout: &ContainerLayout) -> StoreResult<Vec<FieldSpec>> {
    let mut specs = Vec::with_capacity(layout.field_count());
    for i in 0..layout.field_count() {
        let desc = layout.descriptor(i)?;
        specs.push(FieldSpec {
            name: layout.field_name(i)?,
            tag: desc.tag,
            elem_size: desc.elem_size,
            length: desc.length,
            default: None,
        });
    }
    Ok(specs)
}

/// Fluent blueprint builder.
///
/// Field order given to the builder is irrelevant; the layout sorts its
/// field table by name. Re-adding a name replaces the earlier definition.
#[derive(Debug, Clone, Default)]
pub struct ObjectBuilder {
    name: String,
    specs: Vec<FieldSpec>,
}

impl ObjectBuilder {
    pub fn new() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    pub fn with_name(name: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder {
            name: name.into(),
            specs: Vec::new(),
        }
    }

    fn push(mut self, spec: FieldSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Scalar field of `T`'s kind, zero-initialized.
    pub fn set_scalar<T: Primitive>(self, name: impl Into<String>) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::scalar(T::CODE),
            elem_size: T::SIZE,
            length: T::SIZE,
            default: None,
        })
    }

    /// Scalar field of `T`'s kind with a materialization default.
    pub fn set_scalar_default<T: Primitive>(self, name: impl Into<String>, value: T) -> Self {
        let mut bytes = vec![0u8; T::SIZE];
        value.write_le(&mut bytes);
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::scalar(T::CODE),
            elem_size: T::SIZE,
            length: T::SIZE,
            default: Some(bytes),
        })
    }

    /// Inline array of `len` elements of `T`'s kind.
    pub fn set_array<T: Primitive>(self, name: impl Into<String>, len: usize) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::array(T::CODE),
            elem_size: T::SIZE,
            length: len * T::SIZE,
            default: None,
        })
    }

    /// Single UTF-16 code unit.
    pub fn set_char16(self, name: impl Into<String>) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::scalar(TypeCode::Char16),
            elem_size: 2,
            length: 2,
            default: None,
        })
    }

    /// Char16 array sized for `capacity` code units (string storage).
    pub fn set_string(self, name: impl Into<String>, capacity: usize) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::array(TypeCode::Char16),
            elem_size: 2,
            length: capacity * 2,
            default: None,
        })
    }

    /// Char16 array preloaded with `value` (capacity equals its length).
    pub fn set_string_default(self, name: impl Into<String>, value: &str) -> Self {
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut bytes = Vec::with_capacity(units.len() * 2);
        for unit in &units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::array(TypeCode::Char16),
            elem_size: 2,
            length: units.len() * 2,
            default: Some(bytes),
        })
    }

    /// Single reference slot (null until pointed at a child).
    pub fn set_ref(self, name: impl Into<String>) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::scalar(TypeCode::Ref),
            elem_size: 8,
            length: 8,
            default: None,
        })
    }

    /// Array of `len` reference slots.
    pub fn set_ref_array(self, name: impl Into<String>, len: usize) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::array(TypeCode::Ref),
            elem_size: 8,
            length: len * 8,
            default: None,
        })
    }

    /// Opaque blob of `size` bytes (no element granularity).
    pub fn set_blob(self, name: impl Into<String>, size: usize) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::scalar(TypeCode::Blob),
            elem_size: 0,
            length: size,
            default: None,
        })
    }

    /// Blob array: `len` opaque records of `elem_size` bytes each.
    pub fn set_blob_array(self, name: impl Into<String>, elem_size: usize, len: usize) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            tag: TypeTag::array(TypeCode::Blob),
            elem_size,
            length: elem_size * len,
            default: None,
        })
    }

    pub fn build_layout(self) -> StoreResult<Arc<ContainerLayout>> {
        Ok(Arc::new(build_from_specs(&self.name, self.specs)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::header;

    #[test]
    fn empty_layout_is_header_and_name_only() {
        let layout = ContainerLayout::empty("root");
        assert_eq!(layout.field_count(), 0);
        assert_eq!(layout.name(), "root");
        assert_eq!(layout.stride(), CONTAINER_HEADER_SIZE + 2 * 4);
    }

    #[test]
    fn builder_sorts_and_offsets() {
        let layout = ObjectBuilder::with_name("unit")
            .set_scalar::<i32>("b")
            .set_scalar::<f64>("a")
            .set_array::<u8>("c", 3)
            .build_layout()
            .unwrap();

        assert_eq!(layout.field_count(), 3);
        assert_eq!(layout.field_name(0).unwrap(), "a");
        assert_eq!(layout.field_name(1).unwrap(), "b");
        assert_eq!(layout.field_name(2).unwrap(), "c");

        let a = layout.descriptor(0).unwrap();
        let b = layout.descriptor(1).unwrap();
        let c = layout.descriptor(2).unwrap();
        assert_eq!(a.code(), TypeCode::Float64);
        assert!(!a.is_array());
        assert_eq!(b.code(), TypeCode::Int32);
        assert_eq!(c.code(), TypeCode::UInt8);
        assert!(c.is_array());

        // Data segment is packed in table order.
        assert_eq!(b.data_offset, a.data_offset + 8);
        assert_eq!(c.data_offset, b.data_offset + 4);
        assert_eq!(layout.stride(), c.data_offset + 3);
    }

    #[test]
    fn duplicate_name_last_wins() {
        let layout = ObjectBuilder::with_name("dup")
            .set_scalar::<i32>("x")
            .set_scalar::<f64>("x")
            .build_layout()
            .unwrap();
        assert_eq!(layout.field_count(), 1);
        assert_eq!(layout.descriptor(0).unwrap().code(), TypeCode::Float64);
    }

    #[test]
    fn materialized_bytes_validate() {
        let layout = ObjectBuilder::with_name("v")
            .set_scalar_default::<i32>("hp", 100)
            .set_string_default("title", "Hi")
            .set_ref_array("kids", 2)
            .build_layout()
            .unwrap();
        let mut buf = vec![0u8; layout.stride()];
        layout.materialize_into(&mut buf).unwrap();
        header::validate(&buf).unwrap();

        let hp = header::find_field(&buf, "hp").unwrap().unwrap();
        let desc = header::read_field(&buf, hp).unwrap();
        assert_eq!(
            i32::from_le_bytes(buf[desc.data_offset..desc.data_offset + 4].try_into().unwrap()),
            100
        );
    }

    #[test]
    fn layout_recovered_from_bytes_matches() {
        let layout = ObjectBuilder::with_name("r")
            .set_scalar::<u64>("n")
            .build_layout()
            .unwrap();
        let mut buf = vec![0u8; layout.stride()];
        layout.materialize_into(&mut buf).unwrap();
        let recovered = ContainerLayout::from_container_bytes(&buf).unwrap();
        assert_eq!(&recovered, layout.as_ref());
        assert_eq!(recovered.stride(), layout.stride());
    }

    #[test]
    fn empty_field_name_rejected() {
        let err = ObjectBuilder::new().set_scalar::<i32>("").build_layout();
        assert!(err.is_err());
    }
}
