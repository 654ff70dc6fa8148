//! The storage node: one pooled byte buffer plus the identity and generation
//! cells that tie it into the registry and the event system.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::container::header::{self, FieldDesc};
use crate::container::layout::ContainerLayout;
use crate::container::rescheme::{self, LayoutEdit};
use crate::error::{StoreError, StoreResult};
use crate::events;
use crate::registry::{NULL_ID, WILD_ID};
use crate::types::value_codec::{self, CastMode};
use crate::types::{Primitive, TypeCode};

/// Decoded, name-resolved field descriptor handed out by the public surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub code: TypeCode,
    pub is_array: bool,
    pub elem_size: usize,
    pub length: usize,
}

impl FieldInfo {
    pub fn element_count(&self) -> usize {
        if self.elem_size == 0 {
            0
        } else {
            self.length / self.elem_size
        }
    }
}

/// A mutable tree node. The buffer lives behind a lock so readers can share;
/// writers are expected to be single per container (callers serialize), the
/// lock enforces memory safety, not scheduling.
///
/// An empty buffer marks a disposed (pooled) container; every access checks
/// it. The generation advances on every buffer replacement so handles and
/// subscriptions can fail fast instead of touching recycled memory.
pub struct Container {
    id: AtomicU64,
    generation: AtomicU64,
    buf: RwLock<Vec<u8>>,
}

impl Container {
    pub(crate) fn new_wild(buf: Vec<u8>) -> Container {
        Container {
            id: AtomicU64::new(WILD_ID),
            generation: AtomicU64::new(1),
            buf: RwLock::new(buf),
        }
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_wild(&self) -> bool {
        self.id() == WILD_ID
    }

    pub fn is_disposed(&self) -> bool {
        self.buf.read().is_empty()
    }

    /// Swaps in a replacement buffer, bumps the generation and returns the
    /// previous one for pooling.
    pub(crate) fn install_buffer(&self, new: Vec<u8>) -> Vec<u8> {
        let old = std::mem::replace(&mut *self.buf.write(), new);
        self.bump_generation();
        old
    }

    /// Empties the container for pooling. Returns the buffer, or None when
    /// already disposed.
    pub(crate) fn take_buffer(&self) -> Option<Vec<u8>> {
        let mut guard = self.buf.write();
        if guard.is_empty() {
            return None;
        }
        let old = std::mem::take(&mut *guard);
        drop(guard);
        self.bump_generation();
        Some(old)
    }

    pub(crate) fn with_buf<R>(&self, f: impl FnOnce(&[u8]) -> StoreResult<R>) -> StoreResult<R> {
        let guard = self.buf.read();
        if guard.is_empty() {
            return Err(StoreError::Disposed(format!("container {}", self.id())));
        }
        f(&guard)
    }

    pub(crate) fn with_buf_mut<R>(
        &self,
        f: impl FnOnce(&mut Vec<u8>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut guard = self.buf.write();
        if guard.is_empty() {
            return Err(StoreError::Disposed(format!("container {}", self.id())));
        }
        f(&mut guard)
    }

    pub(crate) fn buffer_clone(&self) -> StoreResult<Vec<u8>> {
        self.with_buf(|buf| Ok(buf.to_vec()))
    }

    /// Rebuilds the layout view of the current buffer (header+name prefix).
    pub(crate) fn current_layout(&self) -> StoreResult<ContainerLayout> {
        self.with_buf(ContainerLayout::from_container_bytes)
    }

    pub fn name(&self) -> StoreResult<String> {
        self.with_buf(|buf| Ok(header::container_name(buf)))
    }

    pub fn byte_len(&self) -> StoreResult<usize> {
        self.with_buf(|buf| Ok(buf.len()))
    }

    // ---- field table ----

    pub fn field_count(&self) -> StoreResult<usize> {
        self.with_buf(|buf| Ok(header::field_count(buf)))
    }

    pub fn has_field(&self, name: &str) -> StoreResult<bool> {
        self.with_buf(|buf| Ok(header::find_field(buf, name)?.is_some()))
    }

    pub fn index_of(&self, name: &str) -> StoreResult<usize> {
        self.with_buf(|buf| {
            header::find_field(buf, name)?.ok_or_else(|| StoreError::not_found(name))
        })
    }

    pub fn field_names(&self) -> StoreResult<Vec<String>> {
        self.with_buf(|buf| {
            let mut names = Vec::with_capacity(header::field_count(buf));
            for i in 0..header::field_count(buf) {
                let desc = header::read_field(buf, i)?;
                names.push(header::field_name(buf, &desc));
            }
            Ok(names)
        })
    }

    pub fn field_info(&self, name: &str) -> StoreResult<FieldInfo> {
        self.with_buf(|buf| {
            let i = header::find_field(buf, name)?.ok_or_else(|| StoreError::not_found(name))?;
            let desc = header::read_field(buf, i)?;
            Ok(FieldInfo {
                name: header::field_name(buf, &desc),
                code: desc.code(),
                is_array: desc.is_array(),
                elem_size: desc.elem_size,
                length: desc.length,
            })
        })
    }

    pub fn field_info_at(&self, index: usize) -> StoreResult<FieldInfo> {
        self.with_buf(|buf| {
            let desc = header::read_field(buf, index)?;
            Ok(FieldInfo {
                name: header::field_name(buf, &desc),
                code: desc.code(),
                is_array: desc.is_array(),
                elem_size: desc.elem_size,
                length: desc.length,
            })
        })
    }

    fn descriptor(buf: &[u8], name: &str) -> StoreResult<FieldDesc> {
        let i = header::find_field(buf, name)?.ok_or_else(|| StoreError::not_found(name))?;
        header::read_field(buf, i)
    }

    /// Copy of the field's logical bytes (`len == FieldHeader.length`).
    pub fn field_bytes(&self, name: &str) -> StoreResult<Vec<u8>> {
        self.with_buf(|buf| {
            let desc = Self::descriptor(buf, name)?;
            Ok(buf[desc.data_offset..desc.data_offset + desc.length].to_vec())
        })
    }

    /// Raw in-place write of a field's bytes; the source must match the
    /// field's length exactly.
    pub(crate) fn write_field_bytes(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        self.with_buf_mut(|buf| {
            let desc = Self::descriptor(buf, name)?;
            if bytes.len() != desc.length {
                return Err(StoreError::IndexOutOfRange {
                    index: bytes.len(),
                    len: desc.length,
                });
            }
            buf[desc.data_offset..desc.data_offset + desc.length].copy_from_slice(bytes);
            Ok(())
        })
    }

    // ---- scalars ----

    pub fn read_scalar<T: Primitive>(&self, name: &str) -> StoreResult<T> {
        self.read_scalar_with(name, CastMode::Implicit)
    }

    pub fn read_scalar_with<T: Primitive>(&self, name: &str, mode: CastMode) -> StoreResult<T> {
        self.with_buf(|buf| {
            let desc = Self::descriptor(buf, name)?;
            if desc.is_array() {
                return Err(StoreError::type_mismatch(
                    T::CODE,
                    desc.code(),
                    format!("{name:?} is an array field"),
                ));
            }
            let mut out = [0u8; 8];
            value_codec::convert_element(
                &buf[desc.data_offset..desc.data_offset + desc.length],
                desc.code(),
                &mut out[..T::SIZE],
                T::CODE,
                mode,
            )?;
            Ok(T::read_le(&out))
        })
    }

    pub fn write_scalar<T: Primitive>(&self, name: &str, value: T) -> StoreResult<()> {
        self.write_scalar_with(name, value, CastMode::Implicit)
    }

    pub fn write_scalar_with<T: Primitive>(
        &self,
        name: &str,
        value: T,
        mode: CastMode,
    ) -> StoreResult<()> {
        let mut src = [0u8; 8];
        value.write_le(&mut src);
        self.write_raw_scalar(name, &src[..T::SIZE], T::CODE, mode)
    }

    /// Scalar write from pre-encoded source bytes of `src_code`.
    pub fn write_raw_scalar(
        &self,
        name: &str,
        src: &[u8],
        src_code: TypeCode,
        mode: CastMode,
    ) -> StoreResult<()> {
        let kind = self.with_buf_mut(|buf| {
            let desc = Self::descriptor(buf, name)?;
            if desc.is_array() {
                return Err(StoreError::type_mismatch(
                    src_code,
                    desc.code(),
                    format!("{name:?} is an array field"),
                ));
            }
            let code = desc.code();
            let slot = &mut buf[desc.data_offset..desc.data_offset + desc.length];
            value_codec::convert_element(src, src_code, slot, code, mode)?;
            Ok(code)
        })?;
        events::writes().notify(self, name, kind, None);
        Ok(())
    }

    // ---- arrays ----

    pub fn array_len(&self, name: &str) -> StoreResult<usize> {
        self.with_buf(|buf| {
            let desc = Self::descriptor(buf, name)?;
            if !desc.is_array() {
                return Err(StoreError::type_mismatch(
                    desc.code(),
                    desc.code(),
                    format!("{name:?} is not an array field"),
                ));
            }
            Ok(desc.element_count())
        })
    }

    pub fn read_array<T: Primitive>(&self, name: &str) -> StoreResult<Vec<T>> {
        self.read_array_with(name, CastMode::Implicit)
    }

    pub fn read_array_with<T: Primitive>(&self, name: &str, mode: CastMode) -> StoreResult<Vec<T>> {
        self.with_buf(|buf| {
            let desc = Self::descriptor(buf, name)?;
            if !desc.is_array() {
                return Err(StoreError::type_mismatch(
                    T::CODE,
                    desc.code(),
                    format!("{name:?} is not an array field"),
                ));
            }
            let count = desc.element_count();
            let mut out = Vec::with_capacity(count);
            let mut tmp = [0u8; 8];
            for i in 0..count {
                let at = desc.data_offset + i * desc.elem_size;
                value_codec::convert_element(
                    &buf[at..at + desc.elem_size],
                    desc.code(),
                    &mut tmp[..T::SIZE],
                    T::CODE,
                    mode,
                )?;
                out.push(T::read_le(&tmp));
            }
            Ok(out)
        })
    }

    pub fn write_array<T: Primitive>(
        &self,
        name: &str,
        values: &[T],
        mode: CastMode,
        allow_resize: bool,
    ) -> StoreResult<()> {
        let current = self.array_len(name)?;
        if current != values.len() {
            if !allow_resize {
                return Err(StoreError::IndexOutOfRange {
                    index: values.len(),
                    len: current,
                });
            }
            let info = self.field_info(name)?;
            self.rescheme(LayoutEdit::new().resize(&info.name, values.len() * info.elem_size))?;
        }
        let kind = self.with_buf_mut(|buf| {
            let desc = Self::descriptor(buf, name)?;
            let mut src = [0u8; 8];
            for (i, value) in values.iter().enumerate() {
                value.write_le(&mut src);
                let at = desc.data_offset + i * desc.elem_size;
                value_codec::convert_element(
                    &src[..T::SIZE],
                    T::CODE,
                    &mut buf[at..at + desc.elem_size],
                    desc.code(),
                    mode,
                )?;
            }
            Ok(desc.code())
        })?;
        events::writes().notify(self, name, kind, None);
        Ok(())
    }

    pub fn array_get<T: Primitive>(&self, name: &str, index: usize) -> StoreResult<T> {
        self.with_buf(|buf| {
            let desc = Self::descriptor(buf, name)?;
            let count = desc.element_count();
            if index >= count {
                return Err(StoreError::IndexOutOfRange { index, len: count });
            }
            let at = desc.data_offset + index * desc.elem_size;
            let mut tmp = [0u8; 8];
            value_codec::convert_element(
                &buf[at..at + desc.elem_size],
                desc.code(),
                &mut tmp[..T::SIZE],
                T::CODE,
                CastMode::Implicit,
            )?;
            Ok(T::read_le(&tmp))
        })
    }

    pub fn array_set<T: Primitive>(&self, name: &str, index: usize, value: T) -> StoreResult<()> {
        let kind = self.with_buf_mut(|buf| {
            let desc = Self::descriptor(buf, name)?;
            let count = desc.element_count();
            if index >= count {
                return Err(StoreError::IndexOutOfRange { index, len: count });
            }
            let mut src = [0u8; 8];
            value.write_le(&mut src);
            let at = desc.data_offset + index * desc.elem_size;
            value_codec::convert_element(
                &src[..T::SIZE],
                T::CODE,
                &mut buf[at..at + desc.elem_size],
                desc.code(),
                CastMode::Implicit,
            )?;
            Ok(desc.code())
        })?;
        events::writes().notify(self, name, kind, None);
        Ok(())
    }

    // ---- strings (Char16 arrays) ----

    pub fn read_string(&self, name: &str) -> StoreResult<String> {
        self.with_buf(|buf| {
            let desc = Self::descriptor(buf, name)?;
            if desc.code() != TypeCode::Char16 {
                return Err(StoreError::type_mismatch(
                    TypeCode::Char16,
                    desc.code(),
                    format!("{name:?} is not text"),
                ));
            }
            let mut units: Vec<u16> = buf[desc.data_offset..desc.data_offset + desc.length]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            while units.last() == Some(&0) {
                units.pop();
            }
            Ok(String::from_utf16_lossy(&units))
        })
    }

    /// Writes text into a Char16 field, rescheme-ing the field to the exact
    /// unit count when the capacity differs.
    pub fn write_string(&self, name: &str, value: &str) -> StoreResult<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let info = self.field_info(name)?;
        if info.code != TypeCode::Char16 {
            return Err(StoreError::type_mismatch(
                TypeCode::Char16,
                info.code,
                format!("{name:?} is not text"),
            ));
        }
        if info.length != units.len() * 2 {
            self.rescheme(LayoutEdit::new().resize(name, units.len() * 2))?;
        }
        self.with_buf_mut(|buf| {
            let desc = Self::descriptor(buf, name)?;
            for (i, unit) in units.iter().enumerate() {
                let at = desc.data_offset + i * 2;
                buf[at..at + 2].copy_from_slice(&unit.to_le_bytes());
            }
            Ok(())
        })?;
        events::writes().notify(self, name, TypeCode::Char16, None);
        Ok(())
    }

    // ---- references ----

    fn ref_desc(buf: &[u8], name: &str) -> StoreResult<FieldDesc> {
        let desc = Self::descriptor(buf, name)?;
        if !desc.is_ref() {
            return Err(StoreError::type_mismatch(
                TypeCode::Ref,
                desc.code(),
                format!("{name:?} is not a reference field"),
            ));
        }
        Ok(desc)
    }

    pub fn ref_len(&self, name: &str) -> StoreResult<usize> {
        self.with_buf(|buf| Ok(Self::ref_desc(buf, name)?.length / 8))
    }

    pub fn ref_id_at(&self, name: &str, index: usize) -> StoreResult<u64> {
        self.with_buf(|buf| {
            let desc = Self::ref_desc(buf, name)?;
            let count = desc.length / 8;
            if index >= count {
                return Err(StoreError::IndexOutOfRange { index, len: count });
            }
            let at = desc.data_offset + index * 8;
            Ok(u64::from_le_bytes(buf[at..at + 8].try_into().unwrap()))
        })
    }

    pub fn ref_ids(&self, name: &str) -> StoreResult<Vec<u64>> {
        self.with_buf(|buf| {
            let desc = Self::ref_desc(buf, name)?;
            Ok(buf[desc.data_offset..desc.data_offset + desc.length]
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect())
        })
    }

    /// Stores an id into a reference slot. Ownership transfer (tearing down
    /// whatever the slot pointed at) is the caller's concern.
    pub(crate) fn set_ref_id(&self, name: &str, index: usize, id: u64) -> StoreResult<()> {
        self.with_buf_mut(|buf| {
            let desc = Self::ref_desc(buf, name)?;
            let count = desc.length / 8;
            if index >= count {
                return Err(StoreError::IndexOutOfRange { index, len: count });
            }
            let at = desc.data_offset + index * 8;
            buf[at..at + 8].copy_from_slice(&id.to_le_bytes());
            Ok(())
        })?;
        events::writes().notify(self, name, TypeCode::Ref, None);
        Ok(())
    }

    /// Visits every non-null id reachable through this container's reference
    /// fields, in field-table order.
    pub(crate) fn for_each_ref_id(&self, mut f: impl FnMut(u64)) -> StoreResult<()> {
        self.with_buf(|buf| {
            for i in 0..header::field_count(buf) {
                let desc = header::read_field(buf, i)?;
                if !desc.is_ref() {
                    continue;
                }
                for chunk in buf[desc.data_offset..desc.data_offset + desc.length].chunks_exact(8) {
                    let id = u64::from_le_bytes(chunk.try_into().unwrap());
                    if id != NULL_ID && id != WILD_ID {
                        f(id);
                    }
                }
            }
            Ok(())
        })
    }

    /// Rewrites every non-null reference slot through `map` (binary parse
    /// relinks freshly assigned ids this way). Unknown ids are a format
    /// error.
    pub(crate) fn patch_ref_ids(
        &self,
        map: &std::collections::HashMap<u64, u64>,
    ) -> StoreResult<()> {
        self.with_buf_mut(|buf| {
            for i in 0..header::field_count(buf) {
                let desc = header::read_field(buf, i)?;
                if !desc.is_ref() {
                    continue;
                }
                for at in (desc.data_offset..desc.data_offset + desc.length).step_by(8) {
                    let id = u64::from_le_bytes(buf[at..at + 8].try_into().unwrap());
                    if id == NULL_ID {
                        continue;
                    }
                    let new = map.get(&id).copied().ok_or_else(|| {
                        StoreError::BadFormat(format!("reference to unknown id {id}"))
                    })?;
                    buf[at..at + 8].copy_from_slice(&new.to_le_bytes());
                }
            }
            Ok(())
        })
    }

    // ---- structure ----

    /// Applies a layout edit in place: plan, materialize, migrate, swap.
    pub fn rescheme(&self, edit: LayoutEdit) -> StoreResult<()> {
        rescheme::apply(self, edit)
    }

    /// Removes a field. Referenced subtrees are torn down; subscribers get a
    /// field-deleted notification before the bytes disappear.
    pub fn delete_field(&self, name: &str) -> StoreResult<()> {
        if !self.has_field(name)? {
            return Err(StoreError::not_found(name));
        }
        events::writes().bump_field_version(self, name);
        events::writes().notify(self, name, TypeCode::Unknown, None);
        self.rescheme(LayoutEdit::new().remove(name))
    }

    /// Renames a field in place, preserving its bytes.
    pub fn rename_field(&self, from: &str, to: &str) -> StoreResult<()> {
        if !self.has_field(from)? {
            return Err(StoreError::not_found(from));
        }
        if self.has_field(to)? {
            return Err(StoreError::KindChange(format!(
                "cannot rename {from:?}: {to:?} already exists"
            )));
        }
        events::writes().bump_field_version(self, from);
        events::writes().notify(self, from, TypeCode::Unknown, None);
        self.rescheme(LayoutEdit::new().rename(from, to))
    }

    /// Moves a field (bytes, kind and shape) onto `dst`, removing it here.
    /// Reference fields transfer subtree ownership: the source slots are
    /// emptied before deletion so nothing is torn down.
    pub fn move_field(&self, name: &str, dst: &Container, dst_name: &str) -> StoreResult<()> {
        if std::ptr::eq(self, dst) && name == dst_name {
            return Ok(());
        }
        let info = self.field_info(name)?;
        let bytes = self.field_bytes(name)?;
        let array_len = if info.is_array {
            Some(info.element_count())
        } else {
            None
        };
        dst.override_field(dst_name, &bytes, info.code, array_len)?;
        if info.code == TypeCode::Ref {
            self.write_field_bytes(name, &vec![0u8; bytes.len()])?;
        }
        self.delete_field(name)
    }

    /// Retypes and resizes a field in place, then stores `bytes` verbatim.
    /// Missing fields are created. `array_len` selects the array shape.
    pub fn override_field(
        &self,
        name: &str,
        bytes: &[u8],
        code: TypeCode,
        array_len: Option<usize>,
    ) -> StoreResult<()> {
        let is_array = array_len.is_some();
        let elem_size = match array_len {
            Some(n) if code.element_size() == 0 => {
                if n == 0 {
                    0
                } else {
                    bytes.len() / n
                }
            }
            _ => code.element_size(),
        };
        let edit = if self.has_field(name)? {
            LayoutEdit::new().retype(name, code, is_array, elem_size, bytes.len())
        } else {
            LayoutEdit::new().add(name, code, is_array, elem_size, bytes.len())
        };
        self.rescheme(edit)?;
        self.write_field_bytes(name, bytes)?;
        events::writes().notify(self, name, code, None);
        Ok(())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::layout::ObjectBuilder;

    fn scratch(layout: &ContainerLayout) -> Container {
        let mut buf = vec![0u8; layout.stride()];
        layout.materialize_into(&mut buf).unwrap();
        Container::new_wild(buf)
    }

    fn sample() -> Container {
        let layout = ObjectBuilder::with_name("unit")
            .set_scalar_default::<i32>("hp", 100)
            .set_scalar::<f32>("mana")
            .set_array::<i32>("slots", 4)
            .set_string("label", 4)
            .set_ref("child")
            .set_ref_array("kids", 3)
            .build_layout()
            .unwrap();
        scratch(&layout)
    }

    #[test]
    fn scalar_read_write() {
        let c = sample();
        assert_eq!(c.read_scalar::<i32>("hp").unwrap(), 100);
        c.write_scalar("hp", 42i32).unwrap();
        assert_eq!(c.read_scalar::<i32>("hp").unwrap(), 42);
        // Widening read of an Int32 field.
        assert_eq!(c.read_scalar::<i64>("hp").unwrap(), 42);
        assert_eq!(c.read_scalar::<f64>("hp").unwrap(), 42.0);
    }

    #[test]
    fn implicit_write_rejects_narrowing() {
        let c = sample();
        let err = c.write_scalar("hp", 1.5f64).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        c.write_scalar_with("hp", 1.9f64, CastMode::Explicit).unwrap();
        assert_eq!(c.read_scalar::<i32>("hp").unwrap(), 1);
    }

    #[test]
    fn missing_field_is_not_found() {
        let c = sample();
        assert!(c.read_scalar::<i32>("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn array_round_trip() {
        let c = sample();
        c.write_array("slots", &[1i32, 2, 3, 4], CastMode::Strict, false)
            .unwrap();
        assert_eq!(c.read_array::<i32>("slots").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(c.array_get::<i32>("slots", 2).unwrap(), 3);
        c.array_set("slots", 2, 30i32).unwrap();
        assert_eq!(c.read_array::<i64>("slots").unwrap(), vec![1, 2, 30, 4]);
    }

    #[test]
    fn array_length_mismatch() {
        let c = sample();
        let err = c
            .write_array("slots", &[1i32, 2], CastMode::Strict, false)
            .unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfRange { .. }));
    }

    #[test]
    fn array_index_bounds() {
        let c = sample();
        let err = c.array_get::<i32>("slots", 4).unwrap_err();
        assert!(matches!(
            err,
            StoreError::IndexOutOfRange { index: 4, len: 4 }
        ));
    }

    #[test]
    fn string_round_trip_within_capacity() {
        let c = sample();
        c.write_string("label", "Hero").unwrap();
        assert_eq!(c.read_string("label").unwrap(), "Hero");
    }

    #[test]
    fn ref_slots_start_null() {
        let c = sample();
        assert_eq!(c.ref_len("child").unwrap(), 1);
        assert_eq!(c.ref_id_at("child", 0).unwrap(), NULL_ID);
        assert_eq!(c.ref_ids("kids").unwrap(), vec![0, 0, 0]);
        let mut seen = Vec::new();
        c.for_each_ref_id(|id| seen.push(id)).unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn scalar_access_to_array_field_is_type_error() {
        let c = sample();
        assert!(matches!(
            c.read_scalar::<i32>("slots").unwrap_err(),
            StoreError::TypeMismatch { .. }
        ));
        assert!(matches!(
            c.read_array::<i32>("hp").unwrap_err(),
            StoreError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn disposed_container_refuses_access() {
        let c = sample();
        let gen = c.generation();
        c.take_buffer().unwrap();
        assert!(c.is_disposed());
        assert!(c.generation() > gen);
        assert!(matches!(
            c.read_scalar::<i32>("hp").unwrap_err(),
            StoreError::Disposed(_)
        ));
    }

    #[test]
    fn field_info_reports_shape() {
        let c = sample();
        let info = c.field_info("slots").unwrap();
        assert_eq!(info.code, TypeCode::Int32);
        assert!(info.is_array);
        assert_eq!(info.element_count(), 4);

        let info = c.field_info("child").unwrap();
        assert_eq!(info.code, TypeCode::Ref);
        assert!(!info.is_array);
    }
}
