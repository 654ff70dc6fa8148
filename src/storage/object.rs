//! Non-owning handles into the tree.
//!
//! A handle is a plain `(id, generation)` value. Every operation resolves
//! the id through the registry and compares generations; a drifted
//! generation means the container was pooled, reused or rescheme-d behind
//! the handle's back, and the operation fails with `StaleHandle` instead of
//! touching recycled memory.
//!
//! Operations that rescheme the container themselves (adding a missing
//! field, growing a string) take `&mut self` and move the handle forward to
//! the new generation, so a locally-held handle stays usable across its own
//! structural writes.

use std::sync::Arc;

use crate::container::layout::ContainerLayout;
use crate::container::{Container, FieldInfo, LayoutEdit};
use crate::error::{StoreError, StoreResult};
use crate::events::{self, Handler, SubscriptionHandle};
use crate::path;
use crate::registry::registry;
use crate::storage::array::StorageArray;
use crate::types::{CastMode, Primitive, TypeCode};

/// Handle to one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageObject {
    id: u64,
    generation: u64,
}

impl StorageObject {
    pub(crate) fn from_parts(id: u64, generation: u64) -> StorageObject {
        StorageObject { id, generation }
    }

    pub(crate) fn capture(container: &Container) -> StorageObject {
        StorageObject {
            id: container.id(),
            generation: container.generation(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while the handle still points at its original incarnation.
    pub fn is_alive(&self) -> bool {
        registry()
            .get(self.id)
            .map(|c| c.generation() == self.generation)
            .unwrap_or(false)
    }

    pub(crate) fn container(&self) -> StoreResult<Arc<Container>> {
        let container = registry()
            .get(self.id)
            .ok_or(StoreError::StaleHandle { id: self.id })?;
        if container.generation() != self.generation {
            return Err(StoreError::StaleHandle { id: self.id });
        }
        Ok(container)
    }

    fn refresh(&mut self, container: &Container) {
        self.generation = container.generation();
    }

    pub fn name(&self) -> StoreResult<String> {
        self.container()?.name()
    }

    pub fn field_names(&self) -> StoreResult<Vec<String>> {
        self.container()?.field_names()
    }

    pub fn exists(&self, name: &str) -> StoreResult<bool> {
        self.container()?.has_field(name)
    }

    pub fn field_info(&self, name: &str) -> StoreResult<FieldInfo> {
        self.container()?.field_info(name)
    }

    /// Field handle by name; fails when the field is missing.
    pub fn field(&self, name: &str) -> StoreResult<StorageField> {
        let container = self.container()?;
        let index = container.index_of(name)?;
        Ok(StorageField {
            object: *self,
            index,
        })
    }

    // ---- scalars ----

    pub fn read<T: Primitive>(&self, name: &str) -> StoreResult<T> {
        self.container()?.read_scalar(name)
    }

    pub fn read_with<T: Primitive>(&self, name: &str, mode: CastMode) -> StoreResult<T> {
        self.container()?.read_scalar_with(name, mode)
    }

    /// Writes a scalar, adding the field (of `T`'s kind) when absent.
    pub fn write<T: Primitive>(&mut self, name: &str, value: T) -> StoreResult<()> {
        self.write_with(name, value, CastMode::Implicit)
    }

    pub fn write_with<T: Primitive>(
        &mut self,
        name: &str,
        value: T,
        mode: CastMode,
    ) -> StoreResult<()> {
        let container = self.container()?;
        if !container.has_field(name)? {
            container.rescheme(LayoutEdit::new().add_scalar(name, T::CODE))?;
        }
        let out = container.write_scalar_with(name, value, mode);
        self.refresh(&container);
        out
    }

    // ---- text ----

    pub fn read_string(&self, name: &str) -> StoreResult<String> {
        self.container()?.read_string(name)
    }

    pub fn write_string(&mut self, name: &str, value: &str) -> StoreResult<()> {
        let container = self.container()?;
        if !container.has_field(name)? {
            let units = value.encode_utf16().count();
            container.rescheme(LayoutEdit::new().add_array(name, TypeCode::Char16, units))?;
        }
        let out = container.write_string(name, value);
        self.refresh(&container);
        out
    }

    // ---- arrays ----

    pub fn read_array<T: Primitive>(&self, name: &str) -> StoreResult<Vec<T>> {
        self.container()?.read_array(name)
    }

    /// Writes a whole array, adding or resizing the field as needed.
    pub fn write_array<T: Primitive>(&mut self, name: &str, values: &[T]) -> StoreResult<()> {
        let container = self.container()?;
        if !container.has_field(name)? {
            container.rescheme(LayoutEdit::new().add_array(name, T::CODE, values.len()))?;
        }
        let out = container.write_array(name, values, CastMode::Implicit, true);
        self.refresh(&container);
        out
    }

    /// Typed array handle over a value-array field.
    pub fn get_array(&self, name: &str) -> StoreResult<StorageArray> {
        StorageArray::over(self, name, false)
    }

    /// Array handle over a reference-array field.
    pub fn get_ref_array(&self, name: &str) -> StoreResult<StorageArray> {
        StorageArray::over(self, name, true)
    }

    // ---- structure ----

    /// Child object behind a reference field. With a `layout`, a missing
    /// field is added and a null slot is filled with a fresh child of that
    /// shape; without one, both cases fail.
    pub fn get_object(
        &mut self,
        name: &str,
        layout: Option<&Arc<ContainerLayout>>,
    ) -> StoreResult<StorageObject> {
        let container = self.container()?;
        if !container.has_field(name)? {
            if layout.is_none() {
                return Err(StoreError::not_found(name));
            }
            container.rescheme(LayoutEdit::new().add_ref(name))?;
            self.refresh(&container);
        }
        let info = container.field_info(name)?;
        if info.code != TypeCode::Ref || info.is_array {
            return Err(StoreError::type_mismatch(
                TypeCode::Ref,
                info.code,
                format!("{name:?} is not a single reference"),
            ));
        }
        let id = container.ref_id_at(name, 0)?;
        if id != 0 {
            let child = registry()
                .get(id)
                .ok_or_else(|| StoreError::not_found(format!("dangling reference {id}")))?;
            return Ok(StorageObject::capture(&child));
        }
        let Some(layout) = layout else {
            return Err(StoreError::not_found(format!("{name:?} is null")));
        };
        let child = registry().create(layout)?;
        container.set_ref_id(name, 0, child.id())?;
        Ok(StorageObject::capture(&child))
    }

    /// Read-only variant of [`StorageObject::get_object`].
    pub fn try_get_object(&self, name: &str) -> StoreResult<Option<StorageObject>> {
        let container = self.container()?;
        if !container.has_field(name)? {
            return Ok(None);
        }
        let id = container.ref_id_at(name, 0)?;
        match registry().get(id) {
            Some(child) => Ok(Some(StorageObject::capture(&child))),
            None => Ok(None),
        }
    }

    /// Retypes (or creates) a field in place and stores raw bytes.
    pub fn override_field(
        &mut self,
        name: &str,
        bytes: &[u8],
        code: TypeCode,
        array_len: Option<usize>,
    ) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.override_field(name, bytes, code, array_len);
        self.refresh(&container);
        out
    }

    pub fn delete(&mut self, name: &str) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.delete_field(name);
        self.refresh(&container);
        out
    }

    pub fn rename(&mut self, from: &str, to: &str) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.rename_field(from, to);
        self.refresh(&container);
        out
    }

    /// Moves a field onto another object, transferring subtree ownership
    /// for reference fields.
    pub fn move_field(
        &mut self,
        name: &str,
        dst: &mut StorageObject,
        dst_name: &str,
    ) -> StoreResult<()> {
        let src = self.container()?;
        let target = dst.container()?;
        let out = src.move_field(name, &target, dst_name);
        self.refresh(&src);
        dst.refresh(&target);
        out
    }

    /// Applies a raw layout edit to this container.
    pub fn rescheme(&mut self, edit: LayoutEdit) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.rescheme(edit);
        self.refresh(&container);
        out
    }

    // ---- paths ----

    /// Resolves a dotted path; with `create`, missing links are added.
    pub fn object_by_path(&mut self, p: &str, create: bool) -> StoreResult<StorageObject> {
        let container = self.container()?;
        let target = path::resolve(&container, p, create, path::SEPARATOR)?;
        self.refresh(&container);
        Ok(StorageObject::capture(&target))
    }

    pub fn read_path<T: Primitive>(&self, p: &str) -> StoreResult<T> {
        path::read_scalar(&self.container()?, p)
    }

    pub fn write_path<T: Primitive>(&mut self, p: &str, value: T) -> StoreResult<()> {
        let container = self.container()?;
        let out = path::write_scalar(&container, p, value);
        self.refresh(&container);
        out
    }

    pub fn read_string_path(&self, p: &str) -> StoreResult<String> {
        path::read_string(&self.container()?, p)
    }

    pub fn write_string_path(&mut self, p: &str, value: &str) -> StoreResult<()> {
        let container = self.container()?;
        let out = path::write_string(&container, p, value);
        self.refresh(&container);
        out
    }

    pub fn read_array_path<T: Primitive>(&self, p: &str) -> StoreResult<Vec<T>> {
        path::read_array(&self.container()?, p)
    }

    pub fn write_array_path<T: Primitive>(&mut self, p: &str, values: &[T]) -> StoreResult<()> {
        let container = self.container()?;
        let out = path::write_array(&container, p, values);
        self.refresh(&container);
        out
    }

    // ---- events ----

    /// Subscribes to writes. An empty `name` listens to the whole container.
    pub fn subscribe(&self, name: &str, handler: Handler) -> StoreResult<SubscriptionHandle> {
        let container = self.container()?;
        Ok(if name.is_empty() {
            events::writes().subscribe_container(&container, handler)
        } else {
            events::writes().subscribe_field(&container, name, handler)
        })
    }

    /// Current version ticket of a field (see the write-event registry).
    pub fn field_version(&self, name: &str) -> StoreResult<u64> {
        let container = self.container()?;
        Ok(events::writes().field_version(&container, name))
    }
}

/// Handle to one field of one container incarnation. The index is stable
/// because any rescheme advances the generation and invalidates the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageField {
    object: StorageObject,
    index: usize,
}

impl StorageField {
    pub fn object(&self) -> StorageObject {
        self.object
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> StoreResult<FieldInfo> {
        self.object.container()?.field_info_at(self.index)
    }

    pub fn name(&self) -> StoreResult<String> {
        Ok(self.info()?.name)
    }

    pub fn read<T: Primitive>(&self) -> StoreResult<T> {
        let container = self.object.container()?;
        let name = container.field_info_at(self.index)?.name;
        container.read_scalar(&name)
    }

    pub fn write<T: Primitive>(&self, value: T) -> StoreResult<()> {
        let container = self.object.container()?;
        let name = container.field_info_at(self.index)?.name;
        container.write_scalar(&name, value)
    }
}
