//! Array handles: a typed view over a value-array field, or a slot-wise
//! view over a reference array.

use std::sync::Arc;

use crate::container::layout::ContainerLayout;
use crate::container::{Container, LayoutEdit};
use crate::error::{StoreError, StoreResult};
use crate::registry::registry;
use crate::storage::object::StorageObject;
use crate::types::{CastMode, Primitive, TypeCode};

/// Handle to one array field of one container incarnation. Carries the
/// element kind so typed access can be checked before touching bytes.
#[derive(Debug, Clone)]
pub struct StorageArray {
    object: StorageObject,
    name: String,
    code: TypeCode,
    elem_size: usize,
    is_ref: bool,
}

impl StorageArray {
    pub(crate) fn over(
        object: &StorageObject,
        name: &str,
        want_ref: bool,
    ) -> StoreResult<StorageArray> {
        let info = object.field_info(name)?;
        if !info.is_array {
            return Err(StoreError::type_mismatch(
                info.code,
                info.code,
                format!("{name:?} is not an array field"),
            ));
        }
        let is_ref = info.code == TypeCode::Ref;
        if want_ref != is_ref {
            return Err(StoreError::type_mismatch(
                if want_ref { TypeCode::Ref } else { info.code },
                info.code,
                format!("{name:?} has the wrong reference nature"),
            ));
        }
        Ok(StorageArray {
            object: *object,
            name: name.to_string(),
            code: info.code,
            elem_size: info.elem_size,
            is_ref,
        })
    }

    fn container(&self) -> StoreResult<Arc<Container>> {
        self.object.container()
    }

    fn refresh(&mut self, container: &Container) {
        self.object = StorageObject::from_parts(self.object.id(), container.generation());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> TypeCode {
        self.code
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn is_ref(&self) -> bool {
        self.is_ref
    }

    pub fn len(&self) -> StoreResult<usize> {
        if self.is_ref {
            self.container()?.ref_len(&self.name)
        } else {
            self.container()?.array_len(&self.name)
        }
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    // ---- value arrays ----

    pub fn get<T: Primitive>(&self, index: usize) -> StoreResult<T> {
        self.container()?.array_get(&self.name, index)
    }

    pub fn set<T: Primitive>(&self, index: usize, value: T) -> StoreResult<()> {
        self.container()?.array_set(&self.name, index, value)
    }

    pub fn to_vec<T: Primitive>(&self) -> StoreResult<Vec<T>> {
        self.container()?.read_array(&self.name)
    }

    /// Bulk element copy. Length mismatches fail unless `allow_resize`.
    pub fn copy_from<T: Primitive>(&mut self, src: &[T], allow_resize: bool) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.write_array(&self.name, src, CastMode::Implicit, allow_resize);
        self.refresh(&container);
        out
    }

    /// Replaces the field wholesale with `src`'s kind and length.
    pub fn override_with<T: Primitive>(&mut self, src: &[T]) -> StoreResult<()> {
        let container = self.container()?;
        let mut bytes = vec![0u8; src.len() * T::SIZE];
        for (i, value) in src.iter().enumerate() {
            value.write_le(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
        }
        let out = container.override_field(&self.name, &bytes, T::CODE, Some(src.len()));
        self.refresh(&container);
        self.code = T::CODE;
        self.elem_size = T::SIZE;
        out
    }

    /// Changes the element count, preserving the overlap.
    pub fn resize(&mut self, count: usize) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.rescheme(
            LayoutEdit::new().resize(&self.name, count * self.elem_size.max(1)),
        );
        self.refresh(&container);
        out
    }

    // ---- text (Char16 arrays) ----

    pub fn as_string(&self) -> StoreResult<String> {
        self.container()?.read_string(&self.name)
    }

    /// Writes text, growing or shrinking the field to fit.
    pub fn write_str(&mut self, value: &str) -> StoreResult<()> {
        let container = self.container()?;
        let out = container.write_string(&self.name, value);
        self.refresh(&container);
        out
    }

    // ---- reference arrays ----

    fn require_ref(&self) -> StoreResult<()> {
        if !self.is_ref {
            return Err(StoreError::type_mismatch(
                TypeCode::Ref,
                self.code,
                format!("{:?} is a value array", self.name),
            ));
        }
        Ok(())
    }

    pub fn id_at(&self, index: usize) -> StoreResult<u64> {
        self.require_ref()?;
        self.container()?.ref_id_at(&self.name, index)
    }

    /// Child at `index`. An empty slot is filled with a fresh child of
    /// `layout`'s shape when one is given, and fails otherwise.
    pub fn object_at(
        &self,
        index: usize,
        layout: Option<&Arc<ContainerLayout>>,
    ) -> StoreResult<StorageObject> {
        self.require_ref()?;
        let container = self.container()?;
        let id = container.ref_id_at(&self.name, index)?;
        if id != 0 {
            let child = registry()
                .get(id)
                .ok_or_else(|| StoreError::not_found(format!("dangling reference {id}")))?;
            return Ok(StorageObject::capture(&child));
        }
        let Some(layout) = layout else {
            return Err(StoreError::not_found(format!(
                "{:?}[{index}] is null",
                self.name
            )));
        };
        let child = registry().create(layout)?;
        container.set_ref_id(&self.name, index, child.id())?;
        Ok(StorageObject::capture(&child))
    }

    /// Child at `index`, or None for an empty slot.
    pub fn object_at_no_allocate(&self, index: usize) -> StoreResult<Option<StorageObject>> {
        self.require_ref()?;
        let id = self.container()?.ref_id_at(&self.name, index)?;
        Ok(registry().get(id).map(|c| StorageObject::capture(&c)))
    }

    /// Empties one slot, tearing down the subtree it anchored.
    pub fn clear_at(&self, index: usize) -> StoreResult<()> {
        self.require_ref()?;
        let container = self.container()?;
        let id = container.ref_id_at(&self.name, index)?;
        container.set_ref_id(&self.name, index, 0)?;
        registry().unregister_id(id)?;
        Ok(())
    }

    /// Empties every slot, tearing down each subtree.
    pub fn clear_all(&self) -> StoreResult<()> {
        self.require_ref()?;
        let container = self.container()?;
        for index in 0..container.ref_len(&self.name)? {
            let id = container.ref_id_at(&self.name, index)?;
            if id != 0 {
                container.set_ref_id(&self.name, index, 0)?;
                registry().unregister_id(id)?;
            }
        }
        Ok(())
    }
}
