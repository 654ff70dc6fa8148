//! In-place layout replacement.
//!
//! `apply` runs in four phases: plan the new field list from an edit,
//! materialize a destination buffer from the new stride's pool, migrate
//! fields pairwise by name, and swap the buffer in. The container keeps its
//! id; its generation advances with the swap. Subtrees referenced by fields
//! that lose their ref nature (or disappear) are torn down afterwards.

use log::{debug, warn};

use crate::container::header;
use crate::container::layout::{self, ContainerLayout, FieldSpec};
use crate::container::migrate::{migrate_field, MigrationOutcome};
use crate::container::Container;
use crate::error::{StoreError, StoreResult};
use crate::registry::registry;
use crate::types::{TypeCode, TypeTag};

#[derive(Debug, Clone)]
enum EditOp {
    Add {
        name: String,
        tag: TypeTag,
        elem_size: usize,
        length: usize,
    },
    Remove {
        name: String,
    },
    Rename {
        from: String,
        to: String,
    },
    Retype {
        name: String,
        tag: TypeTag,
        elem_size: usize,
        length: usize,
    },
    SetKind {
        name: String,
        code: TypeCode,
    },
    Resize {
        name: String,
        length: usize,
    },
}

/// A batch of layout edits, applied in order against the current layout.
#[derive(Debug, Clone, Default)]
pub struct LayoutEdit {
    ops: Vec<EditOp>,
}

impl LayoutEdit {
    pub fn new() -> LayoutEdit {
        LayoutEdit::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Adds a field with an explicit shape. Fails at apply time when the
    /// name is taken.
    pub fn add(
        mut self,
        name: impl Into<String>,
        code: TypeCode,
        is_array: bool,
        elem_size: usize,
        length: usize,
    ) -> Self {
        self.ops.push(EditOp::Add {
            name: name.into(),
            tag: TypeTag::new(code, is_array),
            elem_size,
            length,
        });
        self
    }

    pub fn add_scalar(self, name: impl Into<String>, code: TypeCode) -> Self {
        let size = code.element_size();
        self.add(name, code, false, size, size)
    }

    pub fn add_array(self, name: impl Into<String>, code: TypeCode, count: usize) -> Self {
        let size = code.element_size();
        self.add(name, code, true, size, size * count)
    }

    pub fn add_ref(self, name: impl Into<String>) -> Self {
        self.add_scalar(name, TypeCode::Ref)
    }

    pub fn add_ref_array(self, name: impl Into<String>, count: usize) -> Self {
        self.add(name, TypeCode::Ref, true, 8, 8 * count)
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.ops.push(EditOp::Remove { name: name.into() });
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(EditOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Replaces a field's kind and shape wholesale.
    pub fn retype(
        mut self,
        name: impl Into<String>,
        code: TypeCode,
        is_array: bool,
        elem_size: usize,
        length: usize,
    ) -> Self {
        self.ops.push(EditOp::Retype {
            name: name.into(),
            tag: TypeTag::new(code, is_array),
            elem_size,
            length,
        });
        self
    }

    /// Changes a field's kind, keeping its element count and array-ness.
    pub fn set_kind(mut self, name: impl Into<String>, code: TypeCode) -> Self {
        self.ops.push(EditOp::SetKind {
            name: name.into(),
            code,
        });
        self
    }

    /// Changes a field's byte length.
    pub fn resize(mut self, name: impl Into<String>, length: usize) -> Self {
        self.ops.push(EditOp::Resize {
            name: name.into(),
            length,
        });
        self
    }
}

/// One field of the planned layout plus the old field feeding it.
struct Planned {
    spec: FieldSpec,
    origin: Option<String>,
}

fn position(plan: &[Planned], name: &str) -> Option<usize> {
    plan.iter().position(|p| p.spec.name == name)
}

fn build_plan(old: &ContainerLayout, edit: LayoutEdit) -> StoreResult<Vec<Planned>> {
    let mut plan: Vec<Planned> = layout::specs_of(old)?
        .into_iter()
        .map(|spec| {
            let origin = Some(spec.name.clone());
            Planned { spec, origin }
        })
        .collect();

    for op in edit.ops {
        match op {
            EditOp::Add {
                name,
                tag,
                elem_size,
                length,
            } => {
                if position(&plan, &name).is_some() {
                    return Err(StoreError::KindChange(format!(
                        "field {name:?} already exists"
                    )));
                }
                plan.push(Planned {
                    spec: FieldSpec {
                        name,
                        tag,
                        elem_size,
                        length,
                        default: None,
                    },
                    origin: None,
                });
            }
            EditOp::Remove { name } => {
                let at = position(&plan, &name).ok_or_else(|| StoreError::not_found(&name))?;
                plan.remove(at);
            }
            EditOp::Rename { from, to } => {
                if position(&plan, &to).is_some() {
                    return Err(StoreError::KindChange(format!(
                        "field {to:?} already exists"
                    )));
                }
                let at = position(&plan, &from).ok_or_else(|| StoreError::not_found(&from))?;
                plan[at].spec.name = to;
            }
            EditOp::Retype {
                name,
                tag,
                elem_size,
                length,
            } => {
                let at = position(&plan, &name).ok_or_else(|| StoreError::not_found(&name))?;
                let spec = &mut plan[at].spec;
                spec.tag = tag;
                spec.elem_size = elem_size;
                spec.length = length;
            }
            EditOp::SetKind { name, code } => {
                let at = position(&plan, &name).ok_or_else(|| StoreError::not_found(&name))?;
                let spec = &mut plan[at].spec;
                let count = if spec.elem_size == 0 {
                    1
                } else {
                    spec.length / spec.elem_size
                };
                let size = code.element_size();
                if size == 0 {
                    // Opaque target keeps its byte length as one record.
                    spec.tag = TypeTag::new(code, spec.tag.is_array());
                    spec.elem_size = 0;
                    continue;
                }
                spec.tag = TypeTag::new(code, spec.tag.is_array());
                spec.elem_size = size;
                spec.length = count * size;
            }
            EditOp::Resize { name, length } => {
                let at = position(&plan, &name).ok_or_else(|| StoreError::not_found(&name))?;
                let spec = &mut plan[at].spec;
                if spec.elem_size > 0 && length % spec.elem_size != 0 {
                    return Err(StoreError::KindChange(format!(
                        "length {length} not a multiple of {:?}'s element size {}",
                        spec.name, spec.elem_size
                    )));
                }
                // Growing a one-element scalar makes it an inline array
                // (string and array growth paths).
                if !spec.tag.is_array() && length != spec.elem_size {
                    spec.tag = TypeTag::new(spec.tag.code(), true);
                }
                spec.length = length;
            }
        }
    }
    Ok(plan)
}

/// Plans and executes a layout edit against a live container.
pub(crate) fn apply(container: &Container, edit: LayoutEdit) -> StoreResult<()> {
    if edit.is_empty() {
        return Ok(());
    }

    // Phase 1: plan. The snapshot is the migration source; writers are
    // serialized per container by contract.
    let snapshot = container.buffer_clone()?;
    let old_layout = ContainerLayout::from_container_bytes(&snapshot)?;
    let plan = build_plan(&old_layout, edit)?;
    let origins: Vec<(String, Option<String>)> = plan
        .iter()
        .map(|p| (p.spec.name.clone(), p.origin.clone()))
        .collect();
    let new_layout = layout::build_from_specs(
        &header::container_name(&snapshot),
        plan.into_iter().map(|p| p.spec).collect(),
    )?;

    // Phase 2: materialize the destination from its stride pool.
    let mut dst = registry().pools().rent(new_layout.stride(), true);
    new_layout.materialize_into(&mut dst)?;

    // Phase 3: migrate pairwise by name; collect subtrees losing their
    // anchor along the way.
    let mut orphaned: Vec<u64> = Vec::new();
    let mut consumed: Vec<String> = Vec::new();
    for i in 0..new_layout.field_count() {
        let new_desc = new_layout.descriptor(i)?;
        let new_name = new_layout.field_name(i)?;
        let origin = origins
            .iter()
            .find(|(name, _)| *name == new_name)
            .and_then(|(_, origin)| origin.clone());
        let Some(old_name) = origin else {
            continue; // fresh field, stays zeroed
        };
        let Some(old_at) = header::find_field(&snapshot, &old_name)? else {
            continue;
        };
        consumed.push(old_name);
        let old_desc = header::read_field(&snapshot, old_at)?;
        let src = &snapshot[old_desc.data_offset..old_desc.data_offset + old_desc.length];
        let to = &mut dst[new_desc.data_offset..new_desc.data_offset + new_desc.length];

        match (old_desc.is_ref(), new_desc.is_ref()) {
            (true, true) => {
                // Ids survive the copy; slots beyond the new capacity lose
                // their subtrees.
                let keep = src.len().min(to.len());
                to[..keep].copy_from_slice(&src[..keep]);
                for chunk in src[keep..].chunks_exact(8) {
                    let id = u64::from_le_bytes(chunk.try_into().unwrap());
                    if id != 0 {
                        orphaned.push(id);
                    }
                }
            }
            (true, false) => {
                for chunk in src.chunks_exact(8) {
                    let id = u64::from_le_bytes(chunk.try_into().unwrap());
                    if id != 0 {
                        orphaned.push(id);
                    }
                }
            }
            (false, true) => {} // fresh null slots
            (false, false) => {
                let outcome = migrate_field(
                    src,
                    old_desc.code(),
                    old_desc.elem_size,
                    to,
                    new_desc.code(),
                    new_desc.elem_size,
                );
                if outcome == MigrationOutcome::Unsafe {
                    warn!(
                        "field {new_name:?}: {} -> {} migrated as raw bytes",
                        old_desc.code(),
                        new_desc.code()
                    );
                }
            }
        }
    }

    // Fields present only in the old layout: discard, tearing down refs.
    for i in 0..header::field_count(&snapshot) {
        let old_desc = header::read_field(&snapshot, i)?;
        let old_name = header::field_name(&snapshot, &old_desc);
        if consumed.contains(&old_name) || !old_desc.is_ref() {
            continue;
        }
        for chunk in
            snapshot[old_desc.data_offset..old_desc.data_offset + old_desc.length].chunks_exact(8)
        {
            let id = u64::from_le_bytes(chunk.try_into().unwrap());
            if id != 0 {
                orphaned.push(id);
            }
        }
    }

    // Phase 4: swap. The old buffer goes home to its pool; the generation
    // bump makes stale handles fail.
    let previous = container.install_buffer(dst);
    debug!(
        "container {} rescheme: {} -> {} bytes, generation {}",
        container.id(),
        previous.len(),
        new_layout.stride(),
        container.generation()
    );
    registry().pools().hand_back(previous)?;

    for id in orphaned {
        registry().unregister_id(id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::layout::ObjectBuilder;
    use crate::registry::registry;

    fn fresh(fields: ObjectBuilder) -> std::sync::Arc<Container> {
        registry().create(&fields.build_layout().unwrap()).unwrap()
    }

    #[test]
    fn add_and_remove_fields() {
        let c = fresh(
            ObjectBuilder::with_name("t")
                .set_scalar::<i32>("a")
                .set_scalar::<i32>("b"),
        );
        c.write_scalar("a", 7i32).unwrap();
        c.write_scalar("b", 9i32).unwrap();

        let id = c.id();
        c.rescheme(
            LayoutEdit::new()
                .remove("b")
                .add_scalar("c", TypeCode::Int32),
        )
        .unwrap();

        assert_eq!(c.id(), id);
        assert_eq!(c.read_scalar::<i32>("a").unwrap(), 7);
        assert_eq!(c.read_scalar::<i32>("c").unwrap(), 0);
        assert!(c.read_scalar::<i32>("b").unwrap_err().is_not_found());
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn rename_preserves_bytes() {
        let c = fresh(ObjectBuilder::with_name("t").set_scalar::<i64>("old"));
        c.write_scalar("old", -5i64).unwrap();
        c.rescheme(LayoutEdit::new().rename("old", "new")).unwrap();
        assert_eq!(c.read_scalar::<i64>("new").unwrap(), -5);
        assert!(!c.has_field("old").unwrap());
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn set_kind_converts_elements() {
        let c = fresh(ObjectBuilder::with_name("t").set_array::<i32>("vals", 3));
        c.write_array("vals", &[1i32, 2, 3], crate::types::CastMode::Strict, false)
            .unwrap();
        c.rescheme(LayoutEdit::new().set_kind("vals", TypeCode::Float64))
            .unwrap();
        assert_eq!(
            c.read_array::<f64>("vals").unwrap(),
            vec![1.0, 2.0, 3.0]
        );
        let info = c.field_info("vals").unwrap();
        assert_eq!(info.code, TypeCode::Float64);
        assert_eq!(info.element_count(), 3);
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn generation_bumps_and_id_stays() {
        let c = fresh(ObjectBuilder::with_name("t").set_scalar::<u8>("x"));
        let (id, generation) = (c.id(), c.generation());
        c.rescheme(LayoutEdit::new().add_scalar("y", TypeCode::Int16))
            .unwrap();
        assert_eq!(c.id(), id);
        assert!(c.generation() > generation);
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn removing_ref_field_tears_down_subtree() {
        let c = fresh(ObjectBuilder::with_name("t").set_ref("kid"));
        let kid = registry()
            .create(&ObjectBuilder::with_name("kid").set_scalar::<i32>("v").build_layout().unwrap())
            .unwrap();
        c.set_ref_id("kid", 0, kid.id()).unwrap();
        let kid_id = kid.id();

        c.rescheme(LayoutEdit::new().remove("kid")).unwrap();
        assert!(registry().get(kid_id).is_none());
        assert!(kid.is_disposed());
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn ref_to_value_transition_unregisters_children() {
        let c = fresh(ObjectBuilder::with_name("t").set_ref_array("kids", 2));
        let layout = ObjectBuilder::with_name("k").build_layout().unwrap();
        let a = registry().create(&layout).unwrap();
        let b = registry().create(&layout).unwrap();
        c.set_ref_id("kids", 0, a.id()).unwrap();
        c.set_ref_id("kids", 1, b.id()).unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        c.rescheme(LayoutEdit::new().set_kind("kids", TypeCode::Int64))
            .unwrap();
        assert!(registry().get(a_id).is_none());
        assert!(registry().get(b_id).is_none());
        // Value slots are zeroed, not inherited from ids.
        assert_eq!(c.read_array::<i64>("kids").unwrap(), vec![0, 0]);
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn shrinking_ref_array_drops_tail_subtrees() {
        let c = fresh(ObjectBuilder::with_name("t").set_ref_array("kids", 3));
        let layout = ObjectBuilder::with_name("k").build_layout().unwrap();
        let keep = registry().create(&layout).unwrap();
        let drop_ = registry().create(&layout).unwrap();
        c.set_ref_id("kids", 0, keep.id()).unwrap();
        c.set_ref_id("kids", 2, drop_.id()).unwrap();
        let (keep_id, drop_id) = (keep.id(), drop_.id());

        c.rescheme(LayoutEdit::new().resize("kids", 8)).unwrap();
        assert_eq!(c.ref_ids("kids").unwrap(), vec![keep_id]);
        assert!(registry().get(keep_id).is_some());
        assert!(registry().get(drop_id).is_none());
        registry().unregister(&c).unwrap();
    }

    #[test]
    fn unknown_edit_targets_are_not_found() {
        let c = fresh(ObjectBuilder::with_name("t").set_scalar::<i32>("a"));
        assert!(c
            .rescheme(LayoutEdit::new().remove("missing"))
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            c.rescheme(LayoutEdit::new().add_scalar("a", TypeCode::Int32))
                .unwrap_err(),
            StoreError::KindChange(_)
        ));
        registry().unregister(&c).unwrap();
    }
}
