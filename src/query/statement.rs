//! Terminal statements: the point where a deferred query touches the tree.

use std::sync::Arc;

use crate::container::layout::ContainerLayout;
use crate::container::{Container, FieldInfo, LayoutEdit};
use crate::error::{StoreError, StoreResult};
use crate::path::{self, PathSegment};
use crate::query::query::{OwnedSegment, QueryOutcome};
use crate::registry::registry;
use crate::storage::StorageObject;
use crate::types::{CastMode, Primitive, TypeCode};

/// Shared statement state: the anchor, the compiled segments and the
/// outcome carried along the chain.
pub(crate) struct StatementCtx {
    root: StorageObject,
    segments: Vec<OwnedSegment>,
    outcome: QueryOutcome,
}

impl StatementCtx {
    pub(crate) fn new(root: StorageObject, compiled: StoreResult<Vec<OwnedSegment>>) -> Self {
        match compiled {
            Ok(segments) => StatementCtx {
                root,
                segments,
                outcome: QueryOutcome::ok(),
            },
            Err(e) => StatementCtx {
                root,
                segments: Vec::new(),
                outcome: QueryOutcome::fail(e),
            },
        }
    }

    fn leaf(&self) -> &OwnedSegment {
        // `new` stores at least one segment whenever the outcome is ok.
        &self.segments[self.segments.len() - 1]
    }

    /// Walks to the leaf's parent container.
    fn resolve_parent(&self, create: bool) -> StoreResult<Arc<Container>> {
        let mut current = self.root.container()?;
        for segment in &self.segments[..self.segments.len() - 1] {
            let step = PathSegment {
                name: &segment.name,
                index: segment.index,
            };
            current = path::step(&current, &step, create)?;
        }
        Ok(current)
    }
}

fn encode_units(value: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Creates at the path. With `allow_override`, an existing field of an
/// incompatible shape is retyped in place; without it, the mismatch fails.
pub struct MakeStatement {
    ctx: StatementCtx,
    allow_override: bool,
}

impl MakeStatement {
    pub(crate) fn new(ctx: StatementCtx, allow_override: bool) -> Self {
        MakeStatement {
            ctx,
            allow_override,
        }
    }

    fn run(self, f: impl FnOnce(&Arc<Container>, &OwnedSegment, bool) -> StoreResult<()>) -> QueryOutcome {
        if !self.ctx.outcome.is_success() {
            return self.ctx.outcome;
        }
        let out = (|| {
            let parent = self.ctx.resolve_parent(true)?;
            f(&parent, self.ctx.leaf(), self.allow_override)
        })();
        QueryOutcome::from_result(out)
    }

    pub fn scalar<T: Primitive>(self, value: T) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            if let Some(index) = leaf.index {
                return make_array_element(parent, &leaf.name, index, value, allow_override);
            }
            match parent.has_field(&leaf.name)? {
                false => {
                    parent.rescheme(LayoutEdit::new().add_scalar(&leaf.name, T::CODE))?;
                    parent.write_scalar(&leaf.name, value)
                }
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == T::CODE && !info.is_array {
                        return parent.write_scalar(&leaf.name, value);
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            T::CODE,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    let mut bytes = vec![0u8; T::SIZE];
                    value.write_le(&mut bytes);
                    parent.override_field(&leaf.name, &bytes, T::CODE, None)
                }
            }
        })
    }

    pub fn string(self, value: &str) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            if leaf.index.is_some() {
                return Err(StoreError::MalformedPath(
                    "text cannot target an indexed location".into(),
                ));
            }
            let units = value.encode_utf16().count();
            match parent.has_field(&leaf.name)? {
                false => {
                    parent
                        .rescheme(LayoutEdit::new().add_array(&leaf.name, TypeCode::Char16, units))?;
                    parent.write_string(&leaf.name, value)
                }
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == TypeCode::Char16 {
                        return parent.write_string(&leaf.name, value);
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            TypeCode::Char16,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    parent.override_field(
                        &leaf.name,
                        &encode_units(value),
                        TypeCode::Char16,
                        Some(units),
                    )
                }
            }
        })
    }

    pub fn array<T: Primitive>(self, values: &[T]) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            if leaf.index.is_some() {
                return Err(StoreError::MalformedPath(
                    "an array cannot target an indexed location".into(),
                ));
            }
            match parent.has_field(&leaf.name)? {
                false => {
                    parent.rescheme(LayoutEdit::new().add_array(&leaf.name, T::CODE, values.len()))?;
                    parent.write_array(&leaf.name, values, CastMode::Implicit, false)
                }
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == T::CODE && info.is_array {
                        return parent.write_array(&leaf.name, values, CastMode::Implicit, true);
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            T::CODE,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    let mut bytes = vec![0u8; values.len() * T::SIZE];
                    for (i, v) in values.iter().enumerate() {
                        v.write_le(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
                    }
                    parent.override_field(&leaf.name, &bytes, T::CODE, Some(values.len()))
                }
            }
        })
    }

    /// Creates (or re-anchors) a child object at the path and returns its
    /// handle.
    pub fn object(self, layout: Option<&Arc<ContainerLayout>>) -> StoreResult<StorageObject> {
        if let Some(e) = self.ctx.outcome.error() {
            return Err(e.clone());
        }
        let parent = self.ctx.resolve_parent(true)?;
        let leaf = self.ctx.leaf();
        make_object(
            &parent,
            &leaf.name,
            leaf.index,
            layout,
            self.allow_override,
        )
    }

    /// Ensures the leaf is a reference array of `len` slots.
    pub fn object_array(self, len: usize) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            if leaf.index.is_some() {
                return Err(StoreError::MalformedPath(
                    "an object array cannot target an indexed location".into(),
                ));
            }
            match parent.has_field(&leaf.name)? {
                false => parent.rescheme(LayoutEdit::new().add_ref_array(&leaf.name, len)),
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == TypeCode::Ref && info.is_array {
                        if info.element_count() == len {
                            return Ok(());
                        }
                        return parent.rescheme(LayoutEdit::new().resize(&leaf.name, len * 8));
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            TypeCode::Ref,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    parent.rescheme(
                        LayoutEdit::new().retype(&leaf.name, TypeCode::Ref, true, 8, len * 8),
                    )
                }
            }
        })
    }
}

fn make_array_element<T: Primitive>(
    parent: &Arc<Container>,
    name: &str,
    index: usize,
    value: T,
    allow_override: bool,
) -> StoreResult<()> {
    match parent.has_field(name)? {
        false => {
            parent.rescheme(LayoutEdit::new().add_array(name, T::CODE, index + 1))?;
        }
        true => {
            let info = parent.field_info(name)?;
            if !(info.code == T::CODE && info.is_array) {
                if !allow_override {
                    return Err(StoreError::type_mismatch(
                        T::CODE,
                        info.code,
                        format!("{name:?} exists with another shape"),
                    ));
                }
                parent.rescheme(LayoutEdit::new().retype(
                    name,
                    T::CODE,
                    true,
                    T::SIZE,
                    (index + 1) * T::SIZE,
                ))?;
            } else if info.element_count() <= index {
                parent.rescheme(LayoutEdit::new().resize(name, (index + 1) * T::SIZE))?;
            }
        }
    }
    parent.array_set(name, index, value)
}

fn make_object(
    parent: &Arc<Container>,
    name: &str,
    index: Option<usize>,
    layout: Option<&Arc<ContainerLayout>>,
    allow_override: bool,
) -> StoreResult<StorageObject> {
    if !parent.has_field(name)? {
        let edit = match index {
            None => LayoutEdit::new().add_ref(name),
            Some(i) => LayoutEdit::new().add_ref_array(name, i + 1),
        };
        parent.rescheme(edit)?;
    } else {
        let info = parent.field_info(name)?;
        let shape_ok = info.code == TypeCode::Ref && info.is_array == index.is_some();
        if !shape_ok {
            if !allow_override {
                return Err(StoreError::type_mismatch(
                    TypeCode::Ref,
                    info.code,
                    format!("{name:?} exists with another shape"),
                ));
            }
            let (is_array, length) = match index {
                None => (false, 8),
                Some(i) => (true, (i + 1) * 8),
            };
            parent.rescheme(LayoutEdit::new().retype(name, TypeCode::Ref, is_array, 8, length))?;
        } else if let Some(i) = index {
            if parent.ref_len(name)? <= i {
                parent.rescheme(LayoutEdit::new().resize(name, (i + 1) * 8))?;
            }
        }
    }
    let slot = index.unwrap_or(0);
    let id = parent.ref_id_at(name, slot)?;
    if id != 0 {
        if let Some(child) = registry().get(id) {
            return Ok(StorageObject::capture(&child));
        }
    }
    let child = match layout {
        Some(layout) => registry().create(layout)?,
        None => registry().create(&ContainerLayout::empty(name))?,
    };
    parent.set_ref_id(name, slot, child.id())?;
    Ok(StorageObject::capture(&child))
}

/// Creates when absent, validates shape when present. With
/// `allow_override`, a shape mismatch is overwritten instead of failing.
/// Existing values are left untouched.
pub struct EnsureStatement {
    ctx: StatementCtx,
    allow_override: bool,
}

impl EnsureStatement {
    pub(crate) fn new(ctx: StatementCtx, allow_override: bool) -> Self {
        EnsureStatement {
            ctx,
            allow_override,
        }
    }

    fn run(
        self,
        f: impl FnOnce(&Arc<Container>, &OwnedSegment, bool) -> StoreResult<()>,
    ) -> QueryOutcome {
        if !self.ctx.outcome.is_success() {
            return self.ctx.outcome;
        }
        let out = (|| {
            let parent = self.ctx.resolve_parent(true)?;
            f(&parent, self.ctx.leaf(), self.allow_override)
        })();
        QueryOutcome::from_result(out)
    }

    pub fn scalar<T: Primitive>(self, default: T) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            if leaf.index.is_some() {
                return Err(StoreError::MalformedPath(
                    "ensure does not target indexed locations".into(),
                ));
            }
            match parent.has_field(&leaf.name)? {
                false => {
                    parent.rescheme(LayoutEdit::new().add_scalar(&leaf.name, T::CODE))?;
                    parent.write_scalar(&leaf.name, default)
                }
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == T::CODE && !info.is_array {
                        return Ok(()); // present with the right shape: keep
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            T::CODE,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    let mut bytes = vec![0u8; T::SIZE];
                    default.write_le(&mut bytes);
                    parent.override_field(&leaf.name, &bytes, T::CODE, None)
                }
            }
        })
    }

    pub fn string(self, default: &str) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            match parent.has_field(&leaf.name)? {
                false => {
                    let units = default.encode_utf16().count();
                    parent
                        .rescheme(LayoutEdit::new().add_array(&leaf.name, TypeCode::Char16, units))?;
                    parent.write_string(&leaf.name, default)
                }
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == TypeCode::Char16 {
                        return Ok(());
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            TypeCode::Char16,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    let units = default.encode_utf16().count();
                    parent.override_field(
                        &leaf.name,
                        &encode_units(default),
                        TypeCode::Char16,
                        Some(units),
                    )
                }
            }
        })
    }

    pub fn array<T: Primitive>(self, defaults: &[T]) -> QueryOutcome {
        self.run(|parent, leaf, allow_override| {
            match parent.has_field(&leaf.name)? {
                false => {
                    parent.rescheme(
                        LayoutEdit::new().add_array(&leaf.name, T::CODE, defaults.len()),
                    )?;
                    parent.write_array(&leaf.name, defaults, CastMode::Implicit, false)
                }
                true => {
                    let info = parent.field_info(&leaf.name)?;
                    if info.code == T::CODE && info.is_array {
                        return Ok(());
                    }
                    if !allow_override {
                        return Err(StoreError::type_mismatch(
                            T::CODE,
                            info.code,
                            format!("{:?} exists with another shape", leaf.name),
                        ));
                    }
                    let mut bytes = vec![0u8; defaults.len() * T::SIZE];
                    for (i, v) in defaults.iter().enumerate() {
                        v.write_le(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
                    }
                    parent.override_field(&leaf.name, &bytes, T::CODE, Some(defaults.len()))
                }
            }
        })
    }

    /// Descends into (creating when needed) a child object.
    pub fn object(self, layout: Option<&Arc<ContainerLayout>>) -> StoreResult<StorageObject> {
        if let Some(e) = self.ctx.outcome.error() {
            return Err(e.clone());
        }
        let parent = self.ctx.resolve_parent(true)?;
        let leaf = self.ctx.leaf();
        // Ensure never overwrites an existing child, so override only kicks
        // in for non-reference fields.
        make_object(
            &parent,
            &leaf.name,
            leaf.index,
            layout,
            self.allow_override,
        )
    }
}

/// Read-only resolution of the leaf.
pub struct ExistStatement {
    outcome: QueryOutcome,
    parent: Option<Arc<Container>>,
    leaf: Option<OwnedSegment>,
}

impl ExistStatement {
    pub(crate) fn new(ctx: StatementCtx) -> Self {
        if !ctx.outcome.is_success() {
            return ExistStatement {
                outcome: ctx.outcome,
                parent: None,
                leaf: None,
            };
        }
        let leaf = ctx.leaf().clone();
        match ctx.resolve_parent(false) {
            Ok(parent) => ExistStatement {
                outcome: ctx.outcome,
                leaf: Some(leaf),
                parent: Some(parent),
            },
            Err(e) => ExistStatement {
                outcome: QueryOutcome::fail(e),
                parent: None,
                leaf: None,
            },
        }
    }

    pub fn outcome(&self) -> &QueryOutcome {
        &self.outcome
    }

    fn resolved(&self) -> Option<(&Arc<Container>, &OwnedSegment)> {
        Some((self.parent.as_ref()?, self.leaf.as_ref()?))
    }

    /// Whether the leaf exists (and, for indexed leaves, whether the slot
    /// is within bounds and non-null for references).
    pub fn found(&self) -> bool {
        let Some((parent, leaf)) = self.resolved() else {
            return false;
        };
        let Ok(info) = parent.field_info(&leaf.name) else {
            return false;
        };
        match leaf.index {
            None => true,
            Some(index) => {
                if !info.is_array || index >= info.element_count() {
                    return false;
                }
                if info.code == TypeCode::Ref {
                    parent
                        .ref_id_at(&leaf.name, index)
                        .map(|id| id != 0)
                        .unwrap_or(false)
                } else {
                    true
                }
            }
        }
    }

    pub fn info(&self) -> Option<FieldInfo> {
        let (parent, leaf) = self.resolved()?;
        parent.field_info(&leaf.name).ok()
    }

    /// Follows the leaf reference to a child handle.
    pub fn object(&self) -> Option<StorageObject> {
        let (parent, leaf) = self.resolved()?;
        let id = parent.ref_id_at(&leaf.name, leaf.index.unwrap_or(0)).ok()?;
        registry().get(id).map(|c| StorageObject::capture(&c))
    }

    pub fn scalar<T: Primitive>(&self) -> StoreResult<T> {
        let (parent, leaf) = self
            .resolved()
            .ok_or_else(|| self.unresolved_error())?;
        match leaf.index {
            None => parent.read_scalar(&leaf.name),
            Some(index) => parent.array_get(&leaf.name, index),
        }
    }

    pub fn string(&self) -> StoreResult<String> {
        let (parent, leaf) = self
            .resolved()
            .ok_or_else(|| self.unresolved_error())?;
        parent.read_string(&leaf.name)
    }

    pub fn array<T: Primitive>(&self) -> StoreResult<Vec<T>> {
        let (parent, leaf) = self
            .resolved()
            .ok_or_else(|| self.unresolved_error())?;
        parent.read_array(&leaf.name)
    }

    fn unresolved_error(&self) -> StoreError {
        self.outcome
            .error()
            .cloned()
            .unwrap_or_else(|| StoreError::not_found("query target"))
    }
}

/// Chained non-mutating assertions. A failed strict predicate
/// short-circuits the rest of the chain; soft predicates (`strict=false`)
/// pass through without flipping the outcome.
pub struct ExpectStatement {
    exist: ExistStatement,
    outcome: QueryOutcome,
}

impl ExpectStatement {
    pub(crate) fn new(ctx: StatementCtx) -> Self {
        let exist = ExistStatement::new(ctx);
        let outcome = exist.outcome().clone();
        ExpectStatement { exist, outcome }
    }

    fn check(
        mut self,
        strict: bool,
        f: impl FnOnce(&ExistStatement) -> StoreResult<bool>,
    ) -> Self {
        if !self.outcome.is_success() {
            return self;
        }
        let verdict = f(&self.exist);
        match verdict {
            Ok(true) => {}
            Ok(false) if strict => {
                self.outcome = QueryOutcome::fail(StoreError::BadFormat(
                    "expectation failed".into(),
                ));
            }
            Err(e) if strict => self.outcome = QueryOutcome::fail(e),
            _ => {} // soft miss: pass through
        }
        self
    }

    pub fn present(self, strict: bool) -> Self {
        self.check(strict, |exist| Ok(exist.found()))
    }

    pub fn absent(self, strict: bool) -> Self {
        self.check(strict, |exist| Ok(!exist.found()))
    }

    pub fn kind(self, code: TypeCode, strict: bool) -> Self {
        self.check(strict, move |exist| {
            Ok(exist.info().map(|i| i.code == code).unwrap_or(false))
        })
    }

    pub fn scalar_eq<T: Primitive>(self, expected: T, strict: bool) -> Self {
        self.check(strict, move |exist| Ok(exist.scalar::<T>()? == expected))
    }

    pub fn string_eq(self, expected: &str, strict: bool) -> Self {
        self.check(strict, |exist| Ok(exist.string()? == expected))
    }

    pub fn len_eq(self, expected: usize, strict: bool) -> Self {
        self.check(strict, move |exist| {
            Ok(exist.info().map(|i| i.element_count() == expected).unwrap_or(false))
        })
    }

    pub fn outcome(self) -> QueryOutcome {
        self.outcome
    }
}

/// Structural operations on the leaf field.
pub struct DoStatement {
    ctx: StatementCtx,
}

impl DoStatement {
    pub(crate) fn new(ctx: StatementCtx) -> Self {
        DoStatement { ctx }
    }

    fn run(self, f: impl FnOnce(&Arc<Container>, &OwnedSegment) -> StoreResult<()>) -> QueryOutcome {
        if !self.ctx.outcome.is_success() {
            return self.ctx.outcome;
        }
        let out = (|| {
            let parent = self.ctx.resolve_parent(false)?;
            f(&parent, self.ctx.leaf())
        })();
        QueryOutcome::from_result(out)
    }

    pub fn delete(self) -> QueryOutcome {
        self.run(|parent, leaf| {
            if leaf.index.is_some() {
                return Err(StoreError::MalformedPath(
                    "delete targets whole fields".into(),
                ));
            }
            parent.delete_field(&leaf.name)
        })
    }

    pub fn rename(self, to: &str) -> QueryOutcome {
        self.run(|parent, leaf| {
            if leaf.index.is_some() {
                return Err(StoreError::MalformedPath(
                    "rename targets whole fields".into(),
                ));
            }
            parent.rename_field(&leaf.name, to)
        })
    }
}
