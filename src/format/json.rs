//! JSON mapping.
//!
//! Objects become containers; numbers become `Int64` when integral (and
//! fitting) and `Float64` otherwise; one-unit strings become `Char16`
//! scalars and longer ones `Char16` arrays; booleans become `Bool`; null
//! means "absent field"; `{"$blob": "<base64>"}` becomes a `Blob`. Numeric
//! arrays promote to the widest kind seen and never narrow back. Mixed-kind
//! arrays are rejected.

use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::container::{Container, ObjectBuilder};
use crate::error::{StoreError, StoreResult};
use crate::format::binary::{decode_base64, encode_base64};
use crate::registry::registry;
use crate::storage::StorageObject;
use crate::types::{CastMode, TypeCode};

/// Parser (and writer) recursion bound.
pub const MAX_DEPTH: usize = 64;

const BLOB_KEY: &str = "$blob";

// ---- writing ----

/// Renders the subtree under `root` as a JSON string.
pub fn to_json_string(root: StorageObject) -> StoreResult<String> {
    let value = to_json_value(root)?;
    serde_json::to_string(&value).map_err(|e| StoreError::BadFormat(format!("json: {e}")))
}

/// Renders the subtree under `root` as a [`serde_json::Value`].
pub fn to_json_value(root: StorageObject) -> StoreResult<Value> {
    let container = root.container()?;
    render(&container, MAX_DEPTH)
}

fn number(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn render(container: &Arc<Container>, depth: usize) -> StoreResult<Value> {
    if depth == 0 {
        return Err(StoreError::DepthExceeded(MAX_DEPTH));
    }
    let mut out = Map::new();
    for name in container.field_names()? {
        let info = container.field_info(&name)?;
        let value = match (info.code, info.is_array) {
            (TypeCode::Unknown, _) => continue,
            (TypeCode::Blob, _) => {
                let bytes = container.field_bytes(&name)?;
                let mut blob = Map::new();
                blob.insert(BLOB_KEY.to_string(), Value::String(encode_base64(&bytes)));
                Value::Object(blob)
            }
            (TypeCode::Ref, false) => {
                let id = container.ref_id_at(&name, 0)?;
                match registry().get(id) {
                    Some(child) => render(&child, depth - 1)?,
                    None => continue, // null reference: absent field
                }
            }
            (TypeCode::Ref, true) => {
                let mut items = Vec::new();
                for id in container.ref_ids(&name)? {
                    match registry().get(id) {
                        Some(child) => items.push(render(&child, depth - 1)?),
                        None => items.push(Value::Null),
                    }
                }
                Value::Array(items)
            }
            (TypeCode::Char16, _) => Value::String(container.read_string(&name)?),
            (TypeCode::Bool, false) => Value::Bool(container.read_scalar::<bool>(&name)?),
            (TypeCode::Bool, true) => Value::Array(
                container
                    .read_array::<bool>(&name)?
                    .into_iter()
                    .map(Value::Bool)
                    .collect(),
            ),
            (TypeCode::UInt64, false) => {
                Value::Number(Number::from(container.read_scalar::<u64>(&name)?))
            }
            (TypeCode::UInt64, true) => Value::Array(
                container
                    .read_array::<u64>(&name)?
                    .into_iter()
                    .map(|v| Value::Number(Number::from(v)))
                    .collect(),
            ),
            (code, false) if code.is_float() => {
                number(container.read_scalar_with::<f64>(&name, CastMode::Explicit)?)
            }
            (code, true) if code.is_float() => Value::Array(
                container
                    .read_array_with::<f64>(&name, CastMode::Explicit)?
                    .into_iter()
                    .map(number)
                    .collect(),
            ),
            (_, false) => Value::Number(Number::from(
                container.read_scalar_with::<i64>(&name, CastMode::Explicit)?,
            )),
            (_, true) => Value::Array(
                container
                    .read_array_with::<i64>(&name, CastMode::Explicit)?
                    .into_iter()
                    .map(|v| Value::Number(Number::from(v)))
                    .collect(),
            ),
        };
        out.insert(name, value);
    }
    Ok(Value::Object(out))
}

// ---- parsing ----

/// Builds a registered tree from a JSON object and returns the root id.
pub fn parse_json(text: &str) -> StoreResult<u64> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| StoreError::BadFormat(format!("json: {e}")))?;
    let Value::Object(map) = value else {
        return Err(StoreError::BadFormat(
            "top-level value must be an object".into(),
        ));
    };
    let root = build_object(&map, "root", MAX_DEPTH)?;
    Ok(root.id())
}

/// What one JSON value turns into.
enum Parsed {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Vec<u16>),
    Blob(Vec<u8>),
    Child(Arc<Container>),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    /// Null slots carry no container.
    ChildArray(Vec<Option<Arc<Container>>>),
}

fn children_of(parsed: Parsed) -> Vec<Arc<Container>> {
    match parsed {
        Parsed::Child(c) => vec![c],
        Parsed::ChildArray(v) => v.into_iter().flatten().collect(),
        _ => Vec::new(),
    }
}

fn teardown(children: impl Iterator<Item = Arc<Container>>) {
    for child in children {
        if let Err(e) = registry().unregister(&child) {
            log::warn!("json rollback left residue: {e}");
        }
    }
}

fn blob_payload(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(BLOB_KEY).and_then(Value::as_str)
}

/// Classifies one JSON value; `None` means "absent field" (JSON null).
fn classify(value: &Value, name: &str, depth: usize) -> StoreResult<Option<Parsed>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => Parsed::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Parsed::Int(i),
            None => Parsed::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Parsed::Text(s.encode_utf16().collect()),
        Value::Object(map) => match blob_payload(map) {
            Some(b64) => Parsed::Blob(decode_base64(b64)?),
            None => Parsed::Child(build_object(map, name, depth - 1)?),
        },
        Value::Array(items) => classify_array(items, name, depth)?,
    }))
}

fn classify_array(items: &[Value], name: &str, depth: usize) -> StoreResult<Parsed> {
    let mixed = || {
        Err(StoreError::BadFormat(format!(
            "array {name:?} mixes element kinds"
        )))
    };
    // Empty arrays carry no element kind; they parse as empty Int64 arrays.
    let Some(first) = items.first() else {
        return Ok(Parsed::IntArray(Vec::new()));
    };
    match first {
        Value::Bool(_) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Bool(b) => out.push(*b),
                    _ => return mixed(),
                }
            }
            Ok(Parsed::BoolArray(out))
        }
        Value::Number(_) => {
            // Promotion is sticky: one non-integer turns the whole array
            // Float64, later integers widen into it.
            let mut ints: Vec<i64> = Vec::with_capacity(items.len());
            let mut floats: Option<Vec<f64>> = None;
            for item in items {
                let Value::Number(n) = item else {
                    return mixed();
                };
                match (&mut floats, n.as_i64()) {
                    (None, Some(i)) => ints.push(i),
                    (None, None) => {
                        let mut widened: Vec<f64> = ints.iter().map(|&i| i as f64).collect();
                        widened.push(n.as_f64().unwrap_or(f64::NAN));
                        floats = Some(widened);
                    }
                    (Some(fs), Some(i)) => fs.push(i as f64),
                    (Some(fs), None) => fs.push(n.as_f64().unwrap_or(f64::NAN)),
                }
            }
            Ok(match floats {
                Some(fs) => Parsed::FloatArray(fs),
                None => Parsed::IntArray(ints),
            })
        }
        Value::Object(_) | Value::Null => {
            let mut out: Vec<Option<Arc<Container>>> = Vec::with_capacity(items.len());
            let built = (|| -> StoreResult<()> {
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Null => out.push(None),
                        Value::Object(map) => {
                            if blob_payload(map).is_some() {
                                return Err(StoreError::BadFormat(format!(
                                    "array {name:?} mixes element kinds"
                                )));
                            }
                            let child = build_object(map, &format!("{name}[{i}]"), depth - 1)?;
                            out.push(Some(child));
                        }
                        _ => {
                            return Err(StoreError::BadFormat(format!(
                                "array {name:?} mixes element kinds"
                            )))
                        }
                    }
                }
                Ok(())
            })();
            if let Err(e) = built {
                teardown(out.into_iter().flatten());
                return Err(e);
            }
            Ok(Parsed::ChildArray(out))
        }
        Value::String(_) | Value::Array(_) => Err(StoreError::BadFormat(format!(
            "array {name:?} holds unsupported element kind"
        ))),
    }
}

/// Builds one container bottom-up: children first (registered), then the
/// container itself wild, filled, and adopted. Any error tears down the
/// children built so far and rolls the wild container back to its pool.
fn build_object(map: &Map<String, Value>, name: &str, depth: usize) -> StoreResult<Arc<Container>> {
    if depth == 0 {
        return Err(StoreError::DepthExceeded(MAX_DEPTH));
    }

    let mut fields: Vec<(String, Parsed)> = Vec::with_capacity(map.len());
    let classified = (|| -> StoreResult<()> {
        for (key, value) in map {
            if let Some(parsed) = classify(value, key, depth)? {
                fields.push((key.clone(), parsed));
            }
        }
        Ok(())
    })();
    if let Err(e) = classified {
        teardown(fields.into_iter().flat_map(|(_, p)| children_of(p)));
        return Err(e);
    }

    let mut builder = ObjectBuilder::with_name(name);
    for (key, parsed) in &fields {
        builder = match parsed {
            Parsed::Bool(_) => builder.set_scalar::<bool>(key.clone()),
            Parsed::Int(_) => builder.set_scalar::<i64>(key.clone()),
            Parsed::Float(_) => builder.set_scalar::<f64>(key.clone()),
            Parsed::Text(units) if units.len() == 1 => builder.set_char16(key.clone()),
            Parsed::Text(units) => builder.set_string(key.clone(), units.len()),
            Parsed::Blob(bytes) => builder.set_blob(key.clone(), bytes.len()),
            Parsed::Child(_) => builder.set_ref(key.clone()),
            Parsed::BoolArray(v) => builder.set_array::<bool>(key.clone(), v.len()),
            Parsed::IntArray(v) => builder.set_array::<i64>(key.clone(), v.len()),
            Parsed::FloatArray(v) => builder.set_array::<f64>(key.clone(), v.len()),
            Parsed::ChildArray(v) => builder.set_ref_array(key.clone(), v.len()),
        };
    }

    let assembled = (|| -> StoreResult<Arc<Container>> {
        let layout = builder.build_layout()?;
        let container = registry().create_wild(&layout)?;
        let filled = fill(&container, &fields);
        if let Err(e) = filled {
            let _ = registry().discard_wild(&container);
            return Err(e);
        }
        registry().register(&container)?;
        Ok(container)
    })();

    match assembled {
        Ok(container) => Ok(container),
        Err(e) => {
            teardown(fields.into_iter().flat_map(|(_, p)| children_of(p)));
            Err(e)
        }
    }
}

fn fill(container: &Arc<Container>, fields: &[(String, Parsed)]) -> StoreResult<()> {
    for (key, parsed) in fields {
        match parsed {
            Parsed::Bool(b) => container.write_scalar_with(key, *b, CastMode::Strict)?,
            Parsed::Int(i) => container.write_scalar_with(key, *i, CastMode::Strict)?,
            Parsed::Float(f) => container.write_scalar_with(key, *f, CastMode::Strict)?,
            Parsed::Text(units) => {
                let mut bytes = Vec::with_capacity(units.len() * 2);
                for unit in units {
                    bytes.extend_from_slice(&unit.to_le_bytes());
                }
                container.write_field_bytes(key, &bytes)?;
            }
            Parsed::Blob(bytes) => container.write_field_bytes(key, bytes)?,
            Parsed::Child(child) => container.set_ref_id(key, 0, child.id())?,
            Parsed::BoolArray(v) => container.write_array(key, v, CastMode::Strict, false)?,
            Parsed::IntArray(v) => container.write_array(key, v, CastMode::Strict, false)?,
            Parsed::FloatArray(v) => container.write_array(key, v, CastMode::Strict, false)?,
            Parsed::ChildArray(v) => {
                for (i, slot) in v.iter().enumerate() {
                    if let Some(child) = slot {
                        container.set_ref_id(key, i, child.id())?;
                    }
                }
            }
        }
    }
    Ok(())
}
