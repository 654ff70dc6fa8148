//! Dotted-path parsing and tree navigation.
//!
//! Paths look like `a.b.c[3].d`: separator-delimited child names where a
//! bracketed index binds to the name right before it. The segmenter is lazy
//! and forward-only; the navigator resolves (or auto-creates) the chain of
//! reference fields a path describes.

use std::sync::Arc;

use crate::container::layout::ContainerLayout;
use crate::container::rescheme::LayoutEdit;
use crate::container::Container;
use crate::error::{StoreError, StoreResult};
use crate::registry::registry;
use crate::types::{CastMode, Primitive, TypeCode};

/// Default segment separator.
pub const SEPARATOR: char = '.';

/// One parsed path step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegment<'a> {
    pub name: &'a str,
    pub index: Option<usize>,
}

/// Lazy segmenter. Yields `Err(MalformedPath)` once and then fuses.
pub struct PathSegments<'a> {
    rest: Option<&'a str>,
    separator: char,
}

impl<'a> PathSegments<'a> {
    pub fn new(path: &'a str) -> PathSegments<'a> {
        PathSegments::with_separator(path, SEPARATOR)
    }

    pub fn with_separator(path: &'a str, separator: char) -> PathSegments<'a> {
        PathSegments {
            rest: Some(path),
            separator,
        }
    }

    fn parse_piece(path: &str, piece: &'a str) -> StoreResult<PathSegment<'a>> {
        let malformed = |why: &str| {
            Err(StoreError::MalformedPath(format!(
                "{why} in path {path:?}"
            )))
        };
        if piece.is_empty() {
            return malformed("empty segment");
        }
        if piece.chars().any(char::is_whitespace) {
            return malformed("whitespace");
        }
        let (name, index) = match piece.find('[') {
            None => {
                if piece.contains(']') {
                    return malformed("unmatched bracket");
                }
                (piece, None)
            }
            Some(open) => {
                let name = &piece[..open];
                let tail = &piece[open + 1..];
                let Some(close) = tail.find(']') else {
                    return malformed("unterminated index");
                };
                if close + 1 != tail.len() {
                    return malformed("trailing characters after index");
                }
                let digits = &tail[..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return malformed("non-numeric index");
                }
                let Ok(index) = digits.parse::<usize>() else {
                    return malformed("index overflows");
                };
                (name, Some(index))
            }
        };
        if name.is_empty() {
            return malformed("empty segment name");
        }
        Ok(PathSegment { name, index })
    }
}

impl<'a> Iterator for PathSegments<'a> {
    type Item = StoreResult<PathSegment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        let (piece, remaining) = match rest.find(self.separator) {
            Some(at) => (
                &rest[..at],
                Some(&rest[at + self.separator.len_utf8()..]),
            ),
            None => (rest, None),
        };
        match Self::parse_piece(rest, piece) {
            Ok(segment) => {
                self.rest = remaining;
                Some(Ok(segment))
            }
            Err(e) => {
                self.rest = None;
                Some(Err(e))
            }
        }
    }
}

/// Collects and validates a whole path. An empty path is malformed.
pub fn segments(path: &str, separator: char) -> StoreResult<Vec<PathSegment<'_>>> {
    let parsed: Vec<PathSegment<'_>> =
        PathSegments::with_separator(path, separator).collect::<StoreResult<_>>()?;
    if parsed.is_empty() {
        return Err(StoreError::MalformedPath("empty path".into()));
    }
    Ok(parsed)
}

/// Steps from `from` into the child a single segment names.
///
/// With `create`, a missing reference field is added by rescheme, short
/// reference arrays grow to cover the index, and empty slots are filled with
/// a fresh child named after the segment.
pub(crate) fn step(
    from: &Arc<Container>,
    segment: &PathSegment<'_>,
    create: bool,
) -> StoreResult<Arc<Container>> {
    let name = segment.name;
    if !from.has_field(name)? {
        if !create {
            return Err(StoreError::not_found(name));
        }
        let edit = match segment.index {
            None => LayoutEdit::new().add_ref(name),
            Some(index) => LayoutEdit::new().add_ref_array(name, index + 1),
        };
        from.rescheme(edit)?;
    }

    let info = from.field_info(name)?;
    if info.code != TypeCode::Ref {
        return Err(StoreError::type_mismatch(
            TypeCode::Ref,
            info.code,
            format!("path segment {name:?} is not a reference field"),
        ));
    }
    let slot = match segment.index {
        Some(index) => {
            if !info.is_array {
                return Err(StoreError::type_mismatch(
                    TypeCode::Ref,
                    info.code,
                    format!("{name:?} is a single reference, not an array"),
                ));
            }
            let len = info.element_count();
            if index >= len {
                if !create {
                    return Err(StoreError::IndexOutOfRange { index, len });
                }
                from.rescheme(LayoutEdit::new().resize(name, (index + 1) * 8))?;
            }
            index
        }
        None => 0,
    };

    let id = from.ref_id_at(name, slot)?;
    if id != 0 {
        return registry()
            .get(id)
            .ok_or_else(|| StoreError::not_found(format!("dangling reference {id} at {name:?}")));
    }
    if !create {
        return Err(StoreError::not_found(format!("{name:?} is null")));
    }
    let child = registry().create(&ContainerLayout::empty(name))?;
    from.set_ref_id(name, slot, child.id())?;
    Ok(child)
}

/// Resolves a full path to its final container.
pub(crate) fn resolve(
    root: &Arc<Container>,
    path: &str,
    create: bool,
    separator: char,
) -> StoreResult<Arc<Container>> {
    let mut current = root.clone();
    for segment in segments(path, separator)? {
        current = step(&current, &segment, create)?;
    }
    Ok(current)
}

/// Resolves everything but the last segment, returning the parent container
/// and the leaf segment.
fn resolve_parent<'p>(
    root: &Arc<Container>,
    path: &'p str,
    create: bool,
    separator: char,
) -> StoreResult<(Arc<Container>, PathSegment<'p>)> {
    let parsed = segments(path, separator)?;
    let Some((leaf, walk)) = parsed.split_last() else {
        return Err(StoreError::MalformedPath("empty path".into()));
    };
    let mut current = root.clone();
    for segment in walk {
        current = step(&current, segment, create)?;
    }
    Ok((current, *leaf))
}

/// Writes a scalar at `path`, creating intermediate containers and the leaf
/// field as needed.
pub(crate) fn write_scalar<T: Primitive>(
    root: &Arc<Container>,
    path: &str,
    value: T,
) -> StoreResult<()> {
    let (parent, leaf) = resolve_parent(root, path, true, SEPARATOR)?;
    match leaf.index {
        None => {
            if !parent.has_field(leaf.name)? {
                parent.rescheme(LayoutEdit::new().add_scalar(leaf.name, T::CODE))?;
            }
            parent.write_scalar(leaf.name, value)
        }
        Some(index) => {
            if !parent.has_field(leaf.name)? {
                parent.rescheme(LayoutEdit::new().add_array(leaf.name, T::CODE, index + 1))?;
            } else if parent.array_len(leaf.name)? <= index {
                let info = parent.field_info(leaf.name)?;
                parent.rescheme(
                    LayoutEdit::new().resize(leaf.name, (index + 1) * info.elem_size),
                )?;
            }
            parent.array_set(leaf.name, index, value)
        }
    }
}

/// Reads a scalar at `path`; purely read-only.
pub(crate) fn read_scalar<T: Primitive>(root: &Arc<Container>, path: &str) -> StoreResult<T> {
    let (parent, leaf) = resolve_parent(root, path, false, SEPARATOR)?;
    match leaf.index {
        None => parent.read_scalar(leaf.name),
        Some(index) => parent.array_get(leaf.name, index),
    }
}

pub(crate) fn write_string(root: &Arc<Container>, path: &str, value: &str) -> StoreResult<()> {
    let (parent, leaf) = resolve_parent(root, path, true, SEPARATOR)?;
    if leaf.index.is_some() {
        return Err(StoreError::MalformedPath(format!(
            "text cannot be written to an indexed segment in {path:?}"
        )));
    }
    if !parent.has_field(leaf.name)? {
        let units = value.encode_utf16().count();
        parent.rescheme(LayoutEdit::new().add_array(leaf.name, TypeCode::Char16, units))?;
    }
    parent.write_string(leaf.name, value)
}

pub(crate) fn read_string(root: &Arc<Container>, path: &str) -> StoreResult<String> {
    let (parent, leaf) = resolve_parent(root, path, false, SEPARATOR)?;
    parent.read_string(leaf.name)
}

pub(crate) fn write_array<T: Primitive>(
    root: &Arc<Container>,
    path: &str,
    values: &[T],
) -> StoreResult<()> {
    let (parent, leaf) = resolve_parent(root, path, true, SEPARATOR)?;
    if leaf.index.is_some() {
        return Err(StoreError::MalformedPath(format!(
            "array cannot be written to an indexed segment in {path:?}"
        )));
    }
    if !parent.has_field(leaf.name)? {
        parent.rescheme(LayoutEdit::new().add_array(leaf.name, T::CODE, values.len()))?;
    }
    parent.write_array(leaf.name, values, CastMode::Implicit, true)
}

pub(crate) fn read_array<T: Primitive>(root: &Arc<Container>, path: &str) -> StoreResult<Vec<T>> {
    let (parent, leaf) = resolve_parent(root, path, false, SEPARATOR)?;
    parent.read_array(leaf.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str) -> StoreResult<Vec<(String, Option<usize>)>> {
        Ok(segments(path, SEPARATOR)?
            .into_iter()
            .map(|s| (s.name.to_string(), s.index))
            .collect())
    }

    #[test]
    fn plain_segments() {
        assert_eq!(
            parse("a.b.c").unwrap(),
            vec![("a".into(), None), ("b".into(), None), ("c".into(), None)]
        );
        assert_eq!(parse("solo").unwrap(), vec![("solo".into(), None)]);
    }

    #[test]
    fn bracketed_indices_bind_left() {
        assert_eq!(
            parse("kids[3].hp").unwrap(),
            vec![("kids".into(), Some(3)), ("hp".into(), None)]
        );
        assert_eq!(parse("a[0]").unwrap(), vec![("a".into(), Some(0))]);
    }

    #[test]
    fn malformed_paths() {
        for bad in [
            "", ".", "a.", ".a", "a..b", "a b", "a[", "a[]", "a[x]", "a[1]b", "a]", "[1]",
        ] {
            let err = parse(bad).unwrap_err();
            assert!(
                matches!(err, StoreError::MalformedPath(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn custom_separator() {
        let parsed = segments("a/b[1]/c", '/').unwrap();
        assert_eq!(parsed[1].name, "b");
        assert_eq!(parsed[1].index, Some(1));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn segmenter_is_lazy_and_fuses() {
        let mut it = PathSegments::new("ok..also");
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }
}
