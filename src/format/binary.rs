//! Binary tree snapshots.
//!
//! The dump is a depth-first, pre-order walk: each container emits its
//! 8-byte id (little-endian) followed by its buffer verbatim. There is no
//! delimiter between containers; every container header carries its total
//! length. The graph must be a tree — an id appearing twice fails the parse.
//!
//! Parsing allocates *wild* containers, validates every reference against
//! the stream, then adopts the whole batch and relinks reference slots from
//! old ids to the freshly assigned ones. Any failure rolls the wild
//! containers back into their pools.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;

use crate::container::header;
use crate::container::Container;
use crate::error::{StoreError, StoreResult};
use crate::registry::registry;
use crate::storage::StorageObject;

/// Serializes the subtree under `root` (pre-order, children in field-table
/// order).
pub fn serialize_tree(root: StorageObject) -> StoreResult<Vec<u8>> {
    let container = root.container()?;
    let mut out = Vec::new();
    dump(&container, &mut out)?;
    Ok(out)
}

fn dump(container: &Arc<Container>, out: &mut Vec<u8>) -> StoreResult<()> {
    out.extend_from_slice(&container.id().to_le_bytes());
    let bytes = container.buffer_clone()?;
    out.extend_from_slice(&bytes);

    let mut children = Vec::new();
    container.for_each_ref_id(|id| children.push(id))?;
    for id in children {
        let child = registry()
            .get(id)
            .ok_or_else(|| StoreError::BadFormat(format!("dangling reference {id} in dump")))?;
        dump(&child, out)?;
    }
    Ok(())
}

/// Parses a dump, registers the rebuilt tree and returns the new root id.
pub fn parse_tree(bytes: &[u8]) -> StoreResult<u64> {
    let mut wild: Vec<(u64, Arc<Container>)> = Vec::new();

    let rollback = |wild: &[(u64, Arc<Container>)]| {
        for (_, container) in wild {
            if let Err(e) = registry().discard_wild(container) {
                log::warn!("rollback left residue: {e}");
            }
        }
    };

    let mut cursor = 0usize;
    let outcome: StoreResult<()> = (|| {
        while cursor < bytes.len() {
            if bytes.len() - cursor < 8 + header::CONTAINER_HEADER_SIZE {
                return Err(StoreError::BadFormat(format!(
                    "truncated stream at byte {cursor}"
                )));
            }
            let old_id = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            let total = header::total_length(&bytes[cursor..]);
            if total < header::CONTAINER_HEADER_SIZE || cursor + total > bytes.len() {
                return Err(StoreError::BadFormat(format!(
                    "container at byte {cursor} claims {total} bytes"
                )));
            }
            if wild.iter().any(|(id, _)| *id == old_id) {
                return Err(StoreError::BadFormat(format!(
                    "id {old_id} appears twice; the dump is not a tree"
                )));
            }
            let container = registry().create_wild_from_bytes(&bytes[cursor..cursor + total])?;
            cursor += total;
            wild.push((old_id, container));
        }
        if wild.is_empty() {
            return Err(StoreError::BadFormat("empty stream".into()));
        }

        // Every reference must land on a container of this stream before
        // any id is handed out.
        let known: HashSet<u64> = wild.iter().map(|(id, _)| *id).collect();
        for (_, container) in &wild {
            let mut missing = None;
            container.for_each_ref_id(|id| {
                if missing.is_none() && !known.contains(&id) {
                    missing = Some(id);
                }
            })?;
            if let Some(id) = missing {
                return Err(StoreError::BadFormat(format!(
                    "reference to id {id} outside the stream"
                )));
            }
        }
        Ok(())
    })();

    if let Err(e) = outcome {
        rollback(&wild);
        return Err(e);
    }

    // Adoption and relinking cannot fail on validated input; if something
    // does go wrong, tear down whatever got registered.
    let adopted: StoreResult<u64> = (|| {
        let mut remap: HashMap<u64, u64> = HashMap::with_capacity(wild.len());
        for (old_id, container) in &wild {
            let new_id = registry().register(container)?;
            remap.insert(*old_id, new_id);
        }
        for (_, container) in &wild {
            container.patch_ref_ids(&remap)?;
        }
        debug!("parsed {} containers", wild.len());
        Ok(wild[0].1.id())
    })();

    match adopted {
        Ok(root_id) => Ok(root_id),
        Err(e) => {
            for (_, container) in &wild {
                if container.is_wild() {
                    let _ = registry().discard_wild(container);
                } else if container.id() != crate::registry::NULL_ID {
                    let _ = registry().unregister(container);
                }
            }
            Err(e)
        }
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> StoreResult<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| StoreError::BadFormat(format!("base64: {e}")))
}
