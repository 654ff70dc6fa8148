//! The root owner of a container tree.

use std::sync::Arc;

use log::debug;

use crate::container::layout::ContainerLayout;
use crate::error::{StoreError, StoreResult};
use crate::format;
use crate::registry::registry;
use crate::storage::object::StorageObject;

/// Owns a tree rooted at one container. Disposing the storage (or dropping
/// it) recursively unregisters every container reachable from the root.
#[derive(Debug)]
pub struct Storage {
    root_id: u64,
    disposed: bool,
}

impl Storage {
    /// Fresh storage with an empty (fieldless) root.
    pub fn new() -> StoreResult<Storage> {
        Storage::with_layout(&ContainerLayout::empty("root"))
    }

    /// Fresh storage whose root is materialized from `layout`.
    pub fn with_layout(layout: &Arc<ContainerLayout>) -> StoreResult<Storage> {
        let root = registry().create(layout)?;
        Ok(Storage {
            root_id: root.id(),
            disposed: false,
        })
    }

    /// Adopts an already-registered root (parsers hand their trees over
    /// this way).
    pub(crate) fn adopt_root(root_id: u64) -> Storage {
        Storage {
            root_id,
            disposed: false,
        }
    }

    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Handle to the root container, capturing its current generation.
    pub fn root(&self) -> StoreResult<StorageObject> {
        if self.disposed {
            return Err(StoreError::Disposed("storage".into()));
        }
        let root = registry()
            .get(self.root_id)
            .ok_or(StoreError::StaleHandle { id: self.root_id })?;
        Ok(StorageObject::capture(&root))
    }

    /// Tears the whole tree down. A second call reports `Disposed`.
    pub fn dispose(&mut self) -> StoreResult<()> {
        if self.disposed {
            return Err(StoreError::Disposed("storage".into()));
        }
        self.dispose_quietly();
        Ok(())
    }

    fn dispose_quietly(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        debug!("disposing storage rooted at {}", self.root_id);
        if let Err(e) = registry().unregister_id(self.root_id) {
            log::warn!("storage teardown left residue: {e}");
        }
    }

    // ---- serialization ----

    /// Depth-first binary dump of the whole tree.
    pub fn to_binary(&self) -> StoreResult<Vec<u8>> {
        format::binary::serialize_tree(self.root()?)
    }

    /// Binary dump, base64-encoded.
    pub fn to_base64(&self) -> StoreResult<String> {
        Ok(format::binary::encode_base64(&self.to_binary()?))
    }

    /// Rebuilds a tree from a binary dump.
    pub fn from_binary(bytes: &[u8]) -> StoreResult<Storage> {
        let root_id = format::binary::parse_tree(bytes)?;
        Ok(Storage::adopt_root(root_id))
    }

    pub fn from_base64(text: &str) -> StoreResult<Storage> {
        Storage::from_binary(&format::binary::decode_base64(text)?)
    }

    /// JSON rendering of the tree.
    pub fn to_json(&self) -> StoreResult<String> {
        format::json::to_json_string(self.root()?)
    }

    /// Builds a tree from a JSON object.
    pub fn from_json(text: &str) -> StoreResult<Storage> {
        let root_id = format::json::parse_json(text)?;
        Ok(Storage::adopt_root(root_id))
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.dispose_quietly();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ObjectBuilder;

    #[test]
    fn fresh_storage_has_empty_root() {
        let storage = Storage::new().unwrap();
        let root = storage.root().unwrap();
        assert_eq!(root.field_names().unwrap(), Vec::<String>::new());
        assert_eq!(root.name().unwrap(), "root");
    }

    #[test]
    fn dispose_invalidates_root_handles() {
        let mut storage = Storage::new().unwrap();
        let root = storage.root().unwrap();
        storage.dispose().unwrap();
        assert!(storage.root().is_err());
        assert!(matches!(
            storage.dispose().unwrap_err(),
            StoreError::Disposed(_)
        ));
        assert!(!root.is_alive());
    }

    #[test]
    fn dispose_unregisters_whole_tree() {
        let mut storage = Storage::with_layout(
            &ObjectBuilder::with_name("root")
                .set_ref("child")
                .build_layout()
                .unwrap(),
        )
        .unwrap();
        let mut root = storage.root().unwrap();
        let mut child = root
            .get_object("child", Some(&ContainerLayout::empty("child")))
            .unwrap();
        let grand = child.object_by_path("grand", true).unwrap();
        assert!(registry().contains(child.id()));
        assert!(registry().contains(grand.id()));

        // Hold the cells themselves so id recycling cannot mask the check.
        let child_cell = registry().get(child.id()).unwrap();
        let grand_cell = registry().get(grand.id()).unwrap();
        storage.dispose().unwrap();
        assert!(child_cell.is_disposed());
        assert!(grand_cell.is_disposed());
        assert_eq!(child_cell.id(), crate::registry::NULL_ID);
    }

    #[test]
    fn drop_tears_down_too() {
        let root_cell;
        {
            let storage = Storage::new().unwrap();
            let mut root = storage.root().unwrap();
            root.write_path("a.b.c", 1i32).unwrap();
            root_cell = registry().get(root.id()).unwrap();
        }
        assert!(root_cell.is_disposed());
    }
}
