//! Process-wide container registry: id allocation and recycling, the id ->
//! container table, and the per-layout pools that recycle disposed
//! containers and their buffers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::container::layout::ContainerLayout;
use crate::container::Container;
use crate::error::{StoreError, StoreResult};
use crate::pool::BufferPools;

/// The null reference. Never allocated to a live container.
pub const NULL_ID: u64 = 0;

/// Sentinel for containers that exist but have not been inserted into the
/// table yet (parsers build subtrees wild, then adopt them).
pub const WILD_ID: u64 = u64::MAX;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry. Creation is lazy and idempotent; the instance
/// lives for the rest of the process.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

struct Inner {
    next_id: u64,
    freed: VecDeque<u64>,
    table: HashMap<u64, Arc<Container>>,
    /// Disposed container shells keyed by their last layout blob, reused by
    /// `create` to skip the allocation of the shell itself.
    skeletons: HashMap<Vec<u8>, Vec<Arc<Container>>>,
}

pub struct Registry {
    inner: Mutex<Inner>,
    pools: BufferPools,
}

impl Registry {
    fn new() -> Registry {
        Registry {
            inner: Mutex::new(Inner {
                next_id: 1,
                freed: VecDeque::new(),
                table: HashMap::new(),
                skeletons: HashMap::new(),
            }),
            pools: BufferPools::new(),
        }
    }

    pub(crate) fn pools(&self) -> &BufferPools {
        &self.pools
    }

    /// Number of live (registered) containers.
    pub fn len(&self) -> usize {
        self.inner.lock().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().table.contains_key(&id)
    }

    /// Resolves an id. `NULL_ID`, `WILD_ID` and unknown ids give None.
    pub fn get(&self, id: u64) -> Option<Arc<Container>> {
        if id == NULL_ID || id == WILD_ID {
            return None;
        }
        self.inner.lock().table.get(&id).cloned()
    }

    fn pop_skeleton(&self, layout: &ContainerLayout) -> Option<Arc<Container>> {
        let mut inner = self.inner.lock();
        let parked = inner.skeletons.get_mut(layout.blob())?;
        // Only shells nobody else still observes may be recycled.
        while let Some(shell) = parked.pop() {
            if Arc::strong_count(&shell) == 1 {
                return Some(shell);
            }
        }
        None
    }

    fn materialize(&self, layout: &Arc<ContainerLayout>) -> StoreResult<Arc<Container>> {
        let mut buf = self.pools.rent(layout.stride(), true);
        layout.materialize_into(&mut buf)?;
        match self.pop_skeleton(layout) {
            Some(shell) => {
                // Shell buffers are empty; install bumps the generation so
                // stale handles to the previous incarnation fail fast.
                let previous = shell.install_buffer(buf);
                debug_assert!(previous.is_empty());
                shell.set_id(WILD_ID);
                Ok(shell)
            }
            None => Ok(Arc::new(Container::new_wild(buf))),
        }
    }

    /// Materializes a container and registers it.
    pub fn create(&self, layout: &Arc<ContainerLayout>) -> StoreResult<Arc<Container>> {
        let container = self.materialize(layout)?;
        self.register(&container)?;
        Ok(container)
    }

    /// Materializes a detached (wild) container. Wild containers are adopted
    /// by [`Registry::register`] or rolled back with
    /// [`Registry::discard_wild`].
    pub fn create_wild(&self, layout: &Arc<ContainerLayout>) -> StoreResult<Arc<Container>> {
        self.materialize(layout)
    }

    /// Wraps foreign container bytes (already validated) in a wild container.
    pub(crate) fn create_wild_from_bytes(&self, bytes: &[u8]) -> StoreResult<Arc<Container>> {
        let layout = ContainerLayout::from_container_bytes(bytes)?;
        let mut buf = self.pools.rent(layout.stride(), true);
        buf.copy_from_slice(bytes);
        match self.pop_skeleton(&layout) {
            Some(shell) => {
                let previous = shell.install_buffer(buf);
                debug_assert!(previous.is_empty());
                shell.set_id(WILD_ID);
                Ok(shell)
            }
            None => Ok(Arc::new(Container::new_wild(buf))),
        }
    }

    /// Assigns an id to a wild container and inserts it into the table.
    pub fn register(&self, container: &Arc<Container>) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        match container.id() {
            WILD_ID => {}
            NULL_ID => {
                return Err(StoreError::Disposed(
                    "cannot register a disposed container".into(),
                ))
            }
            id => {
                return Err(StoreError::BadFormat(format!(
                    "container {id} is already registered"
                )))
            }
        }
        let id = inner.freed.pop_front().unwrap_or_else(|| {
            let id = inner.next_id;
            inner.next_id += 1;
            id
        });
        container.set_id(id);
        inner.table.insert(id, container.clone());
        debug!("registered container {id}");
        Ok(id)
    }

    /// Removes a container and every container reachable through its
    /// reference fields, recycling ids and pooling buffers and shells.
    ///
    /// The table edit runs under the lock; the recursive walk does not (each
    /// child lookup takes its own short critical section). Idempotent: a
    /// second call sees id 0 and returns.
    pub fn unregister(&self, container: &Arc<Container>) -> StoreResult<()> {
        {
            let mut inner = self.inner.lock();
            let id = container.id();
            if id == NULL_ID {
                return Ok(());
            }
            if id == WILD_ID {
                drop(inner);
                return self.discard_wild(container);
            }
            if let Some(stored) = inner.table.remove(&id) {
                if !Arc::ptr_eq(&stored, container) {
                    inner.table.insert(id, stored);
                    return Err(StoreError::BadFormat(format!(
                        "id {id} does not belong to this container"
                    )));
                }
            }
            inner.freed.push_back(id);
            container.set_id(NULL_ID);
            debug!("unregistered container {id}");
        }

        // Depth-first teardown of the subtree. Ref fields must not be
        // mutated concurrently; teardown is serialized by the caller.
        container.for_each_ref_id(|child| {
            if let Err(e) = self.unregister_id(child) {
                warn!("teardown of child {child} failed: {e}");
            }
        })?;

        self.park(container);
        Ok(())
    }

    /// Unregisters whatever `id` resolves to; a null or unknown id is a
    /// no-op.
    pub fn unregister_id(&self, id: u64) -> StoreResult<()> {
        match self.get(id) {
            Some(container) => self.unregister(&container),
            None => Ok(()),
        }
    }

    /// Rolls a wild container back into the pools without ever assigning an
    /// id (parser error paths).
    pub fn discard_wild(&self, container: &Arc<Container>) -> StoreResult<()> {
        if container.id() != WILD_ID {
            return Err(StoreError::BadFormat(
                "only wild containers can be discarded".into(),
            ));
        }
        container.set_id(NULL_ID);
        self.park(container);
        Ok(())
    }

    /// Returns the buffer to its stride pool and parks the shell in the
    /// freelist of its last layout.
    fn park(&self, container: &Arc<Container>) {
        let Some(buf) = container.take_buffer() else {
            return;
        };
        let key = buf[..crate::container::header::data_offset(&buf)].to_vec();
        if let Err(e) = self.pools.hand_back(buf) {
            warn!("buffer not poolable: {e}");
        }
        self.inner
            .lock()
            .skeletons
            .entry(key)
            .or_default()
            .push(container.clone());
    }
}
