//! Write notifications.
//!
//! Subscriptions are stored per container id, stamped with the container
//! generation seen at subscribe time and with per-field version tickets.
//! Containers are pooled and their ids recycled, so both stamps are needed:
//! a generation drift makes every record for that id inert (fire and dispose
//! both no-op), and a stale ticket drops an individual notification whose
//! field was structurally changed while the writer was in flight.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::container::Container;
use crate::storage::StorageObject;
use crate::types::TypeCode;

/// Payload handed to subscribers, after the write is visible and before
/// control returns to the writer.
#[derive(Clone)]
pub struct WriteEvent {
    /// Handle to the container that was written.
    pub target: StorageObject,
    /// Field name (empty for container-wide structural events).
    pub path: String,
    /// Kind of the written field; `Unknown` flags a structural removal.
    pub kind: TypeCode,
}

pub type Handler = Arc<dyn Fn(&WriteEvent) + Send + Sync>;

static WRITES: Lazy<WriteEventRegistry> = Lazy::new(WriteEventRegistry::new);

/// The process-wide write-event registry.
pub fn writes() -> &'static WriteEventRegistry {
    &WRITES
}

#[derive(Default)]
struct Record {
    generation: u64,
    next_token: u64,
    field_versions: HashMap<String, u64>,
    field_handlers: HashMap<String, Vec<(u64, Handler)>>,
    container_handlers: Vec<(u64, Handler)>,
}

impl Record {
    fn fresh(generation: u64) -> Record {
        Record {
            generation,
            next_token: 1,
            ..Record::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.container_handlers.is_empty()
            && self.field_handlers.values().all(|v| v.is_empty())
            && self.field_versions.is_empty()
    }
}

/// Where a subscription listens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Container,
    Field(String),
}

/// Disposable registration. Dropping the handle without calling
/// [`SubscriptionHandle::dispose`] leaves the subscription alive (it becomes
/// inert once the container generation moves on).
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    generation: u64,
    token: u64,
    scope: Scope,
}

impl SubscriptionHandle {
    pub fn dispose(self) {
        writes().remove(&self);
    }
}

pub struct WriteEventRegistry {
    inner: Mutex<HashMap<u64, Record>>,
}

impl WriteEventRegistry {
    fn new() -> WriteEventRegistry {
        WriteEventRegistry {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches the record for the container's current incarnation, resetting
    /// any record left behind by a previous tenant of the recycled id.
    fn live_record<'a>(
        map: &'a mut HashMap<u64, Record>,
        id: u64,
        generation: u64,
    ) -> &'a mut Record {
        let record = map.entry(id).or_insert_with(|| Record::fresh(generation));
        if record.generation != generation {
            *record = Record::fresh(generation);
        }
        record
    }

    pub fn subscribe_field(
        &self,
        container: &Container,
        field: impl Into<String>,
        handler: Handler,
    ) -> SubscriptionHandle {
        let (id, generation) = (container.id(), container.generation());
        let field = field.into();
        let mut map = self.inner.lock();
        let record = Self::live_record(&mut map, id, generation);
        let token = record.next_token;
        record.next_token += 1;
        record
            .field_handlers
            .entry(field.clone())
            .or_default()
            .push((token, handler));
        SubscriptionHandle {
            id,
            generation,
            token,
            scope: Scope::Field(field),
        }
    }

    pub fn subscribe_container(&self, container: &Container, handler: Handler) -> SubscriptionHandle {
        let (id, generation) = (container.id(), container.generation());
        let mut map = self.inner.lock();
        let record = Self::live_record(&mut map, id, generation);
        let token = record.next_token;
        record.next_token += 1;
        record.container_handlers.push((token, handler));
        SubscriptionHandle {
            id,
            generation,
            token,
            scope: Scope::Container,
        }
    }

    fn remove(&self, handle: &SubscriptionHandle) {
        let mut map = self.inner.lock();
        let Some(record) = map.get_mut(&handle.id) else {
            return;
        };
        // A newer incarnation owns this id now; the old handle is inert.
        if record.generation != handle.generation {
            return;
        }
        match &handle.scope {
            Scope::Container => record
                .container_handlers
                .retain(|(token, _)| *token != handle.token),
            Scope::Field(field) => {
                if let Some(handlers) = record.field_handlers.get_mut(field) {
                    handlers.retain(|(token, _)| *token != handle.token);
                    if handlers.is_empty() {
                        record.field_handlers.remove(field);
                    }
                }
            }
        }
        if record.is_empty() {
            map.remove(&handle.id);
        }
    }

    /// Current version ticket for a field (0 if never bumped).
    pub fn field_version(&self, container: &Container, field: &str) -> u64 {
        let (id, generation) = (container.id(), container.generation());
        let map = self.inner.lock();
        match map.get(&id) {
            Some(record) if record.generation == generation => {
                record.field_versions.get(field).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Advances a field's version, invalidating tickets held by in-flight
    /// writers. Structural operations call this before the bytes move.
    pub fn bump_field_version(&self, container: &Container, field: &str) -> u64 {
        let (id, generation) = (container.id(), container.generation());
        let mut map = self.inner.lock();
        let record = Self::live_record(&mut map, id, generation);
        let version = record.field_versions.entry(field.to_string()).or_insert(0);
        *version += 1;
        *version
    }

    /// Dispatches a field write. A stale `ticket` drops the notification;
    /// otherwise field-scoped handlers run first, then container-scoped
    /// ones, synchronously on the calling thread.
    pub fn notify(
        &self,
        container: &Container,
        field: &str,
        kind: TypeCode,
        ticket: Option<u64>,
    ) {
        let (id, generation) = (container.id(), container.generation());
        let run: Vec<Handler> = {
            let map = self.inner.lock();
            let Some(record) = map.get(&id) else {
                return;
            };
            if record.generation != generation {
                return;
            }
            if let Some(ticket) = ticket {
                let current = record.field_versions.get(field).copied().unwrap_or(0);
                if current != ticket {
                    return;
                }
            }
            record
                .field_handlers
                .get(field)
                .into_iter()
                .flatten()
                .map(|(_, handler)| handler.clone())
                .chain(
                    record
                        .container_handlers
                        .iter()
                        .map(|(_, handler)| handler.clone()),
                )
                .collect()
        };
        if run.is_empty() {
            return;
        }
        let event = WriteEvent {
            target: StorageObject::from_parts(id, generation),
            path: field.to_string(),
            kind,
        };
        for handler in run {
            handler(&event);
        }
    }
}
