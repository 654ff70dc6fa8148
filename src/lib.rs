//! treestore - schema-driven tree datastore over a flat byte model
//!
//! Every node of the tree is a *container*: one contiguous byte buffer
//! holding a header, a packed field table, a UTF-16 name segment and a data
//! segment. Containers reference each other through 64-bit ids resolved by a
//! process-wide registry; a [`Storage`] owns one such tree.

pub mod container;
pub mod error;
pub mod events;
pub mod format;
pub mod path;
pub mod pool;
pub mod query;
pub mod registry;
pub mod storage;
pub mod types;

pub use container::{Container, ContainerLayout, FieldInfo, LayoutEdit, ObjectBuilder};
pub use error::{StoreError, StoreResult};
pub use events::{SubscriptionHandle, WriteEvent};
pub use query::{Query, QueryOutcome};
pub use registry::{registry, Registry, NULL_ID, WILD_ID};
pub use storage::{Storage, StorageArray, StorageField, StorageObject};
pub use types::{CastMode, Primitive, TypeCode, TypeTag};
