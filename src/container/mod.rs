pub mod container;
pub mod header;
pub mod layout;
pub mod migrate;
pub mod rescheme;

pub use container::{Container, FieldInfo};
pub use header::{FieldDesc, CONTAINER_HEADER_SIZE, FIELD_HEADER_SIZE};
pub use layout::{ContainerLayout, ObjectBuilder};
pub use migrate::MigrationOutcome;
pub use rescheme::LayoutEdit;
