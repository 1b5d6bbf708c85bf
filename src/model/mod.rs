mod descriptor;
mod registry;

pub use descriptor::{ColumnDef, DeleteBehavior, EntityBuilder, EntityDescriptor, Relation};
pub use registry::{EntityRegistry, Model};
