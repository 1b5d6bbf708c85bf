mod change;
mod entry;
mod state;
mod tracker;

pub use change::{ChangeSet, PendingDelete, PendingInsert, PendingUpdate};
pub use entry::{EntityId, TrackedEntity};
pub use state::EntityState;
pub use tracker::ChangeTracker;
