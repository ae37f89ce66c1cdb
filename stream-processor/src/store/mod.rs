pub mod aggregate_store;
pub mod snapshot;

pub use aggregate_store::{Applied, KeyEntry, KeyedAggregateStore};
pub use snapshot::{SnapshotError, SnapshotFile, StoreSnapshot};
