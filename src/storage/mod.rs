pub mod blob;
pub mod snapshot;

pub use blob::{BlobStore, ReservedDir, SweepReport};
pub use snapshot::SnapshotStore;
