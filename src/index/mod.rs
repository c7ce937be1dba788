pub mod hierarchy;
pub mod live;

pub use hierarchy::{InsertOutcome, ShapeHierarchy};
pub use live::{IndexWriter, LiveIndex};
