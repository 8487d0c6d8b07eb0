pub mod index_writer;
pub mod snapshot_policy;

pub use index_writer::IndexWriter;
pub use snapshot_policy::{Snapshot, SnapshotPolicy};
