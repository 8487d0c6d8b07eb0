pub mod analysis;
pub mod common;
pub mod directory;
pub mod index;
pub mod query;
pub mod reader;
pub mod segment;
pub mod writer;

use std::path::Path;

use once_cell::sync::Lazy;

use common::errors::EngineError;

/// Ordinal of a document inside one published commit point.
///
/// Ordinals are assigned per segment and globalized by the searcher
/// (segment base + local ordinal). They are only stable within a single
/// commit point; a new commit may reassign them.
pub type DocOrd = u32;

/// Commit generation. Increases by one on every successful commit.
pub type Generation = u64;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Points at the current commit point. Contains a single decimal
/// generation number; `segments_<generation>` is the commit file it
/// designates. Written after the commit file itself, so a reader that
/// follows it never observes a partially written commit.
pub static SEGMENTS_GEN_FILEPATH: Lazy<&'static Path> = Lazy::new(|| Path::new("segments.gen"));

/// Engine format marker, one line with a decimal version integer.
/// Written last during a commit and expected by backup/restore.
pub static INDEX_VERSION_FILEPATH: Lazy<&'static Path> = Lazy::new(|| Path::new("index.version"));

/// Current index format version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

pub use common::cancel::CancellationToken;
pub use common::errors::EngineError as Error;
pub use common::etag::Etag;
pub use index::{Index, IndexDefinition, IndexingPriority};
pub use query::IndexQuery;
