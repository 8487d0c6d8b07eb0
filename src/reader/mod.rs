pub mod searcher;
pub mod searcher_holder;

pub use searcher::Searcher;
pub use searcher_holder::{ReleaseHandle, SearcherGuard, SearcherHolder, SearcherState};
