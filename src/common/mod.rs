pub mod cancel;
pub mod clock;
pub mod errors;
pub mod etag;
pub mod file_operations;

pub use cancel::CancellationToken;
pub use clock::{Clock, SystemClock};
pub use etag::Etag;
pub use file_operations::{atomic_save_json, atomic_save_text, read_json, read_text, FileOperationError};
