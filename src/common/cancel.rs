use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::errors::EngineError;

/// Cooperative cancellation flag shared between a caller and a running
/// indexing or query iteration.
///
/// Iterations check it before every page refill and between emitted
/// results; the robust indexing enumerator checks it at each step and
/// keeps its error accounting intact when it stops early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the token has been triggered.
    pub fn checkpoint(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_trips_after_cancel() {
        let token = CancellationToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(token.checkpoint(), Err(EngineError::Cancelled)));
        // cancelling twice is harmless
        token.cancel();
        assert!(token.is_cancelled());
    }
}
