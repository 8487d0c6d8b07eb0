use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;

use crate::common::errors::EngineError;

/// Bound of the rolling per-index performance stats queue.
const PERFORMANCE_STATS_BOUND: usize = 25;
/// Bound of the per-index error log.
const ERROR_LOG_BOUND: usize = 500;
/// Attempts against the transactional store on concurrency conflicts.
const STATS_UPDATE_ATTEMPTS: usize = 10;
/// Sleep between those attempts.
const STATS_UPDATE_BACKOFF: Duration = Duration::from_millis(11);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Map,
    Reduce,
    Ignore,
}

/// Statistics of one applied batch.
#[derive(Debug, Clone)]
pub struct IndexingPerformanceStats {
    pub input_count: usize,
    pub operation: BatchOperation,
    pub started: DateTime<Utc>,
    pub indexing_attempts: usize,
    pub indexing_errors: usize,
    pub reduce_attempts: usize,
    pub reduce_errors: usize,
}

/// Rolling bounded queue of per-batch statistics.
#[derive(Default)]
pub struct PerformanceStatsQueue {
    queue: Mutex<VecDeque<IndexingPerformanceStats>>,
}

impl PerformanceStatsQueue {
    pub fn push(&self, stats: IndexingPerformanceStats) {
        let mut queue = self.queue.lock();
        if queue.len() == PERFORMANCE_STATS_BOUND {
            queue.pop_front();
        }
        queue.push_back(stats);
    }

    pub fn snapshot(&self) -> Vec<IndexingPerformanceStats> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Structured record of one per-document indexing failure.
#[derive(Debug, Clone)]
pub struct IndexingError {
    pub index_id: u32,
    pub document_key: String,
    pub message: String,
    pub source: String,
    pub at: DateTime<Utc>,
}

/// Bounded per-index error log. Per-document errors land here and never
/// abort their batch.
#[derive(Default)]
pub struct IndexErrorLog {
    errors: Mutex<VecDeque<IndexingError>>,
}

impl IndexErrorLog {
    pub fn record(&self, error: IndexingError) {
        let mut errors = self.errors.lock();
        if errors.len() == ERROR_LOG_BOUND {
            errors.pop_front();
        }
        errors.push_back(error);
    }

    pub fn snapshot(&self) -> Vec<IndexingError> {
        self.errors.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }
}

/// External transactional store receiving per-index stats updates.
pub trait StatsStore: Send + Sync {
    fn update_stats(&self, index_id: u32, stats: &IndexingPerformanceStats) -> crate::Result<()>;
}

/// Pushes one stats update, retrying concurrency conflicts a bounded
/// number of times with a short sleep. Every other error propagates.
pub fn update_stats_with_retry(
    store: &dyn StatsStore,
    index_id: u32,
    stats: &IndexingPerformanceStats,
) -> crate::Result<()> {
    let mut attempt = 0;
    loop {
        match store.update_stats(index_id, stats) {
            Ok(()) => return Ok(()),
            Err(EngineError::ConcurrencyConflict(detail)) => {
                attempt += 1;
                if attempt >= STATS_UPDATE_ATTEMPTS {
                    return Err(EngineError::ConcurrencyConflict(detail));
                }
                warn!(
                    "concurrency conflict updating stats of index {index_id} \
                     (attempt {attempt}): {detail}"
                );
                std::thread::sleep(STATS_UPDATE_BACKOFF);
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stats(input_count: usize) -> IndexingPerformanceStats {
        IndexingPerformanceStats {
            input_count,
            operation: BatchOperation::Map,
            started: Utc::now(),
            indexing_attempts: input_count,
            indexing_errors: 0,
            reduce_attempts: 0,
            reduce_errors: 0,
        }
    }

    #[test]
    fn test_performance_queue_is_bounded() {
        let queue = PerformanceStatsQueue::default();
        for index in 0..40 {
            queue.push(stats(index));
        }
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 25);
        // the oldest entries were dropped
        assert_eq!(snapshot[0].input_count, 15);
        assert_eq!(snapshot[24].input_count, 39);
    }

    struct Flaky {
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl StatsStore for Flaky {
        fn update_stats(
            &self,
            _index_id: u32,
            _stats: &IndexingPerformanceStats,
        ) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(EngineError::ConcurrencyConflict("busy".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_stats_update_retries_conflicts() {
        let store = Flaky { failures: AtomicUsize::new(3), calls: AtomicUsize::new(0) };
        update_stats_with_retry(&store, 1, &stats(1)).unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_stats_update_gives_up_after_bound() {
        let store = Flaky { failures: AtomicUsize::new(100), calls: AtomicUsize::new(0) };
        let result = update_stats_with_retry(&store, 1, &stats(1));
        assert!(matches!(result, Err(EngineError::ConcurrencyConflict(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 10);
    }
}
