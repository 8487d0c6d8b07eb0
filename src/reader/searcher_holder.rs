use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::reader::searcher::Searcher;
use crate::segment::StoredDocument;

/// One published, reference-counted view of the index.
///
/// Created atomically when the writer commits; the materialized
/// stored-fields array is computed once here so projections never hop
/// back into segment files. Discarded when the strong count drops to
/// zero and it is no longer the published state.
pub struct SearcherState {
    searcher: Searcher,
    stored_fields: Arc<Vec<StoredDocument>>,
    generation: u64,
    strong: AtomicU32,
    is_current: AtomicBool,
    drain_mutex: Mutex<()>,
    drained: Condvar,
}

impl SearcherState {
    pub fn new(searcher: Searcher) -> Arc<SearcherState> {
        let stored_fields = Arc::new(searcher.materialize_stored_fields());
        let generation = searcher.generation();
        Arc::new(SearcherState {
            searcher,
            stored_fields,
            generation,
            // the holder's own reference
            strong: AtomicU32::new(1),
            is_current: AtomicBool::new(true),
            drain_mutex: Mutex::new(()),
            drained: Condvar::new(),
        })
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn stored_fields(&self) -> &Arc<Vec<StoredDocument>> {
        &self.stored_fields
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn retain(&self) {
        self.strong.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.strong.fetch_sub(1, Ordering::AcqRel);
        let _guard = self.drain_mutex.lock();
        self.drained.notify_all();
    }

    /// Waits until at most `floor` references remain. Returns whether
    /// the drain completed within the timeout.
    fn wait_for_drain(&self, floor: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.drain_mutex.lock();
        while self.strong.load(Ordering::Acquire) > floor {
            let now = Instant::now();
            if now >= deadline {
                return self.strong.load(Ordering::Acquire) <= floor;
            }
            let _ = self.drained.wait_for(&mut guard, deadline - now);
        }
        true
    }
}

/// RAII guard over an acquired searcher state. Must be released on all
/// exit paths, which the drop impl guarantees; query iterators hold one
/// for their entire lifetime.
pub struct SearcherGuard {
    state: Arc<SearcherState>,
}

impl SearcherGuard {
    pub fn searcher(&self) -> &Searcher {
        self.state.searcher()
    }

    pub fn stored_fields(&self) -> Arc<Vec<StoredDocument>> {
        self.state.stored_fields().clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.generation()
    }
}

impl Drop for SearcherGuard {
    fn drop(&mut self) {
        self.state.release();
    }
}

/// Handle returned by `set_current(wait: true)`: signals once the
/// previously published state has been released by its last reader.
pub struct ReleaseHandle {
    state: Arc<SearcherState>,
}

impl ReleaseHandle {
    /// Bounded wait; a timeout produces a warning at the caller, not a
    /// failure.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.state.wait_for_drain(0, timeout)
    }
}

/// Publishes at most one current read-only view while any number of
/// older views stay alive for readers that already obtained them.
///
/// Publication is a lock-free atomic swap; a state's refcount is never
/// below one while it is current (the holder itself accounts for one).
pub struct SearcherHolder {
    current: ArcSwap<SearcherState>,
    generation_counter: AtomicU64,
}

impl SearcherHolder {
    pub fn new(initial: Searcher) -> SearcherHolder {
        let generation = initial.generation();
        SearcherHolder {
            current: ArcSwap::from(SearcherState::new(initial)),
            generation_counter: AtomicU64::new(generation + 1),
        }
    }

    /// Generation to stamp on the next searcher to publish.
    pub fn next_generation(&self) -> u64 {
        self.generation_counter.fetch_add(1, Ordering::AcqRel)
    }

    pub fn current_generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Atomically replaces the current state. The previous state is
    /// released, not destroyed: its cleanup runs when its last reader
    /// lets go. With `wait` the caller receives a handle that completes
    /// at that point.
    pub fn set_current(&self, searcher: Searcher, wait: bool) -> Option<ReleaseHandle> {
        let state = SearcherState::new(searcher);
        let previous = self.current.swap(state);
        previous.is_current.store(false, Ordering::Release);
        previous.release();
        if wait {
            Some(ReleaseHandle { state: previous })
        } else {
            None
        }
    }

    /// Takes the current state and bumps its refcount. Concurrent calls
    /// observe either fully the old state or fully the new one.
    pub fn acquire(&self) -> SearcherGuard {
        loop {
            let state = self.current.load_full();
            state.retain();
            // the state may have been swapped out between load and
            // retain; re-check so the drain wait cannot miss us
            if Arc::ptr_eq(&state, &self.current.load_full())
                || !state.is_current.load(Ordering::Acquire)
            {
                return SearcherGuard { state };
            }
            state.release();
        }
    }

    /// Same as [`acquire`](Self::acquire), additionally exposing the
    /// precomputed stored-fields array for fast projection.
    pub fn acquire_with_stored_fields(&self) -> (SearcherGuard, Arc<Vec<StoredDocument>>) {
        let guard = self.acquire();
        let stored_fields = guard.stored_fields();
        (guard, stored_fields)
    }

    /// Drains the current state down to the holder's own reference.
    /// Used at shutdown with a bounded wait; on timeout the caller logs
    /// and proceeds.
    pub fn drain_for_shutdown(&self, timeout: Duration) -> bool {
        let state = self.current.load_full();
        let completed = state.wait_for_drain(1, timeout);
        if !completed {
            warn!(
                "searcher generation {} still had readers after {:?} at shutdown",
                state.generation(),
                timeout,
            );
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Directory, RamDirectory};
    use crate::segment::SegmentMetaInventory;

    fn empty_searcher(generation: u64) -> Searcher {
        let directory = RamDirectory::create();
        let inventory = SegmentMetaInventory::default();
        Searcher::open(&directory, &inventory, generation).unwrap()
    }

    #[test]
    fn test_acquire_sees_published_generation() {
        let holder = SearcherHolder::new(empty_searcher(0));
        assert_eq!(holder.current_generation(), 0);
        let generation = holder.next_generation();
        holder.set_current(empty_searcher(generation), false);
        assert_eq!(holder.current_generation(), 1);
        let guard = holder.acquire();
        assert_eq!(guard.generation(), 1);
    }

    #[test]
    fn test_old_state_survives_swap_for_its_readers() {
        let holder = SearcherHolder::new(empty_searcher(0));
        let old_guard = holder.acquire();
        holder.set_current(empty_searcher(1), false);
        // the old guard still reads generation 0
        assert_eq!(old_guard.generation(), 0);
        assert_eq!(holder.acquire().generation(), 1);
    }

    #[test]
    fn test_release_handle_completes_when_last_reader_drops() {
        let holder = SearcherHolder::new(empty_searcher(0));
        let old_guard = holder.acquire();
        let handle = holder.set_current(empty_searcher(1), true).expect("wait handle");
        assert!(!handle.wait(Duration::from_millis(10)));
        drop(old_guard);
        assert!(handle.wait(Duration::from_millis(500)));
    }

    #[test]
    fn test_swap_without_readers_completes_immediately() {
        let holder = SearcherHolder::new(empty_searcher(0));
        let handle = holder.set_current(empty_searcher(1), true).expect("wait handle");
        assert!(handle.wait(Duration::from_millis(100)));
    }
}
