use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::analysis::{build_analyzer, AnalyzerRegistry, AnalyzerScope, LowercaseKeywordAnalyzer};
use crate::common::cancel::CancellationToken;
use crate::common::clock::{Clock, SystemClock};
use crate::common::errors::EngineError;
use crate::directory::{
    materialize_directory, Directory, FsDirectory, RamDirectory, WRITING_TO_INDEX_LOCK,
};
use crate::index::config::EngineConfig;
use crate::index::definition::{IndexDefinition, IndexingPriority, DOCUMENT_ID_FIELD};
use crate::index::extensions::ExtensionsRegistry;
use crate::index::stats::{
    update_stats_with_retry, BatchOperation, IndexErrorLog, IndexingError,
    IndexingPerformanceStats, PerformanceStatsQueue, StatsStore,
};
use crate::index::{IndexEntry, IndexedItemsInfo, IndexingBatch, SourceDocument};
use crate::query::executor::{QueryOperation, ResultPredicate};
use crate::query::spatial::parse_point;
use crate::query::{IndexQuery, QueryResultIter};
use crate::reader::{Searcher, SearcherGuard, SearcherHolder};
use crate::segment::{SegmentMetaInventory, USER_DATA_HIGHEST_ETAG};
use crate::writer::{IndexWriter, SnapshotPolicy};
use crate::{INDEX_FORMAT_VERSION, INDEX_VERSION_FILEPATH};

/// Write failures before the index is quarantined.
const WRITE_ERRORS_THRESHOLD: u32 = 10;
/// How long one write-lock attempt waits before logging and retrying.
const WRITE_LOCK_WAIT: Duration = Duration::from_millis(100);
/// Bound on the searcher drain at shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces the index entries of one source document. Fan-out is the
/// number of entries returned.
pub type IndexingFn = Arc<dyn Fn(&SourceDocument) -> crate::Result<Vec<IndexEntry>> + Send + Sync>;

/// Receives user alerts, e.g. the error-quarantine notification.
pub trait AlertSink: Send + Sync {
    fn alert(&self, index_name: &str, message: &str);
}

/// Default sink: alerts land in the process log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, index_name: &str, message: &str) {
        error!("ALERT for index '{index_name}': {message}");
    }
}

/// Construction context of one index. The clock and the alert sink are
/// injected so hosts and tests control both.
pub struct IndexContext {
    pub definition: IndexDefinition,
    pub config: EngineConfig,
    pub indexing_fn: IndexingFn,
    pub clock: Arc<dyn Clock>,
    pub extensions: Arc<ExtensionsRegistry>,
    pub analyzers: Arc<AnalyzerRegistry>,
    pub alert_sink: Arc<dyn AlertSink>,
    pub stats_store: Option<Arc<dyn StatsStore>>,
    /// On-disk home of the index. Required unless `run_in_memory` is
    /// set; memory-backed indexes materialize here.
    pub disk_path: Option<PathBuf>,
}

impl IndexContext {
    pub fn new(definition: IndexDefinition, indexing_fn: IndexingFn) -> IndexContext {
        IndexContext {
            definition,
            config: EngineConfig::default(),
            indexing_fn,
            clock: Arc::new(SystemClock),
            extensions: Arc::new(ExtensionsRegistry::default()),
            analyzers: Arc::new(AnalyzerRegistry::default()),
            alert_sink: Arc::new(LogAlertSink),
            stats_store: None,
            disk_path: None,
        }
    }
}

pub(crate) struct WriterState {
    pub directory: Box<dyn Directory>,
    pub disk_path: Option<PathBuf>,
    pub writer: Option<IndexWriter>,
    pub writes_since_recreate: usize,
    pub force_write_to_disk: bool,
}

impl WriterState {
    /// The disposed flag is checked before the write lock is taken, so
    /// a concurrent dispose can still win the lock race and tear the
    /// writer down first; that re-check happens here, under the lock.
    fn writer_mut(&mut self) -> crate::Result<&mut IndexWriter> {
        self.writer.as_mut().ok_or_else(|| {
            EngineError::Other(
                "the index was disposed while the operation waited for its write lock"
                    .to_string(),
            )
        })
    }
}

struct BatchAccounting {
    attempts: usize,
    errors: usize,
}

/// One secondary index: the writer pipeline, the searcher lifecycle
/// and the query entry point behind a single façade.
///
/// All state-mutating operations serialize on one write lock; queries
/// never touch it. The advisory `writing-to-index.lock` file guards the
/// directory against out-of-process mutators on top of that.
pub struct Index {
    definition: Arc<IndexDefinition>,
    config: Arc<EngineConfig>,
    indexing_fn: IndexingFn,
    clock: Arc<dyn Clock>,
    extensions: Arc<ExtensionsRegistry>,
    analyzers: Arc<AnalyzerRegistry>,
    alert_sink: Arc<dyn AlertSink>,
    stats_store: Option<Arc<dyn StatsStore>>,

    inventory: SegmentMetaInventory,
    retention: SnapshotPolicy,
    holder: SearcherHolder,
    state: Mutex<WriterState>,
    wait_reason: Mutex<Option<&'static str>>,

    priority: AtomicU8,
    write_errors: AtomicU32,
    last_index_time_ms: AtomicI64,
    last_query_time_ms: AtomicI64,
    is_map_indexing_in_progress: AtomicBool,
    currently_indexing: Mutex<HashMap<u64, usize>>,
    next_batch_id: AtomicU64,
    currently_indexed_documents: Mutex<Vec<String>>,
    performance_stats: PerformanceStatsQueue,
    error_log: IndexErrorLog,
    disposed: AtomicBool,
}

impl Index {
    pub fn open(context: IndexContext) -> crate::Result<Index> {
        let IndexContext {
            definition,
            config,
            indexing_fn,
            clock,
            extensions,
            analyzers,
            alert_sink,
            stats_store,
            disk_path,
        } = context;

        let directory: Box<dyn Directory> = if config.run_in_memory {
            Box::new(RamDirectory::create())
        } else {
            let path = disk_path.clone().ok_or_else(|| {
                EngineError::InvalidArgument(
                    "an index that does not run in memory needs a disk path".to_string(),
                )
            })?;
            Box::new(FsDirectory::open_or_create(path)?)
        };

        let inventory = SegmentMetaInventory::default();
        let retention = SnapshotPolicy::new();
        let writer = IndexWriter::open(directory.clone(), inventory.clone())?;
        retention.on_commit(writer.committed().files());

        let searcher = Searcher::from_parts(
            writer.committed().clone(),
            writer.committed_readers().to_vec(),
            0,
        );
        let holder = SearcherHolder::new(searcher);

        info!(
            "opened index '{}' (id {}) at generation {}",
            definition.name,
            definition.index_id,
            writer.committed().generation,
        );
        let now = clock.utc_now_millis();
        Ok(Index {
            definition: Arc::new(definition),
            config: Arc::new(config),
            indexing_fn,
            clock,
            extensions,
            analyzers,
            alert_sink,
            stats_store,
            inventory,
            retention,
            holder,
            state: Mutex::new(WriterState {
                directory,
                disk_path,
                writer: Some(writer),
                writes_since_recreate: 0,
                force_write_to_disk: false,
            }),
            wait_reason: Mutex::new(None),
            priority: AtomicU8::new(IndexingPriority::Normal.as_u8()),
            write_errors: AtomicU32::new(0),
            last_index_time_ms: AtomicI64::new(now),
            last_query_time_ms: AtomicI64::new(now),
            is_map_indexing_in_progress: AtomicBool::new(false),
            currently_indexing: Mutex::new(HashMap::new()),
            next_batch_id: AtomicU64::new(0),
            currently_indexed_documents: Mutex::new(Vec::new()),
            performance_stats: PerformanceStatsQueue::default(),
            error_log: IndexErrorLog::default(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn definition(&self) -> &Arc<IndexDefinition> {
        &self.definition
    }

    pub fn priority(&self) -> IndexingPriority {
        IndexingPriority::from_u8(self.priority.load(Ordering::Acquire))
    }

    /// `Error` is terminal: attempts to demote out of it are ignored.
    pub fn set_priority(&self, priority: IndexingPriority) {
        let error_value = IndexingPriority::Error.as_u8();
        let mut current = self.priority.load(Ordering::Acquire);
        loop {
            if current == error_value && priority != IndexingPriority::Error {
                return;
            }
            match self.priority.compare_exchange(
                current,
                priority.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn write_error_count(&self) -> u32 {
        self.write_errors.load(Ordering::Acquire)
    }

    pub fn last_index_time_millis(&self) -> i64 {
        self.last_index_time_ms.load(Ordering::Acquire)
    }

    pub fn last_query_time_millis(&self) -> i64 {
        self.last_query_time_ms.load(Ordering::Acquire)
    }

    pub fn is_map_indexing_in_progress(&self) -> bool {
        self.is_map_indexing_in_progress.load(Ordering::Acquire)
    }

    pub fn performance_stats(&self) -> Vec<IndexingPerformanceStats> {
        self.performance_stats.snapshot()
    }

    pub fn errors(&self) -> Vec<IndexingError> {
        self.error_log.snapshot()
    }

    /// Current directory handle; useful for backup tooling and tests.
    pub fn directory(&self) -> Box<dyn Directory> {
        self.lock_held(|state| state.directory.clone())
    }

    pub fn is_on_disk(&self) -> bool {
        self.lock_held(|state| !state.directory.is_ram())
    }

    /// Requests materialization to disk on the next apply.
    pub fn force_write_to_disk(&self) {
        self.lock_held(|state| state.force_write_to_disk = true);
    }

    pub(crate) fn retention(&self) -> &SnapshotPolicy {
        &self.retention
    }

    /// Acquires a read view directly, outside any query.
    pub fn acquire_searcher(&self) -> SearcherGuard {
        self.holder.acquire()
    }

    fn assert_not_disposed(&self) -> crate::Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(EngineError::Other(format!(
                "index '{}' was disposed",
                self.definition.name
            )));
        }
        Ok(())
    }

    /// Takes the write lock, retrying a 100 ms trylock and logging who
    /// currently holds it.
    fn lock_writing(&self, reason: &'static str) -> MutexGuard<'_, WriterState> {
        loop {
            if let Some(guard) = self.state.try_lock_for(WRITE_LOCK_WAIT) {
                *self.wait_reason.lock() = Some(reason);
                return guard;
            }
            let held_for = *self.wait_reason.lock();
            debug!(
                "write lock of index '{}' is busy (held for: {}); still waiting to start: {reason}",
                self.definition.name,
                held_for.unwrap_or("unknown"),
            );
        }
    }

    fn release_wait_reason(&self) {
        *self.wait_reason.lock() = None;
    }

    fn lock_held<T>(&self, action: impl FnOnce(&mut WriterState) -> T) -> T {
        let mut state = self.lock_writing("inspecting index state");
        let value = action(&mut state);
        drop(state);
        self.release_wait_reason();
        value
    }

    fn touch_last_index_time(&self) {
        self.last_index_time_ms.fetch_max(self.clock.utc_now_millis(), Ordering::AcqRel);
    }

    /// Applies one batch: delete-then-add per document through the
    /// registered indexing function, commit stamped with the highest
    /// etag, searcher republish when anything changed.
    pub fn index_documents(
        &self,
        batch: &IndexingBatch,
        token: &CancellationToken,
    ) -> crate::Result<IndexedItemsInfo> {
        self.assert_not_disposed()?;
        if batch.documents.len() > self.config.max_number_of_items_to_process_in_single_batch {
            // the scheduler sizes batches; an oversized one is a
            // contract violation worth surfacing, not truncating
            warn!(
                "batch of {} documents for index '{}' exceeds \
                 max_number_of_items_to_process_in_single_batch ({})",
                batch.documents.len(),
                self.definition.name,
                self.config.max_number_of_items_to_process_in_single_batch,
            );
        }
        self.touch_last_index_time();
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::AcqRel);
        self.currently_indexing.lock().insert(batch_id, batch.documents.len());
        self.is_map_indexing_in_progress.store(true, Ordering::Release);
        let started = self.clock.utc_now();
        let mut accounting = BatchAccounting { attempts: 0, errors: 0 };

        let outcome = {
            let mut state = self.lock_writing("indexing documents");
            let result = self.apply_batch(&mut state, batch, token, &mut accounting);
            drop(state);
            self.release_wait_reason();
            result
        };

        // bookkeeping runs on every exit path, cancellation included
        self.currently_indexed_documents.lock().clear();
        self.currently_indexing.lock().remove(&batch_id);
        self.is_map_indexing_in_progress.store(false, Ordering::Release);
        self.touch_last_index_time();
        self.push_batch_stats(batch.documents.len(), started, &accounting, BatchOperation::Map);

        match outcome {
            Ok(info) => {
                self.write_errors.store(0, Ordering::Release);
                Ok(info)
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(error) => {
                let first_key = batch
                    .documents
                    .first()
                    .map(|document| document.key.clone())
                    .unwrap_or_default();
                self.record_write_failure(&first_key, &error, "apply");
                Err(EngineError::write_failed(error))
            }
        }
    }

    fn apply_batch(
        &self,
        state: &mut WriterState,
        batch: &IndexingBatch,
        token: &CancellationToken,
        accounting: &mut BatchAccounting,
    ) -> crate::Result<IndexedItemsInfo> {
        // advisory directory lock; failing to obtain it is fatal for
        // this call
        let _writing_lock = state.directory.acquire_lock(&WRITING_TO_INDEX_LOCK)?;

        let mut analyzer_scope = AnalyzerScope::default();
        let analyzer = build_analyzer(
            &self.definition,
            &self.analyzers,
            Arc::new(LowercaseKeywordAnalyzer),
            false,
            &self.extensions.analyzer_generators,
            &mut analyzer_scope,
        )?;

        let output_cap = self
            .definition
            .max_index_outputs_per_document
            .unwrap_or(if self.definition.is_map_reduce {
                self.config.max_map_reduce_index_outputs_per_document
            } else {
                self.config.max_simple_index_outputs_per_document
            });

        let mut changed_docs = 0usize;
        let writer = state.writer_mut()?;
        for document in &batch.documents {
            token.checkpoint()?;
            self.currently_indexed_documents.lock().push(document.key.clone());
            accounting.attempts += 1;

            let deleted = writer.delete_by_key(&document.key);
            if deleted > 0 {
                for trigger in &self.extensions.update_triggers {
                    trigger.on_index_entry_deleted(&document.key);
                }
            }

            let mut entries = match (self.indexing_fn)(document) {
                Ok(entries) => entries,
                Err(map_error) => {
                    accounting.errors += 1;
                    self.record_document_error(&document.key, &map_error, "map");
                    if deleted > 0 {
                        changed_docs += 1;
                    }
                    continue;
                }
            };

            if let Err(spatial_error) = self.validate_spatial(&document.key, &entries) {
                accounting.errors += 1;
                self.record_document_error(&document.key, &spatial_error, "spatial");
                if deleted > 0 {
                    changed_docs += 1;
                }
                continue;
            }

            if output_cap >= 0 && entries.len() > output_cap as usize {
                let overflow = EngineError::Other(format!(
                    "the indexing function produced {} entries for document '{}', \
                     the allowed maximum is {output_cap}",
                    entries.len(),
                    document.key,
                ));
                self.record_document_error(&document.key, &overflow, "fan-out");
                entries.truncate(output_cap as usize);
            }

            for entry in &mut entries {
                if !entry.has_field(DOCUMENT_ID_FIELD) {
                    entry.add_field(DOCUMENT_ID_FIELD, &document.key);
                }
            }
            for entry in &entries {
                writer.add_entry(entry, analyzer.as_ref(), &self.definition);
                for trigger in &self.extensions.update_triggers {
                    trigger.on_index_entry_created(&document.key, entry);
                }
            }
            if deleted > 0 || !entries.is_empty() {
                changed_docs += 1;
            }
        }

        let highest_etag = batch.highest_etag();
        if changed_docs > 0 {
            let mut user_data = writer.committed().user_data.clone();
            if let Some(etag) = highest_etag {
                user_data.insert(USER_DATA_HIGHEST_ETAG.to_string(), etag.to_hex());
            }
            writer.commit(user_data, &self.retention)?;
            if writer.ram_bytes() >= self.config.flush_threshold_bytes() {
                writer.flush()?;
            }
        }

        self.maybe_materialize(state, batch.index_up_to_date)?;
        self.maybe_recreate_writer(state)?;

        if changed_docs > 0 {
            self.publish_searcher(state)?;
        }
        Ok(IndexedItemsInfo { changed_docs, highest_etag })
    }

    fn validate_spatial(&self, document_key: &str, entries: &[IndexEntry]) -> crate::Result<()> {
        for entry in entries {
            for field in &self.definition.spatial_fields {
                if let Some(value) = entry.first_value(field) {
                    if parse_point(value).is_none() {
                        return Err(EngineError::InvalidSpatialShape {
                            document_id: document_key.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes documents by key. Changed state commits under the same
    /// etag the index already carried.
    pub fn remove(&self, keys: &[String], token: &CancellationToken) -> crate::Result<usize> {
        self.assert_not_disposed()?;
        self.touch_last_index_time();
        let started = self.clock.utc_now();
        let outcome = {
            let mut state = self.lock_writing("removing documents");
            let result = self.remove_locked(&mut state, keys, token);
            drop(state);
            self.release_wait_reason();
            result
        };
        self.touch_last_index_time();
        let accounting = BatchAccounting { attempts: keys.len(), errors: 0 };
        self.push_batch_stats(keys.len(), started, &accounting, BatchOperation::Ignore);
        match outcome {
            Ok(deleted) => {
                self.write_errors.store(0, Ordering::Release);
                Ok(deleted)
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(error) => {
                let first_key = keys.first().cloned().unwrap_or_default();
                self.record_write_failure(&first_key, &error, "remove");
                Err(EngineError::write_failed(error))
            }
        }
    }

    fn remove_locked(
        &self,
        state: &mut WriterState,
        keys: &[String],
        token: &CancellationToken,
    ) -> crate::Result<usize> {
        let _writing_lock = state.directory.acquire_lock(&WRITING_TO_INDEX_LOCK)?;
        let writer = state.writer_mut()?;
        let mut deleted = 0usize;
        for key in keys {
            token.checkpoint()?;
            let removed = writer.delete_by_key(key);
            if removed > 0 {
                deleted += 1;
                for trigger in &self.extensions.update_triggers {
                    trigger.on_index_entry_deleted(key);
                }
            }
        }
        if deleted > 0 {
            let user_data = writer.committed().user_data.clone();
            writer.commit(user_data, &self.retention)?;
            self.publish_searcher(state)?;
        }
        Ok(deleted)
    }

    /// Runs a query. Never takes the write lock.
    pub fn query(
        &self,
        query: IndexQuery,
        token: &CancellationToken,
    ) -> crate::Result<QueryResultIter> {
        self.query_with_predicate(query, token, None)
    }

    pub fn query_with_predicate(
        &self,
        query: IndexQuery,
        token: &CancellationToken,
        predicate: Option<ResultPredicate>,
    ) -> crate::Result<QueryResultIter> {
        self.assert_not_disposed()?;
        // most-recent-wins is enough here
        self.last_query_time_ms.store(self.clock.utc_now_millis(), Ordering::Release);
        let mut operation = QueryOperation::new(
            self.definition.clone(),
            self.config.clone(),
            self.extensions.clone(),
            self.analyzers.clone(),
            self.priority(),
            query,
            token.clone(),
        );
        if let Some(predicate) = predicate {
            operation = operation.with_predicate(predicate);
        }
        operation.execute(&self.holder)
    }

    /// Commits buffered mutations without republishing the searcher.
    pub fn flush(&self) -> crate::Result<()> {
        self.assert_not_disposed()?;
        let mut state = self.lock_writing("flushing index");
        let result = (|| {
            let writer = state.writer_mut()?;
            if writer.has_pending_changes() {
                let user_data = writer.committed().user_data.clone();
                writer.commit(user_data, &self.retention)?;
            }
            Ok(())
        })();
        drop(state);
        self.release_wait_reason();
        result
    }

    /// Merges all segments into one. Long-running; blocks other writes
    /// on this index for the duration.
    pub fn merge_segments(&self) -> crate::Result<()> {
        self.assert_not_disposed()?;
        let mut state = self.lock_writing("merging segments");
        let result = state.writer_mut().and_then(|writer| writer.optimize(&self.retention));
        drop(state);
        self.release_wait_reason();
        result
    }

    /// Moves a memory-backed index to disk when forced, when it
    /// outgrew the in-memory budget, or when the scheduler reported it
    /// as caught up.
    fn maybe_materialize(&self, state: &mut WriterState, up_to_date: bool) -> crate::Result<()> {
        if !state.directory.is_ram() {
            return Ok(());
        }
        let Some(disk_path) = state.disk_path.clone() else {
            return Ok(());
        };
        let size = state.directory.total_size()? as usize;
        let should_persist = state.force_write_to_disk
            || size > self.config.new_index_in_memory_max_bytes
            || up_to_date;
        if !should_persist {
            return Ok(());
        }
        info!(
            "materializing in-memory index '{}' ({size} bytes) to {disk_path:?}",
            self.definition.name,
        );
        // release write.lock of the ram directory before copying
        state.writer = None;
        let fs_directory = FsDirectory::open_or_create(&disk_path)?;
        materialize_directory(state.directory.as_ref(), &fs_directory)?;
        fs_directory
            .atomic_write(&INDEX_VERSION_FILEPATH, format!("{INDEX_FORMAT_VERSION}\n").as_bytes())?;
        state.directory = Box::new(fs_directory);
        state.writer = Some(IndexWriter::open(state.directory.clone(), self.inventory.clone())?);
        state.force_write_to_disk = false;
        Ok(())
    }

    /// Tears the writer down and reopens it after enough applies, so
    /// its internal buffers cannot grow forever.
    fn maybe_recreate_writer(&self, state: &mut WriterState) -> crate::Result<()> {
        state.writes_since_recreate += 1;
        if state.writes_since_recreate < self.config.max_index_writes_before_recreate {
            return Ok(());
        }
        debug!(
            "recreating writer of index '{}' after {} writes",
            self.definition.name, state.writes_since_recreate,
        );
        state.writer = None;
        state.writer = Some(IndexWriter::open(state.directory.clone(), self.inventory.clone())?);
        state.writes_since_recreate = 0;
        Ok(())
    }

    /// Publishes a fresh searcher over the writer's committed state.
    /// Called under the write lock, exactly once per commit that
    /// changed documents.
    fn publish_searcher(&self, state: &mut WriterState) -> crate::Result<()> {
        let generation = self.holder.next_generation();
        let writer = state.writer_mut()?;
        let searcher = Searcher::from_parts(
            writer.committed().clone(),
            writer.committed_readers().to_vec(),
            generation,
        );
        self.holder.set_current(searcher, false);
        Ok(())
    }

    fn push_batch_stats(
        &self,
        input_count: usize,
        started: chrono::DateTime<chrono::Utc>,
        accounting: &BatchAccounting,
        operation: BatchOperation,
    ) {
        let operation = if self.definition.is_map_reduce && operation == BatchOperation::Map {
            BatchOperation::Reduce
        } else {
            operation
        };
        let stats = IndexingPerformanceStats {
            input_count,
            operation,
            started,
            indexing_attempts: accounting.attempts,
            indexing_errors: accounting.errors,
            reduce_attempts: if self.definition.is_map_reduce { accounting.attempts } else { 0 },
            reduce_errors: if self.definition.is_map_reduce { accounting.errors } else { 0 },
        };
        self.performance_stats.push(stats.clone());
        if let Some(store) = &self.stats_store {
            if let Err(stats_error) =
                update_stats_with_retry(store.as_ref(), self.definition.index_id, &stats)
            {
                warn!(
                    "failed to persist stats of index '{}': {stats_error}",
                    self.definition.name,
                );
            }
        }
    }

    fn record_document_error(&self, document_key: &str, error: &EngineError, source: &str) {
        self.error_log.record(IndexingError {
            index_id: self.definition.index_id,
            document_key: document_key.to_string(),
            message: error.to_string(),
            source: source.to_string(),
            at: self.clock.utc_now(),
        });
    }

    /// Writer-level failure: counted, recorded, and past the threshold
    /// the index is quarantined one-way and an alert raised.
    fn record_write_failure(&self, document_key: &str, error: &EngineError, source: &str) {
        self.record_document_error(document_key, error, source);
        let count = self.write_errors.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= WRITE_ERRORS_THRESHOLD {
            self.set_priority(IndexingPriority::Error);
            if count == WRITE_ERRORS_THRESHOLD {
                self.alert_sink.alert(
                    &self.definition.name,
                    &format!(
                        "index has failed {count} times to write data to disk and was disabled; \
                         last error: {error}"
                    ),
                );
            }
        }
    }

    /// Final commit of pending changes, writer teardown (releasing the
    /// directory locks) and a bounded drain of the published searcher.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.lock_writing("disposing index");
        if let Some(writer) = state.writer.as_mut() {
            if writer.has_pending_changes() {
                let user_data = writer.committed().user_data.clone();
                if let Err(commit_error) = writer.commit(user_data, &self.retention) {
                    error!(
                        "final commit of index '{}' failed during dispose: {commit_error}",
                        self.definition.name,
                    );
                }
            }
        }
        state.writer = None;
        drop(state);
        self.release_wait_reason();
        self.holder.drain_for_shutdown(SHUTDOWN_DRAIN_TIMEOUT);
        info!("disposed index '{}'", self.definition.name);
    }

    /// Hot backup of this index; see [`backup_index`](crate::index::backup::backup_index).
    pub fn backup(&self, request: &crate::index::backup::BackupRequest) -> crate::Result<()> {
        crate::index::backup::backup_index(self, request)
    }

    pub(crate) fn backup_prepare(
        &self,
    ) -> crate::Result<(Box<dyn Directory>, Vec<u8>, Vec<u8>)> {
        // memory-backed indexes must land on disk first
        {
            let mut state = self.lock_writing("preparing backup");
            let result = (|| -> crate::Result<()> {
                if state.directory.is_ram() {
                    state.force_write_to_disk = true;
                    self.maybe_materialize(&mut state, false)?;
                    if state.directory.is_ram() {
                        return Err(EngineError::InvalidArgument(
                            "cannot back up a memory-backed index without a disk path".to_string(),
                        ));
                    }
                }
                Ok(())
            })();
            drop(state);
            self.release_wait_reason();
            result?;
        }

        // under the write lock, with an empty commit, capture the exact
        // snapshot identity
        let mut state = self.lock_writing("backing up index");
        let result = (|| {
            let writer = state.writer_mut()?;
            let user_data = writer.committed().user_data.clone();
            writer.commit(user_data, &self.retention)?;
            let segments_gen = state.directory.atomic_read(&crate::SEGMENTS_GEN_FILEPATH)?;
            let index_version = state.directory.atomic_read(&INDEX_VERSION_FILEPATH)?;
            Ok((state.directory.clone(), segments_gen, index_version))
        })();
        drop(state);
        self.release_wait_reason();
        result
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) {
            self.dispose();
        }
    }
}
