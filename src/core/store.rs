use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use log::{info, warn};
use crate::core::config::StoreConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::metrics::{MetricsSink, NullMetricsSink, names};
use crate::core::types::{Document, DocumentId, InternalId};
use crate::index::handlers::{HnswIndexHandler, IndexRegistry, StringIndexHandler};
use crate::query::ast::LogicalNode;
use crate::search::executor::QueryExecutor;
use crate::search::results::ResultDocument;
use crate::storage::persister::DocumentPersister;
use crate::storage::wal::{WalOperation, WriteAheadLog};

/// Point-in-time monitoring snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub document_count: usize,
    pub vector_indexes: usize,
    pub string_indexes: usize,
    pub pending_inserts: u64,
}

/// The store façade: owns the WAL, the persister, every index handler and
/// the query executor, and sequences them so adds and removes are atomic.
///
/// Write path: WAL record (uncommitted) → persister (fields in parallel,
/// then shape) → index handlers → WAL commit. Read path: executor →
/// splitter → bitmap operators → vectorized runner.
pub struct AxonStore {
    config: StoreConfig,
    metrics: Arc<dyn MetricsSink>,
    persister: Arc<DocumentPersister>,
    wal: WriteAheadLog,
    registry: IndexRegistry,
    executor: QueryExecutor,
    initialized: AtomicBool,
    insert_queue: Arc<AtomicU64>,
}

impl AxonStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_metrics(config, Arc::new(NullMetricsSink))
    }

    pub fn open_with_metrics(config: StoreConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_folder)?;
        let persister = Arc::new(DocumentPersister::open(
            &config.data_folder,
            config.bucket_count,
            config.write_threads,
        )?);
        let wal = WriteAheadLog::open(config.data_folder.join("wal"))?;

        let mut registry = IndexRegistry::new();
        for vector in &config.vector_indexes {
            registry.register(Arc::new(HnswIndexHandler::open(
                &config.data_folder,
                &vector.field,
                vector.hnsw.clone(),
            )?));
        }
        for field in &config.string_indexes {
            registry.register(Arc::new(StringIndexHandler::open(
                &config.data_folder,
                field,
                config.bucket_count,
            )?));
        }

        Ok(AxonStore {
            config,
            metrics,
            persister,
            wal,
            registry,
            executor: QueryExecutor::new(),
            initialized: AtomicBool::new(false),
            insert_queue: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Replay interrupted transactions and bring the store online. Must
    /// complete before any other operation.
    pub fn initialize(&self) -> Result<()> {
        let pending = self.wal.read_uncommitted()?;
        if !pending.is_empty() {
            info!("replaying {} interrupted transaction(s)", pending.len());
        }
        for (tx_id, operation) in pending {
            self.replay(tx_id, &operation).map_err(|e| {
                Error::aggregate(
                    ErrorKind::WalReplay,
                    format!("transaction {} could not be re-applied", tx_id),
                    vec![e],
                )
            })?;
            self.wal.commit(tx_id)?;
        }
        // Replayed effects are durable once the stores commit, so the log
        // up to here is history.
        self.persister.commit_all()?;
        self.wal.checkpoint()?;

        let persister = Arc::clone(&self.persister);
        self.metrics.register_gauge(
            names::DOCUMENT_COUNT,
            Box::new(move || persister.document_count().map(|c| c as f64).unwrap_or(-1.0)),
        );
        let queue = Arc::clone(&self.insert_queue);
        self.metrics.register_gauge(
            names::DOCUMENT_INSERT_QUEUE,
            Box::new(move || queue.load(Ordering::Acquire) as f64),
        );

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn replay(&self, tx_id: u64, operation: &WalOperation) -> Result<()> {
        match operation {
            WalOperation::Add { document } => {
                info!("replaying add of {} (tx {})", document.id, tx_id);
                self.apply_add(document)?;
            }
            WalOperation::Remove { id } => {
                info!("replaying remove of {} (tx {})", id, tx_id);
                let id = DocumentId::parse(id)?;
                self.apply_remove(&id)?;
            }
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::NotInitialized,
                "the store must be initialized first",
            ));
        }
        Ok(())
    }

    fn apply_add(&self, document: &Document) -> Result<InternalId> {
        let result = self.persister.write(document)?;
        let Some(internal_id) = result.internal_id else {
            return Err(result.into_error(&document.id));
        };
        for handler in self.registry.handlers() {
            handler.index(internal_id, document)?;
        }
        Ok(internal_id)
    }

    fn apply_remove(&self, id: &DocumentId) -> Result<bool> {
        let Some(document) = self.persister.read(id)? else {
            return Ok(false);
        };
        if let Some(internal_id) = self.persister.internal_id_of(id)? {
            for handler in self.registry.handlers() {
                handler.remove(internal_id, &document)?;
            }
        }
        self.persister.remove(id)?;
        Ok(true)
    }

    /// Add (or replace) a document. Returns its internal id.
    pub fn add(&self, document: &Document) -> Result<InternalId> {
        self.ensure_initialized()?;
        self.insert_queue.fetch_add(1, Ordering::AcqRel);
        let start = Instant::now();
        let outcome = (|| {
            let tx_id = self.wal.record_add(document)?;
            // On failure the WAL entry stays uncommitted and is resolved at
            // the next replay or checkpoint.
            let internal_id = self.apply_add(document)?;
            self.wal.commit(tx_id)?;
            Ok(internal_id)
        })();
        self.insert_queue.fetch_sub(1, Ordering::AcqRel);
        if outcome.is_ok() {
            self.metrics.increment_counter(names::DOCUMENT_INSERT_COUNT);
            self.metrics.record_timer(
                names::DOCUMENT_INSERT_LATENCY,
                start.elapsed().as_nanos() as u64,
            );
        }
        outcome
    }

    /// Remove a document. Returns false when it was not present.
    pub fn remove(&self, id: &DocumentId) -> Result<bool> {
        self.ensure_initialized()?;
        let start = Instant::now();
        let tx_id = self.wal.record_remove(&id.to_string())?;
        let removed = self.apply_remove(id)?;
        self.wal.commit(tx_id)?;
        if removed {
            self.metrics.increment_counter(names::DOCUMENT_REMOVE_COUNT);
            self.metrics.record_timer(
                names::DOCUMENT_REMOVE_LATENCY,
                start.elapsed().as_nanos() as u64,
            );
        }
        Ok(removed)
    }

    pub fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.ensure_initialized()?;
        self.persister.read(id)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.ensure_initialized()?;
        Ok(StoreStats {
            document_count: self.persister.document_count()?,
            vector_indexes: self.config.vector_indexes.len(),
            string_indexes: self.config.string_indexes.len(),
            pending_inserts: self.insert_queue.load(Ordering::Acquire),
        })
    }

    pub fn search(&self, query: &LogicalNode, max_results: usize) -> Result<Vec<ResultDocument>> {
        self.ensure_initialized()?;
        let start = Instant::now();
        let results = self
            .executor
            .execute(&self.registry, &self.persister, query, max_results)?;
        self.metrics.increment_counter(names::SEARCH_COUNT);
        self.metrics
            .record_timer(names::SEARCH_LATENCY, start.elapsed().as_nanos() as u64);
        Ok(results)
    }

    /// Make every logged effect durable in the main stores, then truncate
    /// the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.persister.commit_all()?;
        for handler in self.registry.handlers() {
            handler.flush()?;
        }
        self.wal.checkpoint()
    }

    /// Flush and close everything, aggregating per-component failures.
    pub fn close(&self) -> Result<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.persister.commit_all() {
            failures.push(e);
        }
        for handler in self.registry.handlers() {
            if let Err(e) = handler.close() {
                failures.push(e);
            }
        }
        if let Err(e) = self.wal.close() {
            failures.push(e);
        }
        self.initialized.store(false, Ordering::SeqCst);
        if failures.is_empty() {
            Ok(())
        } else {
            warn!("{} component(s) failed to close", failures.len());
            Err(Error::aggregate(
                ErrorKind::CloseFailure,
                "one or more components failed to close",
                failures,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use crate::core::config::VectorIndexConfig;
    use crate::core::metrics::AtomicMetricsSink;
    use crate::core::types::FieldValue;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> StoreConfig {
        let mut cfg = StoreConfig::new(dir);
        cfg.bucket_count = 32;
        cfg.write_threads = 2;
        cfg.vector_indexes
            .push(VectorIndexConfig::new("embedding", 2));
        cfg.string_indexes.push("genre".to_string());
        cfg
    }

    fn open_store(dir: &std::path::Path) -> AxonStore {
        let store = AxonStore::open(config(dir)).unwrap();
        store.initialize().unwrap();
        store
    }

    fn movie(genre: &str, year: i32, embedding: Vec<f32>) -> Document {
        Document::new(DocumentId::new())
            .with_field("genre", FieldValue::Text(genre.to_string()))
            .with_field("year", FieldValue::Integer(year))
            .with_field("embedding", FieldValue::Vector(embedding))
    }

    fn hybrid_fixtures(store: &AxonStore) -> (DocumentId, DocumentId, DocumentId) {
        let a = movie("Sci-Fi", 1999, vec![1.0, 0.0]);
        let b = movie("Sci-Fi", 1985, vec![0.9, 0.1]);
        let c = movie("Horror", 1999, vec![0.95, 0.1]);
        let (ia, ib, ic) = (a.id, b.id, c.id);
        store.add(&a).unwrap();
        store.add(&b).unwrap();
        store.add(&c).unwrap();
        (ia, ib, ic)
    }

    #[test]
    fn operations_require_initialization() {
        let dir = tempdir().unwrap();
        let store = AxonStore::open(config(dir.path())).unwrap();
        let doc = movie("Sci-Fi", 2000, vec![1.0, 0.0]);
        let err = store.add(&doc).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotInitialized);
        assert_eq!(store.get(&doc.id).unwrap_err().kind, ErrorKind::NotInitialized);
    }

    #[test]
    fn add_get_remove_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let doc = movie("Sci-Fi", 1999, vec![1.0, 0.0]);

        store.add(&doc).unwrap();
        assert_eq!(store.get(&doc.id).unwrap(), Some(doc.clone()));
        assert!(store.remove(&doc.id).unwrap());
        assert_eq!(store.get(&doc.id).unwrap(), None);
        assert!(!store.remove(&doc.id).unwrap());
    }

    #[test]
    fn documents_survive_reopen() {
        let dir = tempdir().unwrap();
        let doc = movie("Sci-Fi", 1999, vec![1.0, 0.0]);
        {
            let store = open_store(dir.path());
            store.add(&doc).unwrap();
            store.close().unwrap();
        }
        let store = open_store(dir.path());
        assert_eq!(store.get(&doc.id).unwrap(), Some(doc));
    }

    #[test]
    fn hybrid_query_filters_on_both_sides() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let (ia, _, _) = hybrid_fixtures(&store);

        let query = LogicalNode::all_of(vec![
            LogicalNode::is_similar_to("embedding", vec![1.0, 0.0]).unwrap(),
            LogicalNode::is_equal("genre", "Sci-Fi").unwrap(),
            LogicalNode::is_greater_than("year", 1990).unwrap(),
        ])
        .unwrap();

        let results = store.search(&query, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, ia);
    }

    #[test]
    fn negated_predicate_excludes_matches() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let (ia, ib, _) = hybrid_fixtures(&store);

        let query = LogicalNode::and(
            LogicalNode::is_similar_to("embedding", vec![1.0, 0.0]).unwrap(),
            LogicalNode::not(LogicalNode::is_equal("genre", "Horror").unwrap()),
        );

        let results = store.search(&query, 10).unwrap();
        let ids: Vec<DocumentId> = results.iter().map(|r| r.document.id).collect();
        assert_eq!(ids, vec![ia, ib]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn removed_documents_never_surface_in_vector_search() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let (_, _, ic) = hybrid_fixtures(&store);
        store.remove(&ic).unwrap();

        let query = LogicalNode::is_similar_to("embedding", vec![1.0, 0.0]).unwrap();
        let results = store.search(&query, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.document.id != ic));
    }

    #[test]
    fn re_adding_replaces_the_document() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let doc = movie("Sci-Fi", 1999, vec![1.0, 0.0]);
        store.add(&doc).unwrap();

        let mut updated = doc.clone();
        updated.add_field("year".to_string(), FieldValue::Integer(2001));
        store.add(&updated).unwrap();

        let read = store.get(&doc.id).unwrap().unwrap();
        assert_eq!(read.get_field("year"), Some(&FieldValue::Integer(2001)));

        let query = LogicalNode::is_greater_than("year", 2000).unwrap();
        let results = store.search(&query, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, doc.id);
    }

    #[test]
    fn interrupted_add_is_replayed_on_reopen() {
        let dir = tempdir().unwrap();
        let doc = movie("Sci-Fi", 1999, vec![1.0, 0.0]);
        {
            let store = open_store(dir.path());
            // Crash window: the WAL holds the add, the persister and the
            // indexes were updated, but the commit never happened.
            store.wal.record_add(&doc).unwrap();
            store.apply_add(&doc).unwrap();
        }
        let store = open_store(dir.path());
        assert_eq!(store.get(&doc.id).unwrap(), Some(doc.clone()));

        let query = LogicalNode::is_equal("genre", "Sci-Fi").unwrap();
        let results = store.search(&query, 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn interrupted_add_before_persist_is_replayed_too() {
        let dir = tempdir().unwrap();
        let doc = movie("Horror", 1950, vec![0.0, 1.0]);
        {
            let store = open_store(dir.path());
            // Crash window: only the WAL record made it.
            store.wal.record_add(&doc).unwrap();
        }
        let store = open_store(dir.path());
        assert_eq!(store.get(&doc.id).unwrap(), Some(doc));
    }

    #[test]
    fn metrics_are_emitted() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(AtomicMetricsSink::new());
        let store = AxonStore::open_with_metrics(config(dir.path()), sink.clone()).unwrap();
        store.initialize().unwrap();

        store.add(&movie("Sci-Fi", 1999, vec![1.0, 0.0])).unwrap();
        store
            .search(&LogicalNode::is_equal("genre", "Sci-Fi").unwrap(), 5)
            .unwrap();

        assert_eq!(sink.counter(names::DOCUMENT_INSERT_COUNT), 1);
        assert_eq!(sink.counter(names::SEARCH_COUNT), 1);
        assert!(sink.timer_total(names::DOCUMENT_INSERT_LATENCY) > 0);
        assert_eq!(sink.gauge(names::DOCUMENT_COUNT), Some(1.0));
        assert_eq!(sink.gauge(names::DOCUMENT_INSERT_QUEUE), Some(0.0));

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.vector_indexes, 1);
        assert_eq!(stats.string_indexes, 1);
        assert_eq!(stats.pending_inserts, 0);
    }

    #[test]
    fn concurrent_adds_then_search() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let threads = 10;
        let per_thread = 50;

        let all_ids: Vec<DocumentId> = crossbeam::thread::scope(|scope| {
            let mut handles = Vec::new();
            for t in 0..threads {
                let store = &store;
                handles.push(scope.spawn(move |_| {
                    let mut ids = Vec::new();
                    for i in 0..per_thread {
                        let angle = (t * per_thread + i) as f32 * 0.01;
                        let doc = movie(
                            if i % 2 == 0 { "Sci-Fi" } else { "Horror" },
                            1980 + (i as i32 % 40),
                            vec![angle.cos(), angle.sin()],
                        );
                        let id = doc.id;
                        store.add(&doc).unwrap();
                        ids.push(id);
                    }
                    ids
                }));
            }
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        })
        .unwrap();

        let unique: HashSet<DocumentId> = all_ids.iter().copied().collect();
        assert_eq!(unique.len(), threads * per_thread);
        for id in &all_ids {
            assert!(store.get(id).unwrap().is_some());
        }

        let query = LogicalNode::is_similar_to("embedding", vec![1.0, 0.0]).unwrap();
        let results = store.search(&query, 10).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn query_split_agrees_with_direct_evaluation() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let docs = vec![
            movie("Sci-Fi", 1999, vec![1.0, 0.0]),
            movie("Sci-Fi", 1985, vec![0.9, 0.1]),
            movie("Horror", 1999, vec![0.95, 0.1]),
            movie("Comedy", 2005, vec![0.1, 0.9]),
        ];
        for doc in &docs {
            store.add(doc).unwrap();
        }

        let queries = vec![
            LogicalNode::is_equal("genre", "Sci-Fi").unwrap(),
            LogicalNode::is_greater_than("year", 1990).unwrap(),
            LogicalNode::and(
                LogicalNode::is_equal("genre", "Sci-Fi").unwrap(),
                LogicalNode::is_greater_than("year", 1990).unwrap(),
            ),
            LogicalNode::or(
                LogicalNode::is_equal("genre", "Comedy").unwrap(),
                LogicalNode::is_less_than("year", 1990).unwrap(),
            ),
            LogicalNode::not(LogicalNode::is_equal("genre", "Horror").unwrap()),
            LogicalNode::and(
                LogicalNode::not(LogicalNode::is_equal("genre", "Comedy").unwrap()),
                LogicalNode::or(
                    LogicalNode::is_greater_than("year", 1995).unwrap(),
                    LogicalNode::is_equal("genre", "Sci-Fi").unwrap(),
                ),
            ),
        ];

        for query in &queries {
            let results = store.search(query, 100).unwrap();
            let found: HashSet<DocumentId> = results.iter().map(|r| r.document.id).collect();
            for doc in &docs {
                assert_eq!(
                    found.contains(&doc.id),
                    query.evaluate(doc),
                    "split execution disagrees with direct evaluation"
                );
            }
        }
    }
}
