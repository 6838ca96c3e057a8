pub mod core;
pub mod storage;
pub mod simd;
pub mod index;
pub mod query;
pub mod search;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                         AXON CORE ARCHITECTURE                           │
└──────────────────────────────────────────────────────────────────────────┘

  ┌──────────────────────────── AxonStore ────────────────────────────┐
  │  write:  WAL record ─► DocumentPersister ─► IndexHandlers ─► WAL  │
  │          (uncommitted)  (fields in parallel)                commit│
  │  read:   QueryExecutor ─► QuerySplitter ─► QueryCompiler          │
  │          ─► BitmapOperator (candidate ids) ─► VectorizedRunner    │
  └───────────────────────────────────────────────────────────────────┘

  storage:  PagedFile ─► DataLog ─► KVStore ─► FieldStore/Persister
                      └► HashIndex ┘         └► WriteAheadLog
  index:    PagedVectorIndex + PagedGraphIndex ─► HnswIndex
            KVStore ─► InvertedIndex
            PagedLongArray = documentIdMap (vector id → internal id)
  query:    LogicalNode ─► SplitResult ─► BitmapOperator + DocumentMatcher
  search:   VectorizedRunner (batch residual eval, running-average top-K)
*/

pub use crate::core::config::{StoreConfig, VectorIndexConfig};
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::store::{AxonStore, StoreStats};
pub use crate::core::types::{Document, DocumentId, FieldValue};
pub use crate::query::ast::{LogicalNode, Operation};
pub use crate::search::results::ResultDocument;
