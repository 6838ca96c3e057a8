use std::path::PathBuf;
use crate::index::hnsw::HnswConfig;
use crate::storage::hash_index::DEFAULT_BUCKET_COUNT;

/// One vector-indexed field and its HNSW tuning.
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub field: String,
    pub hnsw: HnswConfig,
}

impl VectorIndexConfig {
    pub fn new(field: impl Into<String>, dimensions: usize) -> Self {
        VectorIndexConfig {
            field: field.into(),
            hnsw: HnswConfig::new(dimensions),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_folder: PathBuf,

    /// Fields answered by an HNSW index.
    pub vector_indexes: Vec<VectorIndexConfig>,
    /// Fields answered by an inverted index.
    pub string_indexes: Vec<String>,

    /// Threads in the per-field write pool.
    pub write_threads: usize,
    /// Hash-index buckets per KVStore.
    pub bucket_count: u32,
}

impl StoreConfig {
    pub fn new(data_folder: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_folder: data_folder.into(),
            ..Default::default()
        }
    }

    pub fn with_vector_index(mut self, config: VectorIndexConfig) -> Self {
        self.vector_indexes.push(config);
        self
    }

    pub fn with_string_index(mut self, field: impl Into<String>) -> Self {
        self.string_indexes.push(field.into());
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_folder: PathBuf::from("./data"),
            vector_indexes: Vec::new(),
            string_indexes: Vec::new(),
            write_threads: num_cpus::get(),
            bucket_count: DEFAULT_BUCKET_COUNT,
        }
    }
}
