use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::index::paged_graph::PagedGraphIndex;
use crate::index::paged_vectors::PagedVectorIndex;
use crate::simd::operation::Metric;
use crate::storage::kv_store::KVStore;

/// Tuning knobs for one HNSW index; immutable once the index exists.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    pub metric: Metric,
    pub dimensions: usize,
    pub block_size: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub m: usize,
    pub m_max: usize,
    pub m_max0: usize,
    pub ml: f64,
}

impl HnswConfig {
    pub fn new(dimensions: usize) -> Self {
        let m = 16;
        HnswConfig {
            metric: Metric::Cosine,
            dimensions,
            block_size: 1024,
            ef_construction: 200,
            ef_search: 200,
            m,
            m_max: m,
            m_max0: 2 * m,
            ml: 1.0 / (m as f64).ln(),
        }
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self.m_max = m;
        self.m_max0 = 2 * m;
        self.ml = 1.0 / (m as f64).ln();
        self
    }
}

/// A vector id with its similarity to some query; orders by similarity so
/// it can live in both heaps of the layer search.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    id: u64,
    similarity: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.similarity
            .partial_cmp(&other.similarity)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

const META_ENTER_POINT: &str = "enter_point";
const META_MAX_LAYER: &str = "max_layer";
const META_VECTOR_COUNT: &str = "vector_count";
const META_BUCKETS: u32 = 32;

/// Hierarchical Navigable Small World graph over a paged vector store.
///
/// Insertion must be externally serialized (the index handler wraps the
/// whole index in a `RwLock`); searches only read and may run concurrently
/// with each other.
pub struct HnswIndex {
    config: HnswConfig,
    root: PathBuf,
    vectors: PagedVectorIndex,
    graphs: RwLock<Vec<Arc<PagedGraphIndex>>>,
    meta: KVStore,
    enter_point: AtomicI64,
    max_layer: AtomicI64,
    rng: Mutex<StdRng>,
}

impl HnswIndex {
    pub fn open(root: impl Into<PathBuf>, config: HnswConfig) -> Result<Self> {
        let root = root.into();
        let meta = KVStore::open_with_buckets(root.join("metadata"), META_BUCKETS)?;

        let enter_point = read_meta_i64(&meta, META_ENTER_POINT)?.unwrap_or(-1);
        let max_layer = read_meta_i64(&meta, META_MAX_LAYER)?.unwrap_or(-1);
        let count = read_meta_i64(&meta, META_VECTOR_COUNT)?.unwrap_or(0).max(0) as u64;

        let vectors = PagedVectorIndex::open(
            root.join("vectors"),
            config.dimensions,
            config.block_size,
            count,
        )?;

        let mut graphs = Vec::new();
        for layer in 0..=max_layer {
            graphs.push(Arc::new(Self::open_layer(&root, &config, layer as usize)?));
        }

        Ok(HnswIndex {
            config,
            root,
            vectors,
            graphs: RwLock::new(graphs),
            meta,
            enter_point: AtomicI64::new(enter_point),
            max_layer: AtomicI64::new(max_layer),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    fn open_layer(root: &PathBuf, config: &HnswConfig, layer: usize) -> Result<PagedGraphIndex> {
        let bound = if layer == 0 { config.m_max0 } else { config.m_max };
        PagedGraphIndex::open(
            root.join(format!("graph_layer_{}", layer)),
            bound,
            config.block_size,
        )
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn len(&self) -> u64 {
        self.vectors.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn graph(&self, layer: usize) -> Result<Arc<PagedGraphIndex>> {
        self.graphs
            .read()
            .get(layer)
            .cloned()
            .ok_or_else(|| Error::corruption(format!("graph layer {} does not exist", layer)))
    }

    fn ensure_layers(&self, top: i64) -> Result<()> {
        let mut graphs = self.graphs.write();
        while (graphs.len() as i64) <= top {
            let layer = graphs.len();
            graphs.push(Arc::new(Self::open_layer(&self.root, &self.config, layer)?));
        }
        Ok(())
    }

    /// `round(-ln(U(0,1)) * mL)`.
    fn random_level(&self) -> i64 {
        let u: f64 = self.rng.lock().r#gen::<f64>();
        let u = (1.0 - u).max(f64::MIN_POSITIVE);
        (-u.ln() * self.config.ml).round() as i64
    }

    fn similarity_to_query(&self, id: u64, query: &[f32]) -> Result<f32> {
        self.vectors.similarity_to_query(id, query, self.config.metric)
    }

    fn similarity_pair(&self, a: u64, b: u64) -> Result<f32> {
        self.vectors.similarity_pair(a, b, self.config.metric)
    }

    /// Move to ever more similar neighbors until no neighbor improves.
    fn greedy_search(&self, query: &[f32], entry: u64, layer: usize) -> Result<u64> {
        let graph = self.graph(layer)?;
        let mut current = entry;
        let mut current_sim = self.similarity_to_query(current, query)?;
        loop {
            let mut best = current;
            let mut best_sim = current_sim;
            for neighbor in graph.connections(current)? {
                if neighbor < 0 {
                    continue;
                }
                let sim = self.similarity_to_query(neighbor as u64, query)?;
                if sim > best_sim {
                    best = neighbor as u64;
                    best_sim = sim;
                }
            }
            if best == current {
                return Ok(current);
            }
            current = best;
            current_sim = best_sim;
        }
    }

    /// Canonical layer search: a visited bitmap, a best-first candidate
    /// heap, and a result heap bounded at `ef` that evicts its worst
    /// member. Returns matches sorted by similarity descending.
    fn search_layer(
        &self,
        query: &[f32],
        entry: u64,
        layer: usize,
        ef: usize,
    ) -> Result<Vec<Candidate>> {
        let graph = self.graph(layer)?;
        let mut visited = RoaringTreemap::new();
        visited.insert(entry);

        let seed = Candidate {
            id: entry,
            similarity: self.similarity_to_query(entry, query)?,
        };
        let mut candidates = BinaryHeap::new();
        candidates.push(seed);
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        results.push(Reverse(seed));

        while let Some(candidate) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.similarity).unwrap_or(f32::MIN);
            if results.len() >= ef && candidate.similarity < worst {
                break;
            }
            for neighbor in graph.connections(candidate.id)? {
                if neighbor < 0 {
                    continue;
                }
                let neighbor = neighbor as u64;
                if !visited.insert(neighbor) {
                    continue;
                }
                let similarity = self.similarity_to_query(neighbor, query)?;
                let worst = results.peek().map(|r| r.0.similarity).unwrap_or(f32::MIN);
                if results.len() < ef || similarity > worst {
                    let found = Candidate {
                        id: neighbor,
                        similarity,
                    };
                    candidates.push(found);
                    results.push(Reverse(found));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort_unstable_by(|a, b| b.cmp(a));
        Ok(out)
    }

    /// Diversity heuristic: take candidates best-first, keeping one only if
    /// it is closer to the query than to every neighbor already kept.
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Result<Vec<u64>> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let mut diverse = true;
            for kept in &selected {
                if self.similarity_pair(candidate.id, kept.id)? > candidate.similarity {
                    diverse = false;
                    break;
                }
            }
            if diverse {
                selected.push(*candidate);
            }
        }
        Ok(selected.into_iter().map(|c| c.id).collect())
    }

    /// Add `to` to `from`'s neighbor list, shrinking with the diversity
    /// heuristic when the layer bound would be exceeded.
    fn connect(&self, layer: usize, from: u64, to: u64) -> Result<()> {
        let graph = self.graph(layer)?;
        let connections = graph.connections(from)?;
        if connections.contains(&(to as i64)) {
            return Ok(());
        }
        if connections.len() < graph.max_connections() {
            return graph.add_connection(from, to as i64);
        }

        let mut candidates = Vec::with_capacity(connections.len() + 1);
        for neighbor in connections {
            if neighbor < 0 {
                continue;
            }
            candidates.push(Candidate {
                id: neighbor as u64,
                similarity: self.similarity_pair(neighbor as u64, from)?,
            });
        }
        candidates.push(Candidate {
            id: to,
            similarity: self.similarity_pair(to, from)?,
        });
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        let survivors = self.select_neighbors(&candidates, self.config.m)?;
        let survivors: Vec<i64> = survivors.into_iter().map(|id| id as i64).collect();
        graph.set_connections(from, &survivors)
    }

    /// Insert a vector and wire it into every layer up to its sampled
    /// level. Single-writer only.
    pub fn insert(&self, vector: &[f32]) -> Result<u64> {
        if vector.len() != self.config.dimensions {
            return Err(Error::invalid_input(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.config.dimensions
            )));
        }
        let new_id = self.vectors.add_vector(vector)?;
        let level = self.random_level();

        let global_top = self.max_layer.load(Ordering::Acquire);
        let entry = self.enter_point.load(Ordering::Acquire);
        if entry < 0 {
            // First vector: it becomes the enter point at its own level.
            self.ensure_layers(level)?;
            self.enter_point.store(new_id as i64, Ordering::SeqCst);
            self.max_layer.store(level, Ordering::SeqCst);
            return Ok(new_id);
        }

        self.ensure_layers(level)?;
        let mut current = entry as u64;
        let mut layer = global_top;
        while layer > level {
            current = self.greedy_search(vector, current, layer as usize)?;
            layer -= 1;
        }

        let mut layer = level.min(global_top);
        loop {
            let found =
                self.search_layer(vector, current, layer as usize, self.config.ef_construction)?;
            let neighbors = self.select_neighbors(&found, self.config.m)?;

            let graph = self.graph(layer as usize)?;
            let as_i64: Vec<i64> = neighbors.iter().map(|id| *id as i64).collect();
            graph.set_connections(new_id, &as_i64)?;
            for &neighbor in &neighbors {
                self.connect(layer as usize, neighbor, new_id)?;
            }
            if let Some(best) = neighbors.first() {
                current = *best;
            }
            if layer == 0 {
                break;
            }
            layer -= 1;
        }

        if level > global_top {
            self.enter_point.store(new_id as i64, Ordering::SeqCst);
            self.max_layer.store(level, Ordering::SeqCst);
        }
        Ok(new_id)
    }

    /// Top-`k` vector ids by similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.config.dimensions {
            return Err(Error::invalid_input(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.config.dimensions
            )));
        }
        let entry = self.enter_point.load(Ordering::Acquire);
        if entry < 0 || self.vectors.count() == 0 {
            return Ok(Vec::new());
        }

        let mut current = entry as u64;
        let top = self.max_layer.load(Ordering::Acquire);
        let mut layer = top;
        while layer > 0 {
            current = self.greedy_search(query, current, layer as usize)?;
            layer -= 1;
        }

        let ef = self.config.ef_search.max(k);
        let mut found = self.search_layer(query, current, 0, ef)?;
        found.truncate(k);
        Ok(found.into_iter().map(|c| (c.id, c.similarity)).collect())
    }

    /// Persist the globals the next open needs.
    pub fn persist_meta(&self) -> Result<()> {
        write_meta_i64(
            &self.meta,
            META_ENTER_POINT,
            self.enter_point.load(Ordering::Acquire),
        )?;
        write_meta_i64(
            &self.meta,
            META_MAX_LAYER,
            self.max_layer.load(Ordering::Acquire),
        )?;
        write_meta_i64(&self.meta, META_VECTOR_COUNT, self.vectors.count() as i64)?;
        self.meta.commit()
    }

    pub fn flush(&self) -> Result<()> {
        self.vectors.flush()?;
        let graphs = self.graphs.read();
        for graph in graphs.iter() {
            graph.flush()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.persist_meta()
    }
}

fn read_meta_i64(meta: &KVStore, key: &str) -> Result<Option<i64>> {
    Ok(meta.get_bytes(key)?.and_then(|b| {
        b.try_into()
            .ok()
            .map(|bytes: [u8; 8]| i64::from_le_bytes(bytes))
    }))
}

fn write_meta_i64(meta: &KVStore, key: &str, value: i64) -> Result<()> {
    meta.put_bytes(key, &value.to_le_bytes(), false)?;
    Ok(())
}
