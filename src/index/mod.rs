pub mod paged_vectors;
pub mod paged_graph;
pub mod paged_longs;
pub mod hnsw;
pub mod inverted;
pub mod handlers;
