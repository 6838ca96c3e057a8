/// Similarity kernels used by the HNSW index and the residual matcher.
/// Written to auto-vectorize: manual unrolling, no bounds checks in the
/// hot loops beyond the initial length assertions.
pub struct SimdOps;

pub const NORM_FLOOR: f32 = 1e-8;

impl SimdOps {
    /// Dot product over two in-memory arrays.
    pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "arrays must have same length");

        let len = a.len();
        let mut sum = 0.0;
        let mut i = 0;

        // Process 4 elements at a time (helps compiler auto-vectorize)
        while i + 4 <= len {
            sum += a[i] * b[i];
            sum += a[i + 1] * b[i + 1];
            sum += a[i + 2] * b[i + 2];
            sum += a[i + 3] * b[i + 3];
            i += 4;
        }

        while i < len {
            sum += a[i] * b[i];
            i += 1;
        }

        sum
    }

    pub fn norm(a: &[f32]) -> f32 {
        Self::dot_product(a, a).sqrt()
    }

    pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let denom = (Self::norm(a) * Self::norm(b)).max(NORM_FLOOR);
        Self::dot_product(a, b) / denom
    }

    /// Decode one f32 from little-endian mapped bytes. Unaligned reads are
    /// fine here; the pages only guarantee 8-byte alignment of slots.
    #[inline]
    fn f32_at(raw: &[u8], idx: usize) -> f32 {
        let p = idx * 4;
        f32::from_le_bytes([raw[p], raw[p + 1], raw[p + 2], raw[p + 3]])
    }

    /// Dot product of a mapped little-endian vector against a query array,
    /// without materializing the stored vector.
    pub fn dot_product_raw(raw: &[u8], q: &[f32]) -> f32 {
        assert_eq!(raw.len(), q.len() * 4, "raw length must be 4x query length");

        let mut sum = 0.0;
        for (i, qv) in q.iter().enumerate() {
            sum += Self::f32_at(raw, i) * qv;
        }
        sum
    }

    pub fn norm_raw(raw: &[u8]) -> f32 {
        let mut sum = 0.0;
        for i in 0..raw.len() / 4 {
            let v = Self::f32_at(raw, i);
            sum += v * v;
        }
        sum.sqrt()
    }

    pub fn cosine_raw(raw: &[u8], q: &[f32]) -> f32 {
        let denom = (Self::norm_raw(raw) * Self::norm(q)).max(NORM_FLOOR);
        Self::dot_product_raw(raw, q) / denom
    }

    /// Dot product of two mapped vectors (stored-stored similarity).
    pub fn dot_product_raw_pair(a: &[u8], b: &[u8]) -> f32 {
        assert_eq!(a.len(), b.len(), "raw vectors must have same length");

        let mut sum = 0.0;
        for i in 0..a.len() / 4 {
            sum += Self::f32_at(a, i) * Self::f32_at(b, i);
        }
        sum
    }

    pub fn cosine_raw_pair(a: &[u8], b: &[u8]) -> f32 {
        let denom = (Self::norm_raw(a) * Self::norm_raw(b)).max(NORM_FLOOR);
        Self::dot_product_raw_pair(a, b) / denom
    }
}

/// Similarity metric over vectors. Higher scores mean more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Metric {
    Cosine,
    DotProduct,
}

impl Metric {
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => SimdOps::cosine(a, b),
            Metric::DotProduct => SimdOps::dot_product(a, b),
        }
    }

    pub fn score_raw(&self, raw: &[u8], q: &[f32]) -> f32 {
        match self {
            Metric::Cosine => SimdOps::cosine_raw(raw, q),
            Metric::DotProduct => SimdOps::dot_product_raw(raw, q),
        }
    }

    pub fn score_raw_pair(&self, a: &[u8], b: &[u8]) -> f32 {
        match self {
            Metric::Cosine => SimdOps::cosine_raw_pair(a, b),
            Metric::DotProduct => SimdOps::dot_product_raw_pair(a, b),
        }
    }
}
