//! In-memory vector index for one knowledge base.
//!
//! Chunks are appended during ingestion and the index is immutable once
//! published into the registry, so concurrent readers share it via `Arc`
//! without locking. Similarity is cosine on unit-normalized vectors,
//! reported as `(1 + cos) / 2` so scores live in `[0, 1]` and compare
//! directly against the configured relevance threshold.

use std::ops::Range;

use rayon::prelude::*;

/// One embedded fragment of a source document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Unique within the owning index, assigned in insertion order.
    pub id: u32,
    pub content: String,
    pub embedding: Vec<f32>,
    /// Byte range in the origin document, when known.
    pub source_range: Option<Range<usize>>,
}

#[derive(Debug, Default)]
pub struct VectorIndex {
    dim: usize,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            chunks: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, id: u32) -> Option<&Chunk> {
        self.chunks.get(id as usize)
    }

    /// Append a chunk during ingestion. Ids are sequential insertion indexes.
    pub fn push(
        &mut self,
        content: String,
        embedding: Vec<f32>,
        source_range: Option<Range<usize>>,
    ) {
        debug_assert_eq!(embedding.len(), self.dim);
        let id = self.chunks.len() as u32;
        self.chunks.push(Chunk {
            id,
            content,
            embedding,
            source_range,
        });
    }

    /// Top-k most similar chunks as `(chunk_id, score)` in descending score
    /// order; ties go to the smaller chunk id. `k` is clamped to the chunk
    /// count and an empty index yields an empty result.
    ///
    /// Panics if `query` does not match the index dimension. The facade
    /// always embeds queries through the same pinned-dimension adapter that
    /// built the index, so hitting this means corrupted state.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if self.chunks.is_empty() || k == 0 {
            return vec![];
        }
        assert_eq!(
            query.len(),
            self.dim,
            "query dimension {} does not match index dimension {}",
            query.len(),
            self.dim
        );

        let mut scored: Vec<(u32, f32)> = self
            .chunks
            .par_iter()
            .map(|chunk| (chunk.id, normalized_similarity(&chunk.embedding, query)))
            .collect();

        scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(self.chunks.len()));
        scored
    }
}

/// `(1 + dot) / 2` on unit vectors, clamped against float drift.
fn normalized_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    ((1.0 + dot) / 2.0).clamp(0.0, 1.0)
}
