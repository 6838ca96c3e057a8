use std::cmp::Reverse;
use std::collections::BinaryHeap;
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::InternalId;
use crate::query::compiler::DocumentMatcher;
use crate::query::context::ExecutionContext;
use crate::search::results::{ResultDocument, ScoredId};
use crate::storage::persister::DocumentPersister;

/// Candidates are walked in chunks this size so the per-batch working set
/// stays cache-resident.
pub const BATCH_SIZE: usize = 1024;

/// Evaluates the residual matcher over the candidate set in batches,
/// maintains a bounded min-heap keyed by each document's running average
/// score, and materializes the survivors.
pub struct VectorizedRunner {
    batch_size: usize,
}

impl Default for VectorizedRunner {
    fn default() -> Self {
        VectorizedRunner {
            batch_size: BATCH_SIZE,
        }
    }
}

impl VectorizedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(
        &self,
        candidates: &RoaringTreemap,
        matcher: &DocumentMatcher,
        persister: &DocumentPersister,
        ctx: &mut ExecutionContext,
        max_results: usize,
    ) -> Result<Vec<ResultDocument>> {
        if max_results == 0 {
            return Err(Error::invalid_input("max_results must be positive"));
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut top: BinaryHeap<Reverse<ScoredId>> = BinaryHeap::with_capacity(max_results + 1);
        let mut batch: Vec<InternalId> = Vec::with_capacity(self.batch_size);
        let mut iter = candidates.iter();
        loop {
            batch.clear();
            batch.extend(iter.by_ref().take(self.batch_size));
            if batch.is_empty() {
                break;
            }
            for &id in &batch {
                // A graph hit can outlive its document (vectors are never
                // unlinked); the presence check filters those.
                if !persister.is_live(id)? {
                    continue;
                }
                let result = matcher.matches(id, persister)?;
                if !result.matches {
                    continue;
                }
                ctx.record_score(id, result.score);
                top.push(Reverse(ScoredId {
                    internal_id: id,
                    score: ctx.average_score(id),
                }));
                if top.len() > max_results {
                    top.pop();
                }
            }
        }

        let mut ranked: Vec<ScoredId> = top.into_iter().map(|r| r.0).collect();
        ranked.sort_unstable_by(|a, b| b.cmp(a));

        let mut results = Vec::with_capacity(ranked.len());
        for scored in ranked {
            let document = persister.read_by_internal_id(scored.internal_id)?;
            results.push(ResultDocument {
                document,
                score: ctx.average_score(scored.internal_id),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Document, DocumentId, FieldValue};
    use crate::index::handlers::IndexRegistry;
    use crate::query::ast::LogicalNode;
    use crate::query::compiler::QueryCompiler;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path, count: i32) -> (DocumentPersister, RoaringTreemap) {
        let persister = DocumentPersister::open(dir, 8, 1).unwrap();
        let mut ids = RoaringTreemap::new();
        for year in 0..count {
            let doc = Document::new(DocumentId::new())
                .with_field("year", FieldValue::Integer(1990 + year));
            ids.insert(persister.write(&doc).unwrap().internal_id.unwrap());
        }
        (persister, ids)
    }

    #[test]
    fn empty_candidates_give_empty_results() {
        let dir = tempdir().unwrap();
        let (persister, _) = setup(dir.path(), 1);
        let registry = IndexRegistry::new();
        let matcher = QueryCompiler::new(&registry)
            .compile_residual(&LogicalNode::MatchAll)
            .unwrap();
        let mut ctx = ExecutionContext::new();
        let results = VectorizedRunner::new()
            .run(&RoaringTreemap::new(), &matcher, &persister, &mut ctx, 5)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn zero_max_results_rejected() {
        let dir = tempdir().unwrap();
        let (persister, ids) = setup(dir.path(), 1);
        let registry = IndexRegistry::new();
        let matcher = QueryCompiler::new(&registry)
            .compile_residual(&LogicalNode::MatchAll)
            .unwrap();
        let mut ctx = ExecutionContext::new();
        assert!(
            VectorizedRunner::new()
                .run(&ids, &matcher, &persister, &mut ctx, 0)
                .is_err()
        );
    }

    #[test]
    fn residual_filter_and_top_k() {
        let dir = tempdir().unwrap();
        let (persister, ids) = setup(dir.path(), 10);
        let registry = IndexRegistry::new();
        let matcher = QueryCompiler::new(&registry)
            .compile_residual(&LogicalNode::is_greater_than("year", 1994).unwrap())
            .unwrap();
        let mut ctx = ExecutionContext::new();
        let results = VectorizedRunner::new()
            .run(&ids, &matcher, &persister, &mut ctx, 3)
            .unwrap();
        assert_eq!(results.len(), 3);
        for r in &results {
            let year = r.document.get_field("year").unwrap().as_integer().unwrap();
            assert!(year > 1994);
        }
    }

    #[test]
    fn removed_documents_are_filtered_by_presence_check() {
        let dir = tempdir().unwrap();
        let (persister, ids) = setup(dir.path(), 3);
        // Remove the middle document but keep its id in the candidate set,
        // as a stale vector hit would.
        let victim = ids.iter().nth(1).unwrap();
        let key = persister.read_by_internal_id(victim).unwrap().id;
        persister.remove(&key).unwrap();

        let registry = IndexRegistry::new();
        let matcher = QueryCompiler::new(&registry)
            .compile_residual(&LogicalNode::MatchAll)
            .unwrap();
        let mut ctx = ExecutionContext::new();
        let results = VectorizedRunner::new()
            .run(&ids, &matcher, &persister, &mut ctx, 10)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.document.id != key));
    }
}
