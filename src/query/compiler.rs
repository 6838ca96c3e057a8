use std::sync::Arc;
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, InternalId};
use crate::index::handlers::{IndexHandler, IndexRegistry};
use crate::query::ast::{LeafNode, LogicalNode, Operation};
use crate::query::context::ExecutionContext;
use crate::simd::operation::Metric;
use crate::storage::persister::DocumentPersister;

/// Physical plan for the index-resolvable tree: set algebra over candidate
/// internal-id bitmaps.
pub enum BitmapOperator {
    Intersection(Box<BitmapOperator>, Box<BitmapOperator>),
    Union(Box<BitmapOperator>, Box<BitmapOperator>),
    Complement(Box<BitmapOperator>),
    IndexLookup {
        handler: Arc<dyn IndexHandler>,
        leaf: LeafNode,
    },
    AllDocuments,
    NoDocuments,
}

impl BitmapOperator {
    pub fn evaluate(
        &self,
        persister: &DocumentPersister,
        ctx: &mut ExecutionContext,
        max_results: usize,
    ) -> Result<RoaringTreemap> {
        match self {
            BitmapOperator::Intersection(left, right) => {
                let l = left.evaluate(persister, ctx, max_results)?;
                let r = right.evaluate(persister, ctx, max_results)?;
                Ok(l & r)
            }
            BitmapOperator::Union(left, right) => {
                let l = left.evaluate(persister, ctx, max_results)?;
                let r = right.evaluate(persister, ctx, max_results)?;
                Ok(l | r)
            }
            BitmapOperator::Complement(inner) => {
                let all = all_documents(persister)?;
                let inner = inner.evaluate(persister, ctx, max_results)?;
                Ok(all - inner)
            }
            BitmapOperator::IndexLookup { handler, leaf } => {
                let mut ids = RoaringTreemap::new();
                for m in handler.search(leaf, max_results)? {
                    ids.insert(m.internal_id);
                    ctx.record_score(m.internal_id, m.score);
                }
                Ok(ids)
            }
            BitmapOperator::AllDocuments => all_documents(persister),
            BitmapOperator::NoDocuments => Ok(RoaringTreemap::new()),
        }
    }
}

fn all_documents(persister: &DocumentPersister) -> Result<RoaringTreemap> {
    let mut ids = RoaringTreemap::new();
    for id in persister.internal_ids()? {
        ids.insert(id);
    }
    Ok(ids)
}

/// Outcome of one residual evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matches: bool,
    pub score: f32,
}

impl MatchResult {
    fn miss() -> Self {
        MatchResult {
            matches: false,
            score: 0.0,
        }
    }

    fn hit(score: f32) -> Self {
        MatchResult {
            matches: true,
            score,
        }
    }
}

/// Physical plan for the residual tree: lazy per-document predicate that
/// reads only the fields it needs through the persister.
pub enum DocumentMatcher {
    And(Box<DocumentMatcher>, Box<DocumentMatcher>),
    Or(Box<DocumentMatcher>, Box<DocumentMatcher>),
    Not(Box<DocumentMatcher>),
    Leaf(LeafNode),
    MatchAll,
    MatchNone,
}

impl DocumentMatcher {
    pub fn matches(
        &self,
        internal_id: InternalId,
        persister: &DocumentPersister,
    ) -> Result<MatchResult> {
        match self {
            DocumentMatcher::And(left, right) => {
                let l = left.matches(internal_id, persister)?;
                if !l.matches {
                    return Ok(MatchResult::miss());
                }
                let r = right.matches(internal_id, persister)?;
                if !r.matches {
                    return Ok(MatchResult::miss());
                }
                Ok(MatchResult::hit((l.score + r.score) / 2.0))
            }
            DocumentMatcher::Or(left, right) => {
                let l = left.matches(internal_id, persister)?;
                let r = right.matches(internal_id, persister)?;
                match (l.matches, r.matches) {
                    (true, true) => Ok(MatchResult::hit(l.score.max(r.score))),
                    (true, false) => Ok(l),
                    (false, true) => Ok(r),
                    (false, false) => Ok(MatchResult::miss()),
                }
            }
            DocumentMatcher::Not(inner) => {
                let result = inner.matches(internal_id, persister)?;
                if result.matches {
                    Ok(MatchResult::miss())
                } else {
                    Ok(MatchResult::hit(1.0))
                }
            }
            DocumentMatcher::Leaf(leaf) => {
                let Some(value) = persister.read_field(internal_id, &leaf.field)? else {
                    return Ok(MatchResult::miss());
                };
                if leaf.operation == Operation::VectorSimilar {
                    let (FieldValue::Vector(stored), FieldValue::Vector(query)) =
                        (&value, &leaf.value)
                    else {
                        return Ok(MatchResult::miss());
                    };
                    if stored.len() != query.len() {
                        return Err(Error::invalid_input(format!(
                            "field '{}' has {} dimensions, query has {}",
                            leaf.field,
                            stored.len(),
                            query.len()
                        )));
                    }
                    return Ok(MatchResult::hit(Metric::Cosine.score(stored, query)));
                }
                if leaf.matches_value(&value) {
                    Ok(MatchResult::hit(1.0))
                } else {
                    Ok(MatchResult::miss())
                }
            }
            DocumentMatcher::MatchAll => Ok(MatchResult::hit(1.0)),
            DocumentMatcher::MatchNone => Ok(MatchResult::miss()),
        }
    }
}

/// Lowers split logical trees to the physical operators.
pub struct QueryCompiler<'a> {
    registry: &'a IndexRegistry,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(registry: &'a IndexRegistry) -> Self {
        QueryCompiler { registry }
    }

    pub fn compile_index(&self, node: &LogicalNode) -> Result<BitmapOperator> {
        match node {
            LogicalNode::And(left, right) => Ok(BitmapOperator::Intersection(
                Box::new(self.compile_index(left)?),
                Box::new(self.compile_index(right)?),
            )),
            LogicalNode::Or(left, right) => Ok(BitmapOperator::Union(
                Box::new(self.compile_index(left)?),
                Box::new(self.compile_index(right)?),
            )),
            LogicalNode::Not(child) => Ok(BitmapOperator::Complement(Box::new(
                self.compile_index(child)?,
            ))),
            LogicalNode::Leaf(leaf) => {
                let handler = self.registry.handler_for(leaf).ok_or_else(|| {
                    Error::invalid_input(format!(
                        "no index can resolve field '{}' with {:?}",
                        leaf.field, leaf.operation
                    ))
                })?;
                Ok(BitmapOperator::IndexLookup {
                    handler,
                    leaf: leaf.clone(),
                })
            }
            LogicalNode::MatchAll => Ok(BitmapOperator::AllDocuments),
            LogicalNode::MatchNone => Ok(BitmapOperator::NoDocuments),
        }
    }

    pub fn compile_residual(&self, node: &LogicalNode) -> Result<DocumentMatcher> {
        match node {
            LogicalNode::And(left, right) => Ok(DocumentMatcher::And(
                Box::new(self.compile_residual(left)?),
                Box::new(self.compile_residual(right)?),
            )),
            LogicalNode::Or(left, right) => Ok(DocumentMatcher::Or(
                Box::new(self.compile_residual(left)?),
                Box::new(self.compile_residual(right)?),
            )),
            LogicalNode::Not(child) => Ok(DocumentMatcher::Not(Box::new(
                self.compile_residual(child)?,
            ))),
            LogicalNode::Leaf(leaf) => Ok(DocumentMatcher::Leaf(leaf.clone())),
            LogicalNode::MatchAll => Ok(DocumentMatcher::MatchAll),
            LogicalNode::MatchNone => Ok(DocumentMatcher::MatchNone),
        }
    }
}
