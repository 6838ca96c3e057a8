use crate::index::handlers::IndexRegistry;
use crate::query::ast::LogicalNode;

/// Outcome of splitting: a document satisfies the original query iff it is
/// in the candidate set of `index_tree` AND `residual_tree` matches it.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitResult {
    pub index_tree: LogicalNode,
    pub residual_tree: LogicalNode,
}

/// Splits a logical tree into the part the indexes can resolve and the
/// residual applied during the scan. AND is the only operator that is taken
/// apart; OR and NOT move to one side whole.
pub struct QuerySplitter<'a> {
    registry: &'a IndexRegistry,
}

impl<'a> QuerySplitter<'a> {
    pub fn new(registry: &'a IndexRegistry) -> Self {
        QuerySplitter { registry }
    }

    pub fn split(&self, node: &LogicalNode) -> SplitResult {
        match node {
            LogicalNode::Leaf(leaf) => {
                if self.registry.handler_for(leaf).is_some() {
                    SplitResult {
                        index_tree: node.clone(),
                        residual_tree: LogicalNode::MatchAll,
                    }
                } else {
                    SplitResult {
                        index_tree: LogicalNode::MatchAll,
                        residual_tree: node.clone(),
                    }
                }
            }
            LogicalNode::And(left, right) => {
                let l = self.split(left);
                let r = self.split(right);
                SplitResult {
                    index_tree: fold_and(l.index_tree, r.index_tree),
                    residual_tree: fold_and(l.residual_tree, r.residual_tree),
                }
            }
            LogicalNode::Or(_, _) | LogicalNode::Not(_) => {
                if self.fully_indexable(node) {
                    SplitResult {
                        index_tree: node.clone(),
                        residual_tree: LogicalNode::MatchAll,
                    }
                } else {
                    SplitResult {
                        index_tree: LogicalNode::MatchAll,
                        residual_tree: node.clone(),
                    }
                }
            }
            LogicalNode::MatchAll => SplitResult {
                index_tree: LogicalNode::MatchAll,
                residual_tree: LogicalNode::MatchAll,
            },
            LogicalNode::MatchNone => SplitResult {
                index_tree: LogicalNode::MatchNone,
                residual_tree: LogicalNode::MatchAll,
            },
        }
    }

    fn fully_indexable(&self, node: &LogicalNode) -> bool {
        match node {
            LogicalNode::Leaf(leaf) => self.registry.handler_for(leaf).is_some(),
            LogicalNode::And(left, right) | LogicalNode::Or(left, right) => {
                self.fully_indexable(left) && self.fully_indexable(right)
            }
            LogicalNode::Not(child) => self.fully_indexable(child),
            LogicalNode::MatchAll | LogicalNode::MatchNone => true,
        }
    }
}

/// AND with MatchAll folded away.
fn fold_and(left: LogicalNode, right: LogicalNode) -> LogicalNode {
    match (left, right) {
        (LogicalNode::MatchAll, right) => right,
        (left, LogicalNode::MatchAll) => left,
        (left, right) => LogicalNode::and(left, right),
    }
}
