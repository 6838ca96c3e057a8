use crate::core::error::Result;
use crate::index::handlers::IndexRegistry;
use crate::query::ast::LogicalNode;
use crate::query::compiler::QueryCompiler;
use crate::query::context::ExecutionContext;
use crate::query::splitter::QuerySplitter;
use crate::search::results::ResultDocument;
use crate::search::runner::VectorizedRunner;
use crate::storage::persister::DocumentPersister;

/// Stateless query pipeline: split the logical tree, lower both halves,
/// resolve the candidate bitmap through the indexes, then let the runner
/// apply the residual and rank.
pub struct QueryExecutor {
    runner: VectorizedRunner,
}

impl QueryExecutor {
    pub fn new() -> Self {
        QueryExecutor {
            runner: VectorizedRunner::new(),
        }
    }

    pub fn execute(
        &self,
        registry: &IndexRegistry,
        persister: &DocumentPersister,
        query: &LogicalNode,
        max_results: usize,
    ) -> Result<Vec<ResultDocument>> {
        let split = QuerySplitter::new(registry).split(query);
        let compiler = QueryCompiler::new(registry);
        let index_plan = compiler.compile_index(&split.index_tree)?;
        let residual = compiler.compile_residual(&split.residual_tree)?;

        let mut ctx = ExecutionContext::new();
        let candidates = index_plan.evaluate(persister, &mut ctx, max_results)?;
        self.runner
            .run(&candidates, &residual, persister, &mut ctx, max_results)
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
