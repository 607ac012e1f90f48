use crate::inference::InferenceClient;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, debug_span, warn, Instrument};
use webassess_core::{AnalysisConfig, AssessContext, AssessError, ModelDescriptor, Result};

/// Builds the prompts for one kind of document.
///
/// The leaf prompt wraps a raw segment; the merge prompt wraps two partial
/// results joined by a blank line. Both must give the same instructions so that
/// results from every recursion level share one output shape.
pub trait PromptStrategy: Send + Sync {
    fn leaf_prompt(&self, segment: &str) -> String;
    fn merge_prompt(&self, combined: &str) -> String;
}

/// Prompt strategy from a pair of closures.
pub struct FnPromptStrategy<L, M> {
    leaf: L,
    merge: M,
}

impl<L, M> FnPromptStrategy<L, M>
where
    L: Fn(&str) -> String + Send + Sync,
    M: Fn(&str) -> String + Send + Sync,
{
    pub fn new(leaf: L, merge: M) -> Self {
        Self { leaf, merge }
    }
}

impl<L, M> PromptStrategy for FnPromptStrategy<L, M>
where
    L: Fn(&str) -> String + Send + Sync,
    M: Fn(&str) -> String + Send + Sync,
{
    fn leaf_prompt(&self, segment: &str) -> String {
        (self.leaf)(segment)
    }

    fn merge_prompt(&self, combined: &str) -> String {
        (self.merge)(combined)
    }
}

/// Separator between the two partial results handed to the merge prompt.
pub const RESULT_SEPARATOR: &str = "\n\n";

/// Split at the byte midpoint, moved down to a char boundary when needed.
/// The left half gets the floor.
pub fn bisect(segment: &str) -> (&str, &str) {
    let mut mid = segment.len() / 2;
    while mid > 0 && !segment.is_char_boundary(mid) {
        mid -= 1;
    }
    segment.split_at(mid)
}

/// Analyzes text of any size against a model with a fixed context budget.
///
/// A segment that overflows the budget is bisected, both halves are analyzed
/// on their own, and one more invocation synthesizes the two results. Any
/// other failure anywhere in the tree fails the whole analysis.
pub struct RecursiveAnalyzer {
    client: Arc<dyn InferenceClient>,
    permits: Arc<Semaphore>,
    min_split_len: usize,
}

impl RecursiveAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>, config: &AnalysisConfig) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrency.clamp(1, 4))),
            min_split_len: config.min_split_len.max(1),
        }
    }

    pub async fn analyze(
        &self,
        ctx: &AssessContext,
        model: &ModelDescriptor,
        document: &str,
        strategy: &dyn PromptStrategy,
    ) -> Result<String> {
        debug!(
            "Analyzing {} bytes with {} on {} at {}",
            document.len(),
            model.name,
            self.client.provider_name(),
            ctx.endpoint()
        );
        self.analyze_segment(ctx, model, document, strategy, 0).await
    }

    fn analyze_segment<'a>(
        &'a self,
        ctx: &'a AssessContext,
        model: &'a ModelDescriptor,
        segment: &'a str,
        strategy: &'a dyn PromptStrategy,
        depth: usize,
    ) -> BoxFuture<'a, Result<String>> {
        let span = debug_span!("analyze_segment", depth, len = segment.len());

        async move {
            let prompt = strategy.leaf_prompt(segment);
            match self.invoke(ctx, model, &prompt).await {
                Ok(output) => Ok(output),
                Err(AssessError::ContextLengthExceeded) => {
                    if segment.len() <= self.min_split_len {
                        warn!(
                            "Segment of {} bytes still exceeds the context window of {}",
                            segment.len(),
                            model.name
                        );
                        return Err(AssessError::ContextLengthExceeded);
                    }

                    let (left, right) = bisect(segment);
                    if left.is_empty() || right.is_empty() {
                        return Err(AssessError::ContextLengthExceeded);
                    }
                    debug!(
                        "Context length exceeded, splitting into {} + {} bytes",
                        left.len(),
                        right.len()
                    );

                    let (left_result, right_result) = futures::try_join!(
                        self.analyze_segment(ctx, model, left, strategy, depth + 1),
                        self.analyze_segment(ctx, model, right, strategy, depth + 1),
                    )?;

                    let combined = [left_result, right_result].join(RESULT_SEPARATOR);
                    self.invoke(ctx, model, &strategy.merge_prompt(&combined))
                        .await
                }
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .boxed()
    }

    /// One model call. The permit is held only while the call runs, never
    /// across recursion, so nested splits cannot starve each other.
    async fn invoke(
        &self,
        ctx: &AssessContext,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String> {
        ctx.check_cancelled()?;

        let _permit = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(AssessError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| {
                AssessError::InvocationFailed("analyzer is shutting down".to_string())
            })?,
        };

        tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => Err(AssessError::Cancelled),
            output = self.client.generate(ctx.endpoint(), model, prompt) => output,
        }
    }
}
