//! Pipeline assembly and onion-style execution.

use super::{ActionContext, Filter, FilterFlow};
use crate::action::Action;
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;

/// The ordered filters wrapping one action.
///
/// Built once when the action is registered and cloned cheaply per call.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Arc<[Arc<dyn Filter>]>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|x| (x.identity(), x.order())))
            .finish()
    }
}

impl FilterPipeline {
    /// Merge method, class and global filters into one ordered pipeline.
    ///
    /// An outer-level filter is dropped when a filter with the same identity
    /// was already collected from an inner level, unless it allows
    /// multiplicity. The result is stable-sorted by ascending order, so equal
    /// orders keep method, class, global precedence.
    pub fn build(
        method: &[Arc<dyn Filter>],
        class: &[Arc<dyn Filter>],
        global: &[Arc<dyn Filter>],
    ) -> Self {
        let mut merged: Vec<Arc<dyn Filter>> = method.to_vec();

        for outer in [class, global] {
            let survivors: Vec<Arc<dyn Filter>> = outer
                .iter()
                .filter(|candidate| {
                    candidate.allow_multiple()
                        || !merged
                            .iter()
                            .any(|inner| inner.identity() == candidate.identity())
                })
                .cloned()
                .collect();
            merged.extend(survivors);
        }

        merged.sort_by_key(|f| f.order());
        Self {
            filters: merged.into(),
        }
    }

    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the pre-phase, the action, then the post-phase in reverse order.
    ///
    /// A short-circuit or a failing pre-phase skips the action and the
    /// remaining pre-phases. The post-phase runs only for filters whose
    /// pre-phase completed.
    pub async fn execute(&self, action: &Action, ctx: &mut ActionContext) -> Result<Value> {
        let mut entered = 0;

        for filter in self.filters.iter() {
            match filter.on_executing(ctx).await {
                Ok(FilterFlow::Continue) => entered += 1,
                Ok(FilterFlow::ShortCircuit(substitute)) => {
                    ctx.set_result(Ok(substitute));
                    break;
                }
                Err(e) => {
                    ctx.set_result(Err(e));
                    break;
                }
            }
        }

        if ctx.result().is_none() {
            let result = action.invoke(ctx.call().clone(), ctx.args().to_vec()).await;
            ctx.set_result(result);
        }

        for filter in self.filters[..entered].iter().rev() {
            if let Err(e) = filter.on_executed(ctx).await {
                ctx.set_result(Err(e));
            }
        }

        ctx.take_result().unwrap_or(Ok(Value::Null))
    }
}
