//! Cross-cutting hooks around action invocation.
//!
//! Filters are attached at three levels: directly to an action (method
//! level), to the service unit that declares it (class level), or to the
//! whole registry (global). [`FilterPipeline::build`] merges them once per
//! action at registration time.

mod builtin;
mod pipeline;

pub use builtin::ErrorLogFilter;
pub use pipeline::FilterPipeline;

use crate::action::CallContext;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// What a filter's pre-phase decided.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterFlow {
    /// Run the next filter, then the action.
    Continue,
    /// Skip the rest of the pre-phase and the action; reply with this value.
    ShortCircuit(Value),
}

/// Per-invocation state visible to filters.
pub struct ActionContext {
    call: CallContext,
    args: Vec<Value>,
    result: Option<Result<Value>>,
}

impl ActionContext {
    pub fn new(call: CallContext, args: Vec<Value>) -> Self {
        Self {
            call,
            args,
            result: None,
        }
    }

    pub fn call(&self) -> &CallContext {
        &self.call
    }

    /// Bound arguments, already converted to the parameter types.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Filters may rewrite arguments before the action runs.
    pub fn args_mut(&mut self) -> &mut Vec<Value> {
        &mut self.args
    }

    /// The outcome so far. `None` during the pre-phase.
    pub fn result(&self) -> Option<&Result<Value>> {
        self.result.as_ref()
    }

    /// Replace the outcome. Used by post-phase hooks that translate errors.
    pub fn set_result(&mut self, result: Result<Value>) {
        self.result = Some(result);
    }

    pub(crate) fn take_result(&mut self) -> Option<Result<Value>> {
        self.result.take()
    }
}

/// An orderable pre/post hook.
///
/// Lower [`order`](Filter::order) runs earlier in the pre-phase and later in
/// the post-phase. Two filters with the same [`identity`](Filter::identity)
/// coexist on one action only when the outer one allows multiplicity.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    fn order(&self) -> i32 {
        0
    }

    /// Identity used for multiplicity checks. Defaults to the type name.
    fn identity(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn allow_multiple(&self) -> bool {
        false
    }

    async fn on_executing(&self, _ctx: &mut ActionContext) -> Result<FilterFlow> {
        Ok(FilterFlow::Continue)
    }

    async fn on_executed(&self, _ctx: &mut ActionContext) -> Result<()> {
        Ok(())
    }
}
