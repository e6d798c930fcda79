//! Filters shipped with the crate.

use super::{ActionContext, Filter};
use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

/// Outermost filter that logs every failed invocation.
///
/// Runs last in the post-phase, so it sees the final outcome after every
/// other filter had a chance to translate it. The error itself is left in
/// place; the dispatcher turns it into an error reply.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLogFilter;

#[async_trait]
impl Filter for ErrorLogFilter {
    fn order(&self) -> i32 {
        i32::MIN
    }

    async fn on_executed(&self, ctx: &mut ActionContext) -> Result<()> {
        if let Some(Err(e)) = ctx.result() {
            warn!(
                "Action {} failed on session {}: {}",
                ctx.call().action().name(),
                ctx.call().session().id(),
                e
            );
        }
        Ok(())
    }
}
