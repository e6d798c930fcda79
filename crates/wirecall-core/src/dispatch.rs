//! Routing of inbound calls to registered actions.

use crate::action::{Action, ActionRegistry, CallContext};
use crate::codec::{InboundCall, ValueCodec};
use crate::error::{Result, WirecallError};
use crate::filter::ActionContext;
use crate::session::Session;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Resolves inbound calls against a registry and runs them through their
/// filter pipelines.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    codec: Arc<dyn ValueCodec>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<ActionRegistry>, codec: Arc<dyn ValueCodec>) -> Self {
        Self { registry, codec }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Convert raw arguments to the action's parameter types.
    ///
    /// Missing trailing arguments are filled with `null` when their
    /// parameter is nullable.
    pub fn bind_args(&self, action: &Action, raw: Vec<Value>) -> Result<Vec<Value>> {
        let params = action.params();
        if raw.len() > params.len() {
            return Err(WirecallError::Arguments {
                action: action.name().to_string(),
                message: format!("expected {} arguments, got {}", params.len(), raw.len()),
            });
        }

        let mut raw = raw.into_iter();
        params
            .iter()
            .enumerate()
            .map(|(index, param)| match raw.next() {
                Some(value) => {
                    self.codec
                        .convert(value, param)
                        .map_err(|e| WirecallError::Arguments {
                            action: action.name().to_string(),
                            message: format!("argument {}: {}", index, e),
                        })
                }
                None if param.is_nullable() => Ok(Value::Null),
                None => Err(WirecallError::Arguments {
                    action: action.name().to_string(),
                    message: format!("missing argument {} ({})", index, param),
                }),
            })
            .collect()
    }

    /// Run one inbound call to completion on behalf of `session`.
    ///
    /// Every failure, from lookup to the action body, comes back as an
    /// error value for the caller to turn into an error reply.
    pub async fn dispatch(&self, session: &Session, call: InboundCall) -> Result<Value> {
        let (action, pipeline) = self.registry.lookup(&call.action)?;
        let args = self.bind_args(&action, call.args)?;

        debug!(
            "Dispatching {} on session {} ({} args)",
            action.name(),
            session.id(),
            args.len()
        );

        let mut ctx = ActionContext::new(CallContext::new(session.clone(), action.clone()), args);
        let value = pipeline.execute(&action, &mut ctx).await?;

        if action.is_void() {
            return Ok(Value::Null);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonValueCodec;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                Action::builder("Echo")
                    .param::<String>()
                    .returns::<String>()
                    .handler(|_ctx, args| async move { args.get::<String>(0) })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Action::builder("Scale")
                    .param::<i64>()
                    .param::<Option<i64>>()
                    .returns::<i64>()
                    .handler(|_ctx, args| async move {
                        let value: i64 = args.get(0)?;
                        let factor: Option<i64> = args.get(1)?;
                        Ok::<_, WirecallError>(value * factor.unwrap_or(1))
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Action::builder("Forget")
                    .handler(|_ctx, _args| async move { Ok::<_, WirecallError>("ignored") })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Dispatcher::new(Arc::new(registry), Arc::new(JsonValueCodec::new()))
    }

    #[tokio::test]
    async fn test_dispatch_echo() {
        let dispatcher = dispatcher();
        let session = Session::builder().build();
        let call = InboundCall::new(Some(1), "Echo", vec![json!("hi")]);

        assert_eq!(dispatcher.dispatch(&session, call).await.unwrap(), json!("hi"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_action() {
        let dispatcher = dispatcher();
        let session = Session::builder().build();
        let call = InboundCall::new(Some(1), "Missing", vec![]);

        let err = dispatcher.dispatch(&session, call).await.unwrap_err();
        assert!(matches!(err, WirecallError::NotFound { .. }));
        assert_eq!(err.to_rpc_error_code(), -32601);
    }

    #[tokio::test]
    async fn test_arguments_are_converted() {
        let dispatcher = dispatcher();
        let session = Session::builder().build();

        let call = InboundCall::new(Some(1), "Scale", vec![json!("21"), json!(2.0)]);
        assert_eq!(dispatcher.dispatch(&session, call).await.unwrap(), json!(42));

        let call = InboundCall::new(Some(2), "Scale", vec![json!(7)]);
        assert_eq!(dispatcher.dispatch(&session, call).await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let dispatcher = dispatcher();
        let session = Session::builder().build();

        for args in [vec![], vec![json!("x"), json!(1)], vec![json!(1), json!(2), json!(3)]] {
            let call = InboundCall::new(Some(1), "Scale", args);
            let err = dispatcher.dispatch(&session, call).await.unwrap_err();
            assert!(matches!(err, WirecallError::Arguments { .. }), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_void_action_yields_null() {
        let dispatcher = dispatcher();
        let session = Session::builder().build();
        let call = InboundCall::new(Some(1), "Forget", vec![]);

        assert_eq!(dispatcher.dispatch(&session, call).await.unwrap(), Value::Null);
    }
}
