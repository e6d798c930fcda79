//! Locally registered operations.
//!
//! An [`Action`] is an explicit binding of a name to typed parameter and
//! return descriptors plus an [`Invoker`]. Actions are assembled with
//! [`ActionBuilder`], grouped into [`ServiceUnit`]s and handed to the
//! [`ActionRegistry`] at startup.

mod registry;

pub use registry::{ActionRegistry, ServiceUnit};

use crate::error::{BoxError, Result, WirecallError};
use crate::filter::Filter;
use crate::session::Session;
use crate::types::{Describe, TypeDescriptor};
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The callable behind an action.
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    async fn invoke(&self, ctx: CallContext, args: Args) -> std::result::Result<Value, BoxError>;
}

/// Positional arguments of one invocation, already converted to the
/// action's parameter types.
#[derive(Debug, Clone)]
pub struct Args {
    action: String,
    values: Vec<Value>,
}

impl Args {
    pub fn new(action: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            action: action.into(),
            values,
        }
    }

    /// Deserialize argument `index` into `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| WirecallError::Arguments {
            action: self.action.clone(),
            message: format!("missing argument {}", index),
        })?;
        T::deserialize(value).map_err(|e| WirecallError::Arguments {
            action: self.action.clone(),
            message: format!("argument {}: {}", index, e),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What an action sees about the call it is serving.
#[derive(Clone)]
pub struct CallContext {
    session: Session,
    action: Arc<Action>,
}

impl CallContext {
    pub fn new(session: Session, action: Arc<Action>) -> Self {
        Self { session, action }
    }

    /// The session the call arrived on.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Other live sessions accepted by the same server.
    pub fn peers(&self) -> Vec<Session> {
        self.session.peers()
    }
}

/// A registered operation. Immutable once built.
#[derive(Clone)]
pub struct Action {
    name: String,
    service: Option<String>,
    params: Vec<TypeDescriptor>,
    returns: TypeDescriptor,
    filters: Vec<Arc<dyn Filter>>,
    invoker: Arc<dyn Invoker>,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Action {
    pub fn builder(name: impl Into<String>) -> ActionBuilder {
        ActionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the declaring service unit, if any.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn params(&self) -> &[TypeDescriptor] {
        &self.params
    }

    pub fn returns(&self) -> &TypeDescriptor {
        &self.returns
    }

    /// Fire-and-forget actions produce no value.
    pub fn is_void(&self) -> bool {
        self.returns.is_unit()
    }

    /// Method-level filters.
    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    pub(crate) fn set_service(&mut self, service: &str) {
        self.service = Some(service.to_string());
    }

    /// Run the bound invoker.
    ///
    /// Any failure of the body, including a panic, comes back as an
    /// `Invocation` error carrying the original cause. Argument errors
    /// raised through [`Args::get`] keep their own variant.
    pub async fn invoke(&self, ctx: CallContext, args: Vec<Value>) -> Result<Value> {
        let call = self.invoker.invoke(ctx, Args::new(self.name.clone(), args));
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(match err.downcast::<WirecallError>() {
                Ok(inner) if matches!(*inner, WirecallError::Arguments { .. }) => *inner,
                Ok(inner) => WirecallError::invocation(&self.name, inner),
                Err(other) => WirecallError::invocation(&self.name, other),
            }),
            Err(panic) => Err(WirecallError::Invocation {
                action: self.name.clone(),
                message: format!("panicked: {}", panic_message(panic.as_ref())),
                source: None,
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Invoker backed by an async closure.
struct FnInvoker<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, R, E> Invoker for FnInvoker<F>
where
    F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn invoke(&self, ctx: CallContext, args: Args) -> std::result::Result<Value, BoxError> {
        let output = (self.f)(ctx, args).await.map_err(Into::into)?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Builder for [`Action`].
///
/// # Example
///
/// ```rust,ignore
/// let echo = Action::builder("Echo")
///     .param::<String>()
///     .returns::<String>()
///     .handler(|_ctx, args| async move { args.get::<String>(0) })
///     .build()?;
/// ```
pub struct ActionBuilder {
    name: String,
    params: Vec<TypeDescriptor>,
    returns: TypeDescriptor,
    filters: Vec<Arc<dyn Filter>>,
    invoker: Option<Arc<dyn Invoker>>,
}

impl ActionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: TypeDescriptor::unit(),
            filters: Vec::new(),
            invoker: None,
        }
    }

    /// Append a positional parameter of type `T`.
    pub fn param<T: Describe + ?Sized>(self) -> Self {
        self.param_desc(TypeDescriptor::of::<T>())
    }

    pub fn param_desc(mut self, desc: TypeDescriptor) -> Self {
        self.params.push(desc);
        self
    }

    /// Set the return type. Actions without one are fire-and-forget.
    pub fn returns<T: Describe + ?Sized>(self) -> Self {
        self.returns_desc(TypeDescriptor::of::<T>())
    }

    pub fn returns_desc(mut self, desc: TypeDescriptor) -> Self {
        self.returns = desc;
        self
    }

    /// Attach a method-level filter.
    pub fn filter(mut self, filter: impl Filter) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn filter_arc(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Bind an async closure as the action body.
    pub fn handler<F, Fut, R, E>(mut self, f: F) -> Self
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.invoker = Some(Arc::new(FnInvoker { f }));
        self
    }

    /// Bind a body that runs against a shared service instance.
    pub fn bind<S, F, Fut, R, E>(self, instance: Arc<S>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>, CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.handler(move |ctx, args| f(instance.clone(), ctx, args))
    }

    /// Use a hand-written [`Invoker`].
    pub fn invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Finish the binding. Fails if the name is empty or no body was bound.
    pub fn build(self) -> Result<Action> {
        if self.name.trim().is_empty() {
            return Err(WirecallError::Config {
                message: "action name must not be empty".to_string(),
            });
        }
        let invoker = self.invoker.ok_or_else(|| WirecallError::Config {
            message: format!("action {} has no handler bound", self.name),
        })?;
        Ok(Action {
            name: self.name,
            service: None,
            params: self.params,
            returns: self.returns,
            filters: self.filters,
            invoker,
        })
    }
}
