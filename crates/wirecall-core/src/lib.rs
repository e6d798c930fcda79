//! Wirecall - RPC over persistent stream connections.
//!
//! A local call becomes a remote action invocation; its result, error or
//! timeout is delivered back to the caller asynchronously. Both ends of a
//! connection can call each other.
//!
//! The crate is built from four parts:
//!
//! - [`ActionRegistry`]: named actions with typed parameters and a bound invoker
//! - [`FilterPipeline`]: ordered pre/post hooks around every invocation
//! - [`PendingCalls`]: outbound calls awaiting a reply, with timeout sweeping
//! - [`Session`]: connection lifecycle, receive loop and dispatch
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wirecall::{Action, ActionRegistry, Server, ServerOptions, Session};
//!
//! #[tokio::main]
//! async fn main() -> wirecall::Result<()> {
//!     let mut registry = ActionRegistry::new();
//!     registry.register(
//!         Action::builder("Echo")
//!             .param::<String>()
//!             .returns::<String>()
//!             .handler(|_ctx, args| async move { args.get::<String>(0) })
//!             .build()?,
//!     )?;
//!
//!     let server = Server::start(Arc::new(registry), "127.0.0.1:0", ServerOptions::default()).await?;
//!
//!     let client = Session::builder().build();
//!     client.connect(server.addr().to_string()).await?;
//!     let reply: String = client.call("Echo", vec!["hi".into()]).await?;
//!     assert_eq!(reply, "hi");
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod pending;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use action::{Action, ActionBuilder, ActionRegistry, Args, CallContext, Invoker, ServiceUnit};
pub use cancel::CancellationToken;
pub use codec::{
    InboundCall, JsonFrameCodec, JsonValueCodec, Message, MessageCodec, Reply, ReplyOutcome,
    ValueCodec,
};
pub use config::{CallConfig, SessionOptions, TransportConfig};
pub use dispatch::Dispatcher;
pub use error::{BoxError, Result, WirecallError};
pub use filter::{ActionContext, ErrorLogFilter, Filter, FilterFlow, FilterPipeline};
pub use pending::{CompletionHandle, Outcome, PendingCalls};
pub use server::{Server, ServerHandle, ServerOptions};
pub use session::{
    ConnectOutcome, ConnectionId, DisconnectReason, ReconnectOutcome, Session, SessionBuilder,
    SessionEvent, SessionGroup, SessionId, SessionState, TagBag,
};
pub use transport::{BoxedStream, ByteStream, Connector, MemoryAcceptor, MemoryConnector, TcpConnector};
pub use types::{Describe, TypeDescriptor, ValueKind};
