//! Codec seams between the byte stream and the dispatch path.
//!
//! - [`MessageCodec`] cuts the inbound byte stream into discrete [`Message`]s
//!   and encodes outbound ones. The session never looks at the byte layout.
//! - [`ValueCodec`] converts raw payload values into the shape a
//!   [`TypeDescriptor`] asks for, both for inbound arguments and for replies.
//!
//! [`JsonFrameCodec`] and [`JsonValueCodec`] are the default implementations.

mod frame;
mod value;

pub use frame::JsonFrameCodec;
pub use value::JsonValueCodec;

use crate::error::{Result, WirecallError};
use crate::types::TypeDescriptor;
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One decoded unit of traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The peer asks us to run a locally registered action.
    Call(InboundCall),
    /// The peer answers a call we issued earlier.
    Reply(Reply),
}

/// An inbound request to invoke an action.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCall {
    /// Correlation id; `None` for fire-and-forget calls, which get no reply.
    pub id: Option<u64>,
    pub action: String,
    pub args: Vec<Value>,
}

impl InboundCall {
    pub fn new(id: Option<u64>, action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            action: action.into(),
            args,
        }
    }
}

/// The answer to an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub outcome: ReplyOutcome,
}

/// What the remote side reported for a call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Success(Value),
    Failure { code: i32, message: String },
}

impl Reply {
    pub fn success(id: u64, payload: Value) -> Self {
        Self {
            id,
            outcome: ReplyOutcome::Success(payload),
        }
    }

    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: ReplyOutcome::Failure {
                code,
                message: message.into(),
            },
        }
    }

    /// Build the reply for a dispatch result.
    pub fn from_result(id: u64, result: &Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value.clone()),
            Err(e) => Self::failure(id, e.to_rpc_error_code(), e.to_string()),
        }
    }
}

/// Framing and message encoding for one protocol variant.
pub trait MessageCodec: Send + Sync + 'static {
    /// Extract the next complete message from `src`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A `Protocol` error means
    /// one message was dropped and decoding can continue; a `Framing` error
    /// means the stream can no longer be trusted.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Message>>;

    /// Append the encoded form of `message` to `dst`.
    fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<()>;
}

/// Conversion of raw payload values to a target type.
pub trait ValueCodec: Send + Sync + 'static {
    /// Convert `raw` into the shape described by `target`.
    fn convert(&self, raw: Value, target: &TypeDescriptor) -> Result<Value>;
}

/// Convert `raw` with `codec`, then deserialize the result into `T`.
///
/// Any failure on either step is reported as `Serialization`.
pub fn decode_value<T: DeserializeOwned>(
    codec: &dyn ValueCodec,
    raw: Value,
    target: &TypeDescriptor,
) -> Result<T> {
    let converted = codec.convert(raw, target)?;
    serde_json::from_value(converted).map_err(|e| WirecallError::Serialization {
        message: format!("cannot decode {}: {}", target, e),
        source: Some(e),
    })
}
