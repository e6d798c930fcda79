//! Length-prefixed JSON framing.
//!
//! Each message is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON-RPC 2.0 style object.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Calls carry `method`, positional `params` and an optional `id`. Replies
//! carry the `id` of the call and either `result` or `error`.

use super::{InboundCall, Message, MessageCodec, Reply, ReplyOutcome};
use crate::config::TransportConfig;
use crate::error::{Result, WirecallError};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const JSONRPC_VERSION: &str = "2.0";
const LEN_PREFIX: usize = 4;

/// JSON-RPC 2.0 envelope used for both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireError {
    code: i32,
    message: String,
}

impl WireMessage {
    fn from_message(message: &Message) -> Self {
        let mut wire = Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            params: None,
            result: None,
            error: None,
            id: None,
        };
        match message {
            Message::Call(call) => {
                wire.method = Some(call.action.clone());
                wire.params = Some(Value::Array(call.args.clone()));
                wire.id = call.id;
            }
            Message::Reply(reply) => {
                wire.id = Some(reply.id);
                match &reply.outcome {
                    ReplyOutcome::Success(value) => wire.result = Some(value.clone()),
                    ReplyOutcome::Failure { code, message } => {
                        wire.error = Some(WireError {
                            code: *code,
                            message: message.clone(),
                        })
                    }
                }
            }
        }
        wire
    }

    fn into_message(self) -> Result<Message> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(WirecallError::Protocol {
                message: format!("expected jsonrpc {}, got {:?}", JSONRPC_VERSION, self.jsonrpc),
            });
        }

        if let Some(action) = self.method {
            let args = match self.params {
                None => Vec::new(),
                Some(Value::Array(args)) => args,
                Some(single) => vec![single],
            };
            return Ok(Message::Call(InboundCall::new(self.id, action, args)));
        }

        let id = self.id.ok_or_else(|| WirecallError::Protocol {
            message: "reply without id".to_string(),
        })?;
        let outcome = match self.error {
            Some(err) => ReplyOutcome::Failure {
                code: err.code,
                message: err.message,
            },
            // `"result": null` deserializes to None: a void reply.
            None => ReplyOutcome::Success(self.result.unwrap_or(Value::Null)),
        };
        Ok(Message::Reply(Reply { id, outcome }))
    }
}

/// Length-prefixed JSON message codec.
#[derive(Debug, Clone)]
pub struct JsonFrameCodec {
    max_message_size: usize,
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self {
            max_message_size: TransportConfig::MAX_MESSAGE_SIZE,
        }
    }
}

impl JsonFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames whose declared payload is larger than `max` bytes.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl MessageCodec for JsonFrameCodec {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_buf = [0u8; LEN_PREFIX];
        len_buf.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > self.max_message_size {
            return Err(WirecallError::Framing {
                message: format!(
                    "message size {} exceeds maximum {}",
                    len, self.max_message_size
                ),
            });
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);

        // The frame is consumed either way, so a bad payload only costs this message.
        let wire: WireMessage =
            serde_json::from_slice(&payload).map_err(|e| WirecallError::Protocol {
                message: format!("invalid message payload: {}", e),
            })?;
        wire.into_message().map(Some)
    }

    fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&WireMessage::from_message(message))?;
        if payload.len() > self.max_message_size {
            return Err(WirecallError::Framing {
                message: format!(
                    "outbound message size {} exceeds maximum {}",
                    payload.len(),
                    self.max_message_size
                ),
            });
        }

        dst.reserve(LEN_PREFIX + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}
