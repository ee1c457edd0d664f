//! Protocol messages and their envelope encoding.
//!
//! Each message is encoded as a tagged tuple `[tag, field1, field2, ...]`.
//! Tags are assigned by declaration order and are part of the wire contract:
//!
//! | tag | message |
//! |-----|---------|
//! | 0 | `Call` |
//! | 1 | `RefCall` (decoded as `Call` unless enabled) |
//! | 2 | `Yield` |
//! | 3 | `Return` |
//! | 4 | `Release` |

use crate::error::{RpcError, RpcResult};
use crate::wire::{CallId, ObjectId, WireValue};

/// Envelope tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    /// Method call
    Call = 0,
    /// Method call whose non-nil result is returned by reference
    RefCall = 1,
    /// Callback invocation addressed to a waiting caller
    Yield = 2,
    /// Result (or error) of a call or yield
    Return = 3,
    /// Release of an exported object
    Release = 4,
}

impl MessageTag {
    /// Map a wire tag back to a message kind.
    pub fn from_wire(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(MessageTag::Call),
            1 => Some(MessageTag::RefCall),
            2 => Some(MessageTag::Yield),
            3 => Some(MessageTag::Return),
            4 => Some(MessageTag::Release),
            _ => None,
        }
    }
}

/// Invocation of `method` on the object `target` of the receiving side.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Correlation id the caller waits on
    pub caller: CallId,
    /// Target object id in the receiver's tables
    pub target: ObjectId,
    /// Method name; `None` asks for the target object itself
    pub method: Option<String>,
    /// Encoded arguments
    pub args: Vec<WireValue>,
    /// Whether the caller passed a block it is willing to run
    pub has_block: bool,
}

/// Request to run the block of an outstanding call.
#[derive(Debug, Clone, PartialEq)]
pub struct Yield {
    /// Correlation id of the original call (the waiter that owns the block)
    pub caller: CallId,
    /// Correlation id the yielding side waits on for the block's result
    pub yield_id: CallId,
    /// Encoded block arguments
    pub args: Vec<WireValue>,
}

/// Result of a call or of a yield.
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    /// Correlation id being answered
    pub id: CallId,
    /// Result value, or an error value when `is_error` is set
    pub payload: WireValue,
    /// Whether `payload` is an error to re-raise
    pub is_error: bool,
}

/// Notice that the sender dropped its last proxy for `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Object id in the receiver's tables
    pub id: ObjectId,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Plain call
    Call(Call),
    /// Call demanding a by-reference result
    RefCall(Call),
    /// Callback invocation
    Yield(Yield),
    /// Call or yield result
    Return(Return),
    /// Object release
    Release(Release),
}

impl Message {
    /// Tag of this message.
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Call(_) => MessageTag::Call,
            Message::RefCall(_) => MessageTag::RefCall,
            Message::Yield(_) => MessageTag::Yield,
            Message::Return(_) => MessageTag::Return,
            Message::Release(_) => MessageTag::Release,
        }
    }

    /// Encode into a tagged tuple.
    pub fn to_envelope(&self) -> Vec<WireValue> {
        let tag = WireValue::Uint(self.tag() as u64);
        match self {
            Message::Call(call) | Message::RefCall(call) => vec![
                tag,
                WireValue::Uint(call.caller.0),
                WireValue::Uint(call.target.0),
                call.method
                    .as_ref()
                    .map_or(WireValue::Nil, |m| WireValue::Symbol(m.clone())),
                WireValue::List(call.args.clone()),
                WireValue::Bool(call.has_block),
            ],
            Message::Yield(y) => vec![
                tag,
                WireValue::Uint(y.caller.0),
                WireValue::Uint(y.yield_id.0),
                WireValue::List(y.args.clone()),
            ],
            Message::Return(r) => vec![
                tag,
                WireValue::Uint(r.id.0),
                r.payload.clone(),
                WireValue::Bool(r.is_error),
            ],
            Message::Release(r) => vec![tag, WireValue::Uint(r.id.0)],
        }
    }
}

/// Decodes envelopes back into messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDecoder {
    ref_call_enabled: bool,
}

impl MessageDecoder {
    /// Create a decoder; `RefCall` is diverted to `Call` unless enabled.
    pub fn new(ref_call_enabled: bool) -> Self {
        Self { ref_call_enabled }
    }

    /// Whether tag 1 decodes as `RefCall`.
    pub fn ref_call_enabled(&self) -> bool {
        self.ref_call_enabled
    }

    /// Decode a tagged tuple.
    pub fn decode(&self, envelope: Vec<WireValue>) -> RpcResult<Message> {
        let mut fields = Fields::new(envelope);
        let tag = fields.uint("tag")?;
        let tag = MessageTag::from_wire(tag)
            .ok_or_else(|| RpcError::protocol(format!("unknown message tag {tag}")))?;

        let message = match tag {
            MessageTag::Call | MessageTag::RefCall => {
                let call = Call {
                    caller: CallId(fields.uint("caller")?),
                    target: ObjectId(fields.uint("target")?),
                    method: fields.method()?,
                    args: fields.list("args")?,
                    has_block: fields.bool("has_block")?,
                };
                if tag == MessageTag::RefCall && self.ref_call_enabled {
                    Message::RefCall(call)
                } else {
                    Message::Call(call)
                }
            }
            MessageTag::Yield => Message::Yield(Yield {
                caller: CallId(fields.uint("caller")?),
                yield_id: CallId(fields.uint("yield_id")?),
                args: fields.list("args")?,
            }),
            MessageTag::Return => Message::Return(Return {
                id: CallId(fields.uint("id")?),
                payload: fields.next("payload")?,
                is_error: fields.bool("is_error")?,
            }),
            MessageTag::Release => Message::Release(Release {
                id: ObjectId(fields.uint("id")?),
            }),
        };

        fields.finish(tag)?;
        Ok(message)
    }
}

struct Fields {
    inner: std::vec::IntoIter<WireValue>,
}

impl Fields {
    fn new(envelope: Vec<WireValue>) -> Self {
        Self {
            inner: envelope.into_iter(),
        }
    }

    fn next(&mut self, name: &str) -> RpcResult<WireValue> {
        self.inner
            .next()
            .ok_or_else(|| RpcError::protocol(format!("missing field '{name}'")))
    }

    fn uint(&mut self, name: &str) -> RpcResult<u64> {
        match self.next(name)? {
            WireValue::Uint(v) => Ok(v),
            WireValue::Int(v) => u64::try_from(v)
                .map_err(|e| RpcError::protocol(format!("field '{name}': {e}"))),
            other => Err(unexpected(name, &other)),
        }
    }

    fn bool(&mut self, name: &str) -> RpcResult<bool> {
        match self.next(name)? {
            WireValue::Bool(v) => Ok(v),
            WireValue::Nil => Ok(false),
            other => Err(unexpected(name, &other)),
        }
    }

    fn list(&mut self, name: &str) -> RpcResult<Vec<WireValue>> {
        match self.next(name)? {
            WireValue::List(v) => Ok(v),
            other => Err(unexpected(name, &other)),
        }
    }

    fn method(&mut self) -> RpcResult<Option<String>> {
        match self.next("method")? {
            WireValue::Nil => Ok(None),
            WireValue::Symbol(m) | WireValue::Str(m) => Ok(Some(m)),
            other => Err(unexpected("method", &other)),
        }
    }

    fn finish(mut self, tag: MessageTag) -> RpcResult<()> {
        match self.inner.next() {
            None => Ok(()),
            Some(_) => Err(RpcError::protocol(format!(
                "too many fields for {tag:?} message"
            ))),
        }
    }
}

fn unexpected(name: &str, value: &WireValue) -> RpcError {
    RpcError::protocol(format!(
        "field '{name}' has unexpected type {}",
        value.type_name()
    ))
}
