//! Wire value model and the injectable serializers.
//!
//! A [`WireValue`] is what actually crosses the socket: application values
//! after the reference hooks have replaced every by-reference object with an
//! [`WireValue::Lid`] or [`WireValue::Rid`] token. The [`Serializer`] only
//! ever sees wire values, so the byte encoding is independent from the
//! reference model.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, RpcResult};

/// Identifier of an object in a connection's tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Reserved id of the object a peer exported as its root.
    ///
    /// It doubles as the encoding of "no value", which is why nil never
    /// crosses the wire by reference.
    pub const ROOT: ObjectId = ObjectId(0);

    /// Check if this is the reserved root id.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Correlation key of an outstanding call or yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// By-value representation of an error crossing the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorValue {
    /// Error kind (e.g. `SecurityViolationError`, `ArgumentError`)
    pub kind: String,
    /// Error message
    pub message: String,
}

impl ErrorValue {
    /// Create a new error value.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A value as it is encoded inside a message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    /// Absence of a value
    Nil,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer (envelope tags and ids)
    Uint(u64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Interned name
    Symbol(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list
    List(#[serde(deserialize_with = "nesting::list")] Vec<WireValue>),
    /// Association list
    Map(#[serde(deserialize_with = "nesting::map")] Vec<(WireValue, WireValue)>),
    /// Error carried by value
    Error(ErrorValue),
    /// Reference to an object local to the sender
    Lid(ObjectId),
    /// Reference to an object local to the receiver
    Rid(ObjectId),
}

impl WireValue {
    /// Short name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::Nil => "nil",
            WireValue::Bool(_) => "bool",
            WireValue::Int(_) => "int",
            WireValue::Uint(_) => "uint",
            WireValue::Float(_) => "float",
            WireValue::Str(_) => "string",
            WireValue::Symbol(_) => "symbol",
            WireValue::Bytes(_) => "bytes",
            WireValue::List(_) => "list",
            WireValue::Map(_) => "map",
            WireValue::Error(_) => "error",
            WireValue::Lid(_) => "lid",
            WireValue::Rid(_) => "rid",
        }
    }
}

/// Deepest `List`/`Map` nesting accepted in either direction.
///
/// Every level costs the JSON encoding up to three levels of its own
/// recursion budget, which must stay within serde_json's limit of 128.
pub const MAX_NESTING: usize = 32;

/// Depth accounting for nested wire values while decoding.
mod nesting {
    use core::cell::Cell;

    use serde::de::{Deserialize, Deserializer, Error};

    use super::{MAX_NESTING, WireValue};

    thread_local! {
        static DEPTH: Cell<usize> = const { Cell::new(0) };
    }

    struct Level;

    impl Level {
        fn enter<E: Error>() -> Result<Self, E> {
            DEPTH.with(|depth| {
                let next = depth.get() + 1;
                if next > MAX_NESTING {
                    return Err(E::custom(format!(
                        "values nested deeper than {MAX_NESTING} levels"
                    )));
                }
                depth.set(next);
                Ok(Level)
            })
        }
    }

    impl Drop for Level {
        fn drop(&mut self) {
            DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        }
    }

    pub(super) fn list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<WireValue>, D::Error> {
        let _level = Level::enter::<D::Error>()?;
        Vec::deserialize(d)
    }

    pub(super) fn map<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Vec<(WireValue, WireValue)>, D::Error> {
        let _level = Level::enter::<D::Error>()?;
        Vec::deserialize(d)
    }
}

/// Reject envelopes the peer could not decode.
///
/// `finite_only` additionally rejects NaN and infinities.
fn check_encodable(values: &[WireValue], depth: usize, finite_only: bool) -> RpcResult<()> {
    let descend = |depth: usize| {
        if depth >= MAX_NESTING {
            Err(RpcError::protocol(format!(
                "values nested deeper than {MAX_NESTING} levels"
            )))
        } else {
            Ok(depth + 1)
        }
    };
    for value in values {
        match value {
            WireValue::Float(v) if finite_only && !v.is_finite() => {
                return Err(RpcError::protocol(format!("float {v} cannot be encoded")));
            }
            WireValue::List(items) => check_encodable(items, descend(depth)?, finite_only)?,
            WireValue::Map(entries) => {
                let inner = descend(depth)?;
                for (k, v) in entries {
                    check_encodable(core::slice::from_ref(k), inner, finite_only)?;
                    check_encodable(core::slice::from_ref(v), inner, finite_only)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Codec turning envelopes (`[tag, field, ...]`) into bytes and back.
///
/// Implementations must be stateless with respect to connections: reference
/// tokens are plain data at this level.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Name of the encoding, for logs.
    fn name(&self) -> &'static str;

    /// Encode an envelope.
    fn serialize(&self, envelope: &[WireValue]) -> RpcResult<Vec<u8>>;

    /// Decode an envelope.
    fn deserialize(&self, bytes: &[u8]) -> RpcResult<Vec<WireValue>>;
}

/// Compact binary encoding (bincode, legacy configuration).
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

impl Serializer for BincodeSerializer {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn serialize(&self, envelope: &[WireValue]) -> RpcResult<Vec<u8>> {
        check_encodable(envelope, 0, false)?;
        bincode::serde::encode_to_vec(envelope, bincode_config())
            .map_err(|e| RpcError::protocol(format!("encoding failed: {e}")))
    }

    fn deserialize(&self, bytes: &[u8]) -> RpcResult<Vec<WireValue>> {
        let (envelope, used): (Vec<WireValue>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode_config())
                .map_err(|e| RpcError::protocol(format!("decoding failed: {e}")))?;
        if used != bytes.len() {
            return Err(RpcError::protocol(format!(
                "trailing bytes: used {used} of {}",
                bytes.len()
            )));
        }
        Ok(envelope)
    }
}

/// JSON encoding, handy when inspecting traffic.
///
/// Non-finite floats have no JSON representation and are rejected when
/// encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, envelope: &[WireValue]) -> RpcResult<Vec<u8>> {
        check_encodable(envelope, 0, true)?;
        serde_json::to_vec(envelope).map_err(|e| RpcError::protocol(format!("encoding failed: {e}")))
    }

    fn deserialize(&self, bytes: &[u8]) -> RpcResult<Vec<WireValue>> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::protocol(format!("decoding failed: {e}")))
    }
}

/// Serializer selection for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// [`BincodeSerializer`]
    #[default]
    Bincode,
    /// [`JsonSerializer`]
    Json,
}

impl SerializerKind {
    /// Instantiate the selected serializer.
    pub fn build(self) -> std::sync::Arc<dyn Serializer> {
        match self {
            SerializerKind::Bincode => std::sync::Arc::new(BincodeSerializer),
            SerializerKind::Json => std::sync::Arc::new(JsonSerializer),
        }
    }
}
