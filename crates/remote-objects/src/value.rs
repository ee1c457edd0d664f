//! Application values and the dispatch trait for exported objects.
//!
//! [`Value`] is what application code passes to and receives from remote
//! calls. Scalars, strings, lists, maps and errors cross the wire by value;
//! [`Value::Object`] holds something callable that crosses by reference
//! unless the object itself asks to be copied.

use core::fmt;
use std::sync::Arc;

use crate::error::{RpcError, RpcResult};
use crate::proxy::Proxy;
use crate::wire::ErrorValue;

/// Callback passed along with a call.
///
/// Blocks run on the thread that issued the call, which is also the thread
/// waiting for the call's result, so they never need to be `Send`.
pub type Block<'a> = dyn Fn(Vec<Value>) -> RpcResult<Value> + 'a;

/// An object whose methods can be invoked by name.
///
/// This is the single dispatch entry point used both for locally exported
/// objects and for proxies forwarding to a peer.
pub trait RemoteObject: Send + Sync + 'static {
    /// Invoke `method` with `args`, optionally passing a block.
    ///
    /// Unknown methods should fail with [`RpcError::NoSuchMethod`].
    fn invoke(&self, method: &str, args: Vec<Value>, block: Option<&Block<'_>>) -> RpcResult<Value>;

    /// Object-level veto consulted for inbound calls, after the connection's
    /// security policy.
    fn permits(&self, _method: &str) -> bool {
        true
    }

    /// Structural copy to send instead of a reference.
    ///
    /// Objects returning `Some` are passed by value unless forced by
    /// reference.
    fn by_value(&self) -> Option<Value> {
        None
    }

    /// Short description used by [`Value::inspect`].
    fn describe(&self) -> String {
        "#<object>".to_string()
    }
}

/// Something callable: a local object or a proxy to a remote one.
#[derive(Clone)]
pub enum Handle {
    /// Object living in this process
    Local(Arc<dyn RemoteObject>),
    /// Proxy to an object living in a peer
    Remote(Proxy),
}

impl Handle {
    /// Identity of the underlying object, stable while it is alive.
    pub fn identity(&self) -> usize {
        match self {
            Handle::Local(obj) => Arc::as_ptr(obj).cast::<()>() as usize,
            Handle::Remote(proxy) => proxy.identity(),
        }
    }

    /// Dispatch a call to the underlying object.
    pub fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        block: Option<&Block<'_>>,
    ) -> RpcResult<Value> {
        match self {
            Handle::Local(obj) => obj.invoke(method, args, block),
            Handle::Remote(proxy) => proxy.call_with_block(method, args, block),
        }
    }

    /// Object-level method veto.
    pub fn permits(&self, method: &str) -> bool {
        match self {
            Handle::Local(obj) => obj.permits(method),
            Handle::Remote(_) => true,
        }
    }

    /// Check if both handles denote the same object.
    pub fn same(&self, other: &Handle) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Local(obj) => write!(f, "Local({})", obj.describe()),
            Handle::Remote(proxy) => write!(f, "Remote({proxy:?})"),
        }
    }
}

/// An object value together with its passing mode.
#[derive(Clone, Debug)]
pub struct ObjectRef {
    handle: Handle,
    force_ref: bool,
}

impl ObjectRef {
    /// Wrap a handle with default passing semantics.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            force_ref: false,
        }
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether this instance must cross by reference.
    pub fn is_forced_ref(&self) -> bool {
        self.force_ref
    }

    /// The proxy, if this is a remote object.
    pub fn as_proxy(&self) -> Option<&Proxy> {
        match &self.handle {
            Handle::Remote(proxy) => Some(proxy),
            Handle::Local(_) => None,
        }
    }
}

/// An application value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absence of a value; never crosses by reference
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
    /// Symbol (interned name, e.g. a hash key)
    Symbol(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<Value>),
    /// Association list
    Map(Vec<(Value, Value)>),
    /// Error carried as a value
    Error(ErrorValue),
    /// Callable object
    Object(ObjectRef),
}

impl Value {
    /// Wrap a local object.
    pub fn object(obj: impl RemoteObject) -> Self {
        Self::from_arc(Arc::new(obj))
    }

    /// Wrap a shared local object.
    pub fn from_arc(obj: Arc<dyn RemoteObject>) -> Self {
        Value::Object(ObjectRef::new(Handle::Local(obj)))
    }

    /// Create a symbol.
    pub fn sym(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// Force this value across the wire by reference.
    ///
    /// Nil stays nil: a reference to nil would be indistinguishable from a
    /// reference to the peer's root object. Plain values are boxed in a
    /// [`crate::objects::ValueCell`] so the peer gets something callable.
    pub fn into_ref(self) -> Self {
        match self {
            Value::Nil => Value::Nil,
            Value::Object(mut obj) => {
                obj.force_ref = true;
                Value::Object(obj)
            }
            other => {
                let cell = crate::objects::ValueCell::new(other);
                Value::Object(ObjectRef {
                    handle: Handle::Local(Arc::new(cell)),
                    force_ref: true,
                })
            }
        }
    }

    /// Check for nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Integer content.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content (integers widen).
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String or symbol content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// List content.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Object handle.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Proxy to a remote object.
    pub fn as_proxy(&self) -> Option<&Proxy> {
        self.as_object().and_then(ObjectRef::as_proxy)
    }

    /// Truthiness: everything except nil and false.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Whether this value would be copied (not referenced) when sent.
    pub fn is_by_value(&self) -> bool {
        match self {
            Value::Object(obj) => {
                !obj.force_ref
                    && match &obj.handle {
                        Handle::Local(local) => local.by_value().is_some(),
                        Handle::Remote(_) => false,
                    }
            }
            _ => true,
        }
    }

    /// Look up `key` in a map value.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Human-readable rendering.
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{v:?}"),
            Value::Str(s) => format!("{s:?}"),
            Value::Symbol(s) => format!(":{s}"),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::inspect).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}=>{}", k.inspect(), v.inspect()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Error(e) => format!("#<{}: {}>", e.kind, e.message),
            Value::Object(obj) => match &obj.handle {
                Handle::Local(local) => local.describe(),
                Handle::Remote(proxy) => format!("{proxy}"),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) | (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.handle.same(&b.handle),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) | Value::Symbol(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.inspect()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Proxy> for Value {
    fn from(proxy: Proxy) -> Self {
        Value::Object(ObjectRef::new(Handle::Remote(proxy)))
    }
}

impl From<RpcError> for Value {
    fn from(err: RpcError) -> Self {
        Value::Error(err.to_error_value())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

/// Take exactly `N` arguments.
pub fn expect_args<const N: usize>(method: &str, args: Vec<Value>) -> RpcResult<[Value; N]> {
    <[Value; N]>::try_from(args).map_err(|given| {
        RpcError::argument(format!(
            "wrong number of arguments for '{method}' (given {}, expected {N})",
            given.len()
        ))
    })
}
