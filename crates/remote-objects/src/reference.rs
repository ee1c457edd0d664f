//! Conversion between application values and wire values.
//!
//! Outbound, objects that must not be copied are exported into the
//! connection's local table and replaced by `Lid` markers; proxies that
//! belong to the same connection go back as `Rid` markers. Inbound, `Lid`
//! becomes a (deduplicated) proxy and `Rid` resolves to the local object.

use std::sync::Arc;

use crate::connection::Shared;
use crate::error::{RpcError, RpcResult};
use crate::objects::ValueCell;
use crate::proxy::Proxy;
use crate::value::{Handle, ObjectRef, Value};
use crate::wire::{ObjectId, WireValue};

impl Shared {
    /// Encode `value` for this connection.
    ///
    /// `force` exports the value even when it would normally be copied. Nil
    /// is never exported.
    pub(crate) fn make_reference(&self, value: &Value, force: bool) -> WireValue {
        match value {
            Value::Nil => WireValue::Nil,
            Value::Object(obj) => self.reference_object(obj, force),
            other if force => self.export(Handle::Local(Arc::new(ValueCell::new(other.clone())))),
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(v) => WireValue::Int(*v),
            Value::Float(v) => WireValue::Float(*v),
            Value::Str(s) => WireValue::Str(s.clone()),
            Value::Symbol(s) => WireValue::Symbol(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.make_reference(item, false))
                    .collect(),
            ),
            Value::Map(entries) => WireValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (self.make_reference(k, false), self.make_reference(v, false)))
                    .collect(),
            ),
            Value::Error(e) => WireValue::Error(e.clone()),
        }
    }

    fn reference_object(&self, obj: &ObjectRef, force: bool) -> WireValue {
        match obj.handle() {
            Handle::Remote(proxy) if proxy.belongs_to(self) => WireValue::Rid(proxy.remote_id()),
            Handle::Local(local) if !force && !obj.is_forced_ref() => match local.by_value() {
                Some(copy) => self.make_reference(&copy, false),
                None => self.export(obj.handle().clone()),
            },
            handle => self.export(handle.clone()),
        }
    }

    fn export(&self, handle: Handle) -> WireValue {
        WireValue::Lid(self.tables.lock().add_local(handle))
    }

    /// Decode a value received on this connection.
    pub(crate) fn make_object(self: &Arc<Self>, wire: WireValue) -> RpcResult<Value> {
        Ok(match wire {
            WireValue::Nil => Value::Nil,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(v) => Value::Int(v),
            WireValue::Uint(v) => Value::Int(
                i64::try_from(v)
                    .map_err(|e| RpcError::protocol(format!("integer {v}: {e}")))?,
            ),
            WireValue::Float(v) => Value::Float(v),
            WireValue::Str(s) => Value::Str(s),
            WireValue::Symbol(s) => Value::Symbol(s),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::List(items) => Value::List(self.decode_args(items)?),
            WireValue::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((self.make_object(k)?, self.make_object(v)?)))
                    .collect::<RpcResult<_>>()?,
            ),
            WireValue::Error(e) => Value::Error(e),
            WireValue::Lid(id) => {
                if id.is_root() {
                    return Err(RpcError::protocol(
                        "peer exported an object under the reserved root id",
                    ));
                }
                Value::from(self.remote_object(id))
            }
            WireValue::Rid(id) => Value::Object(ObjectRef::new(self.tables.lock().lookup_local(id)?)),
        })
    }

    /// Proxy for the peer's object `id`, reusing a live one.
    pub(crate) fn remote_object(self: &Arc<Self>, id: ObjectId) -> Proxy {
        self.tables
            .lock()
            .remote_object(id, || Proxy::tracked(id, Arc::clone(self)))
    }

    pub(crate) fn encode_args(&self, args: &[Value]) -> Vec<WireValue> {
        args.iter()
            .map(|arg| self.make_reference(arg, false))
            .collect()
    }

    pub(crate) fn decode_args(self: &Arc<Self>, args: Vec<WireValue>) -> RpcResult<Vec<Value>> {
        args.into_iter().map(|arg| self.make_object(arg)).collect()
    }
}
