//! Ready-made exportable objects.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use parking_lot::Mutex;

use crate::error::{RpcError, RpcResult};
use crate::value::{Block, RemoteObject, Value, expect_args};

/// Thread-safe association list, exported by reference.
///
/// Every method takes the map's lock for the duration of a single
/// operation, so concurrent remote callers see atomic `increment`s.
#[derive(Debug, Default)]
pub struct SharedMap {
    entries: Mutex<Vec<(Value, Value)>>,
}

impl SharedMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map pre-filled with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let map = Self::new();
        for (k, v) in entries {
            map.set(k, v);
        }
        map
    }

    /// Value under `key`, nil if absent.
    pub fn get(&self, key: &Value) -> Value {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Store `value` under `key`.
    pub fn set(&self, key: Value, value: Value) {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Add `by` to the integer under `key` (missing counts as 0).
    ///
    /// # Errors
    ///
    /// Fails if the current value is not an integer or the sum overflows.
    pub fn increment(&self, key: Value, by: i64) -> RpcResult<i64> {
        let mut entries = self.entries.lock();
        let slot = match entries.iter().position(|(k, _)| *k == key) {
            Some(i) => i,
            None => {
                entries.push((key, Value::Int(0)));
                entries.len() - 1
            }
        };
        let Some((k, current)) = entries.get_mut(slot) else {
            return Err(RpcError::runtime("map changed under increment"));
        };
        let Value::Int(n) = current else {
            return Err(RpcError::application(
                "TypeError",
                format!("{} is not an integer", k.inspect()),
            ));
        };
        *n = n
            .checked_add(by)
            .ok_or_else(|| RpcError::application("RangeError", "integer overflow"))?;
        Ok(*n)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &Value) -> Option<Value> {
        let mut entries = self.entries.lock();
        let i = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(i).1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check for emptiness.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Value {
        Value::Map(self.entries.lock().clone())
    }

    fn keys(&self) -> Value {
        Value::List(self.entries.lock().iter().map(|(k, _)| k.clone()).collect())
    }

    fn values(&self) -> Value {
        Value::List(self.entries.lock().iter().map(|(_, v)| v.clone()).collect())
    }
}

impl RemoteObject for SharedMap {
    fn invoke(&self, method: &str, args: Vec<Value>, block: Option<&Block<'_>>) -> RpcResult<Value> {
        match method {
            "[]" | "get" => {
                let [key] = expect_args(method, args)?;
                Ok(self.get(&key))
            }
            "[]=" | "set" | "store" => {
                let [key, value] = expect_args(method, args)?;
                self.set(key, value.clone());
                Ok(value)
            }
            "fetch" => {
                let mut args = args.into_iter();
                let (Some(key), default, None) = (args.next(), args.next(), args.next()) else {
                    return Err(RpcError::argument("fetch takes a key and an optional default"));
                };
                let entries = self.entries.lock();
                match entries.iter().find(|(k, _)| *k == key) {
                    Some((_, v)) => Ok(v.clone()),
                    None => default.ok_or_else(|| {
                        RpcError::application("KeyError", format!("key not found: {}", key.inspect()))
                    }),
                }
            }
            "increment" => {
                let mut args = args.into_iter();
                let (Some(key), by, None) = (args.next(), args.next(), args.next()) else {
                    return Err(RpcError::argument("increment takes a key and an optional step"));
                };
                let by = match by {
                    None => 1,
                    Some(v) => v
                        .as_int()
                        .ok_or_else(|| RpcError::argument("step must be an integer"))?,
                };
                self.increment(key, by).map(Value::Int)
            }
            "delete" => {
                let [key] = expect_args(method, args)?;
                Ok(self.remove(&key).unwrap_or_default())
            }
            "has_key?" | "key?" | "include?" => {
                let [key] = expect_args(method, args)?;
                Ok(Value::Bool(
                    self.entries.lock().iter().any(|(k, _)| *k == key),
                ))
            }
            "keys" => Ok(self.keys()),
            "values" => Ok(self.values()),
            "size" | "length" => Ok(Value::Int(i64::try_from(self.len()).unwrap_or(i64::MAX))),
            "empty?" => Ok(Value::Bool(self.is_empty())),
            "clear" => {
                self.entries.lock().clear();
                Ok(Value::Nil)
            }
            "to_h" => Ok(self.snapshot()),
            "inspect" | "to_s" => Ok(Value::Str(self.snapshot().inspect())),
            "each" => {
                let block = block.ok_or_else(|| {
                    RpcError::application("LocalJumpError", "no block given (yield)")
                })?;
                // iterate a copy; the block may call back into this map
                let entries = self.entries.lock().clone();
                for (k, v) in entries {
                    block(vec![k, v])?;
                }
                Ok(Value::Nil)
            }
            _ => Err(RpcError::no_such_method(method)),
        }
    }

    fn describe(&self) -> String {
        self.snapshot().inspect()
    }
}

/// Box around a plain value so it can be exported by reference.
///
/// Sent by value unless forced by reference, in which case the peer gets a
/// proxy whose `value` method returns a copy.
#[derive(Debug, Clone)]
pub struct ValueCell {
    value: Value,
}

impl ValueCell {
    /// Wrap `value`.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl RemoteObject for ValueCell {
    fn invoke(&self, method: &str, args: Vec<Value>, _block: Option<&Block<'_>>) -> RpcResult<Value> {
        match method {
            "value" | "get" => {
                let [] = expect_args(method, args)?;
                Ok(self.value.clone())
            }
            "inspect" | "to_s" => Ok(Value::Str(self.value.inspect())),
            "==" => {
                let [other] = expect_args(method, args)?;
                Ok(Value::Bool(other == self.value))
            }
            "size" | "length" => {
                let len = match &self.value {
                    Value::Str(s) | Value::Symbol(s) => s.chars().count(),
                    Value::Bytes(b) => b.len(),
                    Value::List(items) => items.len(),
                    Value::Map(entries) => entries.len(),
                    _ => return Err(RpcError::no_such_method(method)),
                };
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            "[]" => {
                let [key] = expect_args(method, args)?;
                match (&self.value, &key) {
                    (Value::List(items), Value::Int(i)) => Ok(usize::try_from(*i)
                        .ok()
                        .and_then(|i| items.get(i))
                        .cloned()
                        .unwrap_or_default()),
                    (Value::Map(_), key) => Ok(self.value.get(key).cloned().unwrap_or_default()),
                    _ => Err(RpcError::argument(format!(
                        "cannot index {} with {}",
                        self.value.inspect(),
                        key.inspect()
                    ))),
                }
            }
            _ => Err(RpcError::no_such_method(method)),
        }
    }

    fn by_value(&self) -> Option<Value> {
        Some(self.value.clone())
    }

    fn describe(&self) -> String {
        self.value.inspect()
    }
}

type Method = Box<dyn Fn(Vec<Value>, Option<&Block<'_>>) -> RpcResult<Value> + Send + Sync>;

/// Object assembled from named closures.
///
/// ```
/// use remote_objects::prelude::*;
///
/// let calc = MethodTable::new("calc")
///     .method("add", |args, _| {
///         let [a, b] = expect_args("add", args)?;
///         Ok(Value::Int(a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0)))
///     })
///     .method("each_twice", |args, block| {
///         let block = block.ok_or_else(|| RpcError::argument("block required"))?;
///         block(args.clone())?;
///         block(args)
///     });
/// assert!(calc.responds_to("add"));
/// ```
pub struct MethodTable {
    name: String,
    methods: BTreeMap<String, Method>,
    denied: BTreeSet<String>,
    copy: Option<Value>,
}

impl MethodTable {
    /// Empty table; `name` shows up in descriptions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
            denied: BTreeSet::new(),
            copy: None,
        }
    }

    /// Register `method`.
    #[must_use]
    pub fn method<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>, Option<&Block<'_>>) -> RpcResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(method.into(), Box::new(f));
        self
    }

    /// Refuse `method` to remote callers even though it is registered.
    #[must_use]
    pub fn deny(mut self, method: impl Into<String>) -> Self {
        self.denied.insert(method.into());
        self
    }

    /// Send `copy` instead of a reference when this object is passed.
    #[must_use]
    pub fn by_value_copy(mut self, copy: Value) -> Self {
        self.copy = Some(copy);
        self
    }

    /// Check if `method` is registered.
    pub fn responds_to(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Registered method names.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl RemoteObject for MethodTable {
    fn invoke(&self, method: &str, args: Vec<Value>, block: Option<&Block<'_>>) -> RpcResult<Value> {
        match self.methods.get(method) {
            Some(f) => f(args, block),
            None => Err(RpcError::no_such_method(method)),
        }
    }

    fn permits(&self, method: &str) -> bool {
        !self.denied.contains(method)
    }

    fn by_value(&self) -> Option<Value> {
        self.copy.clone()
    }

    fn describe(&self) -> String {
        format!("#<{}>", self.name)
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("denied", &self.denied)
            .finish()
    }
}
