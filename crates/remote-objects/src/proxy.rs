//! Transparent stand-ins for remote objects.

use core::fmt;
use std::sync::{Arc, Weak};

use crate::connection::{CallMode, Shared};
use crate::error::{RpcError, RpcResult};
use crate::security::is_internal;
use crate::value::{Block, RemoteObject, Value};
use crate::wire::ObjectId;

/// Proxy for an object exported by the peer of a connection.
///
/// Cloning a proxy is cheap and keeps the same identity. At most one live
/// proxy allocation exists per (connection, remote id); when its last clone
/// is dropped the peer is told to release the object.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

pub(crate) struct ProxyInner {
    id: ObjectId,
    conn: Arc<Shared>,
    /// The root proxy is never released.
    tracked: bool,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if self.tracked {
            self.conn.queue_release(self.id);
        }
    }
}

impl Proxy {
    pub(crate) fn root(conn: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                id: ObjectId::ROOT,
                conn,
                tracked: false,
            }),
        }
    }

    pub(crate) fn tracked(id: ObjectId, conn: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                id,
                conn,
                tracked: true,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ProxyInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn belongs_to(&self, conn: &Shared) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner.conn), conn)
    }

    /// Id of the object in the peer's tables.
    pub fn remote_id(&self) -> ObjectId {
        self.inner.id
    }

    /// Identity of this proxy allocation.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Check if both proxies are the same allocation.
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check if the owning connection is still usable.
    pub fn is_connected(&self) -> bool {
        !self.inner.conn.is_closed()
    }

    /// Call `method` on the remote object.
    pub fn call(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.call_with_block(method, args, None)
    }

    /// Call `method`, passing a block the remote side may yield to.
    ///
    /// The block runs on the calling thread, possibly several times, before
    /// this returns.
    pub fn call_with_block(
        &self,
        method: &str,
        args: Vec<Value>,
        block: Option<&Block<'_>>,
    ) -> RpcResult<Value> {
        self.dispatch(method, args, block, CallMode::Plain)
    }

    /// Call `method` and ask for the result by reference.
    ///
    /// Only honored when the peer enabled by-reference calls; otherwise
    /// the result comes back as a plain call's would.
    pub fn call_by_ref(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.dispatch(method, args, None, CallMode::ByRef)
    }

    /// Fetch the remote object itself, without invoking anything.
    pub fn resolve(&self) -> RpcResult<Value> {
        self.inner
            .conn
            .call(self.inner.id, None, Vec::new(), None, CallMode::Plain)
    }

    fn dispatch(
        &self,
        method: &str,
        args: Vec<Value>,
        block: Option<&Block<'_>>,
        mode: CallMode,
    ) -> RpcResult<Value> {
        // underscore calls stay local
        if is_internal(method) {
            return Err(RpcError::no_such_method(method));
        }
        self.inner
            .conn
            .call(self.inner.id, Some(method), args, block, mode)
    }
}

impl RemoteObject for Proxy {
    fn invoke(&self, method: &str, args: Vec<Value>, block: Option<&Block<'_>>) -> RpcResult<Value> {
        self.call_with_block(method, args, block)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Proxy {}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("remote_id", &self.inner.id)
            .field("connection", &self.inner.conn.serial())
            .finish()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#<remote {} on connection {}>",
            self.inner.id,
            self.inner.conn.serial()
        )
    }
}
