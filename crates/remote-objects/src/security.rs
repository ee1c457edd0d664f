//! Method-level access control for inbound calls.
//!
//! Every inbound call passes three checks before it reaches the target:
//!
//! 1. names starting with [`INTERNAL_MARKER`] are never callable remotely;
//! 2. the connection's [`SecurityPolicy`] must allow the method;
//! 3. the target's own [`RemoteObject::permits`] must allow it.
//!
//! A rejected call fails with [`RpcError::SecurityViolation`] and the
//! target is never touched.
//!
//! [`RemoteObject::permits`]: crate::value::RemoteObject::permits

use std::collections::BTreeSet;

use crate::error::{RpcError, RpcResult};
use crate::value::Handle;

/// Prefix marking a method as local-only.
pub const INTERNAL_MARKER: char = '_';

/// Methods rejected by [`DenyList::default`].
pub const DEFAULT_DENIED: [&str; 2] = ["send", "public_send"];

/// Check if `method` is local-only.
pub fn is_internal(method: &str) -> bool {
    method.starts_with(INTERNAL_MARKER)
}

/// Decides which method names a peer may invoke.
pub trait SecurityPolicy: Send + Sync {
    /// Whether `method` may be invoked by the peer.
    fn allowed(&self, method: &str) -> bool;
}

impl<F> SecurityPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn allowed(&self, method: &str) -> bool {
        self(method)
    }
}

/// Allow everything except a fixed set of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyList {
    denied: BTreeSet<String>,
}

impl DenyList {
    /// Deny exactly `methods`.
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// Also deny `method`.
    #[must_use]
    pub fn deny(mut self, method: impl Into<String>) -> Self {
        self.denied.insert(method.into());
        self
    }

    /// Denied names, sorted.
    pub fn denied(&self) -> impl Iterator<Item = &str> {
        self.denied.iter().map(String::as_str)
    }
}

impl Default for DenyList {
    fn default() -> Self {
        Self::new(DEFAULT_DENIED)
    }
}

impl SecurityPolicy for DenyList {
    fn allowed(&self, method: &str) -> bool {
        !self.denied.contains(method)
    }
}

/// Allow only a fixed set of names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    allowed: BTreeSet<String>,
}

impl AllowList {
    /// Allow exactly `methods`.
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// Also allow `method`.
    #[must_use]
    pub fn allow(mut self, method: impl Into<String>) -> Self {
        self.allowed.insert(method.into());
        self
    }
}

impl SecurityPolicy for AllowList {
    fn allowed(&self, method: &str) -> bool {
        self.allowed.contains(method)
    }
}

/// Allow every method. Internal methods stay blocked regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllowAll;

impl SecurityPolicy for AllowAll {
    fn allowed(&self, _method: &str) -> bool {
        true
    }
}

pub(crate) fn check_inbound(
    policy: &dyn SecurityPolicy,
    target: &Handle,
    method: &str,
) -> RpcResult<()> {
    if is_internal(method) {
        return Err(RpcError::SecurityViolation(format!(
            "internal method '{method}' cannot be called remotely"
        )));
    }
    if !policy.allowed(method) || !target.permits(method) {
        return Err(RpcError::security_violation(method));
    }
    Ok(())
}
