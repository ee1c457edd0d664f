//! Per-connection object tables.
//!
//! `local` anchors every object the peer may hold a proxy for; `remote`
//! deduplicates proxies so that one remote identity maps to one proxy.
//! Nothing here performs I/O.

use std::collections::HashMap;
use std::sync::Weak;

use crate::error::{RpcError, RpcResult};
use crate::proxy::{Proxy, ProxyInner};
use crate::value::Handle;
use crate::wire::ObjectId;

pub(crate) struct ObjectTables {
    root: Option<Handle>,
    local: HashMap<ObjectId, Handle>,
    identities: HashMap<usize, ObjectId>,
    remote: HashMap<ObjectId, Weak<ProxyInner>>,
    next_id: u64,
}

impl ObjectTables {
    pub(crate) fn new(root: Option<Handle>) -> Self {
        Self {
            root,
            local: HashMap::new(),
            identities: HashMap::new(),
            remote: HashMap::new(),
            next_id: 1,
        }
    }

    /// Export `handle`, reusing its id if it was exported before.
    pub(crate) fn add_local(&mut self, handle: Handle) -> ObjectId {
        let identity = handle.identity();
        if let Some(id) = self.identities.get(&identity) {
            return *id;
        }
        let id = ObjectId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.identities.insert(identity, id);
        self.local.insert(id, handle);
        id
    }

    /// Drop an exported entry. Unknown ids and the root id are ignored.
    pub(crate) fn delete_local(&mut self, id: ObjectId) -> Option<Handle> {
        if id.is_root() {
            return None;
        }
        let handle = self.local.remove(&id)?;
        if self.identities.get(&handle.identity()) == Some(&id) {
            self.identities.remove(&handle.identity());
        }
        Some(handle)
    }

    /// Resolve an id the peer sent back to us.
    pub(crate) fn lookup_local(&self, id: ObjectId) -> RpcResult<Handle> {
        if id.is_root() {
            return self
                .root
                .clone()
                .ok_or_else(|| RpcError::reference_not_found("No root object exported"));
        }
        self.local
            .get(&id)
            .cloned()
            .ok_or_else(|| RpcError::reference_not_found(format!("Receiver {id} not found")))
    }

    #[cfg(test)]
    pub(crate) fn has_local(&self, id: ObjectId) -> bool {
        self.local.contains_key(&id)
    }

    pub(crate) fn exported_count(&self) -> usize {
        self.local.len()
    }

    /// Existing live proxy for `id`, or a new one built by `create`.
    pub(crate) fn remote_object(
        &mut self,
        id: ObjectId,
        create: impl FnOnce() -> Proxy,
    ) -> Proxy {
        match self.remote.get(&id).and_then(Weak::upgrade) {
            Some(inner) => Proxy::from_inner(inner),
            None => self.add_remote(id, create),
        }
    }

    pub(crate) fn add_remote(&mut self, id: ObjectId, create: impl FnOnce() -> Proxy) -> Proxy {
        let proxy = create();
        self.remote.insert(id, proxy.downgrade());
        proxy
    }

    /// Forget a dead proxy's entry.
    ///
    /// Returns `false` when a live proxy for `id` took the slot meanwhile, in
    /// which case the peer's object is still needed.
    pub(crate) fn forget_remote(&mut self, id: ObjectId) -> bool {
        match self.remote.get(&id) {
            Some(weak) if weak.strong_count() > 0 => false,
            Some(_) => {
                self.remote.remove(&id);
                true
            }
            None => true,
        }
    }

    pub(crate) fn proxy_count(&self) -> usize {
        self.remote
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Empty every table, handing the exported objects back so they can be
    /// dropped outside the lock.
    pub(crate) fn clear(&mut self) -> Vec<Handle> {
        self.identities.clear();
        self.remote.clear();
        let mut dropped: Vec<Handle> = self.local.drain().map(|(_, handle)| handle).collect();
        dropped.extend(self.root.take());
        dropped
    }
}
