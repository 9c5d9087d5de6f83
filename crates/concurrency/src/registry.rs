//! Resource registry
//!
//! Keyed store of [`ResourceHolder`]s, one entry per session factory.
//!
//! # Scoping
//!
//! Every thread has a current registry ([`ResourceRegistry::current`]),
//! created lazily as a root with no parent. An execution container that
//! nests inside another (a request inside an application, say) installs its
//! own registry with [`ResourceRegistry::enter`]; the previous registry comes
//! back when the returned [`RegistryScope`] is dropped.
//!
//! # Parent delegation
//!
//! `lookup` and `has_resource` fall back to the parent chain when the
//! registry has no entry of its own. The fallback is read-only and never
//! copies the parent's holder into the child. `bind` and `unbind` only touch
//! the registry they are called on.
//!
//! A child can [`hide`](ResourceRegistry::hide) a key: lookups through the
//! child then stop at it instead of reaching the parent's holder, until the
//! key is [`unhidden`](ResourceRegistry::unhide). This is how a suspended
//! transaction bound further up the chain disappears from a nested scope.
//!
//! # Thread Safety
//!
//! Entries sit behind a `parking_lot::RwLock`. A thread-scoped registry is
//! only ever mutated by its own thread, so the lock is uncontended; a parent
//! shared by several threads is read-locked while a child delegates to it.

use crate::holder::ResourceHolder;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use sessionbind_core::{Error, FactoryKey, Result};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ResourceRegistry>>> = RefCell::new(None);
}

/// Keyed store of holders with parent delegation
pub struct ResourceRegistry {
    name: String,
    entries: RwLock<FxHashMap<FactoryKey, Arc<ResourceHolder>>>,
    hidden: RwLock<FxHashSet<FactoryKey>>,
    parent: Option<Arc<ResourceRegistry>>,
}

impl ResourceRegistry {
    /// Create a root registry
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(FxHashMap::default()),
            hidden: RwLock::new(FxHashSet::default()),
            parent: None,
        }
    }

    /// Create a registry that delegates lookups to `parent`
    pub fn with_parent(name: impl Into<String>, parent: Arc<ResourceRegistry>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(FxHashMap::default()),
            hidden: RwLock::new(FxHashSet::default()),
            parent: Some(parent),
        }
    }

    /// Registry name, for log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent registry
    pub fn parent(&self) -> Option<&Arc<ResourceRegistry>> {
        self.parent.as_ref()
    }

    // ========================================================================
    // Thread scope
    // ========================================================================

    /// The calling thread's current registry
    pub fn current() -> Arc<ResourceRegistry> {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(|| Arc::new(ResourceRegistry::new("thread")))
                .clone()
        })
    }

    /// Make `registry` the calling thread's current registry
    ///
    /// The previous registry is restored when the returned scope is dropped.
    pub fn enter(registry: Arc<ResourceRegistry>) -> RegistryScope {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(registry));
        RegistryScope {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Enter a fresh child of the current registry
    pub fn enter_child(name: impl Into<String>) -> RegistryScope {
        let parent = Self::current();
        Self::enter(Arc::new(ResourceRegistry::with_parent(name, parent)))
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Bind `holder` under `key`
    ///
    /// Fails with [`Error::IllegalState`] if this registry already holds an
    /// entry for `key`. An entry in a parent registry does not count.
    pub fn bind(&self, key: FactoryKey, holder: Arc<ResourceHolder>) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            return Err(Error::IllegalState(format!(
                "already holder {:?} for key [{}] bound in registry '{}'",
                existing, key, self.name
            )));
        }
        trace!(registry = %self.name, key = %key, "bound holder");
        entries.insert(key, holder);
        Ok(())
    }

    /// Remove and return the holder bound under `key`
    ///
    /// Fails with [`Error::IllegalState`] if nothing is bound in this registry.
    pub fn unbind(&self, key: FactoryKey) -> Result<Arc<ResourceHolder>> {
        self.unbind_if_possible(key).ok_or_else(|| {
            Error::IllegalState(format!(
                "no holder for key [{}] bound in registry '{}'",
                key, self.name
            ))
        })
    }

    /// Remove and return the holder bound under `key`, if any
    pub fn unbind_if_possible(&self, key: FactoryKey) -> Option<Arc<ResourceHolder>> {
        let removed = self.entries.write().remove(&key);
        if removed.is_some() {
            trace!(registry = %self.name, key = %key, "unbound holder");
        }
        removed
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Holder bound under `key` here or, failing that, in the parent chain
    ///
    /// The walk stops at the first registry that hides `key`.
    pub fn lookup(&self, key: FactoryKey) -> Option<Arc<ResourceHolder>> {
        let mut registry = self;
        loop {
            if let Some(holder) = registry.lookup_local(key) {
                return Some(holder);
            }
            if registry.is_hidden(key) {
                return None;
            }
            registry = registry.parent.as_deref()?;
        }
    }

    /// Holder bound under `key` in this registry only
    pub fn lookup_local(&self, key: FactoryKey) -> Option<Arc<ResourceHolder>> {
        self.entries.read().get(&key).cloned()
    }

    /// Whether `key` is bound here or in the parent chain
    pub fn has_resource(&self, key: FactoryKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Whether `key` is bound in this registry
    pub fn has_local_resource(&self, key: FactoryKey) -> bool {
        self.entries.read().contains_key(&key)
    }

    // ========================================================================
    // Hiding
    // ========================================================================

    /// Stop lookups through this registry from reaching a parent's holder
    /// for `key`
    ///
    /// A holder bound locally is still found. Returns `false` if `key` was
    /// already hidden here.
    pub fn hide(&self, key: FactoryKey) -> bool {
        let inserted = self.hidden.write().insert(key);
        if inserted {
            trace!(registry = %self.name, key = %key, "hid parent holder");
        }
        inserted
    }

    /// Let lookups for `key` reach the parent chain again
    ///
    /// Returns `false` if `key` was not hidden here.
    pub fn unhide(&self, key: FactoryKey) -> bool {
        let removed = self.hidden.write().remove(&key);
        if removed {
            trace!(registry = %self.name, key = %key, "unhid parent holder");
        }
        removed
    }

    /// Whether `key` is hidden in this registry
    pub fn is_hidden(&self, key: FactoryKey) -> bool {
        self.hidden.read().contains(&key)
    }

    /// Number of local entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether this registry has no local entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys bound locally
    pub fn keys(&self) -> Vec<FactoryKey> {
        self.entries.read().keys().copied().collect()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("name", &self.name)
            .field("entries", &self.len())
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish()
    }
}

/// Guard restoring the previous thread registry on drop
///
/// Not `Send`: it must be dropped on the thread that created it.
#[must_use = "the registry is only current while the scope is alive"]
pub struct RegistryScope {
    previous: Option<Arc<ResourceRegistry>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RegistryScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}
