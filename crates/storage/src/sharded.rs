//! Committed entity storage
//!
//! DashMap keyed by label, FxHashMap of entities within each label.
//!
//! # Design
//!
//! - DashMap: sharded by label, lock-free reads
//! - FxHashMap: O(1) lookups by entity id
//! - Per-label shards: sessions touching different labels never contend
//!
//! Only committed state lives here. Transactions buffer their
//! [`Mutation`]s and hand them to [`ShardedStore::apply`] on commit.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sessionbind_core::{Entity, EntityId};
use std::sync::atomic::{AtomicU64, Ordering};

/// A buffered write
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or replace; the entity carries its id
    Put(Entity),
    /// Remove by label and id
    Delete {
        /// Label of the removed entity
        label: String,
        /// Id of the removed entity
        id: EntityId,
    },
}

impl Mutation {
    /// Label the mutation touches
    pub fn label(&self) -> &str {
        match self {
            Mutation::Put(entity) => &entity.label,
            Mutation::Delete { label, .. } => label,
        }
    }
}

/// Entities of one label
#[derive(Debug, Default)]
pub struct LabelShard {
    pub(crate) entities: FxHashMap<EntityId, Entity>,
}

impl LabelShard {
    /// Number of entities in this shard
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if shard is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Label-sharded committed state
///
/// # Thread Safety
///
/// - `get`/`scan`: lock-free read via DashMap
/// - `apply`: serialized by a commit lock, so a batch never interleaves with
///   another batch
pub struct ShardedStore {
    shards: DashMap<String, LabelShard>,
    next_id: AtomicU64,
    commit_lock: Mutex<()>,
}

impl ShardedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            next_id: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// Allocate an entity id
    #[inline]
    pub fn next_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of labels with data
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total entities across all labels
    pub fn total_entries(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().len()).sum()
    }

    /// Get a committed entity
    #[inline]
    pub fn get(&self, label: &str, id: EntityId) -> Option<Entity> {
        self.shards
            .get(label)
            .and_then(|shard| shard.entities.get(&id).cloned())
    }

    /// Whether a committed entity exists
    #[inline]
    pub fn contains(&self, label: &str, id: EntityId) -> bool {
        self.shards
            .get(label)
            .map(|shard| shard.entities.contains_key(&id))
            .unwrap_or(false)
    }

    /// Committed entities of `label`, sorted by id
    pub fn scan(&self, label: &str) -> Vec<Entity> {
        self.shards
            .get(label)
            .map(|shard| {
                let mut results: Vec<_> = shard.entities.values().cloned().collect();
                results.sort_by_key(|e| e.id);
                results
            })
            .unwrap_or_default()
    }

    /// Number of committed entities of `label`
    pub fn count(&self, label: &str) -> usize {
        self.shards.get(label).map(|shard| shard.len()).unwrap_or(0)
    }

    /// Apply a batch of mutations in order
    pub fn apply(&self, mutations: &[Mutation]) {
        let _guard = self.commit_lock.lock();
        for mutation in mutations {
            match mutation {
                Mutation::Put(entity) => {
                    // Entities reach the store with ids assigned by the session
                    if let Some(id) = entity.id {
                        self.shards
                            .entry(entity.label.clone())
                            .or_default()
                            .entities
                            .insert(id, entity.clone());
                    }
                }
                Mutation::Delete { label, id } => {
                    if let Some(mut shard) = self.shards.get_mut(label.as_str()) {
                        shard.entities.remove(id);
                    }
                }
            }
        }
    }

    /// Remove every entity of `label`
    pub fn clear_label(&self, label: &str) -> bool {
        self.shards.remove(label).is_some()
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shard_count", &self.shard_count())
            .field("total_entries", &self.total_entries())
            .finish()
    }
}
