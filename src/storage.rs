//! Binding storage for a container
//!
//! Uses DashMap for lock-free concurrent lookups by requested type, plus a
//! registration-ordered list for the assignability fallback and enumeration.

use crate::binding::BindingRecord;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::TypeId;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe storage for binding records
pub struct BindingRegistry {
    /// Map from requested TypeId to binding
    bindings: DashMap<TypeId, Arc<BindingRecord>, RandomState>,
    /// Bindings in registration order
    order: RwLock<Vec<Arc<BindingRecord>>>,
}

impl BindingRegistry {
    /// Create new empty storage with 8 shards.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create with pre-allocated capacity and shards scaled to it.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self::with_shards(capacity, shard_amount)
    }

    /// Create with explicit capacity and shard amount (a power of two).
    pub fn with_shards(capacity: usize, shard_amount: usize) -> Self {
        Self {
            bindings: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount.max(2).next_power_of_two(),
            ),
            order: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// Insert a binding unless its key is already bound.
    ///
    /// Returns the binding that owns the key afterwards and whether it is the
    /// one passed in.
    pub fn insert(&self, record: Arc<BindingRecord>) -> (Arc<BindingRecord>, bool) {
        // Lock order: the order list, then a shard.
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        match self.bindings.entry(record.type_id()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&record));
                order.push(Arc::clone(&record));
                (record, true)
            }
        }
    }

    /// Remove the binding registered exactly for `type_id`
    pub fn remove(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        let (_, record) = self.bindings.remove(type_id)?;
        order.retain(|r| !Arc::ptr_eq(r, &record));
        Some(record)
    }

    /// Binding registered exactly for `type_id`
    #[inline]
    pub fn get_exact(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        self.bindings.get(type_id).map(|r| Arc::clone(r.value()))
    }

    /// Binding for `type_id`: the exact key first, then the first binding in
    /// registration order whose concrete target is `type_id`.
    ///
    /// The fallback only narrows: a concrete request can reach an interface
    /// binding that targets it, never the other way round.
    pub fn get(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        if let Some(record) = self.get_exact(type_id) {
            return Some(record);
        }
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|record| record.target().concrete_type() == Some(*type_id))
            .cloned()
    }

    /// Check if a binding exactly for `type_id` exists
    #[inline]
    pub fn contains(&self, type_id: &TypeId) -> bool {
        self.bindings.contains_key(type_id)
    }

    /// Bindings in registration order
    pub fn records(&self) -> Vec<Arc<BindingRecord>> {
        self.order
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get number of bindings
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Remove every binding, returning them in registration order
    pub fn clear(&self) -> Vec<Arc<BindingRecord>> {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        self.bindings.clear();
        std::mem::take(&mut *order)
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("count", &self.len())
            .finish()
    }
}
