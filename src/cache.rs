//! Concurrent cache of type descriptors
//!
//! Descriptors are built at most once per type and shared afterwards. The
//! cache never evicts on its own; [`ReflectionCache::remove`] and
//! [`ReflectionCache::reset`] are the only ways entries go away.

use crate::descriptor::TypeDescriptor;
use crate::reflect::{Reflect, TypeInfo};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Configuration of a [`ReflectionCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    capacity: usize,
    shard_amount: usize,
    boundaries: HashSet<TypeId>,
}

impl CacheConfig {
    /// Defaults: no pre-allocation, 8 shards, no root boundary
    pub fn new() -> Self {
        Self {
            capacity: 0,
            shard_amount: 8,
            boundaries: HashSet::new(),
        }
    }

    /// Pre-allocate room for `capacity` descriptors
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Number of map shards. Rounded up to a power of two, minimum 2.
    pub fn with_shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount.max(2).next_power_of_two();
        self
    }

    /// Stop flattening base members when `B` is reached.
    ///
    /// Members declared by `B` and its own bases are then left out of every
    /// descriptor that composes it.
    pub fn with_root_boundary<B: Reflect>(mut self) -> Self {
        self.boundaries.insert(TypeId::of::<B>());
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Type descriptors keyed by `TypeId`, safe for concurrent readers and builders.
pub struct ReflectionCache {
    entries: DashMap<TypeId, Arc<TypeDescriptor>, RandomState>,
    boundaries: HashSet<TypeId>,
}

impl ReflectionCache {
    /// Create an empty cache with the default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create an empty cache
    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher_and_shard_amount(
                config.capacity,
                RandomState::new(),
                config.shard_amount,
            ),
            boundaries: config.boundaries.clone(),
        }
    }

    /// The descriptor of `info`, building it on first use.
    ///
    /// Concurrent first requests for the same type observe a single descriptor.
    pub fn get_or_build(&self, info: TypeInfo) -> Arc<TypeDescriptor> {
        // Fast path: shared lock only
        if let Some(entry) = self.entries.get(&info.id()) {
            return Arc::clone(entry.value());
        }

        let entry = self.entries.entry(info.id()).or_insert_with(|| {
            #[cfg(feature = "logging")]
            debug!(
                target: "interject",
                type_name = info.name(),
                "Caching type descriptor"
            );
            Arc::new(TypeDescriptor::build(info, &self.boundaries))
        });
        Arc::clone(entry.value())
    }

    /// The descriptor of `T`, building it on first use
    #[inline]
    pub fn get<T: Reflect>(&self) -> Arc<TypeDescriptor> {
        self.get_or_build(TypeInfo::of::<T>())
    }

    /// The descriptor of a type if it has been built
    #[inline]
    pub fn peek(&self, type_id: &TypeId) -> Option<Arc<TypeDescriptor>> {
        self.entries.get(type_id).map(|e| Arc::clone(e.value()))
    }

    /// Whether a descriptor has been built for the type
    #[inline]
    pub fn contains(&self, type_id: &TypeId) -> bool {
        self.entries.contains_key(type_id)
    }

    /// Drop one descriptor; the next request rebuilds it
    pub fn remove(&self, type_id: &TypeId) -> bool {
        self.entries.remove(type_id).is_some()
    }

    /// Drop every descriptor
    pub fn reset(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            count = self.entries.len(),
            "Resetting reflection cache"
        );
        self.entries.clear();
    }

    /// Number of cached descriptors
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReflectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReflectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionCache")
            .field("entries", &self.entries.len())
            .field("boundaries", &self.boundaries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Inject, TypeBuilder};
    use std::thread;

    #[derive(Default)]
    struct Root {
        marker: Inject<u32>,
    }

    impl Reflect for Root {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Root::default).field("marker", |r| &r.marker);
        }
    }

    #[derive(Default)]
    struct Leaf {
        root: Root,
        name: Inject<String>,
    }

    impl Reflect for Leaf {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Leaf::default)
                .field("name", |l| &l.name)
                .base(|l| &l.root);
        }
    }

    #[test]
    fn test_descriptor_is_built_once() {
        let cache = ReflectionCache::new();
        assert!(cache.is_empty());

        let first = cache.get::<Leaf>();
        let second = cache.get_or_build(TypeInfo::of::<Leaf>());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&TypeId::of::<Leaf>()));
    }

    #[test]
    fn test_remove_and_reset() {
        let cache = ReflectionCache::new();
        let first = cache.get::<Leaf>();
        cache.get::<Root>();
        assert_eq!(cache.len(), 2);

        assert!(cache.remove(&TypeId::of::<Leaf>()));
        assert!(!cache.remove(&TypeId::of::<Leaf>()));
        let rebuilt = cache.get::<Leaf>();
        assert!(!Arc::ptr_eq(&first, &rebuilt));

        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.peek(&TypeId::of::<Root>()).is_none());
    }

    #[test]
    fn test_root_boundary_limits_members() {
        let config = CacheConfig::new().with_root_boundary::<Root>();
        let bounded = ReflectionCache::with_config(&config);
        assert_eq!(bounded.get::<Leaf>().members().count(), 1);

        let unbounded = ReflectionCache::new();
        assert_eq!(unbounded.get::<Leaf>().members().count(), 2);
    }

    #[test]
    fn test_concurrent_first_use_shares_descriptor() {
        let cache = Arc::new(ReflectionCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get::<Leaf>())
            })
            .collect();

        let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(descriptors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shard_amount_is_normalised() {
        let config = CacheConfig::new().with_shard_amount(5);
        let cache = ReflectionCache::with_config(&config);
        assert!(cache.get::<Root>().default_constructor().is_some());
    }
}
