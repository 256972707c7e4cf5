//! Per-resolution scope
//!
//! Every top-level resolve or inject call runs in a fresh scope. The scope
//! shares instances produced during the traversal, tracks the bindings whose
//! construction is under way, and queues member injections that wait on them.

use crate::binding::BindingRecord;
use crate::descriptor::MemberDescriptor;
use crate::reflect::Instance;
use crate::Value;
use ahash::RandomState;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope(u64);

impl Scope {
    /// Generate a new unique scope ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// A member whose value is still under construction.
pub(crate) struct Deferred {
    pub(crate) owner: Instance,
    pub(crate) member: MemberDescriptor,
    pub(crate) requested: TypeId,
    pub(crate) awaiting: Arc<BindingRecord>,
}

/// State of one resolution traversal.
pub(crate) struct ScopedInstances {
    scope: Scope,
    values: HashMap<TypeId, Value, RandomState>,
    constructing: Vec<TypeId>,
    deferred: Vec<Deferred>,
}

impl ScopedInstances {
    pub(crate) fn new() -> Self {
        Self {
            scope: Scope::new(),
            values: HashMap::with_hasher(RandomState::new()),
            constructing: Vec::new(),
            deferred: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    #[inline]
    pub(crate) fn get(&self, type_id: &TypeId) -> Option<Value> {
        self.values.get(type_id).cloned()
    }

    #[inline]
    pub(crate) fn insert(&mut self, type_id: TypeId, value: Value) {
        self.values.entry(type_id).or_insert(value);
    }

    #[inline]
    pub(crate) fn is_constructing(&self, binding: &TypeId) -> bool {
        self.constructing.contains(binding)
    }

    pub(crate) fn begin(&mut self, binding: TypeId) {
        self.constructing.push(binding);
    }

    pub(crate) fn end(&mut self, binding: &TypeId) {
        if let Some(position) = self.constructing.iter().rposition(|b| b == binding) {
            self.constructing.remove(position);
        }
    }

    pub(crate) fn defer(&mut self, deferred: Deferred) {
        #[cfg(feature = "logging")]
        trace!(
            target: "interject",
            scope = %self.scope,
            owner = deferred.owner.type_name(),
            member = deferred.member.name(),
            awaiting = deferred.awaiting.type_name(),
            "Deferring member injection"
        );
        self.deferred.push(deferred);
    }

    /// Remove and return the injections waiting on `binding`
    pub(crate) fn take_deferred(&mut self, binding: &TypeId) -> Vec<Deferred> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|d| d.awaiting.type_id() == *binding);
        self.deferred = waiting;
        ready
    }

    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.deferred.len()
    }
}
