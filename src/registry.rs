//! Process-wide container registry
//!
//! A container attached to a [`Containers`] registry falls back to the other
//! attached containers, in registration order, when it has no local binding
//! for a requested type.

use crate::binding::BindingRecord;
use crate::{Container, Result};
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "logging")]
use tracing::debug;

static GLOBAL: Lazy<Containers> = Lazy::new(Containers::new);

/// An ordered set of containers that resolve on each other's behalf.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct Containers {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    containers: Mutex<Vec<Container>>,
}

impl Containers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    #[inline]
    pub fn global() -> &'static Containers {
        &GLOBAL
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    fn list(&self) -> MutexGuard<'_, Vec<Container>> {
        self.inner
            .containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Container> {
        self.list().clone()
    }

    /// Attach `container`, moving it out of any registry it was attached to.
    ///
    /// Returns `false` if it is already attached here.
    pub fn add(&self, container: &Container) -> bool {
        if let Some(previous) = container.registry() {
            if Arc::ptr_eq(&previous.inner, &self.inner) {
                return false;
            }
            previous.remove(container);
        }

        let mut list = self.list();
        if list.iter().any(|c| c.ptr_eq(container)) {
            return false;
        }
        container.attach(Arc::downgrade(&self.inner));
        list.push(container.clone());

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            container = container.id(),
            attached = list.len(),
            "Attached container to registry"
        );
        true
    }

    /// Detach `container`. Returns `false` if it was not attached here.
    pub fn remove(&self, container: &Container) -> bool {
        let mut list = self.list();
        let Some(position) = list.iter().position(|c| c.ptr_eq(container)) else {
            return false;
        };
        let removed = list.remove(position);
        removed.detach();

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            container = removed.id(),
            "Detached container from registry"
        );
        true
    }

    /// Whether `container` is attached here
    pub fn contains(&self, container: &Container) -> bool {
        self.list().iter().any(|c| c.ptr_eq(container))
    }

    /// The first local binding for `type_id` among the attached containers.
    ///
    /// Scans a snapshot of the list taken under the registry lock, so a
    /// container's own lookups never run while the lock is held.
    pub fn get(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        self.snapshot()
            .iter()
            .find_map(|container| container.binding_for(type_id))
    }

    /// Like [`Containers::get`], skipping the container with id `skip`.
    ///
    /// Containers attached or detached during the scan are not seen by it.
    pub(crate) fn get_excluding(&self, type_id: &TypeId, skip: u64) -> Option<Arc<BindingRecord>> {
        self.snapshot()
            .iter()
            .filter(|container| container.id() != skip)
            .find_map(|container| container.binding_for(type_id))
    }

    /// Resolve `R` with the first container that binds it
    pub fn resolve<R: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<R>>> {
        let id = TypeId::of::<R>();
        match self
            .snapshot()
            .into_iter()
            .find(|container| container.binding_for(&id).is_some())
        {
            Some(container) => container.resolve::<R>(),
            None => Ok(None),
        }
    }

    /// Attached containers in registration order
    pub fn containers(&self) -> Vec<Container> {
        self.snapshot()
    }

    /// Number of attached containers
    pub fn len(&self) -> usize {
        self.list().len()
    }

    /// Whether no container is attached
    pub fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    /// Detach and dispose every container, releasing their hooks
    pub fn reset(&self) {
        let detached = std::mem::take(&mut *self.list());
        for container in &detached {
            container.detach();
            container.dispose();
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            detached = detached.len(),
            "Registry reset"
        );
    }
}

impl std::fmt::Debug for Containers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u64> = self.list().iter().map(Container::id).collect();
        f.debug_struct("Containers").field("containers", &ids).finish()
    }
}
