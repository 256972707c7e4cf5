//! Factory capability for bindings whose instances are produced on demand
//!
//! A factory binding caches the factory object, never its products: every
//! resolution calls [`Factory::create_instance`] again and injects the result.

use crate::binding::BindingRecord;
use crate::reflect::{Instance, Object, Reflect};
use crate::Result;
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Produces instances for a binding.
pub trait Factory: Send + Sync + 'static {
    /// The type of the produced instances
    type Product: Reflect;

    /// Produce a new instance. The container injects it afterwards.
    fn create_instance(&self, binding: &BindingRecord) -> Result<Self::Product>;
}

/// Adapts a closure into a [`Factory`].
///
/// ```rust
/// use interject::{Container, FnFactory, Reflect, TypeBuilder};
///
/// struct Ticket(u32);
///
/// impl Reflect for Ticket {
///     fn describe(ty: &mut TypeBuilder<Self>) {
///         ty.constructor(|| Ticket(0));
///     }
/// }
///
/// let container = Container::new();
/// container
///     .bind::<Ticket>()
///     .to_factory_instance(FnFactory::new(|_| Ok(Ticket(7))));
///
/// assert_eq!(container.get::<Ticket>().unwrap().0, 7);
/// ```
pub struct FnFactory<P, F> {
    produce: F,
    _product: PhantomData<fn() -> P>,
}

impl<P, F> FnFactory<P, F>
where
    P: Reflect,
    F: Fn(&BindingRecord) -> Result<P> + Send + Sync + 'static,
{
    /// Wrap `produce`
    pub fn new(produce: F) -> Self {
        Self {
            produce,
            _product: PhantomData,
        }
    }
}

impl<P, F> Factory for FnFactory<P, F>
where
    P: Reflect,
    F: Fn(&BindingRecord) -> Result<P> + Send + Sync + 'static,
{
    type Product = P;

    #[inline]
    fn create_instance(&self, binding: &BindingRecord) -> Result<P> {
        (self.produce)(binding)
    }
}

/// A factory with its product type erased.
pub(crate) trait ErasedFactory: Send + Sync {
    fn produce(&self, binding: &BindingRecord) -> Result<Instance>;

    fn type_name(&self) -> &'static str;
}

pub(crate) type SharedFactory = Arc<dyn ErasedFactory>;

struct FactoryHandle<F> {
    factory: Arc<F>,
}

impl<F: Factory> ErasedFactory for FactoryHandle<F> {
    fn produce(&self, binding: &BindingRecord) -> Result<Instance> {
        #[cfg(feature = "logging")]
        trace!(
            target: "interject",
            factory = std::any::type_name::<F>(),
            binding = binding.type_name(),
            "Producing factory instance"
        );
        Ok(Instance::new(self.factory.create_instance(binding)?))
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<F>()
    }
}

/// Erase a factory object
pub(crate) fn share<F: Factory>(factory: Arc<F>) -> SharedFactory {
    Arc::new(FactoryHandle { factory })
}

/// Recover and erase a factory object built by the container
pub(crate) fn share_object<F: Factory>(object: Object) -> Option<SharedFactory> {
    object.downcast::<F>().ok().map(share)
}
