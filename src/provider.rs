//! Provider traits and the type-erased dependency handle
//!
//! These traits define what types can be injected, how a concrete type is
//! viewed through the abstract type it is bound to, and how resolved
//! dependencies travel through the resolver without generics.

use crate::{DiError, Result};
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Marker trait for types that can be injected via the DI container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {
    /// Returns the TypeId of this type (for internal use)
    #[inline]
    fn type_id_of() -> TypeId
    where
        Self: Sized,
    {
        TypeId::of::<Self>()
    }

    /// Returns the type name for debugging
    #[inline]
    fn type_name_of() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Conversion of a shared concrete instance into the abstract type it is bound to.
///
/// Every type converts to itself. Conversions to trait objects are declared with
/// the [`upcast!`](crate::upcast) macro, which is what makes
/// `container.bind::<dyn Trait>().to::<Concrete>()` type-check.
pub trait Upcast<R: ?Sized>: Injectable {
    /// Convert the shared instance
    fn upcast(self: Arc<Self>) -> Arc<R>;
}

impl<T: Injectable> Upcast<T> for T {
    #[inline]
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Declare that a concrete type can be bound to one or more trait objects.
///
/// # Examples
///
/// ```rust
/// use interject::upcast;
///
/// trait Rotate: Send + Sync {
///     fn angle(&self) -> f32;
/// }
///
/// struct Spinner;
///
/// impl Rotate for Spinner {
///     fn angle(&self) -> f32 {
///         90.0
///     }
/// }
///
/// upcast!(Spinner => dyn Rotate);
/// ```
#[macro_export]
macro_rules! upcast {
    ($concrete:ty => $($abstract:ty),+ $(,)?) => {
        $(
            impl $crate::Upcast<$abstract> for $concrete {
                #[inline]
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$abstract> {
                    self
                }
            }
        )+
    };
}

/// A resolved dependency with its static type erased.
///
/// A `Value` holds an `Arc<R>` for the type `R` it was created for, where `R`
/// may be a trait object. Constructor arguments, member setters and the scope
/// map all exchange `Value`s; the typed view is recovered with [`Value::get`].
#[derive(Clone)]
pub struct Value {
    handle: Arc<dyn Any + Send + Sync>,
    held: TypeId,
    type_name: &'static str,
    address: usize,
}

impl Value {
    /// Wrap a shared handle
    #[inline]
    pub fn new<R: ?Sized + Send + Sync + 'static>(arc: Arc<R>) -> Self {
        let address = Arc::as_ptr(&arc) as *const () as usize;
        Self {
            handle: Arc::new(arc),
            held: TypeId::of::<R>(),
            type_name: std::any::type_name::<R>(),
            address,
        }
    }

    /// Wrap an owned value
    #[inline]
    pub fn of<T: Injectable>(value: T) -> Self {
        Self::new(Arc::new(value))
    }

    /// Recover the typed handle, if this value holds an `Arc<R>`
    #[inline]
    pub fn get<R: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<R>> {
        self.handle.downcast_ref::<Arc<R>>().cloned()
    }

    /// Recover the typed handle or report what was found instead
    #[inline]
    pub fn try_get<R: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<R>> {
        self.get::<R>()
            .ok_or_else(|| DiError::type_mismatch::<R>(self.type_name))
    }

    /// The `TypeId` of the type this value was created for
    #[inline]
    pub fn held_type(&self) -> TypeId {
        self.held
    }

    /// The name of the type this value was created for
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether both values refer to the same object
    #[inline]
    pub fn ptr_eq(&self, other: &Value) -> bool {
        self.address == other.address
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.type_name)
            .field("address", &format_args!("{:#x}", self.address))
            .finish()
    }
}
