//! Fluent binding construction
//!
//! ```rust
//! use interject::{Container, Reflect, TypeBuilder, upcast};
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! struct FixedClock;
//!
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 {
//!         1_700_000_000
//!     }
//! }
//!
//! impl Reflect for FixedClock {
//!     fn describe(ty: &mut TypeBuilder<Self>) {
//!         ty.constructor(|| FixedClock);
//!     }
//! }
//!
//! upcast!(FixedClock => dyn Clock);
//!
//! let container = Container::new();
//! container.bind::<dyn Clock>().to::<FixedClock>().singleton().unwrap();
//!
//! let clock = container.get::<dyn Clock>().unwrap();
//! assert_eq!(clock.now(), 1_700_000_000);
//! ```

use crate::binding::{BindingRecord, ConstructorSelection, LifetimeState, Target, View};
use crate::factory::{self, Factory};
use crate::patch::MethodRef;
use crate::reflect::{ArgList, Instance, ParamInfo, Reflect, TypeInfo};
use crate::{Container, DiError, Result, Upcast, Value};
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::warn;

fn view<R, C>() -> View
where
    R: ?Sized + Send + Sync + 'static,
    C: Upcast<R>,
{
    Arc::new(|instance: &Instance| {
        instance
            .downcast::<C>()
            .map(|concrete| Value::new(Upcast::<R>::upcast(concrete)))
    })
}

/// Starts a binding for the requested type `R`. Created by [`Container::bind`].
#[must_use = "a binding is only registered once a target is chosen"]
pub struct BindingBuilder<'c, R: ?Sized> {
    container: &'c Container,
    _key: PhantomData<fn(Arc<R>)>,
}

impl<'c, R> BindingBuilder<'c, R>
where
    R: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(container: &'c Container) -> Self {
        Self {
            container,
            _key: PhantomData,
        }
    }

    /// Resolve `R` by constructing `C`
    pub fn to<C>(self) -> TargetBuilder<'c, R, C>
    where
        C: Reflect + Upcast<R>,
    {
        TargetBuilder {
            container: self.container,
            selection: None,
            intercept: None,
            error: None,
            _marker: PhantomData,
        }
    }

    /// Resolve `R` to a literal instance
    pub fn to_instance<V>(self, value: V) -> Arc<BindingRecord>
    where
        V: Upcast<R>,
    {
        self.to_shared(Arc::new(value))
    }

    /// Resolve `R` to an already shared instance
    pub fn to_shared<V>(self, value: Arc<V>) -> Arc<BindingRecord>
    where
        V: Upcast<R>,
    {
        let record = BindingRecord::new(
            ParamInfo::of::<R>(),
            Target::Instance {
                type_id: TypeId::of::<V>(),
                type_name: std::any::type_name::<V>(),
            },
            view::<R, V>(),
            LifetimeState::Instance(Instance::opaque(value)),
        );
        self.container.add_binding(Arc::new(record))
    }

    /// Resolve `R` through a factory of type `F` the container constructs once
    pub fn to_factory<F>(self) -> Arc<BindingRecord>
    where
        F: Factory + Reflect,
        F::Product: Upcast<R>,
    {
        let record = BindingRecord::new(
            ParamInfo::of::<R>(),
            Target::Factory {
                factory: TypeInfo::of::<F>(),
                product: TypeId::of::<F::Product>(),
            },
            view::<R, F::Product>(),
            LifetimeState::FactoryPending,
        )
        .with_factory_cast(factory::share_object::<F>);
        self.container.add_binding(Arc::new(record))
    }

    /// Resolve `R` through an existing factory
    pub fn to_factory_instance<F>(self, factory: F) -> Arc<BindingRecord>
    where
        F: Factory,
        F::Product: Upcast<R>,
    {
        let record = BindingRecord::new(
            ParamInfo::of::<R>(),
            Target::FactoryInstance {
                factory: std::any::type_name::<F>(),
                product: TypeId::of::<F::Product>(),
            },
            view::<R, F::Product>(),
            LifetimeState::FactoryReady(factory::share(Arc::new(factory))),
        );
        self.container.add_binding(Arc::new(record))
    }

    /// Register `R` without an implementation; resolving it fails.
    pub fn abstract_only(self) -> Arc<BindingRecord> {
        let record = BindingRecord::new(
            ParamInfo::of::<R>(),
            Target::Abstract,
            Arc::new(|_: &Instance| None),
            LifetimeState::Transient,
        );
        self.container.add_binding(Arc::new(record))
    }
}

impl<'c, R: Reflect> BindingBuilder<'c, R> {
    /// Resolve `R` by constructing `R` itself
    pub fn to_self(self) -> TargetBuilder<'c, R, R> {
        self.to::<R>()
    }
}

/// Configures how a concrete target is constructed and how long it lives.
///
/// Errors found while configuring are kept and reported by the terminal
/// [`transient`](TargetBuilder::transient) or [`singleton`](TargetBuilder::singleton) call.
#[must_use = "a binding is only registered by `transient()` or `singleton()`"]
pub struct TargetBuilder<'c, R: ?Sized, C> {
    container: &'c Container,
    selection: Option<ConstructorSelection>,
    intercept: Option<MethodRef>,
    error: Option<DiError>,
    _marker: PhantomData<(fn(Arc<R>), fn() -> C)>,
}

impl<'c, R, C> TargetBuilder<'c, R, C>
where
    R: ?Sized + Send + Sync + 'static,
    C: Reflect + Upcast<R>,
{
    /// Construct with the constructor whose parameters are `A`
    pub fn constructor<A: ArgList>(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let params = A::params();
        let types: Vec<TypeId> = params.iter().map(ParamInfo::id).collect();
        let descriptor = self.container.reflection().get::<C>();
        match descriptor.find_constructor(&types) {
            Some((index, _)) => self.selection = Some(ConstructorSelection::new(index, params)),
            None => {
                self.error = Some(DiError::ConstructorNotFound {
                    type_name: descriptor.type_name(),
                    arity: params.len(),
                });
            }
        }
        self
    }

    /// Supply constructor arguments; `None` entries are resolved by type.
    ///
    /// Without a prior [`constructor`](TargetBuilder::constructor) call, the
    /// first constructor whose arity and parameter types accept the supplied
    /// values is chosen.
    pub fn with_arguments(mut self, arguments: Vec<Option<Value>>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let selection = match self.selection.take() {
            Some(selection) => selection,
            None => {
                let descriptor = self.container.reflection().get::<C>();
                let found = descriptor.constructors().iter().position(|c| {
                    c.arity() == arguments.len()
                        && c.params().iter().zip(&arguments).all(|(param, argument)| {
                            argument
                                .as_ref()
                                .is_none_or(|value| value.held_type() == param.id())
                        })
                });
                match found {
                    Some(index) => ConstructorSelection::new(
                        index,
                        descriptor.constructors()[index].params().to_vec(),
                    ),
                    None => {
                        self.error = Some(DiError::ConstructorNotFound {
                            type_name: descriptor.type_name(),
                            arity: arguments.len(),
                        });
                        return self;
                    }
                }
            }
        };
        match selection.with_arguments(arguments) {
            Ok(selection) => self.selection = Some(selection),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Hook `original` so that calling it constructs `C` through this container.
    pub fn intercept(mut self, original: MethodRef) -> Self {
        self.intercept = Some(original);
        self
    }

    /// Hook the hookable constructor `C` declared in its [`Reflect`] impl.
    pub fn intercept_declared(mut self) -> Self {
        let declared = self
            .container
            .reflection()
            .get::<C>()
            .hookable_constructor()
            .and_then(|c| c.entry());
        match declared {
            Some(original) => self.intercept = Some(original),
            None => {
                if self.error.is_none() {
                    self.error = Some(DiError::hook_precondition(false, true));
                }
            }
        }
        self
    }

    /// Register with a new instance per resolution
    pub fn transient(self) -> Result<Arc<BindingRecord>> {
        self.commit(LifetimeState::Transient)
    }

    /// Register with one shared instance, constructed on first resolution
    pub fn singleton(self) -> Result<Arc<BindingRecord>> {
        self.commit(LifetimeState::SingletonPending)
    }

    fn commit(self, state: LifetimeState) -> Result<Arc<BindingRecord>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let record = BindingRecord::new(
            ParamInfo::of::<R>(),
            Target::Type(TypeInfo::of::<C>()),
            view::<R, C>(),
            state,
        )
        .with_constructor(self.selection);
        let bound_args = record
            .constructor()
            .and_then(ConstructorSelection::bound_arguments);
        let record = Arc::new(record);

        if let Some(original) = self.intercept {
            if let Some(existing) = self.container.local_binding(&record.type_id()) {
                #[cfg(feature = "logging")]
                warn!(
                    target: "interject",
                    binding = record.type_name(),
                    "Binding already registered; interception not installed"
                );
                return Ok(existing);
            }
            // Hooked before the binding is visible; a failed install registers nothing.
            let injected = original
                .redirect()
                .unwrap_or_else(MethodRef::interceptor::<C>);
            let hook = self
                .container
                .install_hook(Some(original), Some(injected), bound_args)?;
            record.attach_hook(hook);
        }

        let owner = self.container.add_binding(Arc::clone(&record));
        if !Arc::ptr_eq(&owner, &record) {
            if let Some(hook) = record.hook() {
                self.container.release_hook(hook);
            }
            return Ok(owner);
        }
        Ok(record)
    }
}
