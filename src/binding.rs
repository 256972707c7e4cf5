//! Binding records: what a requested type resolves to and how long it lives

use crate::factory::SharedFactory;
use crate::hook::HookRecord;
use crate::reflect::{Instance, Object, ParamInfo, TypeInfo};
use crate::{DiError, Result, Value};
use bitflags::bitflags;
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "logging")]
use tracing::debug;

bitflags! {
    /// Lifetime of a binding as a combination of flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LifetimeFlags: u8 {
        /// A new instance per resolution
        const TRANSIENT = 1 << 0;
        /// One shared instance
        const SINGLETON = 1 << 1;
        /// Instances come from a factory
        const FACTORY = 1 << 2;
        /// A value is cached
        const INSTANCE = 1 << 3;
    }
}

/// Current lifetime state of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Constructed on every resolution
    Transient,
    /// Singleton that has not been constructed yet
    SingletonPending,
    /// Singleton with its instance cached
    SingletonReady,
    /// Factory binding whose factory has not been constructed yet
    FactoryPending,
    /// Factory binding with its factory cached
    FactoryReady,
    /// A literal instance
    Instance,
}

impl Lifetime {
    /// The flag combination of this state
    pub fn flags(self) -> LifetimeFlags {
        match self {
            Lifetime::Transient => LifetimeFlags::TRANSIENT,
            Lifetime::SingletonPending => LifetimeFlags::SINGLETON,
            Lifetime::SingletonReady => LifetimeFlags::SINGLETON | LifetimeFlags::INSTANCE,
            Lifetime::FactoryPending => LifetimeFlags::FACTORY,
            Lifetime::FactoryReady => LifetimeFlags::FACTORY | LifetimeFlags::INSTANCE,
            Lifetime::Instance => LifetimeFlags::INSTANCE,
        }
    }
}

#[derive(Clone)]
pub(crate) enum LifetimeState {
    Transient,
    SingletonPending,
    SingletonReady(Instance),
    FactoryPending,
    FactoryReady(SharedFactory),
    Instance(Instance),
}

impl LifetimeState {
    fn lifetime(&self) -> Lifetime {
        match self {
            LifetimeState::Transient => Lifetime::Transient,
            LifetimeState::SingletonPending => Lifetime::SingletonPending,
            LifetimeState::SingletonReady(_) => Lifetime::SingletonReady,
            LifetimeState::FactoryPending => Lifetime::FactoryPending,
            LifetimeState::FactoryReady(_) => Lifetime::FactoryReady,
            LifetimeState::Instance(_) => Lifetime::Instance,
        }
    }
}

/// What a binding resolves to
#[derive(Debug, Clone)]
pub enum Target {
    /// A key with no implementation; resolving it fails
    Abstract,
    /// A reflected concrete type the container constructs
    Type(TypeInfo),
    /// A literal instance supplied at bind time
    Instance {
        type_id: TypeId,
        type_name: &'static str,
    },
    /// A factory type the container constructs once
    Factory {
        factory: TypeInfo,
        product: TypeId,
    },
    /// A factory object supplied at bind time
    FactoryInstance {
        factory: &'static str,
        product: TypeId,
    },
}

impl Target {
    /// The concrete type of the instances this target yields
    pub fn concrete_type(&self) -> Option<TypeId> {
        match self {
            Target::Abstract => None,
            Target::Type(info) => Some(info.id()),
            Target::Instance { type_id, .. } => Some(*type_id),
            Target::Factory { product, .. } | Target::FactoryInstance { product, .. } => {
                Some(*product)
            }
        }
    }

    /// The type the container instantiates for this target, if any
    pub(crate) fn instantiable(&self) -> Option<TypeInfo> {
        match self {
            Target::Type(info) => Some(*info),
            Target::Factory { factory, .. } => Some(*factory),
            _ => None,
        }
    }
}

/// A constructor chosen at bind time and its pre-supplied arguments.
///
/// `None` arguments are resolved from the container by parameter type.
#[derive(Debug, Clone)]
pub struct ConstructorSelection {
    index: usize,
    params: Vec<ParamInfo>,
    arguments: Vec<Option<Value>>,
}

impl ConstructorSelection {
    pub(crate) fn new(index: usize, params: Vec<ParamInfo>) -> Self {
        let arguments = vec![None; params.len()];
        Self {
            index,
            params,
            arguments,
        }
    }

    pub(crate) fn with_arguments(mut self, arguments: Vec<Option<Value>>) -> Result<Self> {
        if arguments.len() != self.params.len() {
            return Err(DiError::ArgumentMismatch {
                type_name: "constructor selection",
                expected: self.params.len(),
                actual: arguments.len(),
            });
        }
        for (param, argument) in self.params.iter().zip(&arguments) {
            match argument {
                Some(value) if value.held_type() != param.id() => {
                    return Err(DiError::TypeMismatch {
                        expected: param.name(),
                        found: value.type_name(),
                    });
                }
                _ => {}
            }
        }
        self.arguments = arguments;
        Ok(self)
    }

    /// Index into the descriptor's constructor list
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Parameter types of the chosen constructor
    #[inline]
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Pre-supplied arguments, `None` where the container resolves them
    #[inline]
    pub fn arguments(&self) -> &[Option<Value>] {
        &self.arguments
    }

    /// The arguments if every one was supplied at bind time
    pub fn bound_arguments(&self) -> Option<Vec<Value>> {
        self.arguments.iter().cloned().collect()
    }
}

pub(crate) type View = Arc<dyn Fn(&Instance) -> Option<Value> + Send + Sync>;
pub(crate) type FactoryCast = fn(Object) -> Option<SharedFactory>;

/// Resolution rules for one requested type.
pub struct BindingRecord {
    key: ParamInfo,
    target: Target,
    view: View,
    constructor: Option<ConstructorSelection>,
    factory_cast: Option<FactoryCast>,
    hook: OnceCell<Arc<HookRecord>>,
    state: Mutex<LifetimeState>,
}

impl BindingRecord {
    pub(crate) fn new(key: ParamInfo, target: Target, view: View, state: LifetimeState) -> Self {
        Self {
            key,
            target,
            view,
            constructor: None,
            factory_cast: None,
            hook: OnceCell::new(),
            state: Mutex::new(state),
        }
    }

    pub(crate) fn with_constructor(mut self, constructor: Option<ConstructorSelection>) -> Self {
        self.constructor = constructor;
        self
    }

    pub(crate) fn with_factory_cast(mut self, cast: FactoryCast) -> Self {
        self.factory_cast = Some(cast);
        self
    }

    /// The requested type this binding answers
    #[inline]
    pub fn key(&self) -> ParamInfo {
        self.key
    }

    /// `TypeId` of the requested type
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.key.id()
    }

    /// Name of the requested type
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.key.name()
    }

    /// What the binding resolves to
    #[inline]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Whether the binding has no implementation
    #[inline]
    pub fn is_abstract(&self) -> bool {
        matches!(self.target, Target::Abstract)
    }

    /// Whether requests for `type_id` may be answered by this binding
    pub fn answers(&self, type_id: TypeId) -> bool {
        self.key.id() == type_id || self.target.concrete_type() == Some(type_id)
    }

    /// The constructor chosen at bind time
    #[inline]
    pub fn constructor(&self) -> Option<&ConstructorSelection> {
        self.constructor.as_ref()
    }

    /// The hook installed for this binding
    #[inline]
    pub fn hook(&self) -> Option<&Arc<HookRecord>> {
        self.hook.get()
    }

    pub(crate) fn attach_hook(&self, hook: Arc<HookRecord>) -> bool {
        self.hook.set(hook).is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, LifetimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> LifetimeState {
        self.lock().clone()
    }

    /// Current lifetime state
    pub fn lifetime(&self) -> Lifetime {
        self.lock().lifetime()
    }

    /// Current lifetime as flags
    pub fn flags(&self) -> LifetimeFlags {
        self.lifetime().flags()
    }

    /// The cached instance of a ready singleton or literal binding
    pub fn cached_instance(&self) -> Option<Instance> {
        match &*self.lock() {
            LifetimeState::SingletonReady(instance) | LifetimeState::Instance(instance) => {
                Some(instance.clone())
            }
            _ => None,
        }
    }

    /// Present `instance` as the requested type `type_id`
    pub(crate) fn view_as(&self, type_id: TypeId, instance: &Instance) -> Result<Value> {
        let value = if type_id == self.key.id() {
            (self.view)(instance)
        } else {
            instance.value()
        };
        value.ok_or(DiError::TypeMismatch {
            expected: if type_id == self.key.id() {
                self.key.name()
            } else {
                "concrete binding target"
            },
            found: instance.type_name(),
        })
    }

    /// Cache a constructed singleton. The first completed instance wins.
    pub(crate) fn complete_singleton(&self, instance: Instance) -> Instance {
        let mut state = self.lock();
        match &*state {
            LifetimeState::SingletonReady(existing) => existing.clone(),
            LifetimeState::SingletonPending => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "interject",
                    binding = self.key.name(),
                    instance = instance.type_name(),
                    "Singleton ready"
                );
                *state = LifetimeState::SingletonReady(instance.clone());
                instance
            }
            _ => instance,
        }
    }

    /// Cache a constructed factory object. The first completed factory wins.
    pub(crate) fn complete_factory(&self, object: Object) -> Result<SharedFactory> {
        let cast = self
            .factory_cast
            .ok_or_else(|| DiError::Internal(format!("{} is not a factory binding", self.key.name())))?;
        let mut state = self.lock();
        if let LifetimeState::FactoryReady(existing) = &*state {
            return Ok(Arc::clone(existing));
        }
        let factory = cast(object).ok_or_else(|| {
            DiError::instantiation(self.key.name(), "constructed factory has the wrong type")
        })?;

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            binding = self.key.name(),
            factory = factory.type_name(),
            "Factory ready"
        );

        *state = LifetimeState::FactoryReady(Arc::clone(&factory));
        Ok(factory)
    }
}

impl std::fmt::Debug for BindingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRecord")
            .field("key", &self.key)
            .field("target", &self.target)
            .field("lifetime", &self.lifetime())
            .field("constructor", &self.constructor.as_ref().map(|c| c.index))
            .field("hooked", &self.hook.get().is_some())
            .finish()
    }
}
