//! Dependency injection container
//!
//! The `Container` owns bindings, the type metadata cache and the hooks it
//! installed. Cloning a `Container` yields another handle to the same
//! container; the hooks are removed when the last handle is dropped.

use crate::binding::BindingRecord;
use crate::builder::BindingBuilder;
use crate::cache::{CacheConfig, ReflectionCache};
use crate::descriptor::TypeDescriptor;
use crate::hook::{self, HookRecord};
use crate::hook_container::hooks;
use crate::patch::MethodRef;
use crate::reflect::{Instance, ParamInfo, Reflect, TypeInfo};
use crate::registry::{Containers, RegistryInner};
use crate::resolver::Resolver;
use crate::scope::ScopedInstances;
use crate::storage::BindingRegistry;
use crate::{DiError, Result, Value};
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, error, trace};

/// Configuration of a [`Container`]
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    capacity: usize,
    shard_amount: Option<usize>,
    cache: CacheConfig,
    registry: Option<Containers>,
}

impl ContainerConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate room for `capacity` bindings
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Number of binding map shards, instead of one scaled to the capacity
    pub fn with_shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = Some(shard_amount);
        self
    }

    /// Configuration of the type metadata cache
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Attach new containers to `registry`
    pub fn with_registry(mut self, registry: &Containers) -> Self {
        self.registry = Some(registry.clone());
        self
    }
}

/// Dependency injection container.
///
/// # Examples
///
/// ```rust
/// use interject::{Container, Inject, Reflect, TypeBuilder};
///
/// #[derive(Default)]
/// struct Database;
///
/// impl Reflect for Database {
///     fn describe(ty: &mut TypeBuilder<Self>) {
///         ty.constructor(|| Database);
///     }
/// }
///
/// #[derive(Default)]
/// struct UserService {
///     db: Inject<Database>,
/// }
///
/// impl Reflect for UserService {
///     fn describe(ty: &mut TypeBuilder<Self>) {
///         ty.constructor(UserService::default).field("db", |s| &s.db);
///     }
/// }
///
/// let container = Container::new();
/// container.bind::<Database>().to_self().singleton().unwrap();
/// container.bind::<UserService>().to_self().transient().unwrap();
///
/// let service = container.get::<UserService>().unwrap();
/// assert!(service.db.is_set());
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    id: u64,
    bindings: BindingRegistry,
    cache: ReflectionCache,
    hooks: Mutex<Vec<Arc<HookRecord>>>,
    registry: RwLock<Weak<RegistryInner>>,
    disposed: AtomicBool,
}

impl Container {
    /// Create a new container.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(&ContainerConfig::default())
    }

    /// Create a container with the given configuration.
    pub fn with_config(config: &ContainerConfig) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            container = id,
            capacity = config.capacity,
            "Creating container"
        );

        let bindings = match config.shard_amount {
            Some(shards) => BindingRegistry::with_shards(config.capacity, shards),
            None => BindingRegistry::with_capacity(config.capacity),
        };
        let container = Self {
            inner: Arc::new(ContainerInner {
                id,
                bindings,
                cache: ReflectionCache::with_config(&config.cache),
                hooks: Mutex::new(Vec::new()),
                registry: RwLock::new(Weak::new()),
                disposed: AtomicBool::new(false),
            }),
        };
        if let Some(registry) = &config.registry {
            registry.add(&container);
        }
        container
    }

    pub(crate) fn from_inner(inner: Arc<ContainerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContainerInner> {
        Arc::downgrade(&self.inner)
    }

    /// Unique container id
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether both handles refer to the same container
    #[inline]
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            Err(DiError::Disposed)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// Start a binding for the requested type `R`.
    #[inline]
    pub fn bind<R: ?Sized + Send + Sync + 'static>(&self) -> BindingBuilder<'_, R> {
        BindingBuilder::new(self)
    }

    /// Register a binding unless its requested type is already bound.
    ///
    /// Returns the binding that answers the type afterwards; the first binding
    /// for a type always wins.
    pub fn add_binding(&self, record: Arc<BindingRecord>) -> Arc<BindingRecord> {
        let (owner, inserted) = self.inner.bindings.insert(record);

        #[cfg(feature = "logging")]
        if inserted {
            debug!(
                target: "interject",
                container = self.inner.id,
                binding = owner.type_name(),
                lifetime = ?owner.lifetime(),
                "Registered binding"
            );
        } else {
            trace!(
                target: "interject",
                container = self.inner.id,
                binding = owner.type_name(),
                "Binding already registered; keeping the first"
            );
        }
        #[cfg(not(feature = "logging"))]
        let _ = inserted;

        owner
    }

    /// Remove the local binding registered for `R`, unhooking its hook if any.
    pub fn unbind<R: ?Sized + 'static>(&self) -> Option<Arc<BindingRecord>> {
        let record = self.inner.bindings.remove(&TypeId::of::<R>())?;
        if let Some(hook) = record.hook() {
            self.release_hook(hook);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            container = self.inner.id,
            binding = record.type_name(),
            "Removed binding"
        );
        Some(record)
    }

    /// The local binding that answers `R`
    #[inline]
    pub fn binding<R: ?Sized + 'static>(&self) -> Option<Arc<BindingRecord>> {
        self.binding_for(&TypeId::of::<R>())
    }

    /// The local binding that answers `type_id`: exact key first, then the
    /// first binding whose concrete target is `type_id`.
    #[inline]
    pub fn binding_for(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        self.inner.bindings.get(type_id)
    }

    /// The local binding registered exactly for `type_id`
    pub(crate) fn local_binding(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        self.inner.bindings.get_exact(type_id)
    }

    /// Local binding first, then the registry this container is attached to.
    pub(crate) fn lookup(&self, type_id: &TypeId) -> Option<Arc<BindingRecord>> {
        self.binding_for(type_id).or_else(|| {
            self.registry()
                .and_then(|registry| registry.get_excluding(type_id, self.inner.id))
        })
    }

    /// All local bindings in registration order
    pub fn bindings(&self) -> Vec<Arc<BindingRecord>> {
        self.inner.bindings.records()
    }

    /// Whether `R` can be resolved, here or through the attached registry
    #[inline]
    pub fn contains<R: ?Sized + 'static>(&self) -> bool {
        self.lookup(&TypeId::of::<R>()).is_some()
    }

    /// Number of local bindings
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.bindings.len()
    }

    /// Whether there are no local bindings
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.bindings.is_empty()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `R`. `Ok(None)` when no binding answers it.
    pub fn resolve<R: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<R>>> {
        match self.resolve_value(ParamInfo::of::<R>())? {
            Some(value) => value.try_get::<R>().map(Some),
            None => Ok(None),
        }
    }

    /// Resolve `R`, failing with [`DiError::NotFound`] when nothing answers it.
    pub fn get<R: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<R>> {
        self.resolve::<R>()?.ok_or_else(DiError::not_found::<R>)
    }

    /// Resolve `R`, discarding errors
    #[inline]
    pub fn try_get<R: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<R>> {
        self.resolve::<R>().ok().flatten()
    }

    /// Resolve a type known only at runtime
    pub fn resolve_value(&self, requested: ParamInfo) -> Result<Option<Value>> {
        self.ensure_live()?;
        let mut scope = ScopedInstances::new();

        #[cfg(feature = "logging")]
        trace!(
            target: "interject",
            container = self.inner.id,
            type_name = requested.name(),
            scope = %scope.scope(),
            "Resolving"
        );

        Resolver::new(self).resolve(requested, &mut scope)
    }

    /// Resolve a constructor argument list in one traversal.
    ///
    /// `Some` entries are taken as they are; `None` entries are resolved by the
    /// parameter type at the same position.
    pub fn resolve_arguments(
        &self,
        supplied: &[Option<Value>],
        params: &[ParamInfo],
    ) -> Result<Vec<Value>> {
        self.ensure_live()?;
        let mut scope = ScopedInstances::new();
        Resolver::new(self).resolve_arguments("argument list", supplied, params, &mut scope)
    }

    /// Inject the unset members of an existing object.
    pub fn inject<T: Reflect>(&self, instance: &Arc<T>) -> Result<()> {
        self.inject_instance(&Instance::from_arc(Arc::clone(instance)))
    }

    /// Inject the unset members of an erased object
    pub fn inject_instance(&self, instance: &Instance) -> Result<()> {
        self.ensure_live()?;
        let mut scope = ScopedInstances::new();
        Resolver::new(self).inject(instance, &mut scope)
    }

    /// Inject the unset members of an object reachable only by reference.
    ///
    /// A member that would have to wait for its own owner is a
    /// [`DiError::CircularDependency`] here.
    pub fn inject_ref<T: Reflect>(&self, object: &T) -> Result<()> {
        self.ensure_live()?;
        let mut scope = ScopedInstances::new();
        Resolver::new(self).inject_borrowed(object, TypeInfo::of::<T>(), &mut scope)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// The type metadata cache
    #[inline]
    pub fn reflection(&self) -> &ReflectionCache {
        &self.inner.cache
    }

    /// The descriptor of `T`
    #[inline]
    pub fn describe<T: Reflect>(&self) -> Arc<TypeDescriptor> {
        self.inner.cache.get::<T>()
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Patch `original` to jump to `injected` and record the hook on this container.
    pub fn install_hook(
        &self,
        original: Option<MethodRef>,
        injected: Option<MethodRef>,
        bound_args: Option<Vec<Value>>,
    ) -> Result<Arc<HookRecord>> {
        self.ensure_live()?;
        hook::install_hook(self, original, injected, bound_args)
    }

    /// Hook the hookable method `name` of `T`. Each call then runs the
    /// original and injects the receiver through this container.
    pub fn intercept_method<T: Reflect>(&self, name: &str) -> Result<Arc<HookRecord>> {
        let descriptor = self.describe::<T>();
        let method = descriptor
            .find_method(name)
            .ok_or_else(|| DiError::MethodNotFound {
                type_name: descriptor.type_name(),
                method: name.to_string(),
            })?;
        let original = method.entry();
        self.install_hook(original, original.and_then(|m| m.redirect()), None)
    }

    fn hook_list(&self) -> MutexGuard<'_, Vec<Arc<HookRecord>>> {
        self.inner.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hooks installed by this container
    pub fn hooks(&self) -> Vec<Arc<HookRecord>> {
        self.hook_list().clone()
    }

    pub(crate) fn remember_hook(&self, record: Arc<HookRecord>) {
        self.hook_list().push(record);
    }

    pub(crate) fn forget_hook(&self, id: u64) {
        self.hook_list().retain(|r| r.id() != id);
    }

    /// Unhook `hook` and drop it from this container and the global index
    pub(crate) fn release_hook(&self, hook: &Arc<HookRecord>) {
        self.forget_hook(hook.id());
        release_hooks(vec![Arc::clone(hook)]);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Remove every binding, unhook every hook and empty the metadata cache.
    pub fn clear(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            container = self.inner.id,
            bindings = self.inner.bindings.len(),
            "Clearing container"
        );

        let released = std::mem::take(&mut *self.hook_list());
        release_hooks(released);
        self.inner.bindings.clear();
        self.inner.cache.reset();
    }

    /// Clear the container, detach it from its registry and refuse further use.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry() {
            registry.remove(self);
        }
        self.clear();
    }

    /// Whether [`Container::dispose`] was called
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// The registry this container is attached to
    pub fn registry(&self) -> Option<Containers> {
        let link = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade();
        link.map(Containers::from_inner)
    }

    pub(crate) fn attach(&self, registry: Weak<RegistryInner>) {
        *self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = registry;
    }

    pub(crate) fn detach(&self) {
        self.attach(Weak::new());
    }
}

fn release_hooks(records: Vec<Arc<HookRecord>>) {
    for record in records {
        if let Err(_err) = record.unhook() {
            #[cfg(feature = "logging")]
            error!(
                target: "interject",
                hook = record.id(),
                error = %_err,
                "Failed to unhook"
            );
        }
        hooks().remove(&record);
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        let released = std::mem::take(
            self.hooks
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            container = self.id,
            hooks = released.len(),
            "Dropping container"
        );

        release_hooks(released);
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("bindings", &self.inner.bindings.len())
            .field("descriptors", &self.inner.cache.len())
            .field("hooks", &self.hook_list().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Lifetime, LifetimeFlags};
    use crate::factory::{Factory, FnFactory};
    use crate::{Inject, InjectArray, TypeBuilder};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    trait Logger: Send + Sync {
        fn log(&self, message: &str) -> String;
    }

    #[derive(Default)]
    struct ConsoleLogger;

    impl Logger for ConsoleLogger {
        fn log(&self, message: &str) -> String {
            format!("[console] {message}")
        }
    }

    impl Reflect for ConsoleLogger {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(ConsoleLogger::default);
        }
    }

    crate::upcast!(ConsoleLogger => dyn Logger);

    #[derive(Default)]
    struct Repository {
        logger: Inject<dyn Logger>,
    }

    impl Reflect for Repository {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Repository::default)
                .field("logger", |r| &r.logger);
        }
    }

    #[derive(Default)]
    struct Service {
        repository: Inject<Repository>,
        logger: Inject<dyn Logger>,
        audit: Inject<dyn Logger>,
    }

    impl Reflect for Service {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Service::default)
                .field("repository", |s| &s.repository)
                .field("logger", |s| &s.logger)
                .property("audit", |s: &Service| s.audit.get(), |s: &Service, l| {
                    s.audit.set(l);
                });
        }
    }

    #[test]
    fn test_resolve_unbound_is_none() {
        let container = Container::new();
        assert!(container.resolve::<Service>().unwrap().is_none());
        let err = container.get::<Service>().err().unwrap();
        assert!(err.is_not_found());
        assert!(container.try_get::<Service>().is_none());
    }

    #[test]
    fn test_transient_produces_distinct_instances() {
        let container = Container::new();
        container.bind::<ConsoleLogger>().to_self().transient().unwrap();
        let a = container.get::<ConsoleLogger>().unwrap();
        let b = container.get::<ConsoleLogger>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_singleton_is_cached() {
        let container = Container::new();
        let record = container
            .bind::<dyn Logger>()
            .to::<ConsoleLogger>()
            .singleton()
            .unwrap();
        assert_eq!(record.flags(), LifetimeFlags::SINGLETON);

        let a = container.get::<dyn Logger>().unwrap();
        let b = container.get::<dyn Logger>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(record.lifetime(), Lifetime::SingletonReady);
        assert!(record.flags().contains(LifetimeFlags::INSTANCE));
        assert_eq!(a.log("hi"), "[console] hi");
    }

    #[test]
    fn test_members_are_injected_and_shared_within_scope() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().transient().unwrap();
        container.bind::<Repository>().to_self().transient().unwrap();
        container.bind::<Service>().to_self().transient().unwrap();

        let service = container.get::<Service>().unwrap();
        let repository = service.repository.get().unwrap();
        let logger = service.logger.get().unwrap();
        let audit = service.audit.get().unwrap();

        // Transient, but one instance per traversal
        assert!(Arc::ptr_eq(&logger, &repository.logger.get().unwrap()));
        assert!(Arc::ptr_eq(&logger, &audit));

        let again = container.get::<Service>().unwrap();
        assert!(!Arc::ptr_eq(&logger, &again.logger.get().unwrap()));
    }

    #[test]
    fn test_concrete_request_falls_back_to_binding() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();

        let concrete = container.get::<ConsoleLogger>().unwrap();
        let abstract_logger = container.get::<dyn Logger>().unwrap();
        assert_eq!(
            Arc::as_ptr(&concrete) as *const (),
            Arc::as_ptr(&abstract_logger) as *const ()
        );
    }

    #[test]
    fn test_preset_member_is_not_overwritten() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().transient().unwrap();

        let preset: Arc<dyn Logger> = Arc::new(ConsoleLogger);
        let repository = Arc::new(Repository {
            logger: Inject::with(Arc::clone(&preset)),
        });
        container.inject(&repository).unwrap();
        assert!(Arc::ptr_eq(&repository.logger.get().unwrap(), &preset));
    }

    #[test]
    fn test_missing_member_binding_leaves_member_unset() {
        let container = Container::new();
        container.bind::<Repository>().to_self().transient().unwrap();
        let repository = container.get::<Repository>().unwrap();
        assert!(!repository.logger.is_set());
    }

    #[test]
    fn test_literal_instance_binding() {
        let container = Container::new();
        let record = container
            .bind::<dyn Logger>()
            .to_instance(ConsoleLogger);
        assert_eq!(record.lifetime(), Lifetime::Instance);
        let a = container.get::<dyn Logger>().unwrap();
        let b = container.get::<dyn Logger>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_abstract_binding_fails_to_resolve() {
        let container = Container::new();
        container.bind::<dyn Logger>().abstract_only();
        let err = container.resolve::<dyn Logger>().err().unwrap();
        assert!(matches!(err, DiError::Instantiation { .. }));
    }

    struct Sequence {
        value: usize,
        logger: Inject<dyn Logger>,
    }

    impl Reflect for Sequence {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Sequence {
                value: 0,
                logger: Inject::new(),
            })
            .field("logger", |s| &s.logger);
        }
    }

    #[derive(Default)]
    struct SequenceFactory {
        issued: AtomicUsize,
    }

    impl Reflect for SequenceFactory {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(SequenceFactory::default);
        }
    }

    impl Factory for SequenceFactory {
        type Product = Sequence;

        fn create_instance(&self, _binding: &BindingRecord) -> Result<Sequence> {
            Ok(Sequence {
                value: self.issued.fetch_add(1, Ordering::SeqCst) + 1,
                logger: Inject::new(),
            })
        }
    }

    #[test]
    fn test_factory_binding_creates_every_time() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();
        let record = container.bind::<Sequence>().to_factory::<SequenceFactory>();
        assert_eq!(record.lifetime(), Lifetime::FactoryPending);

        let first = container.get::<Sequence>().unwrap();
        assert_eq!(record.lifetime(), Lifetime::FactoryReady);
        let second = container.get::<Sequence>().unwrap();
        assert_eq!(first.value, 1);
        assert_eq!(second.value, 2);
        assert!(first.logger.is_set());
        assert!(second.logger.is_set());
    }

    #[test]
    fn test_factory_instance_binding() {
        let container = Container::new();
        container
            .bind::<Sequence>()
            .to_factory_instance(FnFactory::new(|_: &BindingRecord| {
                Ok(Sequence {
                    value: 42,
                    logger: Inject::new(),
                })
            }));
        assert_eq!(container.get::<Sequence>().unwrap().value, 42);
    }

    struct Parent {
        child: Arc<Child>,
    }

    #[derive(Default)]
    struct Child {
        parent: Inject<Parent>,
    }

    impl Reflect for Parent {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor_with(|(child,): (Arc<Child>,)| Parent { child });
        }
    }

    impl Reflect for Child {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Child::default).field("parent", |c| &c.parent);
        }
    }

    #[test]
    fn test_member_cycle_is_deferred() {
        let container = Container::new();
        container
            .bind::<Parent>()
            .to_self()
            .constructor::<(Arc<Child>,)>()
            .transient()
            .unwrap();
        container.bind::<Child>().to_self().transient().unwrap();

        let parent = container.get::<Parent>().unwrap();
        let back = parent.child.parent.get().unwrap();
        assert!(Arc::ptr_eq(&parent, &back));
    }

    struct Left {
        _right: Arc<Right>,
    }

    struct Right {
        _left: Arc<Left>,
    }

    impl Reflect for Left {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor_with(|(right,): (Arc<Right>,)| Left { _right: right });
        }
    }

    impl Reflect for Right {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor_with(|(left,): (Arc<Left>,)| Right { _left: left });
        }
    }

    #[test]
    fn test_constructor_cycle_is_an_error() {
        let container = Container::new();
        container
            .bind::<Left>()
            .to_self()
            .constructor::<(Arc<Right>,)>()
            .transient()
            .unwrap();
        container
            .bind::<Right>()
            .to_self()
            .constructor::<(Arc<Left>,)>()
            .transient()
            .unwrap();

        let err = container.get::<Left>().err().unwrap();
        assert!(matches!(err, DiError::CircularDependency { .. }));
    }

    #[test]
    fn test_unresolvable_constructor_argument() {
        let container = Container::new();
        container
            .bind::<Left>()
            .to_self()
            .constructor::<(Arc<Right>,)>()
            .transient()
            .unwrap();
        let err = container.get::<Left>().err().unwrap();
        assert!(matches!(err, DiError::Instantiation { .. }));
        assert!(err.to_string().contains("parameter 0"));
    }

    struct Pool {
        workers: InjectArray<dyn Logger>,
    }

    impl Reflect for Pool {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Pool {
                workers: InjectArray::from_slots(vec![
                    None,
                    Some(Arc::new(ConsoleLogger) as Arc<dyn Logger>),
                    None,
                ]),
            })
            .array_field("workers", |p| &p.workers);
        }
    }

    #[test]
    fn test_array_elements_are_resolved_independently() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().transient().unwrap();
        container.bind::<Pool>().to_self().transient().unwrap();

        let pool = container.get::<Pool>().unwrap();
        assert!(pool.workers.is_complete());
        let first = pool.workers.get(0).unwrap();
        let last = pool.workers.get(2).unwrap();
        assert!(!Arc::ptr_eq(&first, &last));
    }

    struct Broken;

    impl Reflect for Broken {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor_with(|(_,): (Arc<u8>,)| Broken);
        }
    }

    #[derive(Default)]
    struct NeedsBroken {
        broken: Inject<Broken>,
    }

    impl Reflect for NeedsBroken {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(NeedsBroken::default).field("broken", |n| &n.broken);
        }
    }

    #[test]
    fn test_member_failure_is_reported_with_context() {
        let container = Container::new();
        container.bind::<Broken>().to_self().transient().unwrap();
        container.bind::<NeedsBroken>().to_self().transient().unwrap();

        let err = container.get::<NeedsBroken>().err().unwrap();
        match err {
            DiError::Injection { member, source, .. } => {
                assert_eq!(member, "broken");
                assert!(matches!(*source, DiError::Instantiation { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_arguments_batch() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().transient().unwrap();

        let args = container
            .resolve_arguments(
                &[Some(Value::of(7u32)), None],
                &[ParamInfo::of::<u32>(), ParamInfo::of::<dyn Logger>()],
            )
            .unwrap();
        assert_eq!(*args[0].get::<u32>().unwrap(), 7);
        assert!(args[1].get::<dyn Logger>().is_some());

        let err = container
            .resolve_arguments(&[None], &[ParamInfo::of::<String>()])
            .unwrap_err();
        assert!(matches!(err, DiError::Instantiation { .. }));
    }

    #[test]
    fn test_concurrent_singleton_resolution() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = container.clone();
                thread::spawn(move || c.get::<dyn Logger>().unwrap())
            })
            .collect();
        let loggers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = container.get::<dyn Logger>().unwrap();
        assert!(loggers.iter().any(|l| Arc::ptr_eq(l, &cached)));
        assert!(Arc::ptr_eq(&cached, &container.get::<dyn Logger>().unwrap()));
    }

    #[test]
    fn test_clear_and_dispose() {
        let container = Container::new();
        container.bind::<ConsoleLogger>().to_self().transient().unwrap();
        container.get::<ConsoleLogger>().unwrap();
        assert!(!container.reflection().is_empty());

        container.clear();
        assert!(container.is_empty());
        assert!(container.reflection().is_empty());

        container.dispose();
        assert!(container.is_disposed());
        assert!(matches!(
            container.resolve::<ConsoleLogger>(),
            Err(DiError::Disposed)
        ));
    }

    #[test]
    fn test_unbind_removes_only_that_binding() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();
        container.bind::<Repository>().to_self().transient().unwrap();

        let removed = container.unbind::<dyn Logger>().unwrap();
        assert_eq!(removed.type_id(), TypeId::of::<dyn Logger>());
        assert!(container.unbind::<dyn Logger>().is_none());
        assert_eq!(container.len(), 1);

        let repository = container.get::<Repository>().unwrap();
        assert!(!repository.logger.is_set());

        // The key is free again
        container.bind::<dyn Logger>().to_instance(ConsoleLogger);
        assert_eq!(container.binding::<dyn Logger>().unwrap().lifetime(), Lifetime::Instance);
    }

    #[test]
    fn test_inject_ref_fills_borrowed_object() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();

        let repository = Repository::default();
        container.inject_ref(&repository).unwrap();
        assert!(repository.logger.is_set());

        container.dispose();
        assert!(matches!(
            container.inject_ref(&Repository::default()),
            Err(DiError::Disposed)
        ));
    }

    #[inline(never)]
    fn make_needs_broken() -> Arc<NeedsBroken> {
        Arc::new(NeedsBroken::default())
    }

    #[test]
    fn test_intercepted_injection_failure_is_reported() {
        let container = Container::new();
        container.bind::<Broken>().to_self().transient().unwrap();
        let original =
            unsafe { MethodRef::constructor::<NeedsBroken>("make_needs_broken", make_needs_broken) };
        let record = Arc::new(HookRecord::new(
            original,
            MethodRef::interceptor::<NeedsBroken>(),
            None,
            crate::patch::Arch::X64,
            container.downgrade(),
        ));

        let err = record.intercept::<NeedsBroken>().err().unwrap();
        assert!(matches!(err, DiError::Injection { member: "broken", .. }));

        // The trampoline has no caller to hand the error to
        hooks().add(TypeInfo::of::<NeedsBroken>(), Arc::clone(&record));
        let outcome = std::panic::catch_unwind(|| {
            crate::hook::intercept_constructor::<NeedsBroken>();
        });
        hooks().remove(&record);
        assert!(outcome.is_err());
    }

    struct Ticket {
        label: Arc<String>,
        logger: Inject<dyn Logger>,
    }

    #[inline(never)]
    fn make_ticket((label,): (Arc<String>,)) -> Arc<Ticket> {
        Arc::new(Ticket {
            label: std::hint::black_box(label),
            logger: Inject::new(),
        })
    }

    impl Reflect for Ticket {
        fn describe(ty: &mut TypeBuilder<Self>) {
            // SAFETY: never patched in these tests.
            unsafe { ty.hookable_constructor_with("make_ticket", make_ticket) };
            ty.field("logger", |t| &t.logger);
        }
    }

    #[test]
    fn test_intercepted_constructor_receives_caller_arguments() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();

        let original = container
            .describe::<Ticket>()
            .hookable_constructor()
            .and_then(|c| c.entry())
            .unwrap();
        assert!(original.has_signature::<fn((Arc<String>,)) -> Arc<Ticket>>());
        let injected = original.redirect().unwrap();
        assert!(injected.has_signature::<fn((Arc<String>,)) -> Arc<Ticket>>());

        let record = HookRecord::new(original, injected, None, crate::patch::Arch::X64, container.downgrade());
        let ticket = record
            .intercept_with::<Ticket, (Arc<String>,)>((Arc::new(String::from("caller")),))
            .unwrap();
        assert_eq!(*ticket.label, "caller");
        assert!(ticket.logger.is_set());

        let bound = HookRecord::new(
            original,
            injected,
            Some(vec![Value::of(String::from("bound"))]),
            crate::patch::Arch::X64,
            container.downgrade(),
        );
        let ticket = bound
            .intercept_with::<Ticket, (Arc<String>,)>((Arc::new(String::from("caller")),))
            .unwrap();
        assert_eq!(*ticket.label, "bound");

        let err = record.intercept::<Ticket>().err().unwrap();
        assert!(matches!(err, DiError::HookSignature { method: "make_ticket", .. }));
    }

    struct Meter {
        total: AtomicUsize,
        logger: Inject<dyn Logger>,
    }

    #[inline(never)]
    fn add_reading(meter: &Meter, (step,): (Arc<usize>,)) -> usize {
        std::hint::black_box(format!("reading {step}"));
        meter.total.fetch_add(*step, Ordering::SeqCst) + *step
    }

    impl Reflect for Meter {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Meter {
                total: AtomicUsize::new(0),
                logger: Inject::new(),
            })
            .field("logger", |m| &m.logger)
            .method("total", |m: &Meter, (): ()| m.total.load(Ordering::SeqCst));
            // SAFETY: `add_reading` is never inlined and formats a string, so
            // its body is longer than a patched jump.
            unsafe { ty.hookable_method("add_reading", add_reading) };
        }
    }

    #[test]
    fn test_intercepted_method_injects_receiver() {
        let container = Container::new();
        container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();

        let original = container
            .describe::<Meter>()
            .find_method("add_reading")
            .and_then(|m| m.entry())
            .unwrap();
        let injected = original.redirect().unwrap();
        let record = HookRecord::new(original, injected, None, crate::patch::Arch::X64, container.downgrade());

        let meter = Meter {
            total: AtomicUsize::new(1),
            logger: Inject::new(),
        };
        let total = record
            .intercept_method::<Meter, (Arc<usize>,), usize>(&meter, (Arc::new(2),))
            .unwrap();
        assert_eq!(total, 3);
        assert!(meter.logger.is_set());
    }

    #[test]
    fn test_intercept_method_requires_hookable_method() {
        let container = Container::new();
        let err = container.intercept_method::<Meter>("missing").err().unwrap();
        assert!(matches!(err, DiError::MethodNotFound { .. }));

        let err = container.intercept_method::<Meter>("total").err().unwrap();
        assert!(matches!(
            err,
            DiError::HookPrecondition { original: "missing", injected: "missing" }
        ));
        assert!(container.hooks().is_empty());
    }

    #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
    mod interception {
        use super::*;

        struct Gadget {
            label: String,
            logger: Inject<dyn Logger>,
        }

        #[inline(never)]
        fn make_gadget() -> Arc<Gadget> {
            Arc::new(Gadget {
                label: std::hint::black_box(String::from("gadget")),
                logger: Inject::new(),
            })
        }

        impl Reflect for Gadget {
            fn describe(ty: &mut TypeBuilder<Self>) {
                // SAFETY: `make_gadget` is never inlined and its body is far
                // longer than a patched jump.
                unsafe { ty.hookable_constructor("make_gadget", make_gadget) };
                ty.field("logger", |g| &g.logger);
            }
        }

        #[test]
        fn test_intercepted_constructor_is_injected_until_dropped() {
            let make: fn() -> Arc<Gadget> = std::hint::black_box(make_gadget as fn() -> Arc<Gadget>);

            let container = Container::new();
            container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();
            let record = container
                .bind::<Gadget>()
                .to_self()
                .intercept_declared()
                .transient()
                .unwrap();
            let hook = record.hook().cloned().unwrap();
            assert!(hook.is_hooked());
            assert_eq!(container.hooks().len(), 1);

            let gadget = make();
            assert_eq!(gadget.label, "gadget");
            assert!(gadget.logger.is_set());
            assert!(hook.is_hooked());

            let resolved = container.get::<Gadget>().unwrap();
            assert!(resolved.logger.is_set());

            drop(record);
            drop(container);
            assert!(!hook.is_hooked());

            let plain = make();
            assert!(!plain.logger.is_set());
        }

        struct Widget {
            name: String,
            logger: Inject<dyn Logger>,
        }

        #[inline(never)]
        fn make_widget() -> Arc<Widget> {
            Arc::new(Widget {
                name: std::hint::black_box(String::from("widget")),
                logger: Inject::new(),
            })
        }

        impl Reflect for Widget {
            fn describe(ty: &mut TypeBuilder<Self>) {
                // SAFETY: `make_widget` is never inlined and its body is far
                // longer than a patched jump.
                unsafe { ty.hookable_constructor("make_widget", make_widget) };
                ty.field("logger", |w| &w.logger);
            }
        }

        #[test]
        fn test_second_container_cannot_hook_the_same_constructor() {
            let make: fn() -> Arc<Widget> = std::hint::black_box(make_widget as fn() -> Arc<Widget>);
            let entry = unsafe { MethodRef::new::<fn() -> Arc<Widget>>("make_widget", make_widget as usize) }
                .entry();
            let pristine = unsafe { crate::patch::read_code(entry, 12) };

            let first = Container::new();
            let second = Container::new();
            for container in [&first, &second] {
                container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();
            }
            first
                .bind::<Widget>()
                .to_self()
                .intercept_declared()
                .transient()
                .unwrap();
            let err = second
                .bind::<Widget>()
                .to_self()
                .intercept_declared()
                .transient()
                .err()
                .unwrap();
            assert!(matches!(err, DiError::AlreadyHooked { method: "make_widget", .. }));
            assert!(second.binding::<Widget>().is_none());
            assert!(second.hooks().is_empty());

            let widget = make();
            assert_eq!(widget.name, "widget");
            assert!(widget.logger.is_set());

            drop(first);
            assert_eq!(unsafe { crate::patch::read_code(entry, 12) }, pristine);
            assert!(!make().logger.is_set());

            let record = second
                .bind::<Widget>()
                .to_self()
                .intercept_declared()
                .transient()
                .unwrap();
            assert_eq!(record.hook().and_then(|h| h.saved_bytes()), Some(pristine.clone()));
            assert!(make().logger.is_set());

            drop(record);
            drop(second);
            assert_eq!(unsafe { crate::patch::read_code(entry, 12) }, pristine);
        }

        struct Badge {
            owner: Arc<String>,
            logger: Inject<dyn Logger>,
        }

        #[inline(never)]
        fn make_badge((owner,): (Arc<String>,)) -> Arc<Badge> {
            Arc::new(Badge {
                owner: std::hint::black_box(owner),
                logger: Inject::new(),
            })
        }

        impl Reflect for Badge {
            fn describe(ty: &mut TypeBuilder<Self>) {
                // SAFETY: as for `make_widget`.
                unsafe { ty.hookable_constructor_with("make_badge", make_badge) };
                ty.field("logger", |b| &b.logger);
            }
        }

        #[test]
        fn test_intercepted_constructor_with_arguments() {
            let make: fn((Arc<String>,)) -> Arc<Badge> =
                std::hint::black_box(make_badge as fn((Arc<String>,)) -> Arc<Badge>);

            let container = Container::new();
            container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();
            let record = container
                .bind::<Badge>()
                .to_self()
                .intercept_declared()
                .transient()
                .unwrap();
            assert!(record.hook().is_some_and(|h| h.is_hooked()));

            let badge = make((Arc::new(String::from("ada")),));
            assert_eq!(*badge.owner, "ada");
            assert!(badge.logger.is_set());

            drop(record);
            drop(container);
            assert!(!make((Arc::new(String::from("bob")),)).logger.is_set());
        }

        struct Gauge {
            readings: AtomicUsize,
            logger: Inject<dyn Logger>,
        }

        #[inline(never)]
        fn record_reading(gauge: &Gauge, (value,): (Arc<usize>,)) -> usize {
            std::hint::black_box(format!("reading {value}"));
            gauge.readings.fetch_add(1, Ordering::SeqCst) + 1
        }

        impl Reflect for Gauge {
            fn describe(ty: &mut TypeBuilder<Self>) {
                ty.constructor(|| Gauge {
                    readings: AtomicUsize::new(0),
                    logger: Inject::new(),
                })
                .field("logger", |g| &g.logger);
                // SAFETY: `record_reading` is never inlined and formats a
                // string, so its body is longer than a patched jump.
                unsafe { ty.hookable_method("record_reading", record_reading) };
            }
        }

        #[test]
        fn test_intercepted_method_until_removed() {
            let call: fn(&Gauge, (Arc<usize>,)) -> usize =
                std::hint::black_box(record_reading as fn(&Gauge, (Arc<usize>,)) -> usize);

            let container = Container::new();
            container.bind::<dyn Logger>().to::<ConsoleLogger>().singleton().unwrap();
            let hook = container.intercept_method::<Gauge>("record_reading").unwrap();
            assert!(hook.is_hooked());

            let gauge = Gauge {
                readings: AtomicUsize::new(0),
                logger: Inject::new(),
            };
            assert_eq!(call(&gauge, (Arc::new(7),)), 1);
            assert!(gauge.logger.is_set());

            hook.remove().unwrap();
            let plain = Gauge {
                readings: AtomicUsize::new(0),
                logger: Inject::new(),
            };
            assert_eq!(call(&plain, (Arc::new(7),)), 1);
            assert!(!plain.logger.is_set());
        }
    }
}
