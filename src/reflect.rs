//! Reflection surface: how a type describes itself to the metadata cache
//!
//! Rust has no runtime reflection, so every injectable concrete type implements
//! [`Reflect`] and declares its constructors, injectable members, methods and
//! composed base type to a [`TypeBuilder`]. The cache in [`crate::ReflectionCache`]
//! turns those declarations into immutable [`TypeDescriptor`](crate::TypeDescriptor)s.
//!
//! # Example
//!
//! ```rust
//! use interject::{Inject, Reflect, TypeBuilder};
//!
//! #[derive(Default)]
//! struct Logger;
//!
//! impl Reflect for Logger {
//!     fn describe(ty: &mut TypeBuilder<Self>) {
//!         ty.constructor(|| Logger);
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Service {
//!     logger: Inject<Logger>,
//! }
//!
//! impl Reflect for Service {
//!     fn describe(ty: &mut TypeBuilder<Self>) {
//!         ty.constructor(Service::default)
//!             .field("logger", |s| &s.logger);
//!     }
//! }
//! ```

use crate::descriptor::{
    ConstructorDescriptor, MemberDescriptor, MethodDescriptor, Projection, projection,
};
use crate::patch::MethodRef;
use crate::{DiError, Injectable, Result, Value};
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased concrete object
pub type Object = Arc<dyn Any + Send + Sync>;

/// A type that can describe itself to the metadata cache.
pub trait Reflect: Injectable + Sized {
    /// Declare constructors, injectable members, methods and base type.
    fn describe(ty: &mut TypeBuilder<Self>);
}

// =============================================================================
// Type identity
// =============================================================================

/// Identity of a reflectable type, usable without knowing the type statically.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
    declare: fn() -> Declarations,
    wrap: fn(&Object) -> Option<Value>,
}

impl TypeInfo {
    /// Identity of `T`
    #[inline]
    pub fn of<T: Reflect>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            declare: declare::<T>,
            wrap: wrap_as::<T>,
        }
    }

    /// The `TypeId` of the type
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The base type declared with [`TypeBuilder::base`], if any.
    ///
    /// This runs the type's declarations; callers on hot paths should read
    /// [`TypeDescriptor::base`](crate::TypeDescriptor::base) from the cache instead.
    pub fn base(&self) -> Option<TypeInfo> {
        self.declarations().base.map(|link| link.info)
    }

    #[inline]
    pub(crate) fn declarations(&self) -> Declarations {
        (self.declare)()
    }

    #[inline]
    pub(crate) fn wrap(&self, object: &Object) -> Option<Value> {
        (self.wrap)(object)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl std::hash::Hash for TypeInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TypeInfo").field(&self.name).finish()
    }
}

fn declare<T: Reflect>() -> Declarations {
    let mut builder = TypeBuilder::<T>::new();
    T::describe(&mut builder);
    builder.finish()
}

fn wrap_as<T: Injectable>(object: &Object) -> Option<Value> {
    Arc::clone(object).downcast::<T>().ok().map(Value::new)
}

/// Identity of a constructor parameter or member type.
///
/// Unlike [`TypeInfo`] this works for trait objects, which is what members and
/// parameters usually ask for.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamInfo {
    id: TypeId,
    name: &'static str,
}

impl ParamInfo {
    /// Identity of `R`
    #[inline]
    pub fn of<R: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<R>(),
            name: std::any::type_name::<R>(),
        }
    }

    /// The `TypeId` of the type
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for ParamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

// =============================================================================
// Instances
// =============================================================================

/// A concrete object produced by the container, with its type erased.
#[derive(Clone)]
pub struct Instance {
    object: Object,
    type_id: TypeId,
    type_name: &'static str,
    wrap: fn(&Object) -> Option<Value>,
    info: Option<TypeInfo>,
}

impl Instance {
    /// Wrap an owned reflectable value
    #[inline]
    pub fn new<T: Reflect>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap a shared reflectable value
    #[inline]
    pub fn from_arc<T: Reflect>(arc: Arc<T>) -> Self {
        Self {
            object: arc as Object,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            wrap: wrap_as::<T>,
            info: Some(TypeInfo::of::<T>()),
        }
    }

    /// Wrap a value without metadata. Such instances are never injected.
    #[inline]
    pub fn opaque<T: Injectable>(arc: Arc<T>) -> Self {
        Self {
            object: arc as Object,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            wrap: wrap_as::<T>,
            info: None,
        }
    }

    pub(crate) fn from_object(object: Object, info: TypeInfo) -> Self {
        Self {
            object,
            type_id: info.id(),
            type_name: info.name(),
            wrap: info.wrap,
            info: Some(info),
        }
    }

    /// The erased object
    #[inline]
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// The object as `&dyn Any`, the form member thunks operate on
    #[inline]
    pub fn as_any(&self) -> &dyn Any {
        self.object.as_ref()
    }

    /// Typed access to the object
    #[inline]
    pub fn downcast<T: Injectable>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    /// The object as a [`Value`] of its concrete type
    #[inline]
    pub fn value(&self) -> Option<Value> {
        (self.wrap)(&self.object)
    }

    /// The concrete `TypeId`
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The concrete type name
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Metadata identity, absent for opaque instances
    #[inline]
    pub fn info(&self) -> Option<TypeInfo> {
        self.info
    }

    /// Whether both instances are the same object
    #[inline]
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name)
            .field("reflected", &self.info.is_some())
            .finish()
    }
}

// =============================================================================
// Injectable member cells
// =============================================================================

/// A member slot the container fills when it is unset.
///
/// Pre-populating the slot (for example with a test double) opts the member
/// out of injection.
pub struct Inject<R: ?Sized> {
    cell: OnceCell<Arc<R>>,
}

impl<R: ?Sized> Inject<R> {
    /// An unset slot
    #[inline]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// A slot that already holds a value and will not be injected
    #[inline]
    pub fn with(value: Arc<R>) -> Self {
        Self {
            cell: OnceCell::with_value(value),
        }
    }

    /// The injected value
    #[inline]
    pub fn get(&self) -> Option<Arc<R>> {
        self.cell.get().cloned()
    }

    /// Borrow the injected value
    #[inline]
    pub fn get_ref(&self) -> Option<&Arc<R>> {
        self.cell.get()
    }

    /// Whether the slot holds a value
    #[inline]
    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Set the slot. Returns `false` if it was already set.
    #[inline]
    pub fn set(&self, value: Arc<R>) -> bool {
        self.cell.set(value).is_ok()
    }
}

impl<R: ?Sized> Default for Inject<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ?Sized> std::fmt::Debug for Inject<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inject")
            .field("type", &std::any::type_name::<R>())
            .field("set", &self.is_set())
            .finish()
    }
}

/// A fixed-length array of member slots; only the unset elements are injected.
pub struct InjectArray<R: ?Sized> {
    slots: Box<[Inject<R>]>,
}

impl<R: ?Sized> InjectArray<R> {
    /// `len` unset slots
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Inject::new()).collect(),
        }
    }

    /// Slots pre-populated where `Some`
    pub fn from_slots(values: Vec<Option<Arc<R>>>) -> Self {
        Self {
            slots: values
                .into_iter()
                .map(|value| match value {
                    Some(value) => Inject::with(value),
                    None => Inject::new(),
                })
                .collect(),
        }
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot at `index`
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&Inject<R>> {
        self.slots.get(index)
    }

    /// The value at `index`
    #[inline]
    pub fn get(&self, index: usize) -> Option<Arc<R>> {
        self.slots.get(index).and_then(Inject::get)
    }

    /// Iterate over the slots
    pub fn iter(&self) -> impl Iterator<Item = &Inject<R>> {
        self.slots.iter()
    }

    /// Whether every slot holds a value
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Inject::is_set)
    }
}

impl<R: ?Sized> Default for InjectArray<R> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<R: ?Sized> std::fmt::Debug for InjectArray<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}

// =============================================================================
// Argument lists
// =============================================================================

/// A tuple of `Arc<P>` parameters a constructor or method takes.
pub trait ArgList: Sized + 'static {
    /// Parameter identities in order
    fn params() -> Vec<ParamInfo>;

    /// Rebuild the tuple from resolved values
    fn from_values(values: &[Value]) -> Result<Self>;
}

impl ArgList for () {
    fn params() -> Vec<ParamInfo> {
        Vec::new()
    }

    fn from_values(values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(DiError::ArgumentMismatch {
                type_name: "()",
                expected: 0,
                actual: values.len(),
            })
        }
    }
}

macro_rules! impl_arg_list {
    ($($param:ident : $index:tt),+) => {
        impl<$($param: ?Sized + Send + Sync + 'static),+> ArgList for ($(Arc<$param>,)+) {
            fn params() -> Vec<ParamInfo> {
                vec![$(ParamInfo::of::<$param>()),+]
            }

            fn from_values(values: &[Value]) -> Result<Self> {
                let expected = [$($index),+].len();
                if values.len() != expected {
                    return Err(DiError::ArgumentMismatch {
                        type_name: std::any::type_name::<Self>(),
                        expected,
                        actual: values.len(),
                    });
                }
                Ok(($(values[$index].try_get::<$param>()?,)+))
            }
        }
    };
}

impl_arg_list!(A: 0);
impl_arg_list!(A: 0, B: 1);
impl_arg_list!(A: 0, B: 1, C: 2);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_arg_list!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

// =============================================================================
// Type builder
// =============================================================================

/// Declarations of one type level, before ancestor flattening.
pub(crate) struct Declarations {
    pub(crate) constructors: Vec<ConstructorDescriptor>,
    pub(crate) fields: Vec<MemberDescriptor>,
    pub(crate) properties: Vec<MemberDescriptor>,
    pub(crate) methods: Vec<MethodDescriptor>,
    pub(crate) base: Option<BaseLink>,
}

/// The composed base type and how to reach it from the derived object.
pub(crate) struct BaseLink {
    pub(crate) info: TypeInfo,
    pub(crate) project: Projection,
}

/// Collects the declarations of `T`. Passed to [`Reflect::describe`].
pub struct TypeBuilder<T> {
    constructors: Vec<ConstructorDescriptor>,
    fields: Vec<MemberDescriptor>,
    properties: Vec<MemberDescriptor>,
    methods: Vec<MethodDescriptor>,
    base: Option<BaseLink>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Reflect> TypeBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            constructors: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            base: None,
            _marker: PhantomData,
        }
    }

    /// Declare a parameterless constructor.
    pub fn constructor<F>(&mut self, construct: F) -> &mut Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorDescriptor::new(
            std::any::type_name::<T>(),
            Vec::new(),
            Arc::new(move |args: &[Value]| {
                <() as ArgList>::from_values(args)?;
                Ok(Arc::new(construct()) as Object)
            }),
            None,
        ));
        self
    }

    /// Declare a constructor taking a tuple of `Arc<P>` parameters.
    pub fn constructor_with<A, F>(&mut self, construct: F) -> &mut Self
    where
        A: ArgList,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorDescriptor::new(
            std::any::type_name::<T>(),
            A::params(),
            Arc::new(move |args: &[Value]| Ok(Arc::new(construct(A::from_values(args)?)) as Object)),
            None,
        ));
        self
    }

    /// Declare a parameterless constructor whose native entry point may be hooked.
    ///
    /// # Safety
    ///
    /// `entry` must be a function whose compiled body is at least
    /// [`Arch::patch_len`](crate::Arch::patch_len) bytes long and is not inlined
    /// into its callers (`#[inline(never)]`). Hooking rewrites that many bytes at
    /// its entry point.
    pub unsafe fn hookable_constructor(
        &mut self,
        name: &'static str,
        entry: fn() -> Arc<T>,
    ) -> &mut Self {
        // SAFETY: forwarded from the caller's contract.
        let method = unsafe { MethodRef::constructor::<T>(name, entry) };
        self.constructors.push(ConstructorDescriptor::new(
            std::any::type_name::<T>(),
            Vec::new(),
            Arc::new(move |args: &[Value]| {
                <() as ArgList>::from_values(args)?;
                Ok(entry() as Object)
            }),
            Some(method),
        ));
        self
    }

    /// Declare a constructor taking `A` whose native entry point may be hooked.
    ///
    /// # Safety
    ///
    /// Same contract as [`TypeBuilder::hookable_constructor`] for `entry`.
    pub unsafe fn hookable_constructor_with<A: ArgList>(
        &mut self,
        name: &'static str,
        entry: fn(A) -> Arc<T>,
    ) -> &mut Self {
        // SAFETY: forwarded from the caller's contract.
        let method = unsafe { MethodRef::constructor_with::<T, A>(name, entry) };
        self.constructors.push(ConstructorDescriptor::new(
            std::any::type_name::<T>(),
            A::params(),
            Arc::new(move |args: &[Value]| Ok(entry(A::from_values(args)?) as Object)),
            Some(method),
        ));
        self
    }

    /// Declare an injectable field.
    pub fn field<R>(&mut self, name: &'static str, access: fn(&T) -> &Inject<R>) -> &mut Self
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.fields.push(MemberDescriptor::field::<T, R>(name, access));
        self
    }

    /// Declare an injectable array field; only its unset elements are injected.
    pub fn array_field<R>(
        &mut self,
        name: &'static str,
        access: fn(&T) -> &InjectArray<R>,
    ) -> &mut Self
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.fields.push(MemberDescriptor::array::<T, R>(name, access));
        self
    }

    /// Declare an injectable property backed by accessor functions.
    pub fn property<R, G, S>(&mut self, name: &'static str, get: G, set: S) -> &mut Self
    where
        R: ?Sized + Send + Sync + 'static,
        G: Fn(&T) -> Option<Arc<R>> + Send + Sync + 'static,
        S: Fn(&T, Arc<R>) + Send + Sync + 'static,
    {
        self.properties
            .push(MemberDescriptor::property::<T, R, G, S>(name, get, Some(set)));
        self
    }

    /// Declare a read-only property. It is described but never injected.
    pub fn readonly_property<R, G>(&mut self, name: &'static str, get: G) -> &mut Self
    where
        R: ?Sized + Send + Sync + 'static,
        G: Fn(&T) -> Option<Arc<R>> + Send + Sync + 'static,
    {
        self.properties.push(MemberDescriptor::property::<
            T,
            R,
            G,
            fn(&T, Arc<R>),
        >(name, get, None));
        self
    }

    /// Declare a method callable through the cache.
    pub fn method<A, O, F>(&mut self, name: &'static str, method: F) -> &mut Self
    where
        A: ArgList,
        O: Injectable,
        F: Fn(&T, A) -> O + Send + Sync + 'static,
    {
        self.methods
            .push(MethodDescriptor::new::<T, A, O, F>(name, method, None));
        self
    }

    /// Declare a method whose native entry point may be hooked.
    ///
    /// # Safety
    ///
    /// Same contract as [`TypeBuilder::hookable_constructor`] for `method`.
    pub unsafe fn hookable_method<A, O>(
        &mut self,
        name: &'static str,
        method: fn(&T, A) -> O,
    ) -> &mut Self
    where
        A: ArgList,
        O: Injectable,
    {
        // SAFETY: forwarded from the caller's contract.
        let entry = unsafe { MethodRef::method::<T, A, O>(name, method) };
        self.methods
            .push(MethodDescriptor::new::<T, A, O, _>(name, method, Some(entry)));
        self
    }

    /// Declare the composed base type whose members are inherited.
    pub fn base<B: Reflect>(&mut self, project: fn(&T) -> &B) -> &mut Self {
        self.base = Some(BaseLink {
            info: TypeInfo::of::<B>(),
            project: projection(move |object: &dyn Any| {
                object
                    .downcast_ref::<T>()
                    .map(|derived| project(derived) as &dyn Any)
            }),
        });
        self
    }

    pub(crate) fn finish(self) -> Declarations {
        Declarations {
            constructors: self.constructors,
            fields: self.fields,
            properties: self.properties,
            methods: self.methods,
            base: self.base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Engine;

    impl Reflect for Engine {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Engine);
        }
    }

    #[derive(Default)]
    struct Vehicle {
        engine: Inject<Engine>,
    }

    impl Reflect for Vehicle {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Vehicle::default)
                .field("engine", |v| &v.engine);
        }
    }

    #[derive(Default)]
    struct Truck {
        vehicle: Vehicle,
    }

    impl Reflect for Truck {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Truck::default).base(|t| &t.vehicle);
        }
    }

    #[test]
    fn test_type_info_identity() {
        let info = TypeInfo::of::<Vehicle>();
        assert_eq!(info.id(), TypeId::of::<Vehicle>());
        assert!(info.name().ends_with("Vehicle"));
        assert_eq!(info, TypeInfo::of::<Vehicle>());
        assert_ne!(info, TypeInfo::of::<Engine>());
    }

    #[test]
    fn test_type_info_base() {
        assert_eq!(TypeInfo::of::<Truck>().base(), Some(TypeInfo::of::<Vehicle>()));
        assert_eq!(TypeInfo::of::<Vehicle>().base(), None);
    }

    #[test]
    fn test_inject_cell_sets_once() {
        let slot: Inject<Engine> = Inject::new();
        assert!(!slot.is_set());
        assert!(slot.set(Arc::new(Engine)));
        assert!(!slot.set(Arc::new(Engine)));
        assert!(slot.is_set());
    }

    #[test]
    fn test_inject_array_partial() {
        let array = InjectArray::from_slots(vec![Some(Arc::new(Engine)), None]);
        assert_eq!(array.len(), 2);
        assert!(array.get(0).is_some());
        assert!(array.get(1).is_none());
        assert!(!array.is_complete());
    }

    #[test]
    fn test_arg_list_from_values() {
        let values = vec![Value::of(7i32), Value::of(true)];
        let (number, flag) = <(Arc<i32>, Arc<bool>)>::from_values(&values).unwrap();
        assert_eq!(*number, 7);
        assert!(*flag);

        let err = <(Arc<i32>,)>::from_values(&values).unwrap_err();
        assert!(matches!(err, DiError::ArgumentMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn test_instance_value_and_downcast() {
        let instance = Instance::new(Engine);
        assert!(instance.downcast::<Engine>().is_some());
        assert!(instance.downcast::<Vehicle>().is_none());
        let value = instance.value().unwrap();
        assert!(value.get::<Engine>().is_some());
        assert_eq!(instance.info(), Some(TypeInfo::of::<Engine>()));
        assert!(Instance::opaque(Arc::new(5u8)).info().is_none());
    }
}
