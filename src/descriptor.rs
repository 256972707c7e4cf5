//! Immutable type descriptors built from [`Reflect`](crate::Reflect) declarations
//!
//! A descriptor holds the constructors, injectable members and methods of one
//! type. Members declared by composed base types are flattened into the
//! derived descriptor, so injection never walks the base chain itself.

use crate::patch::MethodRef;
use crate::reflect::{ArgList, Inject, InjectArray, Object, ParamInfo, TypeInfo};
use crate::{DiError, Injectable, Result, Value};
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Moves from a derived object to one of its composed bases.
pub(crate) type Projection =
    Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;

pub(crate) fn projection<F>(project: F) -> Projection
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(project)
}

fn compose(outer: Projection, inner: Projection) -> Projection {
    projection(move |object: &dyn Any| outer(object).and_then(|middle| inner(middle)))
}

pub(crate) type ConstructorThunk = Arc<dyn Fn(&[Value]) -> Result<Object> + Send + Sync>;
type MethodThunk = Arc<dyn Fn(&dyn Any, &[Value]) -> Result<Value> + Send + Sync>;
type Getter = Arc<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;
type Setter = Arc<dyn Fn(&dyn Any, Value) -> Result<()> + Send + Sync>;
type ElementCount = Arc<dyn Fn(&dyn Any) -> usize + Send + Sync>;
type ElementGetter = Arc<dyn Fn(&dyn Any, usize) -> Option<Value> + Send + Sync>;
type ElementSetter = Arc<dyn Fn(&dyn Any, usize, Value) -> Result<()> + Send + Sync>;

fn wrong_receiver<T>() -> DiError {
    DiError::TypeMismatch {
        expected: std::any::type_name::<T>(),
        found: "a different receiver",
    }
}

// =============================================================================
// Constructors
// =============================================================================

/// A constructor of a reflected type.
#[derive(Clone)]
pub struct ConstructorDescriptor {
    owner: &'static str,
    params: Vec<ParamInfo>,
    invoke: ConstructorThunk,
    entry: Option<MethodRef>,
}

impl ConstructorDescriptor {
    pub(crate) fn new(
        owner: &'static str,
        params: Vec<ParamInfo>,
        invoke: ConstructorThunk,
        entry: Option<MethodRef>,
    ) -> Self {
        Self {
            owner,
            params,
            invoke,
            entry,
        }
    }

    /// Parameter types in declaration order
    #[inline]
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Number of parameters
    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether the constructor takes no parameters
    #[inline]
    pub fn is_parameterless(&self) -> bool {
        self.params.is_empty()
    }

    /// Whether the parameter types are exactly `types`
    pub fn matches(&self, types: &[TypeId]) -> bool {
        self.params.len() == types.len()
            && self.params.iter().zip(types).all(|(p, t)| p.id() == *t)
    }

    /// The hookable entry point, if declared with one
    #[inline]
    pub fn entry(&self) -> Option<MethodRef> {
        self.entry
    }

    /// Construct a new object from already-resolved arguments.
    pub fn invoke(&self, args: &[Value]) -> Result<Object> {
        if args.len() != self.params.len() {
            return Err(DiError::ArgumentMismatch {
                type_name: self.owner,
                expected: self.params.len(),
                actual: args.len(),
            });
        }
        (self.invoke)(args)
    }
}

impl std::fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructorDescriptor")
            .field("owner", &self.owner)
            .field("params", &self.params)
            .field("hookable", &self.entry.is_some())
            .finish()
    }
}

// =============================================================================
// Members
// =============================================================================

/// Whether a member is a field or a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Property,
}

#[derive(Clone)]
enum Access {
    Single {
        get: Getter,
        set: Option<Setter>,
    },
    Array {
        len: ElementCount,
        get: ElementGetter,
        set: ElementSetter,
    },
}

/// An injectable field or property.
#[derive(Clone)]
pub struct MemberDescriptor {
    name: &'static str,
    kind: MemberKind,
    value_type: ParamInfo,
    owner: &'static str,
    access: Access,
}

impl MemberDescriptor {
    pub(crate) fn field<T, R>(name: &'static str, access: fn(&T) -> &Inject<R>) -> Self
    where
        T: Injectable,
        R: ?Sized + Send + Sync + 'static,
    {
        let get: Getter = Arc::new(move |object: &dyn Any| {
            object
                .downcast_ref::<T>()
                .and_then(|owner| access(owner).get())
                .map(Value::new)
        });
        let set: Setter = Arc::new(move |object: &dyn Any, value: Value| {
            let owner = object
                .downcast_ref::<T>()
                .ok_or_else(|| wrong_receiver::<T>())?;
            // Losing a race against another writer leaves the slot populated.
            access(owner).set(value.try_get::<R>()?);
            Ok(())
        });
        Self {
            name,
            kind: MemberKind::Field,
            value_type: ParamInfo::of::<R>(),
            owner: std::any::type_name::<T>(),
            access: Access::Single {
                get,
                set: Some(set),
            },
        }
    }

    pub(crate) fn array<T, R>(name: &'static str, access: fn(&T) -> &InjectArray<R>) -> Self
    where
        T: Injectable,
        R: ?Sized + Send + Sync + 'static,
    {
        let len: ElementCount = Arc::new(move |object: &dyn Any| {
            object.downcast_ref::<T>().map_or(0, |owner| access(owner).len())
        });
        let get: ElementGetter = Arc::new(move |object: &dyn Any, index: usize| {
            object
                .downcast_ref::<T>()
                .and_then(|owner| access(owner).get(index))
                .map(Value::new)
        });
        let set: ElementSetter = Arc::new(move |object: &dyn Any, index: usize, value: Value| {
            let owner = object
                .downcast_ref::<T>()
                .ok_or_else(|| wrong_receiver::<T>())?;
            let slot = access(owner).slot(index).ok_or_else(|| {
                DiError::Internal(format!("array element {index} is out of bounds"))
            })?;
            slot.set(value.try_get::<R>()?);
            Ok(())
        });
        Self {
            name,
            kind: MemberKind::Field,
            value_type: ParamInfo::of::<R>(),
            owner: std::any::type_name::<T>(),
            access: Access::Array { len, get, set },
        }
    }

    pub(crate) fn property<T, R, G, S>(name: &'static str, getter: G, setter: Option<S>) -> Self
    where
        T: Injectable,
        R: ?Sized + Send + Sync + 'static,
        G: Fn(&T) -> Option<Arc<R>> + Send + Sync + 'static,
        S: Fn(&T, Arc<R>) + Send + Sync + 'static,
    {
        let get: Getter = Arc::new(move |object: &dyn Any| {
            object
                .downcast_ref::<T>()
                .and_then(|owner| getter(owner))
                .map(Value::new)
        });
        let set = setter.map(|setter| -> Setter {
            Arc::new(move |object: &dyn Any, value: Value| {
                let owner = object
                    .downcast_ref::<T>()
                    .ok_or_else(|| wrong_receiver::<T>())?;
                setter(owner, value.try_get::<R>()?);
                Ok(())
            })
        });
        Self {
            name,
            kind: MemberKind::Property,
            value_type: ParamInfo::of::<R>(),
            owner: std::any::type_name::<T>(),
            access: Access::Single { get, set },
        }
    }

    /// Re-target the accessors so they start from a derived object.
    pub(crate) fn through(self, project: Projection) -> Self {
        let access = match self.access {
            Access::Single { get, set } => {
                let p = Arc::clone(&project);
                let get: Getter =
                    Arc::new(move |object: &dyn Any| p(object).and_then(|base| get(base)));
                let set = set.map(|set| -> Setter {
                    let p = Arc::clone(&project);
                    let owner = self.owner;
                    Arc::new(move |object: &dyn Any, value: Value| match p(object) {
                        Some(base) => set(base, value),
                        None => Err(DiError::TypeMismatch {
                            expected: owner,
                            found: "a receiver without this base",
                        }),
                    })
                });
                Access::Single { get, set }
            }
            Access::Array { len, get, set } => {
                let (p_len, p_get, p_set) =
                    (Arc::clone(&project), Arc::clone(&project), project);
                let owner = self.owner;
                Access::Array {
                    len: Arc::new(move |object: &dyn Any| p_len(object).map_or(0, |base| len(base))),
                    get: Arc::new(move |object: &dyn Any, index: usize| {
                        p_get(object).and_then(|base| get(base, index))
                    }),
                    set: Arc::new(move |object: &dyn Any, index: usize, value: Value| {
                        match p_set(object) {
                            Some(base) => set(base, index, value),
                            None => Err(DiError::TypeMismatch {
                                expected: owner,
                                found: "a receiver without this base",
                            }),
                        }
                    }),
                }
            }
        };
        Self { access, ..self }
    }

    /// Declared name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Field or property
    #[inline]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The member type; the element type for arrays
    #[inline]
    pub fn value_type(&self) -> ParamInfo {
        self.value_type
    }

    /// Name of the type that declared the member
    #[inline]
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Whether the member is an array of slots
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.access, Access::Array { .. })
    }

    /// Whether the container may write the member
    #[inline]
    pub fn is_writable(&self) -> bool {
        match &self.access {
            Access::Single { set, .. } => set.is_some(),
            Access::Array { .. } => true,
        }
    }

    /// Current value of a single member
    pub fn get(&self, object: &dyn Any) -> Option<Value> {
        match &self.access {
            Access::Single { get, .. } => get(object),
            Access::Array { .. } => None,
        }
    }

    /// Write a single member
    pub fn set(&self, object: &dyn Any, value: Value) -> Result<()> {
        match &self.access {
            Access::Single { set: Some(set), .. } => set(object, value),
            Access::Single { set: None, .. } => Err(DiError::Internal(format!(
                "property '{}' of {} is read-only",
                self.name, self.owner
            ))),
            Access::Array { .. } => Err(DiError::Internal(format!(
                "'{}' of {} is an array member",
                self.name, self.owner
            ))),
        }
    }

    /// Number of elements of an array member
    pub fn len(&self, object: &dyn Any) -> usize {
        match &self.access {
            Access::Array { len, .. } => len(object),
            Access::Single { .. } => 0,
        }
    }

    /// Current value of an array element
    pub fn element(&self, object: &dyn Any, index: usize) -> Option<Value> {
        match &self.access {
            Access::Array { get, .. } => get(object, index),
            Access::Single { .. } => None,
        }
    }

    /// Write an array element
    pub fn set_element(&self, object: &dyn Any, index: usize, value: Value) -> Result<()> {
        match &self.access {
            Access::Array { set, .. } => set(object, index, value),
            Access::Single { .. } => Err(DiError::Internal(format!(
                "'{}' of {} is not an array member",
                self.name, self.owner
            ))),
        }
    }
}

impl std::fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("type", &self.value_type)
            .field("owner", &self.owner)
            .field("array", &self.is_array())
            .finish()
    }
}

// =============================================================================
// Methods
// =============================================================================

/// A method callable on a reflected object.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: &'static str,
    owner: &'static str,
    params: Vec<ParamInfo>,
    returns: &'static str,
    invoke: MethodThunk,
    entry: Option<MethodRef>,
}

impl MethodDescriptor {
    pub(crate) fn new<T, A, O, F>(name: &'static str, method: F, entry: Option<MethodRef>) -> Self
    where
        T: Injectable,
        A: ArgList,
        O: Injectable,
        F: Fn(&T, A) -> O + Send + Sync + 'static,
    {
        Self {
            name,
            owner: std::any::type_name::<T>(),
            params: A::params(),
            returns: std::any::type_name::<O>(),
            invoke: Arc::new(move |object: &dyn Any, args: &[Value]| {
                let receiver = object
                    .downcast_ref::<T>()
                    .ok_or_else(|| wrong_receiver::<T>())?;
                Ok(Value::of(method(receiver, A::from_values(args)?)))
            }),
            entry,
        }
    }

    /// Declared name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Parameter types in declaration order
    #[inline]
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Name of the return type
    #[inline]
    pub fn returns(&self) -> &'static str {
        self.returns
    }

    /// The hookable entry point, if declared with one
    #[inline]
    pub fn entry(&self) -> Option<MethodRef> {
        self.entry
    }

    /// Whether the parameter types are exactly `types`
    pub fn matches(&self, types: &[TypeId]) -> bool {
        self.params.len() == types.len()
            && self.params.iter().zip(types).all(|(p, t)| p.id() == *t)
    }

    /// Call the method. The result is wrapped as a `Value` of the return type.
    pub fn invoke(&self, object: &dyn Any, args: &[Value]) -> Result<Value> {
        (self.invoke)(object, args)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish()
    }
}

// =============================================================================
// Type descriptor
// =============================================================================

/// Everything the container knows about one reflected type.
#[derive(Debug)]
pub struct TypeDescriptor {
    info: TypeInfo,
    base: Option<TypeInfo>,
    constructors: Vec<ConstructorDescriptor>,
    fields: Vec<MemberDescriptor>,
    properties: Vec<MemberDescriptor>,
    methods: Vec<MethodDescriptor>,
    depth: usize,
}

impl TypeDescriptor {
    /// Build the descriptor of `info`, flattening members of its bases until a
    /// type in `boundaries` is reached.
    pub(crate) fn build(info: TypeInfo, boundaries: &HashSet<TypeId>) -> Self {
        let declarations = info.declarations();
        let base = declarations.base.as_ref().map(|link| link.info);
        let mut fields = declarations.fields;
        let mut properties = declarations.properties;

        let mut visited = HashSet::from([info.id()]);
        let mut through: Option<Projection> = None;
        let mut link = declarations.base;
        let mut depth = 0;

        while let Some(current) = link {
            if boundaries.contains(&current.info.id()) || !visited.insert(current.info.id()) {
                break;
            }
            let composed = match through {
                Some(outer) => compose(outer, current.project),
                None => current.project,
            };
            let level = current.info.declarations();
            fields.extend(
                level
                    .fields
                    .into_iter()
                    .map(|m| m.through(Arc::clone(&composed))),
            );
            properties.extend(
                level
                    .properties
                    .into_iter()
                    .map(|m| m.through(Arc::clone(&composed))),
            );
            through = Some(composed);
            link = level.base;
            depth += 1;
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "interject",
            type_name = info.name(),
            constructors = declarations.constructors.len(),
            fields = fields.len(),
            properties = properties.len(),
            base_depth = depth,
            "Built type descriptor"
        );

        Self {
            info,
            base,
            constructors: declarations.constructors,
            fields,
            properties,
            methods: declarations.methods,
            depth,
        }
    }

    /// Identity of the described type
    #[inline]
    pub fn info(&self) -> TypeInfo {
        self.info
    }

    /// Name of the described type
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.info.name()
    }

    /// The directly composed base type
    #[inline]
    pub fn base(&self) -> Option<TypeInfo> {
        self.base
    }

    /// How many base levels were flattened into this descriptor
    #[inline]
    pub fn base_depth(&self) -> usize {
        self.depth
    }

    /// All constructors in declaration order
    #[inline]
    pub fn constructors(&self) -> &[ConstructorDescriptor] {
        &self.constructors
    }

    /// Injectable fields, own fields first
    #[inline]
    pub fn fields(&self) -> &[MemberDescriptor] {
        &self.fields
    }

    /// Properties, own properties first
    #[inline]
    pub fn properties(&self) -> &[MemberDescriptor] {
        &self.properties
    }

    /// Fields then properties, the order injection visits them
    pub fn members(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.fields.iter().chain(self.properties.iter())
    }

    /// A member by name
    pub fn member(&self, name: &str) -> Option<&MemberDescriptor> {
        self.members().find(|m| m.name() == name)
    }

    /// Declared methods
    #[inline]
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// The first parameterless constructor
    pub fn default_constructor(&self) -> Option<&ConstructorDescriptor> {
        self.constructors.iter().find(|c| c.is_parameterless())
    }

    /// The constructor at `index`
    #[inline]
    pub fn constructor(&self, index: usize) -> Option<&ConstructorDescriptor> {
        self.constructors.get(index)
    }

    /// The constructor whose parameter types are exactly `types`, with its index
    pub fn find_constructor(&self, types: &[TypeId]) -> Option<(usize, &ConstructorDescriptor)> {
        self.constructors
            .iter()
            .enumerate()
            .find(|(_, c)| c.matches(types))
    }

    /// The first declared constructor that has a hookable entry point
    pub fn hookable_constructor(&self) -> Option<&ConstructorDescriptor> {
        self.constructors.iter().find(|c| c.entry.is_some())
    }

    /// The first method called `name`
    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// The method called `name` whose parameter types are exactly `types`
    pub fn find_method_with(&self, name: &str, types: &[TypeId]) -> Option<&MethodDescriptor> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.matches(types))
    }

    /// Call a method by name, failing if no method matches the argument types.
    pub fn invoke_method(&self, object: &dyn Any, name: &str, args: &[Value]) -> Result<Value> {
        let types: Vec<TypeId> = args.iter().map(Value::held_type).collect();
        let method = self
            .find_method_with(name, &types)
            .ok_or_else(|| DiError::MethodNotFound {
                type_name: self.info.name(),
                method: name.to_string(),
            })?;
        method.invoke(object, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reflect, TypeBuilder};

    #[derive(Default)]
    struct Clock;

    impl Reflect for Clock {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Clock);
        }
    }

    #[derive(Default)]
    struct Component {
        clock: Inject<Clock>,
        spares: InjectArray<Clock>,
    }

    impl Reflect for Component {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Component::default)
                .field("clock", |c| &c.clock)
                .array_field("spares", |c| &c.spares);
        }
    }

    struct Widget {
        component: Component,
        label: String,
        owner: Inject<Clock>,
    }

    impl Reflect for Widget {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Widget {
                component: Component {
                    clock: Inject::new(),
                    spares: InjectArray::new(2),
                },
                label: "default".into(),
                owner: Inject::new(),
            })
            .constructor_with(|(label,): (Arc<String>,)| Widget {
                component: Component::default(),
                label: label.as_ref().clone(),
                owner: Inject::new(),
            })
            .base(|w| &w.component)
            .property(
                "owner",
                |w: &Widget| w.owner.get(),
                |w: &Widget, clock| {
                    w.owner.set(clock);
                },
            )
            .method("label", |w: &Widget, ()| w.label.clone())
            .method("relabel", |w: &Widget, (suffix,): (Arc<String>,)| {
                format!("{}-{}", w.label, suffix)
            });
        }
    }

    fn describe<T: Reflect>() -> TypeDescriptor {
        TypeDescriptor::build(TypeInfo::of::<T>(), &HashSet::new())
    }

    #[test]
    fn test_constructor_lookup() {
        let widget = describe::<Widget>();
        assert_eq!(widget.constructors().len(), 2);
        assert!(widget.default_constructor().is_some());

        let (index, ctor) = widget
            .find_constructor(&[TypeId::of::<String>()])
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(ctor.arity(), 1);
        assert!(widget.find_constructor(&[TypeId::of::<u8>()]).is_none());
    }

    #[test]
    fn test_constructor_invoke_checks_arity() {
        let widget = describe::<Widget>();
        let ctor = widget.constructor(1).unwrap();
        let err = ctor.invoke(&[]).unwrap_err();
        assert!(matches!(err, DiError::ArgumentMismatch { expected: 1, actual: 0, .. }));

        let object = ctor.invoke(&[Value::of("custom".to_string())]).unwrap();
        let widget = object.downcast::<Widget>().ok().unwrap();
        assert_eq!(widget.label, "custom");
    }

    #[test]
    fn test_base_members_are_flattened() {
        let descriptor = describe::<Widget>();
        assert_eq!(descriptor.base(), Some(TypeInfo::of::<Component>()));
        assert_eq!(descriptor.base_depth(), 1);
        let names: Vec<_> = descriptor.members().map(|m| m.name()).collect();
        assert_eq!(names, vec!["clock", "spares", "owner"]);
    }

    #[test]
    fn test_inherited_member_writes_through_base() {
        let descriptor = describe::<Widget>();
        let object = descriptor.default_constructor().unwrap().invoke(&[]).unwrap();

        let clock = descriptor.member("clock").unwrap();
        assert!(clock.get(object.as_ref()).is_none());
        clock.set(object.as_ref(), Value::of(Clock)).unwrap();
        assert!(clock.get(object.as_ref()).is_some());

        let spares = descriptor.member("spares").unwrap();
        assert!(spares.is_array());
        assert_eq!(spares.len(object.as_ref()), 2);
        spares.set_element(object.as_ref(), 1, Value::of(Clock)).unwrap();
        assert!(spares.element(object.as_ref(), 0).is_none());
        assert!(spares.element(object.as_ref(), 1).is_some());

        let widget = object.downcast::<Widget>().ok().unwrap();
        assert!(widget.component.clock.is_set());
    }

    #[test]
    fn test_boundary_stops_flattening() {
        let boundaries = HashSet::from([TypeId::of::<Component>()]);
        let descriptor = TypeDescriptor::build(TypeInfo::of::<Widget>(), &boundaries);
        let names: Vec<_> = descriptor.members().map(|m| m.name()).collect();
        assert_eq!(names, vec!["owner"]);
        assert_eq!(descriptor.base_depth(), 0);
    }

    #[test]
    fn test_property_setter_rejects_wrong_value() {
        let descriptor = describe::<Widget>();
        let object = descriptor.default_constructor().unwrap().invoke(&[]).unwrap();
        let owner = descriptor.member("owner").unwrap();
        assert_eq!(owner.kind(), MemberKind::Property);
        let err = owner.set(object.as_ref(), Value::of(1u8)).unwrap_err();
        assert!(matches!(err, DiError::TypeMismatch { .. }));
    }

    #[test]
    fn test_method_lookup_and_invoke() {
        let descriptor = describe::<Widget>();
        let object = descriptor.default_constructor().unwrap().invoke(&[]).unwrap();

        assert!(descriptor.find_method("label").is_some());
        assert!(descriptor.find_method("missing").is_none());
        assert!(descriptor
            .find_method_with("relabel", &[TypeId::of::<String>()])
            .is_some());

        let result = descriptor
            .invoke_method(object.as_ref(), "relabel", &[Value::of("v2".to_string())])
            .unwrap();
        assert_eq!(*result.get::<String>().unwrap(), "default-v2");

        let err = descriptor
            .invoke_method(object.as_ref(), "relabel", &[])
            .unwrap_err();
        assert!(matches!(err, DiError::MethodNotFound { .. }));
    }
}
