//! Resolution and member injection
//!
//! One traversal runs inside a [`ScopedInstances`]. A binding under
//! construction in the current traversal can still be requested by a member
//! of something it depends on: that member is deferred and filled as soon as
//! the instance exists. A constructor argument cannot wait, so the same
//! situation there is a circular dependency error.

use crate::binding::{BindingRecord, LifetimeState, Target};
use crate::descriptor::{ConstructorDescriptor, MemberDescriptor, TypeDescriptor};
use crate::factory::SharedFactory;
use crate::reflect::{Instance, Object, ParamInfo, TypeInfo};
use crate::scope::{Deferred, ScopedInstances};
use crate::{Container, DiError, Result, Value};
use std::any::Any;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

pub(crate) enum Resolution {
    Ready(Value),
    /// The binding is being constructed further up this traversal
    Pending(Arc<BindingRecord>),
    Missing,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Reuse {
    /// Share instances already produced in this traversal
    Scope,
    /// Produce independently of the traversal (array elements)
    Fresh,
}

pub(crate) struct Resolver<'c> {
    container: &'c Container,
}

impl<'c> Resolver<'c> {
    pub(crate) fn new(container: &'c Container) -> Self {
        Self { container }
    }

    /// Resolve `requested`; `Ok(None)` when nothing is bound for it.
    pub(crate) fn resolve(
        &self,
        requested: ParamInfo,
        scope: &mut ScopedInstances,
    ) -> Result<Option<Value>> {
        match self.resolve_entry(requested, scope, Reuse::Scope)? {
            Resolution::Ready(value) => Ok(Some(value)),
            Resolution::Missing => Ok(None),
            Resolution::Pending(record) => Err(DiError::circular(record.type_name())),
        }
    }

    fn resolve_entry(
        &self,
        requested: ParamInfo,
        scope: &mut ScopedInstances,
        reuse: Reuse,
    ) -> Result<Resolution> {
        if reuse == Reuse::Scope {
            if let Some(value) = scope.get(&requested.id()) {
                return Ok(Resolution::Ready(value));
            }
        }

        let Some(record) = self.container.lookup(&requested.id()) else {
            #[cfg(feature = "logging")]
            trace!(
                target: "interject",
                type_name = requested.name(),
                scope = %scope.scope(),
                "No binding"
            );
            return Ok(Resolution::Missing);
        };

        let instance = match record.state() {
            LifetimeState::SingletonReady(instance) | LifetimeState::Instance(instance) => instance,
            LifetimeState::FactoryReady(factory) => self.manufacture(&record, &factory, scope)?,
            LifetimeState::Transient
            | LifetimeState::SingletonPending
            | LifetimeState::FactoryPending => {
                if scope.is_constructing(&record.type_id()) {
                    return Ok(Resolution::Pending(record));
                }
                self.produce(&record, scope)?
            }
        };

        let value = record.view_as(requested.id(), &instance)?;
        if reuse == Reuse::Scope {
            scope.insert(requested.id(), value.clone());
        }
        Ok(Resolution::Ready(value))
    }

    /// Build an instance for a binding that has nothing cached.
    fn produce(&self, record: &Arc<BindingRecord>, scope: &mut ScopedInstances) -> Result<Instance> {
        let info = record.target().instantiable().ok_or_else(|| {
            DiError::instantiation(record.type_name(), "binding has no concrete type")
        })?;

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            binding = record.type_name(),
            concrete = info.name(),
            lifetime = ?record.lifetime(),
            scope = %scope.scope(),
            "Constructing instance"
        );

        let is_factory = matches!(record.target(), Target::Factory { .. });
        let key = record.type_id();
        scope.begin(key);
        let built = self.instantiate(record, info, scope, !is_factory);
        scope.end(&key);
        let instance = built?;

        if is_factory {
            let factory = record.complete_factory(Arc::clone(instance.object()))?;
            self.manufacture(record, &factory, scope)
        } else {
            Ok(record.complete_singleton(instance))
        }
    }

    /// Ask a ready factory for a product and inject it.
    fn manufacture(
        &self,
        record: &Arc<BindingRecord>,
        factory: &SharedFactory,
        scope: &mut ScopedInstances,
    ) -> Result<Instance> {
        let product = factory.produce(record)?;
        let key = record.type_id();
        scope.begin(key);
        let injected = self
            .publish(record, &product, scope)
            .and_then(|()| self.inject(&product, scope));
        scope.end(&key);
        injected.map(|()| product)
    }

    fn instantiate(
        &self,
        record: &Arc<BindingRecord>,
        info: TypeInfo,
        scope: &mut ScopedInstances,
        publish: bool,
    ) -> Result<Instance> {
        let descriptor = self.container.reflection().get_or_build(info);

        let object = match record.constructor() {
            Some(selection) => {
                let constructor = descriptor.constructor(selection.index()).ok_or(
                    DiError::ConstructorNotFound {
                        type_name: info.name(),
                        arity: selection.params().len(),
                    },
                )?;
                let args = self.resolve_arguments(
                    info.name(),
                    selection.arguments(),
                    constructor.params(),
                    scope,
                )?;
                self.construct(record, constructor, &args)?
            }
            None => {
                let constructor = descriptor.default_constructor().ok_or_else(|| {
                    DiError::instantiation(info.name(), "no parameterless constructor is declared")
                })?;
                self.construct(record, constructor, &[])?
            }
        };

        let instance = Instance::from_object(object, info);
        if publish {
            self.publish(record, &instance, scope)?;
        }
        self.inject_members(Receiver::Shared(&instance), &descriptor, scope)?;
        Ok(instance)
    }

    /// Call a constructor with the binding's hook suspended.
    fn construct(
        &self,
        record: &BindingRecord,
        constructor: &ConstructorDescriptor,
        args: &[Value],
    ) -> Result<Object> {
        let suspended = match record.hook() {
            Some(hook) => Some(hook.suspend()?),
            None => None,
        };
        let object = constructor.invoke(args);
        if let Some(guard) = suspended {
            guard.resume()?;
        }
        object
    }

    /// Resolve the `None` entries of `supplied` by parameter type.
    pub(crate) fn resolve_arguments(
        &self,
        owner: &'static str,
        supplied: &[Option<Value>],
        params: &[ParamInfo],
        scope: &mut ScopedInstances,
    ) -> Result<Vec<Value>> {
        if supplied.len() != params.len() {
            return Err(DiError::ArgumentMismatch {
                type_name: owner,
                expected: params.len(),
                actual: supplied.len(),
            });
        }

        let mut args = Vec::with_capacity(params.len());
        for (index, (argument, param)) in supplied.iter().zip(params).enumerate() {
            let value = match argument {
                Some(value) => value.clone(),
                None => match self.resolve_entry(*param, scope, Reuse::Scope)? {
                    Resolution::Ready(value) => value,
                    Resolution::Pending(record) => {
                        return Err(DiError::circular(record.type_name()));
                    }
                    Resolution::Missing => {
                        return Err(DiError::instantiation(
                            owner,
                            format!("no binding for parameter {index} ({})", param.name()),
                        ));
                    }
                },
            };
            args.push(value);
        }
        Ok(args)
    }

    /// Make a fresh instance visible to the traversal and fill members waiting on it.
    fn publish(
        &self,
        record: &BindingRecord,
        instance: &Instance,
        scope: &mut ScopedInstances,
    ) -> Result<()> {
        let key = record.type_id();
        scope.insert(key, record.view_as(key, instance)?);
        if let Some(concrete) = record.target().concrete_type() {
            if concrete != key {
                if let Some(value) = instance.value() {
                    scope.insert(concrete, value);
                }
            }
        }

        for deferred in scope.take_deferred(&key) {
            let value = record.view_as(deferred.requested, instance)?;
            deferred
                .member
                .set(deferred.owner.as_any(), value)
                .map_err(|err| {
                    DiError::injection(deferred.member.name(), deferred.owner.type_name(), err)
                })?;
        }
        Ok(())
    }

    /// Inject the members of an existing instance.
    pub(crate) fn inject(&self, instance: &Instance, scope: &mut ScopedInstances) -> Result<()> {
        let Some(info) = instance.info() else {
            return Ok(());
        };
        if let Some(value) = instance.value() {
            scope.insert(instance.type_id(), value);
        }
        let descriptor = self.container.reflection().get_or_build(info);
        self.inject_members(Receiver::Shared(instance), &descriptor, scope)
    }

    /// Inject the members of an object only reachable by reference.
    pub(crate) fn inject_borrowed(
        &self,
        object: &dyn Any,
        info: TypeInfo,
        scope: &mut ScopedInstances,
    ) -> Result<()> {
        let descriptor = self.container.reflection().get_or_build(info);
        self.inject_members(Receiver::Borrowed(object, info.name()), &descriptor, scope)
    }

    /// Fields first, then properties. Stops at the first failing member.
    fn inject_members(
        &self,
        receiver: Receiver<'_>,
        descriptor: &TypeDescriptor,
        scope: &mut ScopedInstances,
    ) -> Result<()> {
        for member in descriptor.members() {
            if !member.is_writable() {
                continue;
            }
            let injected = if member.is_array() {
                self.inject_array(receiver, member, scope)
            } else {
                self.inject_single(receiver, member, scope)
            };
            injected.map_err(|err| DiError::injection(member.name(), receiver.type_name(), err))?;
        }
        Ok(())
    }

    fn inject_single(
        &self,
        receiver: Receiver<'_>,
        member: &MemberDescriptor,
        scope: &mut ScopedInstances,
    ) -> Result<()> {
        let object = receiver.object();
        if member.get(object).is_some() {
            return Ok(());
        }

        match self.resolve_entry(member.value_type(), scope, Reuse::Scope)? {
            Resolution::Ready(value) => member.set(object, value),
            Resolution::Pending(record) => match receiver {
                Receiver::Shared(instance) => {
                    scope.defer(Deferred {
                        owner: instance.clone(),
                        member: member.clone(),
                        requested: member.value_type().id(),
                        awaiting: record,
                    });
                    Ok(())
                }
                Receiver::Borrowed(..) => Err(DiError::circular(record.type_name())),
            },
            Resolution::Missing => Ok(()),
        }
    }

    fn inject_array(
        &self,
        receiver: Receiver<'_>,
        member: &MemberDescriptor,
        scope: &mut ScopedInstances,
    ) -> Result<()> {
        let object = receiver.object();
        for index in 0..member.len(object) {
            if member.element(object, index).is_some() {
                continue;
            }
            match self.resolve_entry(member.value_type(), scope, Reuse::Fresh)? {
                Resolution::Ready(value) => member.set_element(object, index, value)?,
                Resolution::Pending(record) => return Err(DiError::circular(record.type_name())),
                Resolution::Missing => {}
            }
        }
        Ok(())
    }
}

/// The object whose members are being injected.
#[derive(Clone, Copy)]
enum Receiver<'a> {
    /// Members waiting on a binding under construction are deferred onto it
    Shared(&'a Instance),
    /// Nothing can be deferred onto a borrowed object
    Borrowed(&'a dyn Any, &'static str),
}

impl<'a> Receiver<'a> {
    fn object(self) -> &'a dyn Any {
        match self {
            Receiver::Shared(instance) => instance.as_any(),
            Receiver::Borrowed(object, _) => object,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            Receiver::Shared(instance) => instance.type_name(),
            Receiver::Borrowed(_, type_name) => type_name,
        }
    }
}
