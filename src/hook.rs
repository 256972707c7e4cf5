//! Hook records and constructor interception
//!
//! A [`HookRecord`] redirects an original entry point to an injected one by
//! patching a jump over the original's first bytes. Hooking and unhooking are
//! idempotent and serialised per record.
//!
//! The injected functions are [`intercept_constructor`],
//! [`intercept_constructor_with`] and [`intercept_method`]. Reached through the
//! patched jump, each finds its record by type and shape, temporarily restores
//! the original, calls it, lets the owning container inject the result (or
//! the receiver) and patches the jump back.
//!
//! An entry point is patched by at most one live record.

use crate::container::{Container, ContainerInner};
use crate::hook_container::hooks;
use crate::patch::{self, Arch, MethodRef};
use crate::reflect::{ArgList, Reflect, TypeInfo};
use crate::{DiError, Result, Value};
use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, error, warn};

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

/// One redirection from an original entry point to an injected one.
pub struct HookRecord {
    id: u64,
    original: MethodRef,
    injected: MethodRef,
    bound_args: Option<Vec<Value>>,
    arch: Arch,
    saved: Mutex<Option<Vec<u8>>>,
    container: Weak<ContainerInner>,
}

impl HookRecord {
    pub(crate) fn new(
        original: MethodRef,
        injected: MethodRef,
        bound_args: Option<Vec<Value>>,
        arch: Arch,
        container: Weak<ContainerInner>,
    ) -> Self {
        Self {
            id: NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed),
            original,
            injected,
            bound_args,
            arch,
            saved: Mutex::new(None),
            container,
        }
    }

    /// Unique record id
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The patched entry point
    #[inline]
    pub fn original(&self) -> &MethodRef {
        &self.original
    }

    /// Where the patched entry point jumps to
    #[inline]
    pub fn injected(&self) -> &MethodRef {
        &self.injected
    }

    /// Arguments bound when the hook was installed
    #[inline]
    pub fn bound_args(&self) -> Option<&[Value]> {
        self.bound_args.as_deref()
    }

    /// Instruction set the jump is encoded for
    #[inline]
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The container that installed the hook, while it is alive
    pub fn container(&self) -> Option<Container> {
        self.container.upgrade().map(Container::from_inner)
    }

    fn saved(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the jump is currently in place
    pub fn is_hooked(&self) -> bool {
        self.saved().is_some()
    }

    /// The original bytes while hooked
    pub fn saved_bytes(&self) -> Option<Vec<u8>> {
        self.saved().clone()
    }

    /// Patch the jump over the original entry point. No-op when already hooked.
    pub fn hook(&self) -> Result<()> {
        let mut saved = self.saved();
        if saved.is_some() {
            return Ok(());
        }

        let entry = self.original.entry();
        // SAFETY: `MethodRef` construction guarantees at least `patch_len`
        // readable bytes at the entry point.
        let original = unsafe { patch::read_code(entry, self.arch.patch_len()) };
        let jump = self.arch.encode_jump(self.injected.entry().address());
        // SAFETY: as above; the entry point is code owned by this process.
        unsafe { patch::write_code(entry, &jump)? };
        *saved = Some(original);

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            hook = self.id,
            original = self.original.name(),
            injected = self.injected.name(),
            "Hook installed"
        );

        Ok(())
    }

    /// Restore the original bytes. No-op when not hooked.
    pub fn unhook(&self) -> Result<()> {
        self.restore().map(|_| ())
    }

    /// Restore the original bytes, reporting whether a jump was removed.
    fn restore(&self) -> Result<bool> {
        let mut saved = self.saved();
        let Some(bytes) = saved.take() else {
            return Ok(false);
        };
        // SAFETY: writing back the bytes read from this entry point in `hook`.
        if let Err(err) = unsafe { patch::write_code(self.original.entry(), &bytes) } {
            *saved = Some(bytes);
            return Err(err);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "interject",
            hook = self.id,
            original = self.original.name(),
            "Hook removed"
        );

        Ok(true)
    }

    /// Restore the original until the returned guard is resumed or dropped.
    ///
    /// Suspending a record that is not hooked yields a guard that does nothing,
    /// so nested suspensions only re-patch once.
    pub fn suspend(&self) -> Result<SuspendGuard<'_>> {
        let rehook = self.restore()?;
        Ok(SuspendGuard {
            record: self,
            rehook,
        })
    }

    /// Unhook and deregister from the global hook index and the owning container.
    pub fn remove(self: &Arc<Self>) -> Result<()> {
        self.unhook()?;
        hooks().remove(self);
        if let Some(container) = self.container() {
            container.forget_hook(self.id);
        }
        Ok(())
    }

    fn expect_signature<S: 'static>(&self) -> Result<()> {
        if self.original.has_signature::<S>() {
            Ok(())
        } else {
            Err(DiError::HookSignature {
                method: self.original.name(),
                expected: std::any::type_name::<S>(),
            })
        }
    }

    /// Construct `C` with the original entry point and inject it.
    ///
    /// Arguments bound at install time select a reflective constructor instead.
    pub(crate) fn intercept<C: Reflect>(&self) -> Result<Arc<C>> {
        self.expect_signature::<fn() -> Arc<C>>()?;
        let container = self.container();
        let suspended = self.suspend()?;

        let instance = match (&container, self.bound_args()) {
            (Some(container), Some(args)) => construct_with_args::<C>(container, args)?,
            _ => {
                // SAFETY: the signature check above guarantees the entry point
                // was registered as a `fn() -> Arc<C>`.
                let construct = unsafe {
                    std::mem::transmute::<usize, fn() -> Arc<C>>(
                        self.original.entry().address(),
                    )
                };
                construct()
            }
        };

        match &container {
            Some(container) => container.inject(&instance)?,
            None => orphaned(std::any::type_name::<C>()),
        }
        suspended.resume()?;
        Ok(instance)
    }

    /// Construct `C` with the original entry point, passing `args` through
    /// unless arguments were bound at install time, and inject it.
    pub(crate) fn intercept_with<C: Reflect, A: ArgList>(&self, args: A) -> Result<Arc<C>> {
        self.expect_signature::<fn(A) -> Arc<C>>()?;
        let args = match self.bound_args() {
            Some(bound) => A::from_values(bound)?,
            None => args,
        };
        let container = self.container();
        let suspended = self.suspend()?;

        // SAFETY: the signature check above guarantees the entry point was
        // registered as a `fn(A) -> Arc<C>`.
        let construct = unsafe {
            std::mem::transmute::<usize, fn(A) -> Arc<C>>(self.original.entry().address())
        };
        let instance = construct(args);

        match &container {
            Some(container) => container.inject(&instance)?,
            None => orphaned(std::any::type_name::<C>()),
        }
        suspended.resume()?;
        Ok(instance)
    }

    /// Call the original method on `this`, then inject `this`.
    pub(crate) fn intercept_method<T: Reflect, A: ArgList, O: 'static>(
        &self,
        this: &T,
        args: A,
    ) -> Result<O> {
        self.expect_signature::<fn(&T, A) -> O>()?;
        let args = match self.bound_args() {
            Some(bound) => A::from_values(bound)?,
            None => args,
        };
        let container = self.container();
        let suspended = self.suspend()?;

        // SAFETY: the signature check above guarantees the entry point was
        // registered as a `fn(&T, A) -> O`.
        let call = unsafe {
            std::mem::transmute::<usize, fn(&T, A) -> O>(self.original.entry().address())
        };
        let output = call(this, args);

        match &container {
            Some(container) => container.inject_ref(this)?,
            None => orphaned(std::any::type_name::<T>()),
        }
        suspended.resume()?;
        Ok(output)
    }
}

fn orphaned(_type_name: &'static str) {
    #[cfg(feature = "logging")]
    warn!(
        target: "interject",
        type_name = _type_name,
        "Owning container dropped; returning uninjected instance"
    );
}

fn construct_with_args<C: Reflect>(container: &Container, args: &[Value]) -> Result<Arc<C>> {
    let descriptor = container.reflection().get::<C>();
    let types: Vec<TypeId> = args.iter().map(Value::held_type).collect();
    let (_, constructor) =
        descriptor
            .find_constructor(&types)
            .ok_or(DiError::ConstructorNotFound {
                type_name: std::any::type_name::<C>(),
                arity: args.len(),
            })?;
    constructor
        .invoke(args)?
        .downcast::<C>()
        .map_err(|_| DiError::type_mismatch::<C>(descriptor.type_name()))
}

impl Drop for HookRecord {
    fn drop(&mut self) {
        // The claim outlives a failed unhook so nobody saves the jump as a prologue.
        match self.unhook() {
            Ok(()) => hooks().release(self.original.entry(), self.id),
            Err(_err) => {
                #[cfg(feature = "logging")]
                error!(
                    target: "interject",
                    hook = self.id,
                    error = %_err,
                    "Failed to unhook on drop"
                );
            }
        }
    }
}

impl std::fmt::Debug for HookRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRecord")
            .field("id", &self.id)
            .field("original", &self.original)
            .field("injected", &self.injected)
            .field("arch", &self.arch)
            .field("hooked", &self.is_hooked())
            .finish()
    }
}

/// Re-patches a suspended hook when resumed or dropped.
#[must_use = "the hook is restored when the guard is dropped"]
pub struct SuspendGuard<'a> {
    record: &'a HookRecord,
    rehook: bool,
}

impl SuspendGuard<'_> {
    /// Re-patch now and report failures.
    pub fn resume(mut self) -> Result<()> {
        let rehook = std::mem::take(&mut self.rehook);
        if rehook { self.record.hook() } else { Ok(()) }
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if self.rehook {
            if let Err(_err) = self.record.hook() {
                #[cfg(feature = "logging")]
                error!(
                    target: "interject",
                    hook = self.record.id,
                    error = %_err,
                    "Failed to re-install suspended hook"
                );
            }
        }
    }
}

/// Register a hook from `original` to `injected` on `container` and patch it.
///
/// Both method references are required; a missing one fails without touching
/// any code.
pub fn install_hook(
    container: &Container,
    original: Option<MethodRef>,
    injected: Option<MethodRef>,
    bound_args: Option<Vec<Value>>,
) -> Result<Arc<HookRecord>> {
    let (Some(original), Some(injected)) = (original, injected) else {
        return Err(DiError::hook_precondition(
            original.is_some(),
            injected.is_some(),
        ));
    };
    let arch = Arch::require_host()?;
    install_with_arch(container, original, injected, bound_args, arch)
}

pub(crate) fn install_with_arch(
    container: &Container,
    original: MethodRef,
    injected: MethodRef,
    bound_args: Option<Vec<Value>>,
    arch: Arch,
) -> Result<Arc<HookRecord>> {
    let record = Arc::new(HookRecord::new(
        original,
        injected,
        bound_args,
        arch,
        container.downgrade(),
    ));
    if let Err(holder) = hooks().claim(original.entry(), record.id()) {
        return Err(DiError::AlreadyHooked {
            method: original.name(),
            hook: holder,
        });
    }

    // Reachable through the index before the jump exists.
    if let Some(owner) = original.owner().or(injected.owner()) {
        hooks().add(owner, Arc::clone(&record));
    }
    container.remember_hook(Arc::clone(&record));

    if let Err(err) = record.hook() {
        hooks().remove(&record);
        container.forget_hook(record.id());
        return Err(err);
    }
    Ok(record)
}

fn registered<S: 'static>(info: TypeInfo) -> Arc<HookRecord> {
    match hooks().find_signature(info, TypeId::of::<S>()) {
        Some(record) => record,
        None => panic!(
            "no hook of shape {} is registered for {}",
            std::any::type_name::<S>(),
            info.name()
        ),
    }
}

fn settle<T>(info: TypeInfo, outcome: Result<T>) -> T {
    match outcome {
        Ok(value) => value,
        Err(err) => panic!("interception of {} failed: {err}", info.name()),
    }
}

/// Interceptor installed over hookable constructors of `C`.
///
/// # Panics
///
/// There is no caller to report to, so this panics when reached without a
/// registered hook for `C`, when the original cannot be restored or
/// re-patched, and when injecting the constructed object fails.
pub fn intercept_constructor<C: Reflect>() -> Arc<C> {
    let info = TypeInfo::of::<C>();
    let record = registered::<fn() -> Arc<C>>(info);
    settle(info, record.intercept::<C>())
}

/// Interceptor installed over hookable constructors of `C` taking `A`.
///
/// # Panics
///
/// Same as [`intercept_constructor`].
pub fn intercept_constructor_with<C: Reflect, A: ArgList>(args: A) -> Arc<C> {
    let info = TypeInfo::of::<C>();
    let record = registered::<fn(A) -> Arc<C>>(info);
    settle(info, record.intercept_with::<C, A>(args))
}

/// Interceptor installed over hookable methods of `T`.
///
/// # Panics
///
/// Same as [`intercept_constructor`]; the original has already run when
/// injecting the receiver fails.
pub fn intercept_method<T: Reflect, A: ArgList, O: 'static>(this: &T, args: A) -> O {
    let info = TypeInfo::of::<T>();
    let record = registered::<fn(&T, A) -> O>(info);
    settle(info, record.intercept_method::<T, A, O>(this, args))
}
