//! Process-wide index of installed hooks
//!
//! Interceptors reached through a patched jump have no receiver to tell them
//! which hook they belong to, so they look their record up here by the type
//! being constructed.

use crate::hook::HookRecord;
use crate::patch::CodePtr;
use crate::reflect::TypeInfo;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

static HOOKS: Lazy<HookContainer> = Lazy::new(HookContainer::new);

/// The process-wide hook index
#[inline]
pub fn hooks() -> &'static HookContainer {
    &HOOKS
}

/// Hook records grouped by the type that owns the hooked method.
///
/// Also tracks which hook holds each patched entry point; an entry point is
/// claimed by at most one live record.
pub struct HookContainer {
    records: DashMap<TypeId, Vec<Arc<HookRecord>>, RandomState>,
    claims: DashMap<CodePtr, u64, RandomState>,
}

impl HookContainer {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            records: DashMap::with_hasher(RandomState::new()),
            claims: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Reserve `entry` for the hook with id `hook`.
    ///
    /// Fails with the id of the current holder when another hook has it.
    pub fn claim(&self, entry: CodePtr, hook: u64) -> std::result::Result<(), u64> {
        match self.claims.entry(entry) {
            Entry::Occupied(holder) if *holder.get() != hook => Err(*holder.get()),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(hook);
                Ok(())
            }
        }
    }

    /// Give up the claim on `entry` if `hook` holds it
    pub fn release(&self, entry: CodePtr, hook: u64) {
        self.claims.remove_if(&entry, |_, holder| *holder == hook);
    }

    /// Id of the hook holding `entry`
    pub fn holder(&self, entry: CodePtr) -> Option<u64> {
        self.claims.get(&entry).map(|holder| *holder)
    }

    /// Register a record under its owning type
    pub fn add(&self, owner: TypeInfo, record: Arc<HookRecord>) {
        #[cfg(feature = "logging")]
        trace!(
            target: "interject",
            owner = owner.name(),
            hook = record.id(),
            "Registering hook"
        );
        self.records.entry(owner.id()).or_default().push(record);
    }

    /// The most recently installed record owned exactly by `type_id`
    pub fn find_exact(&self, type_id: &TypeId) -> Option<Arc<HookRecord>> {
        self.records
            .get(type_id)
            .and_then(|records| records.last().cloned())
    }

    /// The most specific record for `info`, walking up its composed bases.
    pub fn find(&self, info: TypeInfo) -> Option<Arc<HookRecord>> {
        self.find_where(info, |_| true)
    }

    /// Like [`HookContainer::find`], only considering records whose original
    /// method has the function pointer type `signature`.
    pub fn find_signature(&self, info: TypeInfo, signature: TypeId) -> Option<Arc<HookRecord>> {
        self.find_where(info, |record| record.original().signature() == signature)
    }

    fn find_where(
        &self,
        info: TypeInfo,
        accept: impl Fn(&HookRecord) -> bool,
    ) -> Option<Arc<HookRecord>> {
        let mut visited = HashSet::new();
        let mut current = Some(info);
        while let Some(level) = current {
            if !visited.insert(level.id()) {
                break;
            }
            let found = self.records.get(&level.id()).and_then(|records| {
                records.iter().rev().find(|r| accept(r)).cloned()
            });
            if found.is_some() {
                return found;
            }
            current = level.base();
        }
        None
    }

    /// The record whose original entry point is `entry`
    pub fn find_by_entry(&self, entry: CodePtr) -> Option<Arc<HookRecord>> {
        self.records.iter().find_map(|records| {
            records
                .iter()
                .rev()
                .find(|r| r.original().entry() == entry)
                .cloned()
        })
    }

    /// Deregister a record and release its entry point claim. Returns whether
    /// it was registered under an owner.
    pub fn remove(&self, record: &HookRecord) -> bool {
        self.release(record.original().entry(), record.id());
        let mut removed = false;
        self.records.retain(|_, records| {
            let before = records.len();
            records.retain(|r| r.id() != record.id());
            removed |= records.len() != before;
            !records.is_empty()
        });
        removed
    }

    /// Number of registered records
    pub fn len(&self) -> usize {
        self.records.iter().map(|records| records.len()).sum()
    }

    /// Whether no record is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HookContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookContainer")
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::patch::test_support::CodePage;
    use crate::patch::{Arch, MethodRef};
    use crate::{Container, Reflect, TypeBuilder};

    #[derive(Default)]
    struct Base;

    impl Reflect for Base {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(|| Base);
        }
    }

    #[derive(Default)]
    struct Derived {
        base: Base,
    }

    impl Reflect for Derived {
        fn describe(ty: &mut TypeBuilder<Self>) {
            ty.constructor(Derived::default).base(|d| &d.base);
        }
    }

    fn record(container: &Container, original: &CodePage, target: &CodePage) -> Arc<HookRecord> {
        let original = unsafe { MethodRef::new::<fn()>("original", original.entry().address()) };
        let target = unsafe { MethodRef::new::<fn()>("target", target.entry().address()) };
        crate::hook::install_with_arch(container, original, target, None, Arch::X64).unwrap()
    }

    #[test]
    fn test_find_walks_base_chain() {
        let original = CodePage::with_prologue(&[0x90; 16]);
        let target = CodePage::with_prologue(&[0xCC; 16]);
        let index = HookContainer::new();
        let container = Container::new();
        let hook = record(&container, &original, &target);

        index.add(TypeInfo::of::<Base>(), Arc::clone(&hook));
        let found = index.find(TypeInfo::of::<Derived>()).unwrap();
        assert_eq!(found.id(), hook.id());
        assert!(index.find_exact(&TypeId::of::<Derived>()).is_none());
        assert_eq!(
            index.find_by_entry(original.entry()).map(|r| r.id()),
            Some(hook.id())
        );

        assert!(index.remove(&hook));
        assert!(!index.remove(&hook));
        assert!(index.is_empty());
        hook.unhook().unwrap();
    }

    #[test]
    fn test_most_recent_record_wins() {
        let first_page = CodePage::with_prologue(&[0x90; 16]);
        let second_page = CodePage::with_prologue(&[0x90; 16]);
        let target = CodePage::with_prologue(&[0xCC; 16]);
        let index = HookContainer::new();
        let container = Container::new();
        let first = record(&container, &first_page, &target);
        let second = record(&container, &second_page, &target);

        index.add(TypeInfo::of::<Base>(), Arc::clone(&first));
        index.add(TypeInfo::of::<Base>(), Arc::clone(&second));
        assert_eq!(index.len(), 2);
        assert_eq!(index.find(TypeInfo::of::<Base>()).unwrap().id(), second.id());

        first.unhook().unwrap();
        second.unhook().unwrap();
    }

    #[test]
    fn test_claims_hold_one_hook_per_entry() {
        let page = CodePage::with_prologue(&[0x90; 16]);
        let index = HookContainer::new();

        assert!(index.claim(page.entry(), 1).is_ok());
        assert!(index.claim(page.entry(), 1).is_ok());
        assert_eq!(index.claim(page.entry(), 2), Err(1));

        index.release(page.entry(), 2);
        assert_eq!(index.holder(page.entry()), Some(1));
        index.release(page.entry(), 1);
        assert!(index.holder(page.entry()).is_none());
        assert!(index.claim(page.entry(), 2).is_ok());
    }

    #[test]
    fn test_find_signature_skips_other_shapes() {
        let ctor_page = CodePage::with_prologue(&[0x90; 16]);
        let method_page = CodePage::with_prologue(&[0x90; 16]);
        let target = CodePage::with_prologue(&[0xCC; 16]);
        let index = HookContainer::new();
        let container = Container::new();

        let original = unsafe {
            MethodRef::new::<fn() -> Arc<Base>>("make_base", ctor_page.entry().address())
        };
        let injected = unsafe { MethodRef::new::<fn()>("target", target.entry().address()) };
        let ctor = crate::hook::install_with_arch(&container, original, injected, None, Arch::X64)
            .unwrap();
        let method = record(&container, &method_page, &target);
        index.add(TypeInfo::of::<Base>(), Arc::clone(&ctor));
        index.add(TypeInfo::of::<Base>(), Arc::clone(&method));

        let found = index
            .find_signature(TypeInfo::of::<Base>(), TypeId::of::<fn() -> Arc<Base>>())
            .unwrap();
        assert_eq!(found.id(), ctor.id());
        assert_eq!(index.find(TypeInfo::of::<Base>()).unwrap().id(), method.id());

        ctor.unhook().unwrap();
        method.unhook().unwrap();
    }
}
