//! Entry point patching
//!
//! Overwrites the first bytes of a function with an absolute jump to another
//! function, and restores them later. This is the only module that writes to
//! executable memory.
//!
//! | Arch  | Jump encoding                    | Bytes |
//! |-------|----------------------------------|-------|
//! | x86   | `mov eax, imm32; jmp eax`        | 7     |
//! | x86-64| `mov rax, imm64; jmp rax`        | 12    |

use crate::reflect::{ArgList, Reflect, TypeInfo};
use crate::{DiError, Result};
use std::any::TypeId;
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "logging")]
use tracing::{trace, warn};

/// Instruction set of the code being patched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X64,
}

impl Arch {
    /// The instruction set this process runs on, if patching supports it
    #[inline]
    pub const fn host() -> Option<Arch> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::X64)
        } else if cfg!(target_arch = "x86") {
            Some(Arch::X86)
        } else {
            None
        }
    }

    /// [`Arch::host`], or an error naming the unsupported target
    pub fn require_host() -> Result<Arch> {
        Self::host().ok_or(DiError::UnsupportedArchitecture {
            arch: std::env::consts::ARCH,
        })
    }

    /// Number of bytes a jump overwrites
    #[inline]
    pub const fn patch_len(self) -> usize {
        match self {
            Arch::X86 => 7,
            Arch::X64 => 12,
        }
    }

    /// Encode an absolute jump to `destination`.
    ///
    /// On x86 only the low 32 bits of the address are encoded.
    pub fn encode_jump(self, destination: usize) -> Vec<u8> {
        let mut code = Vec::with_capacity(self.patch_len());
        match self {
            Arch::X86 => {
                code.push(0xB8);
                code.extend_from_slice(&(destination as u32).to_le_bytes());
            }
            Arch::X64 => {
                code.extend_from_slice(&[0x48, 0xB8]);
                code.extend_from_slice(&(destination as u64).to_le_bytes());
            }
        }
        code.extend_from_slice(&[0xFF, 0xE0]);
        code
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::X86 => f.write_str("x86"),
            Arch::X64 => f.write_str("x86_64"),
        }
    }
}

/// Address of executable code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePtr(usize);

impl CodePtr {
    /// The raw address
    #[inline]
    pub fn address(self) -> usize {
        self.0
    }
}

impl std::fmt::Debug for CodePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CodePtr({:#x})", self.0)
    }
}

/// A function entry point that may take part in a hook.
///
/// Constructing one is `unsafe` because hooking writes
/// [`Arch::patch_len`] bytes at the entry point.
#[derive(Clone, Copy)]
pub struct MethodRef {
    name: &'static str,
    entry: CodePtr,
    signature: TypeId,
    signature_name: &'static str,
    owner: Option<TypeInfo>,
    redirect: Option<fn() -> MethodRef>,
}

impl MethodRef {
    /// Describe the function at `address` whose pointer type is `S`.
    ///
    /// # Safety
    ///
    /// `address` must be the entry point of a function of type `S` whose body is
    /// at least [`Arch::patch_len`] bytes long, and which stays mapped for as
    /// long as a hook using this reference exists.
    pub unsafe fn new<S: 'static>(name: &'static str, address: usize) -> Self {
        Self {
            name,
            entry: CodePtr(address),
            signature: TypeId::of::<S>(),
            signature_name: std::any::type_name::<S>(),
            owner: None,
            redirect: None,
        }
    }

    /// Describe a parameterless constructor of `C`.
    ///
    /// # Safety
    ///
    /// Same contract as [`MethodRef::new`] for `construct`.
    pub unsafe fn constructor<C: Reflect>(name: &'static str, construct: fn() -> Arc<C>) -> Self {
        // SAFETY: forwarded from the caller's contract.
        let method = unsafe { Self::new::<fn() -> Arc<C>>(name, construct as usize) };
        method
            .with_owner(TypeInfo::of::<C>())
            .with_redirect(Self::interceptor::<C>)
    }

    /// Describe a constructor of `C` taking the parameters `A`.
    ///
    /// # Safety
    ///
    /// Same contract as [`MethodRef::new`] for `construct`.
    pub unsafe fn constructor_with<C: Reflect, A: ArgList>(
        name: &'static str,
        construct: fn(A) -> Arc<C>,
    ) -> Self {
        // SAFETY: forwarded from the caller's contract.
        let method = unsafe { Self::new::<fn(A) -> Arc<C>>(name, construct as usize) };
        method
            .with_owner(TypeInfo::of::<C>())
            .with_redirect(Self::interceptor_with::<C, A>)
    }

    /// Describe a method of `T` taking the parameters `A` and returning `O`.
    ///
    /// # Safety
    ///
    /// Same contract as [`MethodRef::new`] for `method`.
    pub unsafe fn method<T: Reflect, A: ArgList, O: 'static>(
        name: &'static str,
        method: fn(&T, A) -> O,
    ) -> Self {
        // SAFETY: forwarded from the caller's contract.
        let method = unsafe { Self::new::<fn(&T, A) -> O>(name, method as usize) };
        method
            .with_owner(TypeInfo::of::<T>())
            .with_redirect(Self::method_interceptor::<T, A, O>)
    }

    /// The interceptor that constructs `C` and injects it through the owning
    /// container of the hook it is reached from.
    pub fn interceptor<C: Reflect>() -> Self {
        let intercept: fn() -> Arc<C> = crate::hook::intercept_constructor::<C>;
        Self::interceptor_at::<fn() -> Arc<C>>("intercept_constructor", intercept as usize)
            .with_owner(TypeInfo::of::<C>())
    }

    /// Like [`MethodRef::interceptor`], for constructors taking `A`. The
    /// caller's arguments are passed through unless the hook bound its own.
    pub fn interceptor_with<C: Reflect, A: ArgList>() -> Self {
        let intercept: fn(A) -> Arc<C> = crate::hook::intercept_constructor_with::<C, A>;
        Self::interceptor_at::<fn(A) -> Arc<C>>("intercept_constructor_with", intercept as usize)
            .with_owner(TypeInfo::of::<C>())
    }

    /// The interceptor for a method of `T`: it runs the original and then
    /// injects the receiver.
    pub fn method_interceptor<T: Reflect, A: ArgList, O: 'static>() -> Self {
        let intercept: fn(&T, A) -> O = crate::hook::intercept_method::<T, A, O>;
        Self::interceptor_at::<fn(&T, A) -> O>("intercept_method", intercept as usize)
            .with_owner(TypeInfo::of::<T>())
    }

    fn interceptor_at<S: 'static>(name: &'static str, address: usize) -> Self {
        Self {
            name,
            entry: CodePtr(address),
            signature: TypeId::of::<S>(),
            signature_name: std::any::type_name::<S>(),
            owner: None,
            redirect: None,
        }
    }

    /// Attach the type the method belongs to
    #[inline]
    pub fn with_owner(mut self, owner: TypeInfo) -> Self {
        self.owner = Some(owner);
        self
    }

    fn with_redirect(mut self, redirect: fn() -> MethodRef) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// The interceptor to patch this method with, when it was described with
    /// a typed constructor
    #[inline]
    pub fn redirect(&self) -> Option<MethodRef> {
        self.redirect.map(|make| make())
    }

    /// Name given at construction
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The entry point
    #[inline]
    pub fn entry(&self) -> CodePtr {
        self.entry
    }

    /// `TypeId` of the function pointer type
    #[inline]
    pub fn signature(&self) -> TypeId {
        self.signature
    }

    /// Name of the function pointer type
    #[inline]
    pub fn signature_name(&self) -> &'static str {
        self.signature_name
    }

    /// Whether the function has pointer type `S`
    #[inline]
    pub fn has_signature<S: 'static>(&self) -> bool {
        self.signature == TypeId::of::<S>()
    }

    /// The type the method belongs to
    #[inline]
    pub fn owner(&self) -> Option<TypeInfo> {
        self.owner
    }
}

impl std::fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRef")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("signature", &self.signature_name)
            .finish()
    }
}

/// Copy `len` bytes starting at `at`.
///
/// # Safety
///
/// `at..at + len` must be readable.
pub(crate) unsafe fn read_code(at: CodePtr, len: usize) -> Vec<u8> {
    // SAFETY: forwarded from the caller's contract.
    unsafe { std::slice::from_raw_parts(at.0 as *const u8, len) }.to_vec()
}

/// Overwrite code at `at` with `bytes`.
///
/// # Safety
///
/// `at..at + bytes.len()` must be mapped code that no thread is executing
/// while it is rewritten.
pub(crate) unsafe fn write_code(at: CodePtr, bytes: &[u8]) -> Result<()> {
    // Two patches sharing a page must not restore its protection under each other.
    static PATCHING: Mutex<()> = Mutex::new(());
    let _patching = PATCHING.lock().unwrap_or_else(PoisonError::into_inner);
    let _writable = WritableCode::new(at.0, bytes.len())?;
    // SAFETY: the range is mapped and now writable.
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), at.0 as *mut u8, bytes.len()) };

    #[cfg(feature = "logging")]
    trace!(
        target: "interject",
        address = format_args!("{:#x}", at.0),
        len = bytes.len(),
        "Patched code"
    );

    Ok(())
}

/// Makes the pages spanning a code range writable until dropped.
struct WritableCode {
    #[cfg_attr(not(unix), allow(dead_code))]
    start: usize,
    #[cfg_attr(not(unix), allow(dead_code))]
    span: usize,
}

impl WritableCode {
    #[cfg(unix)]
    fn new(address: usize, len: usize) -> Result<Self> {
        let page = page_size();
        let start = address & !(page - 1);
        let end = (address + len).div_ceil(page) * page;
        let span = end - start;

        // SAFETY: mprotect only changes permissions of existing mappings and
        // reports unmapped ranges as an error.
        let rc = unsafe {
            libc::mprotect(
                start as *mut libc::c_void,
                span,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(DiError::Protection {
                address,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(Self { start, span })
    }

    #[cfg(not(unix))]
    fn new(_address: usize, _len: usize) -> Result<Self> {
        Err(DiError::UnsupportedPlatform {
            os: std::env::consts::OS,
        })
    }
}

#[cfg(unix)]
impl Drop for WritableCode {
    fn drop(&mut self) {
        // SAFETY: same range as made writable in `new`.
        let rc = unsafe {
            libc::mprotect(
                self.start as *mut libc::c_void,
                self.span,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            #[cfg(feature = "logging")]
            warn!(
                target: "interject",
                address = format_args!("{:#x}", self.start),
                error = %std::io::Error::last_os_error(),
                "Failed to restore code protection"
            );
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    static PAGE_SIZE: once_cell::sync::Lazy<usize> = once_cell::sync::Lazy::new(|| {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    });
    *PAGE_SIZE
}
