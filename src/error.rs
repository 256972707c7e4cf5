//! Error types for resolution, injection and hooking

use std::any::TypeId;
use thiserror::Error;

/// Errors that can occur during dependency injection operations
#[derive(Error, Debug)]
pub enum DiError {
    /// No binding is registered for the requested type
    ///
    /// Only raised by the strict accessors (`Container::get`). `Container::resolve`
    /// reports a missing binding as `Ok(None)` and lets the caller decide.
    #[error("Binding not found: {type_name}")]
    NotFound {
        type_name: &'static str,
        type_id: TypeId,
    },

    /// The bound type could not be instantiated
    #[error("Cannot instantiate {type_name}: {reason}")]
    Instantiation {
        type_name: &'static str,
        reason: String,
    },

    /// The supplied constructor arguments do not match the constructor arity
    #[error("Constructor of {type_name} takes {expected} argument(s), {actual} supplied")]
    ArgumentMismatch {
        type_name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No constructor with the requested signature exists
    #[error("The constructor with {arity} parameter(s) for {type_name} does not exist")]
    ConstructorNotFound {
        type_name: &'static str,
        arity: usize,
    },

    /// No method with the requested name or signature exists
    #[error("The method '{method}' does not exist for {type_name}")]
    MethodNotFound {
        type_name: &'static str,
        method: String,
    },

    /// A member could not be injected
    #[error("Unable to inject on {member} at {owner}: {source}")]
    Injection {
        member: &'static str,
        owner: &'static str,
        #[source]
        source: Box<DiError>,
    },

    /// Circular dependency that cannot be broken by deferring a member injection
    #[error("Circular dependency detected while resolving: {type_name}")]
    CircularDependency { type_name: &'static str },

    /// A value did not hold the type it was expected to hold
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A hook was installed with a missing method reference
    #[error("Cannot install hook: original method {original}, injected method {injected}")]
    HookPrecondition {
        original: &'static str,
        injected: &'static str,
    },

    /// The hook record does not match the interception it was asked to perform
    #[error("Hook on {method} has signature incompatible with {expected}")]
    HookSignature {
        method: &'static str,
        expected: &'static str,
    },

    /// Another live hook already patches the entry point
    #[error("{method} is already hooked by hook {hook}")]
    AlreadyHooked { method: &'static str, hook: u64 },

    /// Entry point patching is not implemented for this instruction set
    #[error("Entry point patching is not supported on {arch}")]
    UnsupportedArchitecture { arch: &'static str },

    /// Changing memory protection is not implemented for this platform
    #[error("Changing code protection is not supported on {os}")]
    UnsupportedPlatform { os: &'static str },

    /// The operating system refused to change the protection of a code page
    #[error("Failed to change protection of {address:#x}: {source}")]
    Protection {
        address: usize,
        #[source]
        source: std::io::Error,
    },

    /// The owning container has been disposed
    #[error("Container has been disposed")]
    Disposed,

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create a NotFound error for a type
    #[inline]
    pub fn not_found<T: ?Sized + 'static>() -> Self {
        Self::NotFound {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    /// Create an Instantiation error
    #[inline]
    pub fn instantiation(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Instantiation {
            type_name,
            reason: reason.into(),
        }
    }

    /// Create an Injection error wrapping the failure of one member
    #[inline]
    pub fn injection(member: &'static str, owner: &'static str, source: DiError) -> Self {
        Self::Injection {
            member,
            owner,
            source: Box::new(source),
        }
    }

    /// Create a CircularDependency error
    #[inline]
    pub fn circular(type_name: &'static str) -> Self {
        Self::CircularDependency { type_name }
    }

    /// Create a TypeMismatch error
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>(found: &'static str) -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found,
        }
    }

    /// Create a HookPrecondition error from the presence of both references
    #[inline]
    pub fn hook_precondition(original_present: bool, injected_present: bool) -> Self {
        let describe = |present: bool| if present { "present" } else { "missing" };
        Self::HookPrecondition {
            original: describe(original_present),
            injected: describe(injected_present),
        }
    }

    /// Whether this is a lookup miss the caller may recover from
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
