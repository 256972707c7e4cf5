//! # interject - Runtime Dependency Injection with Constructor Interception
//!
//! A dependency injection container that resolves bindings by type, injects
//! the members types declare about themselves, and can hook the native entry
//! point of a constructor so that code calling it directly receives injected
//! instances too.
//!
//! ## Features
//!
//! - **Bindings** - Transient, singleton, literal instance and factory lifetimes
//! - **Trait objects** - Bind `dyn Trait` to a concrete type declared with [`upcast!`]
//! - **Member injection** - Fields, properties and arrays declared through [`Reflect`]
//! - **Cycles** - Member cycles are resolved by deferring the injection
//! - **Metadata cache** - Type descriptors built once and shared across threads
//! - **Interception** - Entry point patching on x86 and x86-64 (unix)
//! - **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use interject::{Container, Inject, Reflect, TypeBuilder, upcast};
//!
//! trait Mailer: Send + Sync {
//!     fn send(&self, to: &str) -> String;
//! }
//!
//! struct SmtpMailer;
//!
//! impl Mailer for SmtpMailer {
//!     fn send(&self, to: &str) -> String {
//!         format!("mail to {to}")
//!     }
//! }
//!
//! impl Reflect for SmtpMailer {
//!     fn describe(ty: &mut TypeBuilder<Self>) {
//!         ty.constructor(|| SmtpMailer);
//!     }
//! }
//!
//! upcast!(SmtpMailer => dyn Mailer);
//!
//! #[derive(Default)]
//! struct Signup {
//!     mailer: Inject<dyn Mailer>,
//! }
//!
//! impl Reflect for Signup {
//!     fn describe(ty: &mut TypeBuilder<Self>) {
//!         ty.constructor(Signup::default).field("mailer", |s| &s.mailer);
//!     }
//! }
//!
//! let container = Container::new();
//! container.bind::<dyn Mailer>().to::<SmtpMailer>().singleton().unwrap();
//! container.bind::<Signup>().to_self().transient().unwrap();
//!
//! let signup = container.get::<Signup>().unwrap();
//! assert_eq!(signup.mailer.get().unwrap().send("ada"), "mail to ada");
//! ```
//!
//! ## Lifetimes
//!
//! - `transient()` - a new instance per resolution, shared within one resolution
//! - `singleton()` - constructed on first resolution, then cached
//! - `to_instance(value)` - a literal, returned as is and never injected
//! - `to_factory::<F>()` - the factory is constructed once, products every time
//!
//! ## Container Registry
//!
//! ```rust
//! use interject::{Container, ContainerConfig, Containers, Reflect, TypeBuilder};
//!
//! struct Settings;
//!
//! impl Reflect for Settings {
//!     fn describe(ty: &mut TypeBuilder<Self>) {
//!         ty.constructor(|| Settings);
//!     }
//! }
//!
//! let registry = Containers::new();
//! let config = ContainerConfig::new().with_registry(&registry);
//! let shared = Container::with_config(&config);
//! let local = Container::with_config(&config);
//!
//! shared.bind::<Settings>().to_self().singleton().unwrap();
//! assert!(local.get::<Settings>().is_ok());
//! ```

// Lets the derive macro refer to `::interject` from inside this crate.
extern crate self as interject;

mod binding;
mod builder;
mod cache;
mod container;
mod descriptor;
mod error;
mod factory;
mod hook;
mod hook_container;
#[cfg(feature = "logging")]
pub mod logging;
mod patch;
mod provider;
mod reflect;
mod registry;
mod resolver;
mod scope;
mod storage;

pub use binding::*;
pub use builder::*;
pub use cache::*;
pub use container::*;
pub use descriptor::*;
pub use error::*;
pub use factory::*;
pub use hook::*;
pub use hook_container::*;
pub use patch::*;
pub use provider::*;
pub use reflect::*;
pub use registry::*;
pub use scope::*;
pub use storage::*;

/// Derive [`Reflect`] from `#[inject]` and `#[base]` field attributes
#[cfg(feature = "derive")]
pub use interject_derive::Reflect;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BindingRecord, Container, Containers, DiError, Factory, Inject, InjectArray, Injectable,
        Lifetime, Reflect, Result, TypeBuilder, Upcast, Value, upcast,
    };
    pub use std::sync::Arc;
}
