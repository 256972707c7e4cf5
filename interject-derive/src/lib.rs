//! Derive macro for interject
//!
//! `#[derive(Reflect)]` writes the `Reflect::describe` body for a struct with
//! named fields:
//!
//! - `#[inject]` on an `Inject<T>` field declares an injectable field
//! - `#[inject]` on an `InjectArray<T>` field declares an injectable array
//! - `#[base]` on one field declares the composed base type
//! - `Default::default` is declared as the parameterless constructor
//!
//! Struct attributes:
//!
//! - `#[reflect(no_default)]` - Do not declare the `Default` constructor
//! - `#[reflect(extend = path)]` - Call `path(ty)` after the derived declarations
//!
//! # Example
//!
//! ```rust,ignore
//! use interject::{Container, Inject, InjectArray, Reflect, TypeBuilder};
//!
//! #[derive(Default, Reflect)]
//! struct Handler {
//!     #[inject]
//!     db: Inject<Database>,
//!     #[inject]
//!     workers: InjectArray<Worker>,
//!     // Not injected
//!     requests: u64,
//! }
//!
//! #[derive(Default, Reflect)]
//! #[reflect(extend = AdminHandler::methods)]
//! struct AdminHandler {
//!     #[base]
//!     handler: Handler,
//! }
//!
//! impl AdminHandler {
//!     fn methods(ty: &mut TypeBuilder<Self>) {
//!         ty.method("ping", |_: &Self, (): ()| "pong".to_string());
//!     }
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Type, parse_macro_input};

/// Derive macro for the `Reflect` trait.
///
/// # Attributes
///
/// - `#[inject]` - Declare the field for injection. Must be `Inject<T>` or `InjectArray<T>`.
/// - `#[base]` - Declare the field as the composed base. At most one.
/// - `#[reflect(no_default)]` - Skip the `Default::default` constructor.
/// - `#[reflect(extend = path)]` - Add declarations by hand after the derived ones.
#[proc_macro_derive(Reflect, attributes(inject, base, reflect))]
pub fn derive_reflect(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// What a struct-level `#[reflect(...)]` attribute asks for
#[derive(Default)]
struct ReflectOptions {
    no_default: bool,
    extend: Option<syn::Path>,
}

/// How an `#[inject]` field is declared
enum InjectKind {
    Single,
    Array,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // Only support structs with named fields
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Reflect can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Reflect can only be derived for structs",
            ));
        }
    };

    let options = parse_options(&input.attrs)?;

    let mut declarations = Vec::new();
    if !options.no_default {
        declarations.push(quote! {
            ty.constructor(<Self as ::core::default::Default>::default);
        });
    }

    let mut base_seen = false;
    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let member = field_name.to_string();

        if has_attr(&field.attrs, "base") {
            if base_seen {
                return Err(syn::Error::new_spanned(
                    field,
                    "only one field can be marked #[base]",
                ));
            }
            base_seen = true;
            declarations.push(quote! {
                ty.base(|this| &this.#field_name);
            });
        }

        if has_attr(&field.attrs, "inject") {
            match inject_kind(&field.ty) {
                Some(InjectKind::Single) => declarations.push(quote! {
                    ty.field(#member, |this| &this.#field_name);
                }),
                Some(InjectKind::Array) => declarations.push(quote! {
                    ty.array_field(#member, |this| &this.#field_name);
                }),
                None => {
                    return Err(syn::Error::new_spanned(
                        &field.ty,
                        "Fields marked with #[inject] must have type Inject<T> or InjectArray<T>",
                    ));
                }
            }
        }
    }

    if let Some(extend) = &options.extend {
        declarations.push(quote! {
            #extend(ty);
        });
    }

    Ok(quote! {
        impl #impl_generics ::interject::Reflect for #name #ty_generics #where_clause {
            fn describe(ty: &mut ::interject::TypeBuilder<Self>) {
                #(#declarations)*
            }
        }
    })
}

fn has_attr(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}

fn parse_options(attrs: &[Attribute]) -> syn::Result<ReflectOptions> {
    let mut options = ReflectOptions::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("reflect")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("no_default") {
                options.no_default = true;
                Ok(())
            } else if meta.path.is_ident("extend") {
                options.extend = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("expected `no_default` or `extend = path`"))
            }
        })?;
    }
    Ok(options)
}

/// Classify `Inject<T>` and `InjectArray<T>` by the last path segment
fn inject_kind(ty: &Type) -> Option<InjectKind> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if !matches!(segment.arguments, syn::PathArguments::AngleBracketed(_)) {
        return None;
    }
    if segment.ident == "Inject" {
        Some(InjectKind::Single)
    } else if segment.ident == "InjectArray" {
        Some(InjectKind::Array)
    } else {
        None
    }
}
