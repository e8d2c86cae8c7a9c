//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations.
//!
//! # Usage
//!
//! ```ignore
//! use rvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum FaultKind {
//!     #[error("unknown opcode 0x{opcode:02x} at {position}")]
//!     UnknownOpcode { opcode: u8, position: usize },
//!
//!     #[error("bad token: {0}")]
//!     BadToken(String),
//!
//!     #[error("division by zero")]
//!     DivisionByZero,
//! }
//! ```
//!
//! Fields may be left out of the message; only the placeholders that appear in
//! the message are bound and formatted. Format specs (`{opcode:02x}`) and
//! escaped braces (`{{`, `}}`) are supported.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data_enum) => {
            let arms = data_enum
                .variants
                .iter()
                .map(|variant| {
                    let message = message_from_attrs(
                        &variant.attrs,
                        &variant.ident,
                        &format!("variant `{}`", variant.ident),
                    )?;
                    let ident = &variant.ident;
                    let placeholders = Placeholders::scan(&message);

                    Ok(match &variant.fields {
                        Fields::Unit => quote! {
                            Self::#ident => write!(f, #message),
                        },
                        Fields::Unnamed(fields) => {
                            let count = fields.unnamed.len();
                            let bindings = (0..count).map(|i| {
                                if placeholders.uses_index(i) {
                                    format_ident!("f{}", i).into_token_stream()
                                } else {
                                    quote!(_)
                                }
                            });
                            let used: Vec<_> = (0..count)
                                .filter(|i| placeholders.uses_index(*i))
                                .map(|i| format_ident!("f{}", i))
                                .collect();
                            let message = positional_to_named(&message, count);
                            quote! {
                                Self::#ident(#(#bindings),*) => write!(f, #message, #(#used = #used),*),
                            }
                        }
                        Fields::Named(fields) => {
                            let used: Vec<_> = fields
                                .named
                                .iter()
                                .filter_map(|field| field.ident.as_ref())
                                .filter(|ident| placeholders.uses_name(&ident.to_string()))
                                .collect();
                            quote! {
                                Self::#ident { #(#used,)* .. } => write!(f, #message, #(#used = #used),*),
                            }
                        }
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data_struct) => {
            let message = message_from_attrs(
                &input.attrs,
                &input.ident,
                &format!("type `{}`", input.ident),
            )?;
            let placeholders = Placeholders::scan(&message);

            match &data_struct.fields {
                Fields::Unit => quote! { write!(f, #message) },
                Fields::Named(fields) => {
                    let used: Vec<_> = fields
                        .named
                        .iter()
                        .filter_map(|field| field.ident.as_ref())
                        .filter(|ident| placeholders.uses_name(&ident.to_string()))
                        .collect();
                    quote! { write!(f, #message, #(#used = self.#used),*) }
                }
                Fields::Unnamed(fields) => {
                    let count = fields.unnamed.len();
                    let used: Vec<_> = (0..count)
                        .filter(|i| placeholders.uses_index(*i))
                        .collect();
                    let names = used.iter().map(|i| format_ident!("f{}", i));
                    let indices = used.iter().map(|i| syn::Index::from(*i));
                    let message = positional_to_named(&message, count);
                    quote! { write!(f, #message, #(#names = self.#indices),*) }
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Reads the string literal out of an `#[error("...")]` attribute.
fn message_from_attrs<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    let Some(attr) = attrs.iter().find(|attr| attr.path().is_ident("error")) else {
        return Err(syn::Error::new_spanned(
            target,
            format!("missing #[error(\"...\")] attribute on {target_desc}"),
        ));
    };

    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute; use #[error(\"message\")]",
        ));
    };

    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(lit)) => Ok(lit.value()),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] expects a string literal, e.g. #[error(\"unknown opcode {opcode}\")]",
        )),
    }
}

/// Argument names referenced by `{...}` placeholders in a message.
struct Placeholders(Vec<String>);

impl Placeholders {
    fn scan(message: &str) -> Self {
        let mut names = Vec::new();
        let mut chars = message.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                }
                '{' => {
                    let mut name = String::new();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        name.push(c);
                    }
                    let name = name.split(':').next().unwrap_or_default().trim();
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
                _ => {}
            }
        }

        Self(names)
    }

    fn uses_name(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    fn uses_index(&self, index: usize) -> bool {
        self.uses_name(&index.to_string())
    }
}

/// Rewrites `{0}`, `{1:x}` into `{f0}`, `{f1:x}` so tuple fields can be passed by name.
fn positional_to_named(message: &str, field_count: usize) -> String {
    let mut result = message.to_string();
    for i in (0..field_count).rev() {
        result = result
            .replace(&format!("{{{i}}}"), &format!("{{f{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{f{i}:"));
    }
    result
}
