//! Derive macros for the rvm crate.
//!
//! Provides:
//! - `#[derive(Error)]` - `Display` and `std::error::Error` for error enums and structs

mod error;

use proc_macro::TokenStream;

/// Implements `Display` and `Error` from `#[error("...")]` attributes.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
