use proc_macro::TokenStream;
use syn::DeriveInput;

mod from_row;

macro_rules! error {
    ($span:expr, $($tt:tt)*) => {
        return Err(syn::Error::new_spanned($span, format!($($tt)*)))
    };
}
pub(crate) use error;

/// Derives [`dbwire::FromRow`] for a struct with named fields, decoding
/// each field from the row column of the same name.
#[proc_macro_derive(FromRow)]
pub fn from_row(input: TokenStream) -> TokenStream {
    match from_row::from_row(syn::parse_macro_input!(input as DeriveInput)) {
        Ok(ok) => ok,
        Err(err) => err.into_compile_error().into(),
    }
}
