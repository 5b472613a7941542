use proc_macro::TokenStream;
use quote::quote;
use syn::*;

use crate::error;

type Result<T> = std::result::Result<T, syn::Error>;

pub fn from_row(input: DeriveInput) -> Result<TokenStream> {
    let DeriveInput { ident, generics, data, .. } = input;
    let Data::Struct(data) = data else {
        error!(ident, "FromRow can only be derived for structs");
    };
    let Fields::Named(FieldsNamed { named, .. }) = data.fields else {
        error!(ident, "FromRow requires named fields");
    };

    let fields = named.iter().map(|f| f.ident.as_ref().unwrap());
    let names = named.iter().map(|f| f.ident.as_ref().unwrap().to_string());

    let mut generics = generics;
    for ty in generics.type_params_mut() {
        ty.bounds.push(syn::parse_quote!(::dbwire::Decode));
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::dbwire::FromRow for #ident #ty_generics #where_clause {
            fn from_row(row: &::dbwire::RowView<'_>) -> ::dbwire::Result<Self> {
                Ok(Self {
                    #(#fields: row.get(#names)?,)*
                })
            }
        }
    }
    .into())
}
