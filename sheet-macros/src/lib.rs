//! Proc macros for character-sheet records.
//!
//! Provides `#[derive(Record)]` so a struct can live in a `RecordStore`
//! and round-trip through the host's keyed persistence map.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Clone, Serialize, Deserialize, Record)]
//! #[record(store = "conditions")]
//! struct Condition {
//!     #[serde(rename = "_id")]
//!     #[record(id)]
//!     id: String,
//!     name: String,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Field, LitStr, Type};

/// Derive macro for `sheet_core::store::Record`.
///
/// # Attributes
///
/// - `#[record(store = "...")]` - Name of the store under the character's
///   `attributes` map (defaults to the snake_case struct name plus `s`)
/// - `#[record(id)]` on a field - The identifier field (defaults to a field
///   named `id`). Its persisted key honours `#[serde(rename = "...")]`.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_record(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_record(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let store = get_store_name(&input)?;

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Record derive only supports structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Record derive only supports structs",
            ))
        }
    };

    let id_field = find_id_field(fields.iter())?.ok_or_else(|| {
        syn::Error::new_spanned(
            &input.ident,
            "Record derive needs an `id` field or a field marked #[record(id)]",
        )
    })?;

    if !is_string_type(&id_field.ty) {
        return Err(syn::Error::new_spanned(
            &id_field.ty,
            "record identifier must be a String",
        ));
    }

    let id_ident = id_field
        .ident
        .as_ref()
        .ok_or_else(|| syn::Error::new_spanned(id_field, "identifier field must be named"))?;
    let id_key = serde_rename(id_field)?.unwrap_or_else(|| id_ident.to_string());

    Ok(quote! {
        impl #impl_generics ::sheet_core::store::Record for #struct_name #ty_generics #where_clause {
            const STORE: &'static str = #store;
            const ID_FIELD: &'static str = #id_key;

            fn id(&self) -> &str {
                &self.#id_ident
            }

            fn set_id(&mut self, id: String) {
                self.#id_ident = id;
            }
        }
    })
}

fn get_store_name(input: &DeriveInput) -> syn::Result<String> {
    let mut store = None;
    for attr in &input.attrs {
        if attr.path().is_ident("record") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("store") {
                    let value: LitStr = meta.value()?.parse()?;
                    store = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported record attribute, expected `store`"))
                }
            })?;
        }
    }

    // Default: snake_case struct name, pluralised
    Ok(store.unwrap_or_else(|| format!("{}s", to_snake_case(&input.ident.to_string()))))
}

fn find_id_field<'a>(fields: impl Iterator<Item = &'a Field> + Clone) -> syn::Result<Option<&'a Field>> {
    for field in fields.clone() {
        if is_marked_id(field)? {
            return Ok(Some(field));
        }
    }

    Ok(fields.into_iter().find(|f| {
        f.ident
            .as_ref()
            .map(|ident| ident == "id")
            .unwrap_or(false)
    }))
}

fn is_marked_id(field: &Field) -> syn::Result<bool> {
    let mut marked = false;
    for attr in &field.attrs {
        if attr.path().is_ident("record") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    marked = true;
                    Ok(())
                } else {
                    Err(meta.error("unsupported record field attribute, expected `id`"))
                }
            })?;
        }
    }
    Ok(marked)
}

/// Find `#[serde(rename = "...")]` on a field, skipping every other serde option.
fn serde_rename(field: &Field) -> syn::Result<Option<String>> {
    let mut rename = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.input.peek(syn::Token![=]) {
                let value: syn::Expr = meta.value()?.parse()?;
                if meta.path.is_ident("rename") {
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }) = value
                    {
                        rename = Some(s.value());
                    }
                }
            } else if meta.input.peek(syn::token::Paren) {
                let _content;
                syn::parenthesized!(_content in meta.input);
            }
            Ok(())
        })?;
    }
    Ok(rename)
}

fn is_string_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "String";
        }
    }
    false
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
