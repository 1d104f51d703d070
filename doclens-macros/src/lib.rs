//! Procedural macros for the doclens project.
//!
//! This crate provides compile-time code generation for the doclens framework. The
//! [`Fields`] derive turns the fields of a record struct into typed
//! [`Field`](../doclens/field/struct.Field.html) accessors, so queries and pipelines name
//! fields through the compiler instead of through string literals.

#[allow(unused_extern_crates)]
extern crate self as doclens_macros;

use convert_case::{Case, Casing};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields as SynFields, Ident, LitStr, Type, parse_macro_input};

/// Derives typed field accessors for a struct with named fields.
///
/// For a struct `Person`, generates a module `person` holding one function per field that
/// returns a `Field` typed with the field's Rust type and named with its wire name, plus a
/// `FIELDS` constant listing every wire name in declaration order.
///
/// Wire names follow serde: `#[serde(rename = "...")]` on a field and
/// `#[serde(rename_all = "...")]` on the struct are honoured, and `#[serde(skip)]` fields
/// are left out.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize, Fields)]
/// pub struct Person {
///     #[serde(rename = "_id")]
///     pub id: Id<Person>,
///     pub name: String,
///     pub age: i32,
/// }
///
/// let adults = person::age().gte(18);           // { "age": { "$gte": 18 } }
/// assert_eq!(person::FIELDS, &["_id", "name", "age"]);
/// ```
#[proc_macro_derive(Fields, attributes(serde))]
pub fn derive_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_fields_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// A field that will get an accessor.
struct FieldInfo {
    ident: Ident,
    ty: Type,
    wire_name: String,
}

fn derive_fields_impl(input: &DeriveInput) -> Result<TokenStream2, syn::Error> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Fields derive does not support generic structs",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            SynFields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Fields derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(input, "Fields derive only supports structs"));
        }
    };

    let rename_all = parse_rename_all(input)?;
    let mut infos = Vec::with_capacity(fields.len());
    for field in fields {
        if let Some(info) = parse_field(field, rename_all)? {
            infos.push(info);
        }
    }

    let module_name = format_ident!("{}", name.to_string().to_case(Case::Snake));
    let accessors = infos.iter().map(|info| {
        let FieldInfo { ident, ty, wire_name } = info;
        let doc = format!("The `{wire_name}` field of [`{name}`].");

        quote! {
            #[doc = #doc]
            pub fn #ident() -> ::doclens::field::Field<#ty> {
                ::doclens::field::Field::new(#wire_name)
            }
        }
    });
    let wire_names = infos.iter().map(|info| &info.wire_name);
    let module_doc = format!("Typed field accessors of [`{name}`].");

    Ok(quote! {
        #[doc = #module_doc]
        #[allow(dead_code)]
        pub mod #module_name {
            use super::*;

            #(#accessors)*

            /// Wire names of every field, in declaration order.
            pub const FIELDS: &[&str] = &[#(#wire_names),*];
        }
    })
}

/// Reads the case conversion of a struct-level `#[serde(rename_all = "...")]`.
fn parse_rename_all(input: &DeriveInput) -> Result<Option<RenameRule>, syn::Error> {
    let mut rule = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                let value: LitStr = meta.value()?.parse()?;
                rule = Some(RenameRule::parse(&value)?);
            } else if meta.input.peek(syn::Token![=]) {
                meta.value()?.parse::<syn::Expr>()?;
            } else if meta.input.peek(syn::token::Paren) {
                meta.parse_nested_meta(|nested| skip_value(&nested))?;
            }
            Ok(())
        })?;
    }

    Ok(rule)
}

/// A serde `rename_all` rule, applied to field names the way serde applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(value: &LitStr) -> Result<Self, syn::Error> {
        Ok(match value.value().as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            "SCREAMING-KEBAB-CASE" => Self::ScreamingKebab,
            other => {
                return Err(syn::Error::new_spanned(
                    value,
                    format!("unknown rename_all rule `{other}`"),
                ));
            }
        })
    }

    /// Renames a snake_case field. Words are split on `_` only.
    fn apply(self, field: &str) -> String {
        match self {
            Self::Lower | Self::Snake => field.to_string(),
            Self::Upper | Self::ScreamingSnake => field.to_ascii_uppercase(),
            Self::Pascal => {
                let mut pascal = String::with_capacity(field.len());
                let mut capitalize = true;
                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        pascal.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        pascal.push(ch);
                    }
                }
                pascal
            }
            Self::Camel => {
                let pascal = Self::Pascal.apply(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                    None => pascal,
                }
            }
            Self::Kebab => field.replace('_', "-"),
            Self::ScreamingKebab => Self::ScreamingSnake.apply(field).replace('_', "-"),
        }
    }
}

fn skip_value(meta: &syn::meta::ParseNestedMeta<'_>) -> Result<(), syn::Error> {
    if meta.input.peek(syn::Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    }
    Ok(())
}

/// Parses a field, returning `None` for fields serde skips.
fn parse_field(field: &syn::Field, rename_all: Option<RenameRule>) -> Result<Option<FieldInfo>, syn::Error> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "Fields must be named"))?;

    let rust_name = ident.to_string();
    let rust_name = rust_name.strip_prefix("r#").unwrap_or(&rust_name).to_string();
    let mut wire_name = match rename_all {
        Some(rule) => rule.apply(&rust_name),
        None => rust_name,
    };
    let mut skipped = false;

    for attr in &field.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if meta.input.peek(syn::Token![=]) {
                    let value: LitStr = meta.value()?.parse()?;
                    wire_name = value.value();
                } else {
                    // `rename(serialize = "...", deserialize = "...")`
                    meta.parse_nested_meta(|nested| {
                        if nested.path.is_ident("serialize") {
                            let value: LitStr = nested.value()?.parse()?;
                            wire_name = value.value();
                        } else {
                            skip_value(&nested)?;
                        }
                        Ok(())
                    })?;
                }
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                skipped = true;
            } else if meta.input.peek(syn::Token![=]) {
                meta.value()?.parse::<syn::Expr>()?;
            } else if meta.input.peek(syn::token::Paren) {
                meta.parse_nested_meta(|nested| skip_value(&nested))?;
            }
            Ok(())
        })?;
    }

    if skipped {
        return Ok(None);
    }

    Ok(Some(FieldInfo { ident, ty: field.ty.clone(), wire_name }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn names(input: DeriveInput) -> Vec<String> {
        let rename_all = parse_rename_all(&input).unwrap();
        let Data::Struct(data) = &input.data else {
            unreachable!()
        };

        data.fields
            .iter()
            .filter_map(|field| parse_field(field, rename_all).unwrap())
            .map(|info| info.wire_name)
            .collect()
    }

    #[test]
    fn wire_names_follow_serde() {
        let input: DeriveInput = parse_quote! {
            #[serde(rename_all = "camelCase", deny_unknown_fields)]
            struct Person {
                #[serde(rename = "_id")]
                id: String,
                first_name: String,
                #[serde(skip)]
                cache: u32,
                #[serde(default, rename(serialize = "years", deserialize = "age"))]
                age: i32,
                r#type: String,
            }
        };

        assert_eq!(names(input), vec!["_id", "firstName", "years", "type"]);
    }

    #[test]
    fn rename_rules_split_words_on_underscores_only() {
        let renamed = |rule: &str| {
            let input: DeriveInput = syn::parse_str(&format!(
                r#"#[serde(rename_all = "{rule}")] struct Contact {{ first_name: String, address_line1: String }}"#
            ))
            .unwrap();
            names(input)
        };

        assert_eq!(renamed("lowercase"), vec!["first_name", "address_line1"]);
        assert_eq!(renamed("UPPERCASE"), vec!["FIRST_NAME", "ADDRESS_LINE1"]);
        assert_eq!(renamed("snake_case"), vec!["first_name", "address_line1"]);
        assert_eq!(renamed("kebab-case"), vec!["first-name", "address-line1"]);
        assert_eq!(renamed("SCREAMING-KEBAB-CASE"), vec!["FIRST-NAME", "ADDRESS-LINE1"]);
        assert_eq!(renamed("PascalCase"), vec!["FirstName", "AddressLine1"]);
        assert_eq!(renamed("camelCase"), vec!["firstName", "addressLine1"]);
    }

    #[test]
    fn rejects_tuple_structs_and_generics() {
        let tuple: DeriveInput = parse_quote! { struct Pair(u32, u32); };
        assert!(derive_fields_impl(&tuple).is_err());

        let generic: DeriveInput = parse_quote! { struct Wrapper<T> { value: T } };
        assert!(derive_fields_impl(&generic).is_err());
    }

    #[test]
    fn generates_a_snake_case_module() {
        let input: DeriveInput = parse_quote! {
            struct PersonRecord {
                name: String,
            }
        };

        let tokens = derive_fields_impl(&input).unwrap().to_string();
        assert!(tokens.contains("pub mod person_record"));
        assert!(tokens.contains("\"name\""));
    }
}
