use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, GenericArgument, Lit, PathArguments, Type, parse_macro_input};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

/// Parse a `key = "value"` pair inside an attribute list.
fn parse_str_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    match meta.input.parse::<Lit>()? {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

#[derive(Default)]
struct ColumnAttr {
    skip: bool,
    name: Option<String>,
}

/// Parse #[column(skip)] and #[column(name = "...")]
fn parse_column_attr(field: &syn::Field) -> syn::Result<ColumnAttr> {
    let mut column = ColumnAttr::default();
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("column")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                column.skip = true;
                Ok(())
            } else if meta.path.is_ident("name") {
                column.name = Some(parse_str_value(&meta)?);
                Ok(())
            } else {
                Err(meta.error("expected `skip` or `name`"))
            }
        })?;
    }
    Ok(column)
}

struct RelationAttr {
    local: String,
    foreign: String,
}

/// Parse #[relation(local = "...", foreign = "...")]; `foreign` defaults to `id`.
fn parse_relation_attr(field: &syn::Field) -> syn::Result<Option<RelationAttr>> {
    let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("relation")) else {
        return Ok(None);
    };

    let mut local = None;
    let mut foreign = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("local") {
            local = Some(parse_str_value(&meta)?);
            Ok(())
        } else if meta.path.is_ident("foreign") {
            foreign = Some(parse_str_value(&meta)?);
            Ok(())
        } else {
            Err(meta.error("expected `local` or `foreign`"))
        }
    })?;

    let local = local.ok_or_else(|| syn::Error::new_spanned(attr, "relation needs `local = \"...\"`"))?;
    Ok(Some(RelationAttr {
        local,
        foreign: foreign.unwrap_or_else(|| "id".to_string()),
    }))
}

/// Parse #[entity(table = "...")] attribute and return table name
fn parse_entity_attr(input: &DeriveInput) -> syn::Result<String> {
    let mut table_name = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                table_name = Some(parse_str_value(&meta)?);
                Ok(())
            } else {
                Err(meta.error("expected `table`"))
            }
        })?;
    }
    table_name.ok_or_else(|| {
        syn::Error::new_spanned(&input.ident, "missing #[entity(table = \"...\")]")
    })
}

/// The single generic argument of `Wrapper<T>`, if `ty` is one.
fn unwrap_generic<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}

fn last_ident(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(path) => path.path.segments.last().map(|s| s.ident.to_string()),
        _ => None,
    }
}

/// Map Rust type to generic SQL type name
fn rust_type_to_sql_type(ty: &Type) -> &'static str {
    let inner = unwrap_generic(ty, "Option").unwrap_or(ty);
    let Some(name) = last_ident(inner) else {
        return "text";
    };

    match name.as_str() {
        "StatusId" => "integer",
        "u64" | "i64" => "bigint",
        "u32" | "i32" | "u16" | "i16" | "u8" | "i8" | "usize" | "isize" => "integer",
        "bool" => "boolean",
        "f64" | "f32" => "double",
        "Value" => "json",
        s if s.ends_with("Datetime") || s == "DateTime" => "datetime",
        // Default to text for String and everything else
        _ => "text",
    }
}

/// Derive macro for the `Entity` trait.
///
/// ## Container attribute
///
/// - `#[entity(table = "...")]` - table name (required)
///
/// ## Field attributes
///
/// - `#[id]` - `i64` primary key (required)
/// - `#[status]` - `StatusId` lifecycle column (required)
/// - `#[created_at]` - store-assigned creation timestamp (required)
/// - `#[column(name = "...")]` - override the column name
/// - `#[column(skip)]` - not stored
/// - `#[relation(local = "...", foreign = "...")]` - belongs-to relation on an
///   `Option<Box<Target>>` field; `foreign` defaults to `id`. Never a column.
///
/// ## Example
///
/// ```text
/// #[derive(Debug, Clone, Default, Serialize, Deserialize, Entity)]
/// #[entity(table = "vfs_files")]
/// #[serde(rename_all = "camelCase", default)]
/// pub struct VfsFile {
///     #[id]
///     pub id: i64,
///     pub folder_id: i64,
///     #[created_at]
///     pub created_at: Option<StorageDatetime>,
///     #[status]
///     pub status_id: StatusId,
///     #[relation(local = "folder_id")]
///     pub folder: Option<Box<VfsFolder>>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, id, status, created_at, column, relation))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand_entity(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Entity only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Entity only supports structs")),
    };

    let table_name = parse_entity_attr(input)?;

    let mut column_names: Vec<String> = Vec::new();
    let mut column_types: Vec<&'static str> = Vec::new();
    let mut json_keys: Vec<String> = Vec::new();
    let mut relations = Vec::new();

    let mut id_field = None;
    let mut status_field = None;
    let mut created_at_field = None;

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };

        if let Some(relation) = parse_relation_attr(field)? {
            let target = unwrap_generic(&field.ty, "Option")
                .and_then(|ty| unwrap_generic(ty, "Box").or(Some(ty)))
                .ok_or_else(|| {
                    syn::Error::new_spanned(&field.ty, "relation fields must be Option<Box<T>>")
                })?;
            let relation_name = field_name.to_string();
            let json_key = to_camel_case(&relation_name);
            let RelationAttr { local, foreign } = relation;
            relations.push(quote! {
                vfs_storage::Relation {
                    name: #relation_name,
                    json_key: #json_key,
                    local: #local,
                    foreign: #foreign,
                    target: <#target as vfs_storage::Entity>::meta,
                }
            });
            continue;
        }

        let column = parse_column_attr(field)?;
        if column.skip {
            continue;
        }

        let col_name = column.name.unwrap_or_else(|| field_name.to_string());
        if has_attr(field, "id") {
            id_field = Some((field_name, col_name.clone()));
        }
        if has_attr(field, "status") {
            status_field = Some((field_name, col_name.clone()));
        }
        if has_attr(field, "created_at") {
            created_at_field = Some(col_name.clone());
        }

        column_types.push(rust_type_to_sql_type(&field.ty));
        json_keys.push(to_camel_case(&field_name.to_string()));
        column_names.push(col_name);
    }

    let (id_field_name, id_column) =
        id_field.ok_or_else(|| syn::Error::new_spanned(name, "No field marked with #[id]"))?;
    let (status_field_name, status_column) = status_field
        .ok_or_else(|| syn::Error::new_spanned(name, "No field marked with #[status]"))?;
    let created_at_column = created_at_field
        .ok_or_else(|| syn::Error::new_spanned(name, "No field marked with #[created_at]"))?;

    let column_literals: Vec<_> = column_names.iter().map(|s| s.as_str()).collect();
    let json_key_literals: Vec<_> = json_keys.iter().map(|s| s.as_str()).collect();

    Ok(quote! {
        impl vfs_storage::Entity for #name {
            fn table_name() -> &'static str {
                #table_name
            }

            fn columns() -> &'static [&'static str] {
                &[#(#column_literals),*]
            }

            fn column_types() -> &'static [&'static str] {
                &[#(#column_types),*]
            }

            fn json_keys() -> &'static [&'static str] {
                &[#(#json_key_literals),*]
            }

            fn relations() -> &'static [vfs_storage::Relation] {
                const RELATIONS: &[vfs_storage::Relation] = &[#(#relations),*];
                RELATIONS
            }

            fn id_column() -> &'static str {
                #id_column
            }

            fn status_column() -> &'static str {
                #status_column
            }

            fn created_at_column() -> &'static str {
                #created_at_column
            }

            fn id(&self) -> i64 {
                self.#id_field_name
            }

            fn set_id(&mut self, id: i64) {
                self.#id_field_name = id;
            }

            fn status(&self) -> vfs_storage::StatusId {
                self.#status_field_name
            }

            fn set_status(&mut self, status: vfs_storage::StatusId) {
                self.#status_field_name = status;
            }
        }
    })
}
