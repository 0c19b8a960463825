//! Field-list rules for messages and aggregates.

use crate::model::{parse_int_literal, EnumVariant, Field};
use crate::source::{EnumConstant, FieldDecl, MethodDecl, TypeDecl};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Field names that never describe wire data
const IGNORED_FIELDS: &[&str] = &["VALUES", "value"];

fn too_long_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:string|array)TooLong\s*\(\s*"(\w+)"\s*,\s*[\w.]+\s*,\s*(\d+)\s*\)"#)
            .expect("valid regex")
    })
}

/// Picks the constructor whose parameter list defines a message's fields.
///
/// The fullest constructor wins, excluding the copy constructor (a single
/// parameter of the enclosing type) and parameterless ones. On equal parameter
/// count the first one declared wins.
pub fn select_constructor(decl: &TypeDecl) -> Option<&MethodDecl> {
    decl.constructors
        .iter()
        .filter(|ctor| !ctor.params.is_empty() && !is_copy_constructor(ctor, &decl.name))
        .fold(None, |best: Option<&MethodDecl>, ctor| match best {
            Some(b) if b.params.len() >= ctor.params.len() => Some(b),
            _ => Some(ctor),
        })
}

fn is_copy_constructor(ctor: &MethodDecl, owner: &str) -> bool {
    ctor.params.len() == 1 && crate::source::simple_type_name(&ctor.params[0].ty) == owner
}

/// Fields of a message: constructor parameters when a suitable constructor
/// exists, field declarations otherwise.
pub fn message_fields(decl: &TypeDecl) -> Vec<Field> {
    let mut fields = match select_constructor(decl) {
        Some(ctor) => {
            let declared: BTreeMap<&str, &FieldDecl> = decl
                .fields
                .iter()
                .filter(|f| !f.is_static())
                .map(|f| (f.name.as_str(), f))
                .collect();
            ctor.params
                .iter()
                .map(|param| {
                    let field_decl = declared.get(param.name.as_str());
                    let nullable =
                        param.is_nullable() || field_decl.is_some_and(|f| f.is_nullable());
                    let mut field = Field::new(&param.name, &param.ty, nullable);
                    field.default_value = field_decl.and_then(|f| f.initializer.clone());
                    field
                })
                .collect()
        }
        None => declared_fields(decl),
    };
    apply_max_lengths(decl, &mut fields);
    fields
}

/// Fields from non-static declarations, in source order.
pub fn declared_fields(decl: &TypeDecl) -> Vec<Field> {
    decl.fields
        .iter()
        .filter(|f| !f.is_static() && !IGNORED_FIELDS.contains(&f.name.as_str()))
        .map(|f| {
            let mut field = Field::new(&f.name, &f.ty, f.is_nullable());
            field.default_value = f.initializer.clone();
            field
        })
        .collect()
}

/// Records length bounds found in `stringTooLong`/`arrayTooLong` validation
/// calls anywhere in the type's methods. Names match case-insensitively.
pub fn apply_max_lengths(decl: &TypeDecl, fields: &mut [Field]) {
    let mut bounds = BTreeMap::new();
    for method in decl.methods.iter().chain(decl.constructors.iter()) {
        for caps in too_long_re().captures_iter(&method.text) {
            if let Ok(limit) = caps[2].parse::<u32>() {
                bounds.insert(caps[1].to_lowercase(), limit);
            }
        }
    }
    if bounds.is_empty() {
        return;
    }
    for field in fields.iter_mut() {
        if let Some(limit) = bounds.get(&field.name.to_lowercase()) {
            field.max_length = Some(*limit);
        }
    }
}

/// Enum variants: the first constructor argument when it is an integer
/// literal, the declaration index otherwise.
pub fn enum_variants(constants: &[EnumConstant]) -> Vec<EnumVariant> {
    constants
        .iter()
        .enumerate()
        .map(|(index, constant)| {
            let value = constant
                .args
                .first()
                .and_then(|arg| parse_int_literal(arg))
                .unwrap_or(index as i64);
            EnumVariant {
                name: constant.name.clone(),
                value,
            }
        })
        .collect()
}
