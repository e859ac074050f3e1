//! Schema validation.

use super::{CollectionSchema, IndexSchema, IndexType, PropertyType};
use crate::error::{CoreError, CoreResult};
use std::collections::HashSet;

const MAX_INDEX_PROPERTIES: usize = 3;

/// Validates a full schema set.
///
/// # Errors
///
/// Returns [`CoreError::Schema`] describing the first problem found.
pub fn verify_schemas(schemas: &[CollectionSchema]) -> CoreResult<()> {
    let mut names = HashSet::new();
    for schema in schemas {
        if !names.insert(schema.name.as_str()) {
            return Err(CoreError::schema(format!(
                "duplicate collection '{}'",
                schema.name
            )));
        }
    }
    for schema in schemas {
        verify_collection(schema, &names)?;
    }
    Ok(())
}

fn verify_name(kind: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::schema(format!("empty {kind} name")));
    }
    if name.starts_with('_') {
        return Err(CoreError::schema(format!(
            "{kind} name '{name}' must not start with '_'"
        )));
    }
    Ok(())
}

fn verify_collection(schema: &CollectionSchema, collections: &HashSet<&str>) -> CoreResult<()> {
    verify_name("collection", &schema.name)?;
    verify_name("id", &schema.id_name)?;

    let mut seen = HashSet::new();
    for property in &schema.properties {
        verify_name("property", &property.name)?;
        if property.name == schema.id_name {
            return Err(CoreError::schema(format!(
                "property '{}' collides with the id of '{}'",
                property.name, schema.name
            )));
        }
        if !seen.insert(property.name.as_str()) {
            return Err(CoreError::schema(format!(
                "duplicate property '{}' in '{}'",
                property.name, schema.name
            )));
        }
    }

    let mut seen = HashSet::new();
    for index in &schema.indexes {
        verify_name("index", &index.name)?;
        if !seen.insert(index.name.as_str()) {
            return Err(CoreError::schema(format!(
                "duplicate index '{}' in '{}'",
                index.name, schema.name
            )));
        }
        verify_index(schema, index)?;
    }

    let mut seen = HashSet::new();
    for link in &schema.links {
        verify_name("link", &link.name)?;
        if !seen.insert(link.name.as_str()) {
            return Err(CoreError::schema(format!(
                "duplicate link '{}' in '{}'",
                link.name, schema.name
            )));
        }
        if !collections.contains(link.target.as_str()) {
            return Err(CoreError::schema(format!(
                "link '{}' in '{}' targets unknown collection '{}'",
                link.name, schema.name, link.target
            )));
        }
    }
    Ok(())
}

fn verify_index(schema: &CollectionSchema, index: &IndexSchema) -> CoreResult<()> {
    let fail = |reason: &str| {
        Err(CoreError::schema(format!(
            "index '{}' in '{}': {reason}",
            index.name, schema.name
        )))
    };

    if index.properties.is_empty() || index.properties.len() > MAX_INDEX_PROPERTIES {
        return fail("must have between 1 and 3 properties");
    }

    let composite = index.properties.len() > 1;
    let mut seen = HashSet::new();
    for ip in &index.properties {
        if !seen.insert(ip.name.as_str()) {
            return fail("property listed twice");
        }
        let Some(property) = schema.property_named(&ip.name) else {
            return fail(&format!("unknown property '{}'", ip.name));
        };
        let ty = property.ty;
        if ty.is_object() {
            return fail("object properties cannot be indexed");
        }
        if composite && ty.is_list() && ip.index_type == IndexType::Value {
            return fail("list properties in composite indexes must be hashed");
        }
        match ip.index_type {
            IndexType::HashElements if ty != PropertyType::StringList => {
                return fail("HashElements requires a string list");
            }
            IndexType::Hash if !(ty == PropertyType::String || ty.is_list()) => {
                return fail("Hash requires a string or a list");
            }
            _ => {}
        }
        if !ip.case_sensitive && !ty.is_string() {
            return fail("case-insensitive indexes require strings");
        }
    }
    Ok(())
}
