//! Property to column mappings, built once per operation.

use crate::dialect::SqlDialect;
use crate::entity::{Entity, EntityType, PropertyMeta};
use crate::error::{BulkError, BulkResult};
use crate::value::Value;

/// How one property is persisted, rendered for a specific dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMapping {
    /// Property name.
    pub property: String,
    /// Column name (unquoted).
    pub column: String,
    /// Column type, with a ` NULL` suffix when nullable.
    pub column_type: String,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Generated by the backend on insert.
    pub generated: bool,
}

impl PropertyMapping {
    /// Map a single property.
    pub fn new(meta: &PropertyMeta, dialect: &dyn SqlDialect) -> Self {
        let mut column_type = dialect.column_type(&meta.sql_type);
        if meta.nullable {
            column_type.push_str(" NULL");
        }
        Self {
            property: meta.name.clone(),
            column: meta.column.clone(),
            column_type,
            primary_key: meta.primary_key,
            generated: meta.generated,
        }
    }

    /// Map every property of an entity, in declaration order.
    pub fn for_entity(entity_type: &EntityType, dialect: &dyn SqlDialect) -> Vec<Self> {
        entity_type
            .properties
            .iter()
            .map(|p| Self::new(p, dialect))
            .collect()
    }

    /// Column definition for a staging table: quoted name and type.
    pub fn definition(&self, dialect: &dyn SqlDialect) -> String {
        format!("{} {}", dialect.quote(&self.column), self.column_type)
    }

    /// Read this property from a record.
    pub fn value<E: Entity>(&self, record: &E) -> BulkResult<Value> {
        record.get_value(&self.property).ok_or_else(|| {
            BulkError::unknown_property(std::any::type_name::<E>(), &self.property)
        })
    }

    /// The record's value as an escaped SQL literal.
    pub fn literal<E: Entity>(&self, record: &E, dialect: &dyn SqlDialect) -> BulkResult<String> {
        dialect
            .literal(&self.value(record)?)
            .map_err(|e| e.with_field(&self.property))
    }
}

/// Resolve a caller-supplied property list against the mappings.
///
/// Unknown names fail with `UnknownProperty`; key properties cannot be assigned.
pub fn resolve_assignable<'m>(
    mappings: &'m [PropertyMapping],
    entity: &str,
    properties: &[&str],
) -> BulkResult<Vec<&'m PropertyMapping>> {
    if properties.is_empty() {
        return Err(BulkError::invalid_input("no properties to update").with_model(entity));
    }
    properties
        .iter()
        .map(|name| {
            let mapping = mappings
                .iter()
                .find(|m| m.property == *name)
                .ok_or_else(|| BulkError::unknown_property(entity, *name))?;
            if mapping.primary_key {
                return Err(BulkError::invalid_input(format!(
                    "key property '{}' cannot be updated in bulk",
                    name
                ))
                .with_model(entity)
                .with_field(*name));
            }
            Ok(mapping)
        })
        .collect()
}

/// Check a caller-supplied property list against the entity metadata alone.
pub fn validate_assignable(entity_type: &EntityType, properties: &[&str]) -> BulkResult<()> {
    if properties.is_empty() {
        return Err(BulkError::invalid_input("no properties to update").with_model(&entity_type.name));
    }
    for name in properties {
        let meta = entity_type
            .find(name)
            .ok_or_else(|| BulkError::unknown_property(&entity_type.name, *name))?;
        if meta.primary_key {
            return Err(BulkError::invalid_input(format!(
                "key property '{}' cannot be updated in bulk",
                name
            ))
            .with_model(&entity_type.name)
            .with_field(*name));
        }
    }
    Ok(())
}
