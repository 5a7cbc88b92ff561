//! Entity metadata consumed from the ORM layer.
//!
//! The engine never inspects records by reflection. An entity exposes its table,
//! its ordered property list and by-name accessors through the [`Entity`] trait,
//! usually implemented with [`impl_entity!`](crate::impl_entity).
//!
//! ```rust
//! use sluice_core::entity::{Entity, SqlType};
//! use sluice_core::impl_entity;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Widget {
//!     id: i32,
//!     name: Option<String>,
//! }
//!
//! impl_entity!(Widget, table = "Widgets";
//!     id: "Id" => SqlType::Int, key, generated;
//!     name: "Name" => SqlType::Text(None), nullable;
//! );
//!
//! let et = Widget::entity_type();
//! assert_eq!(et.table, "Widgets");
//! assert_eq!(et.properties.len(), 2);
//! ```

use std::borrow::Cow;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::error::BulkResult;
use crate::value::Value;

/// Column type of a persisted property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    /// Boolean / bit.
    Bool,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Double,
    /// Text, optionally length-limited.
    Text(Option<u32>),
    /// UUID / uniqueidentifier.
    Uuid,
    /// Timestamp without time zone.
    Timestamp,
    /// Backend-specific type text used verbatim.
    Raw(Cow<'static, str>),
}

impl SqlType {
    /// The "unset" sentinel for a key of this type: zero for value types,
    /// absence for reference types.
    pub fn unset_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::SmallInt | Self::Int | Self::BigInt => Value::Int(0),
            Self::Double => Value::Float(0.0),
            Self::Uuid => Value::Uuid(Uuid::nil()),
            Self::Timestamp => Value::DateTime(NaiveDateTime::default()),
            Self::Text(_) | Self::Raw(_) => Value::Null,
        }
    }

    /// Whether a non-null value has a kind this column can hold.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::SmallInt | Self::Int | Self::BigInt, Value::Int(_)) => true,
            (Self::Double, Value::Float(_) | Value::Int(_)) => true,
            (Self::Text(_), Value::String(_)) => true,
            (Self::Uuid, Value::Uuid(_)) => true,
            (Self::Timestamp, Value::DateTime(_)) => true,
            (Self::Raw(_), _) => true,
            _ => false,
        }
    }
}

/// Metadata for one persisted property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMeta {
    /// Rust-side property name.
    pub name: String,
    /// Database column name.
    pub column: String,
    /// Column type.
    pub sql_type: SqlType,
    /// Column accepts `NULL`.
    pub nullable: bool,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Value is generated by the backend on insert.
    pub generated: bool,
}

impl PropertyMeta {
    /// Create a non-null, non-key, non-generated property.
    pub fn new(name: impl Into<String>, column: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            sql_type,
            nullable: false,
            primary_key: false,
            generated: false,
        }
    }

    /// Mark as part of the primary key.
    pub fn key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as generated on insert.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Mark as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Table-level metadata for an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Rust type name, for messages.
    pub name: String,
    /// Table name.
    pub table: String,
    /// Schema, if not the connection default.
    pub schema: Option<String>,
    /// Properties in declaration order.
    pub properties: Vec<PropertyMeta>,
}

impl EntityType {
    /// Start building metadata for `name` stored in `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            schema: None,
            properties: Vec::new(),
        }
    }

    /// Set the schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a property.
    pub fn property(mut self, property: PropertyMeta) -> Self {
        self.properties.push(property);
        self
    }

    /// Look up a property by name.
    pub fn find(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Key properties in declaration order.
    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.iter().filter(|p| p.primary_key)
    }
}

/// A persisted application record.
pub trait Entity: Default + Clone + Send + Sync + 'static {
    /// Metadata describing the table and properties.
    fn entity_type() -> EntityType;

    /// Read a property by name; `None` if the property does not exist.
    fn get_value(&self, property: &str) -> Option<Value>;

    /// Write a property by name.
    fn set_value(&mut self, property: &str, value: Value) -> BulkResult<()>;
}

/// Implement [`Entity`] for a plain struct.
///
/// Each line names a field, its column and [`SqlType`], followed by optional
/// flags (`key`, `generated`, `nullable`):
///
/// ```rust,ignore
/// impl_entity!(Child, table = "Children", schema = "app";
///     parent_id: "ParentId" => SqlType::Int, key;
///     id: "Id" => SqlType::Int, key;
///     name: "Name" => SqlType::Text(Some(100)), nullable;
/// );
/// ```
#[macro_export]
macro_rules! impl_entity {
    (
        $type:ident, table = $table:expr $(, schema = $schema:expr)? ;
        $( $field:ident : $column:expr => $sql_type:expr $(, $flag:ident)* ; )*
    ) => {
        impl $crate::entity::Entity for $type {
            fn entity_type() -> $crate::entity::EntityType {
                $crate::entity::EntityType::new(stringify!($type), $table)
                    $( .schema($schema) )?
                    $(
                        .property(
                            $crate::entity::PropertyMeta::new(stringify!($field), $column, $sql_type)
                                $( .$flag() )*
                        )
                    )*
            }

            fn get_value(&self, property: &str) -> Option<$crate::value::Value> {
                match property {
                    $( stringify!($field) => Some($crate::value::Value::from(self.$field.clone())), )*
                    _ => None,
                }
            }

            fn set_value(
                &mut self,
                property: &str,
                value: $crate::value::Value,
            ) -> $crate::error::BulkResult<()> {
                match property {
                    $(
                        stringify!($field) => {
                            self.$field = $crate::value::FromValue::from_value(value).map_err(|e| {
                                e.with_model(stringify!($type)).with_field(property)
                            })?;
                            Ok(())
                        }
                    )*
                    _ => Err($crate::error::BulkError::unknown_property(
                        stringify!($type),
                        property,
                    )),
                }
            }
        }
    };
}
