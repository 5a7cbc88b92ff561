//! Primary key descriptor and key tuples.
//!
//! A [`PrimaryKey`] is derived from entity metadata at the start of every bulk
//! call. It is never cached: building it is cheap and keeps each call correct for
//! the metadata it was given.

use std::fmt;

use chrono::NaiveDateTime;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::entity::{Entity, EntityType, SqlType};
use crate::error::{BulkError, BulkResult};
use crate::value::Value;

/// One part of a (possibly composite) primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPart {
    /// Property name.
    pub property: String,
    /// Column name.
    pub column: String,
    /// Column type.
    pub sql_type: SqlType,
    /// Generated by the backend on insert.
    pub generated: bool,
    /// Sentinel meaning "not yet assigned".
    pub unset: Value,
}

impl KeyPart {
    /// Whether `value` counts as unassigned for this part.
    pub fn is_unset(&self, value: &Value) -> bool {
        value.is_null() || *value == self.unset
    }
}

/// The primary key shape of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey {
    entity: String,
    parts: Vec<KeyPart>,
}

impl PrimaryKey {
    /// Derive the key descriptor from entity metadata.
    pub fn from_entity_type(entity_type: &EntityType) -> BulkResult<Self> {
        let parts: Vec<KeyPart> = entity_type
            .key_properties()
            .map(|p| KeyPart {
                property: p.name.clone(),
                column: p.column.clone(),
                sql_type: p.sql_type.clone(),
                generated: p.generated,
                unset: p.sql_type.unset_value(),
            })
            .collect();

        if parts.is_empty() {
            return Err(BulkError::missing_primary_key(&entity_type.name));
        }

        Ok(Self {
            entity: entity_type.name.clone(),
            parts,
        })
    }

    /// Derive the key descriptor for `E`.
    pub fn of<E: Entity>() -> BulkResult<Self> {
        Self::from_entity_type(&E::entity_type())
    }

    /// Entity name, for messages.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// More than one key part.
    pub fn is_composite(&self) -> bool {
        self.parts.len() > 1
    }

    /// Key parts in declaration order.
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Number of key parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Always false; a descriptor has at least one part.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The single key part of a simple key.
    pub fn primary(&self) -> Option<&KeyPart> {
        match self.parts.as_slice() {
            [part] => Some(part),
            _ => None,
        }
    }

    /// The single key part, or a not-implemented error for composite keys.
    pub fn require_simple(&self, operation: &str) -> BulkResult<&KeyPart> {
        self.primary().ok_or_else(|| {
            BulkError::not_implemented(format!(
                "{} does not support composite keys ({} has {} key parts)",
                operation,
                self.entity,
                self.parts.len()
            ))
            .with_model(&self.entity)
        })
    }

    /// Any key part is generated by the backend.
    pub fn is_generated(&self) -> bool {
        self.parts.iter().any(|p| p.generated)
    }

    /// Key column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.column.as_str())
    }

    /// Key property names in order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.property.as_str())
    }

    /// Read the key of a record.
    pub fn key_of<E: Entity>(&self, record: &E) -> BulkResult<Key> {
        self.parts
            .iter()
            .map(|p| {
                record
                    .get_value(&p.property)
                    .ok_or_else(|| BulkError::unknown_property(&self.entity, &p.property))
            })
            .collect::<BulkResult<SmallVec<_>>>()
            .map(Key)
    }

    /// Write a key onto a record.
    pub fn set_key<E: Entity>(&self, record: &mut E, key: &Key) -> BulkResult<()> {
        if key.len() != self.parts.len() {
            return Err(BulkError::invalid_input(format!(
                "key {} has {} parts, {} expects {}",
                key,
                key.len(),
                self.entity,
                self.parts.len()
            )));
        }
        for (part, value) in self.parts.iter().zip(key.values()) {
            record.set_value(&part.property, value.clone())?;
        }
        Ok(())
    }

    /// Whether a record's key is unassigned.
    ///
    /// For composite keys this is true if *any* part equals its sentinel.
    pub fn is_unset<E: Entity>(&self, record: &E) -> bool {
        self.parts.iter().any(|p| match record.get_value(&p.property) {
            Some(v) => p.is_unset(&v),
            None => true,
        })
    }

    /// Whether a key value is unassigned.
    pub fn is_unset_key(&self, key: &Key) -> bool {
        self.parts
            .iter()
            .zip(key.values())
            .any(|(p, v)| p.is_unset(v))
    }

    /// Compare the keys of two records.
    pub fn key_equals<E: Entity>(&self, a: &E, b: &E) -> bool {
        self.parts
            .iter()
            .all(|p| match (a.get_value(&p.property), b.get_value(&p.property)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            })
    }

    /// Validate caller-supplied key tuples against this descriptor.
    ///
    /// Each tuple must have one value per key part, none null, each of a kind the
    /// part's column accepts. Failures name the tuple index.
    pub fn validate(&self, keys: &[Key]) -> BulkResult<()> {
        for (index, key) in keys.iter().enumerate() {
            if key.len() != self.parts.len() {
                return Err(BulkError::invalid_key(
                    index,
                    format!(
                        "{} has {} key parts, got {} values",
                        self.entity,
                        self.parts.len(),
                        key.len()
                    ),
                )
                .with_model(&self.entity));
            }
            for (part, value) in self.parts.iter().zip(key.values()) {
                if value.is_null() {
                    return Err(BulkError::invalid_key(
                        index,
                        format!("'{}' is null", part.property),
                    )
                    .with_model(&self.entity)
                    .with_field(&part.property));
                }
                if !part.sql_type.accepts(value) {
                    return Err(BulkError::invalid_key(
                        index,
                        format!(
                            "'{}' expects {:?}, got {} value {}",
                            part.property,
                            part.sql_type,
                            value.kind(),
                            value
                        ),
                    )
                    .with_model(&self.entity)
                    .with_field(&part.property));
                }
            }
        }
        Ok(())
    }
}

/// An ordered key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(SmallVec<[Value; 2]>);

impl Key {
    /// Build a key from its parts.
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self(values.into_iter().collect())
    }

    /// Key parts in order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No parts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The only part of a single-part key.
    pub fn single(&self) -> Option<&Value> {
        match self.0.as_slice() {
            [v] => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

macro_rules! key_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(v: $ty) -> Self {
                    Self(smallvec::smallvec![Value::from(v)])
                }
            }
        )*
    };
}

key_from_scalar!(i16, i32, i64, bool, String, &str, Uuid, NaiveDateTime, Value);

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into())
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Self(smallvec::smallvec![a.into(), b.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Self(smallvec::smallvec![a.into(), b.into(), c.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PropertyMeta;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Line {
        order_id: i32,
        line_no: i32,
        sku: String,
    }

    crate::impl_entity!(Line, table = "OrderLines";
        order_id: "OrderId" => SqlType::Int, key;
        line_no: "LineNo" => SqlType::Int, key;
        sku: "Sku" => SqlType::Text(Some(32));
    );

    #[test]
    fn test_missing_primary_key() {
        let et = EntityType::new("Loose", "Loose")
            .property(PropertyMeta::new("name", "Name", SqlType::Text(None)));
        let err = PrimaryKey::from_entity_type(&et).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingPrimaryKey);
    }

    #[test]
    fn test_composite_descriptor() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        assert!(pk.is_composite());
        assert!(pk.primary().is_none());
        assert!(!pk.is_generated());
        assert_eq!(pk.columns().collect::<Vec<_>>(), vec!["OrderId", "LineNo"]);
        assert_eq!(
            pk.require_simple("join_delimited").unwrap_err().code,
            ErrorCode::NotImplemented
        );
    }

    #[test]
    fn test_unset_if_any_part_unset() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        let mut line = Line {
            order_id: 7,
            line_no: 0,
            sku: "a".into(),
        };
        assert!(pk.is_unset(&line));
        line.line_no = 1;
        assert!(!pk.is_unset(&line));
    }

    #[test]
    fn test_key_round_trip_on_record() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        let mut line = Line::default();
        pk.set_key(&mut line, &Key::from((3, 9))).unwrap();
        assert_eq!(pk.key_of(&line).unwrap(), Key::from((3i32, 9i32)));
        assert_eq!(line.order_id, 3);
        assert_eq!(line.line_no, 9);
    }

    #[test]
    fn test_key_equals() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        let a = Line {
            order_id: 1,
            line_no: 2,
            sku: "a".into(),
        };
        let b = Line {
            sku: "b".into(),
            ..a.clone()
        };
        let c = Line {
            line_no: 3,
            ..a.clone()
        };
        assert!(pk.key_equals(&a, &b));
        assert!(!pk.key_equals(&a, &c));
    }

    #[test]
    fn test_validate_arity() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        let err = pk
            .validate(&[Key::from((1, 1)), Key::from(5)])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
        assert!(err.message.contains("index: 1"));
    }

    #[test]
    fn test_validate_null_and_kind() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        let err = pk
            .validate(&[Key::new([Value::Int(1), Value::Null])])
            .unwrap_err();
        assert!(err.message.contains("null"));

        let err = pk.validate(&[Key::from((1, "two"))]).unwrap_err();
        assert_eq!(err.context.field.as_deref(), Some("line_no"));

        assert!(pk.validate(&[Key::from((1, 2)), Key::from((1, 3))]).is_ok());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::from((1, "x")).to_string(), "(1, 'x')");
    }
}
