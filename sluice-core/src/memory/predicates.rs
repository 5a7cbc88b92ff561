use std::collections::HashSet;

use crate::entity::Entity;
use crate::key::{Key, PrimaryKey};
use crate::value::Value;

/// Key set membership over materialized records.
///
/// Simple keys test one property; composite keys test the whole tuple, so
/// `(1, 2)` never matches a row keyed `(1, 3)`.
#[derive(Debug, Clone)]
pub enum KeyPredicate {
    /// One key property.
    Single {
        /// Property tested.
        property: String,
        /// Accepted values.
        values: HashSet<Value>,
    },
    /// Every key property, compared as a tuple.
    Tuple {
        /// Properties tested, in key order.
        properties: Vec<String>,
        /// Accepted tuples.
        keys: HashSet<Key>,
    },
}

impl KeyPredicate {
    /// Build a predicate for `keys` over the shape of `pk`.
    pub fn new(pk: &PrimaryKey, keys: &[Key]) -> Self {
        match pk.parts() {
            [part] => Self::Single {
                property: part.property.clone(),
                values: keys.iter().filter_map(|k| k.single().cloned()).collect(),
            },
            parts => Self::Tuple {
                properties: parts.iter().map(|p| p.property.clone()).collect(),
                keys: keys.iter().cloned().collect(),
            },
        }
    }

    /// Whether no key can match.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single { values, .. } => values.is_empty(),
            Self::Tuple { keys, .. } => keys.is_empty(),
        }
    }

    /// Test a key tuple.
    pub fn matches_key(&self, key: &Key) -> bool {
        match self {
            Self::Single { values, .. } => key.single().is_some_and(|v| values.contains(v)),
            Self::Tuple { keys, .. } => keys.contains(key),
        }
    }

    /// Test a record.
    pub fn matches<E: Entity>(&self, record: &E) -> bool {
        match self {
            Self::Single { property, values } => record
                .get_value(property)
                .is_some_and(|v| values.contains(&v)),
            Self::Tuple { properties, keys } => properties
                .iter()
                .map(|p| record.get_value(p))
                .collect::<Option<Vec<_>>>()
                .is_some_and(|values| keys.contains(&Key::from(values))),
        }
    }
}
