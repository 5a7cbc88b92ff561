//! Shared in-process tables.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::entity::{Entity, EntityType, SqlType};
use crate::error::{BulkError, BulkResult};
use crate::key::{Key, PrimaryKey};
use crate::query::Query;
use crate::value::Value;

/// A stored row: property name to value.
pub type StoredRow = IndexMap<String, Value>;

/// Rows of one entity keyed by primary key, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    rows: IndexMap<Key, StoredRow>,
    identities: HashMap<String, i64>,
}

impl MemoryTable {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The row stored under `key`.
    pub fn get(&self, key: &Key) -> Option<&StoredRow> {
        self.rows.get(key)
    }

    /// Whether a row is stored under `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.rows.contains_key(key)
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = (&Key, &StoredRow)> {
        self.rows.iter()
    }

    /// Insert a new row; an existing key is a unique constraint violation.
    pub fn insert(&mut self, entity: &str, key: Key, row: StoredRow) -> BulkResult<()> {
        if self.rows.contains_key(&key) {
            return Err(BulkError::unique_violation(
                entity,
                format!("a row with key {} already exists", key),
            ));
        }
        self.rows.insert(key, row);
        Ok(())
    }

    /// Replace an existing row, returning whether one was stored.
    pub fn replace(&mut self, key: &Key, row: StoredRow) -> bool {
        match self.rows.get_mut(key) {
            Some(stored) => {
                *stored = row;
                true
            }
            None => false,
        }
    }

    /// Remove a row, keeping the order of the others.
    pub fn remove(&mut self, key: &Key) -> Option<StoredRow> {
        self.rows.shift_remove(key)
    }

    /// Raise an integer identity so it never hands out `value` again.
    pub fn observe_identity(&mut self, property: &str, value: &Value) {
        if let Value::Int(i) = value {
            let counter = self.identities.entry(property.to_string()).or_insert(0);
            *counter = (*counter).max(*i);
        }
    }

    /// Next generated value for a column: integers count from 1, UUIDs are random.
    pub fn next_value(&mut self, property: &str, sql_type: &SqlType) -> BulkResult<Value> {
        match sql_type {
            SqlType::SmallInt | SqlType::Int | SqlType::BigInt => {
                let next = self.identities.entry(property.to_string()).or_insert(0);
                *next += 1;
                Ok(Value::Int(*next))
            }
            SqlType::Uuid => Ok(Value::Uuid(Uuid::new_v4())),
            other => Err(BulkError::not_implemented(format!(
                "the in-memory store cannot generate {:?} values for '{}'",
                other, property
            ))),
        }
    }
}

/// Table name used as the store key.
pub fn table_name(entity_type: &EntityType) -> String {
    match &entity_type.schema {
        Some(schema) => format!("{}.{}", schema, entity_type.table),
        None => entity_type.table.clone(),
    }
}

/// Read every property of a record.
pub fn to_row<E: Entity>(record: &E, entity_type: &EntityType) -> BulkResult<StoredRow> {
    entity_type
        .properties
        .iter()
        .map(|p| {
            record
                .get_value(&p.name)
                .map(|v| (p.name.clone(), v))
                .ok_or_else(|| BulkError::unknown_property(&entity_type.name, &p.name))
        })
        .collect()
}

/// Build a record from a stored row.
pub fn from_row<E: Entity>(row: &StoredRow) -> BulkResult<E> {
    let mut record = E::default();
    for (property, value) in row {
        record.set_value(property, value.clone())?;
    }
    Ok(record)
}

/// A shared, lock-protected set of in-process tables.
///
/// Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<HashMap<String, MemoryTable>>>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to this database.
    pub fn connect(&self) -> super::MemoryConnection {
        super::MemoryConnection::new(self.clone())
    }

    /// Read a table under the shared lock.
    pub fn read<R>(&self, table: &str, f: impl FnOnce(Option<&MemoryTable>) -> R) -> R {
        let tables = self.tables.read();
        f(tables.get(table))
    }

    /// Modify a table under the exclusive lock, creating it if needed.
    pub fn write<R>(&self, table: &str, f: impl FnOnce(&mut MemoryTable) -> R) -> R {
        let mut tables = self.tables.write();
        f(tables.entry(table.to_string()).or_default())
    }

    /// Copy of every table.
    pub fn snapshot(&self) -> HashMap<String, MemoryTable> {
        self.tables.read().clone()
    }

    /// Replace every table with a snapshot.
    pub fn restore(&self, snapshot: HashMap<String, MemoryTable>) {
        *self.tables.write() = snapshot;
    }

    /// Number of stored `E` rows.
    pub fn count<E: Entity>(&self) -> usize {
        self.read(&table_name(&E::entity_type()), |t| t.map_or(0, MemoryTable::len))
    }

    /// Look up an `E` by key.
    pub fn find<E: Entity>(&self, key: &Key) -> BulkResult<Option<E>> {
        self.read(&table_name(&E::entity_type()), |t| {
            t.and_then(|t| t.get(key)).map(from_row::<E>).transpose()
        })
    }

    /// Every stored `E`, in insertion order.
    pub fn all<E: Entity>(&self) -> BulkResult<Vec<E>> {
        self.select(&Query::all())
    }

    /// Stored `E` rows matching a query, in insertion order.
    pub fn select<E: Entity>(&self, query: &Query<E>) -> BulkResult<Vec<E>> {
        let rows: Vec<StoredRow> = self.read(&table_name(&E::entity_type()), |t| {
            t.map(|t| t.rows().map(|(_, row)| row.clone()).collect())
                .unwrap_or_default()
        });
        let mut matched = Vec::new();
        for row in &rows {
            let record = from_row::<E>(row)?;
            if query.matches(&record) {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    /// Store records directly, bypassing key generation.
    pub fn seed<E: Entity>(&self, records: &[E]) -> BulkResult<()> {
        let entity_type = E::entity_type();
        let pk = PrimaryKey::from_entity_type(&entity_type)?;
        let rows = records
            .iter()
            .map(|r| Ok((pk.key_of(r)?, to_row(r, &entity_type)?)))
            .collect::<BulkResult<Vec<_>>>()?;
        self.write(&table_name(&entity_type), |table| {
            let mut staged = table.clone();
            for (key, row) in rows {
                for (part, value) in pk.parts().iter().zip(key.values()) {
                    if part.generated {
                        staged.observe_identity(&part.property, value);
                    }
                }
                staged.insert(&entity_type.name, key, row)?;
            }
            *table = staged;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::filter::Filter;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tag {
        id: i32,
        label: String,
    }

    crate::impl_entity!(Tag, table = "Tags", schema = "app";
        id: "Id" => SqlType::Int, key, generated;
        label: "Label" => SqlType::Text(None);
    );

    fn tag(id: i32, label: &str) -> Tag {
        Tag {
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_identity_counts_from_one() {
        let mut table = MemoryTable::default();
        assert_eq!(table.next_value("id", &SqlType::Int).unwrap(), Value::Int(1));
        assert_eq!(table.next_value("id", &SqlType::Int).unwrap(), Value::Int(2));
        assert!(matches!(
            table.next_value("id", &SqlType::Uuid).unwrap(),
            Value::Uuid(_)
        ));
        assert!(table.next_value("at", &SqlType::Timestamp).is_err());
    }

    #[test]
    fn test_seed_and_select() {
        let db = MemoryDatabase::new();
        db.seed(&[tag(1, "a"), tag(5, "b")]).unwrap();
        assert_eq!(db.count::<Tag>(), 2);
        assert_eq!(db.find::<Tag>(&Key::from(5)).unwrap(), Some(tag(5, "b")));

        let hits = db
            .select(&Query::<Tag>::new(Filter::equals("label", "a")))
            .unwrap();
        assert_eq!(hits, vec![tag(1, "a")]);

        let next = db.write("app.Tags", |t| t.next_value("id", &SqlType::Int)).unwrap();
        assert_eq!(next, Value::Int(6));
    }

    #[test]
    fn test_seed_duplicate_is_atomic() {
        let db = MemoryDatabase::new();
        let err = db.seed(&[tag(1, "a"), tag(1, "b")]).unwrap_err();
        assert_eq!(err.code, ErrorCode::UniqueConstraint);
        assert_eq!(db.count::<Tag>(), 0);
    }

    #[test]
    fn test_snapshot_restore() {
        let db = MemoryDatabase::new();
        db.seed(&[tag(1, "a")]).unwrap();
        let snap = db.snapshot();
        db.seed(&[tag(2, "b")]).unwrap();
        db.restore(snap);
        assert_eq!(db.all::<Tag>().unwrap(), vec![tag(1, "a")]);
    }
}
