//! Mapping backend result rows back onto the caller's records.
//!
//! Insert and merge scripts return one row per affected record, in an order
//! the backend chooses. Rows carrying the staging ordinal are assigned to
//! exactly that record. Without it, insert scripts are matched by position
//! and merge scripts greedily to the next record whose key is still unset,
//! which holds as long as the backend reports inserts in submission order.
//!
//! Keys are collected first and written back only once the whole cursor has
//! been read, so a failed correlation leaves every record untouched.

use tracing::{debug, warn};

use crate::entity::Entity;
use crate::error::{BulkError, BulkResult};
use crate::key::{Key, PrimaryKey};
use crate::statement::ORDINAL_COLUMN;
use crate::value::Value;

/// Column holding the merge action.
pub const ACTION_COLUMN: &str = "action";

/// One row of a result cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl ResultRow {
    /// Build a row from parallel column and value lists.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<C: Into<String>>(pairs: impl IntoIterator<Item = (C, Value)>) -> Self {
        let (columns, values) = pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self { columns, values }
    }

    /// Look up a column, ignoring ASCII case.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// The action a result row reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    /// A new row was inserted.
    Insert,
    /// An existing row was updated.
    Update,
    /// An existing row was deleted.
    Delete,
}

impl RowAction {
    /// Parse the action column; rows without one are inserts.
    pub fn of(row: &ResultRow) -> BulkResult<Self> {
        match row.get(ACTION_COLUMN) {
            None | Some(Value::Null) => Ok(Self::Insert),
            Some(Value::String(s)) => match s.to_ascii_uppercase().as_str() {
                "INSERT" => Ok(Self::Insert),
                "UPDATE" => Ok(Self::Update),
                "DELETE" => Ok(Self::Delete),
                other => Err(BulkError::deserialization(format!(
                    "unknown merge action '{}'",
                    other
                ))),
            },
            Some(other) => Err(BulkError::deserialization(format!(
                "merge action must be text, got {} value",
                other.kind()
            ))),
        }
    }
}

/// The outcome of a bulk call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    /// Rows affected by the operation.
    pub rows_affected: u64,
    /// Keys of inserted rows, in the order the backend reported them.
    pub inserted_keys: Vec<Key>,
}

impl BulkOutcome {
    /// An outcome with a row count and no inserts.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            inserted_keys: Vec::new(),
        }
    }
}

/// Where an insert row without an ordinal lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// The n-th insert row belongs to the n-th record.
    Positional,
    /// The next record whose key is still unset.
    Greedy,
}

/// Keys read from a result cursor, not yet written onto records.
#[derive(Debug, Default)]
pub struct Correlation {
    outcome: BulkOutcome,
    assignments: Vec<(usize, Key)>,
}

impl Correlation {
    /// Number of insert rows read.
    pub fn inserted(&self) -> usize {
        self.outcome.inserted_keys.len()
    }

    /// The outcome the cursor describes.
    pub fn outcome(&self) -> &BulkOutcome {
        &self.outcome
    }

    /// Write the assigned keys onto `records`.
    pub fn write_back<E: Entity>(
        self,
        pk: &PrimaryKey,
        records: &mut [E],
    ) -> BulkResult<BulkOutcome> {
        for (index, key) in &self.assignments {
            let record = records.get_mut(*index).ok_or_else(|| {
                BulkError::internal(format!("no record at index {} to receive a key", index))
            })?;
            pk.set_key(record, key)?;
        }
        Ok(self.outcome)
    }
}

/// Walks result rows and assigns returned keys onto records.
pub struct Correlator<'k> {
    key: &'k PrimaryKey,
    strict: bool,
}

impl<'k> Correlator<'k> {
    /// Create a correlator for a key shape.
    pub fn new(key: &'k PrimaryKey, strict: bool) -> Self {
        Self { key, strict }
    }

    /// Read the rows of an insert script, where every record produced one row.
    ///
    /// Rows without an ordinal are matched by position. Records whose key is
    /// already set keep it.
    pub fn inserts<E: Entity>(
        &self,
        rows: &[ResultRow],
        records: &[E],
    ) -> BulkResult<Correlation> {
        self.correlate(rows, records, Placement::Positional)
    }

    /// Read the rows of a merge script, where only records with unset keys insert.
    pub fn merges<E: Entity>(&self, rows: &[ResultRow], records: &[E]) -> BulkResult<Correlation> {
        self.correlate(rows, records, Placement::Greedy)
    }

    /// Correlate merge `rows` onto `records` and write the keys back.
    ///
    /// `rows_affected` of the outcome is the number of rows read.
    pub fn apply<E: Entity>(
        &self,
        rows: &[ResultRow],
        records: &mut [E],
    ) -> BulkResult<BulkOutcome> {
        self.merges(rows, records)?.write_back(self.key, records)
    }

    fn correlate<E: Entity>(
        &self,
        rows: &[ResultRow],
        records: &[E],
        placement: Placement,
    ) -> BulkResult<Correlation> {
        let assign = self.key.is_generated();
        let mut correlation = Correlation::default();
        let mut claimed = vec![false; records.len()];
        let mut cursor = 0usize;
        let mut position = 0usize;

        for (index, row) in rows.iter().enumerate() {
            correlation.outcome.rows_affected += 1;
            if RowAction::of(row)? != RowAction::Insert {
                continue;
            }

            let key = self.read_key(row)?;
            correlation.outcome.inserted_keys.push(key.clone());
            let nth = position;
            position += 1;
            if !assign {
                continue;
            }

            let target = match (ordinal(row)?, placement) {
                (Some(ord), Placement::Positional) => Some(ord),
                (Some(ord), Placement::Greedy) => {
                    Some(ord).filter(|&i| records.get(i).is_some_and(|r| self.key.is_unset(r)))
                }
                (None, Placement::Positional) => Some(nth),
                (None, Placement::Greedy) => {
                    let found = (cursor..records.len())
                        .find(|&i| !claimed[i] && self.key.is_unset(&records[i]));
                    if let Some(i) = found {
                        cursor = i + 1;
                    }
                    found
                }
            };

            match target.filter(|&i| i < records.len() && !claimed[i]) {
                Some(i) => {
                    claimed[i] = true;
                    if self.key.is_unset(&records[i]) {
                        correlation.assignments.push((i, key));
                    }
                }
                None => self.mismatch(index, &key)?,
            }
        }

        debug!(
            entity = self.key.entity(),
            rows = correlation.outcome.rows_affected,
            inserted = correlation.inserted(),
            "correlated result rows"
        );
        Ok(correlation)
    }

    fn read_key(&self, row: &ResultRow) -> BulkResult<Key> {
        self.key
            .parts()
            .iter()
            .map(|part| {
                row.get(&part.column).cloned().ok_or_else(|| {
                    BulkError::deserialization(format!(
                        "result row has no key column '{}'",
                        part.column
                    ))
                    .with_model(self.key.entity())
                })
            })
            .collect::<BulkResult<Vec<_>>>()
            .map(Key::from)
    }

    fn mismatch(&self, index: usize, key: &Key) -> BulkResult<()> {
        let message = format!(
            "inserted row {} (key {}) has no record with an unset key to receive it",
            index, key
        );
        if self.strict {
            return Err(BulkError::correlation(message).with_model(self.key.entity()));
        }
        warn!(entity = self.key.entity(), "{}", message);
        Ok(())
    }
}

fn ordinal(row: &ResultRow) -> BulkResult<Option<usize>> {
    match row.get(ORDINAL_COLUMN) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(i)) => usize::try_from(*i)
            .map(Some)
            .map_err(|_| BulkError::deserialization(format!("negative ordinal {}", i))),
        Some(other) => Err(BulkError::deserialization(format!(
            "ordinal must be an integer, got {} value",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SqlType;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Item {
        id: i32,
        name: String,
    }

    crate::impl_entity!(Item, table = "Items";
        id: "Id" => SqlType::Int, key, generated;
        name: "Name" => SqlType::Text(None);
    );

    fn items(ids: &[i32]) -> Vec<Item> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Item {
                id: *id,
                name: format!("n{}", i),
            })
            .collect()
    }

    fn insert(id: i64) -> ResultRow {
        ResultRow::from_pairs([("ID", Value::Int(id))])
    }

    #[test]
    fn test_greedy_skips_set_keys() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let mut records = items(&[0, 7, 0, 0]);
        let rows = vec![insert(11), insert(12), insert(13)];
        let out = Correlator::new(&pk, true).apply(&rows, &mut records).unwrap();
        let ids: Vec<i32> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11, 7, 12, 13]);
        assert_eq!(out.rows_affected, 3);
        assert_eq!(out.inserted_keys, vec![Key::from(11), Key::from(12), Key::from(13)]);
    }

    #[test]
    fn test_ordinal_assignment_out_of_order() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let mut records = items(&[0, 0, 0]);
        let rows: Vec<ResultRow> = [(2, 30), (0, 10), (1, 20)]
            .into_iter()
            .map(|(ord, id)| {
                ResultRow::from_pairs([
                    ("action", Value::from("INSERT")),
                    ("_ord", Value::Int(ord)),
                    ("Id", Value::Int(id)),
                ])
            })
            .collect();
        let out = Correlator::new(&pk, true).apply(&rows, &mut records).unwrap();
        let ids: Vec<i32> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(out.inserted_keys[0], Key::from(30));
    }

    #[test]
    fn test_non_insert_rows_are_counted_not_assigned() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let mut records = items(&[5, 0]);
        let rows = vec![
            ResultRow::from_pairs([("action", Value::from("UPDATE")), ("Id", Value::Int(5))]),
            ResultRow::from_pairs([("action", Value::from("DELETE")), ("Id", Value::Int(9))]),
            ResultRow::from_pairs([("action", Value::from("insert")), ("Id", Value::Int(42))]),
        ];
        let out = Correlator::new(&pk, true).apply(&rows, &mut records).unwrap();
        assert_eq!(out.rows_affected, 3);
        assert_eq!(out.inserted_keys, vec![Key::from(42)]);
        assert_eq!(records[1].id, 42);
    }

    #[test]
    fn test_surplus_insert_row() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let rows = vec![insert(1), insert(2)];

        let mut records = items(&[0]);
        let err = Correlator::new(&pk, true)
            .apply(&rows, &mut records)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CorrelationMismatch);

        let mut records = items(&[0]);
        let out = Correlator::new(&pk, false).apply(&rows, &mut records).unwrap();
        assert_eq!(records[0].id, 1);
        assert_eq!(out.inserted_keys.len(), 2);
    }

    #[test]
    fn test_inserts_by_position_keep_preset_keys() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let mut records = items(&[0, 7, 0]);
        let rows = vec![insert(10), insert(11), insert(12)];

        let correlation = Correlator::new(&pk, true).inserts(&rows, &records).unwrap();
        assert_eq!(correlation.inserted(), 3);
        let out = correlation.write_back(&pk, &mut records).unwrap();

        let ids: Vec<i32> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 7, 12]);
        assert_eq!(out.inserted_keys.len(), 3);
    }

    #[test]
    fn test_inserts_by_ordinal_keep_preset_keys() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let mut records = items(&[0, 7, 0]);
        let rows: Vec<ResultRow> = [(1, 21), (2, 22), (0, 20)]
            .into_iter()
            .map(|(ord, id)| ResultRow::from_pairs([("_ord", Value::Int(ord)), ("Id", Value::Int(id))]))
            .collect();

        Correlator::new(&pk, true)
            .inserts(&rows, &records)
            .unwrap()
            .write_back(&pk, &mut records)
            .unwrap();
        let ids: Vec<i32> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![20, 7, 22]);
    }

    #[test]
    fn test_failed_correlation_leaves_records_untouched() {
        let pk = PrimaryKey::of::<Item>().unwrap();
        let mut records = items(&[0, 0]);
        let rows = vec![insert(1), insert(2), insert(3)];

        let err = Correlator::new(&pk, true)
            .apply(&rows, &mut records)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CorrelationMismatch);
        assert_eq!(records, items(&[0, 0]));

        let duplicate = vec![
            ResultRow::from_pairs([("_ord", Value::Int(0)), ("Id", Value::Int(1))]),
            ResultRow::from_pairs([("_ord", Value::Int(0)), ("Id", Value::Int(2))]),
        ];
        let err = Correlator::new(&pk, true)
            .inserts(&duplicate, &records)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CorrelationMismatch);
        assert_eq!(records, items(&[0, 0]));
    }

    #[test]
    fn test_unknown_action() {
        let row = ResultRow::from_pairs([("action", Value::from("UPSERT"))]);
        assert_eq!(RowAction::of(&row).unwrap_err().code, ErrorCode::Deserialization);
    }
}
