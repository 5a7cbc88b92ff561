//! Bulk executors.
//!
//! [`BulkExecutor`] is the contract every dialect implements. The SQL
//! dialects share [`RelationalExecutor`], which validates input, stages
//! payload rows, asks the dialect's planner for a script, runs it and
//! correlates the result rows. The in-memory dialect has its own executor in
//! [`crate::memory`].

use async_trait::async_trait;
use chrono::NaiveDateTime;
use indexmap::IndexSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BulkConfig;
use crate::connection::{BulkConnection, ensure_open};
use crate::correlate::{BulkOutcome, Correlator, ResultRow};
use crate::dialect::{Dialect, SqlDialect};
use crate::entity::{Entity, EntityType, SqlType};
use crate::error::{BulkError, BulkResult};
use crate::filter::Filter;
use crate::key::{Key, PrimaryKey};
use crate::mapping::{PropertyMapping, resolve_assignable};
use crate::plan::{
    Assignment, DeltaPlan, MergePlan, NotMatchedPlan, PlanContext, Row, ScriptPlanner, planner_for,
};
use crate::query::{Query, SqlSource, TranslatedQuery};
use crate::statement::{Script, StatementKind};
use crate::value::Value;

/// What a merge does with filtered rows absent from the batch.
#[derive(Debug, Clone, Default)]
pub enum NotMatchedBehavior<E> {
    /// Leave them alone.
    #[default]
    DoNothing,
    /// Copy `properties` from `replacement` onto every unmatched row.
    Update {
        /// Values to write.
        replacement: E,
        /// Properties to copy.
        properties: Vec<String>,
    },
    /// Delete them.
    Delete,
}

/// Merge settings.
#[derive(Debug, Clone)]
pub struct MergeOptions<E> {
    /// Handling of unmatched target rows.
    pub not_matched: NotMatchedBehavior<E>,
    /// Properties never copied onto matched rows.
    pub exclude_from_update: Vec<String>,
}

impl<E> Default for MergeOptions<E> {
    fn default() -> Self {
        Self {
            not_matched: NotMatchedBehavior::DoNothing,
            exclude_from_update: Vec::new(),
        }
    }
}

impl<E> MergeOptions<E> {
    /// Delete unmatched rows.
    pub fn delete() -> Self {
        Self {
            not_matched: NotMatchedBehavior::Delete,
            ..Self::default()
        }
    }

    /// Leave unmatched rows alone.
    pub fn do_nothing() -> Self {
        Self::default()
    }

    /// Update unmatched rows from a replacement record.
    pub fn update_unmatched(replacement: E, properties: &[&str]) -> Self {
        Self {
            not_matched: NotMatchedBehavior::Update {
                replacement,
                properties: properties.iter().map(|p| p.to_string()).collect(),
            },
            ..Self::default()
        }
    }

    /// Never copy these properties onto matched rows.
    pub fn exclude(mut self, properties: &[&str]) -> Self {
        self.exclude_from_update
            .extend(properties.iter().map(|p| p.to_string()));
        self
    }
}

/// The bulk operation contract, implemented once per dialect.
#[async_trait]
pub trait BulkExecutor<E: Entity>: Send + Sync {
    /// The dialect this executor serves.
    fn dialect(&self) -> Dialect;

    /// Narrow `root` to rows whose key is one of `keys`.
    ///
    /// Every key part must match; no keys matches nothing.
    fn join(&self, root: Query<E>, keys: &[Key]) -> BulkResult<Query<E>> {
        let pk = PrimaryKey::of::<E>()?;
        pk.validate(keys)?;
        Ok(root.filter(key_filter(&pk, keys)))
    }

    /// Narrow `root` to the keys listed in `keys`, separated by `delimiter`.
    ///
    /// Only simple keys are supported.
    fn join_delimited(&self, root: Query<E>, keys: &str, delimiter: char) -> BulkResult<Query<E>> {
        let pk = PrimaryKey::of::<E>()?;
        let parsed = parse_delimited(&pk, keys, delimiter)?;
        Ok(root.filter(key_filter(&pk, &parsed)))
    }

    /// Insert `records`, writing generated keys back onto them.
    async fn bulk_add(
        &self,
        conn: &mut dyn BulkConnection,
        records: &mut [E],
    ) -> BulkResult<BulkOutcome>;

    /// Copy `properties` from `replacement` onto every row `query` selects.
    async fn bulk_update(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        replacement: &E,
        properties: &[&str],
    ) -> BulkResult<u64>;

    /// Write per-key values built by `factory` onto the selected rows in `keys`.
    async fn bulk_update_with(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        keys: &[Key],
        properties: &[&str],
        factory: &(dyn for<'k> Fn(&'k Key) -> E + Send + Sync),
    ) -> BulkResult<u64>;

    /// Delete the selected rows, restricted to `keys` when `filter_by_keys`.
    async fn bulk_remove(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        filter_by_keys: bool,
        keys: &[Key],
    ) -> BulkResult<u64>;

    /// Merge `records` into the rows `query` selects.
    async fn bulk_merge(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        records: &mut [E],
        options: MergeOptions<E>,
    ) -> BulkResult<BulkOutcome>;
}

/// A `KeyIn` filter over the key properties.
pub fn key_filter(pk: &PrimaryKey, keys: &[Key]) -> Filter {
    Filter::KeyIn {
        properties: pk.properties().map(str::to_string).collect(),
        keys: keys.iter().cloned().collect::<IndexSet<_>>(),
    }
}

/// Parse a delimited list of simple keys.
///
/// Blank entries are skipped; each entry is parsed as the key column's type.
pub fn parse_delimited(pk: &PrimaryKey, keys: &str, delimiter: char) -> BulkResult<Vec<Key>> {
    let part = pk.require_simple("join_delimited")?;
    keys.split(delimiter)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .enumerate()
        .map(|(index, token)| {
            parse_token(&part.sql_type, token)
                .map(|v| Key::new([v]))
                .map_err(|msg| {
                    BulkError::invalid_key(index, msg)
                        .with_model(pk.entity())
                        .with_field(&part.property)
                })
        })
        .collect()
}

fn parse_token(sql_type: &SqlType, token: &str) -> Result<Value, String> {
    let fail = |what: &str| format!("'{}' is not a valid {}", token, what);
    match sql_type {
        SqlType::SmallInt | SqlType::Int | SqlType::BigInt => {
            token.parse::<i64>().map(Value::Int).map_err(|_| fail("integer"))
        }
        SqlType::Bool => token.parse::<bool>().map(Value::Bool).map_err(|_| fail("boolean")),
        SqlType::Double => token.parse::<f64>().map(Value::Float).map_err(|_| fail("number")),
        SqlType::Uuid => Uuid::parse_str(token).map(Value::Uuid).map_err(|_| fail("uuid")),
        SqlType::Timestamp => NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(token, "%Y-%m-%d %H:%M:%S%.f"))
            .map(Value::DateTime)
            .map_err(|_| fail("timestamp")),
        SqlType::Text(_) | SqlType::Raw(_) => Ok(Value::String(token.to_string())),
    }
}

/// Properties copied onto matched rows by a merge: every non-key,
/// non-generated property not in `exclude`.
pub fn merge_update_properties(entity_type: &EntityType, exclude: &[String]) -> BulkResult<Vec<String>> {
    for name in exclude {
        if entity_type.find(name).is_none() {
            return Err(BulkError::unknown_property(&entity_type.name, name));
        }
    }
    Ok(entity_type
        .properties
        .iter()
        .filter(|p| !p.primary_key && !p.generated && !exclude.contains(&p.name))
        .map(|p| p.name.clone())
        .collect())
}

/// Reject correlation that left records without the keys they should have received.
pub(crate) fn check_inserted(
    pk: &PrimaryKey,
    expected: usize,
    reported: usize,
    strict: bool,
) -> BulkResult<()> {
    if expected == reported {
        return Ok(());
    }
    let message = format!(
        "expected {} inserted rows for {}, the backend reported {}",
        expected,
        pk.entity(),
        reported
    );
    if strict {
        return Err(BulkError::correlation(message).with_model(pk.entity()));
    }
    warn!(entity = pk.entity(), expected, reported, "insert count mismatch");
    Ok(())
}

/// Rows affected and result rows of a script run.
#[derive(Debug, Default)]
pub struct ScriptOutput {
    /// Sum of the counted statements.
    pub rows_affected: u64,
    /// Rows of the result-returning statements, in order.
    pub rows: Vec<ResultRow>,
}

/// Run a script on `conn`, opening it first if needed.
pub async fn run_script(conn: &mut dyn BulkConnection, script: &Script) -> BulkResult<ScriptOutput> {
    ensure_open(conn).await?;
    debug!(
        provider = conn.provider_name(),
        statements = script.len(),
        "running bulk script"
    );
    crate::sluice_trace!(sql = %script.sql(), "bulk script");

    let mut output = ScriptOutput::default();
    for statement in script.statements() {
        match statement.kind {
            StatementKind::Rows => {
                let rows = conn
                    .query(statement)
                    .await
                    .map_err(|e| e.with_sql(&statement.sql))?;
                output.rows.extend(rows);
            }
            StatementKind::Counted => {
                output.rows_affected += conn
                    .execute(statement)
                    .await
                    .map_err(|e| e.with_sql(&statement.sql))?;
            }
            StatementKind::Setup | StatementKind::Step | StatementKind::Cleanup => {
                conn.execute(statement)
                    .await
                    .map_err(|e| e.with_sql(&statement.sql))?;
            }
        }
    }
    Ok(output)
}

/// Bulk executor for the SQL dialects.
pub struct RelationalExecutor {
    sql: &'static dyn SqlDialect,
    planner: &'static dyn ScriptPlanner,
    config: BulkConfig,
}

struct Metadata {
    entity_type: EntityType,
    key: PrimaryKey,
    mappings: Vec<PropertyMapping>,
}

impl RelationalExecutor {
    /// Create an executor for a SQL dialect.
    pub fn new(dialect: Dialect, config: BulkConfig) -> BulkResult<Self> {
        match (dialect.sql(), planner_for(dialect)) {
            (Some(sql), Some(planner)) => Ok(Self {
                sql,
                planner,
                config,
            }),
            _ => Err(BulkError::unsupported_provider(dialect.to_string())
                .with_suggestion("Use MemoryExecutor for in-memory connections")),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    fn metadata<E: Entity>(&self) -> BulkResult<Metadata> {
        let entity_type = E::entity_type();
        let key = PrimaryKey::from_entity_type(&entity_type)?;
        let mappings = PropertyMapping::for_entity(&entity_type, self.sql);
        Ok(Metadata {
            entity_type,
            key,
            mappings,
        })
    }

    fn context<'a>(&'a self, meta: &'a Metadata) -> PlanContext<'a> {
        PlanContext {
            dialect: self.sql,
            entity_type: &meta.entity_type,
            key: &meta.key,
            mappings: &meta.mappings,
            config: &self.config,
        }
    }

    fn translate<E: Entity>(&self, query: &Query<E>) -> BulkResult<TranslatedQuery> {
        let schema = self.config.default_schema(self.sql.dialect());
        query.translate(self.sql, schema)
    }
}

fn row_of<E: Entity>(record: &E, columns: &[&PropertyMapping]) -> BulkResult<Row> {
    columns.iter().map(|m| m.value(record)).collect()
}

fn assignments<'m, E: Entity>(
    mappings: &[&'m PropertyMapping],
    record: &E,
) -> BulkResult<Vec<Assignment<'m>>> {
    mappings
        .iter()
        .map(|m| -> BulkResult<Assignment<'m>> {
            Ok(Assignment {
                mapping: *m,
                value: m.value(record)?,
            })
        })
        .collect()
}

#[async_trait]
impl<E: Entity> BulkExecutor<E> for RelationalExecutor {
    fn dialect(&self) -> Dialect {
        self.sql.dialect()
    }

    async fn bulk_add(
        &self,
        conn: &mut dyn BulkConnection,
        records: &mut [E],
    ) -> BulkResult<BulkOutcome> {
        let meta = self.metadata::<E>()?;
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let script = {
            let ctx = self.context(&meta);
            let columns = ctx.insertable();
            if columns.is_empty() {
                return Err(BulkError::invalid_input("entity has no insertable properties")
                    .with_model(&meta.entity_type.name));
            }
            let rows = records
                .iter()
                .map(|r| row_of(r, &columns))
                .collect::<BulkResult<Vec<_>>>()?;
            self.planner.add(&ctx, &columns, &rows)?
        };

        let output = run_script(conn, &script).await?;
        let correlation = Correlator::new(&meta.key, self.config.strict_correlation)
            .inserts(&output.rows, records)?;
        check_inserted(
            &meta.key,
            records.len(),
            correlation.inserted(),
            self.config.strict_correlation,
        )?;
        let outcome = correlation.write_back(&meta.key, records)?;
        debug!(
            entity = %meta.entity_type.name,
            inserted = outcome.inserted_keys.len(),
            "bulk add complete"
        );
        Ok(outcome)
    }

    async fn bulk_update(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        replacement: &E,
        properties: &[&str],
    ) -> BulkResult<u64> {
        let meta = self.metadata::<E>()?;
        let script = {
            let ctx = self.context(&meta);
            let columns = resolve_assignable(&meta.mappings, &meta.entity_type.name, properties)?;
            let assigned = assignments(&columns, replacement)?;
            let translated = self.translate(query)?;
            self.planner.update(&ctx, &translated, &assigned)?
        };
        let output = run_script(conn, &script).await?;
        Ok(output.rows_affected)
    }

    async fn bulk_update_with(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        keys: &[Key],
        properties: &[&str],
        factory: &(dyn for<'k> Fn(&'k Key) -> E + Send + Sync),
    ) -> BulkResult<u64> {
        let meta = self.metadata::<E>()?;
        if keys.is_empty() {
            return Ok(0);
        }
        meta.key.validate(keys)?;

        let script = {
            let ctx = self.context(&meta);
            let columns = resolve_assignable(&meta.mappings, &meta.entity_type.name, properties)?;
            let rows = keys
                .iter()
                .map(|key| -> BulkResult<Row> {
                    let record = factory(key);
                    let mut row = key.values().to_vec();
                    row.extend(row_of(&record, &columns)?);
                    Ok(row)
                })
                .collect::<BulkResult<Vec<Row>>>()?;
            let delta = DeltaPlan {
                keys: ctx.key_mappings()?,
                columns,
                rows,
            };
            let translated = self.translate(query)?;
            self.planner.update_with(&ctx, &translated, &delta)?
        };
        let output = run_script(conn, &script).await?;
        Ok(output.rows_affected)
    }

    async fn bulk_remove(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        filter_by_keys: bool,
        keys: &[Key],
    ) -> BulkResult<u64> {
        let meta = self.metadata::<E>()?;
        if filter_by_keys {
            if keys.is_empty() {
                return Ok(0);
            }
            meta.key.validate(keys)?;
        }

        let script = {
            let ctx = self.context(&meta);
            let translated = self.translate(query)?;
            self.planner
                .remove(&ctx, &translated, filter_by_keys.then_some(keys))?
        };
        let output = run_script(conn, &script).await?;
        Ok(output.rows_affected)
    }

    async fn bulk_merge(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        records: &mut [E],
        options: MergeOptions<E>,
    ) -> BulkResult<BulkOutcome> {
        let meta = self.metadata::<E>()?;
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let script = {
            let ctx = self.context(&meta);
            let keys = ctx.key_mappings()?;
            let staging: Vec<&PropertyMapping> = meta
                .mappings
                .iter()
                .filter(|m| m.primary_key || !m.generated)
                .collect();
            let update_names = merge_update_properties(&meta.entity_type, &options.exclude_from_update)?;
            let update: Vec<&PropertyMapping> = meta
                .mappings
                .iter()
                .filter(|m| update_names.contains(&m.property))
                .collect();

            let not_matched = match &options.not_matched {
                NotMatchedBehavior::DoNothing => NotMatchedPlan::Ignore,
                NotMatchedBehavior::Delete => NotMatchedPlan::Delete,
                NotMatchedBehavior::Update {
                    replacement,
                    properties,
                } => {
                    let names: Vec<&str> = properties.iter().map(String::as_str).collect();
                    let columns =
                        resolve_assignable(&meta.mappings, &meta.entity_type.name, &names)?;
                    NotMatchedPlan::Update(assignments(&columns, replacement)?)
                }
            };

            let rows = records
                .iter()
                .map(|r| row_of(r, &staging))
                .collect::<BulkResult<Vec<_>>>()?;
            let plan = MergePlan {
                keys,
                insert: ctx.insertable(),
                staging,
                update,
                rows,
                not_matched,
            };
            let translated = self.translate(query)?;
            self.planner.merge(&ctx, &translated, &plan)?
        };

        let expected = if meta.key.is_generated() {
            Some(records.iter().filter(|r| meta.key.is_unset(*r)).count())
        } else {
            None
        };

        let output = run_script(conn, &script).await?;
        let correlation = Correlator::new(&meta.key, self.config.strict_correlation)
            .merges(&output.rows, records)?;
        if let Some(expected) = expected {
            check_inserted(
                &meta.key,
                expected,
                correlation.inserted(),
                self.config.strict_correlation,
            )?;
        }
        let outcome = correlation.write_back(&meta.key, records)?;
        debug!(
            entity = %meta.entity_type.name,
            affected = outcome.rows_affected,
            inserted = outcome.inserted_keys.len(),
            "bulk merge complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::plan::fixtures::Product;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default)]
    struct Line {
        order_id: i32,
        line_no: i32,
    }

    crate::impl_entity!(Line, table = "Lines";
        order_id: "OrderId" => SqlType::Int, key;
        line_no: "LineNo" => SqlType::Int, key;
    );

    #[test]
    fn test_parse_delimited() {
        let pk = PrimaryKey::of::<Product>().unwrap();
        let keys = parse_delimited(&pk, " 1, 2,,3 ", ',').unwrap();
        assert_eq!(keys, vec![Key::from(1), Key::from(2), Key::from(3)]);

        let err = parse_delimited(&pk, "1;x", ';').unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKey);
        assert!(err.message.contains("index: 1"));
    }

    #[test]
    fn test_parse_delimited_rejects_composite() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        assert_eq!(
            parse_delimited(&pk, "1,2", ',').unwrap_err().code,
            ErrorCode::NotImplemented
        );
    }

    #[test]
    fn test_merge_update_properties() {
        let et = Product::entity_type();
        assert_eq!(merge_update_properties(&et, &[]).unwrap(), vec!["name", "region"]);
        assert_eq!(
            merge_update_properties(&et, &["region".to_string()]).unwrap(),
            vec!["name"]
        );
        assert_eq!(
            merge_update_properties(&et, &["nope".to_string()]).unwrap_err().code,
            ErrorCode::UnknownProperty
        );
    }

    #[test]
    fn test_key_filter_composite() {
        let pk = PrimaryKey::of::<Line>().unwrap();
        let filter = key_filter(&pk, &[Key::from((1, 2))]);
        let hit = Line {
            order_id: 1,
            line_no: 2,
        };
        let partial = Line {
            order_id: 1,
            line_no: 3,
        };
        assert!(filter.matches(&|p: &str| hit.get_value(p)));
        assert!(!filter.matches(&|p: &str| partial.get_value(p)));
    }

    #[test]
    fn test_memory_dialect_is_not_relational() {
        let err = RelationalExecutor::new(Dialect::InMemory, BulkConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::UnsupportedProvider);
    }
}
