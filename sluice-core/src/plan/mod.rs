//! Per-dialect script planners.
//!
//! A planner turns an operation plus its staged payload rows into a
//! [`Script`]. Planners do no I/O: the executor runs the script and hands the
//! result rows to the correlator.

mod postgres;
mod sqlserver;

pub use postgres::PostgresPlanner;
pub use sqlserver::SqlServerPlanner;

use crate::config::BulkConfig;
use crate::dialect::{Dialect, SqlDialect};
use crate::entity::{EntityType, SqlType};
use crate::error::{BulkError, BulkResult};
use crate::key::{Key, PrimaryKey};
use crate::mapping::PropertyMapping;
use crate::query::{TARGET_ALIAS, TranslatedQuery};
use crate::statement::{ORDINAL_COLUMN, Script, StatementBuilder};
use crate::value::Value;

/// One staged payload row, without its ordinal.
pub type Row = Vec<Value>;

/// Alias of the staging table inside generated statements.
pub(crate) const SOURCE_ALIAS: &str = "s";
/// Alias of a delta staging table.
pub(crate) const DELTA_ALIAS: &str = "d";
/// Alias of a key staging table.
pub(crate) const KEYS_ALIAS: &str = "k";

/// Everything a planner needs to know about the target table.
pub struct PlanContext<'a> {
    /// SQL fragment strategy.
    pub dialect: &'a dyn SqlDialect,
    /// Entity metadata.
    pub entity_type: &'a EntityType,
    /// Key descriptor built for this call.
    pub key: &'a PrimaryKey,
    /// Property mappings built for this call.
    pub mappings: &'a [PropertyMapping],
    /// Engine settings.
    pub config: &'a BulkConfig,
}

impl<'a> PlanContext<'a> {
    /// Quoted, qualified target table.
    pub fn table(&self) -> String {
        let schema = self
            .entity_type
            .schema
            .as_deref()
            .or_else(|| self.config.default_schema(self.dialect.dialect()));
        self.dialect.table(schema, &self.entity_type.table)
    }

    /// The target table with the query alias.
    pub fn table_aliased(&self) -> String {
        format!("{} AS {}", self.table(), self.dialect.quote(TARGET_ALIAS))
    }

    /// Mappings of the key parts, in key order.
    pub fn key_mappings(&self) -> BulkResult<Vec<&'a PropertyMapping>> {
        self.key
            .properties()
            .map(|p| {
                self.mappings
                    .iter()
                    .find(|m| m.property == p)
                    .ok_or_else(|| BulkError::unknown_property(self.key.entity(), p))
            })
            .collect()
    }

    /// Mappings the caller supplies on insert.
    pub fn insertable(&self) -> Vec<&'a PropertyMapping> {
        self.mappings.iter().filter(|m| !m.generated).collect()
    }

    /// A statement builder whose first parameters are `params`.
    pub fn builder(&self, params: Vec<Value>) -> StatementBuilder<'a> {
        StatementBuilder::seeded(self.dialect, self.config.payload_binding, params)
    }

    /// `alias.column` for a mapping.
    pub fn column(&self, alias: &str, mapping: &PropertyMapping) -> String {
        self.dialect.column(alias, &mapping.column)
    }

    /// Quoted column list.
    pub fn column_list(&self, mappings: &[&PropertyMapping]) -> String {
        join(mappings.iter().map(|m| self.dialect.quote(&m.column)))
    }

    /// Qualified column list.
    pub fn qualified_list(&self, alias: &str, mappings: &[&PropertyMapping]) -> String {
        join(mappings.iter().map(|m| self.column(alias, m)))
    }

    /// `l.k1 = r.k1 AND l.k2 = r.k2` over the key columns.
    pub fn key_join(&self, left: &str, right: &str, keys: &[&PropertyMapping]) -> String {
        keys.iter()
            .map(|m| format!("{} = {}", self.column(left, m), self.column(right, m)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Staging column definitions, led by the ordinal.
    pub fn staging_definitions(&self, mappings: &[&PropertyMapping]) -> String {
        let ordinal = format!(
            "{} {} NOT NULL",
            self.dialect.quote(ORDINAL_COLUMN),
            self.dialect.column_type(&SqlType::Int)
        );
        std::iter::once(ordinal)
            .chain(mappings.iter().map(|m| m.definition(self.dialect)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Staging column names, led by the ordinal.
pub fn staging_columns<'m>(mappings: &[&'m PropertyMapping]) -> Vec<&'m str> {
    std::iter::once(ORDINAL_COLUMN)
        .chain(mappings.iter().map(|m| m.column.as_str()))
        .collect()
}

/// Prefix every row with its input index.
pub fn with_ordinals(rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let mut staged = Vec::with_capacity(row.len() + 1);
            staged.push(Value::Int(i as i64));
            staged.extend(row.iter().cloned());
            staged
        })
        .collect()
}

/// Key tuples as staging rows.
pub fn key_rows(keys: &[Key]) -> Vec<Row> {
    keys.iter().map(|k| k.values().to_vec()).collect()
}

pub(crate) fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(", ")
}

/// A column set to a fixed payload value.
#[derive(Debug, Clone)]
pub struct Assignment<'m> {
    /// Target column.
    pub mapping: &'m PropertyMapping,
    /// Value written to every affected row.
    pub value: Value,
}

/// Per-key values staged for `update_with`.
#[derive(Debug, Clone)]
pub struct DeltaPlan<'m> {
    /// Key columns, in key order.
    pub keys: Vec<&'m PropertyMapping>,
    /// Assigned columns.
    pub columns: Vec<&'m PropertyMapping>,
    /// Key values followed by assigned values, one row per key.
    pub rows: Vec<Row>,
}

impl DeltaPlan<'_> {
    /// Staged columns: keys then assigned columns.
    pub fn staging(&self) -> Vec<&PropertyMapping> {
        self.keys.iter().chain(self.columns.iter()).copied().collect()
    }
}

/// What happens to filtered rows absent from a merge batch.
#[derive(Debug, Clone)]
pub enum NotMatchedPlan<'m> {
    /// Left alone.
    Ignore,
    /// Deleted.
    Delete,
    /// Set to fixed values.
    Update(Vec<Assignment<'m>>),
}

/// A merge with its column sets resolved.
#[derive(Debug, Clone)]
pub struct MergePlan<'m> {
    /// Key columns, in key order.
    pub keys: Vec<&'m PropertyMapping>,
    /// Staged columns: keys and every non-generated column.
    pub staging: Vec<&'m PropertyMapping>,
    /// Columns written on insert.
    pub insert: Vec<&'m PropertyMapping>,
    /// Columns copied onto matched rows; empty leaves matched rows untouched.
    pub update: Vec<&'m PropertyMapping>,
    /// Values over `staging`, one row per record.
    pub rows: Vec<Row>,
    /// Handling of unmatched target rows.
    pub not_matched: NotMatchedPlan<'m>,
}

/// Builds dialect scripts for the bulk operations.
pub trait ScriptPlanner: Send + Sync {
    /// The dialect this planner targets.
    fn dialect(&self) -> Dialect;

    /// Insert `rows` (values over `columns`), returning the keys of new rows.
    fn add(
        &self,
        ctx: &PlanContext<'_>,
        columns: &[&PropertyMapping],
        rows: &[Row],
    ) -> BulkResult<Script>;

    /// Set fixed values on every row the query selects.
    fn update(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        assignments: &[Assignment<'_>],
    ) -> BulkResult<Script>;

    /// Set per-key values on the selected rows whose key is staged.
    fn update_with(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        delta: &DeltaPlan<'_>,
    ) -> BulkResult<Script>;

    /// Delete the selected rows, restricted to `keys` when given.
    fn remove(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        keys: Option<&[Key]>,
    ) -> BulkResult<Script>;

    /// Merge a batch into the selected rows.
    fn merge(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        plan: &MergePlan<'_>,
    ) -> BulkResult<Script>;
}

/// The planner for a SQL dialect.
pub fn planner_for(dialect: Dialect) -> Option<&'static dyn ScriptPlanner> {
    match dialect {
        Dialect::SqlServer => Some(&SqlServerPlanner),
        Dialect::Postgres => Some(&PostgresPlanner),
        Dialect::InMemory => None,
    }
}
