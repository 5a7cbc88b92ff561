//! Statements, scripts and chunked staging inserts.
//!
//! Planners describe their work as a [`Script`]: an ordered list of
//! [`Statement`]s executed on one connection. Payload rows are staged with
//! `INSERT ... VALUES` statements of at most `chunk_size` rows each, emitted in
//! input order so that backend-reported insert order follows the caller's order.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dialect::SqlDialect;
use crate::error::{BulkError, BulkResult};
use crate::value::Value;

/// Rows per staging `INSERT`.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Largest chunk a `VALUES` row constructor accepts.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// Staging column carrying the record's input index.
pub const ORDINAL_COLUMN: &str = "_ord";

/// How bulk payload values reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadBinding {
    /// Escaped literals in the statement text.
    #[default]
    Inline,
    /// Bound parameters, falling back to literals past the dialect's limit.
    Parameters,
}

impl std::str::FromStr for PayloadBinding {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" | "literal" | "literals" => Ok(Self::Inline),
            "parameters" | "params" | "bind" => Ok(Self::Parameters),
            other => Err(BulkError::configuration(format!(
                "unknown payload binding '{}', expected 'inline' or 'parameters'",
                other
            ))),
        }
    }
}

/// What the executor does with a statement's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Staging; the row count is ignored.
    Setup,
    /// Intermediate work whose row count is ignored.
    Step,
    /// Row count contributes to `rows_affected`.
    Counted,
    /// Returns result rows for the correlator.
    Rows,
    /// Drops staging objects after success.
    Cleanup,
}

/// One statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Values for placeholders 1..=n.
    pub params: Vec<Value>,
    /// Outcome handling.
    pub kind: StatementKind,
}

impl Statement {
    /// A statement without parameters.
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind,
        }
    }

    /// Attach parameters.
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// An ordered list of statements run on one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    statements: Vec<Statement>,
}

impl Script {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement.
    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    /// Append many statements.
    pub fn extend(&mut self, statements: impl IntoIterator<Item = Statement>) {
        self.statements.extend(statements);
    }

    /// Statements in execution order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the script is empty.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statements of one kind.
    pub fn of_kind(&self, kind: StatementKind) -> impl Iterator<Item = &Statement> {
        self.statements.iter().filter(move |s| s.kind == kind)
    }

    /// All statement texts joined by newlines, for logging.
    pub fn sql(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl IntoIterator for Script {
    type Item = Statement;
    type IntoIter = std::vec::IntoIter<Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

/// Accumulates SQL text and bound parameters for one statement.
pub struct StatementBuilder<'d> {
    dialect: &'d dyn SqlDialect,
    binding: PayloadBinding,
    sql: String,
    params: Vec<Value>,
}

impl<'d> StatementBuilder<'d> {
    /// Start an empty statement.
    pub fn new(dialect: &'d dyn SqlDialect, binding: PayloadBinding) -> Self {
        Self::seeded(dialect, binding, Vec::new())
    }

    /// Start a statement whose first parameters are already bound, typically
    /// the parameters of an embedded query predicate.
    pub fn seeded(dialect: &'d dyn SqlDialect, binding: PayloadBinding, params: Vec<Value>) -> Self {
        Self {
            dialect,
            binding,
            sql: String::new(),
            params,
        }
    }

    /// The dialect in use.
    pub fn dialect(&self) -> &'d dyn SqlDialect {
        self.dialect
    }

    /// The binding currently in effect.
    pub fn binding(&self) -> PayloadBinding {
        self.binding
    }

    /// Parameters bound so far.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Announce `count` upcoming payload values.
    ///
    /// Parameter binding switches to inline literals for the rest of this
    /// statement when the total would exceed the dialect's limit.
    pub fn reserve_payload(&mut self, count: usize) {
        if self.binding != PayloadBinding::Parameters {
            return;
        }
        let limit = self.dialect.max_parameters();
        if self.params.len() + count > limit {
            warn!(
                dialect = %self.dialect.dialect(),
                bound = self.params.len(),
                payload = count,
                limit,
                "payload exceeds the bind parameter limit, falling back to inline literals"
            );
            self.binding = PayloadBinding::Inline;
        }
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// Render a payload value as a literal or a placeholder.
    pub fn payload(&mut self, value: &Value) -> BulkResult<String> {
        match self.binding {
            PayloadBinding::Inline => self.dialect.literal(value),
            PayloadBinding::Parameters => Ok(self.bind(value.clone())),
        }
    }

    /// Append SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append SQL text followed by a newline.
    pub fn line(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self.sql.push('\n');
        self
    }

    /// Append chunked `INSERT ... VALUES` statements staging `rows`.
    ///
    /// `columns` are unquoted names; every row has one value per column.
    pub fn stage_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
        chunk_size: usize,
    ) -> BulkResult<()> {
        for chunk in rows.chunks(chunk_size.max(1)) {
            let sql = insert_values(self, table, columns, chunk)?;
            self.line(&sql);
        }
        Ok(())
    }

    /// Finish as a statement of the given kind.
    pub fn finish(self, kind: StatementKind) -> Statement {
        Statement {
            sql: self.sql.trim_end().to_string(),
            params: self.params,
            kind,
        }
    }
}

/// One staging statement per chunk, each with its own parameter numbering.
pub fn staging_statements(
    dialect: &dyn SqlDialect,
    binding: PayloadBinding,
    table: &str,
    columns: &[&str],
    rows: &[Vec<Value>],
    chunk_size: usize,
) -> BulkResult<Vec<Statement>> {
    rows.chunks(chunk_size.max(1))
        .map(|chunk| {
            let mut builder = StatementBuilder::new(dialect, binding);
            let sql = insert_values(&mut builder, table, columns, chunk)?;
            builder.push(sql.trim_end_matches(';'));
            Ok(builder.finish(StatementKind::Setup))
        })
        .collect()
}

fn insert_values(
    builder: &mut StatementBuilder<'_>,
    table: &str,
    columns: &[&str],
    rows: &[Vec<Value>],
) -> BulkResult<String> {
    builder.reserve_payload(rows.len() * columns.len());
    let dialect = builder.dialect();
    let column_list = columns
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns.len() {
            return Err(BulkError::internal(format!(
                "staging row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let values = row
            .iter()
            .map(|v| builder.payload(v))
            .collect::<BulkResult<Vec<_>>>()?;
        tuples.push(format!("({})", values.join(", ")));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {};",
        table,
        column_list,
        tuples.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqlServerDialect};
    use pretty_assertions::assert_eq;

    fn rows(n: i64) -> Vec<Vec<Value>> {
        (0..n)
            .map(|i| vec![Value::Int(i), Value::String(format!("r{}", i))])
            .collect()
    }

    #[test]
    fn test_inline_staging() {
        let mut b = StatementBuilder::new(&SqlServerDialect, PayloadBinding::Inline);
        b.stage_rows("@ToAdd", &["_ord", "Name"], &rows(2), 1000)
            .unwrap();
        let stmt = b.finish(StatementKind::Setup);
        assert_eq!(
            stmt.sql,
            "INSERT INTO @ToAdd ([_ord], [Name]) VALUES (0, N'r0'), (1, N'r1');"
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_chunks_preserve_order() {
        let stmts = staging_statements(
            &PostgresDialect,
            PayloadBinding::Inline,
            "\"_stage\"",
            &["_ord", "Name"],
            &rows(2500),
            1000,
        )
        .unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].sql.contains("(0, 'r0')"));
        assert!(stmts[0].sql.ends_with("(999, 'r999')"));
        assert!(stmts[1].sql.contains("VALUES (1000, 'r1000')"));
        assert!(stmts[2].sql.ends_with("(2499, 'r2499')"));
    }

    #[test]
    fn test_parameter_binding_continues_after_seed() {
        let mut b = StatementBuilder::seeded(
            &PostgresDialect,
            PayloadBinding::Parameters,
            vec![Value::from("EU")],
        );
        b.stage_rows("\"_stage\"", &["_ord", "Name"], &rows(1), 1000)
            .unwrap();
        let stmt = b.finish(StatementKind::Setup);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"_stage\" (\"_ord\", \"Name\") VALUES ($2, $3);"
        );
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_parameter_limit_falls_back_to_inline() {
        let mut b = StatementBuilder::new(&SqlServerDialect, PayloadBinding::Parameters);
        b.stage_rows("@ToAdd", &["_ord", "Name"], &rows(1100), 1000)
            .unwrap();
        assert_eq!(b.binding(), PayloadBinding::Inline);
        let stmt = b.finish(StatementKind::Rows);
        assert!(stmt.params.len() < 2100);
        assert!(stmt.sql.contains("(1099, N'r1099')"));
    }

    #[test]
    fn test_payload_binding_from_str() {
        assert_eq!("Parameters".parse::<PayloadBinding>().unwrap(), PayloadBinding::Parameters);
        assert_eq!("inline".parse::<PayloadBinding>().unwrap(), PayloadBinding::Inline);
        assert!("bogus".parse::<PayloadBinding>().is_err());
    }
}
