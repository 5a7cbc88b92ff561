//! PostgreSQL scripts.
//!
//! Payload rows are staged in temporary tables, one statement per chunk. A
//! merge is emulated in three steps (unmatched, matched, inserts), each a
//! data-modifying CTE whose `RETURNING` rows are appended to a results table
//! with a sequence column. A final ordered `SELECT` feeds the correlator.

use super::{
    Assignment, DELTA_ALIAS, DeltaPlan, KEYS_ALIAS, MergePlan, NotMatchedPlan, PlanContext, Row,
    SOURCE_ALIAS, ScriptPlanner, join, key_rows, staging_columns, with_ordinals,
};
use crate::correlate::ACTION_COLUMN;
use crate::dialect::Dialect;
use crate::error::{BulkError, BulkResult};
use crate::key::Key;
use crate::mapping::PropertyMapping;
use crate::query::{TARGET_ALIAS, TranslatedQuery};
use crate::statement::{
    ORDINAL_COLUMN, Script, Statement, StatementBuilder, StatementKind, staging_statements,
};

const ADD_TABLE: &str = "_sluice_add";
const DELTA_TABLE: &str = "_sluice_delta";
const KEYS_TABLE: &str = "_sluice_keys";
const MERGE_TABLE: &str = "_sluice_merge";
const TARGET_TABLE: &str = "_sluice_target";
const RESULTS_TABLE: &str = "_sluice_results";

const SEQ_COLUMN: &str = "_seq";
const SNAPSHOT_ALIAS: &str = "g";
const RETURNED: &str = "r";

/// Plans PostgreSQL statement sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresPlanner;

impl PostgresPlanner {
    fn drop_table(ctx: &PlanContext<'_>, table: &str, kind: StatementKind) -> Statement {
        Statement::new(
            kind,
            format!("DROP TABLE IF EXISTS {}", ctx.dialect.quote(table)),
        )
    }

    fn stage(
        script: &mut Script,
        ctx: &PlanContext<'_>,
        table: &str,
        columns: &[&PropertyMapping],
        rows: &[Row],
    ) -> BulkResult<()> {
        let quoted = ctx.dialect.quote(table);
        script.push(Self::drop_table(ctx, table, StatementKind::Setup));
        script.push(Statement::new(
            StatementKind::Setup,
            format!(
                "CREATE TEMP TABLE {} ({})",
                quoted,
                ctx.staging_definitions(columns)
            ),
        ));
        script.extend(staging_statements(
            ctx.dialect,
            ctx.config.payload_binding,
            &quoted,
            &staging_columns(columns),
            &with_ordinals(rows),
            ctx.config.chunk_size,
        )?);
        Ok(())
    }

    fn cleanup(script: &mut Script, ctx: &PlanContext<'_>, tables: &[&str]) {
        for table in tables {
            script.push(Self::drop_table(ctx, table, StatementKind::Cleanup));
        }
    }

    /// `"c" = value` pairs; PostgreSQL does not qualify `SET` targets.
    fn set_list(
        builder: &mut StatementBuilder<'_>,
        ctx: &PlanContext<'_>,
        assignments: &[Assignment<'_>],
    ) -> BulkResult<String> {
        builder.reserve_payload(assignments.len());
        let parts = assignments
            .iter()
            .map(|a| -> BulkResult<String> {
                let value = builder.payload(&a.value)?;
                Ok(format!("{} = {}", ctx.dialect.quote(&a.mapping.column), value))
            })
            .collect::<BulkResult<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    fn copy_list(ctx: &PlanContext<'_>, from: &str, columns: &[&PropertyMapping]) -> String {
        join(columns.iter().map(|m| {
            format!("{} = {}", ctx.dialect.quote(&m.column), ctx.column(from, m))
        }))
    }

    /// Wrap a data-modifying statement so its returned rows land in the results table.
    fn record(
        ctx: &PlanContext<'_>,
        action: &str,
        with_ordinal: bool,
        keys: &[&PropertyMapping],
        modifying: &str,
    ) -> String {
        let d = ctx.dialect;
        let mut columns = vec![d.quote(ACTION_COLUMN)];
        let mut projection = vec![format!("'{}'", action)];
        if with_ordinal {
            columns.push(d.quote(ORDINAL_COLUMN));
            projection.push(d.quote(ORDINAL_COLUMN));
        }
        for m in keys {
            columns.push(d.quote(&m.column));
            projection.push(d.quote(&m.column));
        }
        format!(
            "WITH {} AS ({}) INSERT INTO {} ({}) SELECT {} FROM {}",
            d.quote(RETURNED),
            modifying,
            d.quote(RESULTS_TABLE),
            columns.join(", "),
            projection.join(", "),
            d.quote(RETURNED)
        )
    }

    fn not_in_batch(ctx: &PlanContext<'_>, keys: &[&PropertyMapping]) -> String {
        format!(
            "NOT EXISTS (SELECT 1 FROM {} AS {} WHERE {})",
            ctx.dialect.quote(MERGE_TABLE),
            ctx.dialect.quote(SOURCE_ALIAS),
            ctx.key_join(SOURCE_ALIAS, TARGET_ALIAS, keys)
        )
    }

    fn in_snapshot(ctx: &PlanContext<'_>, keys: &[&PropertyMapping]) -> String {
        ctx.key_join(TARGET_ALIAS, SNAPSHOT_ALIAS, keys)
    }

    fn snapshot(script: &mut Script, ctx: &PlanContext<'_>, query: &TranslatedQuery, keys: &[&PropertyMapping]) {
        let d = ctx.dialect;
        let projection = ctx.qualified_list(TARGET_ALIAS, keys);
        script.push(Self::drop_table(ctx, TARGET_TABLE, StatementKind::Setup));
        script.push(Statement::new(
            StatementKind::Setup,
            format!(
                "CREATE TEMP TABLE {} AS SELECT {} FROM {} WITH NO DATA",
                d.quote(TARGET_TABLE),
                projection,
                query.from_clause()
            ),
        ));
        script.push(
            Statement::new(
                StatementKind::Setup,
                format!(
                    "INSERT INTO {} {}",
                    d.quote(TARGET_TABLE),
                    query.select_sql(&projection)
                ),
            )
            .with_params(query.params.clone()),
        );
    }

    fn results_table(script: &mut Script, ctx: &PlanContext<'_>, keys: &[&PropertyMapping]) {
        let d = ctx.dialect;
        let key_columns = keys.iter().map(|m| {
            let base = m.column_type.strip_suffix(" NULL").unwrap_or(&m.column_type);
            format!("{} {} NULL", d.quote(&m.column), base)
        });
        let columns = [
            format!("{} serial", d.quote(SEQ_COLUMN)),
            format!("{} text NOT NULL", d.quote(ACTION_COLUMN)),
            format!("{} integer NULL", d.quote(ORDINAL_COLUMN)),
        ]
        .into_iter()
        .chain(key_columns)
        .collect::<Vec<_>>()
        .join(", ");

        script.push(Self::drop_table(ctx, RESULTS_TABLE, StatementKind::Setup));
        script.push(Statement::new(
            StatementKind::Setup,
            format!("CREATE TEMP TABLE {} ({})", d.quote(RESULTS_TABLE), columns),
        ));
    }
}

impl ScriptPlanner for PostgresPlanner {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn add(
        &self,
        ctx: &PlanContext<'_>,
        columns: &[&PropertyMapping],
        rows: &[Row],
    ) -> BulkResult<Script> {
        let d = ctx.dialect;
        let keys = ctx.key_mappings()?;
        let mut script = Script::new();
        Self::stage(&mut script, ctx, ADD_TABLE, columns, rows)?;
        script.push(Statement::new(
            StatementKind::Rows,
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} AS {} ORDER BY {} RETURNING {}",
                ctx.table(),
                ctx.column_list(columns),
                ctx.qualified_list(SOURCE_ALIAS, columns),
                d.quote(ADD_TABLE),
                d.quote(SOURCE_ALIAS),
                d.column(SOURCE_ALIAS, ORDINAL_COLUMN),
                ctx.column_list(&keys)
            ),
        ));
        Self::cleanup(&mut script, ctx, &[ADD_TABLE]);
        Ok(script)
    }

    fn update(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        assignments: &[Assignment<'_>],
    ) -> BulkResult<Script> {
        query.check_version()?;
        let mut b = ctx.builder(query.params.clone());
        let set = Self::set_list(&mut b, ctx, assignments)?;
        b.push(&format!(
            "UPDATE {} SET {}{}",
            query.from_clause(),
            set,
            query.where_clause()
        ));
        let mut script = Script::new();
        script.push(b.finish(StatementKind::Counted));
        Ok(script)
    }

    fn update_with(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        delta: &DeltaPlan<'_>,
    ) -> BulkResult<Script> {
        query.check_version()?;
        let d = ctx.dialect;
        let mut script = Script::new();
        Self::stage(&mut script, ctx, DELTA_TABLE, &delta.staging(), &delta.rows)?;
        script.push(
            Statement::new(
                StatementKind::Counted,
                format!(
                    "UPDATE {} SET {} FROM {} AS {} WHERE {}{}",
                    query.from_clause(),
                    Self::copy_list(ctx, DELTA_ALIAS, &delta.columns),
                    d.quote(DELTA_TABLE),
                    d.quote(DELTA_ALIAS),
                    ctx.key_join(TARGET_ALIAS, DELTA_ALIAS, &delta.keys),
                    query.and_clause()
                ),
            )
            .with_params(query.params.clone()),
        );
        Self::cleanup(&mut script, ctx, &[DELTA_TABLE]);
        Ok(script)
    }

    fn remove(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        keys: Option<&[Key]>,
    ) -> BulkResult<Script> {
        query.check_version()?;
        let d = ctx.dialect;
        let mut script = Script::new();

        let sql = match keys {
            Some(keys) => {
                let key_columns = ctx.key_mappings()?;
                Self::stage(&mut script, ctx, KEYS_TABLE, &key_columns, &key_rows(keys))?;
                format!(
                    "DELETE FROM {} USING {} AS {} WHERE {}{}",
                    query.from_clause(),
                    d.quote(KEYS_TABLE),
                    d.quote(KEYS_ALIAS),
                    ctx.key_join(TARGET_ALIAS, KEYS_ALIAS, &key_columns),
                    query.and_clause()
                )
            }
            None => format!("DELETE FROM {}{}", query.from_clause(), query.where_clause()),
        };

        script.push(Statement::new(StatementKind::Counted, sql).with_params(query.params.clone()));
        if keys.is_some() {
            Self::cleanup(&mut script, ctx, &[KEYS_TABLE]);
        }
        Ok(script)
    }

    fn merge(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        plan: &MergePlan<'_>,
    ) -> BulkResult<Script> {
        query.check_version()?;
        if plan.insert.is_empty() {
            return Err(BulkError::invalid_input("merge has no insertable columns")
                .with_model(&ctx.entity_type.name));
        }
        let d = ctx.dialect;
        let keys = &plan.keys;
        let target_keys = ctx.qualified_list(TARGET_ALIAS, keys);
        let mut script = Script::new();

        Self::stage(&mut script, ctx, MERGE_TABLE, &plan.staging, &plan.rows)?;
        Self::snapshot(&mut script, ctx, query, keys);
        Self::results_table(&mut script, ctx, keys);

        let snapshot_from = format!("{} AS {}", d.quote(TARGET_TABLE), d.quote(SNAPSHOT_ALIAS));

        // Unmatched rows first, while the batch has not touched the table.
        match &plan.not_matched {
            NotMatchedPlan::Ignore => {}
            NotMatchedPlan::Delete => {
                let modifying = format!(
                    "DELETE FROM {} USING {} WHERE {} AND {} RETURNING {}",
                    ctx.table_aliased(),
                    snapshot_from,
                    Self::in_snapshot(ctx, keys),
                    Self::not_in_batch(ctx, keys),
                    target_keys
                );
                script.push(Statement::new(
                    StatementKind::Step,
                    Self::record(ctx, "DELETE", false, keys, &modifying),
                ));
            }
            NotMatchedPlan::Update(assignments) => {
                let mut b = ctx.builder(Vec::new());
                let set = Self::set_list(&mut b, ctx, assignments)?;
                let modifying = format!(
                    "UPDATE {} SET {} FROM {} WHERE {} AND {} RETURNING {}",
                    ctx.table_aliased(),
                    set,
                    snapshot_from,
                    Self::in_snapshot(ctx, keys),
                    Self::not_in_batch(ctx, keys),
                    target_keys
                );
                b.push(&Self::record(ctx, "UPDATE", false, keys, &modifying));
                script.push(b.finish(StatementKind::Step));
            }
        }

        if !plan.update.is_empty() {
            let modifying = format!(
                "UPDATE {} SET {} FROM {} AS {}, {} WHERE {} AND {} RETURNING {}, {}",
                ctx.table_aliased(),
                Self::copy_list(ctx, SOURCE_ALIAS, &plan.update),
                d.quote(MERGE_TABLE),
                d.quote(SOURCE_ALIAS),
                snapshot_from,
                ctx.key_join(TARGET_ALIAS, SOURCE_ALIAS, keys),
                Self::in_snapshot(ctx, keys),
                d.column(SOURCE_ALIAS, ORDINAL_COLUMN),
                target_keys
            );
            script.push(Statement::new(
                StatementKind::Step,
                Self::record(ctx, "UPDATE", true, keys, &modifying),
            ));
        }

        let inserting = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} AS {} WHERE NOT EXISTS (SELECT 1 FROM {} WHERE {}) ORDER BY {} RETURNING {}",
            ctx.table(),
            ctx.column_list(&plan.insert),
            ctx.qualified_list(SOURCE_ALIAS, &plan.insert),
            d.quote(MERGE_TABLE),
            d.quote(SOURCE_ALIAS),
            snapshot_from,
            ctx.key_join(SNAPSHOT_ALIAS, SOURCE_ALIAS, keys),
            d.column(SOURCE_ALIAS, ORDINAL_COLUMN),
            ctx.column_list(keys)
        );
        script.push(Statement::new(
            StatementKind::Step,
            Self::record(ctx, "INSERT", false, keys, &inserting),
        ));

        script.push(Statement::new(
            StatementKind::Rows,
            format!(
                "SELECT {}, {}, {} FROM {} ORDER BY {}",
                d.quote(ACTION_COLUMN),
                d.quote(ORDINAL_COLUMN),
                ctx.column_list(keys),
                d.quote(RESULTS_TABLE),
                d.quote(SEQ_COLUMN)
            ),
        ));
        Self::cleanup(&mut script, ctx, &[MERGE_TABLE, TARGET_TABLE, RESULTS_TABLE]);
        Ok(script)
    }
}
