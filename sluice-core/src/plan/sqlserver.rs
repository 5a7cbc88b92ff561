//! SQL Server scripts.
//!
//! Every operation is one batch: payload rows are staged in table variables
//! behind `SET NOCOUNT ON`, then a single `MERGE`, `UPDATE ... FROM` or
//! `DELETE ... FROM` statement does the work. Inserts go through
//! `MERGE ... ON 1 = 0` because `INSERT ... OUTPUT` cannot reference the
//! staging ordinal.

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
use crate::statement::{ORDINAL_COLUMN, Script, StatementBuilder, StatementKind};

const ADD_TABLE: &str = "@ToAdd";
const DELTA_TABLE: &str = "@Delta";
const KEYS_TABLE: &str = "@Keys";
const MERGE_TABLE: &str = "@Merge";

const MERGE_TARGET: &str = "t";
const FILTERED_CTE: &str = "tgt";

/// Plans SQL Server batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerPlanner;

impl SqlServerPlanner {
    fn stage(
        builder: &mut StatementBuilder<'_>,
        ctx: &PlanContext<'_>,
        table: &str,
        columns: &[&PropertyMapping],
        rows: &[Row],
    ) -> BulkResult<()> {
        builder.line("SET NOCOUNT ON;");
        builder.line(&format!(
            "DECLARE {} TABLE ({});",
            table,
            ctx.staging_definitions(columns)
        ));
        builder.stage_rows(
            table,
            &staging_columns(columns),
            &with_ordinals(rows),
            ctx.config.chunk_size,
        )?;
        builder.line("SET NOCOUNT OFF;");
        Ok(())
    }

    fn set_list(
        builder: &mut StatementBuilder<'_>,
        ctx: &PlanContext<'_>,
        alias: &str,
        assignments: &[Assignment<'_>],
    ) -> BulkResult<String> {
        builder.reserve_payload(assignments.len());
        let parts = assignments
            .iter()
            .map(|a| -> BulkResult<String> {
                let value = builder.payload(&a.value)?;
                Ok(format!("{} = {}", ctx.column(alias, a.mapping), value))
            })
            .collect::<BulkResult<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    fn single(builder: StatementBuilder<'_>, kind: StatementKind) -> Script {
        let mut script = Script::new();
        script.push(builder.finish(kind));
        script
    }

    fn output_keys(ctx: &PlanContext<'_>, keys: &[&PropertyMapping], coalesce: bool) -> String {
        let d = ctx.dialect;
        join(keys.iter().map(|m| {
            let column = d.quote(&m.column);
            if coalesce {
                format!("COALESCE(INSERTED.{c}, DELETED.{c}) AS {c}", c = column)
            } else {
                format!("INSERTED.{c} AS {c}", c = column)
            }
        }))
    }
}

impl ScriptPlanner for SqlServerPlanner {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    fn add(
        &self,
        ctx: &PlanContext<'_>,
        columns: &[&PropertyMapping],
        rows: &[Row],
    ) -> BulkResult<Script> {
        let d = ctx.dialect;
        let keys = ctx.key_mappings()?;
        let mut b = ctx.builder(Vec::new());
        Self::stage(&mut b, ctx, ADD_TABLE, columns, rows)?;

        b.line(&format!(
            "MERGE INTO {} AS {} USING {} AS {} ON 1 = 0",
            ctx.table(),
            d.quote(MERGE_TARGET),
            ADD_TABLE,
            d.quote(SOURCE_ALIAS)
        ));
        b.line(&format!(
            "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            ctx.column_list(columns),
            ctx.qualified_list(SOURCE_ALIAS, columns)
        ));
        b.push(&format!(
            "OUTPUT {} AS {}, {};",
            d.column(SOURCE_ALIAS, ORDINAL_COLUMN),
            d.quote(ORDINAL_COLUMN),
            Self::output_keys(ctx, &keys, false)
        ));
        Ok(Self::single(b, StatementKind::Rows))
    }

    fn update(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        assignments: &[Assignment<'_>],
    ) -> BulkResult<Script> {
        query.check_version()?;
        let mut b = ctx.builder(query.params.clone());
        let set = Self::set_list(&mut b, ctx, TARGET_ALIAS, assignments)?;
        b.push(&format!(
            "UPDATE {} SET {} FROM {}{};",
            query.alias,
            set,
            query.from_clause(),
            query.where_clause()
        ));
        Ok(Self::single(b, StatementKind::Counted))
    }

    fn update_with(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        delta: &DeltaPlan<'_>,
    ) -> BulkResult<Script> {
        query.check_version()?;
        let d = ctx.dialect;
        let mut b = ctx.builder(query.params.clone());
        Self::stage(&mut b, ctx, DELTA_TABLE, &delta.staging(), &delta.rows)?;

        let set = join(delta.columns.iter().map(|m| {
            format!("{} = {}", ctx.column(TARGET_ALIAS, m), ctx.column(DELTA_ALIAS, m))
        }));
        b.push(&format!(
            "UPDATE {} SET {} FROM {} INNER JOIN {} AS {} ON {}{};",
            query.alias,
            set,
            query.from_clause(),
            DELTA_TABLE,
            d.quote(DELTA_ALIAS),
            ctx.key_join(TARGET_ALIAS, DELTA_ALIAS, &delta.keys),
            query.where_clause()
        ));
        Ok(Self::single(b, StatementKind::Counted))
    }

    fn remove(
        &self,
        ctx: &PlanContext<'_>,
        query: &TranslatedQuery,
        keys: Option<&[Key]>,
    ) -> BulkResult<Script> {
        query.check_version()?;
        let d = ctx.dialect;
        let mut b = ctx.builder(query.params.clone());

        let join_clause = match keys {
            Some(keys) => {
                let key_columns = ctx.key_mappings()?;
                Self::stage(&mut b, ctx, KEYS_TABLE, &key_columns, &key_rows(keys))?;
                format!(
                    " INNER JOIN {} AS {} ON {}",
                    KEYS_TABLE,
                    d.quote(KEYS_ALIAS),
                    ctx.key_join(TARGET_ALIAS, KEYS_ALIAS, &key_columns)
                )
            }
            None => String::new(),
        };

        b.push(&format!(
            "DELETE {} FROM {}{}{};",
            query.alias,
            query.from_clause(),
            join_clause,
            query.where_clause()
        ));
        Ok(Self::single(b, StatementKind::Counted))
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
        let mut b = ctx.builder(query.params.clone());
        Self::stage(&mut b, ctx, MERGE_TABLE, &plan.staging, &plan.rows)?;

        b.line(&format!("WITH {} AS ({})", d.quote(FILTERED_CTE), query.sql()));
        b.line(&format!(
            "MERGE {} AS {}",
            d.quote(FILTERED_CTE),
            d.quote(MERGE_TARGET)
        ));
        b.line(&format!("USING {} AS {}", MERGE_TABLE, d.quote(SOURCE_ALIAS)));
        b.line(&format!(
            "ON ({})",
            ctx.key_join(MERGE_TARGET, SOURCE_ALIAS, &plan.keys)
        ));

        if !plan.update.is_empty() {
            let set = join(plan.update.iter().map(|m| {
                format!("{} = {}", ctx.column(MERGE_TARGET, m), ctx.column(SOURCE_ALIAS, m))
            }));
            b.line(&format!("WHEN MATCHED THEN UPDATE SET {}", set));
        }

        b.line(&format!(
            "WHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({})",
            ctx.column_list(&plan.insert),
            ctx.qualified_list(SOURCE_ALIAS, &plan.insert)
        ));

        match &plan.not_matched {
            NotMatchedPlan::Ignore => {}
            NotMatchedPlan::Delete => {
                b.line("WHEN NOT MATCHED BY SOURCE THEN DELETE");
            }
            NotMatchedPlan::Update(assignments) => {
                let set = Self::set_list(&mut b, ctx, MERGE_TARGET, assignments)?;
                b.line(&format!("WHEN NOT MATCHED BY SOURCE THEN UPDATE SET {}", set));
            }
        }

        b.push(&format!(
            "OUTPUT $action AS {}, {} AS {}, {};",
            d.quote(ACTION_COLUMN),
            d.column(SOURCE_ALIAS, ORDINAL_COLUMN),
            d.quote(ORDINAL_COLUMN),
            Self::output_keys(ctx, &plan.keys, true)
        ));
        Ok(Self::single(b, StatementKind::Rows))
    }
}
