//! Filtered queries and their translation to SQL.
//!
//! A [`Query`] is the ORM-side description of a filtered entity set. Bulk
//! operations never re-implement query translation; they ask the query for a
//! [`TranslatedQuery`] through the versioned [`SqlSource`] contract and embed
//! the predicate and its parameters in their own scripts.

use std::fmt;
use std::marker::PhantomData;

use crate::dialect::SqlDialect;
use crate::entity::{Entity, EntityType};
use crate::error::{BulkError, BulkResult, ErrorCode};
use crate::filter::{Filter, RenderContext};
use crate::value::Value;

/// Version of the translation contract produced by [`SqlSource`].
pub const BRIDGE_VERSION: u32 = 1;

/// Alias given to the queried table inside generated scripts.
pub const TARGET_ALIAS: &str = "a";

/// A filtered set of `E` records.
pub struct Query<E> {
    filter: Filter,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Query<E> {
    /// Every record of `E`.
    pub fn all() -> Self {
        Self::new(Filter::None)
    }

    /// Records matching `filter`.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            _entity: PhantomData,
        }
    }

    /// Narrow the query with another filter.
    pub fn filter(self, filter: Filter) -> Self {
        Self::new(self.filter.and_then(filter))
    }

    /// Narrow to `property = value`.
    pub fn where_eq(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(property, value))
    }

    /// The filter tree.
    pub fn filter_ref(&self) -> &Filter {
        &self.filter
    }

    /// Evaluate the filter against a record in-process.
    pub fn matches(&self, record: &E) -> bool {
        self.filter.matches(&|p: &str| record.get_value(p))
    }
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &std::any::type_name::<E>())
            .field("filter", &self.filter)
            .finish()
    }
}

/// A query rendered for one dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    /// Contract version, see [`BRIDGE_VERSION`].
    pub version: u32,
    /// Quoted, qualified table name.
    pub table: String,
    /// Quoted alias the predicate refers to.
    pub alias: String,
    /// Predicate text, `None` when the query is unfiltered.
    pub predicate: Option<String>,
    /// Bound values, numbered from 1 in order.
    pub params: Vec<Value>,
}

impl TranslatedQuery {
    /// `FROM table AS alias`.
    pub fn from_clause(&self) -> String {
        format!("{} AS {}", self.table, self.alias)
    }

    /// ` WHERE predicate` or nothing.
    pub fn where_clause(&self) -> String {
        match &self.predicate {
            Some(p) => format!(" WHERE {}", p),
            None => String::new(),
        }
    }

    /// ` AND (predicate)` or nothing, for appending to an existing condition.
    pub fn and_clause(&self) -> String {
        match &self.predicate {
            Some(p) => format!(" AND ({})", p),
            None => String::new(),
        }
    }

    /// A standalone `SELECT` with the given projection.
    pub fn select_sql(&self, projection: &str) -> String {
        format!(
            "SELECT {} FROM {}{}",
            projection,
            self.from_clause(),
            self.where_clause()
        )
    }

    /// The query as `SELECT alias.*`.
    pub fn sql(&self) -> String {
        self.select_sql(&format!("{}.*", self.alias))
    }

    /// Fail unless produced by a compatible translator.
    pub fn check_version(&self) -> BulkResult<()> {
        if self.version != BRIDGE_VERSION {
            return Err(BulkError::new(
                ErrorCode::BridgeVersionMismatch,
                format!(
                    "query translation version {} is not supported (expected {})",
                    self.version, BRIDGE_VERSION
                ),
            ));
        }
        Ok(())
    }
}

/// Translation contract between filtered queries and bulk scripts.
pub trait SqlSource {
    /// Render for `dialect`, qualifying unqualified tables with `default_schema`.
    fn translate(
        &self,
        dialect: &dyn SqlDialect,
        default_schema: Option<&str>,
    ) -> BulkResult<TranslatedQuery>;
}

impl<E: Entity> SqlSource for Query<E> {
    fn translate(
        &self,
        dialect: &dyn SqlDialect,
        default_schema: Option<&str>,
    ) -> BulkResult<TranslatedQuery> {
        let entity_type = E::entity_type();
        translate_filter(&self.filter, &entity_type, dialect, default_schema)
    }
}

/// Translate a filter over `entity_type`.
pub fn translate_filter(
    filter: &Filter,
    entity_type: &EntityType,
    dialect: &dyn SqlDialect,
    default_schema: Option<&str>,
) -> BulkResult<TranslatedQuery> {
    let schema = entity_type.schema.as_deref().or(default_schema);
    let table = dialect.table(schema, &entity_type.table);

    let (predicate, params) = if filter.is_none() {
        (None, Vec::new())
    } else {
        let mut ctx = RenderContext::new(dialect, entity_type, TARGET_ALIAS);
        let sql = filter
            .to_sql(&mut ctx)
            .map_err(|e| e.with_model(&entity_type.name))?;
        (Some(sql), ctx.into_params())
    };

    Ok(TranslatedQuery {
        version: BRIDGE_VERSION,
        table,
        alias: dialect.quote(TARGET_ALIAS),
        predicate,
        params,
    })
}
