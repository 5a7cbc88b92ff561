//! Filter types for building WHERE clauses.
//!
//! Filters name entity *properties*; columns are resolved when the filter is
//! rendered for a dialect. The same tree is evaluated in-process by the
//! in-memory dialect.

use std::cmp::Ordering;

use indexmap::IndexSet;

use crate::dialect::SqlDialect;
use crate::entity::EntityType;
use crate::error::{BulkError, BulkResult};
use crate::key::Key;
use crate::value::Value;

/// Maximum rows in one `VALUES` constructor inside a key filter.
pub const KEY_VALUES_CHUNK: usize = 1000;

/// A filter over entity properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// No filter (always true).
    #[default]
    None,

    /// Equals comparison.
    Equals(String, Value),
    /// Not equals comparison.
    NotEquals(String, Value),

    /// Less than.
    Lt(String, Value),
    /// Less than or equal.
    Lte(String, Value),
    /// Greater than.
    Gt(String, Value),
    /// Greater than or equal.
    Gte(String, Value),

    /// In a list of values.
    In(String, Vec<Value>),
    /// Not in a list of values.
    NotIn(String, Vec<Value>),

    /// Contains (LIKE %value%).
    Contains(String, String),
    /// Starts with (LIKE value%).
    StartsWith(String, String),
    /// Ends with (LIKE %value).
    EndsWith(String, String),

    /// Is null check.
    IsNull(String),
    /// Is not null check.
    IsNotNull(String),

    /// The key tuple formed by `properties` is one of `keys`.
    KeyIn {
        /// Key properties, in key order.
        properties: Vec<String>,
        /// Accepted key tuples.
        keys: IndexSet<Key>,
    },

    /// Logical AND of multiple filters.
    And(Vec<Filter>),
    /// Logical OR of multiple filters.
    Or(Vec<Filter>),
    /// Logical NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an empty filter (matches everything).
    pub fn none() -> Self {
        Self::None
    }

    /// Check if this filter is empty.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Equality on a property.
    pub fn equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals(property.into(), value.into())
    }

    /// Create an AND filter.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters: Vec<_> = filters.into_iter().filter(|f| !f.is_none()).collect();
        match filters.len() {
            0 => Self::None,
            1 => filters.remove(0),
            _ => Self::And(filters),
        }
    }

    /// Create an OR filter.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut filters: Vec<_> = filters.into_iter().filter(|f| !f.is_none()).collect();
        match filters.len() {
            0 => Self::None,
            1 => filters.remove(0),
            _ => Self::Or(filters),
        }
    }

    /// Create a NOT filter.
    pub fn not(filter: Filter) -> Self {
        if filter.is_none() {
            return Self::None;
        }
        Self::Not(Box::new(filter))
    }

    /// Combine with another filter using AND.
    pub fn and_then(self, other: Filter) -> Self {
        if self.is_none() {
            return other;
        }
        if other.is_none() {
            return self;
        }
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            _ => Self::And(vec![self, other]),
        }
    }

    /// Render as a SQL predicate, appending bound values to `ctx`.
    pub fn to_sql(&self, ctx: &mut RenderContext<'_>) -> BulkResult<String> {
        match self {
            Self::None => Ok("1 = 1".to_string()),

            Self::Equals(prop, val) => {
                let col = ctx.column(prop)?;
                if val.is_null() {
                    Ok(format!("{} IS NULL", col))
                } else {
                    Ok(format!("{} = {}", col, ctx.bind(val.clone())))
                }
            }
            Self::NotEquals(prop, val) => {
                let col = ctx.column(prop)?;
                if val.is_null() {
                    Ok(format!("{} IS NOT NULL", col))
                } else {
                    Ok(format!("{} <> {}", col, ctx.bind(val.clone())))
                }
            }

            Self::Lt(prop, val) => ctx.comparison(prop, "<", val),
            Self::Lte(prop, val) => ctx.comparison(prop, "<=", val),
            Self::Gt(prop, val) => ctx.comparison(prop, ">", val),
            Self::Gte(prop, val) => ctx.comparison(prop, ">=", val),

            Self::In(prop, values) => {
                let col = ctx.column(prop)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let placeholders: Vec<_> = values.iter().map(|v| ctx.bind(v.clone())).collect();
                Ok(format!("{} IN ({})", col, placeholders.join(", ")))
            }
            Self::NotIn(prop, values) => {
                let col = ctx.column(prop)?;
                if values.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                let placeholders: Vec<_> = values.iter().map(|v| ctx.bind(v.clone())).collect();
                Ok(format!("{} NOT IN ({})", col, placeholders.join(", ")))
            }

            Self::Contains(prop, s) => ctx.like(prop, format!("%{}%", escape_like(s))),
            Self::StartsWith(prop, s) => ctx.like(prop, format!("{}%", escape_like(s))),
            Self::EndsWith(prop, s) => ctx.like(prop, format!("%{}", escape_like(s))),

            Self::IsNull(prop) => Ok(format!("{} IS NULL", ctx.column(prop)?)),
            Self::IsNotNull(prop) => Ok(format!("{} IS NOT NULL", ctx.column(prop)?)),

            Self::KeyIn { properties, keys } => ctx.key_in(properties, keys),

            Self::And(filters) => {
                if filters.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                let parts = filters
                    .iter()
                    .map(|f| f.to_sql(ctx))
                    .collect::<BulkResult<Vec<_>>>()?;
                Ok(format!("({})", parts.join(" AND ")))
            }
            Self::Or(filters) => {
                if filters.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let parts = filters
                    .iter()
                    .map(|f| f.to_sql(ctx))
                    .collect::<BulkResult<Vec<_>>>()?;
                Ok(format!("({})", parts.join(" OR ")))
            }
            Self::Not(filter) => Ok(format!("NOT ({})", filter.to_sql(ctx)?)),
        }
    }

    /// Evaluate against a record exposed through a property reader.
    ///
    /// Follows SQL semantics: comparisons against null never match.
    pub fn matches<F>(&self, read: &F) -> bool
    where
        F: Fn(&str) -> Option<Value>,
    {
        let get = |prop: &str| read(prop).unwrap_or(Value::Null);
        let ordered = |prop: &str, val: &Value, accept: fn(Ordering) -> bool| {
            get(prop).compare(val).is_some_and(accept)
        };

        match self {
            Self::None => true,
            Self::Equals(prop, val) if val.is_null() => get(prop).is_null(),
            Self::Equals(prop, val) => get(prop).sql_eq(val),
            Self::NotEquals(prop, val) if val.is_null() => !get(prop).is_null(),
            Self::NotEquals(prop, val) => ordered(prop, val, |o| o != Ordering::Equal),
            Self::Lt(prop, val) => ordered(prop, val, |o| o == Ordering::Less),
            Self::Lte(prop, val) => ordered(prop, val, |o| o != Ordering::Greater),
            Self::Gt(prop, val) => ordered(prop, val, |o| o == Ordering::Greater),
            Self::Gte(prop, val) => ordered(prop, val, |o| o != Ordering::Less),
            Self::In(prop, values) => {
                let v = get(prop);
                values.iter().any(|x| v.sql_eq(x))
            }
            Self::NotIn(prop, values) => {
                let v = get(prop);
                !v.is_null() && !values.iter().any(|x| v.sql_eq(x))
            }
            Self::Contains(prop, s) => get(prop).as_str().is_some_and(|v| v.contains(s.as_str())),
            Self::StartsWith(prop, s) => {
                get(prop).as_str().is_some_and(|v| v.starts_with(s.as_str()))
            }
            Self::EndsWith(prop, s) => get(prop).as_str().is_some_and(|v| v.ends_with(s.as_str())),
            Self::IsNull(prop) => get(prop).is_null(),
            Self::IsNotNull(prop) => !get(prop).is_null(),
            Self::KeyIn { properties, keys } => {
                let key = Key::new(properties.iter().map(|p| get(p.as_str())));
                keys.contains(&key)
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(read)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(read)),
            Self::Not(filter) => !filter.matches(read),
        }
    }
}

/// Escape LIKE wildcards; patterns are rendered with `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// State threaded through filter rendering.
pub struct RenderContext<'a> {
    dialect: &'a dyn SqlDialect,
    entity_type: &'a EntityType,
    alias: &'a str,
    params: Vec<Value>,
}

impl<'a> RenderContext<'a> {
    /// Start rendering for `entity_type` with rows aliased as `alias`.
    pub fn new(dialect: &'a dyn SqlDialect, entity_type: &'a EntityType, alias: &'a str) -> Self {
        Self {
            dialect,
            entity_type,
            alias,
            params: Vec::new(),
        }
    }

    /// The bound values collected so far, in placeholder order.
    pub fn into_params(self) -> Vec<Value> {
        self.params
    }

    fn column(&self, property: &str) -> BulkResult<String> {
        let meta = self
            .entity_type
            .find(property)
            .ok_or_else(|| BulkError::unknown_property(&self.entity_type.name, property))?;
        Ok(self.dialect.column(self.alias, &meta.column))
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn comparison(&mut self, property: &str, op: &str, value: &Value) -> BulkResult<String> {
        let col = self.column(property)?;
        Ok(format!("{} {} {}", col, op, self.bind(value.clone())))
    }

    fn like(&mut self, property: &str, pattern: String) -> BulkResult<String> {
        let col = self.column(property)?;
        Ok(format!(
            "{} LIKE {} ESCAPE '\\'",
            col,
            self.bind(Value::String(pattern))
        ))
    }

    fn key_in(&mut self, properties: &[String], keys: &IndexSet<Key>) -> BulkResult<String> {
        if keys.is_empty() {
            return Ok("1 = 0".to_string());
        }
        let columns = properties
            .iter()
            .map(|p| self.column(p))
            .collect::<BulkResult<Vec<_>>>()?;
        let names: Vec<String> = (0..properties.len())
            .map(|i| self.dialect.quote(&format!("k{}", i)))
            .collect();
        let join = columns
            .iter()
            .zip(&names)
            .map(|(col, name)| format!("{} = {}.{}", col, self.dialect.quote("k"), name))
            .collect::<Vec<_>>()
            .join(" AND ");

        let keys: Vec<&Key> = keys.iter().collect();
        let mut chunks = Vec::new();
        for chunk in keys.chunks(KEY_VALUES_CHUNK) {
            let mut rows = Vec::with_capacity(chunk.len());
            for key in chunk {
                let literals = key
                    .values()
                    .iter()
                    .map(|v| self.dialect.literal(v))
                    .collect::<BulkResult<Vec<_>>>()?;
                rows.push(format!("({})", literals.join(", ")));
            }
            chunks.push(format!(
                "EXISTS (SELECT 1 FROM (VALUES {}) AS {} ({}) WHERE {})",
                rows.join(", "),
                self.dialect.quote("k"),
                names.join(", "),
                join
            ));
        }

        if chunks.len() == 1 {
            Ok(chunks.remove(0))
        } else {
            Ok(format!("({})", chunks.join(" OR ")))
        }
    }
}
