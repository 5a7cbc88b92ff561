//! Type-directed conversions between Sluice values and PostgreSQL.
//!
//! Parameters are encoded for the type the server inferred for each
//! placeholder, so an integer bound against an `int4` column is sent as four
//! bytes rather than rejected. Result cells are decoded by column type.

use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use sluice_core::{ResultRow, Value};
use tokio_postgres::Row;
use tokio_postgres::types::{IsNull, ToSql, Type as PgType, to_sql_checked};
use uuid::Uuid;

use crate::error::{PgError, PgResult};

/// A [`Value`] bound as a PostgreSQL parameter.
#[derive(Debug, Clone, Copy)]
pub struct PgParam<'a>(pub &'a Value);

fn is_text(ty: &PgType) -> bool {
    matches!(
        *ty,
        PgType::TEXT | PgType::VARCHAR | PgType::BPCHAR | PgType::NAME | PgType::UNKNOWN
    )
}

impl ToSql for PgParam<'_> {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => match *ty {
                PgType::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                PgType::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                PgType::FLOAT4 => (*i as f32).to_sql(ty, out),
                PgType::FLOAT8 => (*i as f64).to_sql(ty, out),
                PgType::BOOL => (*i != 0).to_sql(ty, out),
                ref t if is_text(t) => i.to_string().to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            Value::Float(f) => match *ty {
                PgType::FLOAT4 => (*f as f32).to_sql(ty, out),
                ref t if is_text(t) => f.to_string().to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            Value::String(s) => match *ty {
                PgType::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
                _ => s.as_str().to_sql(ty, out),
            },
            Value::Uuid(u) => match *ty {
                ref t if is_text(t) => u.to_string().to_sql(ty, out),
                _ => u.to_sql(ty, out),
            },
            Value::DateTime(dt) => match *ty {
                PgType::TIMESTAMPTZ => Utc.from_utc_datetime(dt).to_sql(ty, out),
                PgType::DATE => dt.date().to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &PgType) -> bool {
        true
    }

    to_sql_checked!();
}

/// Wrap statement parameters for binding.
pub fn params(values: &[Value]) -> Vec<PgParam<'_>> {
    values.iter().map(PgParam).collect()
}

fn cell<'a, T>(row: &'a Row, idx: usize) -> PgResult<Option<T>>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        PgError::deserialization(format!(
            "failed to read column '{}': {}",
            row.columns()[idx].name(),
            e
        ))
    })
}

fn or_null<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

/// Decode one cell by its column type.
pub fn cell_to_value(row: &Row, idx: usize) -> PgResult<Value> {
    let ty = row.columns()[idx].type_();
    Ok(match *ty {
        PgType::BOOL => or_null(cell::<bool>(row, idx)?, Value::Bool),
        PgType::INT2 => or_null(cell::<i16>(row, idx)?, |v| Value::Int(i64::from(v))),
        PgType::INT4 => or_null(cell::<i32>(row, idx)?, |v| Value::Int(i64::from(v))),
        PgType::INT8 => or_null(cell::<i64>(row, idx)?, Value::Int),
        PgType::OID => or_null(cell::<u32>(row, idx)?, |v| Value::Int(i64::from(v))),
        PgType::FLOAT4 => or_null(cell::<f32>(row, idx)?, |v| Value::Float(f64::from(v))),
        PgType::FLOAT8 => or_null(cell::<f64>(row, idx)?, Value::Float),
        PgType::UUID => or_null(cell::<Uuid>(row, idx)?, Value::Uuid),
        PgType::TIMESTAMP => or_null(cell::<NaiveDateTime>(row, idx)?, Value::DateTime),
        PgType::TIMESTAMPTZ => or_null(cell::<DateTime<Utc>>(row, idx)?, |v| {
            Value::DateTime(v.naive_utc())
        }),
        PgType::DATE => or_null(cell::<NaiveDate>(row, idx)?, |d| {
            Value::DateTime(d.and_time(NaiveTime::MIN))
        }),
        PgType::JSON | PgType::JSONB => or_null(cell::<serde_json::Value>(row, idx)?, |j| {
            Value::String(j.to_string())
        }),
        ref t if is_text(t) => or_null(cell::<String>(row, idx)?, Value::String),
        ref other => {
            return Err(PgError::type_conversion(format!(
                "column '{}' has unsupported type {}",
                row.columns()[idx].name(),
                other
            )));
        }
    })
}

/// Convert a result row, keeping column order.
pub fn row_to_result(row: &Row) -> PgResult<ResultRow> {
    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = (0..row.len())
        .map(|idx| cell_to_value(row, idx))
        .collect::<PgResult<Vec<_>>>()?;
    Ok(ResultRow::new(columns, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode(value: Value, ty: PgType) -> (IsNull, Vec<u8>) {
        let mut out = BytesMut::new();
        let is_null = PgParam(&value).to_sql(&ty, &mut out).unwrap();
        (is_null, out.to_vec())
    }

    #[test]
    fn test_null_binds_as_null() {
        let (is_null, bytes) = encode(Value::Null, PgType::INT4);
        assert!(matches!(is_null, IsNull::Yes));
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_int_follows_target_width() {
        assert_eq!(encode(Value::Int(5), PgType::INT2).1, vec![0, 5]);
        assert_eq!(encode(Value::Int(5), PgType::INT4).1, vec![0, 0, 0, 5]);
        assert_eq!(encode(Value::Int(5), PgType::INT8).1.len(), 8);
        assert_eq!(encode(Value::Int(12), PgType::TEXT).1, b"12".to_vec());
    }

    #[test]
    fn test_int_out_of_range_is_rejected() {
        let value = Value::Int(70_000);
        let mut out = BytesMut::new();
        assert!(PgParam(&value).to_sql(&PgType::INT2, &mut out).is_err());
    }

    #[test]
    fn test_string_into_uuid_column() {
        let id = Uuid::new_v4();
        let (_, bytes) = encode(Value::String(id.to_string()), PgType::UUID);
        assert_eq!(bytes, id.as_bytes().to_vec());

        let value = Value::from("not-a-uuid");
        let mut out = BytesMut::new();
        assert!(PgParam(&value).to_sql(&PgType::UUID, &mut out).is_err());
    }

    #[test]
    fn test_datetime_targets() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(encode(Value::DateTime(dt), PgType::TIMESTAMP).1.len(), 8);
        assert_eq!(encode(Value::DateTime(dt), PgType::TIMESTAMPTZ).1.len(), 8);
        assert_eq!(encode(Value::DateTime(dt), PgType::DATE).1.len(), 4);
    }

    #[test]
    fn test_checked_binding_accepts_any_type() {
        let value = Value::Bool(true);
        let mut out = BytesMut::new();
        let result = PgParam(&value).to_sql_checked(&PgType::BOOL, &mut out);
        assert!(result.is_ok());
        assert_eq!(out.to_vec(), vec![1]);
    }
}
