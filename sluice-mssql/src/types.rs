//! Conversions between Sluice values and SQL Server cells.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sluice_core::{ResultRow, Value};
use tiberius::{ColumnData, FromSql, IntoSql, Query, Row};

use crate::error::{MssqlError, MssqlResult};

/// A [`Value`] bound as a SQL Server parameter.
///
/// `NULL` is sent as a null `nvarchar`, which SQL Server converts implicitly
/// to the target column type.
#[derive(Debug, Clone, Copy)]
pub struct MssqlParam<'a>(pub &'a Value);

impl<'a> IntoSql<'a> for MssqlParam<'a> {
    fn into_sql(self) -> ColumnData<'a> {
        match self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Int(i) => ColumnData::I64(Some(*i)),
            Value::Float(f) => ColumnData::F64(Some(*f)),
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::Uuid(u) => ColumnData::Guid(Some(*u)),
            Value::DateTime(dt) => (*dt).into_sql(),
        }
    }
}

/// Build a query with `values` bound to `@P1..@Pn`.
pub fn bind<'a>(sql: &'a str, values: &'a [Value]) -> Query<'a> {
    let mut query = Query::new(sql);
    for value in values {
        query.bind(MssqlParam(value));
    }
    query
}

fn decode<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>) -> MssqlResult<Option<T>> {
    T::from_sql(data).map_err(|e| MssqlError::deserialization(e.to_string()))
}

fn or_null<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

/// Convert one result cell to a [`Value`].
pub fn column_to_value(data: &ColumnData<'static>) -> MssqlResult<Value> {
    Ok(match data {
        ColumnData::U8(v) => or_null(*v, |v| Value::Int(i64::from(v))),
        ColumnData::I16(v) => or_null(*v, |v| Value::Int(i64::from(v))),
        ColumnData::I32(v) => or_null(*v, |v| Value::Int(i64::from(v))),
        ColumnData::I64(v) => or_null(*v, Value::Int),
        ColumnData::F32(v) => or_null(*v, |v| Value::Float(f64::from(v))),
        ColumnData::F64(v) => or_null(*v, Value::Float),
        ColumnData::Bit(v) => or_null(*v, Value::Bool),
        ColumnData::String(v) => or_null(v.as_ref(), |s| Value::String(s.to_string())),
        ColumnData::Guid(v) => or_null(*v, Value::Uuid),
        ColumnData::Numeric(v) => or_null(*v, |n| {
            if n.scale() == 0 {
                i64::try_from(n.value())
                    .map(Value::Int)
                    .unwrap_or(Value::Float(n.value() as f64))
            } else {
                Value::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
            }
        }),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            or_null(decode::<NaiveDateTime>(data)?, Value::DateTime)
        }
        ColumnData::Date(_) => or_null(decode::<NaiveDate>(data)?, |d| {
            Value::DateTime(d.and_time(NaiveTime::MIN))
        }),
        ColumnData::Time(_) => or_null(decode::<NaiveTime>(data)?, |t| {
            Value::String(t.format("%H:%M:%S%.f").to_string())
        }),
        ColumnData::DateTimeOffset(_) => or_null(decode::<DateTime<Utc>>(data)?, |dt| {
            Value::DateTime(dt.naive_utc())
        }),
        ColumnData::Binary(None) | ColumnData::Xml(None) => Value::Null,
        ColumnData::Binary(Some(_)) => {
            return Err(MssqlError::type_conversion(
                "binary columns cannot be read into a bulk result",
            ));
        }
        ColumnData::Xml(Some(_)) => {
            return Err(MssqlError::type_conversion(
                "xml columns cannot be read into a bulk result",
            ));
        }
    })
}

/// Convert a result row, keeping column order.
pub fn row_to_result(row: Row) -> MssqlResult<ResultRow> {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = row
        .into_iter()
        .map(|cell| column_to_value(&cell))
        .collect::<MssqlResult<Vec<_>>>()?;
    Ok(ResultRow::new(columns, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tiberius::numeric::Numeric;
    use uuid::Uuid;

    #[test]
    fn test_params_map_to_column_data() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::from("EU"),
        ];

        assert!(matches!(MssqlParam(&values[0]).into_sql(), ColumnData::String(None)));
        assert!(matches!(MssqlParam(&values[1]).into_sql(), ColumnData::Bit(Some(true))));
        assert!(matches!(MssqlParam(&values[2]).into_sql(), ColumnData::I64(Some(42))));
        match MssqlParam(&values[3]).into_sql() {
            ColumnData::String(Some(s)) => assert_eq!(s, "EU"),
            other => panic!("unexpected column data: {:?}", other),
        }
    }

    #[test]
    fn test_uuid_param() {
        let id = Uuid::new_v4();
        let value = Value::Uuid(id);
        assert!(matches!(MssqlParam(&value).into_sql(), ColumnData::Guid(Some(g)) if g == id));
    }

    #[test]
    fn test_integer_cells() {
        assert_eq!(column_to_value(&ColumnData::U8(Some(7))).unwrap(), Value::Int(7));
        assert_eq!(column_to_value(&ColumnData::I32(Some(-3))).unwrap(), Value::Int(-3));
        assert_eq!(column_to_value(&ColumnData::I64(None)).unwrap(), Value::Null);
        assert_eq!(column_to_value(&ColumnData::Bit(Some(false))).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_numeric_cells() {
        let scaled = ColumnData::Numeric(Some(Numeric::new_with_scale(12345, 2)));
        assert_eq!(column_to_value(&scaled).unwrap(), Value::Float(123.45));

        let whole = ColumnData::Numeric(Some(Numeric::new_with_scale(99, 0)));
        assert_eq!(column_to_value(&whole).unwrap(), Value::Int(99));
    }

    #[test]
    fn test_text_cells() {
        let data = ColumnData::String(Some(Cow::Owned("INSERT".to_string())));
        assert_eq!(column_to_value(&data).unwrap(), Value::from("INSERT"));
        assert_eq!(column_to_value(&ColumnData::String(None)).unwrap(), Value::Null);
    }

    #[test]
    fn test_datetime_roundtrip_through_cell() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let cell: ColumnData<'static> = dt.into_sql();
        assert_eq!(column_to_value(&cell).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn test_binary_cells_are_rejected() {
        let data = ColumnData::Binary(Some(Cow::Owned(vec![1, 2, 3])));
        assert!(matches!(
            column_to_value(&data),
            Err(MssqlError::TypeConversion(_))
        ));
        assert_eq!(column_to_value(&ColumnData::Binary(None)).unwrap(), Value::Null);
    }
}
