//! Convert serde_json::Value to types that sqlx can bind.

use crate::config::FieldType;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value that can be bound to a PostgreSQL query. Each variant reports its own wire type;
/// the SQL side casts placeholders to the column type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }

    /// Whether `v` survives the `$n::type` cast to a column of `type_`.
    pub fn fits(v: &Value, type_: FieldType) -> bool {
        match (type_, v) {
            (_, Value::Null) | (FieldType::Json | FieldType::String | FieldType::Text, _) => true,
            (FieldType::Integer, Value::Number(n)) => integral(n).is_some_and(|i| i32::try_from(i).is_ok()),
            (FieldType::Bigint, Value::Number(n)) => integral(n).is_some(),
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (_, Value::String(s)) => type_.parses(s),
            _ => false,
        }
    }

    /// Bind value for a column of `type_`: json columns always bind as JSON, text columns as text.
    pub fn for_type(v: &Value, type_: FieldType) -> Self {
        match (type_, v) {
            (_, Value::Null) => PgBindValue::Null,
            (FieldType::Json, _) => PgBindValue::Json(v.clone()),
            (FieldType::String | FieldType::Text, Value::Number(_) | Value::Bool(_)) => {
                PgBindValue::String(v.to_string())
            }
            _ => Self::from_json(v),
        }
    }
}

/// Integer value of a JSON number, including floats with no fractional part.
fn integral(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf)?,
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_split_into_int_and_float() {
        assert_eq!(PgBindValue::from_json(&json!(3)), PgBindValue::I64(3));
        assert_eq!(PgBindValue::from_json(&json!(2.5)), PgBindValue::F64(2.5));
    }

    #[test]
    fn column_type_drives_binding() {
        assert_eq!(
            PgBindValue::for_type(&json!("x"), FieldType::Json),
            PgBindValue::Json(json!("x"))
        );
        assert_eq!(
            PgBindValue::for_type(&json!(5), FieldType::String),
            PgBindValue::String("5".into())
        );
        assert_eq!(PgBindValue::for_type(&Value::Null, FieldType::Json), PgBindValue::Null);
    }

    #[test]
    fn values_that_cannot_be_cast() {
        assert!(PgBindValue::fits(&json!(7), FieldType::Integer));
        assert!(PgBindValue::fits(&json!(7.0), FieldType::Integer));
        assert!(PgBindValue::fits(&json!("7"), FieldType::Integer));
        assert!(!PgBindValue::fits(&json!("abc"), FieldType::Integer));
        assert!(!PgBindValue::fits(&json!(3_000_000_000i64), FieldType::Integer));
        assert!(!PgBindValue::fits(&json!(7.5), FieldType::Bigint));
        assert!(!PgBindValue::fits(&json!(true), FieldType::Bigint));
        assert!(!PgBindValue::fits(&json!(2024), FieldType::Timestamp));
        assert!(!PgBindValue::fits(&json!("x"), FieldType::Uuid));
        assert!(PgBindValue::fits(&json!([1]), FieldType::Text));
        assert!(PgBindValue::fits(&Value::Null, FieldType::Uuid));
    }
}
