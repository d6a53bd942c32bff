//! Value types for query result rows.

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use ordered_float::OrderedFloat;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Represents a single column value in a result row.
///
/// This enum covers every kind the row decoder can produce. JSON
/// rendering is handled by the `Serialize` impl below and is exhaustive over
/// the variants.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (int2, int4, int8 and oid all widen to this).
    Int(i64),

    /// Floating point value (float4 widens to this).
    Float(OrderedFloat<f64>),

    /// Exact decimal in its canonical text form (`numeric`, `money`),
    /// including `NaN` and `Infinity`.
    Numeric(String),

    /// Character data.
    Text(String),

    /// Raw binary data.
    Bytes(Vec<u8>),

    /// UUID value.
    Uuid(Uuid),

    /// JSON or JSONB document.
    Json(serde_json::Value),

    /// Timestamp with time zone, normalized to UTC.
    Timestamp(DateTime<Utc>),

    /// Timestamp without time zone.
    LocalTimestamp(NaiveDateTime),

    /// Calendar date.
    Date(NaiveDate),

    /// Time of day.
    Time(NaiveTime),

    /// Array; multi-dimensional arrays nest.
    Array(Vec<Value>),
}

impl Value {
    /// Returns the value as a bool if it is a `Bool` variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as an i64 if it is an `Int` variant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a f64 if it is a `Float` variant.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a `Text` variant.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a byte slice if it is a `Bytes` variant.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the embedded document if it is a `Json` variant.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Returns the decimal text if it is a `Numeric` variant.
    pub fn as_numeric(&self) -> Option<&str> {
        match self {
            Value::Numeric(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the elements if it is an `Array` variant.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            // serde_json writes non-finite floats as null
            Value::Float(f) => serializer.serialize_f64(f.into_inner()),
            Value::Numeric(d) => serializer.serialize_str(d),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Uuid(u) => u.serialize(serializer),
            Value::Json(j) => j.serialize(serializer),
            Value::Timestamp(t) => t.serialize(serializer),
            Value::LocalTimestamp(t) => t.serialize(serializer),
            Value::Date(d) => d.serialize(serializer),
            Value::Time(t) => t.serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(d) => write!(f, "{}", d),
            Value::Numeric(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<binary {} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Json(j) => write!(f, "{}", j),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::LocalTimestamp(t) => write!(f, "{}", t),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Array(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(OrderedFloat::from(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn json(v: &Value) -> String {
        serde_json::to_string(v).unwrap()
    }

    // =========================================================================
    // Accessor tests
    // =========================================================================

    #[test]
    fn test_as_bool() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(1).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn test_as_int() {
        assert_eq!(Value::Int(-7).as_int(), Some(-7));
        assert_eq!(Value::Float(OrderedFloat::from(7.0)).as_int(), None);
        assert_eq!(Value::Text("7".to_string()).as_int(), None);
    }

    #[test]
    fn test_as_float() {
        assert_eq!(Value::from(2.5).as_float(), Some(2.5));
        assert_eq!(Value::Int(2).as_float(), None);
    }

    #[test]
    fn test_as_text_and_bytes() {
        assert_eq!(Value::from("hi").as_text(), Some("hi"));
        assert_eq!(Value::Bytes(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert!(Value::from("hi").as_bytes().is_none());
        assert!(Value::Bytes(vec![]).as_text().is_none());
    }

    #[test]
    fn test_is_null() {
        assert!(Value::Null.is_null());
        assert!(Value::from(None::<i64>).is_null());
        assert!(!Value::Int(0).is_null());
        assert!(!Value::Text(String::new()).is_null());
    }

    // =========================================================================
    // JSON rendering tests
    // =========================================================================

    #[test]
    fn test_json_scalars() {
        assert_eq!(json(&Value::Null), "null");
        assert_eq!(json(&Value::Bool(false)), "false");
        assert_eq!(json(&Value::Int(42)), "42");
        assert_eq!(json(&Value::from(1.5)), "1.5");
        assert_eq!(json(&Value::from("a\"b")), r#""a\"b""#);
    }

    #[test]
    fn test_json_non_finite_float_is_null() {
        assert_eq!(json(&Value::from(f64::NAN)), "null");
        assert_eq!(json(&Value::from(f64::INFINITY)), "null");
    }

    #[test]
    fn test_json_numeric_keeps_precision() {
        let d = Value::Numeric("123456789012345678901234567890.5".to_string());
        assert_eq!(json(&d), r#""123456789012345678901234567890.5""#);
        assert_eq!(json(&Value::Numeric("NaN".to_string())), r#""NaN""#);
    }

    #[test]
    fn test_json_nested_array() {
        let v = Value::Array(vec![
            Value::Array(vec![Value::Int(1), Value::Null]),
            Value::Array(vec![Value::from("a"), Value::Bool(true)]),
        ]);
        assert_eq!(json(&v), r#"[[1,null],["a",true]]"#);
        assert_eq!(json(&Value::Array(vec![])), "[]");
        assert_eq!(v.as_array().map(<[Value]>::len), Some(2));
    }

    #[test]
    fn test_json_bytes_are_base64() {
        assert_eq!(json(&Value::Bytes(b"hello".to_vec())), r#""aGVsbG8=""#);
    }

    #[test]
    fn test_json_uuid_and_document() {
        let u = Uuid::from_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(json(&Value::Uuid(u)), r#""67e55044-10b1-426f-9247-bb680e5fe0c8""#);

        let doc = serde_json::json!({"k": [1, 2]});
        assert_eq!(json(&Value::Json(doc)), r#"{"k":[1,2]}"#);
    }

    #[test]
    fn test_json_temporal() {
        let ts = DateTime::parse_from_rfc3339("2023-11-14T12:30:45Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(json(&Value::Timestamp(ts)), r#""2023-11-14T12:30:45Z""#);

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(json(&Value::Date(date)), r#""2024-02-29""#);

        let local = date.and_hms_opt(8, 0, 1).unwrap();
        assert_eq!(json(&Value::LocalTimestamp(local)), r#""2024-02-29T08:00:01""#);

        let time = NaiveTime::from_hms_opt(23, 59, 0).unwrap();
        assert_eq!(json(&Value::Time(time)), r#""23:59:00""#);
    }

    #[test]
    fn test_json_row() {
        let row = vec![Value::Int(1), Value::Null, Value::from("x")];
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"[1,null,"x"]"#);
    }

    // =========================================================================
    // Display tests
    // =========================================================================

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Int(-100).to_string(), "-100");
        assert_eq!(Value::Bytes(vec![0; 5]).to_string(), "<binary 5 bytes>");
        assert_eq!(Value::from("hello world").to_string(), "hello world");
        assert_eq!(Value::Array(vec![Value::Int(1), Value::Null]).to_string(), "{1,null}");
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Int(42), Value::Int(42));
        assert_ne!(Value::Int(42), Value::from(42.0));
        assert_ne!(Value::from("42"), Value::Int(42));
        assert_eq!(Value::Null, Value::Null);
    }
}
