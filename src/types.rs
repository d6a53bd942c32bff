//! Core types for query requests and result sets.

use serde::Deserialize;

use crate::value::Value;

/// Body of a `POST /query` request.
#[derive(Clone, Debug, Deserialize)]
pub struct QueryRequest {
    /// Raw SQL text, submitted to the database verbatim.
    pub query: String,
}

/// A result row, positionally aligned with the query's columns.
pub type Row = Vec<Value>;

/// Column kinds the row decoder knows how to read.
///
/// Derived from the database type name, or from the element type OID inside
/// an array value. Types without a dedicated kind map to `Other` and are
/// decoded on a best-effort basis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// `BOOL`
    Bool,
    /// `INT2`
    Int2,
    /// `INT4`
    Int4,
    /// `INT8`
    Int8,
    /// `OID`
    Oid,
    /// `FLOAT4`
    Float4,
    /// `FLOAT8`
    Float8,
    /// `NUMERIC`
    Numeric,
    /// `MONEY`
    Money,
    /// `TEXT`, `VARCHAR`, `BPCHAR`, `NAME`, `CHAR`, `XML`
    Text,
    /// `BYTEA`
    Bytea,
    /// `UUID`
    Uuid,
    /// `JSON`
    Json,
    /// `JSONB`
    Jsonb,
    /// `TIMESTAMP`
    Timestamp,
    /// `TIMESTAMPTZ`
    Timestamptz,
    /// `DATE`
    Date,
    /// `TIME`
    Time,
    /// `TIMETZ`
    Timetz,
    /// `INTERVAL`
    Interval,
    /// `INET`, `CIDR`
    Inet,
    /// `MACADDR`
    Macaddr,
    /// Any array type; elements are resolved per value.
    Array,
    /// Anything else (enums, ranges, geometry, extension types).
    Other,
}

impl ColumnKind {
    /// Map a database type name to its column kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "OID" => Self::Oid,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "MONEY" => Self::Money,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "\"CHAR\"" | "XML" => Self::Text,
            "BYTEA" => Self::Bytea,
            "UUID" => Self::Uuid,
            "JSON" => Self::Json,
            "JSONB" => Self::Jsonb,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::Timestamptz,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMETZ" => Self::Timetz,
            "INTERVAL" => Self::Interval,
            "INET" | "CIDR" => Self::Inet,
            "MACADDR" => Self::Macaddr,
            // Built-in array types are reported as `INT4[]`, user-defined
            // ones by their catalog name, `_mood`
            n if n.ends_with("[]") || n.starts_with('_') => Self::Array,
            _ => Self::Other,
        }
    }

    /// Map a built-in type OID to its column kind.
    pub fn from_oid(oid: u32) -> Self {
        match oid {
            16 => Self::Bool,
            17 => Self::Bytea,
            18 | 19 | 25 | 142 | 1042 | 1043 => Self::Text,
            20 => Self::Int8,
            21 => Self::Int2,
            23 => Self::Int4,
            26 => Self::Oid,
            114 => Self::Json,
            650 | 869 => Self::Inet,
            700 => Self::Float4,
            701 => Self::Float8,
            790 => Self::Money,
            829 => Self::Macaddr,
            1082 => Self::Date,
            1083 => Self::Time,
            1114 => Self::Timestamp,
            1184 => Self::Timestamptz,
            1186 => Self::Interval,
            1266 => Self::Timetz,
            1700 => Self::Numeric,
            2950 => Self::Uuid,
            3802 => Self::Jsonb,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnKind::Bool => "bool",
            ColumnKind::Int2 => "int2",
            ColumnKind::Int4 => "int4",
            ColumnKind::Int8 => "int8",
            ColumnKind::Oid => "oid",
            ColumnKind::Float4 => "float4",
            ColumnKind::Float8 => "float8",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Money => "money",
            ColumnKind::Text => "text",
            ColumnKind::Bytea => "bytea",
            ColumnKind::Uuid => "uuid",
            ColumnKind::Json => "json",
            ColumnKind::Jsonb => "jsonb",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Timestamptz => "timestamptz",
            ColumnKind::Date => "date",
            ColumnKind::Time => "time",
            ColumnKind::Timetz => "timetz",
            ColumnKind::Interval => "interval",
            ColumnKind::Inet => "inet",
            ColumnKind::Macaddr => "macaddr",
            ColumnKind::Array => "array",
            ColumnKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Metadata for one column of a result set.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Column name as reported by the database.
    pub name: String,
    /// Zero-based position in the row.
    pub ordinal: usize,
    /// Database type name (e.g. `INT4`).
    pub type_name: String,
    /// Decoder selected for this column.
    pub kind: ColumnKind,
}

impl Column {
    /// Create a column, deriving its kind from the type name.
    pub fn new(name: impl Into<String>, ordinal: usize, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            ordinal,
            kind: ColumnKind::from_type_name(&type_name),
            type_name,
        }
    }
}
