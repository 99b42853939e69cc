//! SQL type codes and the bind-time compatibility rules.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// SQL data types as described by the server for parameters and columns.
///
/// The numeric codes are the `java.sql.Types` values the protocol carries
/// in descriptors and metadata strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    VarChar,
    LongVarChar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Null,
    Other,
    JavaObject,
    Distinct,
    Struct,
    Array,
    Blob,
    Clob,
    Ref,
    Datalink,
    Boolean,
}

impl SqlType {
    /// Wire/metadata code for this type.
    pub const fn code(self) -> i32 {
        match self {
            SqlType::Bit => -7,
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Float => 6,
            SqlType::Real => 7,
            SqlType::Double => 8,
            SqlType::Numeric => 2,
            SqlType::Decimal => 3,
            SqlType::Char => 1,
            SqlType::VarChar => 12,
            SqlType::LongVarChar => -1,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
            SqlType::Binary => -2,
            SqlType::VarBinary => -3,
            SqlType::LongVarBinary => -4,
            SqlType::Null => 0,
            SqlType::Other => 1111,
            SqlType::JavaObject => 2000,
            SqlType::Distinct => 2001,
            SqlType::Struct => 2002,
            SqlType::Array => 2003,
            SqlType::Blob => 2004,
            SqlType::Clob => 2005,
            SqlType::Ref => 2006,
            SqlType::Datalink => 70,
            SqlType::Boolean => 16,
        }
    }

    /// Look up a type by its wire/metadata code.
    pub fn from_code(code: i32) -> Option<Self> {
        ALL_TYPES.iter().copied().find(|t| t.code() == code)
    }

    /// Get the SQL type name for this type.
    pub const fn sql_name(self) -> &'static str {
        match self {
            SqlType::Bit => "BIT",
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE",
            SqlType::Numeric => "NUMERIC",
            SqlType::Decimal => "DECIMAL",
            SqlType::Char => "CHAR",
            SqlType::VarChar => "VARCHAR",
            SqlType::LongVarChar => "LONG VARCHAR",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Binary => "CHAR () FOR BIT DATA",
            SqlType::VarBinary => "VARCHAR () FOR BIT DATA",
            SqlType::LongVarBinary => "LONG VARCHAR FOR BIT DATA",
            SqlType::Null => "NULL",
            SqlType::Other => "OTHER",
            SqlType::JavaObject => "JAVA_OBJECT",
            SqlType::Distinct => "DISTINCT",
            SqlType::Struct => "STRUCT",
            SqlType::Array => "ARRAY",
            SqlType::Blob => "BLOB",
            SqlType::Clob => "CLOB",
            SqlType::Ref => "REF",
            SqlType::Datalink => "DATALINK",
            SqlType::Boolean => "BOOLEAN",
        }
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Float
                | SqlType::Real
                | SqlType::Double
                | SqlType::Numeric
                | SqlType::Decimal
        )
    }

    /// Check if this type is character-based.
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            SqlType::Char | SqlType::VarChar | SqlType::LongVarChar | SqlType::Clob
        )
    }

    /// Check if this type is a date/time type.
    pub const fn is_temporal(self) -> bool {
        matches!(self, SqlType::Date | SqlType::Time | SqlType::Timestamp)
    }

    /// Whether a value of this kind may be bound to a parameter described as `self`.
    ///
    /// `Value::Null` is always accepted here; typed nulls go through
    /// [`SqlType::accepts_null_of`].
    pub fn accepts(self, value: &Value) -> bool {
        let allowed: &[SqlType] = match value {
            Value::Null => return true,
            Value::Bool(_)
            | Value::SmallInt(_)
            | Value::Int(_)
            | Value::BigInt(_)
            | Value::Real(_)
            | Value::Double(_)
            | Value::Decimal(_) => GENERIC_SCALAR,
            Value::Text(_) => FROM_STRING,
            Value::Bytes(_) => FROM_BYTES,
            Value::Date(_) => FROM_DATE,
            Value::Time(_) => FROM_TIME,
            Value::Timestamp(_) => FROM_TIMESTAMP,
            Value::Blob(_) => &[SqlType::Blob],
            Value::Clob(_) => &[SqlType::Clob],
        };
        allowed.contains(&self)
    }

    /// Whether a null declared with type `declared` may be bound to a parameter described as `self`.
    pub fn accepts_null_of(self, declared: SqlType) -> bool {
        let allowed: &[SqlType] = match declared {
            SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Real
            | SqlType::Float
            | SqlType::Double
            | SqlType::Decimal => NULL_FOR_SCALAR,
            SqlType::Char | SqlType::VarChar | SqlType::LongVarChar => NULL_FOR_CHARACTERS,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary => NULL_FOR_BINARY,
            SqlType::Date | SqlType::Timestamp => NULL_FOR_DATE,
            SqlType::Time => NULL_FOR_TIME,
            SqlType::Clob => NULL_FOR_CLOB,
            SqlType::Blob => &[SqlType::Blob],
            _ => ALL_TYPES,
        };
        allowed.contains(&self)
    }
}

const ALL_TYPES: &[SqlType] = &[
    SqlType::Bit,
    SqlType::TinyInt,
    SqlType::SmallInt,
    SqlType::Integer,
    SqlType::BigInt,
    SqlType::Float,
    SqlType::Real,
    SqlType::Double,
    SqlType::Numeric,
    SqlType::Decimal,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::LongVarChar,
    SqlType::Date,
    SqlType::Time,
    SqlType::Timestamp,
    SqlType::Binary,
    SqlType::VarBinary,
    SqlType::LongVarBinary,
    SqlType::Null,
    SqlType::Other,
    SqlType::JavaObject,
    SqlType::Distinct,
    SqlType::Struct,
    SqlType::Array,
    SqlType::Blob,
    SqlType::Clob,
    SqlType::Ref,
    SqlType::Datalink,
    SqlType::Boolean,
];

const GENERIC_SCALAR: &[SqlType] = &[
    SqlType::BigInt,
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::Decimal,
    SqlType::Integer,
    SqlType::SmallInt,
    SqlType::Real,
    SqlType::Double,
    SqlType::VarChar,
    SqlType::Boolean,
];

const FROM_STRING: &[SqlType] = &[
    SqlType::BigInt,
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::Decimal,
    SqlType::Integer,
    SqlType::SmallInt,
    SqlType::Real,
    SqlType::Double,
    SqlType::VarChar,
    SqlType::Boolean,
    SqlType::Date,
    SqlType::Time,
    SqlType::Timestamp,
    SqlType::Clob,
];

const FROM_BYTES: &[SqlType] = &[
    SqlType::LongVarBinary,
    SqlType::VarBinary,
    SqlType::Binary,
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Blob,
];

const FROM_DATE: &[SqlType] = &[
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Date,
    SqlType::Timestamp,
];

const FROM_TIME: &[SqlType] = &[
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Time,
];

const FROM_TIMESTAMP: &[SqlType] = &[
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Date,
    SqlType::Time,
    SqlType::Timestamp,
];

const NULL_FOR_SCALAR: &[SqlType] = &[
    SqlType::Bit,
    SqlType::TinyInt,
    SqlType::BigInt,
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::Numeric,
    SqlType::Decimal,
    SqlType::Integer,
    SqlType::SmallInt,
    SqlType::Float,
    SqlType::Real,
    SqlType::Double,
    SqlType::VarChar,
];

const NULL_FOR_CHARACTERS: &[SqlType] = &[
    SqlType::Bit,
    SqlType::TinyInt,
    SqlType::BigInt,
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::Numeric,
    SqlType::Decimal,
    SqlType::Integer,
    SqlType::SmallInt,
    SqlType::Float,
    SqlType::Real,
    SqlType::Double,
    SqlType::VarChar,
    SqlType::Date,
    SqlType::Time,
    SqlType::Timestamp,
];

const NULL_FOR_BINARY: &[SqlType] = &[
    SqlType::VarBinary,
    SqlType::Binary,
    SqlType::LongVarBinary,
];

const NULL_FOR_DATE: &[SqlType] = &[
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Date,
    SqlType::Timestamp,
];

const NULL_FOR_TIME: &[SqlType] = &[
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Time,
    SqlType::Timestamp,
];

const NULL_FOR_CLOB: &[SqlType] = &[
    SqlType::LongVarChar,
    SqlType::Char,
    SqlType::VarChar,
    SqlType::Clob,
];
