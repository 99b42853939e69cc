//! Core types for the DRDA client driver.
//!
//! This crate carries everything the session and statement layers share
//! without doing any I/O:
//!
//! - `Error` / `Warning` for failures and non-fatal server conditions
//! - `Value`, `SqlType` and `Row` for parameters, descriptors and cursor rows
//! - Transaction and cursor attributes (`IsolationLevel`, `Holdability`, ...)
//! - `SessionConfig` for building a session

pub mod config;
pub mod connection;
pub mod error;
pub mod row;
pub mod types;
pub mod value;
pub mod warning;

pub use config::{SessionConfig, SslMode};
pub use connection::{
    Concurrency, CursorOptions, FetchDirection, GeneratedKeys, Holdability, IsolationLevel,
    MoreResults, ParameterMode, ResultSetType, XaState,
};
pub use error::{
    BatchError, ConfigError, ConnectionError, ConnectionErrorKind, Error, PoolError,
    PoolErrorKind, ProtocolError, ProtocolErrorKind, QueryError, QueryErrorKind, Result,
    TransactionError, TransactionErrorKind, TypeError, UsageError, UsageErrorKind,
};
pub use row::{ColumnDescriptor, ColumnInfo, Row};
pub use types::SqlType;
pub use value::Value;
pub use warning::Warning;
