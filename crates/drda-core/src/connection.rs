//! Transaction and cursor attributes shared by sessions and statements.
//!
//! - [`IsolationLevel`] - transaction isolation, with the protocol's two-letter codes
//! - [`Holdability`] - whether cursors survive a commit
//! - [`ResultSetType`] / [`Concurrency`] / [`FetchDirection`] - cursor shape
//! - [`GeneratedKeys`] - auto-generated key retrieval mode
//! - [`XaState`] - association with a global transaction branch
//!
//! Every enum converts from its integer API code through `TryFrom<i32>`;
//! codes outside the supported set fail with an invalid-argument error
//! before anything reaches the wire.

use crate::error::{Error, UsageErrorKind};
use serde::{Deserialize, Serialize};

fn invalid(what: &str, code: i32) -> Error {
    Error::usage(
        UsageErrorKind::InvalidArgument,
        format!("Invalid value {} for {}", code, what),
    )
}

/// Transaction isolation level.
///
/// `Unknown` is the session cache state meaning "ask the server on the
/// next read"; it is never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Not cached; the next read performs a round trip.
    Unknown,
    /// No transactions. Reported for unrecognized server codes, rejected on set.
    None,
    /// Dirty reads possible.
    ReadUncommitted,
    /// The server default.
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Unknown => "UNKNOWN",
            IsolationLevel::None => "NONE",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Two-letter code used by `SET CURRENT ISOLATION` and `VALUES CURRENT ISOLATION`.
    pub const fn server_code(self) -> Option<&'static str> {
        match self {
            IsolationLevel::ReadUncommitted => Some("UR"),
            IsolationLevel::ReadCommitted => Some("CS"),
            IsolationLevel::RepeatableRead => Some("RS"),
            IsolationLevel::Serializable => Some("RR"),
            IsolationLevel::Unknown | IsolationLevel::None => None,
        }
    }

    /// Translate a server isolation code. Anything unrecognized reads as `None`.
    pub fn from_server_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "UR" => IsolationLevel::ReadUncommitted,
            "CS" => IsolationLevel::ReadCommitted,
            "RS" => IsolationLevel::RepeatableRead,
            "RR" => IsolationLevel::Serializable,
            _ => IsolationLevel::None,
        }
    }

    /// Integer API code (`TRANSACTION_*`).
    pub const fn code(self) -> i32 {
        match self {
            IsolationLevel::Unknown => -1,
            IsolationLevel::None => 0,
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::ReadCommitted => 2,
            IsolationLevel::RepeatableRead => 4,
            IsolationLevel::Serializable => 8,
        }
    }
}

impl TryFrom<i32> for IsolationLevel {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(IsolationLevel::None),
            1 => Ok(IsolationLevel::ReadUncommitted),
            2 => Ok(IsolationLevel::ReadCommitted),
            4 => Ok(IsolationLevel::RepeatableRead),
            8 => Ok(IsolationLevel::Serializable),
            other => Err(invalid("isolation level", other)),
        }
    }
}

/// Cursor holdability across commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Holdability {
    #[default]
    HoldCursorsOverCommit,
    CloseCursorsAtCommit,
}

impl Holdability {
    pub const fn code(self) -> i32 {
        match self {
            Holdability::HoldCursorsOverCommit => 1,
            Holdability::CloseCursorsAtCommit => 2,
        }
    }

    pub const fn is_hold(self) -> bool {
        matches!(self, Holdability::HoldCursorsOverCommit)
    }
}

impl TryFrom<i32> for Holdability {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Holdability::HoldCursorsOverCommit),
            2 => Ok(Holdability::CloseCursorsAtCommit),
            other => Err(invalid("holdability", other)),
        }
    }
}

/// Scrollability of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultSetType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    /// Accepted at creation but downgraded to `ScrollInsensitive`.
    ScrollSensitive,
}

impl ResultSetType {
    pub const fn code(self) -> i32 {
        match self {
            ResultSetType::ForwardOnly => 1003,
            ResultSetType::ScrollInsensitive => 1004,
            ResultSetType::ScrollSensitive => 1005,
        }
    }

    pub const fn is_scrollable(self) -> bool {
        !matches!(self, ResultSetType::ForwardOnly)
    }
}

impl TryFrom<i32> for ResultSetType {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1003 => Ok(ResultSetType::ForwardOnly),
            1004 => Ok(ResultSetType::ScrollInsensitive),
            1005 => Ok(ResultSetType::ScrollSensitive),
            other => Err(invalid("result set type", other)),
        }
    }
}

/// Cursor concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Concurrency {
    #[default]
    ReadOnly,
    Updatable,
}

impl Concurrency {
    pub const fn code(self) -> i32 {
        match self {
            Concurrency::ReadOnly => 1007,
            Concurrency::Updatable => 1008,
        }
    }
}

impl TryFrom<i32> for Concurrency {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1007 => Ok(Concurrency::ReadOnly),
            1008 => Ok(Concurrency::Updatable),
            other => Err(invalid("result set concurrency", other)),
        }
    }
}

/// Fetch direction hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchDirection {
    #[default]
    Forward,
    Reverse,
    Unknown,
}

impl FetchDirection {
    pub const fn code(self) -> i32 {
        match self {
            FetchDirection::Forward => 1000,
            FetchDirection::Reverse => 1001,
            FetchDirection::Unknown => 1002,
        }
    }
}

impl TryFrom<i32> for FetchDirection {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1000 => Ok(FetchDirection::Forward),
            1001 => Ok(FetchDirection::Reverse),
            1002 => Ok(FetchDirection::Unknown),
            other => Err(invalid("fetch direction", other)),
        }
    }
}

/// What to do with the current cursor when advancing to the next result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoreResults {
    #[default]
    CloseCurrent,
    KeepCurrent,
    CloseAll,
}

impl TryFrom<i32> for MoreResults {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(MoreResults::CloseCurrent),
            2 => Ok(MoreResults::KeepCurrent),
            3 => Ok(MoreResults::CloseAll),
            other => Err(invalid("getMoreResults current", other)),
        }
    }
}

/// Auto-generated key retrieval requested at statement creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeneratedKeys {
    #[default]
    None,
    Return,
    /// 1-based column positions; at most one for an INSERT.
    ColumnIndexes(Vec<usize>),
    /// Column names; at most one for an INSERT.
    ColumnNames(Vec<String>),
}

impl GeneratedKeys {
    pub fn is_requested(&self) -> bool {
        !matches!(self, GeneratedKeys::None)
    }

    /// Number of explicitly named key columns.
    pub fn column_count(&self) -> usize {
        match self {
            GeneratedKeys::ColumnIndexes(v) => v.len(),
            GeneratedKeys::ColumnNames(v) => v.len(),
            GeneratedKeys::None | GeneratedKeys::Return => 0,
        }
    }
}

impl TryFrom<i32> for GeneratedKeys {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(GeneratedKeys::Return),
            2 => Ok(GeneratedKeys::None),
            other => Err(invalid("autoGeneratedKeys", other)),
        }
    }
}

/// Association with a global (XA) transaction branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum XaState {
    #[default]
    NotAssociated,
    Associated,
}

/// Direction of a callable-statement parameter, from describe-input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterMode {
    #[default]
    In,
    InOut,
    Out,
    Unknown,
}

impl ParameterMode {
    /// Whether the parameter carries a value back from the server.
    pub const fn is_output(self) -> bool {
        matches!(self, ParameterMode::Out | ParameterMode::InOut)
    }

    /// Whether the caller must bind a value before execute.
    pub const fn needs_input(self) -> bool {
        matches!(
            self,
            ParameterMode::In | ParameterMode::InOut | ParameterMode::Unknown
        )
    }
}

/// The attribute tuple a statement is created with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CursorOptions {
    pub result_set_type: ResultSetType,
    pub concurrency: Concurrency,
    pub holdability: Holdability,
    pub generated_keys: GeneratedKeys,
}

impl CursorOptions {
    /// Defaults with the given holdability (usually the session's).
    pub fn with_holdability(holdability: Holdability) -> Self {
        Self {
            holdability,
            ..Self::default()
        }
    }

    /// Set the result set type.
    pub fn result_set_type(mut self, result_set_type: ResultSetType) -> Self {
        self.result_set_type = result_set_type;
        self
    }

    /// Set the concurrency.
    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the holdability.
    pub fn holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = holdability;
        self
    }

    /// Request auto-generated keys.
    pub fn generated_keys(mut self, keys: GeneratedKeys) -> Self {
        self.generated_keys = keys;
        self
    }

    /// Build from integer API codes, validating each one.
    #[allow(clippy::result_large_err)]
    pub fn from_codes(
        result_set_type: i32,
        concurrency: i32,
        holdability: i32,
    ) -> crate::Result<Self> {
        Ok(Self {
            result_set_type: ResultSetType::try_from(result_set_type)?,
            concurrency: Concurrency::try_from(concurrency)?,
            holdability: Holdability::try_from(holdability)?,
            generated_keys: GeneratedKeys::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_isolation_server_codes() {
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ] {
            let code = level.server_code().unwrap();
            assert_eq!(IsolationLevel::from_server_code(code), level);
        }
        assert_eq!(IsolationLevel::from_server_code("cs "), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::from_server_code("XX"), IsolationLevel::None);
        assert_eq!(IsolationLevel::None.server_code(), None);
    }

    #[test]
    fn test_invalid_codes_rejected() {
        let err = ResultSetType::try_from(42).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::InvalidArgument));
        assert!(Concurrency::try_from(1003).is_err());
        assert!(Holdability::try_from(0).is_err());
        assert!(IsolationLevel::try_from(3).is_err());
        assert!(GeneratedKeys::try_from(7).is_err());
        assert!(MoreResults::try_from(0).is_err());
    }

    #[test]
    fn test_cursor_options_from_codes() {
        let opts = CursorOptions::from_codes(1004, 1008, 2).unwrap();
        assert_eq!(opts.result_set_type, ResultSetType::ScrollInsensitive);
        assert_eq!(opts.concurrency, Concurrency::Updatable);
        assert_eq!(opts.holdability, Holdability::CloseCursorsAtCommit);
        assert!(CursorOptions::from_codes(1003, 9999, 1).is_err());
    }

    #[test]
    fn test_parameter_modes() {
        assert!(ParameterMode::InOut.is_output());
        assert!(ParameterMode::InOut.needs_input());
        assert!(!ParameterMode::Out.needs_input());
        assert!(!ParameterMode::In.is_output());
    }

    #[test]
    fn test_generated_keys_columns() {
        assert_eq!(GeneratedKeys::ColumnNames(vec!["ID".into()]).column_count(), 1);
        assert!(!GeneratedKeys::None.is_requested());
        assert!(GeneratedKeys::ColumnIndexes(vec![1]).is_requested());
    }
}
