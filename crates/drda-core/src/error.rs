//! Error types for DRDA client operations.

use std::fmt;

/// The primary error type for all client operations.
///
/// Every public operation reports failures through this one type. The kind
/// enums inside each variant carry the finer distinctions the session and
/// statement code needs (local rule check versus server reply versus a
/// broken reply stream).
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, no current connection)
    Connection(ConnectionError),
    /// Server-reported failure carried back in a reply (negative sqlcode)
    Query(QueryError),
    /// Parameter binding type mismatch detected before any I/O
    Type(TypeError),
    /// Unit-of-work and XA association rule violations
    Transaction(TransactionError),
    /// Reply stream could not be parsed further
    Protocol(ProtocolError),
    /// Local validation failures (closed objects, bad arguments)
    Usage(UsageError),
    /// Batch execution failure with per-entry update counts
    Batch(BatchError),
    /// Pooled reuse errors
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// SSL negotiation failed
    Ssl,
    /// The session has been closed
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlcode: i32,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, check)
    Constraint,
    /// Object not found
    NotFound,
    /// Authorization failure
    Permission,
    /// Data too large for its target
    DataTruncation,
    /// Deadlock or lock timeout
    Deadlock,
    /// Statement timeout expired
    Timeout,
    /// Other database error
    Database,
}

impl QueryErrorKind {
    /// Classify a server SQLSTATE into a kind.
    pub fn from_sqlstate(sqlstate: &str) -> Self {
        match sqlstate {
            "40001" | "40XL1" | "40XL2" => QueryErrorKind::Deadlock,
            "XCL52" => QueryErrorKind::Timeout,
            "22001" => QueryErrorKind::DataTruncation,
            s if s.starts_with("23") => QueryErrorKind::Constraint,
            s if s.starts_with("42Y") || s.starts_with("42X05") => QueryErrorKind::NotFound,
            s if s.starts_with("42") => QueryErrorKind::Syntax,
            s if s.starts_with("28") => QueryErrorKind::Permission,
            _ => QueryErrorKind::Database,
        }
    }
}

#[derive(Debug)]
pub struct TypeError {
    /// Target SQL type of the parameter
    pub expected: &'static str,
    /// Type of the value offered
    pub actual: String,
    /// 1-based parameter index, when binding
    pub parameter: Option<usize>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Close requested while a unit of work is still open
    ActiveUnitOfWork,
    /// Auto-commit requested while associated with a global transaction
    AutoCommitUnderXa,
    /// Local commit or rollback requested while associated with a global transaction
    LocalCommitUnderXa,
    /// Cursor holdability over commit requested while associated
    HoldUnderXa,
    /// Savepoint operation attempted in auto-commit mode
    SavepointUnderAutoCommit,
    /// Savepoint handle is missing or invalid
    InvalidSavepoint,
    /// Savepoint was created by another session
    ForeignSavepoint,
    /// Isolation level not supported by the protocol
    UnsupportedIsolation,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// No further replies in the current chain can be parsed
    ChainBreaking,
    /// A reply arrived that does not match the command written in that position
    UnexpectedReply,
    /// The transport dropped the conversation
    Disconnect,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// Statement used after close
    StatementClosed,
    /// Result set used after close
    ResultSetClosed,
    /// Enum-like argument out of range or negative numeric attribute
    InvalidArgument,
    /// Parameter index outside 1..=count
    InvalidParameterIndex,
    /// Statement has no input parameters
    NoInputParameters,
    /// A parameter was neither set nor registered
    MissingParameter,
    /// execute_query on an update, execute_update on a query
    WrongExecuteMethod,
    /// Stored procedure returned the wrong number of result sets
    ResultSetCount,
    /// SQL shape not allowed in a batch
    InvalidBatchEntry,
    /// Batch exceeds the protocol correlation-id space
    BatchTooLarge,
    /// Cursor name already used by an open result set
    DuplicateCursorName,
    /// Positioned update names no open cursor
    CursorNotFound,
    /// Operation not available on this protocol tier
    NotSupported,
    /// Getter used on a parameter that is not OUT or INOUT
    NotOutParameter,
    /// was_null called before any getter
    WasNullUnset,
    /// Server returned a cursor with a different holdability
    HoldabilityMismatch,
    /// Operation not allowed while a dependent result set is open
    OpenResultSet,
}

impl UsageErrorKind {
    /// Client SQLSTATE reported for this kind.
    pub const fn sqlstate(self) -> &'static str {
        match self {
            UsageErrorKind::StatementClosed => "XJ012",
            UsageErrorKind::ResultSetClosed => "XCL16",
            UsageErrorKind::InvalidArgument => "XJ081",
            UsageErrorKind::InvalidParameterIndex => "XCL13",
            UsageErrorKind::NoInputParameters => "07009",
            UsageErrorKind::MissingParameter => "07000",
            UsageErrorKind::WrongExecuteMethod => "X0Y78",
            UsageErrorKind::ResultSetCount => "X0Y79",
            UsageErrorKind::InvalidBatchEntry => "XJ04C",
            UsageErrorKind::BatchTooLarge => "XJ211",
            UsageErrorKind::DuplicateCursorName => "X0X60",
            UsageErrorKind::CursorNotFound => "42X30",
            UsageErrorKind::NotSupported => "0A000",
            UsageErrorKind::NotOutParameter => "XCL26",
            UsageErrorKind::WasNullUnset => "XJ121",
            UsageErrorKind::HoldabilityMismatch => "XJ067",
            UsageErrorKind::OpenResultSet => "X0X95",
        }
    }
}

/// A failed batch: the update counts gathered so far plus every error
/// accumulated while reading the replies.
#[derive(Debug)]
pub struct BatchError {
    pub message: String,
    /// One slot per batch entry; unprocessed or failed entries hold the failure sentinel.
    pub update_counts: Vec<i64>,
    /// Accumulated errors in entry order; a chain break adds one trailing marker.
    pub errors: Vec<Error>,
}

impl BatchError {
    /// Whether the reply stream broke before every entry was read.
    pub fn is_chain_broken(&self) -> bool {
        self.errors.last().is_some_and(Error::is_chain_breaking)
    }
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Pool is closed
    Closed,
    /// Returned session could not be prepared for reuse
    Reuse,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a local validation error.
    pub fn usage(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            kind,
            message: message.into(),
        })
    }

    /// Build a unit-of-work rule violation.
    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    /// Build a protocol error without an underlying cause.
    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// The "no current connection" error raised by every operation on a closed session.
    pub fn connection_closed() -> Self {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Closed,
            message: "No current connection".to_string(),
            source: None,
        })
    }

    /// Build a server failure from a reply status.
    pub fn server(sqlcode: i32, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        let sqlstate = sqlstate.into();
        Error::Query(QueryError {
            kind: QueryErrorKind::from_sqlstate(&sqlstate),
            sql: None,
            sqlcode,
            sqlstate: Some(sqlstate),
            message: message.into(),
            source: None,
        })
    }

    /// Was this detected client-side, before or without any server reply?
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::Usage(_) | Error::Type(_) | Error::Transaction(_) | Error::Config(_)
        ) || matches!(self, Error::Connection(c) if c.kind == ConnectionErrorKind::Closed)
    }

    /// Did the reply stream break so that later replies are unreliable?
    pub fn is_chain_breaking(&self) -> bool {
        match self {
            Error::Protocol(p) => matches!(
                p.kind,
                ProtocolErrorKind::ChainBreaking | ProtocolErrorKind::Disconnect
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Is this a retryable error (deadlock, lock timeout, statement timeout)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Deadlock | QueryErrorKind::Timeout),
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Authentication
                    | ConnectionErrorKind::Disconnected
                    | ConnectionErrorKind::Ssl
            ),
            Error::Protocol(p) => p.kind == ProtocolErrorKind::Disconnect,
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get SQLSTATE, server-reported or the fixed client state of a local error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::Usage(u) => Some(u.kind.sqlstate()),
            Error::Type(_) => Some("22005"),
            Error::Transaction(t) => Some(match t.kind {
                TransactionErrorKind::ActiveUnitOfWork => "25001",
                TransactionErrorKind::AutoCommitUnderXa => "XJ056",
                TransactionErrorKind::LocalCommitUnderXa => "XJ057",
                TransactionErrorKind::HoldUnderXa => "XJ05C",
                TransactionErrorKind::SavepointUnderAutoCommit => "XJ010",
                TransactionErrorKind::InvalidSavepoint => "3B001",
                TransactionErrorKind::ForeignSavepoint => "3B502",
                TransactionErrorKind::UnsupportedIsolation => "XJ045",
            }),
            Error::Connection(c) if c.kind == ConnectionErrorKind::Closed => Some("08003"),
            Error::Connection(_) => Some("08006"),
            Error::Protocol(p) if p.kind == ProtocolErrorKind::ChainBreaking => Some("XJ208"),
            Error::Protocol(_) => Some("58009"),
            Error::Batch(_) => Some("XJ208"),
            _ => None,
        }
    }

    /// Get the server sqlcode if this came back in a reply.
    pub fn sqlcode(&self) -> Option<i32> {
        match self {
            Error::Query(q) => Some(q.sqlcode),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Attach the statement text to a server failure.
    pub fn with_sql(mut self, sql: &str) -> Self {
        if let Error::Query(q) = &mut self {
            if q.sql.is_none() {
                q.sql = Some(sql.to_string());
            }
        }
        self
    }

    /// The usage kind, when this is a local validation failure.
    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(u) => Some(u.kind),
            _ => None,
        }
    }

    /// The transaction kind, when this is a unit-of-work rule violation.
    pub fn transaction_kind(&self) -> Option<TransactionErrorKind> {
        match self {
            Error::Transaction(t) => Some(t.kind),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(
                        f,
                        "Query error (SQLSTATE {}, SQLCODE {}): {}",
                        sqlstate, e.sqlcode, e.message
                    )
                } else {
                    write!(f, "Query error (SQLCODE {}): {}", e.sqlcode, e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Usage(e) => write!(f, "{}", e.message),
            Error::Batch(e) => write!(f, "Batch error: {}", e),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Batch(e) => e
                .errors
                .first()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.parameter {
            write!(
                f,
                "cannot bind {} to parameter {} of type {}",
                self.actual, index, self.expected
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.kind.sqlstate())
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for err in &self.errors {
            write!(f, "; {}", err)?;
        }
        Ok(())
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        Error::Batch(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: format!("invalid configuration document: {}", err),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_helpers() {
        let query = QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO T VALUES (1)".to_string()),
            sqlcode: -1,
            sqlstate: Some("23505".to_string()),
            message: "duplicate key".to_string(),
            source: None,
        };

        assert!(query.is_unique_violation());
        assert!(!query.is_foreign_key_violation());

        let err = Error::Query(query);
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.sqlcode(), Some(-1));
        assert_eq!(err.sql(), Some("INSERT INTO T VALUES (1)"));
        assert!(!err.is_local());
    }

    #[test]
    fn local_errors_carry_client_states() {
        let closed = Error::connection_closed();
        assert!(closed.is_local());
        assert_eq!(closed.sqlstate(), Some("08003"));

        let dup = Error::usage(UsageErrorKind::DuplicateCursorName, "cursor C1 in use");
        assert!(dup.is_local());
        assert_eq!(dup.sqlstate(), Some("X0X60"));
        assert_eq!(dup.usage_kind(), Some(UsageErrorKind::DuplicateCursorName));

        let xa = Error::transaction(TransactionErrorKind::AutoCommitUnderXa, "no auto-commit");
        assert_eq!(xa.sqlstate(), Some("XJ056"));
        assert_eq!(
            xa.transaction_kind(),
            Some(TransactionErrorKind::AutoCommitUnderXa)
        );
    }

    #[test]
    fn server_kind_classification() {
        assert_eq!(
            QueryErrorKind::from_sqlstate("40001"),
            QueryErrorKind::Deadlock
        );
        assert_eq!(
            QueryErrorKind::from_sqlstate("23503"),
            QueryErrorKind::Constraint
        );
        assert_eq!(QueryErrorKind::from_sqlstate("42601"), QueryErrorKind::Syntax);
        assert_eq!(
            QueryErrorKind::from_sqlstate("XJ001"),
            QueryErrorKind::Database
        );
        assert!(Error::server(-30000, "40001", "deadlock").is_retryable());
    }

    #[test]
    fn batch_error_detects_chain_break() {
        let broken = BatchError {
            message: "batch failed".to_string(),
            update_counts: vec![1, -3],
            errors: vec![
                Error::server(-1, "22001", "truncated"),
                Error::protocol(ProtocolErrorKind::ChainBreaking, "chain broken"),
            ],
        };
        assert!(broken.is_chain_broken());

        let intact = BatchError {
            message: "batch failed".to_string(),
            update_counts: vec![-3],
            errors: vec![Error::usage(UsageErrorKind::InvalidBatchEntry, "select")],
        };
        assert!(!intact.is_chain_broken());
        assert!(Error::Batch(intact).to_string().contains("select"));
    }

    #[test]
    fn with_sql_keeps_first_statement() {
        let err = Error::server(-204, "42X05", "table missing")
            .with_sql("SELECT * FROM A")
            .with_sql("SELECT * FROM B");
        assert_eq!(err.sql(), Some("SELECT * FROM A"));
    }
}
