//! The transport boundary.
//!
//! An [`Agent`] owns the physical channel. The session stages requests into
//! a write chain, flows the chain as one exchange, then reads exactly one
//! [`Reply`] per request in the order the requests were written. Encoding
//! of requests and replies on the wire is the agent's business.

use crate::section::Section;
use drda_core::{ColumnDescriptor, Holdability, ParameterMode, Result, SqlType, Value};

/// Whether a chain may begin a unit of work on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainScope {
    /// Flowing the chain starts a unit of work if none is active.
    InUnitOfWork,
    /// The chain must not start a unit of work (connection close, pooled reuse, XA commit).
    OutsideUnitOfWork,
}

/// One command staged into a write chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Prepare `sql` on `section`, optionally describing its input and output.
    Prepare {
        section: Section,
        sql: String,
        attributes: Option<String>,
        describe_input: bool,
        describe_output: bool,
    },
    /// Execute SQL text without a prior prepare.
    ExecuteImmediate { section: Section, sql: String },
    /// Execute a prepared, non-query statement.
    ///
    /// `types` is the input descriptor, one entry per parameter, so a null
    /// still tells the server its type.
    Execute {
        section: Section,
        parameters: Vec<Value>,
        types: Vec<SqlType>,
    },
    /// Open a cursor for a prepared query.
    OpenQuery {
        section: Section,
        fetch_size: u32,
        parameters: Vec<Value>,
    },
    /// Execute a stored procedure call.
    ExecuteCall {
        section: Section,
        parameters: Vec<Value>,
        fetch_size: u32,
        output_expected: bool,
    },
    /// Fetch the next block of rows of an open cursor.
    Fetch { section: Section, fetch_size: u32 },
    /// Reposition a scrollable cursor on its current row before a positioned update.
    PositioningFetch { section: Section },
    /// Close an open cursor.
    CloseCursor { section: Section },
    /// Set special registers (statement timeout and the like).
    SetSpecialRegister { statements: Vec<String> },
    Commit,
    Rollback,
    /// Stand-in for a commit when the chain already holds write errors.
    CommitSubstitute,
    /// Local commit of an XA-capable session outside a global transaction.
    XaLocalCommit,
    /// Local rollback of an XA-capable session outside a global transaction.
    XaLocalRollback,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Prepare { .. } => RequestKind::Prepare,
            Request::ExecuteImmediate { .. } => RequestKind::ExecuteImmediate,
            Request::Execute { .. } => RequestKind::Execute,
            Request::OpenQuery { .. } => RequestKind::OpenQuery,
            Request::ExecuteCall { .. } => RequestKind::ExecuteCall,
            Request::Fetch { .. } => RequestKind::Fetch,
            Request::PositioningFetch { .. } => RequestKind::PositioningFetch,
            Request::CloseCursor { .. } => RequestKind::CloseCursor,
            Request::SetSpecialRegister { .. } => RequestKind::SetSpecialRegister,
            Request::Commit => RequestKind::Commit,
            Request::Rollback => RequestKind::Rollback,
            Request::CommitSubstitute => RequestKind::CommitSubstitute,
            Request::XaLocalCommit => RequestKind::XaLocalCommit,
            Request::XaLocalRollback => RequestKind::XaLocalRollback,
        }
    }

    /// The section a request targets, when it targets one.
    pub fn section(&self) -> Option<&Section> {
        match self {
            Request::Prepare { section, .. }
            | Request::ExecuteImmediate { section, .. }
            | Request::Execute { section, .. }
            | Request::OpenQuery { section, .. }
            | Request::ExecuteCall { section, .. }
            | Request::Fetch { section, .. }
            | Request::PositioningFetch { section }
            | Request::CloseCursor { section } => Some(section),
            _ => None,
        }
    }

    /// SQL text carried by the request.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Request::Prepare { sql, .. } | Request::ExecuteImmediate { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Whether this request ends a unit of work.
    pub fn is_commit(&self) -> bool {
        matches!(
            self,
            Request::Commit | Request::CommitSubstitute | Request::XaLocalCommit
        )
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self, Request::Rollback | Request::XaLocalRollback)
    }
}

/// Request discriminant, used to script and inspect exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Prepare,
    ExecuteImmediate,
    Execute,
    OpenQuery,
    ExecuteCall,
    Fetch,
    PositioningFetch,
    CloseCursor,
    SetSpecialRegister,
    Commit,
    Rollback,
    CommitSubstitute,
    XaLocalCommit,
    XaLocalRollback,
}

/// Status block of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sqlca {
    pub sqlcode: i32,
    pub sqlstate: String,
    pub message: String,
}

/// Session state the server attached to an unrelated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piggyback {
    /// Two-letter isolation code (`UR`, `CS`, `RS`, `RR`)
    Isolation(String),
    /// Current schema
    Schema(String),
}

/// One described parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub sql_type: SqlType,
    pub mode: ParameterMode,
    pub nullable: bool,
}

impl ParameterDescriptor {
    pub fn new(sql_type: SqlType, mode: ParameterMode) -> Self {
        Self {
            sql_type,
            mode,
            nullable: true,
        }
    }

    /// An input parameter of the given type.
    pub fn input(sql_type: SqlType) -> Self {
        Self::new(sql_type, ParameterMode::In)
    }
}

/// Reply to an open query, or one result set of a procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryReply {
    /// Holdability the server actually opened the cursor with; `None` means as requested.
    pub holdability: Option<Holdability>,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
    pub end_of_data: bool,
    /// Rows came back as a rowset (no per-row repositioning needed).
    pub rowset: bool,
}

impl QueryReply {
    /// A fully fetched result.
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            holdability: None,
            columns,
            rows,
            end_of_data: true,
            rowset: false,
        }
    }

    /// No columns and no rows.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// More rows remain on the server.
    pub fn partial(mut self) -> Self {
        self.end_of_data = false;
        self
    }

    pub fn with_holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    pub fn as_rowset(mut self) -> Self {
        self.rowset = true;
        self
    }
}

/// Reply to a procedure call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallReply {
    pub update_count: i64,
    pub result_sets: Vec<QueryReply>,
    /// One value per described parameter; non-output positions are ignored.
    pub outputs: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Ack,
    Described {
        parameters: Vec<ParameterDescriptor>,
        columns: Vec<ColumnDescriptor>,
    },
    QueryOpened(QueryReply),
    UpdateCount(i64),
    CallExecuted(CallReply),
    Rows {
        rows: Vec<Vec<Value>>,
        end_of_data: bool,
    },
}

/// One reply read back from a flowed chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub sqlca: Option<Sqlca>,
    pub body: ReplyBody,
    pub piggyback: Vec<Piggyback>,
}

impl Reply {
    pub fn new(body: ReplyBody) -> Self {
        Self {
            sqlca: None,
            body,
            piggyback: Vec::new(),
        }
    }

    pub fn ack() -> Self {
        Self::new(ReplyBody::Ack)
    }

    pub fn update_count(count: i64) -> Self {
        Self::new(ReplyBody::UpdateCount(count))
    }

    pub fn described(parameters: Vec<ParameterDescriptor>, columns: Vec<ColumnDescriptor>) -> Self {
        Self::new(ReplyBody::Described {
            parameters,
            columns,
        })
    }

    pub fn query(reply: QueryReply) -> Self {
        Self::new(ReplyBody::QueryOpened(reply))
    }

    pub fn call(reply: CallReply) -> Self {
        Self::new(ReplyBody::CallExecuted(reply))
    }

    pub fn rows(rows: Vec<Vec<Value>>, end_of_data: bool) -> Self {
        Self::new(ReplyBody::Rows { rows, end_of_data })
    }

    /// A failed reply (negative sqlcode).
    pub fn error(sqlcode: i32, sqlstate: &str, message: &str) -> Self {
        Self::ack().with_sqlca(sqlcode, sqlstate, message)
    }

    /// Attach a positive sqlcode.
    pub fn with_warning(self, sqlcode: i32, sqlstate: &str, message: &str) -> Self {
        self.with_sqlca(sqlcode, sqlstate, message)
    }

    fn with_sqlca(mut self, sqlcode: i32, sqlstate: &str, message: &str) -> Self {
        self.sqlca = Some(Sqlca {
            sqlcode,
            sqlstate: sqlstate.to_string(),
            message: message.to_string(),
        });
        self
    }

    pub fn with_isolation(mut self, code: &str) -> Self {
        self.piggyback.push(Piggyback::Isolation(code.to_string()));
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.piggyback.push(Piggyback::Schema(schema.to_string()));
        self
    }

    /// Whether the reply reports a failure.
    pub fn is_error(&self) -> bool {
        self.sqlca.as_ref().is_some_and(|s| s.sqlcode < 0)
    }
}

/// The physical channel of one session.
///
/// Calls arrive in the order `begin_write_chain`, `write`*, `flow`,
/// `read`* (one per written request), `end_read_chain`. A `read` error is
/// chain breaking: no later reply of that chain is read.
pub trait Agent: Send {
    fn begin_write_chain(&mut self, scope: ChainScope) -> Result<()>;

    /// Stage one request. A non-chain-breaking error here is kept with the
    /// chain's other errors and the chain still flows.
    fn write(&mut self, request: Request) -> Result<()>;

    fn flow(&mut self, scope: ChainScope) -> Result<()>;

    fn read(&mut self) -> Result<Reply>;

    fn end_read_chain(&mut self) -> Result<()>;

    /// Surface errors queued by earlier exchanges.
    fn check_for_deferred_exceptions(&mut self) -> Result<()>;

    /// Release the physical channel.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
