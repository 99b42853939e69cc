//! Client side of a DRDA-style database driver.
//!
//! This crate owns the session and statement state machines that sit above
//! the wire protocol:
//!
//! - [`Session`]: auto-commit, unit-of-work tracking, XA association,
//!   isolation and schema caching, pooled reuse and reset
//! - [`Statement`], [`PreparedStatement`], [`CallableStatement`]: execute
//!   paths, batches, generated keys and positioned updates
//! - [`ResultSet`]: cursor lifecycle and the auto-commit on close
//! - [`DatabaseMetadata`]: cached server info and catalog queries
//!
//! Everything that touches the network goes through the [`Agent`] trait.
//! [`ScriptedAgent`] is an in-memory agent for tests and tooling.

pub use drda_core;

pub mod agent;
pub mod batch;
pub mod callable;
pub mod cursor;
pub mod flavor;
pub mod metadata;
pub mod prepared;
pub mod registry;
pub mod savepoint;
pub mod scripted;
pub mod section;
pub mod session;
pub mod sql;
pub mod statement;

pub use agent::{
    Agent, CallReply, ChainScope, ParameterDescriptor, QueryReply, Reply, ReplyBody, Request,
    RequestKind,
};
pub use batch::{EXECUTE_FAILED, MAX_BATCH_SIZE};
pub use callable::CallableStatement;
pub use cursor::ResultSet;
pub use flavor::{LocalFlavor, TransactionFlavor, XaFlavor};
pub use metadata::{CodeList, DatabaseMetadata, ProductLevel, ServerCapabilities};
pub use prepared::PreparedStatement;
pub use savepoint::Savepoint;
pub use scripted::{Chain, ScriptedAgent};
pub use section::Section;
pub use session::{Executor, Session};
pub use sql::SqlMode;
pub use statement::{ExecuteMethod, Statement};

pub use drda_core::{
    BatchError, ColumnDescriptor, Concurrency, CursorOptions, Error, FetchDirection,
    GeneratedKeys, Holdability, IsolationLevel, MoreResults, Result, ResultSetType, Row,
    SessionConfig, SqlType, Value, Warning, XaState,
};
