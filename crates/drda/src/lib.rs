//! DRDA database client driver.
//!
//! The driver is split across a few crates; this one re-exports them:
//!
//! - `drda-core`: errors, warnings, values and session configuration
//! - `drda-client`: sessions, statements, cursors, batches and metadata
//! - `drda-pool`: pooled session reuse
//!
//! # Quick Start
//!
//! ```ignore
//! use drda::prelude::*;
//!
//! fn example(agent: impl Agent + 'static) -> Result<()> {
//!     let session = Session::open(SessionConfig::new("toursdb"), agent)?;
//!     session.set_auto_commit(false)?;
//!
//!     let insert = session.prepare_statement("INSERT INTO CITIES VALUES (?, ?)")?;
//!     insert.set(1, 1)?;
//!     insert.set(2, "Amsterdam")?;
//!     insert.add_batch()?;
//!     insert.set(1, 2)?;
//!     insert.set(2, "Athens")?;
//!     insert.add_batch()?;
//!     insert.execute_batch()?;
//!     session.commit()?;
//!
//!     let mut cities = session
//!         .create_statement()?
//!         .execute_query("SELECT NAME FROM CITIES")?;
//!     while let Some(row) = cities.next()? {
//!         println!("{:?}", row.get(0));
//!     }
//!     Ok(())
//! }
//! ```

pub use drda_client as client;
pub use drda_core as core;
pub use drda_pool as pool;

pub use drda_client::{
    Agent, CallableStatement, DatabaseMetadata, PreparedStatement, ResultSet, Savepoint,
    ScriptedAgent, ServerCapabilities, Session, Statement,
};
pub use drda_core::{
    BatchError, Concurrency, CursorOptions, Error, FetchDirection, GeneratedKeys, Holdability,
    IsolationLevel, MoreResults, ResultSetType, Row, SessionConfig, SqlType, SslMode, Value,
    Warning, XaState,
};
pub use drda_pool::{Pool, PoolConfig, PoolStats, PooledSession};

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Commonly used types.
///
/// ```ignore
/// use drda::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Agent, CallableStatement, Concurrency, CursorOptions, DatabaseMetadata, Error,
        Holdability, IsolationLevel, Pool, PoolConfig, PooledSession, PreparedStatement, Result,
        ResultSet, ResultSetType, Row, Savepoint, Session, SessionConfig, SqlType, Statement,
        Value,
    };
}
