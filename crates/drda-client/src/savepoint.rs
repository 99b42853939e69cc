//! Savepoints, flowed as SQL through a short-lived internal statement.

use crate::session::{Session, SessionCore};
use crate::statement::{ExecuteMethod, StatementKind};
use drda_core::{CursorOptions, Error, Result, TransactionErrorKind};

/// Name prefix of savepoints created without a caller-supplied name.
pub const GENERATED_NAME_PREFIX: &str = "DNC_GENENERATED_NAME_";

/// Generated ids restart at 1 past this value.
const MAX_GENERATED_ID: u32 = 0x7fff_ffff;

/// A savepoint inside the current unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    session_id: u64,
    id: Option<u32>,
    name: Option<String>,
}

impl Savepoint {
    /// Id of an unnamed savepoint.
    pub fn id(&self) -> Result<u32> {
        self.id.ok_or_else(|| {
            Error::transaction(
                TransactionErrorKind::InvalidSavepoint,
                "No ID for named savepoints",
            )
        })
    }

    /// Name of a named savepoint.
    pub fn name(&self) -> Result<&str> {
        self.name.as_deref().ok_or_else(|| {
            Error::transaction(
                TransactionErrorKind::InvalidSavepoint,
                "No name for unnamed savepoints",
            )
        })
    }

    /// Identifier sent to the server.
    fn server_name(&self) -> String {
        match (&self.name, self.id) {
            (Some(name), _) => name.clone(),
            (None, id) => format!("{GENERATED_NAME_PREFIX}{}", id.unwrap_or_default()),
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl SessionCore {
    fn check_savepoint_allowed(&mut self, what: &str) -> Result<()> {
        self.check_open()?;
        if self.auto_commit {
            return Err(Error::transaction(
                TransactionErrorKind::SavepointUnderAutoCommit,
                format!("Cannot {what} a savepoint when in auto-commit mode"),
            ));
        }
        Ok(())
    }

    fn check_savepoint_owner(&self, savepoint: &Savepoint) -> Result<()> {
        if savepoint.session_id == self.id {
            Ok(())
        } else {
            Err(Error::transaction(
                TransactionErrorKind::ForeignSavepoint,
                "Savepoint was not created by this connection",
            ))
        }
    }

    /// Run savepoint SQL on a throwaway statement, keeping the XA state as it was.
    fn flow_savepoint_sql(&mut self, sql: &str) -> Result<()> {
        let saved_xa_state = self.xa_state;
        let options = CursorOptions::with_holdability(self.effective_holdability());
        let id = self.create_statement_state(StatementKind::Plain, options, true)?;
        tracing::debug!(session = self.id, sql, "Flow savepoint statement");
        let result = self.execute_sql(id, sql, ExecuteMethod::Execute);
        self.discard_statement(id);
        self.xa_state = saved_xa_state;
        result
    }

    pub(crate) fn set_savepoint(&mut self, name: Option<&str>) -> Result<Savepoint> {
        if name == Some("") {
            return Err(Error::transaction(
                TransactionErrorKind::InvalidSavepoint,
                "Cannot pass an empty savepoint name",
            ));
        }
        self.check_savepoint_allowed("set")?;
        let savepoint = match name {
            Some(name) => Savepoint {
                session_id: self.id,
                id: None,
                name: Some(name.to_string()),
            },
            None => {
                self.savepoint_counter = if self.savepoint_counter >= MAX_GENERATED_ID {
                    1
                } else {
                    self.savepoint_counter + 1
                };
                Savepoint {
                    session_id: self.id,
                    id: Some(self.savepoint_counter),
                    name: None,
                }
            }
        };
        let sql = format!(
            "SAVEPOINT {} ON ROLLBACK RETAIN CURSORS",
            quote_identifier(&savepoint.server_name())
        );
        self.flow_savepoint_sql(&sql)?;
        Ok(savepoint)
    }

    pub(crate) fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        self.check_savepoint_allowed("roll back to")?;
        self.check_savepoint_owner(savepoint)?;
        let sql = format!(
            "ROLLBACK TO SAVEPOINT {}",
            quote_identifier(&savepoint.server_name())
        );
        self.flow_savepoint_sql(&sql)
    }

    pub(crate) fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<()> {
        self.check_savepoint_allowed("release")?;
        self.check_savepoint_owner(savepoint)?;
        let sql = format!("RELEASE SAVEPOINT {}", quote_identifier(&savepoint.server_name()));
        self.flow_savepoint_sql(&sql)
    }
}

impl Session {
    /// Set an unnamed savepoint. Auto-commit must be off.
    pub fn set_savepoint(&self) -> Result<Savepoint> {
        self.lock()?.set_savepoint(None)
    }

    pub fn set_savepoint_named(&self, name: &str) -> Result<Savepoint> {
        self.lock()?.set_savepoint(Some(name))
    }

    pub fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        self.lock()?.rollback_to_savepoint(savepoint)
    }

    pub fn release_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        self.lock()?.release_savepoint(savepoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Request, RequestKind};
    use crate::scripted::ScriptedAgent;
    use drda_core::SessionConfig;

    fn manual_commit() -> (Session, ScriptedAgent) {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        session.set_auto_commit(false).unwrap();
        wire.clear_history();
        (session, wire)
    }

    fn last_sql(wire: &ScriptedAgent) -> String {
        wire
            .requests()
            .into_iter()
            .rev()
            .find_map(|r| match r {
                Request::ExecuteImmediate { sql, .. } => Some(sql),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("sp1"), "\"sp1\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_unnamed_savepoints_are_numbered() {
        let (session, wire) = manual_commit();
        let first = session.set_savepoint().unwrap();
        let second = session.set_savepoint().unwrap();
        assert_eq!(first.id().unwrap(), 1);
        assert_eq!(second.id().unwrap(), 2);
        assert!(second.name().is_err());
        assert_eq!(
            last_sql(&wire),
            "SAVEPOINT \"DNC_GENENERATED_NAME_2\" ON ROLLBACK RETAIN CURSORS"
        );
        assert_eq!(wire.count(RequestKind::Commit), 0);
        assert_eq!(session.open_statement_count().unwrap(), 0);
    }

    #[test]
    fn test_named_rollback_and_release() {
        let (session, wire) = manual_commit();
        let sp = session.set_savepoint_named("before").unwrap();
        assert_eq!(sp.name().unwrap(), "before");
        assert!(sp.id().is_err());
        session.rollback_to_savepoint(&sp).unwrap();
        assert_eq!(last_sql(&wire), "ROLLBACK TO SAVEPOINT \"before\"");
        session.release_savepoint(&sp).unwrap();
        assert_eq!(last_sql(&wire), "RELEASE SAVEPOINT \"before\"");
    }

    #[test]
    fn test_auto_commit_forbids_savepoints() {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        wire.clear_history();
        let err = session.set_savepoint().unwrap_err();
        assert_eq!(
            err.transaction_kind(),
            Some(TransactionErrorKind::SavepointUnderAutoCommit)
        );
        assert_eq!(wire.flow_count(), 0);
    }

    #[test]
    fn test_foreign_savepoint_is_rejected() {
        let (session, _wire) = manual_commit();
        let (other, other_wire) = manual_commit();
        let sp = session.set_savepoint_named("mine").unwrap();
        let err = other.rollback_to_savepoint(&sp).unwrap_err();
        assert_eq!(err.sqlstate(), Some("3B502"));
        assert_eq!(other_wire.flow_count(), 0);
        assert!(session.set_savepoint_named("").is_err());
    }
}
