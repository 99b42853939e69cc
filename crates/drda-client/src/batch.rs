//! Batched execution.
//!
//! A plain statement batches SQL strings; a prepared statement batches
//! snapshots of its bound parameters. Either way the whole batch goes out
//! in one chain with a single trailing auto-commit, and every update-count
//! slot starts at [`EXECUTE_FAILED`] so entries the server never answered
//! stay distinguishable from real counts.

use crate::agent::{ChainScope, ReplyBody, Request};
use crate::prepared::PreparedStatement;
use crate::registry::StatementId;
use crate::section::Section;
use crate::session::{AutoCommitWrite, SessionCore};
use crate::sql::{self, SqlMode};
use crate::statement::{
    BatchEntry, Binding, ClosePlan, Statement, StatementKind, input_types, positioned_sql,
    statement_closed,
};
use drda_core::{BatchError, Error, ProtocolErrorKind, Result, SqlType, UsageErrorKind};

/// Most entries one batch may carry; bounded by the correlation ids of a chain.
pub const MAX_BATCH_SIZE: usize = 65_534;

/// Update count of an entry that failed or was never answered.
pub const EXECUTE_FAILED: i64 = -3;

const NON_ATOMIC_FAILURE: &str = "Non-atomic batch failure. The batch was submitted, but at least one exception occurred on an individual member of the batch";
const CHAIN_BROKEN: &str = "Non-recoverable chain-breaking exception occurred during batch processing. The batch is terminated non-atomically";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryWrite {
    /// Rejected before anything was written
    Skipped,
    Sent { positioning: bool },
}

#[derive(Debug, Default)]
struct BatchPlan {
    close: ClosePlan,
    timeout_sent: bool,
    entries: Vec<EntryWrite>,
    /// Sections allocated for string entries, freed once the chain is read
    sections: Vec<Section>,
    auto_commit: Option<AutoCommitWrite>,
}

fn invalid_entry(message: &str) -> Error {
    Error::usage(UsageErrorKind::InvalidBatchEntry, message)
}

fn batch_error(message: &str, update_counts: Vec<i64>, errors: Vec<Error>) -> Error {
    Error::Batch(BatchError {
        message: message.to_string(),
        update_counts,
        errors,
    })
}

impl SessionCore {
    pub(crate) fn add_batch_sql(&mut self, id: StatementId, sql: &str) -> Result<()> {
        self.check_statement_open(id)?;
        let statement = self.statement_mut(id)?;
        if statement.kind != StatementKind::Plain {
            return Err(Error::usage(
                UsageErrorKind::NotSupported,
                "SQL text cannot be added to the batch of a prepared statement",
            ));
        }
        statement.batch.push(BatchEntry::Sql(sql.to_string()));
        Ok(())
    }

    /// Snapshot the current bindings and parameter types as one entry.
    pub(crate) fn add_batch_parameters(&mut self, id: StatementId) -> Result<()> {
        self.check_statement_open(id)?;
        self.check_parameters_set(id)?;
        let statement = self.statement_mut(id)?;
        let types = input_types(&statement.bindings, &statement.parameters);
        let values = statement.bindings.clone();
        statement.batch.push(BatchEntry::Parameters { values, types });
        Ok(())
    }

    pub(crate) fn clear_batch(&mut self, id: StatementId) -> Result<()> {
        self.check_statement_open(id)?;
        self.statement_mut(id)?.batch.clear();
        Ok(())
    }

    /// Take the queued entries; the batch is empty afterwards whatever happens.
    fn take_batch(&mut self, id: StatementId) -> Result<Vec<BatchEntry>> {
        self.check_statement_open(id)?;
        let statement = self.statement_mut(id)?;
        statement.warnings.clear();
        let batch = std::mem::take(&mut statement.batch);
        if batch.len() > MAX_BATCH_SIZE {
            return Err(Error::usage(
                UsageErrorKind::BatchTooLarge,
                format!(
                    "Batch of {} entries exceeds the limit of {MAX_BATCH_SIZE}",
                    batch.len()
                ),
            ));
        }
        Ok(batch)
    }

    /// Why a prepared statement's shape cannot run as a batch at all.
    fn prepared_batch_rejection(&self, id: StatementId) -> Result<Option<&'static str>> {
        let statement = self.statement(id)?;
        Ok(match statement.mode {
            Some(SqlMode::Query) => {
                Some("Statement that returns a result set is not allowed in a batch")
            }
            Some(SqlMode::Call) if statement.registered.iter().any(Option::is_some) => {
                Some("Procedure call with output parameters is not allowed in a batch")
            }
            _ => None,
        })
    }

    pub(crate) fn execute_batch(&mut self, id: StatementId) -> Result<Vec<i64>> {
        let batch = self.take_batch(id)?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let kind = self.statement(id)?.kind;
        let mut counts = vec![EXECUTE_FAILED; batch.len()];
        if kind != StatementKind::Plain {
            if let Some(reason) = self.prepared_batch_rejection(id)? {
                let errors = batch.iter().map(|_| invalid_entry(reason)).collect();
                return Err(batch_error(NON_ATOMIC_FAILURE, counts, errors));
            }
        }
        tracing::debug!(session = self.id, entries = batch.len(), ?kind, "Execute batch");

        let mut failures: Vec<Option<Error>> = batch.iter().map(|_| None).collect();
        let mut plan = BatchPlan::default();
        let outcome = match self.write_batch(id, &batch, &mut plan, &mut failures) {
            Ok(()) => self.read_batch(id, &mut plan, &mut counts, &mut failures),
            Err(e) => Err(e),
        };
        for section in plan.sections.drain(..) {
            self.sections.free_section(&section);
        }
        if let Ok(statement) = self.statement_mut(id) {
            statement.update_count = -1;
        }

        let mut errors: Vec<Error> = failures.into_iter().flatten().collect();
        match outcome {
            Ok(()) => {
                if let Err(e) = self.end_read_chain() {
                    errors.push(e);
                }
            }
            Err(e) if e.is_chain_breaking() => {
                tracing::warn!(session = self.id, error = %e, "Batch reply chain broken");
                if let Err(other) = self.end_read_chain() {
                    tracing::debug!(session = self.id, error = %other, "Error ending broken batch chain");
                }
                errors.push(e);
                errors.push(Error::protocol(ProtocolErrorKind::ChainBreaking, CHAIN_BROKEN));
                return Err(batch_error(CHAIN_BROKEN, counts, errors));
            }
            Err(e) => return Err(e),
        }
        if errors.is_empty() {
            Ok(counts)
        } else {
            Err(batch_error(NON_ATOMIC_FAILURE, counts, errors))
        }
    }

    fn write_batch(
        &mut self,
        id: StatementId,
        batch: &[BatchEntry],
        plan: &mut BatchPlan,
        failures: &mut [Option<Error>],
    ) -> Result<()> {
        self.begin_chain(ChainScope::InUnitOfWork)?;
        plan.close = self.write_close_result_sets(id, true)?;
        plan.timeout_sent = self.write_timeout(id)?;
        for (slot, entry) in batch.iter().enumerate() {
            let written = match entry {
                BatchEntry::Sql(text) => self.write_batch_sql(id, text, &mut plan.sections),
                BatchEntry::Parameters { values, types } => {
                    self.write_batch_parameters(id, values, types)
                }
            };
            match written {
                Ok(positioning) => plan.entries.push(EntryWrite::Sent { positioning }),
                Err(e) if e.is_chain_breaking() => return Err(e),
                Err(e) => {
                    tracing::debug!(session = self.id, slot, error = %e, "Batch entry rejected");
                    failures[slot] = Some(e);
                    plan.entries.push(EntryWrite::Skipped);
                }
            }
        }
        let any_sent = plan
            .entries
            .iter()
            .any(|e| matches!(e, EntryWrite::Sent { .. }));
        if any_sent && self.statement(id)?.auto_committable {
            plan.auto_commit = self.write_auto_commit()?;
        }
        self.flow(ChainScope::InUnitOfWork)
    }

    /// Stage one SQL string on its own section; `true` when a positioning
    /// fetch went out ahead of it.
    fn write_batch_sql(&mut self, id: StatementId, text: &str, sections: &mut Vec<Section>) -> Result<bool> {
        let text = sql::native_sql(text);
        let mode = sql::sql_mode(&text);
        match mode {
            SqlMode::Query => {
                return Err(invalid_entry(
                    "Statement that returns a result set is not allowed in a batch",
                ));
            }
            SqlMode::Call => {
                return Err(invalid_entry("Procedure calls are not allowed in a statement batch"));
            }
            SqlMode::Update(_) => {}
        }
        let positioned = if mode.may_be_positioned() {
            sql::extract_where_current_of(&text)
        } else {
            None
        };
        match positioned {
            Some(p) => {
                let section = self.positioned_update_section(&p.name, true)?;
                sections.push(section.clone());
                let positioning = self.write_positioning_fetch(&p.name)?.is_some();
                self.write(Request::ExecuteImmediate {
                    sql: positioned_sql(&p, &section),
                    section,
                })?;
                Ok(positioning)
            }
            None => {
                let holdability = self.statement(id)?.holdability();
                let section = self.sections.get_dynamic_section(holdability)?;
                sections.push(section.clone());
                self.write(Request::ExecuteImmediate { section, sql: text })?;
                Ok(false)
            }
        }
    }

    fn write_batch_parameters(
        &mut self,
        id: StatementId,
        values: &[Binding],
        types: &[SqlType],
    ) -> Result<bool> {
        let (section, mode, positioned, fetch_size) = {
            let statement = self.statement(id)?;
            (
                statement.section.clone().ok_or_else(statement_closed)?,
                statement.mode,
                statement.positioned_cursor.clone(),
                statement.effective_fetch_size(),
            )
        };
        let parameters = values.iter().map(Binding::to_value).collect();
        let positioning = match positioned.as_deref() {
            Some(name) => self.write_positioning_fetch(name)?.is_some(),
            None => false,
        };
        if mode == Some(SqlMode::Call) {
            self.write(Request::ExecuteCall {
                section,
                parameters,
                fetch_size,
                output_expected: false,
            })?;
        } else {
            self.write(Request::Execute {
                section,
                parameters,
                types: types.to_vec(),
            })?;
        }
        Ok(positioning)
    }

    /// Read the batch chain. An `Err` here means the reply stream broke.
    fn read_batch(
        &mut self,
        id: StatementId,
        plan: &mut BatchPlan,
        counts: &mut [i64],
        failures: &mut [Option<Error>],
    ) -> Result<()> {
        let close = std::mem::take(&mut plan.close);
        let close_committed = close.auto_commit.is_some();
        self.read_close_result_sets(id, close)?;
        if close_committed {
            self.complete_transaction_start();
        }
        self.mark_result_sets_closed(id);
        if plan.timeout_sent {
            self.read_reply(Some(id))?;
        }
        for (slot, entry) in plan.entries.iter().enumerate() {
            let EntryWrite::Sent { positioning } = *entry else {
                continue;
            };
            if positioning && self.read_reply(Some(id))?.is_error() {
                failures[slot] = self.take_last_error();
            }
            let reply = self.read_reply(Some(id))?;
            if reply.is_error() {
                let error = self.take_last_error();
                if failures[slot].is_none() {
                    failures[slot] = error;
                }
                continue;
            }
            if failures[slot].is_some() {
                continue;
            }
            counts[slot] = match reply.body {
                ReplyBody::UpdateCount(count) => count.max(0),
                ReplyBody::CallExecuted(call) if call.result_sets.is_empty() => {
                    call.update_count.max(0)
                }
                ReplyBody::CallExecuted(_) => {
                    failures[slot] = Some(invalid_entry(
                        "Procedure returned result sets inside a batch",
                    ));
                    EXECUTE_FAILED
                }
                _ => 0,
            };
        }
        if let Some(write) = plan.auto_commit {
            self.read_auto_commit(write)?;
        }
        Ok(())
    }
}

impl Statement {
    /// Queue SQL text for [`execute_batch`](Self::execute_batch).
    pub fn add_batch(&self, sql: &str) -> Result<()> {
        self.session.lock()?.add_batch_sql(self.id, sql)
    }

    pub fn clear_batch(&self) -> Result<()> {
        self.session.lock()?.clear_batch(self.id)
    }

    /// Run every queued entry in one exchange and return one update count
    /// per entry. Failures come back as [`Error::Batch`] carrying the counts.
    pub fn execute_batch(&self) -> Result<Vec<i64>> {
        self.session.lock()?.execute_batch(self.id)
    }
}

impl PreparedStatement {
    /// Queue the current parameter values as one batch entry.
    pub fn add_batch(&self) -> Result<()> {
        self.session.lock()?.add_batch_parameters(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Reply, RequestKind};
    use crate::scripted::ScriptedAgent;
    use crate::session::Session;
    use drda_core::{SessionConfig, Value};

    fn open() -> (Session, ScriptedAgent) {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        (session, wire)
    }

    fn batch(err: Error) -> BatchError {
        match err {
            Error::Batch(b) => b,
            other => panic!("expected a batch error, got {other}"),
        }
    }

    #[test]
    fn test_string_batch_single_commit() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        stmt.add_batch("INSERT INTO T VALUES (1)").unwrap();
        stmt.add_batch("CREATE TABLE U (A INT)").unwrap();
        stmt.add_batch("DELETE FROM T").unwrap();
        wire
            .push_reply(RequestKind::ExecuteImmediate, Reply::update_count(1))
            .push_reply(RequestKind::ExecuteImmediate, Reply::update_count(-1))
            .push_reply(RequestKind::ExecuteImmediate, Reply::update_count(4));
        wire.clear_history();

        assert_eq!(stmt.execute_batch().unwrap(), vec![1, 0, 4]);
        assert_eq!(wire.flow_count(), 1);
        assert_eq!(
            wire.last_chain().unwrap().kinds(),
            vec![
                RequestKind::ExecuteImmediate,
                RequestKind::ExecuteImmediate,
                RequestKind::ExecuteImmediate,
                RequestKind::Commit,
            ]
        );
        // the batch is consumed
        assert!(stmt.execute_batch().unwrap().is_empty());
    }

    #[test]
    fn test_query_entry_is_skipped() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        stmt.add_batch("INSERT INTO T VALUES (1)").unwrap();
        stmt.add_batch("SELECT * FROM T").unwrap();
        stmt.add_batch("INSERT INTO T VALUES (2)").unwrap();
        wire.clear_history();

        let err = batch(stmt.execute_batch().unwrap_err());
        assert_eq!(err.update_counts, vec![0, EXECUTE_FAILED, 0]);
        assert_eq!(err.errors.len(), 1);
        assert_eq!(
            err.errors[0].usage_kind(),
            Some(UsageErrorKind::InvalidBatchEntry)
        );
        assert!(!err.is_chain_broken());
        assert_eq!(wire.count(RequestKind::ExecuteImmediate), 2);
    }

    #[test]
    fn test_chain_break_keeps_sentinels() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        for i in 0..4 {
            stmt.add_batch(&format!("INSERT INTO T VALUES ({i})")).unwrap();
        }
        wire
            .push_reply(RequestKind::ExecuteImmediate, Reply::update_count(1))
            .push_reply(RequestKind::ExecuteImmediate, Reply::update_count(1))
            .break_chain_at(RequestKind::ExecuteImmediate);

        let err = batch(stmt.execute_batch().unwrap_err());
        assert_eq!(err.update_counts, vec![1, 1, EXECUTE_FAILED, EXECUTE_FAILED]);
        assert!(err.is_chain_broken());
        assert_eq!(err.errors.len(), 2);
        // no commit was read, the unit of work stays open
        assert!(session.in_unit_of_work().unwrap());
    }

    #[test]
    fn test_server_error_is_per_entry() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        stmt.add_batch("INSERT INTO T VALUES (1)").unwrap();
        stmt.add_batch("INSERT INTO T VALUES (1)").unwrap();
        wire
            .push_reply(RequestKind::ExecuteImmediate, Reply::update_count(1))
            .push_reply(
                RequestKind::ExecuteImmediate,
                Reply::error(-803, "23505", "duplicate key"),
            );

        let err = batch(stmt.execute_batch().unwrap_err());
        assert_eq!(err.update_counts, vec![1, EXECUTE_FAILED]);
        assert_eq!(err.errors[0].sqlstate(), Some("23505"));
    }

    #[test]
    fn test_prepared_batch_snapshots_rows() {
        let (session, wire) = open();
        let ps = session
            .prepare_statement("INSERT INTO T VALUES (?)")
            .unwrap();
        ps.set(1, "a").unwrap();
        ps.add_batch().unwrap();
        ps.set(1, "b").unwrap();
        ps.add_batch().unwrap();
        wire.clear_history();

        assert_eq!(ps.execute_batch().unwrap(), vec![0, 0]);
        let params: Vec<_> = wire
            .requests()
            .into_iter()
            .filter(|r| r.kind() == RequestKind::Execute)
            .map(|r| match r {
                Request::Execute { parameters, .. } => parameters,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            params,
            vec![vec!["a".into()], vec!["b".into()]]
        );
    }

    #[test]
    fn test_prepared_batch_carries_typed_nulls() {
        let (session, wire) = open();
        let ps = session
            .prepare_statement("INSERT INTO T VALUES (?)")
            .unwrap();
        ps.set_null(1, SqlType::Char).unwrap();
        ps.add_batch().unwrap();
        ps.set(1, "b").unwrap();
        ps.add_batch().unwrap();
        wire.clear_history();

        assert_eq!(ps.execute_batch().unwrap(), vec![0, 0]);
        let sent: Vec<_> = wire
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Execute {
                    parameters, types, ..
                } => Some((parameters, types)),
                _ => None,
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                (vec![Value::Null], vec![SqlType::Char]),
                (vec!["b".into()], vec![SqlType::VarChar]),
            ]
        );
    }

    #[test]
    fn test_full_batch_runs_in_one_chain() {
        let (session, wire) = open();
        let ps = session
            .prepare_statement("INSERT INTO T VALUES (?)")
            .unwrap();
        ps.set(1, "x").unwrap();
        for _ in 0..MAX_BATCH_SIZE {
            ps.add_batch().unwrap();
        }
        wire.clear_history();

        let counts = ps.execute_batch().unwrap();
        assert_eq!(counts.len(), MAX_BATCH_SIZE);
        assert!(counts.iter().all(|c| *c == 0));
        assert_eq!(wire.flow_count(), 1);
        assert_eq!(wire.count(RequestKind::Execute), MAX_BATCH_SIZE);
        assert_eq!(wire.count(RequestKind::Commit), 1);
    }

    #[test]
    fn test_oversized_batch_is_rejected_without_io() {
        let (session, wire) = open();
        let ps = session
            .prepare_statement("INSERT INTO T VALUES (?)")
            .unwrap();
        ps.set(1, "x").unwrap();
        for _ in 0..=MAX_BATCH_SIZE {
            ps.add_batch().unwrap();
        }
        wire.clear_history();

        assert_eq!(
            ps.execute_batch().unwrap_err().usage_kind(),
            Some(UsageErrorKind::BatchTooLarge)
        );
        assert_eq!(wire.flow_count(), 0);
        // the oversized batch was dropped
        assert!(ps.execute_batch().unwrap().is_empty());
    }

    #[test]
    fn test_write_error_substitutes_batch_commit() {
        let (session, wire) = open();
        let ps = session
            .prepare_statement("INSERT INTO T VALUES (?)")
            .unwrap();
        ps.set(1, "x").unwrap();
        ps.add_batch().unwrap();
        ps.add_batch().unwrap();
        wire.clear_history();
        wire.reject_write(
            RequestKind::Execute,
            Error::server(-302, "22001", "value too long"),
        );

        let err = batch(ps.execute_batch().unwrap_err());
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].sqlstate(), Some("22001"));
        assert_eq!(
            wire.last_chain().unwrap().kinds(),
            vec![
                RequestKind::Execute,
                RequestKind::Execute,
                RequestKind::CommitSubstitute,
            ]
        );
        assert!(session.in_unit_of_work().unwrap());
    }

    #[test]
    fn test_prepared_query_batch_fails_without_io() {
        let (session, wire) = open();
        let ps = session
            .prepare_statement("SELECT * FROM T WHERE A = ?")
            .unwrap();
        ps.set(1, "x").unwrap();
        ps.add_batch().unwrap();
        wire.clear_history();

        let err = batch(ps.execute_batch().unwrap_err());
        assert_eq!(err.update_counts, vec![EXECUTE_FAILED]);
        assert_eq!(wire.flow_count(), 0);
        assert!(ps.add_batch().is_ok());
    }

    #[test]
    fn test_prepared_add_batch_requires_parameters() {
        let (session, _wire) = open();
        let ps = session
            .prepare_statement("INSERT INTO T VALUES (?)")
            .unwrap();
        assert_eq!(
            ps.add_batch().unwrap_err().usage_kind(),
            Some(UsageErrorKind::MissingParameter)
        );
        let statement: &Statement = &ps;
        assert_eq!(
            statement.add_batch("DELETE FROM T").unwrap_err().usage_kind(),
            Some(UsageErrorKind::NotSupported)
        );
    }
}
