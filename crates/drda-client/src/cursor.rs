//! Cursors opened by statement execution and the [`ResultSet`] handle.
//!
//! A cursor tracks two independent flags: `open_on_client` (the caller may
//! still read it) and `open_on_server` (a close request is still owed).
//! Rows arrive in blocks; the first block rides on the open reply and later
//! blocks are fetched in their own chains.

use crate::agent::{ChainScope, QueryReply, ReplyBody, Request};
use crate::registry::{CursorId, Listener, StatementId};
use crate::section::Section;
use crate::session::{Session, SessionCore};
use crate::statement::ExecuteMethod;
use drda_core::{
    ColumnInfo, Concurrency, Error, Holdability, Result, ResultSetType, Row, UsageErrorKind,
    Value, Warning,
};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
pub struct CursorState {
    pub(crate) statement: StatementId,
    pub(crate) section: Section,
    /// Section allocated for this cursor alone (procedure result sets)
    pub(crate) owns_section: bool,
    pub(crate) columns: Arc<ColumnInfo>,
    pub(crate) buffered: VecDeque<Vec<Value>>,
    pub(crate) end_of_data: bool,
    pub(crate) open_on_client: bool,
    pub(crate) open_on_server: bool,
    /// An auto-commit already fired on this cursor's behalf
    pub(crate) auto_committed: bool,
    pub(crate) result_set_type: ResultSetType,
    pub(crate) concurrency: Concurrency,
    pub(crate) holdability: Holdability,
    pub(crate) fetch_size: u32,
    pub(crate) rowset: bool,
    pub(crate) cursor_name: Option<String>,
    pub(crate) warnings: Vec<Warning>,
    pub(crate) rows_read: u64,
    pub(crate) max_rows: u64,
}

fn result_set_closed() -> Error {
    Error::usage(UsageErrorKind::ResultSetClosed, "ResultSet not open")
}

impl SessionCore {
    /// Register a cursor for `statement` from an open-query reply.
    pub(crate) fn open_cursor(
        &mut self,
        statement: StatementId,
        section: Section,
        owns_section: bool,
        query: QueryReply,
    ) -> Result<CursorId> {
        let implicit_close = self.capabilities.query_close_implicit;
        let state = {
            let owner = self.statement(statement)?;
            let columns = if query.columns.is_empty() {
                owner.columns.clone()
            } else {
                query.columns
            };
            let result_set_type = owner.options.result_set_type;
            let server_closed =
                implicit_close && query.end_of_data && !result_set_type.is_scrollable();
            CursorState {
                statement,
                section,
                owns_section,
                columns: Arc::new(ColumnInfo::new(columns)),
                buffered: query.rows.into(),
                end_of_data: query.end_of_data,
                open_on_client: true,
                open_on_server: !server_closed,
                auto_committed: false,
                result_set_type,
                concurrency: owner.options.concurrency,
                holdability: query.holdability.unwrap_or(owner.options.holdability),
                fetch_size: owner.effective_fetch_size(),
                rowset: query.rowset,
                cursor_name: None,
                warnings: Vec::new(),
                rows_read: 0,
                max_rows: owner.max_rows,
            }
        };
        let id = CursorId(self.cursors.insert(state));
        self.add_listener(Listener::Cursor(id));
        tracing::trace!(session = self.id, "Cursor opened");
        Ok(id)
    }

    pub(crate) fn cursor(&self, id: CursorId) -> Result<&CursorState> {
        self.cursors
            .get(id.0)
            .filter(|c| c.open_on_client)
            .ok_or_else(result_set_closed)
    }

    /// Close locally; idempotent. Name mappings and an owned section go too.
    pub(crate) fn mark_cursor_closed(&mut self, id: CursorId, remove_listener: bool) {
        let Some(cursor) = self.cursors.get_mut(id.0) else {
            return;
        };
        if !cursor.open_on_client {
            return;
        }
        cursor.open_on_client = false;
        cursor.open_on_server = false;
        cursor.buffered.clear();
        let statement = cursor.statement;
        let name = cursor.cursor_name.take();
        let owned = cursor.owns_section.then(|| cursor.section.clone());
        let server_name = cursor.section.server_cursor_name();

        if let Some(name) = name.as_deref() {
            self.sections
                .remove_cursor_name_to_result_set_mapping(Some(name), Some(&server_name));
            self.sections
                .remove_cursor_name_to_query_section_mapping(Some(name), Some(&server_name));
            if self.client_cursor_names.get(name) == Some(&statement) {
                self.client_cursor_names.remove(name);
            }
        }
        if let Some(section) = owned {
            self.sections.free_section(&section);
        }
        if remove_listener {
            self.remove_listener(Listener::Cursor(id));
        }
    }

    fn other_cursor_open(&self, id: CursorId, statement: StatementId) -> bool {
        self.statements.get(statement.0).is_some_and(|s| {
            s.result_sets
                .iter()
                .any(|c| *c != id && self.cursor_is_open(*c))
        })
    }

    /// Explicit close: flows the server close when owed, piggy-backing the
    /// auto-commit when this was the statement's last open cursor.
    pub(crate) fn close_cursor(&mut self, id: CursorId) -> Result<()> {
        let Some((statement, open_on_server, auto_committed, section)) = self
            .cursors
            .get(id.0)
            .filter(|c| c.open_on_client)
            .map(|c| (c.statement, c.open_on_server, c.auto_committed, c.section.clone()))
        else {
            return Ok(());
        };
        let commit_owed = !auto_committed
            && !self.other_cursor_open(id, statement)
            && self
                .statements
                .get(statement.0)
                .is_some_and(|s| s.auto_committable);

        let result = if open_on_server {
            self.flow_close_cursor(id, statement, section, commit_owed)
        } else {
            self.mark_cursor_closed(id, true);
            if commit_owed {
                self.flow_auto_commit()
            } else {
                Ok(())
            }
        };
        if let Some(cursor) = self.cursors.get_mut(id.0) {
            cursor.auto_committed = true;
        }
        tracing::debug!(session = self.id, "Result set closed");
        result?;
        self.cursor_closed_by_caller(statement)
    }

    fn flow_close_cursor(
        &mut self,
        id: CursorId,
        statement: StatementId,
        section: Section,
        commit_owed: bool,
    ) -> Result<()> {
        self.begin_chain(ChainScope::InUnitOfWork)?;
        self.write(Request::CloseCursor { section })?;
        let auto_commit = if commit_owed {
            self.write_auto_commit()?
        } else {
            None
        };
        self.flow(ChainScope::InUnitOfWork)?;
        self.read_reply(Some(statement))?;
        self.mark_cursor_closed(id, true);
        if let Some(write) = auto_commit {
            self.read_auto_commit(write)?;
        }
        self.end_read_chain()
    }

    /// Statement-side follow-up once a caller closed one of its cursors.
    fn cursor_closed_by_caller(&mut self, statement: StatementId) -> Result<()> {
        let Some(state) = self.statements.get(statement.0) else {
            return Ok(());
        };
        let any_open = state.result_sets.iter().any(|c| self.cursor_is_open(*c));
        if any_open {
            return Ok(());
        }
        if state.orphaned {
            self.discard_statement(statement);
            Ok(())
        } else if state.close_on_completion && state.open {
            self.close_statement(statement)
        } else {
            Ok(())
        }
    }

    /// Next row, fetching another block when the buffer runs dry.
    pub(crate) fn fetch_next(&mut self, id: CursorId) -> Result<Option<Row>> {
        self.check_open()?;
        let (statement, limit_hit, need_fetch) = {
            let cursor = self.cursor(id)?;
            (
                cursor.statement,
                cursor.max_rows != 0 && cursor.rows_read >= cursor.max_rows,
                cursor.buffered.is_empty() && !cursor.end_of_data && cursor.open_on_server,
            )
        };
        if limit_hit {
            return Ok(None);
        }
        if need_fetch {
            self.flow_fetch(id, statement)?;
        }
        let implicit_close = self.capabilities.query_close_implicit;
        let Some(cursor) = self.cursors.get_mut(id.0) else {
            return Err(result_set_closed());
        };
        match cursor.buffered.pop_front() {
            Some(values) => {
                cursor.rows_read += 1;
                Ok(Some(Row::with_columns(Arc::clone(&cursor.columns), values)))
            }
            None => {
                if implicit_close && !cursor.result_set_type.is_scrollable() {
                    cursor.open_on_server = false;
                }
                let commit_owed = !cursor.auto_committed && !cursor.result_set_type.is_scrollable();
                if commit_owed
                    && !self.other_cursor_open(id, statement)
                    && self
                        .statements
                        .get(statement.0)
                        .is_some_and(|s| s.auto_committable)
                {
                    if let Some(cursor) = self.cursors.get_mut(id.0) {
                        cursor.auto_committed = true;
                    }
                    self.flow_auto_commit()?;
                }
                Ok(None)
            }
        }
    }

    fn flow_fetch(&mut self, id: CursorId, statement: StatementId) -> Result<()> {
        let (section, fetch_size) = {
            let cursor = self.cursor(id)?;
            (cursor.section.clone(), cursor.fetch_size)
        };
        self.begin_chain(ChainScope::InUnitOfWork)?;
        self.write(Request::Fetch {
            section,
            fetch_size,
        })?;
        self.flow(ChainScope::InUnitOfWork)?;
        let reply = self.read_reply(Some(statement))?;
        if let ReplyBody::Rows { rows, end_of_data } = reply.body {
            if let Some(cursor) = self.cursors.get_mut(id.0) {
                cursor.buffered.extend(rows);
                cursor.end_of_data = end_of_data;
            }
        } else if !reply.is_error() {
            if let Some(cursor) = self.cursors.get_mut(id.0) {
                cursor.end_of_data = true;
            }
        }
        self.end_read_chain()
    }

    /// Run a prepared single-value query and close its cursor.
    pub(crate) fn query_single_value(&mut self, statement: StatementId) -> Result<Option<Value>> {
        self.execute_prepared(statement, ExecuteMethod::Query)?;
        let Some(cursor) = self.statement(statement)?.current else {
            return Ok(None);
        };
        let row = self.fetch_next(cursor)?;
        self.close_cursor(cursor)?;
        Ok(row.and_then(|r| r.get(0).cloned()))
    }

    /// Handle dropped: forget an orphaned statement once nothing can read it.
    fn release_cursor(&mut self, id: CursorId) {
        let Some(statement) = self.cursors.get(id.0).map(|c| c.statement) else {
            return;
        };
        let orphaned = self
            .statements
            .get(statement.0)
            .is_some_and(|s| s.orphaned);
        if orphaned {
            self.mark_statement_closed(statement);
            self.statements.remove(statement.0);
        }
    }
}

/// A cursor handle. Rows are read with [`ResultSet::next`].
#[derive(Debug)]
pub struct ResultSet {
    session: Session,
    id: CursorId,
}

impl ResultSet {
    pub(crate) fn new(session: Session, id: CursorId) -> Self {
        Self { session, id }
    }

    /// The next row, or `None` past the last row.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Row>> {
        self.session.lock()?.fetch_next(self.id)
    }

    /// Read every remaining row.
    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn close(&self) -> Result<()> {
        self.session.lock()?.close_cursor(self.id)
    }

    pub fn is_closed(&self) -> bool {
        self.session
            .lock()
            .map_or(true, |core| !core.cursor_is_open(self.id))
    }

    pub fn columns(&self) -> Result<Arc<ColumnInfo>> {
        self.with_cursor(|c| Arc::clone(&c.columns))
    }

    pub fn result_set_type(&self) -> Result<ResultSetType> {
        self.with_cursor(|c| c.result_set_type)
    }

    pub fn concurrency(&self) -> Result<Concurrency> {
        self.with_cursor(|c| c.concurrency)
    }

    pub fn holdability(&self) -> Result<Holdability> {
        self.with_cursor(|c| c.holdability)
    }

    /// Client-assigned name, or the server name of the cursor's section.
    pub fn cursor_name(&self) -> Result<Option<String>> {
        self.with_cursor(|c| c.cursor_name.clone())
    }

    pub fn warnings(&self) -> Result<Vec<Warning>> {
        self.with_cursor(|c| c.warnings.clone())
    }

    fn with_cursor<T>(&self, read: impl FnOnce(&CursorState) -> T) -> Result<T> {
        let core = self.session.lock()?;
        Ok(read(core.cursor(self.id)?))
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        if let Ok(mut core) = self.session.lock() {
            core.release_cursor(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Reply, RequestKind};
    use crate::scripted::ScriptedAgent;
    use drda_core::{ColumnDescriptor, SessionConfig, SqlType};

    fn rows(values: &[i32]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![Value::Int(*v)]).collect()
    }

    fn columns() -> Vec<ColumnDescriptor> {
        vec![ColumnDescriptor::new("ID", SqlType::Integer)]
    }

    #[test]
    fn test_fetches_further_blocks_until_end() {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        session.set_auto_commit(false).unwrap();
        wire.push_reply(
            RequestKind::OpenQuery,
            Reply::query(QueryReply::new(columns(), rows(&[1, 2])).partial()),
        );
        wire.push_reply(RequestKind::Fetch, Reply::rows(rows(&[3]), true));

        let stmt = session.create_statement().unwrap();
        let mut rs = stmt.execute_query("SELECT ID FROM T").unwrap();
        let ids: Vec<i64> = rs
            .fetch_all()
            .unwrap()
            .iter()
            .map(|r| r.get(0).and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(wire.count(RequestKind::Fetch), 1);
        assert_eq!(rs.columns().unwrap().index_of("ID"), Some(0));
    }

    #[test]
    fn test_max_rows_caps_reads() {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        session.set_auto_commit(false).unwrap();
        wire.push_reply(
            RequestKind::OpenQuery,
            Reply::query(QueryReply::new(columns(), rows(&[1, 2, 3]))),
        );
        let stmt = session.create_statement().unwrap();
        stmt.set_max_rows(2).unwrap();
        let mut rs = stmt.execute_query("SELECT ID FROM T").unwrap();
        assert_eq!(rs.fetch_all().unwrap().len(), 2);
    }

    #[test]
    fn test_close_piggybacks_auto_commit() {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        wire.push_reply(
            RequestKind::OpenQuery,
            Reply::query(QueryReply::new(columns(), rows(&[1])).partial()),
        );
        let stmt = session.create_statement().unwrap();
        let rs = stmt.execute_query("SELECT ID FROM T").unwrap();
        rs.close().unwrap();
        assert!(rs.is_closed());
        assert_eq!(
            wire.last_chain().unwrap().kinds(),
            vec![RequestKind::CloseCursor, RequestKind::Commit]
        );
        assert!(!session.in_unit_of_work().unwrap());
        rs.close().unwrap();
        assert_eq!(
            rs.holdability().unwrap_err().usage_kind(),
            Some(UsageErrorKind::ResultSetClosed)
        );
    }
}
