//! The session state machine.
//!
//! A [`Session`] is a cheap handle around one mutex-guarded [`SessionCore`].
//! Every public operation takes the lock for its whole classify, write,
//! flow, read, update-state sequence, so requests on one session are
//! strictly ordered and replies are consumed in the order written.
//!
//! States:
//!
//! - open
//! - logically closed, kept for pooled reuse (`close_for_reuse`)
//! - physically closed, channel released (`close`)

use crate::agent::{Agent, ChainScope, Piggyback, Reply, Request};
use crate::callable::CallableStatement;
use crate::flavor::{TransactionFlavor, flavor_for};
use crate::metadata::{DatabaseMetadata, MetadataCache, ServerCapabilities};
use crate::prepared::PreparedStatement;
use crate::registry::{CursorId, Listener, Registry, StatementId};
use crate::section::SectionManager;
use crate::sql;
use crate::statement::{ExecuteMethod, Statement, StatementKind, StatementState};
use crate::cursor::CursorState;
use drda_core::{
    ConnectionError, ConnectionErrorKind, CursorOptions, Error, Holdability, IsolationLevel,
    Result, ResultSetType, SessionConfig, TransactionErrorKind, Value,
    Warning, XaState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Runs the deferred part of [`Session::abort`].
pub trait Executor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

impl<F> Executor for F
where
    F: Fn(Box<dyn FnOnce() + Send + 'static>),
{
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self(task);
    }
}

/// How a pending auto-commit was written into the current chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AutoCommitWrite {
    Commit,
    Substitute,
}

/// All mutable state of one session.
pub struct SessionCore {
    pub(crate) id: u64,
    pub(crate) config: SessionConfig,
    agent: Box<dyn Agent>,
    flavor: Box<dyn TransactionFlavor>,
    pub(crate) sections: SectionManager,
    pub(crate) capabilities: ServerCapabilities,
    pub(crate) metadata: MetadataCache,

    open: bool,
    available_for_reuse: bool,
    aborting: bool,
    pub(crate) auto_commit: bool,
    in_unit_of_work: bool,
    isolation: IsolationLevel,
    default_isolation: IsolationLevel,
    schema: Option<String>,
    pub(crate) holdability: Holdability,
    transaction_id: u64,
    pub(crate) xa_state: XaState,
    read_only: bool,

    pub(crate) statements: Registry<StatementState>,
    pub(crate) cursors: Registry<CursorState>,
    listeners: Vec<Listener>,
    /// Every listener notification, in order
    #[cfg(test)]
    notified: Vec<Listener>,
    /// Client cursor names held by open result sets, with the owning statement
    pub(crate) client_cursor_names: HashMap<String, StatementId>,
    isolation_statements: HashMap<IsolationLevel, StatementId>,
    get_isolation_statement: Option<StatementId>,
    schema_statement: Option<StatementId>,
    pub(crate) savepoint_counter: u32,

    pub(crate) warnings: Vec<Warning>,
    pending: Vec<Error>,
    chain_writes: usize,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("id", &self.id)
            .field("server", &self.config.server_address())
            .field("flavor", &self.flavor.name())
            .field("open", &self.open)
            .field("auto_commit", &self.auto_commit)
            .field("in_unit_of_work", &self.in_unit_of_work)
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

impl SessionCore {
    fn new(config: SessionConfig, agent: Box<dyn Agent>) -> Self {
        let flavor = flavor_for(&config);
        let capabilities = ServerCapabilities::from_product_level(&config.product_level);
        let holdability = config.default_holdability;
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            agent,
            flavor,
            sections: SectionManager::new(),
            capabilities,
            metadata: MetadataCache::default(),
            open: true,
            available_for_reuse: false,
            aborting: false,
            auto_commit: true,
            in_unit_of_work: false,
            isolation: IsolationLevel::Unknown,
            default_isolation: IsolationLevel::default(),
            schema: None,
            holdability,
            transaction_id: 0,
            xa_state: XaState::NotAssociated,
            read_only: false,
            statements: Registry::new(),
            cursors: Registry::new(),
            listeners: Vec::new(),
            #[cfg(test)]
            notified: Vec::new(),
            client_cursor_names: HashMap::new(),
            isolation_statements: HashMap::new(),
            get_isolation_statement: None,
            schema_statement: None,
            savepoint_counter: 0,
            warnings: Vec::new(),
            pending: Vec::new(),
            chain_writes: 0,
        }
    }

    // ==================== State checks ====================

    /// Surface deferred transport errors, then fail if the session is closed.
    pub(crate) fn check_open(&mut self) -> Result<()> {
        self.agent.check_for_deferred_exceptions()?;
        if self.open {
            Ok(())
        } else {
            Err(Error::connection_closed())
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_physically_closed(&self) -> bool {
        !self.open && !self.available_for_reuse
    }

    pub fn in_unit_of_work(&self) -> bool {
        self.in_unit_of_work
    }

    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    pub(crate) fn is_xa_associated(&self) -> bool {
        self.xa_state == XaState::Associated
    }

    /// An open unit of work blocks close unless the flavor allows it.
    pub(crate) fn transaction_in_progress(&self) -> bool {
        self.in_unit_of_work
            && !self.flavor.allow_close_in_unit_of_work(
                self.xa_state,
                self.config.allow_close_in_unit_of_work,
            )
    }

    pub(crate) fn check_for_transaction_in_progress(&self) -> Result<()> {
        if self.transaction_in_progress() {
            return Err(Error::transaction(
                TransactionErrorKind::ActiveUnitOfWork,
                "Cannot close a session while a transaction is still active",
            ));
        }
        Ok(())
    }

    // ==================== Chain plumbing ====================

    pub(crate) fn begin_chain(&mut self, scope: ChainScope) -> Result<()> {
        self.chain_writes = 0;
        self.pending.clear();
        tracing::debug!(session = self.id, ?scope, "Begin write chain");
        self.agent
            .begin_write_chain(scope)
            .map_err(|e| self.chain_error(e))
    }

    /// Stage a request. Non-breaking write errors are kept for `end_read_chain`.
    pub(crate) fn write(&mut self, request: Request) -> Result<()> {
        tracing::trace!(session = self.id, request = ?request.kind(), "Write request");
        self.chain_writes += 1;
        match self.agent.write(request) {
            Ok(()) => Ok(()),
            Err(e) if e.is_chain_breaking() => Err(self.chain_error(e)),
            Err(e) => {
                self.pending.push(e);
                Ok(())
            }
        }
    }

    /// Whether the current chain has already collected an error.
    pub(crate) fn chain_has_errors(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flow the chain. A unit-of-work flow marks the unit of work started.
    pub(crate) fn flow(&mut self, scope: ChainScope) -> Result<()> {
        if self.chain_writes == 0 {
            return Ok(());
        }
        tracing::debug!(session = self.id, requests = self.chain_writes, "Flow chain");
        self.agent.flow(scope).map_err(|e| self.chain_error(e))?;
        if scope == ChainScope::InUnitOfWork {
            self.complete_transaction_start();
        }
        Ok(())
    }

    /// Read the next reply, applying piggy-backed state and routing its status.
    ///
    /// Negative sqlcodes are kept for `end_read_chain`; warnings go to `owner`
    /// or, without one, to the session.
    pub(crate) fn read_reply(&mut self, owner: Option<StatementId>) -> Result<Reply> {
        let reply = self.agent.read().map_err(|e| self.chain_error(e))?;
        for piggyback in &reply.piggyback {
            match piggyback {
                Piggyback::Isolation(code) => {
                    self.complete_piggyback_isolation(IsolationLevel::from_server_code(code));
                }
                Piggyback::Schema(schema) => self.complete_piggyback_schema(schema),
            }
        }
        if let Some(sqlca) = &reply.sqlca {
            if sqlca.sqlcode < 0 {
                self.pending.push(Error::server(
                    sqlca.sqlcode,
                    sqlca.sqlstate.clone(),
                    sqlca.message.clone(),
                ));
            } else if Warning::is_reportable(sqlca.sqlcode) {
                let warning = Warning::new(sqlca.sqlcode, sqlca.sqlstate.clone(), sqlca.message.clone());
                match owner.and_then(|id| self.statements.get_mut(id.0)) {
                    Some(statement) => statement.warnings.push(warning),
                    None => self.warnings.push(warning),
                }
            }
        }
        Ok(reply)
    }

    /// Take the error a failed reply just added, for callers that collect errors per entry.
    pub(crate) fn take_last_error(&mut self) -> Option<Error> {
        self.pending.pop()
    }

    /// Finish the chain; the first accumulated error is returned, later ones are logged.
    pub(crate) fn end_read_chain(&mut self) -> Result<()> {
        let ended = self.agent.end_read_chain();
        let mut pending = std::mem::take(&mut self.pending).into_iter();
        if let Some(first) = pending.next() {
            for other in pending {
                tracing::debug!(session = self.id, error = %other, "Additional error in reply chain");
            }
            return Err(first);
        }
        ended
    }

    fn chain_error(&mut self, error: Error) -> Error {
        for dropped in self.pending.drain(..) {
            tracing::debug!(error = %dropped, "Discarding error from broken chain");
        }
        if error.is_connection_error() {
            self.complete_chain_breaking_disconnect();
        }
        error
    }

    // ==================== Unit of work ====================

    pub(crate) fn complete_transaction_start(&mut self) {
        self.in_unit_of_work = true;
    }

    /// Notify listeners of a commit, then end the unit of work.
    pub(crate) fn complete_local_commit(&mut self) {
        let listeners = std::mem::take(&mut self.listeners);
        for listener in listeners {
            #[cfg(test)]
            self.notified.push(listener);
            match listener {
                Listener::Cursor(id) => {
                    let keep = match self.cursors.get_mut(id.0) {
                        Some(cursor) => {
                            cursor.auto_committed = true;
                            cursor.holdability.is_hold() && cursor.open_on_client
                        }
                        None => continue,
                    };
                    if keep {
                        self.listeners.push(listener);
                    } else {
                        self.mark_cursor_closed(id, false);
                    }
                }
                Listener::Statement(id) => self.statement_unit_of_work_ended(id),
            }
        }
        self.in_unit_of_work = false;
        self.transaction_id += 1;
        tracing::debug!(session = self.id, transaction_id = self.transaction_id, "Local commit complete");
    }

    /// Notify listeners of a rollback; every cursor closes.
    pub(crate) fn complete_local_rollback(&mut self) {
        let listeners = std::mem::take(&mut self.listeners);
        for listener in listeners {
            #[cfg(test)]
            self.notified.push(listener);
            match listener {
                Listener::Cursor(id) => {
                    if let Some(cursor) = self.cursors.get_mut(id.0) {
                        cursor.auto_committed = true;
                        self.mark_cursor_closed(id, false);
                    }
                }
                Listener::Statement(id) => self.statement_unit_of_work_ended(id),
            }
        }
        self.in_unit_of_work = false;
        self.transaction_id += 1;
        tracing::debug!(session = self.id, transaction_id = self.transaction_id, "Local rollback complete");
    }

    fn statement_unit_of_work_ended(&mut self, id: StatementId) {
        if let Some(statement) = self.statements.get_mut(id.0) {
            if statement.section.is_some() {
                statement.open_on_server = false;
            }
            statement.listening = false;
        }
    }

    pub(crate) fn add_listener(&mut self, listener: Listener) {
        if !self.listeners.contains(&listener) {
            self.listeners.push(listener);
        }
    }

    pub(crate) fn remove_listener(&mut self, listener: Listener) {
        self.listeners.retain(|l| *l != listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn will_auto_commit_generate_flow(&self) -> bool {
        self.auto_commit && self.flavor.allow_local_commit_rollback(self.xa_state)
    }

    /// Stage an auto-commit into the current chain, if one would flow.
    pub(crate) fn write_auto_commit(&mut self) -> Result<Option<AutoCommitWrite>> {
        if !self.will_auto_commit_generate_flow() {
            return Ok(None);
        }
        if self.chain_has_errors() {
            self.write(Request::CommitSubstitute)?;
            Ok(Some(AutoCommitWrite::Substitute))
        } else {
            let request = self.flavor.commit_request();
            self.write(request)?;
            Ok(Some(AutoCommitWrite::Commit))
        }
    }

    /// A substitute only keeps the reply count aligned; the unit of work stays open.
    pub(crate) fn read_auto_commit(&mut self, write: AutoCommitWrite) -> Result<()> {
        let reply = self.read_reply(None)?;
        match write {
            AutoCommitWrite::Commit if !reply.is_error() => {
                tracing::trace!(session = self.id, "Auto-commit acknowledged");
                self.complete_local_commit();
            }
            AutoCommitWrite::Commit => {}
            AutoCommitWrite::Substitute => {
                tracing::debug!(session = self.id, "Auto-commit withheld after a write error");
            }
        }
        Ok(())
    }

    /// Commit on the session's behalf when auto-commit is on.
    pub(crate) fn flow_auto_commit(&mut self) -> Result<()> {
        if self.will_auto_commit_generate_flow() {
            self.flow_commit_request()?;
        }
        Ok(())
    }

    fn flow_commit_request(&mut self) -> Result<()> {
        let scope = self.flavor.chain_scope();
        self.begin_chain(scope)?;
        let request = self.flavor.commit_request();
        self.write(request)?;
        self.flow(scope)?;
        let reply = self.read_reply(None)?;
        if !reply.is_error() {
            self.complete_local_commit();
        }
        self.end_read_chain()
    }

    /// Commit if a unit of work is open.
    pub(crate) fn flow_commit(&mut self) -> Result<()> {
        if !self.in_unit_of_work {
            return Ok(());
        }
        tracing::debug!(session = self.id, flavor = self.flavor.name(), "Commit");
        self.flow_commit_request()
    }

    /// Roll back; always flows.
    pub(crate) fn flow_rollback(&mut self) -> Result<()> {
        tracing::debug!(session = self.id, flavor = self.flavor.name(), "Rollback");
        let scope = self.flavor.chain_scope();
        self.begin_chain(scope)?;
        let request = self.flavor.rollback_request();
        self.write(request)?;
        self.flow(scope)?;
        let reply = self.read_reply(None)?;
        if !reply.is_error() {
            self.complete_local_rollback();
        }
        self.end_read_chain()
    }

    fn check_local_commit_allowed(&self) -> Result<()> {
        if self.flavor.allow_local_commit_rollback(self.xa_state) {
            Ok(())
        } else {
            Err(Error::transaction(
                TransactionErrorKind::LocalCommitUnderXa,
                "Cannot commit or roll back locally while associated with a global transaction",
            ))
        }
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_local_commit_allowed()?;
        self.flow_commit()
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_local_commit_allowed()?;
        self.flow_rollback()
    }

    pub(crate) fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.check_open()?;
        if self.flavor.allow_local_commit_rollback(self.xa_state) {
            if enabled == self.auto_commit {
                return Ok(());
            }
            if self.in_unit_of_work {
                self.flow_commit()?;
            }
        } else if enabled {
            return Err(Error::transaction(
                TransactionErrorKind::AutoCommitUnderXa,
                "Cannot enable auto-commit while associated with a global transaction",
            ));
        }
        self.auto_commit = enabled;
        tracing::debug!(session = self.id, auto_commit = enabled, "Auto-commit changed");
        Ok(())
    }

    pub(crate) fn auto_commit(&mut self) -> Result<bool> {
        self.check_open()?;
        Ok(!self.is_xa_associated() && self.auto_commit)
    }

    pub(crate) fn set_xa_state(&mut self, state: XaState) {
        if state != self.xa_state {
            tracing::debug!(session = self.id, ?state, "XA association changed");
            self.xa_state = state;
            self.isolation = IsolationLevel::Unknown;
        }
    }

    // ==================== Piggy-backed state ====================

    pub(crate) fn complete_piggyback_isolation(&mut self, level: IsolationLevel) {
        if self.capabilities.session_data_caching {
            self.isolation = level;
        }
    }

    pub(crate) fn complete_initial_piggyback_isolation(&mut self, level: IsolationLevel) {
        self.default_isolation = level;
        self.isolation = level;
    }

    pub(crate) fn complete_piggyback_schema(&mut self, schema: &str) {
        if self.capabilities.session_data_caching {
            self.schema = Some(schema.to_string());
        }
    }

    pub(crate) fn complete_initial_piggyback_schema(&mut self, schema: &str) {
        self.schema = Some(schema.to_string());
    }

    // ==================== Isolation ====================

    pub(crate) fn isolation(&mut self) -> Result<IsolationLevel> {
        self.check_open()?;
        if self.isolation != IsolationLevel::Unknown {
            return Ok(self.isolation);
        }
        let saved_auto_commit = self.auto_commit;
        let saved_unit_of_work = self.in_unit_of_work;
        self.auto_commit = false;
        let fetched = self.query_current_isolation();
        self.in_unit_of_work = saved_unit_of_work;
        self.auto_commit = saved_auto_commit;
        let level = fetched?;
        if self.capabilities.session_data_caching {
            self.isolation = level;
        }
        Ok(level)
    }

    fn query_current_isolation(&mut self) -> Result<IsolationLevel> {
        let id = match self.get_isolation_statement.filter(|id| self.statement_is_open(*id)) {
            Some(id) => id,
            None => {
                let options = CursorOptions::with_holdability(self.holdability);
                let id = self.prepare_internal("VALUES CURRENT ISOLATION", options)?;
                self.get_isolation_statement = Some(id);
                id
            }
        };
        let value = self.query_single_value(id)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .map_or(IsolationLevel::None, IsolationLevel::from_server_code))
    }

    pub(crate) fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        let Some(code) = level.server_code() else {
            return Err(Error::transaction(
                TransactionErrorKind::UnsupportedIsolation,
                format!("Isolation level {} is not supported", level.as_sql()),
            ));
        };
        if level == self.isolation()? {
            return Ok(());
        }
        let id = match self
            .isolation_statements
            .get(&level)
            .copied()
            .filter(|id| self.statement_is_open(*id))
        {
            Some(id) => id,
            None => {
                let options = CursorOptions::with_holdability(self.holdability);
                let id =
                    self.prepare_internal(&format!("SET CURRENT ISOLATION = {code}"), options)?;
                self.isolation_statements.insert(level, id);
                id
            }
        };
        self.execute_prepared(id, ExecuteMethod::Update)?;
        // SET ISOLATION commits on the server.
        self.complete_local_commit();
        self.isolation = if self.capabilities.session_data_caching {
            level
        } else {
            IsolationLevel::Unknown
        };
        tracing::debug!(session = self.id, isolation = level.as_sql(), "Isolation changed");
        Ok(())
    }

    // ==================== Schema and holdability ====================

    pub(crate) fn current_schema(&mut self) -> Result<Option<String>> {
        self.check_open()?;
        if let Some(schema) = &self.schema {
            return Ok(Some(schema.clone()));
        }
        let options = CursorOptions::with_holdability(self.holdability);
        let id = self.prepare_internal("VALUES CURRENT SCHEMA", options)?;
        let saved_auto_commit = self.auto_commit;
        let saved_unit_of_work = self.in_unit_of_work;
        self.auto_commit = false;
        let value = self.query_single_value(id);
        self.in_unit_of_work = saved_unit_of_work;
        self.auto_commit = saved_auto_commit;
        self.discard_statement(id);
        let schema = value?.and_then(|v| v.as_str().map(|s| s.trim_end().to_string()));
        if self.capabilities.session_data_caching {
            self.schema.clone_from(&schema);
        }
        Ok(schema)
    }

    pub(crate) fn set_schema(&mut self, schema: &str) -> Result<()> {
        self.check_open()?;
        if self.schema.as_deref() == Some(schema) {
            return Ok(());
        }
        let id = match self.schema_statement.filter(|id| self.statement_is_open(*id)) {
            Some(id) => id,
            None => {
                let options = CursorOptions::with_holdability(self.holdability);
                let id = self.prepare_internal("SET SCHEMA ?", options)?;
                if let Some(statement) = self.statements.get_mut(id.0) {
                    statement.auto_committable = true;
                }
                self.schema_statement = Some(id);
                id
            }
        };
        self.bind_internal(id, vec![Value::Text(schema.to_string())])?;
        self.execute_prepared(id, ExecuteMethod::Update)?;
        self.schema = Some(schema.to_string());
        Ok(())
    }

    pub(crate) fn set_holdability(&mut self, holdability: Holdability) -> Result<()> {
        self.check_open()?;
        if holdability.is_hold() && self.is_xa_associated() {
            return Err(Error::transaction(
                TransactionErrorKind::HoldUnderXa,
                "Cannot hold cursors over commit while associated with a global transaction",
            ));
        }
        self.holdability = holdability;
        Ok(())
    }

    pub(crate) fn holdability(&mut self) -> Result<Holdability> {
        self.check_open()?;
        Ok(self.effective_holdability())
    }

    pub(crate) fn effective_holdability(&self) -> Holdability {
        if self.is_xa_associated() {
            Holdability::CloseCursorsAtCommit
        } else {
            self.holdability
        }
    }

    // ==================== Close and reuse ====================

    /// Close every open statement's cursors and auto-commit, outside any unit of work.
    fn flow_close(&mut self) -> Result<()> {
        let scope = ChainScope::OutsideUnitOfWork;
        self.begin_chain(scope)?;
        let mut plans = Vec::new();
        if self.config.close_statements_on_close {
            for key in self.statements.keys() {
                let id = StatementId(key);
                if self.statement_is_open(id) {
                    plans.push((id, self.write_close_result_sets(id, false)?));
                }
            }
        }
        let auto_commit = if self.auto_commit {
            self.write_auto_commit()?
        } else {
            None
        };
        self.flow(scope)?;
        for (id, plan) in plans {
            self.read_close_result_sets(id, plan)?;
        }
        if let Some(write) = auto_commit {
            self.read_auto_commit(write)?;
        }
        self.end_read_chain()
    }

    fn close_internal_statements(&mut self) {
        let mut ids: Vec<StatementId> = self.isolation_statements.drain().map(|(_, id)| id).collect();
        ids.extend(self.get_isolation_statement.take());
        ids.extend(self.schema_statement.take());
        for id in ids {
            self.discard_statement(id);
        }
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.is_physically_closed() {
            return Ok(());
        }
        let mut result = Ok(());
        if self.open {
            self.agent.check_for_deferred_exceptions()?;
            self.check_for_transaction_in_progress()?;
            self.close_internal_statements();
            result = self.flow_close();
            self.mark_closed(false);
        }
        self.release_channel();
        tracing::info!(session = self.id, server = %self.config.server_address(), "Session closed");
        result
    }

    fn release_channel(&mut self) {
        if let Err(e) = self.agent.close() {
            tracing::warn!(session = self.id, error = %e, "Error releasing channel");
        }
        self.available_for_reuse = false;
    }

    fn mark_closed(&mut self, statement_pooling: bool) {
        self.open = false;
        self.in_unit_of_work = false;
        if !statement_pooling {
            self.mark_statements_closed();
        }
        self.listeners.clear();
    }

    pub(crate) fn mark_statements_closed(&mut self) {
        for key in self.statements.keys() {
            self.mark_statement_closed(StatementId(key));
        }
    }

    /// Logically close for pooled reuse; the channel stays up.
    pub(crate) fn close_for_reuse(&mut self, statement_pooling: bool) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let result = self.flow_close();
        self.available_for_reuse = true;
        self.mark_closed(statement_pooling);
        tracing::info!(session = self.id, statement_pooling, "Session closed for reuse");
        result
    }

    pub(crate) fn light_reset(&mut self) {
        if !self.open && !self.available_for_reuse {
            return;
        }
        self.open = true;
        self.available_for_reuse = false;
    }

    /// Reinitialize session state for a new logical user.
    pub(crate) fn reset_connection(&mut self) {
        self.warnings.clear();
        self.schema = Some(self.config.user.to_ascii_uppercase());
        self.auto_commit = true;
        self.in_unit_of_work = false;
        self.holdability = self.config.default_holdability;
    }

    pub(crate) fn complete_reset(&mut self, full: bool, keep_isolation: bool) -> Result<()> {
        self.open = true;
        self.complete_local_rollback();
        let mut result = Ok(());
        if self.config.close_statements_on_close {
            for key in self.statements.keys() {
                let id = StatementId(key);
                let reopen = self.statements.get(key).is_some_and(|s| s.open && !s.internal);
                if reopen {
                    if let Err(e) = self.reset_statement(id, full) {
                        tracing::warn!(session = self.id, error = %e, "Statement reset failed");
                        if result.is_ok() {
                            result = Err(e);
                        }
                    }
                }
            }
        }
        if !keep_isolation
            && self.isolation != IsolationLevel::Unknown
            && self.isolation != self.default_isolation
            && self.default_isolation.server_code().is_some()
        {
            let default = self.default_isolation;
            if let Err(e) = self.set_isolation(default) {
                tracing::warn!(session = self.id, error = %e, "Restoring default isolation failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if full {
            self.metadata = MetadataCache::default();
        }
        self.available_for_reuse = false;
        tracing::info!(session = self.id, full, "Session reset");
        result
    }

    pub(crate) fn complete_chain_breaking_disconnect(&mut self) {
        if !self.open && !self.available_for_reuse {
            return;
        }
        tracing::warn!(session = self.id, "Channel lost, closing session");
        self.open = false;
        self.available_for_reuse = false;
        self.complete_local_rollback();
        self.mark_statements_closed();
    }

    /// Mark closed now; rollback and release happen in the executor.
    pub(crate) fn begin_abort(&mut self) -> bool {
        if !self.open || self.aborting {
            return false;
        }
        self.aborting = true;
        self.open = false;
        true
    }

    pub(crate) fn finish_abort(&mut self) {
        if let Err(e) = self.flow_rollback() {
            tracing::warn!(session = self.id, error = %e, "Rollback during abort failed");
        }
        self.mark_closed(false);
        self.release_channel();
        self.aborting = false;
        tracing::info!(session = self.id, "Session aborted");
    }

    // ==================== Misc ====================

    pub(crate) fn native_sql(&mut self, sql: &str) -> Result<String> {
        self.check_open()?;
        Ok(sql::native_sql(sql))
    }

    pub(crate) fn add_warning(&mut self, warning: Warning) {
        tracing::warn!(session = self.id, sqlstate = %warning.sqlstate, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Statements visible to callers that are still open.
    pub fn open_statement_count(&self) -> usize {
        self.statements
            .keys()
            .into_iter()
            .filter_map(|key| self.statements.get(key))
            .filter(|s| s.open && !s.internal)
            .count()
    }

    pub(crate) fn statement_is_open(&self, id: StatementId) -> bool {
        self.statements.get(id.0).is_some_and(|s| s.open)
    }

    pub(crate) fn cursor_is_open(&self, id: CursorId) -> bool {
        self.cursors.get(id.0).is_some_and(|c| c.open_on_client)
    }
}

/// A logical database session.
///
/// Cloning the handle shares the session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Mutex<SessionCore>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.shared.try_lock() {
            Ok(core) => core.fmt(f),
            Err(_) => f.write_str("Session { <locked> }"),
        }
    }
}

impl Session {
    /// Open a session over an established channel.
    pub fn open(config: SessionConfig, agent: impl Agent + 'static) -> Result<Self> {
        Self::with_agent(config, Box::new(agent))
    }

    pub fn with_agent(config: SessionConfig, agent: Box<dyn Agent>) -> Result<Self> {
        if agent.is_closed() {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("channel to {} is not open", config.server_address()),
                source: None,
            }));
        }
        let core = SessionCore::new(config, agent);
        tracing::info!(
            session = core.id,
            server = %core.config.server_address(),
            user = %core.config.user,
            flavor = core.flavor.name(),
            "Session opened"
        );
        Ok(Self {
            shared: Arc::new(Mutex::new(core)),
        })
    }

    /// Lock the session for one operation.
    pub fn lock(&self) -> Result<MutexGuard<'_, SessionCore>> {
        self.shared.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "session state poisoned by a panic in another thread".to_string(),
                source: None,
            })
        })
    }

    pub fn id(&self) -> Result<u64> {
        Ok(self.lock()?.id)
    }

    pub fn config(&self) -> Result<SessionConfig> {
        Ok(self.lock()?.config.clone())
    }

    pub fn capabilities(&self) -> Result<ServerCapabilities> {
        Ok(self.lock()?.capabilities.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map_or(true, |core| !core.open)
    }

    pub fn is_physically_closed(&self) -> bool {
        self.lock().map_or(true, |core| core.is_physically_closed())
    }

    /// Whether the session answers a trivial query.
    pub fn is_valid(&self) -> bool {
        let Ok(mut core) = self.lock() else {
            return false;
        };
        if !core.open {
            return false;
        }
        match core.ping() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Validity check failed");
                false
            }
        }
    }

    // ==================== Transactions ====================

    pub fn auto_commit(&self) -> Result<bool> {
        self.lock()?.auto_commit()
    }

    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.lock()?.set_auto_commit(enabled)
    }

    pub fn commit(&self) -> Result<()> {
        self.lock()?.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.lock()?.rollback()
    }

    pub fn in_unit_of_work(&self) -> Result<bool> {
        Ok(self.lock()?.in_unit_of_work)
    }

    /// Counter bumped by every completed commit or rollback.
    pub fn transaction_id(&self) -> Result<u64> {
        Ok(self.lock()?.transaction_id)
    }

    pub fn xa_state(&self) -> Result<XaState> {
        Ok(self.lock()?.xa_state)
    }

    /// Called by the XA resource when a global transaction branch starts or ends.
    pub fn set_xa_state(&self, state: XaState) -> Result<()> {
        self.lock()?.set_xa_state(state);
        Ok(())
    }

    pub fn isolation(&self) -> Result<IsolationLevel> {
        self.lock()?.isolation()
    }

    pub fn set_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.lock()?.set_isolation(level)
    }

    pub fn holdability(&self) -> Result<Holdability> {
        self.lock()?.holdability()
    }

    pub fn set_holdability(&self, holdability: Holdability) -> Result<()> {
        self.lock()?.set_holdability(holdability)
    }

    pub fn current_schema(&self) -> Result<Option<String>> {
        self.lock()?.current_schema()
    }

    pub fn set_schema(&self, schema: &str) -> Result<()> {
        self.lock()?.set_schema(schema)
    }

    /// Accepted and remembered; the server is not told.
    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        let mut core = self.lock()?;
        core.check_open()?;
        core.read_only = read_only;
        Ok(())
    }

    pub fn is_read_only(&self) -> Result<bool> {
        let mut core = self.lock()?;
        core.check_open()?;
        Ok(core.read_only)
    }

    /// Catalogs are not supported.
    pub fn catalog(&self) -> Result<Option<String>> {
        self.lock()?.check_open()?;
        Ok(None)
    }

    pub fn set_network_timeout(&self, _millis: u64) -> Result<()> {
        self.lock()?.check_open()?;
        Err(Error::usage(
            drda_core::UsageErrorKind::NotSupported,
            "Network timeouts are not supported",
        ))
    }

    pub fn native_sql(&self, sql: &str) -> Result<String> {
        self.lock()?.native_sql(sql)
    }

    pub fn warnings(&self) -> Result<Vec<Warning>> {
        let mut core = self.lock()?;
        core.check_open()?;
        Ok(core.warnings.clone())
    }

    pub fn clear_warnings(&self) -> Result<()> {
        let mut core = self.lock()?;
        core.check_open()?;
        core.warnings.clear();
        Ok(())
    }

    // ==================== Statements ====================

    pub fn create_statement(&self) -> Result<Statement> {
        let options = CursorOptions::with_holdability(self.lock()?.effective_holdability());
        self.create_statement_with(options)
    }

    pub fn create_statement_with(&self, options: CursorOptions) -> Result<Statement> {
        let id = {
            let mut core = self.lock()?;
            core.check_open()?;
            core.create_statement_state(StatementKind::Plain, options, false)?
        };
        Ok(Statement::new(self.clone(), id))
    }

    pub fn prepare_statement(&self, sql: &str) -> Result<PreparedStatement> {
        let options = CursorOptions::with_holdability(self.lock()?.effective_holdability());
        self.prepare_statement_with(sql, options)
    }

    pub fn prepare_statement_with(
        &self,
        sql: &str,
        options: CursorOptions,
    ) -> Result<PreparedStatement> {
        let id = {
            let mut core = self.lock()?;
            core.check_open()?;
            core.prepare_statement_state(sql, options, StatementKind::Prepared, false)?
        };
        Ok(PreparedStatement::new(Statement::new(self.clone(), id)))
    }

    pub fn prepare_call(&self, sql: &str) -> Result<CallableStatement> {
        let options = CursorOptions::with_holdability(self.lock()?.effective_holdability());
        self.prepare_call_with(sql, options)
    }

    pub fn prepare_call_with(&self, sql: &str, options: CursorOptions) -> Result<CallableStatement> {
        let id = {
            let mut core = self.lock()?;
            core.check_open()?;
            core.prepare_statement_state(sql, options, StatementKind::Callable, false)?
        };
        Ok(CallableStatement::new(PreparedStatement::new(
            Statement::new(self.clone(), id),
        )))
    }

    /// Statements created through this session that are still open.
    pub fn open_statement_count(&self) -> Result<usize> {
        Ok(self.lock()?.open_statement_count())
    }

    pub fn metadata(&self) -> Result<DatabaseMetadata> {
        self.lock()?.check_open()?;
        Ok(DatabaseMetadata::new(self.clone()))
    }

    // ==================== Lifecycle ====================

    /// Close the session and release the channel.
    pub fn close(&self) -> Result<()> {
        self.lock()?.close()
    }

    /// Fails with `25001` while a unit of work would block a close.
    pub fn check_for_transaction_in_progress(&self) -> Result<()> {
        self.lock()?.check_for_transaction_in_progress()
    }

    /// Close logically for pooled reuse without releasing the channel.
    pub fn close_for_reuse(&self, statement_pooling: bool) -> Result<()> {
        self.lock()?.close_for_reuse(statement_pooling)
    }

    /// Reopen a logically closed session without reinitializing it.
    pub fn light_reset(&self) -> Result<()> {
        self.lock()?.light_reset();
        Ok(())
    }

    /// Reinitialize for a new logical user: session defaults, then a full or
    /// cheap reset of every surviving statement.
    pub fn reset(&self, full: bool, keep_isolation: bool) -> Result<()> {
        let mut core = self.lock()?;
        core.reset_connection();
        core.complete_reset(full, keep_isolation)
    }

    /// Forcefully close: marked closed now, rolled back and released by `executor`.
    pub fn abort(&self, executor: &dyn Executor) -> Result<()> {
        if !self.lock()?.begin_abort() {
            return Ok(());
        }
        let session = self.clone();
        executor.execute(Box::new(move || {
            if let Ok(mut core) = session.lock() {
                core.finish_abort();
            }
        }));
        Ok(())
    }

    /// Initial isolation reported by the connect handshake; it becomes the default.
    pub fn complete_initial_piggyback_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.lock()?.complete_initial_piggyback_isolation(level);
        Ok(())
    }

    /// Initial schema reported by the connect handshake.
    pub fn complete_initial_piggyback_schema(&self, schema: &str) -> Result<()> {
        self.lock()?.complete_initial_piggyback_schema(schema);
        Ok(())
    }
}

impl SessionCore {
    /// Run `VALUES 1` on a throwaway statement.
    fn ping(&mut self) -> Result<()> {
        let options = CursorOptions::with_holdability(Holdability::CloseCursorsAtCommit)
            .result_set_type(ResultSetType::ForwardOnly);
        let id = self.prepare_internal("VALUES 1", options)?;
        let saved_unit_of_work = self.in_unit_of_work;
        let result = self.query_single_value(id);
        self.in_unit_of_work = saved_unit_of_work;
        self.discard_statement(id);
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RequestKind;
    use crate::scripted::ScriptedAgent;

    fn session(config: SessionConfig) -> (Session, ScriptedAgent) {
        let wire = ScriptedAgent::new();
        let session = Session::open(config, wire.clone()).unwrap();
        (session, wire)
    }

    #[test]
    fn test_auto_commit_toggle_to_same_value_is_silent() {
        let (session, wire) = session(SessionConfig::new("db"));
        session.set_auto_commit(true).unwrap();
        assert_eq!(wire.flow_count(), 0);

        session.set_auto_commit(false).unwrap();
        session.set_auto_commit(false).unwrap();
        assert_eq!(wire.flow_count(), 0);
        assert!(!session.auto_commit().unwrap());
    }

    #[test]
    fn test_commit_without_unit_of_work_is_noop() {
        let (session, wire) = session(SessionConfig::new("db"));
        session.commit().unwrap();
        assert_eq!(wire.flow_count(), 0);
        assert_eq!(session.transaction_id().unwrap(), 0);
    }

    #[test]
    fn test_rollback_always_flows() {
        let (session, wire) = session(SessionConfig::new("db"));
        session.rollback().unwrap();
        assert_eq!(wire.count(RequestKind::Rollback), 1);
        assert_eq!(session.transaction_id().unwrap(), 1);
        assert!(!session.in_unit_of_work().unwrap());
    }

    #[test]
    fn test_xa_association_rules() {
        let (session, wire) = session(SessionConfig::new("db").xa(true));
        session.set_xa_state(XaState::Associated).unwrap();

        assert!(!session.auto_commit().unwrap());
        let err = session.set_auto_commit(true).unwrap_err();
        assert_eq!(err.sqlstate(), Some("XJ056"));
        assert_eq!(
            session.commit().unwrap_err().transaction_kind(),
            Some(TransactionErrorKind::LocalCommitUnderXa)
        );
        assert!(session.rollback().is_err());
        assert_eq!(
            session.holdability().unwrap(),
            Holdability::CloseCursorsAtCommit
        );
        assert!(
            session
                .set_holdability(Holdability::HoldCursorsOverCommit)
                .is_err()
        );
        assert_eq!(wire.flow_count(), 0);

        session.set_xa_state(XaState::NotAssociated).unwrap();
        session.rollback().unwrap();
        let chain = wire.last_chain().unwrap();
        assert_eq!(chain.scope, ChainScope::OutsideUnitOfWork);
        assert_eq!(chain.kinds(), vec![RequestKind::XaLocalRollback]);
    }

    #[test]
    fn test_rollback_notifies_each_listener_once() {
        let (session, wire) = session(SessionConfig::new("db"));
        session.set_auto_commit(false).unwrap();
        let statement = session.create_statement().unwrap();
        statement.execute_update("DELETE FROM T WHERE A > 10").unwrap();
        statement.execute_update("DELETE FROM T WHERE A > 20").unwrap();
        let registered = session.lock().unwrap().listeners.clone();
        assert!(!registered.is_empty());

        session.rollback().unwrap();
        {
            let core = session.lock().unwrap();
            for listener in &registered {
                let times = core.notified.iter().filter(|n| *n == listener).count();
                assert_eq!(times, 1, "{listener:?}");
            }
            assert_eq!(core.notified.len(), registered.len());
            assert!(!core.in_unit_of_work());
        }

        // nothing left to notify
        session.rollback().unwrap();
        assert_eq!(session.lock().unwrap().notified.len(), registered.len());
        assert_eq!(wire.count(RequestKind::Commit), 0);
        assert_eq!(wire.count(RequestKind::CommitSubstitute), 0);
    }

    #[test]
    fn test_closed_session_rejects_operations() {
        let (session, wire) = session(SessionConfig::new("db"));
        session.close().unwrap();
        assert!(session.is_closed());
        assert!(session.is_physically_closed());
        let err = session.commit().unwrap_err();
        assert_eq!(err.sqlstate(), Some("08003"));
        assert!(session.create_statement().is_err());
        session.close().unwrap();
        assert_eq!(wire.flow_count(), 0);
    }

    #[test]
    fn test_deferred_error_surfaces_on_next_check() {
        let (session, wire) = session(SessionConfig::new("db"));
        wire.defer_error(Error::Custom("late failure".to_string()));
        let err = session.native_sql("{call p}").unwrap_err();
        assert_eq!(err.to_string(), "late failure");
        assert_eq!(session.native_sql("{call p}").unwrap(), "call p");
    }

    #[test]
    fn test_abort_marks_closed_then_runs_executor() {
        let (session, wire) = session(SessionConfig::new("db"));
        let ran = Arc::new(Mutex::new(Vec::new()));
        let tasks = Arc::clone(&ran);
        let executor = move |task: Box<dyn FnOnce() + Send + 'static>| {
            tasks.lock().unwrap().push(task);
        };
        session.abort(&executor).unwrap();
        assert!(session.is_closed());
        assert_eq!(wire.flow_count(), 0);

        let task = ran.lock().unwrap().pop().unwrap();
        task();
        assert_eq!(wire.count(RequestKind::Rollback), 1);
        assert!(session.is_physically_closed());

        // Already closed: nothing queued.
        session.abort(&executor).unwrap();
        assert!(ran.lock().unwrap().is_empty());
    }

    #[test]
    fn test_piggyback_isolation_requires_caching() {
        let (older, _wire) = session(SessionConfig::new("db").product_level("CSS10030"));
        older
            .lock()
            .unwrap()
            .complete_piggyback_isolation(IsolationLevel::Serializable);
        assert_eq!(older.lock().unwrap().isolation, IsolationLevel::Unknown);

        let (current, _wire) = session(SessionConfig::new("db"));
        current
            .lock()
            .unwrap()
            .complete_piggyback_isolation(IsolationLevel::Serializable);
        assert_eq!(current.isolation().unwrap(), IsolationLevel::Serializable);
    }

    #[test]
    fn test_set_isolation_none_rejected_locally() {
        let (session, wire) = session(SessionConfig::new("db"));
        let err = session.set_isolation(IsolationLevel::None).unwrap_err();
        assert_eq!(err.sqlstate(), Some("XJ045"));
        assert_eq!(wire.flow_count(), 0);
    }
}
