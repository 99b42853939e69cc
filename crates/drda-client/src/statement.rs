//! Statements: the plain-statement execute choreography plus the state
//! shared with prepared and callable statements.
//!
//! A statement's state lives in the session's statement registry; the
//! [`Statement`] handle is a session clone plus a [`StatementId`]. Every
//! handle method locks the session for its whole round trip.

use crate::agent::{ChainScope, ParameterDescriptor, QueryReply, ReplyBody, Request};
use crate::cursor::ResultSet;
use crate::registry::{CursorId, Listener, StatementId};
use crate::section::Section;
use crate::session::{AutoCommitWrite, Session, SessionCore};
use crate::sql::{self, SqlMode, UpdateMode};
use drda_core::{
    ColumnDescriptor, Concurrency, CursorOptions, Error, FetchDirection, GeneratedKeys,
    Holdability, MoreResults, Result, ResultSetType, SqlType, UsageErrorKind, Value, Warning,
};

/// Query used to read back identity values after an INSERT or UPDATE.
pub const GENERATED_KEYS_SQL: &str = "SELECT IDENTITY_VAL_LOCAL() FROM SYSIBM.SYSDUMMY1";

/// Fetch size used for scrollable cursors when none was set.
const DEFAULT_SCROLL_FETCH_SIZE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Plain,
    Prepared,
    Callable,
}

/// Which execute entry point the caller used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMethod {
    Execute,
    Query,
    Update,
}

/// One parameter slot of a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Unset,
    Value(Value),
    /// A null bound with an explicit SQL type
    Null(SqlType),
}

impl Binding {
    pub fn is_set(&self) -> bool {
        !matches!(self, Binding::Unset)
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Binding::Value(v) => v.clone(),
            Binding::Unset | Binding::Null(_) => Value::Null,
        }
    }

    /// An explicitly typed null overrides the described type.
    pub(crate) fn input_type(&self, described: SqlType) -> SqlType {
        match self {
            Binding::Null(sql_type) => *sql_type,
            Binding::Unset | Binding::Value(_) => described,
        }
    }
}

/// Input descriptor for `bindings`; parameters the server never described go as `Null`.
pub(crate) fn input_types(
    bindings: &[Binding],
    described: &[ParameterDescriptor],
) -> Vec<SqlType> {
    bindings
        .iter()
        .enumerate()
        .map(|(i, binding)| {
            binding.input_type(described.get(i).map_or(SqlType::Null, |d| d.sql_type))
        })
        .collect()
}

/// A queued batch entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntry {
    Sql(String),
    /// Snapshot of the bound values and their types for one execution
    Parameters {
        values: Vec<Binding>,
        types: Vec<SqlType>,
    },
}

/// Cursors whose close was written into the current chain.
#[derive(Debug, Default)]
pub(crate) struct ClosePlan {
    cursors: Vec<CursorId>,
    closes: Vec<CursorId>,
    pub(crate) auto_commit: Option<AutoCommitWrite>,
}

/// Generated-keys query chained behind an update.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeysPlan {
    statement: StatementId,
    prepare_sent: bool,
}

/// Everything the read half of an execute needs from the write half.
#[derive(Debug, Default)]
pub(crate) struct ExecutePlan {
    pub(crate) close: ClosePlan,
    pub(crate) timeout_sent: bool,
    pub(crate) prepare_sent: bool,
    pub(crate) positioning: Option<CursorId>,
    pub(crate) keys: Option<KeysPlan>,
    pub(crate) auto_commit: Option<AutoCommitWrite>,
}

/// State of one statement.
#[derive(Debug)]
pub struct StatementState {
    pub(crate) kind: StatementKind,
    /// Created by the session itself (isolation, schema, savepoints, catalog)
    pub(crate) internal: bool,
    pub(crate) auto_committable: bool,
    /// No caller handle left; discarded once its cursors close
    pub(crate) orphaned: bool,
    pub(crate) open: bool,
    pub(crate) open_on_server: bool,
    pub(crate) listening: bool,

    pub(crate) section: Option<Section>,
    pub(crate) sql: Option<String>,
    pub(crate) mode: Option<SqlMode>,
    /// Client cursor name of a positioned update or delete
    pub(crate) positioned_cursor: Option<String>,
    pub(crate) options: CursorOptions,
    pub(crate) cursor_attributes: Option<String>,
    pub(crate) cursor_name: Option<String>,

    pub(crate) fetch_size: u32,
    pub(crate) fetch_direction: FetchDirection,
    pub(crate) max_rows: u64,
    pub(crate) max_field_size: u32,
    pub(crate) timeout: u32,
    pub(crate) timeout_dirty: bool,
    pub(crate) poolable: bool,
    pub(crate) close_on_completion: bool,

    pub(crate) warnings: Vec<Warning>,
    pub(crate) batch: Vec<BatchEntry>,
    pub(crate) update_count: i64,
    pub(crate) result_sets: Vec<CursorId>,
    pub(crate) result_set_index: usize,
    pub(crate) current: Option<CursorId>,
    pub(crate) generated_keys: Option<CursorId>,
    pub(crate) keys_statement: Option<StatementId>,

    pub(crate) parameters: Vec<ParameterDescriptor>,
    pub(crate) columns: Vec<ColumnDescriptor>,
    pub(crate) bindings: Vec<Binding>,
    /// Registered output type and scale per parameter
    pub(crate) registered: Vec<Option<(SqlType, u8)>>,
    pub(crate) outputs: Vec<Value>,
    pub(crate) was_null: Option<bool>,
}

/// Cursor attributes sent with a query prepare.
pub fn cursor_attributes(options: &CursorOptions) -> Option<String> {
    let mut parts = Vec::new();
    match options.result_set_type {
        ResultSetType::ScrollSensitive => parts.push("SENSITIVE STATIC SCROLL"),
        ResultSetType::ScrollInsensitive => parts.push("INSENSITIVE SCROLL"),
        ResultSetType::ForwardOnly => {}
    }
    if options.concurrency == Concurrency::Updatable {
        parts.push("FOR UPDATE");
    }
    if options.holdability.is_hold() {
        parts.push("WITH HOLD");
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

impl StatementState {
    pub(crate) fn new(kind: StatementKind, options: CursorOptions, internal: bool) -> Self {
        let cursor_attributes = cursor_attributes(&options);
        Self {
            kind,
            internal,
            auto_committable: !internal,
            orphaned: false,
            open: true,
            open_on_server: false,
            listening: false,
            section: None,
            sql: None,
            mode: None,
            positioned_cursor: None,
            options,
            cursor_attributes,
            cursor_name: None,
            fetch_size: 0,
            fetch_direction: FetchDirection::Forward,
            max_rows: 0,
            max_field_size: 0,
            timeout: 0,
            timeout_dirty: false,
            poolable: kind != StatementKind::Plain,
            close_on_completion: false,
            warnings: Vec::new(),
            batch: Vec::new(),
            update_count: -1,
            result_sets: Vec::new(),
            result_set_index: 0,
            current: None,
            generated_keys: None,
            keys_statement: None,
            parameters: Vec::new(),
            columns: Vec::new(),
            bindings: Vec::new(),
            registered: Vec::new(),
            outputs: Vec::new(),
            was_null: None,
        }
    }

    /// Fetch size sent with open and fetch requests.
    pub(crate) fn effective_fetch_size(&self) -> u32 {
        if self.fetch_size == 0 && self.options.result_set_type.is_scrollable() {
            DEFAULT_SCROLL_FETCH_SIZE
        } else {
            self.fetch_size
        }
    }

    pub(crate) fn holdability(&self) -> Holdability {
        self.options.holdability
    }

    fn reset_user_attributes(&mut self) {
        self.cursor_name = None;
        self.timeout = 0;
        self.timeout_dirty = false;
        self.max_rows = 0;
        self.max_field_size = 0;
        self.fetch_size = 0;
        self.fetch_direction = FetchDirection::Forward;
        self.poolable = self.kind != StatementKind::Plain;
    }

    pub(crate) fn reset_parameters(&mut self) {
        self.bindings.fill(Binding::Unset);
        self.registered.fill(None);
        self.outputs.clear();
        self.was_null = None;
    }

    /// Every cursor this statement produced, keys cursor last.
    fn all_cursors(&self) -> Vec<CursorId> {
        let mut cursors = self.result_sets.clone();
        cursors.extend(self.generated_keys);
        cursors
    }
}

pub(crate) fn statement_closed() -> Error {
    Error::usage(UsageErrorKind::StatementClosed, "Statement is closed")
}

pub(crate) fn check_execute_method(method: ExecuteMethod, mode: SqlMode) -> Result<()> {
    match (method, mode) {
        (ExecuteMethod::Query, SqlMode::Update(_)) => Err(Error::usage(
            UsageErrorKind::WrongExecuteMethod,
            "execute_query cannot be used for a statement that does not return a result set",
        )),
        (ExecuteMethod::Update, SqlMode::Query) => Err(Error::usage(
            UsageErrorKind::WrongExecuteMethod,
            "execute_update cannot be used for a statement that returns a result set",
        )),
        _ => Ok(()),
    }
}

impl SessionCore {
    // ==================== Registry ====================

    pub(crate) fn create_statement_state(
        &mut self,
        kind: StatementKind,
        mut options: CursorOptions,
        internal: bool,
    ) -> Result<StatementId> {
        if options.result_set_type == ResultSetType::ScrollSensitive {
            options.result_set_type = ResultSetType::ScrollInsensitive;
            self.add_warning(Warning::client(
                "01J02",
                "Scroll sensitive cursors are not currently implemented",
            ));
        }
        if options.holdability.is_hold() && self.is_xa_associated() {
            options.holdability = Holdability::CloseCursorsAtCommit;
            self.add_warning(Warning::client(
                "01J07",
                "Holdable cursors are not available in a global transaction",
            ));
        }
        let state = StatementState::new(kind, options, internal);
        let id = StatementId(self.statements.insert(state));
        tracing::trace!(session = self.id, ?kind, internal, "Statement created");
        Ok(id)
    }

    pub(crate) fn statement(&self, id: StatementId) -> Result<&StatementState> {
        self.statements.get(id.0).ok_or_else(statement_closed)
    }

    pub(crate) fn statement_mut(&mut self, id: StatementId) -> Result<&mut StatementState> {
        self.statements.get_mut(id.0).ok_or_else(statement_closed)
    }

    /// Statement closed wins over session closed, after deferred errors.
    pub(crate) fn check_statement_open(&mut self, id: StatementId) -> Result<()> {
        if !self.statement_is_open(id) {
            return Err(statement_closed());
        }
        self.check_open()
    }

    /// Replace the statement's section, returning the old one to its package.
    pub(crate) fn set_statement_section(&mut self, id: StatementId, section: Section) {
        let old = self
            .statements
            .get_mut(id.0)
            .and_then(|s| s.section.replace(section));
        if let Some(old) = old {
            self.sections.free_section(&old);
        }
    }

    fn listen_to_unit_of_work(&mut self, id: StatementId) {
        let newly = match self.statements.get_mut(id.0) {
            Some(statement) if !statement.listening => {
                statement.listening = true;
                true
            }
            _ => false,
        };
        if newly {
            self.add_listener(Listener::Statement(id));
        }
    }

    pub(crate) fn mark_prepared(&mut self, id: StatementId) {
        if let Some(statement) = self.statements.get_mut(id.0) {
            statement.open_on_server = true;
        }
        self.listen_to_unit_of_work(id);
    }

    // ==================== Closing cursors inside a chain ====================

    /// Whether closing this statement's cursors needs a round trip.
    pub(crate) fn will_tickle_server(&self, id: StatementId) -> bool {
        let Some(statement) = self.statements.get(id.0) else {
            return false;
        };
        let mut requires_auto_commit = false;
        for cursor_id in &statement.result_sets {
            if let Some(cursor) = self.cursors.get(cursor_id.0) {
                if cursor.open_on_server {
                    return true;
                }
                if !cursor.auto_committed {
                    requires_auto_commit = true;
                }
            }
        }
        if statement.result_sets.is_empty() {
            if let Some(keys) = statement.generated_keys.and_then(|k| self.cursors.get(k.0)) {
                if keys.open_on_server {
                    return true;
                }
            }
        }
        requires_auto_commit && statement.auto_committable && self.will_auto_commit_generate_flow()
    }

    /// Stage close requests for every open cursor of the statement, plus an
    /// auto-commit when one is owed and allowed.
    pub(crate) fn write_close_result_sets(
        &mut self,
        id: StatementId,
        allow_auto_commit: bool,
    ) -> Result<ClosePlan> {
        let (result_sets, keys, auto_committable) = {
            let statement = self.statement(id)?;
            (
                statement.result_sets.clone(),
                statement.generated_keys,
                statement.auto_committable,
            )
        };
        let mut plan = ClosePlan::default();
        let mut requires_auto_commit = false;
        for cursor_id in result_sets {
            let Some((open_on_server, auto_committed, section)) = self
                .cursors
                .get(cursor_id.0)
                .map(|c| (c.open_on_server, c.auto_committed, c.section.clone()))
            else {
                continue;
            };
            if open_on_server {
                self.write(Request::CloseCursor { section })?;
                plan.closes.push(cursor_id);
            }
            if !auto_committed && allow_auto_commit {
                requires_auto_commit = true;
            }
            plan.cursors.push(cursor_id);
        }
        if plan.cursors.is_empty() {
            if let Some(keys_id) = keys {
                if let Some(section) = self
                    .cursors
                    .get(keys_id.0)
                    .filter(|c| c.open_on_server)
                    .map(|c| c.section.clone())
                {
                    self.write(Request::CloseCursor { section })?;
                    plan.closes.push(keys_id);
                }
                plan.cursors.push(keys_id);
            }
        }
        if self.auto_commit && requires_auto_commit && auto_committable {
            plan.auto_commit = self.write_auto_commit()?;
        }
        Ok(plan)
    }

    pub(crate) fn read_close_result_sets(&mut self, id: StatementId, plan: ClosePlan) -> Result<()> {
        for cursor_id in plan.cursors {
            if plan.closes.contains(&cursor_id) {
                let reply = self.read_reply(Some(id))?;
                if !reply.is_error() {
                    self.mark_cursor_closed(cursor_id, true);
                }
            } else {
                self.mark_cursor_closed(cursor_id, true);
            }
        }
        if let Some(write) = plan.auto_commit {
            self.read_auto_commit(write)?;
        }
        Ok(())
    }

    /// Close this statement's cursors locally and forget them.
    pub(crate) fn mark_result_sets_closed(&mut self, id: StatementId) {
        let cursors = match self.statements.get_mut(id.0) {
            Some(statement) => {
                let cursors = statement.all_cursors();
                statement.result_sets.clear();
                statement.generated_keys = None;
                statement.current = None;
                statement.result_set_index = 0;
                cursors
            }
            None => return,
        };
        for cursor_id in cursors {
            self.mark_cursor_closed(cursor_id, true);
            self.cursors.remove(cursor_id.0);
        }
    }

    /// Close a statement's cursors in their own chain.
    pub(crate) fn flow_close_result_sets(&mut self, id: StatementId) -> Result<()> {
        self.begin_chain(ChainScope::InUnitOfWork)?;
        let plan = self.write_close_result_sets(id, true)?;
        self.flow(ChainScope::InUnitOfWork)?;
        self.read_close_result_sets(id, plan)?;
        self.end_read_chain()
    }

    // ==================== Statement close ====================

    /// Close the statement, flowing cursor closes first when needed.
    pub(crate) fn close_statement(&mut self, id: StatementId) -> Result<()> {
        if !self.statement_is_open(id) {
            return Ok(());
        }
        let result = if self.is_open() && self.will_tickle_server(id) {
            self.flow_close_result_sets(id)
        } else {
            Ok(())
        };
        self.mark_statement_closed(id);
        tracing::debug!(session = self.id, "Statement closed");
        result
    }

    /// Close locally: cursors, cursor-name cache, keys statement, section, listener.
    pub(crate) fn mark_statement_closed(&mut self, id: StatementId) {
        if !self.statement_is_open(id) {
            return;
        }
        self.mark_result_sets_closed(id);
        self.client_cursor_names.retain(|_, owner| *owner != id);
        let (keys, section) = match self.statements.get_mut(id.0) {
            Some(statement) => {
                statement.open = false;
                statement.open_on_server = false;
                statement.listening = false;
                (statement.keys_statement.take(), statement.section.take())
            }
            None => return,
        };
        if let Some(keys) = keys {
            self.mark_statement_closed(keys);
            self.statements.remove(keys.0);
        }
        if let Some(section) = section {
            self.sections.free_section(&section);
        }
        self.remove_listener(Listener::Statement(id));
    }

    /// Close and drop the registry entry; errors are logged.
    pub(crate) fn discard_statement(&mut self, id: StatementId) {
        if let Err(e) = self.close_statement(id) {
            tracing::warn!(session = self.id, error = %e, "Error closing internal statement");
        }
        self.statements.remove(id.0);
    }

    /// Handle dropped: close locally unless a cursor is still readable.
    pub(crate) fn release_statement(&mut self, id: StatementId) {
        let Some(statement) = self.statements.get(id.0) else {
            return;
        };
        let cursor_open = statement
            .all_cursors()
            .into_iter()
            .any(|c| self.cursor_is_open(c));
        if statement.open && cursor_open {
            if let Some(statement) = self.statements.get_mut(id.0) {
                statement.orphaned = true;
            }
            return;
        }
        self.mark_statement_closed(id);
        self.statements.remove(id.0);
    }

    // ==================== Pooling resets ====================

    /// Cheap reset for statement pooling.
    pub(crate) fn reset_statement_for_reuse(&mut self, id: StatementId) -> Result<()> {
        {
            let statement = self.statement_mut(id)?;
            statement.batch.clear();
            statement.warnings.clear();
        }
        let result = if self.will_tickle_server(id) {
            self.flow_close_result_sets(id)
        } else {
            Ok(())
        };
        self.mark_result_sets_closed(id);
        self.client_cursor_names.retain(|_, owner| *owner != id);
        let keys = self
            .statements
            .get_mut(id.0)
            .and_then(|s| s.keys_statement.take());
        if let Some(keys) = keys {
            self.mark_statement_closed(keys);
            self.statements.remove(keys.0);
        }
        if let Some(statement) = self.statements.get_mut(id.0) {
            statement.reset_user_attributes();
            if statement.kind != StatementKind::Plain {
                statement.reset_parameters();
            }
        }
        result
    }

    /// Reopen a statement that survived pooling; `full` re-prepares it.
    pub(crate) fn reset_statement(&mut self, id: StatementId, full: bool) -> Result<()> {
        self.mark_result_sets_closed(id);
        let reprepare = {
            let statement = self.statement_mut(id)?;
            statement.open = true;
            statement.orphaned = false;
            statement.batch.clear();
            statement.warnings.clear();
            statement.update_count = -1;
            if full {
                statement.reset_user_attributes();
            }
            if statement.kind != StatementKind::Plain {
                statement.reset_parameters();
            }
            full && statement.kind != StatementKind::Plain && statement.sql.is_some()
        };
        if reprepare {
            self.flow_prepare(id)?;
        }
        Ok(())
    }

    // ==================== Execute: shared pieces ====================

    /// Stage the query timeout when it must be (re)sent.
    pub(crate) fn write_timeout(&mut self, id: StatementId) -> Result<bool> {
        let timeout = {
            let statement = self.statement_mut(id)?;
            let send = statement.timeout_dirty
                || (statement.kind == StatementKind::Plain && statement.timeout > 0);
            statement.timeout_dirty = false;
            send.then_some(statement.timeout)
        };
        match timeout {
            Some(timeout) => {
                self.write(Request::SetSpecialRegister {
                    statements: vec![format!("SET STATEMENT_TIMEOUT {timeout}")],
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn check_for_duplicate_cursor_name(&self, id: StatementId) -> Result<()> {
        let Some(name) = self.statement(id)?.cursor_name.as_deref() else {
            return Ok(());
        };
        match self.client_cursor_names.get(name) {
            Some(owner) if *owner != id => Err(Error::usage(
                UsageErrorKind::DuplicateCursorName,
                format!("Cursor name '{name}' is already in use by an open result set"),
            )),
            _ => Ok(()),
        }
    }

    /// The open cursor a positioned update names, staging a repositioning
    /// fetch when that cursor is scrollable.
    pub(crate) fn write_positioning_fetch(&mut self, cursor_name: &str) -> Result<Option<CursorId>> {
        let Some(cursor_id) = self.sections.get_positioned_update_result_set(cursor_name) else {
            return Ok(None);
        };
        let section = self
            .cursors
            .get(cursor_id.0)
            .filter(|c| c.open_on_server && c.result_set_type.is_scrollable() && !c.rowset)
            .map(|c| c.section.clone());
        match section {
            Some(section) => {
                self.write(Request::PositioningFetch { section })?;
                Ok(Some(cursor_id))
            }
            None => Ok(None),
        }
    }

    /// The section for `WHERE CURRENT OF name`, or a cursor-not-found error.
    pub(crate) fn positioned_update_section(&mut self, name: &str, immediate: bool) -> Result<Section> {
        self.sections
            .get_positioned_update_section(name, immediate)?
            .ok_or_else(|| {
                Error::usage(
                    UsageErrorKind::CursorNotFound,
                    format!("Cursor '{name}' not found. Verify that autocommit is off"),
                )
            })
    }

    /// Stage the identity query behind an update, preparing it when the
    /// server no longer holds it.
    pub(crate) fn write_generated_keys_query(&mut self, owner: StatementId) -> Result<KeysPlan> {
        let existing = self
            .statement(owner)?
            .keys_statement
            .filter(|k| self.statement_is_open(*k));
        let keys = match existing {
            Some(keys) => keys,
            None => {
                let options = CursorOptions::with_holdability(Holdability::HoldCursorsOverCommit);
                let keys = self.create_statement_state(StatementKind::Prepared, options, true)?;
                let section = self
                    .sections
                    .get_dynamic_section(Holdability::HoldCursorsOverCommit)?;
                let statement = self.statement_mut(keys)?;
                statement.sql = Some(GENERATED_KEYS_SQL.to_string());
                statement.mode = Some(SqlMode::Query);
                statement.section = Some(section);
                self.statement_mut(owner)?.keys_statement = Some(keys);
                keys
            }
        };
        let (section, prepare, fetch_size, attributes) = {
            let statement = self.statement(keys)?;
            (
                statement.section.clone().ok_or_else(statement_closed)?,
                !statement.open_on_server,
                statement.effective_fetch_size(),
                statement.cursor_attributes.clone(),
            )
        };
        if prepare {
            self.write(Request::Prepare {
                section: section.clone(),
                sql: GENERATED_KEYS_SQL.to_string(),
                attributes,
                describe_input: false,
                describe_output: true,
            })?;
        }
        self.write(Request::OpenQuery {
            section,
            fetch_size,
            parameters: Vec::new(),
        })?;
        Ok(KeysPlan {
            statement: keys,
            prepare_sent: prepare,
        })
    }

    pub(crate) fn read_generated_keys(&mut self, owner: StatementId, plan: KeysPlan) -> Result<()> {
        if plan.prepare_sent {
            let reply = self.read_reply(Some(owner))?;
            if let ReplyBody::Described { columns, .. } = reply.body {
                self.statement_mut(plan.statement)?.columns = columns;
            }
        }
        let reply = self.read_reply(Some(owner))?;
        if reply.is_error() {
            return Ok(());
        }
        if let ReplyBody::QueryOpened(query) = reply.body {
            self.mark_prepared(plan.statement);
            let cursor = self.open_statement_cursor(plan.statement, query, None)?;
            self.statement_mut(owner)?.generated_keys = Some(cursor);
        }
        Ok(())
    }

    /// Create the cursor a statement's query opened and register its names.
    pub(crate) fn open_statement_cursor(
        &mut self,
        id: StatementId,
        query: QueryReply,
        section: Option<Section>,
    ) -> Result<CursorId> {
        let (statement_section, cursor_name) = {
            let statement = self.statement(id)?;
            (statement.section.clone(), statement.cursor_name.clone())
        };
        let (section, owns_section) = match section {
            Some(section) => (section, true),
            None => (statement_section.ok_or_else(statement_closed)?, false),
        };
        let cursor = self.open_cursor(id, section.clone(), owns_section, query)?;
        if !owns_section {
            let server_name = section.server_cursor_name();
            let name = cursor_name.clone().unwrap_or_else(|| server_name.clone());
            self.sections
                .map_cursor_name_to_query_section(server_name.clone(), section.clone());
            self.sections.map_cursor_name_to_result_set(server_name, cursor);
            if let Some(client) = cursor_name {
                self.sections
                    .map_cursor_name_to_query_section(client.clone(), section);
                self.sections.map_cursor_name_to_result_set(client.clone(), cursor);
                self.client_cursor_names.insert(client, id);
            }
            if let Some(state) = self.cursors.get_mut(cursor.0) {
                state.cursor_name = Some(name);
            }
        }
        Ok(cursor)
    }

    /// Read an open-query reply and make its cursor current.
    pub(crate) fn read_open_query(&mut self, id: StatementId) -> Result<()> {
        let reply = self.read_reply(Some(id))?;
        if reply.is_error() {
            return Ok(());
        }
        if let ReplyBody::QueryOpened(query) = reply.body {
            let cursor = self.open_statement_cursor(id, query, None)?;
            let statement = self.statement_mut(id)?;
            statement.result_sets = vec![cursor];
            statement.current = Some(cursor);
            statement.result_set_index = 0;
            statement.open_on_server = true;
        }
        Ok(())
    }

    /// Read a procedure-call reply: update count, outputs and result sets.
    pub(crate) fn read_execute_call(&mut self, id: StatementId) -> Result<()> {
        let reply = self.read_reply(Some(id))?;
        if reply.is_error() {
            return Ok(());
        }
        let ReplyBody::CallExecuted(call) = reply.body else {
            return Ok(());
        };
        let holdability = self.statement(id)?.holdability();
        let mut cursors = Vec::with_capacity(call.result_sets.len());
        for query in call.result_sets {
            let section = self
                .sections
                .get_dynamic_section(query.holdability.unwrap_or(holdability))?;
            cursors.push(self.open_statement_cursor(id, query, Some(section))?);
        }
        let statement = self.statement_mut(id)?;
        statement.update_count = call.update_count;
        statement.outputs = call.outputs;
        statement.was_null = None;
        statement.current = cursors.first().copied();
        statement.result_sets = cursors;
        statement.result_set_index = 0;
        statement.open_on_server = true;
        Ok(())
    }

    /// Read a prepare reply, keeping the described parameters and columns.
    pub(crate) fn read_described(&mut self, id: StatementId) -> Result<()> {
        let reply = self.read_reply(Some(id))?;
        if let ReplyBody::Described {
            parameters,
            columns,
        } = reply.body
        {
            let statement = self.statement_mut(id)?;
            statement.bindings = vec![Binding::Unset; parameters.len()];
            statement.registered = vec![None; parameters.len()];
            statement.parameters = parameters;
            statement.columns = columns;
        }
        Ok(())
    }

    /// Read the reply to an execute or execute-immediate.
    pub(crate) fn read_update(&mut self, id: StatementId) -> Result<()> {
        let reply = self.read_reply(Some(id))?;
        if let ReplyBody::UpdateCount(count) = reply.body {
            if !reply.is_error() {
                self.statement_mut(id)?.update_count = count;
            }
        }
        Ok(())
    }

    /// Post-chain checks shared by every execute path.
    pub(crate) fn finish_execute(&mut self, id: StatementId, method: ExecuteMethod) -> Result<()> {
        let (mode, current, requested, result_set_count, auto_committable) = {
            let statement = self.statement(id)?;
            (
                statement.mode,
                statement.current,
                statement.holdability(),
                statement.result_sets.len(),
                statement.auto_committable,
            )
        };
        if mode != Some(SqlMode::Call) {
            let opened = current
                .and_then(|c| self.cursors.get(c.0))
                .map(|c| c.holdability);
            if let Some(opened) = opened {
                if opened != requested {
                    return Err(Error::usage(
                        UsageErrorKind::HoldabilityMismatch,
                        format!(
                            "Unable to open a result set with the requested holdability {}",
                            requested.code()
                        ),
                    ));
                }
            }
        } else {
            let wrong_count = match method {
                ExecuteMethod::Query => result_set_count != 1,
                ExecuteMethod::Update => result_set_count > 0,
                ExecuteMethod::Execute => false,
            };
            if wrong_count {
                if self.auto_commit {
                    self.flow_rollback()?;
                }
                return Err(Error::usage(
                    UsageErrorKind::ResultSetCount,
                    format!("Stored procedure returned {result_set_count} result sets"),
                ));
            }
            if result_set_count == 0 && auto_committable {
                self.flow_auto_commit()?;
            }
        }
        let statement = self.statement_mut(id)?;
        if method == ExecuteMethod::Update && statement.update_count < 0 {
            statement.update_count = 0;
        }
        Ok(())
    }

    // ==================== Execute: plain statements ====================

    /// Classify and execute SQL text on a plain statement.
    pub(crate) fn execute_sql(
        &mut self,
        id: StatementId,
        sql: &str,
        method: ExecuteMethod,
    ) -> Result<()> {
        self.check_statement_open(id)?;
        let sql = sql::native_sql(sql);
        let mode = sql::sql_mode(&sql);
        {
            let statement = self.statement_mut(id)?;
            if statement.kind != StatementKind::Plain {
                return Err(Error::usage(
                    UsageErrorKind::NotSupported,
                    "SQL text cannot be executed on a prepared statement",
                ));
            }
            statement.warnings.clear();
            if mode == SqlMode::Update(UpdateMode::Insert)
                && statement.options.generated_keys.column_count() > 1
            {
                return Err(Error::usage(
                    UsageErrorKind::InvalidArgument,
                    "Only one generated key column may be requested for an INSERT",
                ));
            }
        }
        check_execute_method(method, mode)?;
        if mode.is_query() {
            self.check_for_duplicate_cursor_name(id)?;
        }
        let positioned = if mode.may_be_positioned() {
            sql::extract_where_current_of(&sql)
        } else {
            None
        };
        let mut new_section = match &positioned {
            Some(p) => self.positioned_update_section(&p.name, true)?,
            None => {
                let holdability = self.statement(id)?.holdability();
                self.sections.get_dynamic_section(holdability)?
            }
        };
        if mode.is_query() {
            new_section.set_client_cursor_name(self.statement(id)?.cursor_name.clone());
        }
        {
            let statement = self.statement_mut(id)?;
            statement.update_count = if mode.is_update() { 0 } else { -1 };
            statement.sql = Some(sql.clone());
            statement.mode = Some(mode);
            statement.positioned_cursor = positioned.as_ref().map(|p| p.name.clone());
        }
        tracing::debug!(session = self.id, sql = %sql, ?mode, "Execute statement");

        let plan = match self.write_execute_sql(id, &sql, mode, positioned.as_ref(), &new_section) {
            Ok(plan) => plan,
            Err(e) => {
                self.sections.free_section(&new_section);
                return Err(e);
            }
        };

        let close_committed = plan.close.auto_commit.is_some();
        self.read_close_result_sets(id, plan.close)?;
        if close_committed {
            self.complete_transaction_start();
        }
        self.mark_result_sets_closed(id);
        self.set_statement_section(id, new_section);
        if plan.timeout_sent {
            self.read_reply(Some(id))?;
        }
        match mode {
            SqlMode::Query => {
                self.read_described(id)?;
                self.read_open_query(id)?;
            }
            SqlMode::Update(_) => {
                if plan.positioning.is_some() {
                    self.read_reply(Some(id))?;
                }
                self.read_update(id)?;
                if let Some(keys) = plan.keys {
                    self.read_generated_keys(id, keys)?;
                }
                if let Some(write) = plan.auto_commit {
                    self.read_auto_commit(write)?;
                }
            }
            SqlMode::Call => {
                self.read_described(id)?;
                self.read_execute_call(id)?;
            }
        }
        self.end_read_chain().map_err(|e| e.with_sql(&sql))?;
        self.finish_execute(id, method)
    }

    fn write_execute_sql(
        &mut self,
        id: StatementId,
        sql: &str,
        mode: SqlMode,
        positioned: Option<&sql::PositionedCursor>,
        new_section: &Section,
    ) -> Result<ExecutePlan> {
        let mut plan = ExecutePlan::default();
        self.begin_chain(ChainScope::InUnitOfWork)?;
        plan.close = self.write_close_result_sets(id, true)?;
        plan.timeout_sent = self.write_timeout(id)?;
        let (attributes, fetch_size, keys_requested, auto_committable) = {
            let statement = self.statement(id)?;
            (
                statement.cursor_attributes.clone(),
                statement.effective_fetch_size(),
                statement.options.generated_keys.is_requested(),
                statement.auto_committable,
            )
        };
        match mode {
            SqlMode::Query => {
                let section = new_section.clone();
                self.write(Request::Prepare {
                    section: section.clone(),
                    sql: sql.to_string(),
                    attributes,
                    describe_input: false,
                    describe_output: true,
                })?;
                self.write(Request::OpenQuery {
                    section,
                    fetch_size,
                    parameters: Vec::new(),
                })?;
                plan.prepare_sent = true;
            }
            SqlMode::Update(_) => {
                match positioned {
                    Some(p) => {
                        plan.positioning = self.write_positioning_fetch(&p.name)?;
                        self.write(Request::ExecuteImmediate {
                            section: new_section.clone(),
                            sql: positioned_sql(p, new_section),
                        })?;
                    }
                    None => {
                        self.write(Request::ExecuteImmediate {
                            section: new_section.clone(),
                            sql: sql.to_string(),
                        })?;
                        if keys_requested && mode.may_generate_keys() {
                            plan.keys = Some(self.write_generated_keys_query(id)?);
                        }
                    }
                }
                if self.auto_commit && auto_committable {
                    plan.auto_commit = self.write_auto_commit()?;
                }
            }
            SqlMode::Call => {
                self.write(Request::Prepare {
                    section: new_section.clone(),
                    sql: sql.to_string(),
                    attributes,
                    describe_input: false,
                    describe_output: true,
                })?;
                self.write(Request::ExecuteCall {
                    section: new_section.clone(),
                    parameters: Vec::new(),
                    fetch_size,
                    output_expected: false,
                })?;
                plan.prepare_sent = true;
            }
        }
        self.flow(ChainScope::InUnitOfWork)?;
        Ok(plan)
    }

    // ==================== Multiple results ====================

    pub(crate) fn more_results(&mut self, id: StatementId, current: MoreResults) -> Result<bool> {
        self.check_statement_open(id)?;
        let (cursors, index, current_cursor) = {
            let statement = self.statement(id)?;
            (statement.result_sets.clone(), statement.result_set_index, statement.current)
        };
        match current {
            MoreResults::CloseCurrent => {
                if let Some(cursor) = current_cursor {
                    self.close_cursor(cursor)?;
                }
            }
            MoreResults::KeepCurrent => {}
            MoreResults::CloseAll => {
                let retrieved: Vec<CursorId> = cursors
                    .iter()
                    .take(index + 1)
                    .copied()
                    .filter(|c| self.cursor_is_open(*c))
                    .collect();
                self.close_retrieved_cursors(id, &retrieved)?;
            }
        }
        let statement = self.statement_mut(id)?;
        statement.update_count = -1;
        let next = index + 1;
        if next < cursors.len() {
            statement.result_set_index = next;
            statement.current = Some(cursors[next]);
            Ok(true)
        } else {
            statement.result_set_index = cursors.len();
            statement.current = None;
            Ok(false)
        }
    }

    /// Close several cursors in one chain without auto-commit.
    fn close_retrieved_cursors(&mut self, id: StatementId, cursors: &[CursorId]) -> Result<()> {
        self.begin_chain(ChainScope::InUnitOfWork)?;
        let mut closes = Vec::new();
        for cursor_id in cursors {
            let section = self
                .cursors
                .get(cursor_id.0)
                .filter(|c| c.open_on_server)
                .map(|c| c.section.clone());
            if let Some(section) = section {
                self.write(Request::CloseCursor { section })?;
                closes.push(*cursor_id);
            }
        }
        self.flow(ChainScope::InUnitOfWork)?;
        for cursor_id in cursors {
            if closes.contains(cursor_id) {
                let reply = self.read_reply(Some(id))?;
                if reply.is_error() {
                    continue;
                }
            }
            self.mark_cursor_closed(*cursor_id, true);
        }
        self.end_read_chain()
    }

    // ==================== Attribute setters ====================

    pub(crate) fn set_fetch_size(&mut self, id: StatementId, rows: i32) -> Result<()> {
        self.check_statement_open(id)?;
        let statement = self.statement_mut(id)?;
        let rows = u32::try_from(rows).map_err(|_| invalid_argument("fetch size", rows))?;
        if statement.max_rows != 0 && u64::from(rows) > statement.max_rows {
            return Err(Error::usage(
                UsageErrorKind::InvalidArgument,
                format!(
                    "Fetch size {rows} exceeds the maximum row count {}",
                    statement.max_rows
                ),
            ));
        }
        statement.fetch_size = rows;
        Ok(())
    }

    pub(crate) fn set_cursor_name(&mut self, id: StatementId, name: &str) -> Result<()> {
        self.check_statement_open(id)?;
        if name.is_empty() {
            return Err(Error::usage(
                UsageErrorKind::InvalidArgument,
                "Cursor name must not be empty",
            ));
        }
        let current_open = self
            .statement(id)?
            .current
            .is_some_and(|c| self.cursor_is_open(c));
        if current_open {
            return Err(Error::usage(
                UsageErrorKind::OpenResultSet,
                "Cannot change the cursor name while the statement's result set is open",
            ));
        }
        let statement = self.statement_mut(id)?;
        statement.cursor_name = Some(name.to_string());
        if let Some(section) = statement.section.as_mut() {
            section.set_client_cursor_name(Some(name.to_string()));
        }
        Ok(())
    }
}

/// SQL for a positioned update, naming the server cursor when the caller
/// used its own cursor name.
pub(crate) fn positioned_sql(positioned: &sql::PositionedCursor, section: &Section) -> String {
    match (section.client_cursor_name(), section.positioned_cursor_name()) {
        (Some(client), Some(server)) if client == positioned.name => {
            sql::substitute_cursor_name(&positioned.sql, client, server)
        }
        _ => positioned.sql.clone(),
    }
}

fn invalid_argument(what: &str, value: impl std::fmt::Display) -> Error {
    Error::usage(
        UsageErrorKind::InvalidArgument,
        format!("Invalid value {value} for {what}"),
    )
}

/// A statement created by a [`Session`].
///
/// Dropping the handle releases client-side state; an open cursor keeps
/// the statement alive until that cursor closes.
#[derive(Debug)]
pub struct Statement {
    pub(crate) session: Session,
    pub(crate) id: StatementId,
}

impl Statement {
    pub(crate) fn new(session: Session, id: StatementId) -> Self {
        Self { session, id }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Execute SQL text; `true` when a result set is available.
    pub fn execute(&self, sql: &str) -> Result<bool> {
        let mut core = self.session.lock()?;
        core.execute_sql(self.id, sql, ExecuteMethod::Execute)?;
        Ok(core.statement(self.id)?.current.is_some())
    }

    pub fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        let cursor = {
            let mut core = self.session.lock()?;
            core.execute_sql(self.id, sql, ExecuteMethod::Query)?;
            core.statement(self.id)?.current
        };
        cursor
            .map(|c| ResultSet::new(self.session.clone(), c))
            .ok_or_else(|| Error::usage(UsageErrorKind::ResultSetCount, "Query opened no result set"))
    }

    pub fn execute_update(&self, sql: &str) -> Result<i64> {
        let mut core = self.session.lock()?;
        core.execute_sql(self.id, sql, ExecuteMethod::Update)?;
        Ok(core.statement(self.id)?.update_count)
    }

    /// The current result set, if the last execution produced one.
    pub fn result_set(&self) -> Result<Option<ResultSet>> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        Ok(core
            .statement(self.id)?
            .current
            .map(|c| ResultSet::new(self.session.clone(), c)))
    }

    /// Update count of the last execution; -1 when the current result is a cursor.
    pub fn update_count(&self) -> Result<i64> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        let statement = core.statement(self.id)?;
        Ok(if statement.current.is_some() {
            -1
        } else {
            statement.update_count
        })
    }

    /// Advance to the next result of a procedure call.
    pub fn more_results(&self, current: MoreResults) -> Result<bool> {
        self.session.lock()?.more_results(self.id, current)
    }

    pub fn generated_keys(&self) -> Result<Option<ResultSet>> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        Ok(core
            .statement(self.id)?
            .generated_keys
            .map(|c| ResultSet::new(self.session.clone(), c)))
    }

    // ==================== Attributes ====================

    pub fn options(&self) -> Result<CursorOptions> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        Ok(core.statement(self.id)?.options.clone())
    }

    pub fn result_set_type(&self) -> Result<ResultSetType> {
        Ok(self.options()?.result_set_type)
    }

    pub fn concurrency(&self) -> Result<Concurrency> {
        Ok(self.options()?.concurrency)
    }

    pub fn holdability(&self) -> Result<Holdability> {
        Ok(self.options()?.holdability)
    }

    pub fn generated_keys_mode(&self) -> Result<GeneratedKeys> {
        Ok(self.options()?.generated_keys)
    }

    pub fn set_max_rows(&self, max: i64) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        let max = u64::try_from(max).map_err(|_| invalid_argument("max rows", max))?;
        core.statement_mut(self.id)?.max_rows = max;
        Ok(())
    }

    pub fn max_rows(&self) -> Result<u64> {
        self.with_state(|s| s.max_rows)
    }

    pub fn set_max_field_size(&self, max: i32) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        let max = u32::try_from(max).map_err(|_| invalid_argument("max field size", max))?;
        core.statement_mut(self.id)?.max_field_size = max;
        Ok(())
    }

    pub fn max_field_size(&self) -> Result<u32> {
        self.with_state(|s| s.max_field_size)
    }

    /// Seconds; sent as a special register ahead of the next execute.
    pub fn set_query_timeout(&self, seconds: i32) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        let seconds =
            u32::try_from(seconds).map_err(|_| invalid_argument("query timeout", seconds))?;
        let statement = core.statement_mut(self.id)?;
        if statement.timeout != seconds {
            statement.timeout = seconds;
            statement.timeout_dirty = true;
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Result<u32> {
        self.with_state(|s| s.timeout)
    }

    pub fn set_fetch_size(&self, rows: i32) -> Result<()> {
        self.session.lock()?.set_fetch_size(self.id, rows)
    }

    pub fn fetch_size(&self) -> Result<u32> {
        self.with_state(|s| s.fetch_size)
    }

    pub fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        let statement = core.statement_mut(self.id)?;
        if direction != FetchDirection::Forward
            && statement.options.result_set_type == ResultSetType::ForwardOnly
        {
            return Err(invalid_argument("fetch direction", direction.code()));
        }
        statement.fetch_direction = direction;
        Ok(())
    }

    pub fn fetch_direction(&self) -> Result<FetchDirection> {
        self.with_state(|s| s.fetch_direction)
    }

    pub fn set_cursor_name(&self, name: &str) -> Result<()> {
        self.session.lock()?.set_cursor_name(self.id, name)
    }

    pub fn set_poolable(&self, poolable: bool) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        core.statement_mut(self.id)?.poolable = poolable;
        Ok(())
    }

    pub fn is_poolable(&self) -> Result<bool> {
        self.with_state(|s| s.poolable)
    }

    /// Close this statement once its last result set is closed.
    pub fn close_on_completion(&self) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        core.statement_mut(self.id)?.close_on_completion = true;
        Ok(())
    }

    pub fn is_close_on_completion(&self) -> Result<bool> {
        self.with_state(|s| s.close_on_completion)
    }

    /// Not available on this protocol tier.
    pub fn cancel(&self) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        Err(Error::usage(
            UsageErrorKind::NotSupported,
            "Statement cancel is not supported",
        ))
    }

    pub fn warnings(&self) -> Result<Vec<Warning>> {
        self.with_state(|s| s.warnings.clone())
    }

    pub fn clear_warnings(&self) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        core.statement_mut(self.id)?.warnings.clear();
        Ok(())
    }

    /// Close the statement and every result set it owns.
    pub fn close(&self) -> Result<()> {
        self.session.lock()?.close_statement(self.id)
    }

    pub fn is_closed(&self) -> bool {
        self.session
            .lock()
            .map_or(true, |core| !core.statement_is_open(self.id))
    }

    /// Cheap reset for statement pooling: closes cursors, clears the batch
    /// and warnings, restores default attributes.
    pub fn reset_for_reuse(&self) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        core.reset_statement_for_reuse(self.id)
    }

    fn with_state<T>(&self, read: impl FnOnce(&StatementState) -> T) -> Result<T> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id)?;
        Ok(read(core.statement(self.id)?))
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if let Ok(mut core) = self.session.lock() {
            core.release_statement(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Reply, RequestKind};
    use crate::scripted::ScriptedAgent;
    use drda_core::SessionConfig;

    fn open() -> (Session, ScriptedAgent) {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        (session, wire)
    }

    #[test]
    fn test_cursor_attributes() {
        let options = CursorOptions::with_holdability(Holdability::HoldCursorsOverCommit);
        assert_eq!(cursor_attributes(&options).as_deref(), Some("WITH HOLD"));
        let options = CursorOptions::with_holdability(Holdability::CloseCursorsAtCommit)
            .result_set_type(ResultSetType::ScrollInsensitive)
            .concurrency(Concurrency::Updatable);
        assert_eq!(
            cursor_attributes(&options).as_deref(),
            Some("INSENSITIVE SCROLL FOR UPDATE")
        );
        let options = CursorOptions::with_holdability(Holdability::CloseCursorsAtCommit);
        assert_eq!(cursor_attributes(&options), None);
    }

    #[test]
    fn test_wrong_execute_method_fails_before_io() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        let err = stmt.execute_query("DELETE FROM T").unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::WrongExecuteMethod));
        let err = stmt.execute_update("SELECT * FROM T").unwrap_err();
        assert_eq!(err.sqlstate(), Some("X0Y78"));
        assert_eq!(wire.flow_count(), 0);
    }

    #[test]
    fn test_plain_update_chains_auto_commit() {
        let (session, wire) = open();
        wire.push_reply(RequestKind::ExecuteImmediate, Reply::update_count(4));
        let stmt = session.create_statement().unwrap();
        assert_eq!(stmt.execute_update("UPDATE T SET A = 1").unwrap(), 4);
        assert_eq!(
            wire.last_chain().unwrap().kinds(),
            vec![RequestKind::ExecuteImmediate, RequestKind::Commit]
        );
        assert!(!session.in_unit_of_work().unwrap());
        assert_eq!(session.transaction_id().unwrap(), 1);
    }

    #[test]
    fn test_ddl_update_count_is_zero() {
        let (session, wire) = open();
        wire.push_reply(RequestKind::ExecuteImmediate, Reply::update_count(-1));
        let stmt = session.create_statement().unwrap();
        assert_eq!(stmt.execute_update("CREATE TABLE T (A INT)").unwrap(), 0);
    }

    #[test]
    fn test_attribute_validation() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        assert!(stmt.set_max_rows(-1).is_err());
        assert!(stmt.set_query_timeout(-5).is_err());
        assert!(stmt.set_max_field_size(-1).is_err());
        stmt.set_max_rows(10).unwrap();
        assert!(stmt.set_fetch_size(11).is_err());
        stmt.set_fetch_size(10).unwrap();
        assert!(stmt.set_fetch_direction(FetchDirection::Reverse).is_err());
        assert!(stmt.set_cursor_name("").is_err());
        assert_eq!(
            stmt.cancel().unwrap_err().usage_kind(),
            Some(UsageErrorKind::NotSupported)
        );
        assert!(!stmt.is_poolable().unwrap());
        assert_eq!(wire.flow_count(), 0);
    }

    #[test]
    fn test_scroll_sensitive_downgraded_with_warning() {
        let (session, _wire) = open();
        let stmt = session
            .create_statement_with(
                CursorOptions::default().result_set_type(ResultSetType::ScrollSensitive),
            )
            .unwrap();
        assert_eq!(
            stmt.result_set_type().unwrap(),
            ResultSetType::ScrollInsensitive
        );
        let warnings = session.warnings().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].sqlstate, "01J02");
    }

    #[test]
    fn test_timeout_sent_ahead_of_execute() {
        let (session, wire) = open();
        let stmt = session.create_statement().unwrap();
        stmt.set_query_timeout(30).unwrap();
        stmt.execute_update("DELETE FROM T").unwrap();
        let chain = wire.last_chain().unwrap();
        assert_eq!(
            chain.requests[0],
            Request::SetSpecialRegister {
                statements: vec!["SET STATEMENT_TIMEOUT 30".to_string()]
            }
        );
    }

    #[test]
    fn test_closed_statement_rejects_calls() {
        let (session, _wire) = open();
        let stmt = session.create_statement().unwrap();
        stmt.close().unwrap();
        assert!(stmt.is_closed());
        let err = stmt.execute("VALUES 1").unwrap_err();
        assert_eq!(err.sqlstate(), Some("XJ012"));
        stmt.close().unwrap();
    }
}
