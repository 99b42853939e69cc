//! Prepared statements: prepare/describe at creation, typed 1-based
//! parameter binding, and the execute choreography on an existing section.

use crate::agent::{ChainScope, ParameterDescriptor, Request};
use crate::cursor::ResultSet;
use crate::session::SessionCore;
use crate::sql::{self, SqlMode, UpdateMode};
use crate::statement::{
    Binding, ExecuteMethod, ExecutePlan, Statement, StatementKind, input_types, positioned_sql,
    statement_closed,
};
use crate::registry::StatementId;
use drda_core::{
    ColumnDescriptor, CursorOptions, Error, Result, SqlType, TypeError, UsageErrorKind, Value,
};
use std::ops::Deref;

fn check_keys_request(mode: SqlMode, options: &CursorOptions) -> Result<()> {
    if mode == SqlMode::Update(UpdateMode::Insert) && options.generated_keys.column_count() > 1 {
        return Err(Error::usage(
            UsageErrorKind::InvalidArgument,
            "Only one generated key column may be requested for an INSERT",
        ));
    }
    Ok(())
}

fn missing_parameter() -> Error {
    Error::usage(
        UsageErrorKind::MissingParameter,
        "At least one parameter to the current statement is uninitialized",
    )
}

impl SessionCore {
    /// Create and prepare a statement; a failed prepare leaves nothing behind.
    pub(crate) fn prepare_statement_state(
        &mut self,
        sql: &str,
        options: CursorOptions,
        kind: StatementKind,
        internal: bool,
    ) -> Result<StatementId> {
        self.check_open()?;
        let sql = sql::native_sql(sql);
        let mode = sql::sql_mode(&sql);
        check_keys_request(mode, &options)?;
        let id = self.create_statement_state(kind, options, internal)?;
        {
            let statement = self.statement_mut(id)?;
            statement.positioned_cursor = if mode.may_be_positioned() {
                sql::extract_where_current_of(&sql).map(|p| p.name)
            } else {
                None
            };
            statement.sql = Some(sql.clone());
            statement.mode = Some(mode);
        }
        tracing::debug!(session = self.id, sql = %sql, ?mode, "Prepare statement");
        if let Err(e) = self.flow_prepare(id) {
            self.mark_statement_closed(id);
            self.statements.remove(id.0);
            return Err(e.with_sql(&sql));
        }
        Ok(id)
    }

    /// Internal statement with no auto-commit of its own.
    pub(crate) fn prepare_internal(&mut self, sql: &str, options: CursorOptions) -> Result<StatementId> {
        self.prepare_statement_state(sql, options, StatementKind::Prepared, true)
    }

    /// Allocate the section and flow prepare plus describe input/output.
    pub(crate) fn flow_prepare(&mut self, id: StatementId) -> Result<()> {
        let (sql, mode, positioned, holdability, attributes, reprepare) = {
            let statement = self.statement(id)?;
            (
                statement.sql.clone().ok_or_else(statement_closed)?,
                statement.mode.unwrap_or(SqlMode::Update(UpdateMode::Other)),
                statement.positioned_cursor.clone(),
                statement.holdability(),
                statement.cursor_attributes.clone(),
                statement.section.is_some(),
            )
        };
        let (section, text) = match positioned {
            Some(name) => {
                let section = self.positioned_update_section(&name, false)?;
                let text = sql::extract_where_current_of(&sql)
                    .map_or_else(|| sql.clone(), |p| positioned_sql(&p, &section));
                (section, text)
            }
            None => (self.sections.get_dynamic_section(holdability)?, sql.clone()),
        };
        self.set_statement_section(id, section.clone());
        let attributes = if mode.is_query() || mode.is_call() {
            attributes
        } else {
            None
        };

        self.begin_chain(ChainScope::InUnitOfWork)?;
        self.write(Request::Prepare {
            section,
            sql: text,
            attributes,
            describe_input: true,
            describe_output: true,
        })?;
        self.flow(ChainScope::InUnitOfWork)?;
        self.read_described(id)?;
        self.end_read_chain()?;

        self.mark_prepared(id);
        let session_id = self.id;
        let statement = self.statement_mut(id)?;
        // The server forgets the statement timeout with the old statement.
        if reprepare && statement.timeout > 0 {
            statement.timeout_dirty = true;
        }
        tracing::trace!(
            session = session_id,
            parameters = statement.parameters.len(),
            "Statement prepared"
        );
        Ok(())
    }

    // ==================== Binding ====================

    fn check_parameter_index(&self, id: StatementId, index: usize) -> Result<&ParameterDescriptor> {
        let statement = self.statement(id)?;
        if statement.parameters.is_empty() {
            return Err(Error::usage(
                UsageErrorKind::NoInputParameters,
                "No input parameters",
            ));
        }
        if index == 0 || index > statement.parameters.len() {
            return Err(Error::usage(
                UsageErrorKind::InvalidParameterIndex,
                format!(
                    "The parameter position '{index}' is out of range. The number of parameters for this prepared statement is '{}'",
                    statement.parameters.len()
                ),
            ));
        }
        Ok(&statement.parameters[index - 1])
    }

    pub(crate) fn bind(&mut self, id: StatementId, index: usize, value: Value) -> Result<()> {
        self.check_statement_open(id)?;
        let descriptor = self.check_parameter_index(id, index)?;
        if !descriptor.mode.needs_input() {
            return Err(Error::usage(
                UsageErrorKind::InvalidParameterIndex,
                format!("Parameter {index} is an OUT parameter and cannot be set"),
            ));
        }
        if !descriptor.sql_type.accepts(&value) {
            return Err(Error::Type(TypeError {
                expected: descriptor.sql_type.sql_name(),
                actual: value.type_name().to_string(),
                parameter: Some(index),
            }));
        }
        self.statement_mut(id)?.bindings[index - 1] = Binding::Value(value);
        Ok(())
    }

    pub(crate) fn bind_null(&mut self, id: StatementId, index: usize, declared: SqlType) -> Result<()> {
        self.check_statement_open(id)?;
        let descriptor = self.check_parameter_index(id, index)?;
        if !descriptor.sql_type.accepts_null_of(declared) {
            return Err(Error::Type(TypeError {
                expected: descriptor.sql_type.sql_name(),
                actual: declared.sql_name().to_string(),
                parameter: Some(index),
            }));
        }
        self.statement_mut(id)?.bindings[index - 1] = Binding::Null(declared);
        Ok(())
    }

    /// Bind every parameter of an internal statement without type checks.
    pub(crate) fn bind_internal(&mut self, id: StatementId, values: Vec<Value>) -> Result<()> {
        let statement = self.statement_mut(id)?;
        if values.len() != statement.parameters.len() {
            return Err(Error::usage(
                UsageErrorKind::InvalidParameterIndex,
                format!(
                    "{} values bound to {} parameters",
                    values.len(),
                    statement.parameters.len()
                ),
            ));
        }
        statement.bindings = values.into_iter().map(Binding::Value).collect();
        Ok(())
    }

    /// Every slot is set, or registered as a pure OUT parameter.
    pub(crate) fn check_parameters_set(&self, id: StatementId) -> Result<()> {
        let statement = self.statement(id)?;
        let complete = statement
            .parameters
            .iter()
            .enumerate()
            .all(|(i, descriptor)| {
                statement.bindings.get(i).is_some_and(Binding::is_set)
                    || (!descriptor.mode.needs_input()
                        && statement.registered.get(i).is_some_and(Option::is_some))
            });
        if complete { Ok(()) } else { Err(missing_parameter()) }
    }

    pub(crate) fn parameter_values(&self, id: StatementId) -> Result<Vec<Value>> {
        Ok(self
            .statement(id)?
            .bindings
            .iter()
            .map(Binding::to_value)
            .collect())
    }

    pub(crate) fn parameter_types(&self, id: StatementId) -> Result<Vec<SqlType>> {
        let statement = self.statement(id)?;
        Ok(input_types(&statement.bindings, &statement.parameters))
    }

    // ==================== Execute ====================

    /// Execute a prepared statement with its current bindings.
    pub(crate) fn execute_prepared(&mut self, id: StatementId, method: ExecuteMethod) -> Result<()> {
        self.check_statement_open(id)?;
        let (mode, sql) = {
            let statement = self.statement_mut(id)?;
            statement.warnings.clear();
            (
                statement.mode.unwrap_or(SqlMode::Update(UpdateMode::Other)),
                statement.sql.clone().unwrap_or_default(),
            )
        };
        crate::statement::check_execute_method(method, mode)?;
        self.check_parameters_set(id)?;
        self.statement_mut(id)?.update_count = if mode.is_update() { 0 } else { -1 };
        if mode.is_query() {
            self.check_for_duplicate_cursor_name(id)?;
        }
        let parameters = self.parameter_values(id)?;
        tracing::debug!(session = self.id, sql = %sql, ?mode, "Execute prepared statement");

        let plan = self.write_execute_prepared(id, mode, parameters)?;

        let close_committed = plan.close.auto_commit.is_some();
        self.read_close_result_sets(id, plan.close)?;
        if close_committed {
            self.complete_transaction_start();
        }
        self.mark_result_sets_closed(id);
        if plan.timeout_sent {
            self.read_reply(Some(id))?;
        }
        match mode {
            SqlMode::Query => self.read_open_query(id)?,
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
            SqlMode::Call => self.read_execute_call(id)?,
        }
        self.end_read_chain().map_err(|e| e.with_sql(&sql))?;
        self.finish_execute(id, method)
    }

    fn write_execute_prepared(
        &mut self,
        id: StatementId,
        mode: SqlMode,
        parameters: Vec<Value>,
    ) -> Result<ExecutePlan> {
        let (section, fetch_size, positioned, keys_requested, auto_committable, output_expected) = {
            let statement = self.statement(id)?;
            (
                statement.section.clone().ok_or_else(statement_closed)?,
                statement.effective_fetch_size(),
                statement.positioned_cursor.clone(),
                statement.options.generated_keys.is_requested(),
                statement.auto_committable,
                statement.registered.iter().any(Option::is_some),
            )
        };
        let mut plan = ExecutePlan::default();
        self.begin_chain(ChainScope::InUnitOfWork)?;
        plan.close = self.write_close_result_sets(id, true)?;
        plan.timeout_sent = self.write_timeout(id)?;
        match mode {
            SqlMode::Query => {
                self.write(Request::OpenQuery {
                    section,
                    fetch_size,
                    parameters,
                })?;
            }
            SqlMode::Update(_) => {
                if let Some(name) = positioned.as_deref() {
                    plan.positioning = self.write_positioning_fetch(name)?;
                }
                let types = self.parameter_types(id)?;
                self.write(Request::Execute {
                    section,
                    parameters,
                    types,
                })?;
                if keys_requested && mode.may_generate_keys() && positioned.is_none() {
                    plan.keys = Some(self.write_generated_keys_query(id)?);
                }
                if auto_committable && self.will_auto_commit_generate_flow() {
                    plan.auto_commit = self.write_auto_commit()?;
                }
            }
            SqlMode::Call => {
                self.write(Request::ExecuteCall {
                    section,
                    parameters,
                    fetch_size,
                    output_expected,
                })?;
            }
        }
        self.flow(ChainScope::InUnitOfWork)?;
        Ok(plan)
    }
}

/// A statement prepared once and executed with bound parameters.
///
/// Dereferences to [`Statement`] for the attribute setters; the SQL-text
/// execute methods are replaced by parameterless ones.
#[derive(Debug)]
pub struct PreparedStatement {
    inner: Statement,
}

impl Deref for PreparedStatement {
    type Target = Statement;

    fn deref(&self) -> &Statement {
        &self.inner
    }
}

impl PreparedStatement {
    pub(crate) fn new(inner: Statement) -> Self {
        Self { inner }
    }

    pub(crate) fn id(&self) -> StatementId {
        self.inner.id
    }

    /// Execute; `true` when a result set is available.
    pub fn execute(&self) -> Result<bool> {
        let mut core = self.session.lock()?;
        core.execute_prepared(self.id(), ExecuteMethod::Execute)?;
        Ok(core.statement(self.id())?.current.is_some())
    }

    pub fn execute_query(&self) -> Result<ResultSet> {
        let cursor = {
            let mut core = self.session.lock()?;
            core.execute_prepared(self.id(), ExecuteMethod::Query)?;
            core.statement(self.id())?.current
        };
        cursor
            .map(|c| ResultSet::new(self.session.clone(), c))
            .ok_or_else(|| Error::usage(UsageErrorKind::ResultSetCount, "Query opened no result set"))
    }

    pub fn execute_update(&self) -> Result<i64> {
        let mut core = self.session.lock()?;
        core.execute_prepared(self.id(), ExecuteMethod::Update)?;
        Ok(core.statement(self.id())?.update_count)
    }

    /// Bind `value` to the 1-based parameter `index`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.session.lock()?.bind(self.id(), index, value.into())
    }

    /// Bind a null declared as `sql_type`.
    pub fn set_null(&self, index: usize, sql_type: SqlType) -> Result<()> {
        self.session.lock()?.bind_null(self.id(), index, sql_type)
    }

    pub fn clear_parameters(&self) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id())?;
        core.statement_mut(self.id())?.bindings.fill(Binding::Unset);
        Ok(())
    }

    pub fn parameter_count(&self) -> Result<usize> {
        Ok(self.parameters()?.len())
    }

    /// Parameter descriptors from describe-input.
    pub fn parameters(&self) -> Result<Vec<ParameterDescriptor>> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id())?;
        Ok(core.statement(self.id())?.parameters.clone())
    }

    /// Result columns from describe-output; empty for non-queries.
    pub fn columns(&self) -> Result<Vec<ColumnDescriptor>> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id())?;
        Ok(core.statement(self.id())?.columns.clone())
    }

    pub fn sql(&self) -> Result<String> {
        let mut core = self.session.lock()?;
        core.check_statement_open(self.id())?;
        Ok(core.statement(self.id())?.sql.clone().unwrap_or_default())
    }

    /// Statement pooling reset; `full` also re-prepares on a fresh section.
    pub fn reset(&self, full: bool) -> Result<()> {
        let mut core = self.session.lock()?;
        core.check_open()?;
        core.reset_statement(self.id(), full)
    }
}
