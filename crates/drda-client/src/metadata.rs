//! Server capabilities and database metadata.
//!
//! Capabilities are derived once from the product level the server reports
//! at connect time. Database metadata comes from two places:
//!
//! - A single `CALL SYSIBM.MetaData()` whose one row is cached per session
//!   and backs every scalar getter (`supports_*`, `max_*`, keyword lists).
//! - Catalog procedures (`SYSIBM.SQLTABLES` and friends) that return a
//!   result set the caller reads like any other.

use crate::cursor::ResultSet;
use crate::registry::{CursorId, StatementId};
use crate::session::{Session, SessionCore};
use crate::statement::ExecuteMethod;
use drda_core::{
    Concurrency, CursorOptions, Error, IsolationLevel, ProtocolErrorKind, Result, ResultSetType,
    SqlType, UsageErrorKind, Value,
};
use std::collections::HashMap;
use std::fmt;

/// Product identifier of the network server this driver speaks to.
pub const SERVER_PRODUCT_ID: &str = "CSS";

/// Number of values cached from the metadata info row.
pub const METADATA_INFO_COUNT: usize = 108;

const ROUTINE_NOT_FOUND: i32 = -440;
const LOAD_MODULE_NOT_FOUND: i32 = -444;

// ============================================================================
// Product level and capabilities
// ============================================================================

/// Server product level, `PPPVVRRM`: product id, version, release, modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLevel {
    pub product_id: String,
    pub version: u8,
    pub release: u8,
    pub modification: u8,
}

impl ProductLevel {
    pub fn parse(level: &str) -> Option<Self> {
        if !level.is_ascii() {
            return None;
        }
        let number = |range: std::ops::Range<usize>| level.get(range)?.parse::<u8>().ok();
        Some(Self {
            product_id: level.get(0..3)?.to_string(),
            version: number(3..5)?,
            release: number(5..7)?,
            modification: number(7..8)?,
        })
    }

    pub fn at_least(&self, version: u8, release: u8, modification: u8) -> bool {
        (self.version, self.release, self.modification) >= (version, release, modification)
    }
}

impl fmt::Display for ProductLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02}{:02}{}",
            self.product_id, self.version, self.release, self.modification
        )
    }
}

/// Feature switches negotiated from the server product level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// `None` when the server is not a recognized network server.
    pub product_level: Option<ProductLevel>,
    /// Server closes forward-only cursors at end of data.
    pub query_close_implicit: bool,
    pub layer_b_streaming: bool,
    /// Isolation and schema changes piggyback on replies.
    pub session_data_caching: bool,
    pub udts: bool,
    pub timestamp_nanos: bool,
    pub extdta_abort: bool,
    /// Metadata booleans arrive as BOOLEAN rather than integers.
    pub boolean_values: bool,
    pub boolean_parameters: bool,
    pub long_rdbnam: bool,
}

impl ServerCapabilities {
    /// Capabilities for a reported level; unknown servers get none.
    pub fn from_product_level(level: &str) -> Self {
        let Some(parsed) = ProductLevel::parse(level).filter(|p| p.product_id == SERVER_PRODUCT_ID)
        else {
            tracing::debug!(level, "Unrecognized server product level");
            return Self::default();
        };
        let at = |version, release| parsed.at_least(version, release, 0);
        Self {
            query_close_implicit: at(10, 2),
            layer_b_streaming: at(10, 3),
            session_data_caching: at(10, 4),
            udts: at(10, 6),
            timestamp_nanos: at(10, 6),
            extdta_abort: at(10, 6),
            boolean_values: at(10, 7),
            boolean_parameters: at(10, 8),
            long_rdbnam: at(10, 11),
            product_level: Some(parsed),
        }
    }

    fn at_least(&self, version: u8, release: u8) -> bool {
        self.product_level
            .as_ref()
            .is_some_and(|p| p.at_least(version, release, 0))
    }
}

/// Per-session cache of the metadata info row and the lists parsed from it.
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    info: Option<Vec<Value>>,
    lists: HashMap<usize, CodeList>,
}

impl MetadataCache {
    pub fn is_loaded(&self) -> bool {
        self.info.is_some()
    }
}

// ============================================================================
// Metadata info row
// ============================================================================

mod info {
    pub const SUPPORTS_CONVERT_BETWEEN: usize = 24;
    pub const DEFAULT_TRANSACTION_ISOLATION: usize = 88;
    pub const SUPPORTS_TRANSACTION_ISOLATION_LEVEL: usize = 90;
    pub const SUPPORTS_RESULT_SET_TYPE: usize = 95;
    pub const SUPPORTS_RESULT_SET_CONCURRENCY: usize = 96;
    pub const OWN_UPDATES_ARE_VISIBLE: usize = 97;
    pub const OWN_DELETES_ARE_VISIBLE: usize = 98;
    pub const OWN_INSERTS_ARE_VISIBLE: usize = 99;
    pub const OTHERS_UPDATES_ARE_VISIBLE: usize = 100;
    pub const OTHERS_DELETES_ARE_VISIBLE: usize = 101;
    pub const OTHERS_INSERTS_ARE_VISIBLE: usize = 102;
    pub const UPDATES_ARE_DETECTED: usize = 103;
    pub const DELETES_ARE_DETECTED: usize = 104;
    pub const INSERTS_ARE_DETECTED: usize = 105;
}

fn unexpected_info(index: usize, value: &Value) -> Error {
    Error::protocol(
        ProtocolErrorKind::UnexpectedReply,
        format!("Metadata info {index} has unexpected value {value:?}"),
    )
}

/// A code list from the metadata info row.
///
/// Plain lists are comma separated (`1003,1004`). Paired lists group a head
/// code with its members and separate groups with semicolons
/// (`1003,1007,1008;1004,1007`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeList {
    groups: Vec<Vec<i32>>,
}

impl CodeList {
    pub fn parse(list: &str) -> Self {
        let groups = list
            .split(';')
            .map(|group| {
                group
                    .split(',')
                    .filter_map(|t| t.trim().parse::<i32>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();
        Self { groups }
    }

    /// Whether any group names `code`.
    pub fn contains(&self, code: i32) -> bool {
        self.groups.iter().flatten().any(|c| *c == code)
    }

    /// Whether the group headed by `head` lists `member`.
    pub fn pairs(&self, head: i32, member: i32) -> bool {
        self.groups.iter().any(|group| {
            group
                .split_first()
                .is_some_and(|(first, rest)| *first == head && rest.contains(&member))
        })
    }
}

impl SessionCore {
    /// Flow `CALL SYSIBM.MetaData()` and cache its single row.
    fn metadata_info_call(&mut self) -> Result<()> {
        let id = self.prepare_catalog_statement("SYSIBM.MetaData()")?;
        let result = self.read_metadata_row(id);
        self.discard_statement(id);
        let values = result?;
        tracing::debug!(session = self.id, count = values.len(), "Cached metadata info");
        self.metadata.info = Some(values);
        Ok(())
    }

    fn read_metadata_row(&mut self, id: StatementId) -> Result<Vec<Value>> {
        let cursor = self.execute_catalog_statement(id, Vec::new())?;
        let row = self.fetch_next(cursor)?;
        self.close_cursor(cursor)?;
        Ok(row
            .map(|r| r.values().take(METADATA_INFO_COUNT).cloned().collect())
            .unwrap_or_default())
    }

    pub(crate) fn metadata_info(&mut self, index: usize) -> Result<Value> {
        self.check_open()?;
        if self.metadata.info.is_none() {
            self.metadata_info_call()?;
        }
        Ok(self
            .metadata
            .info
            .as_ref()
            .and_then(|info| info.get(index))
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub(crate) fn metadata_bool(&mut self, index: usize) -> Result<bool> {
        let value = self.metadata_info(index)?;
        let boolean_values = self.capabilities.boolean_values;
        match value {
            Value::Bool(b) if boolean_values => Ok(b),
            Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) if !boolean_values => {
                Ok(i64::try_from(value)? != 0)
            }
            other => Err(unexpected_info(index, &other)),
        }
    }

    pub(crate) fn metadata_int(&mut self, index: usize) -> Result<i32> {
        let value = self.metadata_info(index)?;
        i32::try_from(value.clone()).map_err(|_| unexpected_info(index, &value))
    }

    pub(crate) fn metadata_string(&mut self, index: usize) -> Result<String> {
        match self.metadata_info(index)? {
            Value::Null => Ok(String::new()),
            value => String::try_from(value.clone()).map_err(|_| unexpected_info(index, &value)),
        }
    }

    /// Boolean looked up per result set type (or isolation) code.
    pub(crate) fn metadata_bool_with_type(&mut self, index: usize, code: i32) -> Result<bool> {
        if code == ResultSetType::ScrollInsensitive.code() && self.capabilities.at_least(10, 2) {
            match index {
                info::UPDATES_ARE_DETECTED
                | info::DELETES_ARE_DETECTED
                | info::OWN_UPDATES_ARE_VISIBLE
                | info::OWN_DELETES_ARE_VISIBLE => return Ok(true),
                info::INSERTS_ARE_DETECTED | info::OWN_INSERTS_ARE_VISIBLE => return Ok(false),
                _ => {}
            }
        }
        Ok(self.metadata_list(index)?.contains(code))
    }

    /// Parsed form of a list-valued info entry, parsed on first use.
    pub(crate) fn metadata_list(&mut self, index: usize) -> Result<CodeList> {
        if let Some(list) = self.metadata.lists.get(&index) {
            return Ok(list.clone());
        }
        let list = CodeList::parse(&self.metadata_string(index)?);
        self.metadata.lists.insert(index, list.clone());
        Ok(list)
    }

    // ==================== Catalog procedures ====================

    fn prepare_catalog_statement(&mut self, procedure: &str) -> Result<StatementId> {
        let options = CursorOptions::with_holdability(self.effective_holdability());
        let id = self.prepare_internal(&format!("CALL {procedure}"), options)?;
        self.statement_mut(id)?.auto_committable = true;
        Ok(id)
    }

    fn execute_catalog_statement(&mut self, id: StatementId, args: Vec<Value>) -> Result<CursorId> {
        self.bind_internal(id, args)?;
        self.execute_prepared(id, ExecuteMethod::Query)?;
        self.statement(id)?.current.ok_or_else(|| {
            Error::usage(
                UsageErrorKind::ResultSetCount,
                "Catalog procedure returned no result set",
            )
        })
    }

    /// Run a catalog procedure; its statement lives as long as the cursor.
    pub(crate) fn catalog_query(&mut self, procedure: &str, args: Vec<Value>) -> Result<CursorId> {
        self.check_open()?;
        tracing::debug!(session = self.id, procedure, "Catalog query");
        let id = self
            .prepare_catalog_statement(procedure)
            .map_err(catalog_error)?;
        match self.execute_catalog_statement(id, args) {
            Ok(cursor) => {
                self.statement_mut(id)?.orphaned = true;
                Ok(cursor)
            }
            Err(e) => {
                self.discard_statement(id);
                Err(catalog_error(e))
            }
        }
    }

    fn catalog_options(&self) -> String {
        format!(
            "DATATYPE='JDBC';DYNAMIC=0;REPORTPUBLICPRIVILEGES=1;CURSORHOLD={}",
            cursor_hold(self)
        )
    }
}

fn cursor_hold(core: &SessionCore) -> u8 {
    u8::from(core.effective_holdability().is_hold())
}

/// Missing catalog procedures surface as an unsupported operation.
fn catalog_error(error: Error) -> Error {
    let what = match error.sqlcode() {
        Some(ROUTINE_NOT_FOUND) => "The stored procedure is not installed on the server",
        Some(LOAD_MODULE_NOT_FOUND) => "The load module was not found on the server",
        _ => return error,
    };
    Error::usage(UsageErrorKind::NotSupported, format!("{what}: {error}"))
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

/// `'A','B'` for a table type filter; an absent or empty list means all.
fn table_type_list(types: Option<&[&str]>) -> Value {
    match types {
        None | Some([]) => Value::Null,
        Some(["%"]) => Value::Text("%".to_string()),
        Some(types) => Value::Text(
            types
                .iter()
                .map(|t| format!("'{}'", t.trim()))
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

// ============================================================================
// DatabaseMetadata
// ============================================================================

/// Metadata about the database behind a session.
#[derive(Debug, Clone)]
pub struct DatabaseMetadata {
    session: Session,
}

macro_rules! info_getters {
    ($getter:ident -> $ty:ty { $($(#[$doc:meta])* $name:ident = $index:expr;)* }) => {
        impl DatabaseMetadata {
            $(
                $(#[$doc])*
                pub fn $name(&self) -> Result<$ty> {
                    self.session.lock()?.$getter($index)
                }
            )*
        }
    };
}

impl DatabaseMetadata {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn capabilities(&self) -> Result<ServerCapabilities> {
        self.session.capabilities()
    }

    pub fn product_level(&self) -> Result<Option<ProductLevel>> {
        Ok(self.session.capabilities()?.product_level)
    }

    pub fn database_product_version(&self) -> Result<String> {
        Ok(self
            .product_level()?
            .map(|p| format!("{}.{}.{}", p.version, p.release, p.modification))
            .unwrap_or_default())
    }

    pub fn default_transaction_isolation(&self) -> Result<IsolationLevel> {
        let code = self
            .session
            .lock()?
            .metadata_int(info::DEFAULT_TRANSACTION_ISOLATION)?;
        IsolationLevel::try_from(code)
    }

    pub fn supports_transaction_isolation_level(&self, level: IsolationLevel) -> Result<bool> {
        self.with_type(info::SUPPORTS_TRANSACTION_ISOLATION_LEVEL, level.code())
    }

    pub fn supports_result_set_type(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::SUPPORTS_RESULT_SET_TYPE, result_set_type.code())
    }

    pub fn supports_result_set_concurrency(
        &self,
        result_set_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<bool> {
        let list = self
            .session
            .lock()?
            .metadata_list(info::SUPPORTS_RESULT_SET_CONCURRENCY)?;
        Ok(list.pairs(result_set_type.code(), concurrency.code()))
    }

    /// Whether CONVERT from `from` to `to` is supported.
    pub fn supports_convert_between(&self, from: SqlType, to: SqlType) -> Result<bool> {
        let list = self
            .session
            .lock()?
            .metadata_list(info::SUPPORTS_CONVERT_BETWEEN)?;
        Ok(list.pairs(from.code(), to.code()))
    }

    pub fn own_updates_are_visible(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::OWN_UPDATES_ARE_VISIBLE, result_set_type.code())
    }

    pub fn own_deletes_are_visible(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::OWN_DELETES_ARE_VISIBLE, result_set_type.code())
    }

    pub fn own_inserts_are_visible(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::OWN_INSERTS_ARE_VISIBLE, result_set_type.code())
    }

    pub fn others_updates_are_visible(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::OTHERS_UPDATES_ARE_VISIBLE, result_set_type.code())
    }

    pub fn others_deletes_are_visible(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::OTHERS_DELETES_ARE_VISIBLE, result_set_type.code())
    }

    pub fn others_inserts_are_visible(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::OTHERS_INSERTS_ARE_VISIBLE, result_set_type.code())
    }

    pub fn updates_are_detected(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::UPDATES_ARE_DETECTED, result_set_type.code())
    }

    pub fn deletes_are_detected(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::DELETES_ARE_DETECTED, result_set_type.code())
    }

    pub fn inserts_are_detected(&self, result_set_type: ResultSetType) -> Result<bool> {
        self.with_type(info::INSERTS_ARE_DETECTED, result_set_type.code())
    }

    fn with_type(&self, index: usize, code: i32) -> Result<bool> {
        self.session.lock()?.metadata_bool_with_type(index, code)
    }

    // ==================== Catalog queries ====================

    fn catalog(
        &self,
        procedure: &str,
        args: impl FnOnce(&SessionCore) -> Vec<Value>,
    ) -> Result<ResultSet> {
        let cursor = {
            let mut core = self.session.lock()?;
            let args = args(&core);
            core.catalog_query(procedure, args)?
        };
        Ok(ResultSet::new(self.session.clone(), cursor))
    }

    /// Tables matching the patterns; `types` filters on table type.
    pub fn tables(
        &self,
        catalog: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        types: Option<&[&str]>,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLTABLES(?,?,?,?,?)", |core| {
            vec![
                text(catalog),
                text(schema_pattern),
                text(table_pattern),
                table_type_list(types),
                Value::Text(core.catalog_options()),
            ]
        })
    }

    pub fn columns(
        &self,
        catalog: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        column_pattern: Option<&str>,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLCOLUMNS(?,?,?,?,?)", |core| {
            vec![
                text(catalog),
                text(schema_pattern),
                text(table_pattern),
                text(column_pattern),
                Value::Text(core.catalog_options()),
            ]
        })
    }

    pub fn procedures(
        &self,
        catalog: Option<&str>,
        schema_pattern: Option<&str>,
        procedure_pattern: Option<&str>,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLPROCEDURES(?,?,?,?)", |core| {
            vec![
                text(catalog),
                text(schema_pattern),
                text(procedure_pattern),
                Value::Text(core.catalog_options()),
            ]
        })
    }

    pub fn procedure_columns(
        &self,
        catalog: Option<&str>,
        schema_pattern: Option<&str>,
        procedure_pattern: Option<&str>,
        column_pattern: Option<&str>,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLPROCEDURECOLS(?,?,?,?,?)", |core| {
            vec![
                text(catalog),
                text(schema_pattern),
                text(procedure_pattern),
                text(column_pattern),
                Value::Text(core.catalog_options()),
            ]
        })
    }

    pub fn primary_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLPRIMARYKEYS(?,?,?,?)", |core| {
            vec![
                text(catalog),
                text(schema),
                text(Some(table)),
                Value::Text(core.catalog_options()),
            ]
        })
    }

    /// Foreign keys of `table` and the primary keys they reference.
    pub fn imported_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLFOREIGNKEYS(?,?,?,?,?,?,?)", |core| {
            vec![
                text(Some("")),
                Value::Null,
                text(Some("")),
                text(catalog),
                text(schema),
                text(Some(table)),
                Value::Text(format!(
                    "DATATYPE='JDBC';IMPORTEDKEY=1; CURSORHOLD={}",
                    cursor_hold(core)
                )),
            ]
        })
    }

    /// Foreign keys elsewhere that reference the primary key of `table`.
    pub fn exported_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLFOREIGNKEYS(?,?,?,?,?,?,?)", |core| {
            vec![
                text(catalog),
                text(schema),
                text(Some(table)),
                text(Some("")),
                Value::Null,
                text(Some("")),
                Value::Text(format!(
                    "DATATYPE='JDBC';EXPORTEDKEY=1; CURSORHOLD={}",
                    cursor_hold(core)
                )),
            ]
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cross_reference(
        &self,
        primary_catalog: Option<&str>,
        primary_schema: Option<&str>,
        primary_table: &str,
        foreign_catalog: Option<&str>,
        foreign_schema: Option<&str>,
        foreign_table: &str,
    ) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLFOREIGNKEYS(?,?,?,?,?,?,?)", |core| {
            vec![
                text(primary_catalog),
                text(primary_schema),
                text(Some(primary_table)),
                text(foreign_catalog),
                text(foreign_schema),
                text(Some(foreign_table)),
                Value::Text(core.catalog_options()),
            ]
        })
    }

    pub fn schemas(&self) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLTABLES('', '', '', '', 'GETSCHEMAS=1')", |_| {
            Vec::new()
        })
    }

    pub fn catalogs(&self) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLTABLES('', '', '', '', 'GETCATALOGS=1')", |_| {
            Vec::new()
        })
    }

    pub fn table_types(&self) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLTABLES(?,?,?,?,?)", |core| {
            vec![
                text(Some("")),
                text(Some("")),
                text(Some("")),
                text(Some("%")),
                Value::Text(format!(
                    "DATATYPE='JDBC';GETTABLETYPES=1; CURSORHOLD={}",
                    cursor_hold(core)
                )),
            ]
        })
    }

    /// Every SQL type the server supports.
    pub fn type_info(&self) -> Result<ResultSet> {
        self.catalog("SYSIBM.SQLGETTYPEINFO(?,?)", |core| {
            vec![Value::SmallInt(0), Value::Text(core.catalog_options())]
        })
    }
}

info_getters!(metadata_bool -> bool {
    all_procedures_are_callable = 0;
    all_tables_are_selectable = 1;
    nulls_are_sorted_high = 2;
    nulls_are_sorted_low = 3;
    nulls_are_sorted_at_start = 4;
    nulls_are_sorted_at_end = 5;
    uses_local_files = 6;
    uses_local_file_per_table = 7;
    stores_upper_case_identifiers = 8;
    stores_lower_case_identifiers = 9;
    stores_mixed_case_identifiers = 10;
    stores_upper_case_quoted_identifiers = 11;
    stores_lower_case_quoted_identifiers = 12;
    stores_mixed_case_quoted_identifiers = 13;
    supports_alter_table_with_add_column = 21;
    supports_alter_table_with_drop_column = 22;
    /// Whether CONVERT is supported at all; see [`supports_convert_between`](Self::supports_convert_between).
    supports_convert = 23;
    supports_different_table_correlation_names = 25;
    supports_expressions_in_order_by = 26;
    supports_order_by_unrelated = 27;
    supports_group_by = 28;
    supports_group_by_unrelated = 29;
    supports_group_by_beyond_select = 30;
    supports_multiple_result_sets = 31;
    supports_multiple_transactions = 32;
    supports_core_sql_grammar = 33;
    supports_extended_sql_grammar = 34;
    supports_ansi92_intermediate_sql = 35;
    supports_ansi92_full_sql = 36;
    supports_integrity_enhancement_facility = 37;
    supports_outer_joins = 38;
    supports_full_outer_joins = 39;
    supports_limited_outer_joins = 40;
    is_catalog_at_start = 44;
    supports_schemas_in_data_manipulation = 46;
    supports_schemas_in_procedure_calls = 47;
    supports_schemas_in_table_definitions = 48;
    supports_schemas_in_index_definitions = 49;
    supports_schemas_in_privilege_definitions = 50;
    supports_catalogs_in_data_manipulation = 51;
    supports_catalogs_in_procedure_calls = 52;
    supports_catalogs_in_table_definitions = 53;
    supports_catalogs_in_index_definitions = 54;
    supports_catalogs_in_privilege_definitions = 55;
    supports_positioned_delete = 56;
    supports_positioned_update = 57;
    supports_select_for_update = 58;
    supports_stored_procedures = 59;
    supports_subqueries_in_comparisons = 60;
    supports_union = 61;
    supports_union_all = 62;
    supports_open_cursors_across_commit = 63;
    supports_open_cursors_across_rollback = 64;
    supports_open_statements_across_commit = 65;
    supports_open_statements_across_rollback = 66;
    does_max_row_size_include_blobs = 82;
    supports_transactions = 89;
    supports_data_definition_and_data_manipulation_transactions = 91;
    supports_data_manipulation_transactions_only = 92;
    data_definition_causes_transaction_commit = 93;
    data_definition_ignored_in_transactions = 94;
    supports_batch_updates = 106;
});

info_getters!(metadata_string -> String {
    /// Comma-separated keywords beyond SQL:2003.
    sql_keywords = 14;
    numeric_functions = 15;
    string_functions = 16;
    system_functions = 17;
    time_date_functions = 18;
    search_string_escape = 19;
    extra_name_characters = 20;
    schema_term = 41;
    procedure_term = 42;
    catalog_term = 43;
    catalog_separator = 45;
});

info_getters!(metadata_int -> i32 {
    max_binary_literal_length = 67;
    max_char_literal_length = 68;
    max_column_name_length = 69;
    max_columns_in_group_by = 70;
    max_columns_in_index = 71;
    max_columns_in_order_by = 72;
    max_columns_in_select = 73;
    max_columns_in_table = 74;
    max_connections = 75;
    max_cursor_name_length = 76;
    max_index_length = 77;
    max_schema_name_length = 78;
    max_procedure_name_length = 79;
    max_catalog_name_length = 80;
    max_row_size = 81;
    max_statement_length = 83;
    max_statements = 84;
    max_table_name_length = 85;
    max_tables_in_select = 86;
    max_user_name_length = 87;
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{CallReply, QueryReply, Reply, Request, RequestKind};
    use crate::scripted::ScriptedAgent;
    use drda_core::{ColumnDescriptor, SessionConfig};

    fn info_row(boolean_values: bool) -> Vec<Value> {
        let flag = |b: bool| {
            if boolean_values {
                Value::Bool(b)
            } else {
                Value::SmallInt(i16::from(b))
            }
        };
        let mut row = vec![flag(false); METADATA_INFO_COUNT];
        row[1] = flag(true);
        row[14] = Value::Text("ALIAS,BIGINT".to_string());
        row[19] = Value::Null;
        row[24] = Value::Text("1,12,4;4,-5".to_string());
        row[57] = flag(true);
        row[76] = Value::Int(128);
        row[88] = Value::Int(2);
        row[95] = Value::Text("1003,1004".to_string());
        row[96] = Value::Text("1003,1007,1008;1004,1007".to_string());
        row[103] = Value::Text("1003".to_string());
        row
    }

    fn with_info(level: &str, row: Vec<Value>) -> (Session, ScriptedAgent) {
        let wire = ScriptedAgent::new();
        let config = SessionConfig::new("db").product_level(level);
        let session = Session::open(config, wire.clone()).unwrap();
        wire.push_reply(
            RequestKind::ExecuteCall,
            Reply::call(CallReply {
                update_count: 0,
                result_sets: vec![QueryReply::new(Vec::new(), vec![row])],
                outputs: Vec::new(),
            }),
        );
        wire.clear_history();
        (session, wire)
    }

    #[test]
    fn test_product_level_parsing() {
        let level = ProductLevel::parse("CSS10110").unwrap();
        assert_eq!(level.product_id, "CSS");
        assert_eq!((level.version, level.release, level.modification), (10, 11, 0));
        assert!(level.at_least(10, 2, 0));
        assert!(!level.at_least(10, 12, 0));
        assert_eq!(level.to_string(), "CSS10110");
        assert!(ProductLevel::parse("CSS10").is_none());
        assert!(ProductLevel::parse("CSSxx110").is_none());
    }

    #[test]
    fn test_capabilities_follow_level() {
        let current = ServerCapabilities::from_product_level("CSS10110");
        assert!(current.query_close_implicit);
        assert!(current.boolean_parameters);
        assert!(current.long_rdbnam);

        let older = ServerCapabilities::from_product_level("CSS10050");
        assert!(older.session_data_caching);
        assert!(!older.udts);
        assert!(!older.boolean_values);

        assert_eq!(
            ServerCapabilities::from_product_level("DSN09015"),
            ServerCapabilities::default()
        );
    }

    #[test]
    fn test_code_lists() {
        assert!(CodeList::parse("1003, 1004").contains(1004));
        assert!(!CodeList::parse("").contains(1003));
        let concurrency = CodeList::parse("1003,1007,1008;1004,1007");
        assert!(concurrency.pairs(1003, 1008));
        assert!(!concurrency.pairs(1004, 1008));
        let conversions = CodeList::parse("1,12,4;4,-5");
        assert!(conversions.pairs(4, -5));
        assert!(!conversions.pairs(12, 4));
    }

    #[test]
    fn test_info_row_is_cached() {
        let (session, wire) = with_info("CSS10110", info_row(true));
        let md = session.metadata().unwrap();
        assert!(md.all_tables_are_selectable().unwrap());
        assert!(!md.all_procedures_are_callable().unwrap());
        assert!(md.supports_positioned_update().unwrap());
        assert_eq!(md.max_cursor_name_length().unwrap(), 128);
        assert_eq!(md.sql_keywords().unwrap(), "ALIAS,BIGINT");
        assert_eq!(md.search_string_escape().unwrap(), "");
        assert_eq!(
            md.default_transaction_isolation().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(wire.count(RequestKind::ExecuteCall), 1);
        assert_eq!(session.open_statement_count().unwrap(), 0);
        assert_eq!(wire.unused_replies(), 0);
    }

    #[test]
    fn test_integer_booleans_on_older_servers() {
        let (session, _wire) = with_info("CSS10050", info_row(false));
        let md = session.metadata().unwrap();
        assert!(md.all_tables_are_selectable().unwrap());
        assert!(!md.supports_batch_updates().unwrap());
    }

    #[test]
    fn test_boolean_type_mismatch_is_protocol_error() {
        let (session, _wire) = with_info("CSS10110", info_row(false));
        let err = session.metadata().unwrap().supports_union().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ref p) if p.kind == ProtocolErrorKind::UnexpectedReply
        ));
    }

    #[test]
    fn test_typed_lookups() {
        let (session, _wire) = with_info("CSS10110", info_row(true));
        let md = session.metadata().unwrap();
        assert!(md.supports_result_set_type(ResultSetType::ScrollInsensitive).unwrap());
        assert!(!md.supports_result_set_type(ResultSetType::ScrollSensitive).unwrap());
        assert!(
            md.supports_result_set_concurrency(ResultSetType::ForwardOnly, Concurrency::Updatable)
                .unwrap()
        );
        assert!(
            !md.supports_result_set_concurrency(
                ResultSetType::ScrollInsensitive,
                Concurrency::Updatable
            )
            .unwrap()
        );
        assert!(md.supports_convert_between(SqlType::Integer, SqlType::BigInt).unwrap());

        // Scroll-insensitive visibility is answered client side.
        assert!(md.updates_are_detected(ResultSetType::ScrollInsensitive).unwrap());
        assert!(!md.inserts_are_detected(ResultSetType::ScrollInsensitive).unwrap());
        assert!(md.updates_are_detected(ResultSetType::ForwardOnly).unwrap());
        assert!(!md.deletes_are_detected(ResultSetType::ForwardOnly).unwrap());
    }

    #[test]
    fn test_full_reset_drops_cache() {
        let (session, _wire) = with_info("CSS10110", info_row(true));
        session.metadata().unwrap().supports_union().unwrap();
        let mut core = session.lock().unwrap();
        assert!(core.metadata.is_loaded());
        core.complete_reset(true, true).unwrap();
        assert!(!core.metadata.is_loaded());
    }

    fn catalog_parameters(wire: &ScriptedAgent) -> Vec<Value> {
        wire
            .requests()
            .into_iter()
            .find_map(|r| match r {
                Request::ExecuteCall { parameters, .. } => Some(parameters),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_tables_binds_type_filter_and_options() {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        wire.push_reply(
            RequestKind::ExecuteCall,
            Reply::call(CallReply {
                update_count: 0,
                result_sets: vec![QueryReply::new(
                    vec![ColumnDescriptor::new("TABLE_NAME", SqlType::VarChar)],
                    vec![vec![Value::Text("T1".to_string())]],
                )],
                outputs: Vec::new(),
            }),
        );
        wire.clear_history();
        let md = session.metadata().unwrap();
        let mut tables = md
            .tables(None, Some("APP"), Some("%"), Some(&["TABLE", " VIEW "]))
            .unwrap();
        assert_eq!(
            catalog_parameters(&wire),
            vec![
                Value::Null,
                Value::Text("APP".to_string()),
                Value::Text("%".to_string()),
                Value::Text("'TABLE','VIEW'".to_string()),
                Value::Text(
                    "DATATYPE='JDBC';DYNAMIC=0;REPORTPUBLICPRIVILEGES=1;CURSORHOLD=1"
                        .to_string()
                ),
            ]
        );
        let rows = tables.fetch_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(session.open_statement_count().unwrap(), 0);
        drop(tables);
        assert!(session.lock().unwrap().statements.is_empty());
    }

    #[test]
    fn test_table_type_list() {
        assert_eq!(table_type_list(None), Value::Null);
        assert_eq!(table_type_list(Some(&[])), Value::Null);
        assert_eq!(table_type_list(Some(&["%"])), Value::Text("%".to_string()));
    }

    #[test]
    fn test_missing_procedure_is_not_supported() {
        let wire = ScriptedAgent::new();
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        wire.push_reply(
            RequestKind::ExecuteCall,
            Reply::error(-440, "42884", "No routine SQLPROCEDURES"),
        );
        let err = session
            .metadata()
            .unwrap()
            .procedures(None, None, None)
            .unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::NotSupported));
        assert!(session.lock().unwrap().statements.is_empty());
    }
}
