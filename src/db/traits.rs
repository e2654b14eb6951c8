// Database Connection Traits
// Defines the contract every vendor backend implements, plus the shared
// result values and error taxonomy

use crate::db::schema::{self, Column, IncomingConstraint, OutgoingConstraint, Table, UnderlyingType};
use crate::db::settings::ConnectionSettings;
use crate::db::sql;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Mysql,
    Postgresql,
    Mssql,
}

impl DatabaseType {
    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "MySQL",
            DatabaseType::Postgresql => "PostgreSQL",
            DatabaseType::Mssql => "Microsoft SQL Server",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Mysql => 3306,
            DatabaseType::Postgresql => 5432,
            DatabaseType::Mssql => 1433,
        }
    }
}

/// Normalized meaning of a native execution error.
///
/// Each backend maps its own error codes onto these kinds so callers can
/// drive "create if missing" logic without knowing vendor codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    /// The statement referenced a table, sequence or relation that does not exist
    ObjectNotFound,
    /// The statement tried to create an object that already exists
    AlreadyExists,
    Other,
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution error [{code}]: {message}")]
    Execution {
        /// Native error code (MySQL error number, PostgreSQL SQLSTATE, SQL Server error number)
        code: String,
        kind: ExecutionErrorKind,
        message: String,
    },

    #[error("Unable to find table '{0}'")]
    TableNotFound(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Not connected to the database, call connect() first")]
    NotConnected,

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Schema error: {0}")]
    SchemaError(String),
}

impl DatabaseError {
    /// Build an execution error that did not come with a native code
    pub fn execution(message: impl Into<String>) -> Self {
        DatabaseError::Execution {
            code: String::new(),
            kind: ExecutionErrorKind::Other,
            message: message.into(),
        }
    }

    /// Native error code carried by an execution error
    pub fn native_code(&self) -> Option<&str> {
        match self {
            DatabaseError::Execution { code, .. } if !code.is_empty() => Some(code),
            _ => None,
        }
    }

    pub fn execution_kind(&self) -> Option<ExecutionErrorKind> {
        match self {
            DatabaseError::Execution { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_object_not_found(&self) -> bool {
        self.execution_kind() == Some(ExecutionErrorKind::ObjectNotFound)
    }
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Borrow textual values (strings and rendered date/times)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value. Drivers that return everything as text
    /// (the PostgreSQL simple-query protocol, the MySQL text protocol) are
    /// handled by parsing.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            CellValue::Bool(v) => Some(i64::from(*v)),
            CellValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            CellValue::Int(v) => Some(*v != 0),
            CellValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "t" | "true" | "yes" | "y" => Some(true),
                "0" | "f" | "false" | "no" | "n" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Render the value as text, `None` for SQL NULL
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            CellValue::Int(v) => Some(v.to_string()),
            CellValue::Float(v) => Some(v.to_string()),
            CellValue::String(s) | CellValue::DateTime(s) => Some(s.clone()),
            CellValue::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

/// One result row: column name -> value, in the order the driver returned the columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: CellValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Text of a column, `None` when the column is missing or NULL
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(CellValue::to_text)
    }

    /// First column of the row
    pub fn first(&self) -> Option<&CellValue> {
        self.fields.first().map(|(_, value)| value)
    }

    pub fn into_first(self) -> Option<CellValue> {
        self.fields.into_iter().next().map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(column, _)| column.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(column, value)| (column.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Lower-case every column name so catalog rows look the same on every vendor
    pub fn into_lowercase_keys(self) -> Row {
        Row {
            fields: self
                .fields
                .into_iter()
                .map(|(column, value)| (column.to_lowercase(), value))
                .collect(),
        }
    }
}

impl FromIterator<(String, CellValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, CellValue)>>(iter: I) -> Self {
        Row {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// How the native driver reports failures. Only raising is supported: a
/// rejected statement always comes back as an `Err`, never as a silent
/// status flag. The value describes what every backend does; backends log
/// it on connect but have no other mode to switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorMode {
    Raise,
}

/// Options applied when the native handle is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Keep the socket alive between statements (TCP keep-alive on the native handle)
    pub persistent: bool,
    pub error_mode: ErrorMode,
}

impl ConnectOptions {
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            persistent: settings.is_persistent(),
            error_mode: ErrorMode::Raise,
        }
    }
}

/// Connection trait - all vendor backends must implement this.
///
/// A connection wraps exactly one native handle. Every execution or
/// introspection method fails with [`DatabaseError::NotConnected`] until
/// [`DbConnection::connect`] has succeeded. Methods take `&mut self`: one
/// connection serves one caller at a time.
#[async_trait::async_trait]
pub trait DbConnection: Send {
    // --- Metadata ---
    /// Get the database type this backend talks to
    fn database_type(&self) -> DatabaseType;

    /// Settings the connection was built from
    fn settings(&self) -> &ConnectionSettings;

    /// Whether identifiers are compared case-sensitively by this engine
    fn is_case_sensitive(&self) -> bool;

    // --- Connection Management ---
    /// Native connection string built from the settings, without side effects
    fn dsn(&self) -> Result<String, DatabaseError>;

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::from_settings(self.settings())
    }

    /// Open the native handle and send the session charset statement
    async fn connect(&mut self) -> Result<(), DatabaseError>;

    /// Release the native handle. Closing a connection that is not open is a no-op.
    async fn close(&mut self) -> Result<(), DatabaseError>;

    fn is_connected(&self) -> bool;

    /// Send a session setup statement on a freshly opened handle. On failure
    /// the handle is released again so the connection stays unusable.
    async fn init_session(&mut self, statement: &str) -> Result<(), DatabaseError> {
        if let Err(err) = self.exec(statement).await {
            if let Err(close_err) = self.close().await {
                tracing::debug!(error = %close_err, "close after failed session setup");
            }
            return Err(err);
        }
        Ok(())
    }

    // --- Execution ---
    /// Execute a statement and return the number of affected rows
    async fn exec(&mut self, sql: &str) -> Result<u64, DatabaseError>;

    /// Execute a query and materialize every row
    async fn get_all(&mut self, sql: &str) -> Result<Vec<Row>, DatabaseError>;

    /// First column of the first row, `None` when the query matched nothing
    async fn get_one(&mut self, sql: &str) -> Result<Option<CellValue>, DatabaseError> {
        let rows = self.get_all(sql).await?;
        Ok(rows.into_iter().next().and_then(Row::into_first))
    }

    // --- Quoting ---
    /// Format a value as a SQL literal, or `NULL`.
    ///
    /// This is string escaping, not parameter binding: it is not guaranteed
    /// to be injection-proof on every engine configuration.
    fn quote_smart(&self, value: Option<&str>) -> String {
        sql::quote_literal(value)
    }

    /// Wrap an identifier in the vendor's quoting syntax
    fn escape_db_item(&self, identifier: &str) -> String;

    // --- Schema Metadata ---
    /// Catalog rows describing every column of a table, in ordinal order,
    /// with lower-cased keys
    async fn table_info(&mut self, table_name: &str) -> Result<Vec<Row>, DatabaseError>;

    async fn is_table_exist(&mut self, table_name: &str) -> Result<bool, DatabaseError>;

    /// Base tables of the current database. With `ignore_sequences`, tables
    /// backing emulated sequences are left out.
    async fn list_of_tables(&mut self, ignore_sequences: bool) -> Result<Vec<String>, DatabaseError>;

    /// Map one [`DbConnection::table_info`] row to a column descriptor
    fn column_from_info(&self, info: &Row) -> Column;

    /// Build a [`Table`] snapshot from the live catalog
    async fn table_from_db_model(&mut self, table_name: &str) -> Result<Table, DatabaseError> {
        if !self.is_table_exist(table_name).await? {
            return Err(DatabaseError::TableNotFound(table_name.to_string()));
        }

        let mut table = Table::new(table_name);
        for info in self.table_info(table_name).await? {
            let column = self.column_from_info(&info);
            table.add_column(column)?;
        }
        Ok(table)
    }

    /// Foreign keys declared on `table_name` (optionally restricted to one column)
    async fn constraints_on_table(
        &mut self,
        table_name: &str,
        column_name: Option<&str>,
    ) -> Result<Vec<OutgoingConstraint>, DatabaseError>;

    /// Foreign keys declared on other tables that reference `table_name`
    async fn constraints_from_table(
        &mut self,
        table_name: &str,
        column_name: Option<&str>,
    ) -> Result<Vec<IncomingConstraint>, DatabaseError>;

    /// Get list of databases (catalogs) visible to the connection
    async fn database_list(&mut self) -> Result<Vec<String>, DatabaseError>;

    async fn check_database_exists(&mut self, database_name: &str) -> Result<bool, DatabaseError> {
        let databases = self.database_list().await?;
        Ok(databases.iter().any(|name| name == database_name))
    }

    fn underlying_type(&self, raw_type: &str) -> UnderlyingType {
        schema::underlying_type(raw_type)
    }

    /// Parent of a table in an inheritance hierarchy, or the table itself
    async fn parent_table(&mut self, table_name: &str) -> Result<String, DatabaseError> {
        Ok(table_name.to_string())
    }

    /// Table whose sequence a table shares through inheritance, or the table itself
    async fn find_root_sequence_table(&mut self, table_name: &str) -> Result<String, DatabaseError> {
        Ok(table_name.to_string())
    }

    // --- DDL ---
    /// Create a database, then reconnect to it.
    ///
    /// The name is not escaped: sanitizing it is the caller's job.
    async fn create_database(&mut self, database_name: &str) -> Result<(), DatabaseError>;

    async fn create_table(&mut self, table: &Table, drop_if_exist: bool) -> Result<(), DatabaseError>;

    async fn create_index(
        &mut self,
        table_name: &str,
        columns: &[&str],
        is_unique: bool,
        index_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let statement = sql::create_index_sql(table_name, columns, is_unique, index_name);
        self.exec(&statement).await?;
        Ok(())
    }

    // --- Sequences ---
    fn sequence_name(&self, table_name: &str) -> String {
        sql::sequence_name(table_name)
    }

    /// Advance an existing sequence object and return the new value
    async fn advance_sequence(&mut self, sequence_name: &str) -> Result<i64, DatabaseError>;

    /// Create the sequence of a table with the value 1 already issued
    async fn create_sequence(&mut self, table_name: &str) -> Result<(), DatabaseError>;

    /// Next value of the table's sequence. A missing sequence is created
    /// when `on_demand` is set (and 1 is returned); any other failure is
    /// returned as is.
    async fn next_id(&mut self, table_name: &str, on_demand: bool) -> Result<i64, DatabaseError> {
        let sequence = self.sequence_name(table_name);
        match self.advance_sequence(&sequence).await {
            Ok(id) => Ok(id),
            Err(err) if on_demand && err.is_object_not_found() => {
                tracing::warn!(sequence = %sequence, "sequence does not exist, creating it on demand");
                self.create_sequence(table_name).await?;
                Ok(1)
            }
            Err(err) => Err(err),
        }
    }

    /// Force the sequence so the next call to [`DbConnection::next_id`] returns `id + 1`
    async fn set_sequence_id(&mut self, table_name: &str, id: i64) -> Result<(), DatabaseError>;
}
