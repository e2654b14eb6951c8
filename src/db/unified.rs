// Unified Connection
// Picks the vendor backend from the database type and forwards every
// operation to it

use crate::db::drivers::{MssqlConnection, MySqlConnection, PostgresConnection};
use crate::db::schema::{Column, IncomingConstraint, OutgoingConstraint, Table, UnderlyingType};
use crate::db::settings::{ConnectionSettings, PersistedConnection};
use crate::db::traits::{CellValue, ConnectOptions, DatabaseError, DatabaseType, DbConnection, Row};

/// A connection to any supported vendor
pub enum UnifiedConnection {
    Mysql(MySqlConnection),
    Postgres(PostgresConnection),
    Mssql(MssqlConnection),
}

macro_rules! dispatch {
    ($self:expr, $conn:ident => $body:expr) => {
        match $self {
            UnifiedConnection::Mysql($conn) => $body,
            UnifiedConnection::Postgres($conn) => $body,
            UnifiedConnection::Mssql($conn) => $body,
        }
    };
}

impl UnifiedConnection {
    /// Build the backend for `database_type` without connecting
    pub fn new(database_type: DatabaseType, settings: ConnectionSettings) -> Self {
        match database_type {
            DatabaseType::Mysql => UnifiedConnection::Mysql(MySqlConnection::new(settings)),
            DatabaseType::Postgresql => UnifiedConnection::Postgres(PostgresConnection::new(settings)),
            DatabaseType::Mssql => UnifiedConnection::Mssql(MssqlConnection::new(settings)),
        }
    }

    pub fn from_persisted(record: &PersistedConnection) -> Self {
        Self::new(record.database_type, record.settings.clone())
    }

    /// Validate the settings, build the backend and connect it
    pub async fn open(database_type: DatabaseType, settings: ConnectionSettings) -> Result<Self, DatabaseError> {
        settings.validate(database_type)?;
        let mut connection = Self::new(database_type, settings);
        connection.connect().await?;
        Ok(connection)
    }

    pub fn into_boxed(self) -> Box<dyn DbConnection> {
        dispatch!(self, conn => Box::new(conn) as Box<dyn DbConnection>)
    }
}

#[async_trait::async_trait]
impl DbConnection for UnifiedConnection {
    fn database_type(&self) -> DatabaseType {
        dispatch!(self, conn => conn.database_type())
    }

    fn settings(&self) -> &ConnectionSettings {
        dispatch!(self, conn => conn.settings())
    }

    fn is_case_sensitive(&self) -> bool {
        dispatch!(self, conn => conn.is_case_sensitive())
    }

    fn dsn(&self) -> Result<String, DatabaseError> {
        dispatch!(self, conn => conn.dsn())
    }

    fn connect_options(&self) -> ConnectOptions {
        dispatch!(self, conn => conn.connect_options())
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.connect().await)
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.close().await)
    }

    fn is_connected(&self) -> bool {
        dispatch!(self, conn => conn.is_connected())
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        dispatch!(self, conn => conn.exec(sql).await)
    }

    async fn get_all(&mut self, sql: &str) -> Result<Vec<Row>, DatabaseError> {
        dispatch!(self, conn => conn.get_all(sql).await)
    }

    async fn get_one(&mut self, sql: &str) -> Result<Option<CellValue>, DatabaseError> {
        dispatch!(self, conn => conn.get_one(sql).await)
    }

    fn quote_smart(&self, value: Option<&str>) -> String {
        dispatch!(self, conn => conn.quote_smart(value))
    }

    fn escape_db_item(&self, identifier: &str) -> String {
        dispatch!(self, conn => conn.escape_db_item(identifier))
    }

    async fn table_info(&mut self, table_name: &str) -> Result<Vec<Row>, DatabaseError> {
        dispatch!(self, conn => conn.table_info(table_name).await)
    }

    async fn is_table_exist(&mut self, table_name: &str) -> Result<bool, DatabaseError> {
        dispatch!(self, conn => conn.is_table_exist(table_name).await)
    }

    async fn list_of_tables(&mut self, ignore_sequences: bool) -> Result<Vec<String>, DatabaseError> {
        dispatch!(self, conn => conn.list_of_tables(ignore_sequences).await)
    }

    fn column_from_info(&self, info: &Row) -> Column {
        dispatch!(self, conn => conn.column_from_info(info))
    }

    async fn table_from_db_model(&mut self, table_name: &str) -> Result<Table, DatabaseError> {
        dispatch!(self, conn => conn.table_from_db_model(table_name).await)
    }

    async fn constraints_on_table(
        &mut self,
        table_name: &str,
        column_name: Option<&str>,
    ) -> Result<Vec<OutgoingConstraint>, DatabaseError> {
        dispatch!(self, conn => conn.constraints_on_table(table_name, column_name).await)
    }

    async fn constraints_from_table(
        &mut self,
        table_name: &str,
        column_name: Option<&str>,
    ) -> Result<Vec<IncomingConstraint>, DatabaseError> {
        dispatch!(self, conn => conn.constraints_from_table(table_name, column_name).await)
    }

    async fn database_list(&mut self) -> Result<Vec<String>, DatabaseError> {
        dispatch!(self, conn => conn.database_list().await)
    }

    async fn check_database_exists(&mut self, database_name: &str) -> Result<bool, DatabaseError> {
        dispatch!(self, conn => conn.check_database_exists(database_name).await)
    }

    fn underlying_type(&self, raw_type: &str) -> UnderlyingType {
        dispatch!(self, conn => conn.underlying_type(raw_type))
    }

    async fn parent_table(&mut self, table_name: &str) -> Result<String, DatabaseError> {
        dispatch!(self, conn => conn.parent_table(table_name).await)
    }

    async fn find_root_sequence_table(&mut self, table_name: &str) -> Result<String, DatabaseError> {
        dispatch!(self, conn => conn.find_root_sequence_table(table_name).await)
    }

    async fn create_database(&mut self, database_name: &str) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.create_database(database_name).await)
    }

    async fn create_table(&mut self, table: &Table, drop_if_exist: bool) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.create_table(table, drop_if_exist).await)
    }

    async fn create_index(
        &mut self,
        table_name: &str,
        columns: &[&str],
        is_unique: bool,
        index_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.create_index(table_name, columns, is_unique, index_name).await)
    }

    fn sequence_name(&self, table_name: &str) -> String {
        dispatch!(self, conn => conn.sequence_name(table_name))
    }

    async fn advance_sequence(&mut self, sequence_name: &str) -> Result<i64, DatabaseError> {
        dispatch!(self, conn => conn.advance_sequence(sequence_name).await)
    }

    async fn create_sequence(&mut self, table_name: &str) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.create_sequence(table_name).await)
    }

    async fn next_id(&mut self, table_name: &str, on_demand: bool) -> Result<i64, DatabaseError> {
        dispatch!(self, conn => conn.next_id(table_name, on_demand).await)
    }

    async fn set_sequence_id(&mut self, table_name: &str, id: i64) -> Result<(), DatabaseError> {
        dispatch!(self, conn => conn.set_sequence_id(table_name, id).await)
    }
}
