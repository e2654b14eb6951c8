// MS-SQL Backend
// Implements DbConnection for SQL Server using tiberius

use crate::db::schema::{Column, IncomingConstraint, OutgoingConstraint, Table};
use crate::db::settings::ConnectionSettings;
use crate::db::sql;
use crate::db::traits::{CellValue, DatabaseError, DatabaseType, DbConnection, ExecutionErrorKind, Row};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tiberius::{Client, ColumnType, Config, SqlBrowser};
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type MssqlClient = Client<Compat<TcpStream>>;

/// String types whose catalog type gets a `(length)` qualifier
const SIZED_STRING_TYPES: &[&str] = &["nvarchar", "nchar", "varchar", "char"];

// Foreign-key pairs: `fk` is the referencing side, `pk` the referenced one
const FOREIGN_KEY_JOIN: &str = "FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE fk \
        ON fk.CONSTRAINT_CATALOG = rc.CONSTRAINT_CATALOG \
        AND fk.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA \
        AND fk.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE pk \
        ON pk.CONSTRAINT_CATALOG = rc.UNIQUE_CONSTRAINT_CATALOG \
        AND pk.CONSTRAINT_SCHEMA = rc.UNIQUE_CONSTRAINT_SCHEMA \
        AND pk.CONSTRAINT_NAME = rc.UNIQUE_CONSTRAINT_NAME \
        AND pk.ORDINAL_POSITION = fk.ORDINAL_POSITION";

/// SQL Server connection
pub struct MssqlConnection {
    settings: ConnectionSettings,
    client: Option<MssqlClient>,
}

impl MssqlConnection {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            client: None,
        }
    }

    fn handle(&mut self) -> Result<&mut MssqlClient, DatabaseError> {
        self.client.as_mut().ok_or(DatabaseError::NotConnected)
    }

    /// Catalog filter: the configured database, or the session's current one
    fn catalog(&self) -> String {
        match self.settings.db_name() {
            Some(name) => self.quote_smart(Some(name)),
            None => "DB_NAME()".to_string(),
        }
    }

    /// Named instances without an explicit port are resolved through SQL Browser
    fn uses_sql_browser(&self) -> bool {
        self.settings.mssql_dsn().is_none()
            && self.settings.mssql_instance().is_some()
            && self.settings.port().is_none()
    }

    /// An override DSN keeps its own `database=`, so the configured database
    /// (for example after `create_database`) is selected explicitly
    fn session_database_statement(&self) -> Option<String> {
        match (self.settings.mssql_dsn(), self.settings.db_name()) {
            (Some(_), Some(db)) => Some(format!("USE {}", self.escape_db_item(db))),
            _ => None,
        }
    }

    fn server_address(&self) -> String {
        let mut server = format!("tcp:{}", self.settings.host().unwrap_or("localhost"));
        if let Some(instance) = self.settings.mssql_instance() {
            server.push('\\');
            server.push_str(instance);
        }
        if let Some(port) = self.settings.port() {
            server.push_str(&format!(",{}", port));
        }
        server
    }
}

/// Quote an ADO.NET value when it would otherwise break the key=value list
fn ado_value(value: &str) -> String {
    if value.contains(';') || value.contains('"') || value.trim() != value {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Open the TCP socket ourselves so keep-alive follows the persistent flag
async fn open_socket(addr: &str, keepalive: bool) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for resolved in tokio::net::lookup_host(addr).await? {
        let socket = if resolved.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(keepalive)?;
        match socket.connect(resolved).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("could not resolve {}", addr),
        )
    }))
}

/// Reopen a socket to the same peer with keep-alive enabled. SQL Browser
/// hands back a stream it opened itself.
async fn reopen_with_keepalive(tcp: TcpStream) -> std::io::Result<TcpStream> {
    let peer = tcp.peer_addr()?;
    drop(tcp);
    open_socket(&peer.to_string(), true).await
}

/// Normalize a SQL Server error number
pub(crate) fn classify_error_code(code: u32) -> ExecutionErrorKind {
    match code {
        // invalid object name, cannot drop object
        208 | 3701 => ExecutionErrorKind::ObjectNotFound,
        // object already exists, database already exists
        2714 | 1801 => ExecutionErrorKind::AlreadyExists,
        _ => ExecutionErrorKind::Other,
    }
}

fn translate_error(err: tiberius::error::Error) -> DatabaseError {
    match &err {
        tiberius::error::Error::Server(e) => DatabaseError::Execution {
            code: e.code().to_string(),
            kind: classify_error_code(e.code()),
            message: e.message().to_string(),
        },
        _ => DatabaseError::execution(err.to_string()),
    }
}

fn cell_value_from_row(row: &tiberius::Row, idx: usize) -> CellValue {
    let col_type = row
        .columns()
        .get(idx)
        .map(|c| c.column_type())
        .unwrap_or(ColumnType::Null);

    let value = match col_type {
        ColumnType::Null => None,

        ColumnType::Int1 => row.try_get::<u8, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)),
        ColumnType::Int2 => row.try_get::<i16, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)),
        ColumnType::Int4 => row.try_get::<i32, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)),
        ColumnType::Int8 => row.try_get::<i64, _>(idx).ok().flatten().map(CellValue::Int),
        ColumnType::Intn => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(i64::from))
            .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(i64::from))
            .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(i64::from))
            .map(CellValue::Int),

        ColumnType::Float4 => row.try_get::<f32, _>(idx).ok().flatten().map(|v| CellValue::Float(v as f64)),
        ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => {
            row.try_get::<f64, _>(idx).ok().flatten().map(CellValue::Float)
        }
        ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(f64::from))
            .map(CellValue::Float),
        ColumnType::Decimaln | ColumnType::Numericn => row
            .try_get::<tiberius::numeric::Numeric, _>(idx)
            .ok()
            .flatten()
            .map(|n| CellValue::Float(f64::from(n))),

        ColumnType::Bit | ColumnType::Bitn => row.try_get::<bool, _>(idx).ok().flatten().map(CellValue::Bool),

        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| CellValue::String(s.to_string())),

        ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime4 => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.to_string())),
        ColumnType::DatetimeOffsetn => row
            .try_get::<DateTime<Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.to_rfc3339())),
        ColumnType::Daten => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| CellValue::DateTime(d.to_string())),
        ColumnType::Timen => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| CellValue::DateTime(t.to_string())),

        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|b| CellValue::Binary(b.to_vec())),

        ColumnType::Guid => row
            .try_get::<tiberius::Uuid, _>(idx)
            .ok()
            .flatten()
            .map(|u| CellValue::String(u.to_string())),

        ColumnType::Xml => row
            .try_get::<&tiberius::xml::XmlData, _>(idx)
            .ok()
            .flatten()
            .map(|xml| CellValue::String(xml.to_owned().into_string())),

        _ => None,
    };

    value.unwrap_or(CellValue::Null)
}

fn convert_row(row: &tiberius::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| (column.name().to_string(), cell_value_from_row(row, idx)))
        .collect()
}

#[async_trait::async_trait]
impl DbConnection for MssqlConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    fn is_case_sensitive(&self) -> bool {
        false
    }

    /// ADO.NET connection string, or the configured override verbatim
    fn dsn(&self) -> Result<String, DatabaseError> {
        if let Some(dsn) = self.settings.mssql_dsn() {
            return Ok(dsn.to_string());
        }

        let mut parts = vec![format!("server={}", self.server_address())];
        if let Some(db) = self.settings.db_name() {
            parts.push(format!("database={}", ado_value(db)));
        }
        if let Some(user) = self.settings.user() {
            parts.push(format!("user id={}", ado_value(user)));
        }
        if let Some(password) = self.settings.password() {
            parts.push(format!("password={}", ado_value(password)));
        }
        parts.push(format!("TrustServerCertificate={}", self.settings.mssql_trust_cert()));
        parts.push(format!("encrypt={}", self.settings.mssql_encrypt()));

        Ok(parts.join(";"))
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        let config = Config::from_ado_string(&self.dsn()?)
            .map_err(|e| DatabaseError::InvalidConfig(format!("Invalid SQL Server connection string: {}", e)))?;
        let options = self.connect_options();

        tracing::debug!(
            server = %self.server_address(),
            persistent = options.persistent,
            error_mode = ?options.error_mode,
            "connecting to SQL Server"
        );

        let tcp = if self.uses_sql_browser() {
            let tcp = TcpStream::connect_named(&config)
                .await
                .map_err(|e| DatabaseError::ConnectionFailed(format!("SQL Browser lookup failed: {}", e)))?;
            if options.persistent {
                reopen_with_keepalive(tcp)
                    .await
                    .map_err(|e| DatabaseError::ConnectionFailed(format!("TCP connection failed: {}", e)))?
            } else {
                tcp
            }
        } else {
            open_socket(&config.get_addr(), options.persistent)
                .await
                .map_err(|e| DatabaseError::ConnectionFailed(format!("TCP connection failed: {}", e)))?
        };

        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        self.client = Some(client);
        if let Some(statement) = self.session_database_statement() {
            self.init_session(&statement).await?;
        }
        tracing::info!(database = ?self.settings.db_name(), "connected to SQL Server");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if let Some(client) = self.client.take() {
            client.close().await.map_err(translate_error)?;
            tracing::debug!("SQL Server connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        tracing::debug!(sql = %sql::preview(sql), "exec");
        let client = self.handle()?;
        let result = client.execute(sql, &[]).await.map_err(translate_error)?;
        Ok(result.rows_affected().iter().sum())
    }

    async fn get_all(&mut self, sql: &str) -> Result<Vec<Row>, DatabaseError> {
        tracing::debug!(sql = %sql::preview(sql), "get_all");
        let client = self.handle()?;
        let rows = client
            .simple_query(sql)
            .await
            .map_err(translate_error)?
            .into_first_result()
            .await
            .map_err(translate_error)?;
        Ok(rows.iter().map(convert_row).collect())
    }

    /// Unicode literal
    fn quote_smart(&self, value: Option<&str>) -> String {
        match value {
            None => "NULL".to_string(),
            Some(_) => format!("N{}", sql::quote_literal(value)),
        }
    }

    fn escape_db_item(&self, identifier: &str) -> String {
        format!("[{}]", identifier.replace(']', "]]"))
    }

    async fn table_info(&mut self, table_name: &str) -> Result<Vec<Row>, DatabaseError> {
        let table = self.quote_smart(Some(table_name));
        let query = format!(
            "SELECT c.*, \
                COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), c.COLUMN_NAME, 'IsIdentity') AS IS_IDENTITY, \
                CASE WHEN pk.COLUMN_NAME IS NULL THEN 'NO' ELSE 'YES' END AS IS_PRIMARY_KEY, \
                CAST(ep.value AS NVARCHAR(4000)) AS COLUMN_COMMENT \
            FROM INFORMATION_SCHEMA.COLUMNS c \
            LEFT JOIN ( \
                SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME \
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku \
                    ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME AND tc.TABLE_SCHEMA = ku.TABLE_SCHEMA \
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
            ) pk ON pk.TABLE_SCHEMA = c.TABLE_SCHEMA AND pk.TABLE_NAME = c.TABLE_NAME AND pk.COLUMN_NAME = c.COLUMN_NAME \
            LEFT JOIN sys.extended_properties ep \
                ON ep.class = 1 AND ep.name = 'MS_Description' \
                AND ep.major_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)) \
                AND ep.minor_id = COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), c.COLUMN_NAME, 'ColumnId') \
            WHERE c.TABLE_NAME = {} AND c.TABLE_CATALOG = {} \
            ORDER BY c.ORDINAL_POSITION",
            table,
            self.catalog()
        );
        let rows = self.get_all(&query).await?;
        Ok(rows.into_iter().map(Row::into_lowercase_keys).collect())
    }

    async fn is_table_exist(&mut self, table_name: &str) -> Result<bool, DatabaseError> {
        let query = format!(
            "SELECT COUNT(1) AS cnt FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = {} AND TABLE_CATALOG = {}",
            self.quote_smart(Some(table_name)),
            self.catalog()
        );
        let count = self.get_one(&query).await?;
        Ok(count.and_then(|c| c.as_i64()).unwrap_or(0) > 0)
    }

    async fn list_of_tables(&mut self, ignore_sequences: bool) -> Result<Vec<String>, DatabaseError> {
        let query = format!(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
            WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_CATALOG = {} ORDER BY TABLE_NAME",
            self.catalog()
        );
        let rows = self.get_all(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_first().and_then(|v| v.to_text()))
            .filter(|name| !(ignore_sequences && sql::is_sequence_table(name)))
            .collect())
    }

    fn column_from_info(&self, info: &Row) -> Column {
        let mut data_type = info.get_text("data_type").unwrap_or_default();
        if SIZED_STRING_TYPES.contains(&data_type.to_lowercase().as_str()) {
            match info.get("character_maximum_length").and_then(CellValue::as_i64) {
                Some(-1) => data_type.push_str("(max)"),
                Some(length) => data_type.push_str(&format!("({})", length)),
                None => {}
            }
        }

        Column {
            name: info.get_text("column_name").unwrap_or_default(),
            data_type,
            nullable: info.get_text("is_nullable").as_deref() == Some("YES"),
            default: info.get_text("column_default"),
            auto_increment: info.get("is_identity").and_then(CellValue::as_bool).unwrap_or(false),
            is_primary_key: info.get_text("is_primary_key").as_deref() == Some("YES"),
            comment: info.get_text("column_comment").filter(|c| !c.is_empty()),
        }
    }

    async fn constraints_on_table(
        &mut self,
        table_name: &str,
        column_name: Option<&str>,
    ) -> Result<Vec<OutgoingConstraint>, DatabaseError> {
        let mut query = format!(
            "SELECT fk.COLUMN_NAME AS col1, pk.TABLE_NAME AS table2, pk.COLUMN_NAME AS col2 {} \
            WHERE fk.TABLE_CATALOG = {} AND fk.TABLE_NAME = {}",
            FOREIGN_KEY_JOIN,
            self.catalog(),
            self.quote_smart(Some(table_name))
        );
        if let Some(column) = column_name {
            query.push_str(&format!(" AND fk.COLUMN_NAME = {}", self.quote_smart(Some(column))));
        }

        let rows = self.get_all(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| OutgoingConstraint::from_row(&row.into_lowercase_keys()))
            .collect())
    }

    async fn constraints_from_table(
        &mut self,
        table_name: &str,
        column_name: Option<&str>,
    ) -> Result<Vec<IncomingConstraint>, DatabaseError> {
        let mut query = format!(
            "SELECT fk.TABLE_NAME AS table1, fk.COLUMN_NAME AS col1, pk.COLUMN_NAME AS col2 {} \
            WHERE pk.TABLE_CATALOG = {} AND pk.TABLE_NAME = {}",
            FOREIGN_KEY_JOIN,
            self.catalog(),
            self.quote_smart(Some(table_name))
        );
        if let Some(column) = column_name {
            query.push_str(&format!(" AND pk.COLUMN_NAME = {}", self.quote_smart(Some(column))));
        }

        let rows = self.get_all(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| IncomingConstraint::from_row(&row.into_lowercase_keys()))
            .collect())
    }

    async fn database_list(&mut self) -> Result<Vec<String>, DatabaseError> {
        let rows = self
            .get_all("SELECT name FROM sys.databases WHERE state_desc = 'ONLINE' AND HAS_DBACCESS(name) = 1 ORDER BY name")
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_first().and_then(|v| v.to_text()))
            .collect())
    }

    async fn check_database_exists(&mut self, database_name: &str) -> Result<bool, DatabaseError> {
        let query = format!(
            "SELECT COUNT(1) AS cnt FROM sys.databases WHERE name = {}",
            self.quote_smart(Some(database_name))
        );
        let count = self.get_one(&query).await?;
        Ok(count.and_then(|c| c.as_i64()).unwrap_or(0) > 0)
    }

    async fn create_database(&mut self, database_name: &str) -> Result<(), DatabaseError> {
        self.exec(&format!("CREATE DATABASE {}", database_name)).await?;
        tracing::info!(database = %database_name, "database created, reconnecting");

        self.close().await?;
        self.settings = self.settings.with_db_name(database_name);
        self.connect().await
    }

    async fn create_table(&mut self, table: &Table, _drop_if_exist: bool) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotImplemented(format!(
            "CREATE TABLE generation for SQL Server (table '{}')",
            table.name
        )))
    }

    async fn advance_sequence(&mut self, sequence_name: &str) -> Result<i64, DatabaseError> {
        let value = self
            .get_one(&format!("UPDATE {} SET id = id + 1 OUTPUT INSERTED.id", sequence_name))
            .await?;
        value
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DatabaseError::execution(format!("sequence table '{}' has no row", sequence_name)))
    }

    async fn create_sequence(&mut self, table_name: &str) -> Result<(), DatabaseError> {
        let sequence = self.sequence_name(table_name);
        self.exec(&format!("CREATE TABLE {} (id BIGINT NOT NULL)", sequence)).await?;
        self.exec(&format!("INSERT INTO {} (id) VALUES (1)", sequence)).await?;
        Ok(())
    }

    async fn set_sequence_id(&mut self, table_name: &str, id: i64) -> Result<(), DatabaseError> {
        let sequence = self.sequence_name(table_name);
        self.exec(&format!("UPDATE {} SET id = {}", sequence, id)).await?;
        Ok(())
    }
}
