// PostgreSQL Backend
// Implements DbConnection for PostgreSQL using tokio-postgres

use crate::db::schema::{Column, IncomingConstraint, OutgoingConstraint, Table};
use crate::db::settings::ConnectionSettings;
use crate::db::sql;
use crate::db::traits::{CellValue, DatabaseError, DatabaseType, DbConnection, ExecutionErrorKind, Row};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

/// Bound on inheritance walks, in case the catalog ever reports a cycle
const MAX_INHERITANCE_DEPTH: usize = 64;

/// PostgreSQL connection
pub struct PostgresConnection {
    settings: ConnectionSettings,
    client: Option<Client>,
    /// Task driving the socket; tokio-postgres splits client and connection
    driver: Option<JoinHandle<()>>,
}

impl PostgresConnection {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            client: None,
            driver: None,
        }
    }

    fn handle(&mut self) -> Result<&mut Client, DatabaseError> {
        self.client.as_mut().ok_or(DatabaseError::NotConnected)
    }

    /// Catalog filter: the configured database, or the session's current one
    fn catalog(&self) -> String {
        match self.settings.db_name() {
            Some(name) => self.quote_smart(Some(name)),
            None => "current_database()".to_string(),
        }
    }

    fn charset_statement(&self) -> String {
        if self.settings.is_utf8_charset() {
            "SET client_encoding TO 'UTF8'".to_string()
        } else {
            format!(
                "SET client_encoding TO {}",
                self.quote_smart(self.settings.charset())
            )
        }
    }
}

/// Quote a libpq key/value when it is empty or holds spaces, quotes or backslashes
fn conninfo_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Normalize a SQLSTATE
pub(crate) fn classify_sqlstate(code: &str) -> ExecutionErrorKind {
    match code {
        // undefined_table
        "42P01" => ExecutionErrorKind::ObjectNotFound,
        // duplicate_table, duplicate_database
        "42P07" | "42P04" => ExecutionErrorKind::AlreadyExists,
        _ => ExecutionErrorKind::Other,
    }
}

fn translate_error(err: tokio_postgres::Error) -> DatabaseError {
    match err.as_db_error() {
        Some(db_error) => DatabaseError::Execution {
            code: db_error.code().code().to_string(),
            kind: classify_sqlstate(db_error.code().code()),
            message: db_error.message().to_string(),
        },
        None => DatabaseError::execution(err.to_string()),
    }
}

/// CREATE TABLE plus one COMMENT ON COLUMN statement per commented column
pub(crate) fn create_table_sql(table: &Table) -> Vec<String> {
    let mut definitions: Vec<String> = table
        .columns()
        .iter()
        .map(|column| {
            let mut definition = format!("{} ", column.name);
            if column.auto_increment {
                let serial = if column.data_type.to_lowercase().starts_with("bigint") {
                    "bigserial"
                } else {
                    "serial"
                };
                definition.push_str(serial);
            } else {
                definition.push_str(&column.data_type);
                if let Some(default) = &column.default {
                    definition.push_str(&format!(" DEFAULT {}", default));
                }
            }
            definition.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
            definition
        })
        .collect();

    let keys: Vec<&str> = table.primary_keys().iter().map(|c| c.name.as_str()).collect();
    if !keys.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n  {}\n)",
        table.name,
        definitions.join(",\n  ")
    )];
    for column in table.columns() {
        if let Some(comment) = &column.comment {
            statements.push(format!(
                "COMMENT ON COLUMN {}.{} IS {}",
                table.name,
                column.name,
                sql::quote_literal(Some(comment.as_str()))
            ));
        }
    }
    statements
}

#[async_trait::async_trait]
impl DbConnection for PostgresConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    fn is_case_sensitive(&self) -> bool {
        false
    }

    /// libpq key/value connection string
    fn dsn(&self) -> Result<String, DatabaseError> {
        let mut parts = vec![
            format!("host={}", conninfo_value(self.settings.host().unwrap_or("localhost"))),
            format!("port={}", self.settings.port_or_default(DatabaseType::Postgresql)),
        ];
        if let Some(db) = self.settings.db_name() {
            parts.push(format!("dbname={}", conninfo_value(db)));
        }
        if let Some(user) = self.settings.user() {
            parts.push(format!("user={}", conninfo_value(user)));
        }
        if let Some(password) = self.settings.password() {
            parts.push(format!("password={}", conninfo_value(password)));
        }
        Ok(parts.join(" "))
    }

    async fn connect(&mut self) -> Result<(), DatabaseError> {
        let mut config: tokio_postgres::Config = self
            .dsn()?
            .parse()
            .map_err(|e: tokio_postgres::Error| DatabaseError::InvalidConfig(e.to_string()))?;
        let options = self.connect_options();
        config.keepalives(options.persistent);

        tracing::debug!(
            host = ?self.settings.host(),
            database = ?self.settings.db_name(),
            persistent = options.persistent,
            error_mode = ?options.error_mode,
            "connecting to PostgreSQL"
        );

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e)))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        self.client = Some(client);
        self.driver = Some(driver);

        let statement = self.charset_statement();
        self.init_session(&statement).await?;
        tracing::info!(database = ?self.settings.db_name(), "connected to PostgreSQL");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        // dropping the client ends the session; the driver task then finishes
        if self.client.take().is_some() {
            tracing::debug!("PostgreSQL connection closed");
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        tracing::debug!(sql = %sql::preview(sql), "exec");
        let client = self.handle()?;
        let messages = client.simple_query(sql).await.map_err(translate_error)?;
        Ok(messages
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(count) => *count,
                _ => 0,
            })
            .sum())
    }

    async fn get_all(&mut self, sql: &str) -> Result<Vec<Row>, DatabaseError> {
        tracing::debug!(sql = %sql::preview(sql), "get_all");
        let client = self.handle()?;
        let messages = client.simple_query(sql).await.map_err(translate_error)?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let converted: Row = row
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| {
                        let value = row
                            .get(idx)
                            .map(|v| CellValue::String(v.to_string()))
                            .unwrap_or(CellValue::Null);
                        (column.name().to_string(), value)
                    })
                    .collect();
                rows.push(converted);
            }
        }
        Ok(rows)
    }

    /// PostgreSQL folds unquoted identifiers itself; names pass through unchanged
    fn escape_db_item(&self, identifier: &str) -> String {
        identifier.to_string()
    }

    async fn table_info(&mut self, table_name: &str) -> Result<Vec<Row>, DatabaseError> {
        let table = self.quote_smart(Some(table_name));
        let query = format!(
            "SELECT c.*, \
                CASE WHEN pk.column_name IS NULL THEN 'NO' ELSE 'YES' END AS is_primary_key, \
                pgd.description AS column_comment \
            FROM information_schema.columns c \
            LEFT JOIN ( \
                SELECT kcu.column_name \
                FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage kcu \
                    ON tc.constraint_name = kcu.constraint_name \
                    AND tc.table_schema = kcu.table_schema \
                    AND tc.table_name = kcu.table_name \
                WHERE tc.constraint_type = 'PRIMARY KEY' \
                    AND tc.table_name = {table} AND tc.table_schema = current_schema() \
            ) pk ON pk.column_name = c.column_name \
            LEFT JOIN pg_catalog.pg_statio_all_tables st \
                ON st.schemaname = c.table_schema AND st.relname = c.table_name \
            LEFT JOIN pg_catalog.pg_description pgd \
                ON pgd.objoid = st.relid AND pgd.objsubid = c.ordinal_position \
            WHERE c.table_name = {table} AND c.table_catalog = {catalog} \
                AND c.table_schema = current_schema() \
            ORDER BY c.ordinal_position",
            table = table,
            catalog = self.catalog()
        );
        let rows = self.get_all(&query).await?;
        Ok(rows.into_iter().map(Row::into_lowercase_keys).collect())
    }

    async fn is_table_exist(&mut self, table_name: &str) -> Result<bool, DatabaseError> {
        let query = format!(
            "SELECT COUNT(1) AS cnt FROM information_schema.tables \
            WHERE table_name = {} AND table_catalog = {} AND table_schema = current_schema()",
            self.quote_smart(Some(table_name)),
            self.catalog()
        );
        let count = self.get_one(&query).await?;
        Ok(count.and_then(|c| c.as_i64()).unwrap_or(0) > 0)
    }

    /// Sequences are real objects here, so `ignore_sequences` has nothing to filter
    async fn list_of_tables(&mut self, _ignore_sequences: bool) -> Result<Vec<String>, DatabaseError> {
        let query = format!(
            "SELECT table_name FROM information_schema.tables \
            WHERE table_type = 'BASE TABLE' AND table_catalog = {} AND table_schema = current_schema() \
            ORDER BY table_name",
            self.catalog()
        );
        let rows = self.get_all(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_first().and_then(|v| v.to_text()))
            .collect())
    }

    fn column_from_info(&self, info: &Row) -> Column {
        let mut data_type = info.get_text("data_type").unwrap_or_default();
        if let Some(length) = info.get("character_maximum_length").and_then(CellValue::as_i64) {
            data_type.push_str(&format!("({})", length));
        } else if data_type == "numeric" {
            let precision = info.get("numeric_precision").and_then(CellValue::as_i64);
            let scale = info.get("numeric_scale").and_then(CellValue::as_i64);
            if let (Some(precision), Some(scale)) = (precision, scale) {
                data_type.push_str(&format!("({},{})", precision, scale));
            }
        }

        let default = info.get_text("column_default");
        let is_serial = default.as_deref().map(|d| d.starts_with("nextval(")).unwrap_or(false);
        let is_identity = info.get_text("is_identity").as_deref() == Some("YES");

        Column {
            name: info.get_text("column_name").unwrap_or_default(),
            data_type,
            nullable: info.get_text("is_nullable").as_deref() == Some("YES"),
            default,
            auto_increment: is_serial || is_identity,
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
            "SELECT a1.attname AS col1, c2.relname AS table2, a2.attname AS col2 \
            FROM pg_catalog.pg_constraint con \
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(local_attnum, remote_attnum) \
            JOIN pg_catalog.pg_class c1 ON c1.oid = con.conrelid \
            JOIN pg_catalog.pg_class c2 ON c2.oid = con.confrelid \
            JOIN pg_catalog.pg_namespace n ON n.oid = c1.relnamespace \
            JOIN pg_catalog.pg_attribute a1 ON a1.attrelid = con.conrelid AND a1.attnum = k.local_attnum \
            JOIN pg_catalog.pg_attribute a2 ON a2.attrelid = con.confrelid AND a2.attnum = k.remote_attnum \
            WHERE con.contype = 'f' AND n.nspname = current_schema() AND c1.relname = {}",
            self.quote_smart(Some(table_name))
        );
        if let Some(column) = column_name {
            query.push_str(&format!(" AND a1.attname = {}", self.quote_smart(Some(column))));
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
            "SELECT c1.relname AS table1, a1.attname AS col1, a2.attname AS col2 \
            FROM pg_catalog.pg_constraint con \
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(local_attnum, remote_attnum) \
            JOIN pg_catalog.pg_class c1 ON c1.oid = con.conrelid \
            JOIN pg_catalog.pg_class c2 ON c2.oid = con.confrelid \
            JOIN pg_catalog.pg_namespace n ON n.oid = c2.relnamespace \
            JOIN pg_catalog.pg_attribute a1 ON a1.attrelid = con.conrelid AND a1.attnum = k.local_attnum \
            JOIN pg_catalog.pg_attribute a2 ON a2.attrelid = con.confrelid AND a2.attnum = k.remote_attnum \
            WHERE con.contype = 'f' AND n.nspname = current_schema() AND c2.relname = {}",
            self.quote_smart(Some(table_name))
        );
        if let Some(column) = column_name {
            query.push_str(&format!(" AND a2.attname = {}", self.quote_smart(Some(column))));
        }

        let rows = self.get_all(&query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| IncomingConstraint::from_row(&row.into_lowercase_keys()))
            .collect())
    }

    async fn database_list(&mut self) -> Result<Vec<String>, DatabaseError> {
        let rows = self
            .get_all("SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname")
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_first().and_then(|v| v.to_text()))
            .collect())
    }

    async fn parent_table(&mut self, table_name: &str) -> Result<String, DatabaseError> {
        let query = format!(
            "SELECT p.relname AS parent \
            FROM pg_catalog.pg_inherits i \
            JOIN pg_catalog.pg_class c ON c.oid = i.inhrelid \
            JOIN pg_catalog.pg_class p ON p.oid = i.inhparent \
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
            WHERE c.relname = {} AND n.nspname = current_schema() \
            ORDER BY i.inhseqno LIMIT 1",
            self.quote_smart(Some(table_name))
        );
        let parent = self.get_one(&query).await?;
        Ok(parent
            .and_then(|p| p.to_text())
            .unwrap_or_else(|| table_name.to_string()))
    }

    /// Walk up the inheritance chain to the table that owns the sequence
    async fn find_root_sequence_table(&mut self, table_name: &str) -> Result<String, DatabaseError> {
        let mut current = table_name.to_string();
        for _ in 0..MAX_INHERITANCE_DEPTH {
            let parent = self.parent_table(&current).await?;
            if parent == current {
                return Ok(current);
            }
            current = parent;
        }
        Ok(current)
    }

    async fn create_database(&mut self, database_name: &str) -> Result<(), DatabaseError> {
        let encoding = if self.settings.is_utf8_charset() {
            "UTF8".to_string()
        } else {
            self.settings.charset().unwrap_or("UTF8").to_string()
        };
        self.exec(&format!(
            "CREATE DATABASE {} ENCODING {} TEMPLATE template0",
            database_name,
            self.quote_smart(Some(encoding.as_str()))
        ))
        .await?;
        tracing::info!(database = %database_name, "database created, reconnecting");

        self.close().await?;
        self.settings = self.settings.with_db_name(database_name);
        self.connect().await
    }

    async fn create_table(&mut self, table: &Table, drop_if_exist: bool) -> Result<(), DatabaseError> {
        if drop_if_exist {
            self.exec(&format!("DROP TABLE IF EXISTS {}", table.name)).await?;
        }
        for statement in create_table_sql(table) {
            self.exec(&statement).await?;
        }
        Ok(())
    }

    async fn advance_sequence(&mut self, sequence_name: &str) -> Result<i64, DatabaseError> {
        let value = self
            .get_one(&format!("SELECT nextval({})", self.quote_smart(Some(sequence_name))))
            .await?;
        value
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DatabaseError::execution(format!("nextval returned nothing for '{}'", sequence_name)))
    }

    async fn create_sequence(&mut self, table_name: &str) -> Result<(), DatabaseError> {
        let sequence = self.sequence_name(table_name);
        self.exec(&format!("CREATE SEQUENCE {}", sequence)).await?;
        self.exec(&format!("SELECT setval({}, 1, true)", self.quote_smart(Some(sequence.as_str()))))
            .await?;
        Ok(())
    }

    async fn set_sequence_id(&mut self, table_name: &str, id: i64) -> Result<(), DatabaseError> {
        let sequence = self.sequence_name(table_name);
        self.exec(&format!(
            "SELECT setval({}, {}, true)",
            self.quote_smart(Some(sequence.as_str())),
            id
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dsn() {
        let settings = ConnectionSettings::builder()
            .set_host("localhost")
            .set_db_name(Some("shop"))
            .set_user("app")
            .set_password(Some("it's secret"))
            .build();
        let conn = PostgresConnection::new(settings);
        assert_eq!(
            conn.dsn().unwrap(),
            "host=localhost port=5432 dbname=shop user=app password='it\\'s secret'"
        );
    }

    #[test]
    fn test_dsn_without_database() {
        let settings = ConnectionSettings::builder()
            .set_host("pg")
            .set_port(Some(6543))
            .set_user("app")
            .build();
        let dsn = PostgresConnection::new(settings).dsn().unwrap();
        assert_eq!(dsn, "host=pg port=6543 user=app");
        assert!(dsn.parse::<tokio_postgres::Config>().is_ok());
    }

    #[test]
    fn test_conninfo_value() {
        assert_eq!(conninfo_value(""), "''");
        assert_eq!(conninfo_value("a\\b"), "'a\\\\b'");
        assert_eq!(conninfo_value("plain"), "plain");
    }

    #[test]
    fn test_quoting_and_case() {
        let conn = PostgresConnection::new(ConnectionSettings::default());
        assert_eq!(conn.escape_db_item("users"), "users");
        assert_eq!(conn.quote_smart(Some("a'b")), "'a''b'");
        assert!(!conn.is_case_sensitive());
        assert_eq!(conn.charset_statement(), "SET client_encoding TO 'UTF8'");
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_sqlstate("42P01"), ExecutionErrorKind::ObjectNotFound);
        assert_eq!(classify_sqlstate("42P07"), ExecutionErrorKind::AlreadyExists);
        assert_eq!(classify_sqlstate("23505"), ExecutionErrorKind::Other);
    }

    #[test]
    fn test_column_from_info() {
        let conn = PostgresConnection::new(ConnectionSettings::default());
        let mut info = Row::new();
        info.push("column_name", CellValue::String("id".into()));
        info.push("data_type", CellValue::String("integer".into()));
        info.push("character_maximum_length", CellValue::Null);
        info.push("is_nullable", CellValue::String("NO".into()));
        info.push(
            "column_default",
            CellValue::String("nextval('users_id_seq'::regclass)".into()),
        );
        info.push("is_identity", CellValue::String("NO".into()));
        info.push("is_primary_key", CellValue::String("YES".into()));
        info.push("column_comment", CellValue::Null);

        let column = conn.column_from_info(&info);
        assert_eq!(column.data_type, "integer");
        assert!(column.auto_increment);
        assert!(column.is_primary_key);
        assert!(!column.nullable);

        let mut name = Row::new();
        name.push("column_name", CellValue::String("name".into()));
        name.push("data_type", CellValue::String("character varying".into()));
        name.push("character_maximum_length", CellValue::String("80".into()));
        name.push("is_nullable", CellValue::String("YES".into()));
        name.push("column_comment", CellValue::String("display name".into()));
        let column = conn.column_from_info(&name);
        assert_eq!(column.data_type, "character varying(80)");
        assert_eq!(column.comment.as_deref(), Some("display name"));
        assert!(!column.auto_increment);
    }

    #[test]
    fn test_create_table_sql() {
        let table = Table::with_columns(
            "users",
            vec![
                Column::new("id", "integer").primary_key().auto_increment(),
                Column::new("email", "varchar(255)")
                    .not_null()
                    .with_comment("login"),
                Column::new("active", "boolean").with_default("true"),
            ],
        )
        .unwrap();

        let statements = create_table_sql(&table);
        assert_eq!(
            statements[0],
            "CREATE TABLE users (\n  id serial NOT NULL,\n  email varchar(255) NOT NULL,\n  active boolean DEFAULT true NULL,\n  PRIMARY KEY (id)\n)"
        );
        assert_eq!(statements[1], "COMMENT ON COLUMN users.email IS 'login'");
        assert_eq!(statements.len(), 2);
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let mut conn = PostgresConnection::new(ConnectionSettings::default());
        assert!(matches!(conn.exec("SELECT 1").await, Err(DatabaseError::NotConnected)));
        assert!(matches!(conn.next_id("users", true).await, Err(DatabaseError::NotConnected)));
        assert!(conn.close().await.is_ok());
    }
}
