// Database Module
// Connections, schema introspection and DDL helpers for MySQL, PostgreSQL
// and MS-SQL behind a single trait

pub mod drivers;
pub mod probe;
pub mod schema;
pub mod settings;
pub mod sql;
pub mod traits;
pub mod unified;

// ============================================================================
// Re-exports
// ============================================================================

pub use drivers::{MssqlConnection, MySqlConnection, PostgresConnection};
pub use probe::{list_databases, list_databases_json, ProbeCredentials};
pub use schema::{underlying_type, Column, IncomingConstraint, OutgoingConstraint, Table, UnderlyingType};
pub use settings::{ConnectionSettings, ConnectionSettingsBuilder, PersistedConnection};
pub use traits::{
    CellValue, ConnectOptions, DatabaseError, DatabaseType, DbConnection, ErrorMode, ExecutionErrorKind,
    Row,
};
pub use unified::UnifiedConnection;
