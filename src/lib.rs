// Vendor-agnostic database connections with schema introspection
// for MySQL, PostgreSQL and MS-SQL

// Module declarations
pub mod db;

pub use db::{
    CellValue, Column, ConnectionSettings, ConnectionSettingsBuilder, DatabaseError, DatabaseType,
    DbConnection, ExecutionErrorKind, IncomingConstraint, OutgoingConstraint, PersistedConnection,
    ProbeCredentials, Row, Table, UnderlyingType, UnifiedConnection,
};
