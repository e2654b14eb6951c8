// Database Backends (MySQL, PostgreSQL, MS-SQL)
// Contains the DbConnection implementation for each supported vendor

pub mod mssql;
pub mod mysql;
pub mod postgres;

// Re-export backends
pub use mssql::MssqlConnection;
pub use mysql::MySqlConnection;
pub use postgres::PostgresConnection;
