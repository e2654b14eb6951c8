//! Integration tests against live database servers
//!
//! These tests require running servers and are ignored by default.
//! Point them at a server with environment variables, then run:
//! ```
//! cargo test --test live_backends -- --ignored
//! ```
//!
//! Each vendor reads `DBCONN_<VENDOR>_HOST`, `_PORT`, `_USER`, `_PASSWORD`
//! and `_DATABASE`, with `<VENDOR>` one of `MYSQL`, `POSTGRES`, `MSSQL`.
//! For example:
//! ```
//! docker run -d -p 3306:3306 -e MYSQL_ROOT_PASSWORD=secret -e MYSQL_DATABASE=dbconn mysql:8
//! DBCONN_MYSQL_PASSWORD=secret cargo test --test live_backends mysql -- --ignored
//! ```

use dbconnection::db::probe::{list_databases, ProbeCredentials};
use dbconnection::{
    ConnectionSettings, DatabaseError, DatabaseType, DbConnection, IncomingConstraint,
    OutgoingConstraint, UnderlyingType, UnifiedConnection,
};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn env_or(vendor: &str, key: &str, default: &str) -> String {
    std::env::var(format!("DBCONN_{}_{}", vendor, key)).unwrap_or_else(|_| default.to_string())
}

/// Helper to create settings for a vendor from the environment
fn test_settings(database_type: DatabaseType) -> ConnectionSettings {
    let (vendor, user, database) = match database_type {
        DatabaseType::Mysql => ("MYSQL", "root", "dbconn"),
        DatabaseType::Postgresql => ("POSTGRES", "postgres", "dbconn"),
        DatabaseType::Mssql => ("MSSQL", "sa", "master"),
    };
    let password = std::env::var(format!("DBCONN_{}_PASSWORD", vendor)).ok();

    ConnectionSettings::builder()
        .set_host(env_or(vendor, "HOST", "localhost"))
        .set_port(
            env_or(vendor, "PORT", "")
                .parse()
                .ok()
                .or(Some(database_type.default_port())),
        )
        .set_user(env_or(vendor, "USER", user))
        .set_password(password.as_deref())
        .set_db_name(Some(env_or(vendor, "DATABASE", database).as_str()))
        .build()
}

async fn connect(database_type: DatabaseType) -> UnifiedConnection {
    init_tracing();
    UnifiedConnection::open(database_type, test_settings(database_type))
        .await
        .expect("Failed to connect")
}

async fn drop_fixtures(conn: &mut UnifiedConnection) {
    for table in ["dbconn_users", "dbconn_countries"] {
        conn.exec(&format!("DROP TABLE IF EXISTS {}", table))
            .await
            .expect("Failed to drop fixture table");
    }
}

async fn create_fixtures(conn: &mut UnifiedConnection) {
    drop_fixtures(conn).await;
    conn.exec("CREATE TABLE dbconn_countries (id INT NOT NULL PRIMARY KEY, label VARCHAR(50) NULL)")
        .await
        .expect("Failed to create countries");
    conn.exec(
        "CREATE TABLE dbconn_users (\
            id INT NOT NULL PRIMARY KEY, \
            country_id INT NULL, \
            name VARCHAR(255) NULL, \
            created DATE NULL, \
            FOREIGN KEY (country_id) REFERENCES dbconn_countries (id))",
    )
    .await
    .expect("Failed to create users");
}

async fn drop_sequence(conn: &mut UnifiedConnection, table: &str) {
    let sequence = conn.sequence_name(table);
    let statement = match conn.database_type() {
        DatabaseType::Postgresql => format!("DROP SEQUENCE IF EXISTS {}", sequence),
        _ => format!("DROP TABLE IF EXISTS {}", sequence),
    };
    conn.exec(&statement).await.expect("Failed to drop sequence");
}

async fn check_constraint_symmetry(database_type: DatabaseType) {
    let mut conn = connect(database_type).await;
    create_fixtures(&mut conn).await;

    let outgoing = conn.constraints_on_table("dbconn_users", None).await.unwrap();
    assert_eq!(
        outgoing,
        vec![OutgoingConstraint {
            col1: "country_id".to_string(),
            table2: "dbconn_countries".to_string(),
            col2: "id".to_string(),
        }]
    );

    let incoming = conn.constraints_from_table("dbconn_countries", Some("id")).await.unwrap();
    assert_eq!(
        incoming,
        vec![IncomingConstraint {
            table1: "dbconn_users".to_string(),
            col1: "country_id".to_string(),
            col2: "id".to_string(),
        }]
    );

    assert!(conn.constraints_on_table("dbconn_users", Some("name")).await.unwrap().is_empty());

    drop_fixtures(&mut conn).await;
    conn.close().await.unwrap();
}

async fn check_table_model(database_type: DatabaseType) {
    let mut conn = connect(database_type).await;
    create_fixtures(&mut conn).await;

    assert!(conn.is_table_exist("dbconn_users").await.unwrap());
    assert!(conn.list_of_tables(true).await.unwrap().contains(&"dbconn_users".to_string()));

    let table = conn.table_from_db_model("dbconn_users").await.unwrap();
    let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "country_id", "name", "created"]);

    let keys: Vec<&str> = table.primary_keys().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(keys, vec!["id"]);

    let id = table.column("id").unwrap();
    assert_eq!(conn.underlying_type(&id.data_type), UnderlyingType::Int);
    assert!(!id.nullable);
    let name = table.column("name").unwrap();
    assert_eq!(conn.underlying_type(&name.data_type), UnderlyingType::String);
    assert!(name.nullable);
    let created = table.column("created").unwrap();
    assert_eq!(conn.underlying_type(&created.data_type), UnderlyingType::Date);

    let missing = conn.table_from_db_model("dbconn_missing").await;
    assert!(matches!(missing, Err(DatabaseError::TableNotFound(_))));

    conn.create_index("dbconn_users", &["name"], false, None).await.unwrap();

    drop_fixtures(&mut conn).await;
    conn.close().await.unwrap();
}

async fn check_sequences(database_type: DatabaseType) {
    let mut conn = connect(database_type).await;
    drop_sequence(&mut conn, "dbconn_orders").await;

    let err = conn.next_id("dbconn_orders", false).await.unwrap_err();
    assert!(err.is_object_not_found(), "unexpected error: {}", err);

    assert_eq!(conn.next_id("dbconn_orders", true).await.unwrap(), 1);
    assert_eq!(conn.next_id("dbconn_orders", true).await.unwrap(), 2);

    conn.set_sequence_id("dbconn_orders", 41).await.unwrap();
    assert_eq!(conn.next_id("dbconn_orders", false).await.unwrap(), 42);

    drop_sequence(&mut conn, "dbconn_orders").await;
    conn.close().await.unwrap();
}

async fn check_probe(database_type: DatabaseType) {
    init_tracing();
    let settings = test_settings(database_type);
    let credentials = ProbeCredentials::new(
        settings.host().unwrap_or("localhost"),
        settings.port(),
        settings.user().unwrap_or_default(),
        settings.password(),
    );

    let databases = list_databases(database_type, &credentials).await;
    assert!(databases.iter().any(|db| Some(db.as_str()) == settings.db_name()));
}

#[tokio::test]
#[ignore = "requires running MySQL server"]
async fn test_mysql_constraint_symmetry() {
    check_constraint_symmetry(DatabaseType::Mysql).await;
}

#[tokio::test]
#[ignore = "requires running MySQL server"]
async fn test_mysql_table_model() {
    check_table_model(DatabaseType::Mysql).await;
}

#[tokio::test]
#[ignore = "requires running MySQL server"]
async fn test_mysql_sequences() {
    check_sequences(DatabaseType::Mysql).await;
}

#[tokio::test]
#[ignore = "requires running MySQL server"]
async fn test_mysql_probe() {
    check_probe(DatabaseType::Mysql).await;
}

#[tokio::test]
#[ignore = "requires running PostgreSQL server"]
async fn test_postgres_constraint_symmetry() {
    check_constraint_symmetry(DatabaseType::Postgresql).await;
}

#[tokio::test]
#[ignore = "requires running PostgreSQL server"]
async fn test_postgres_table_model() {
    check_table_model(DatabaseType::Postgresql).await;
}

#[tokio::test]
#[ignore = "requires running PostgreSQL server"]
async fn test_postgres_sequences() {
    check_sequences(DatabaseType::Postgresql).await;
}

#[tokio::test]
#[ignore = "requires running PostgreSQL server"]
async fn test_postgres_probe() {
    check_probe(DatabaseType::Postgresql).await;
}

#[tokio::test]
#[ignore = "requires running PostgreSQL server"]
async fn test_postgres_inheritance_root() {
    let mut conn = connect(DatabaseType::Postgresql).await;
    conn.exec("DROP TABLE IF EXISTS dbconn_child, dbconn_middle, dbconn_base").await.unwrap();
    conn.exec("CREATE TABLE dbconn_base (id INT)").await.unwrap();
    conn.exec("CREATE TABLE dbconn_middle () INHERITS (dbconn_base)").await.unwrap();
    conn.exec("CREATE TABLE dbconn_child () INHERITS (dbconn_middle)").await.unwrap();

    assert_eq!(conn.parent_table("dbconn_child").await.unwrap(), "dbconn_middle");
    assert_eq!(conn.find_root_sequence_table("dbconn_child").await.unwrap(), "dbconn_base");
    assert_eq!(conn.find_root_sequence_table("dbconn_base").await.unwrap(), "dbconn_base");

    conn.exec("DROP TABLE dbconn_child, dbconn_middle, dbconn_base").await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running SQL Server"]
async fn test_mssql_constraint_symmetry() {
    check_constraint_symmetry(DatabaseType::Mssql).await;
}

#[tokio::test]
#[ignore = "requires running SQL Server"]
async fn test_mssql_table_model() {
    check_table_model(DatabaseType::Mssql).await;
}

#[tokio::test]
#[ignore = "requires running SQL Server"]
async fn test_mssql_sequences() {
    check_sequences(DatabaseType::Mssql).await;
}

#[tokio::test]
#[ignore = "requires running SQL Server"]
async fn test_mssql_probe() {
    check_probe(DatabaseType::Mssql).await;
}
